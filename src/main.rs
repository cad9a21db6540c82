use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Error};
use clap::Parser;
use clap_stdin::MaybeStdin;
use mdoc_proximity::config::Config;
use mdoc_proximity::definitions::device_engagement::{self, Engagement, ENGAGEMENT_VERSION_1_0};
use mdoc_proximity::definitions::keys::EcPrivateKey;
use mdoc_proximity::definitions::DeviceResponseParser;
use mdoc_proximity::document_type::{DocumentTypeRepository, MDL_DOCTYPE};
use mdoc_proximity::issuance::sample::SampleIssuer;
use mdoc_proximity::presentation::{
    render_document, run_reader_flow, Credential, HolderPresentment, ReaderContext,
    ReaderOutcome, RenderedDocument, SimplePresentmentSource, TrustManager, TrustPoint,
};
use mdoc_proximity::reader_credentials::{
    init_reader_credentials, FileStorageTable, MemoryStorageTable, ReaderCredentials,
    StorageTable,
};
use mdoc_proximity::transport::loopback::LoopbackTransportFactory;
use mdoc_proximity::transport::with_service_uuids;
use serde_json::json;
use time::OffsetDateTime;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON configuration file; defaults apply to anything it leaves out.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    action: Action,
}

#[derive(Debug, clap::Subcommand)]
enum Action {
    /// Print a holder engagement QR payload for the configured connection methods.
    Qr,
    /// Print a scanned engagement as JSON.
    Inspect {
        /// `mdoc:` URI as read from the QR code.
        payload: MaybeStdin<String>,
    },
    /// Create (or load) reader credentials and print the certificates.
    Credentials {
        /// JSON file the credentials are cached in.
        #[arg(long)]
        store: PathBuf,
    },
    /// Present a sample mDL to a reader in the same process and print what the reader sees.
    Simulate,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    match args.action {
        Action::Qr => print_qr(&config),
        Action::Inspect { payload } => inspect(payload.trim()),
        Action::Credentials { store } => {
            let credentials = reader_credentials(&FileStorageTable::new(store), &config)?;
            print_credentials(&credentials)
        }
        Action::Simulate => simulate(&config).await,
    }
}

fn print_qr(config: &Config) -> Result<(), Error> {
    let key = EcPrivateKey::generate(config.holder.curve);
    let methods: Vec<_> = config
        .holder
        .connection_methods
        .iter()
        .map(with_service_uuids)
        .collect();
    let engagement =
        device_engagement::generate(&key.public_key(), &methods, ENGAGEMENT_VERSION_1_0)?;
    println!("{}", device_engagement::to_qr_code_uri(&engagement));
    Ok(())
}

fn inspect(payload: &str) -> Result<(), Error> {
    let bytes = device_engagement::from_qr_code_uri(payload).context("could not read payload")?;
    let engagement = Engagement::parse(&bytes).context("could not parse engagement")?;
    let (x, y) = engagement.e_sender_key.coordinates();
    let output = json!({
        "version": engagement.version,
        "eSenderKey": {
            "crv": engagement.e_sender_key.curve(),
            "x": hex::encode(x),
            "y": hex::encode(y),
        },
        "bleIdent": hex::encode(engagement.ble_ident()),
        "connectionMethods": engagement.connection_methods,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn reader_credentials(
    table: &dyn StorageTable,
    config: &Config,
) -> Result<ReaderCredentials, Error> {
    let valid_from = OffsetDateTime::now_utc().replace_nanosecond(0)?;
    let valid_until =
        valid_from + time::Duration::days(config.reader.credential_validity_days.into());
    init_reader_credentials(table, valid_from, valid_until)
        .context("could not initialise reader credentials")
}

fn print_credentials(credentials: &ReaderCredentials) -> Result<(), Error> {
    for certificate in [
        &credentials.reader_certificate,
        &credentials.reader_root_certificate,
    ] {
        eprintln!(
            "{} (issued by {}, valid until {})",
            certificate.subject(),
            certificate.issuer(),
            certificate.not_after()
        );
        print!("{}", certificate.to_pem()?);
    }
    Ok(())
}

async fn simulate(config: &Config) -> Result<(), Error> {
    let now = OffsetDateTime::now_utc();
    let issuer = SampleIssuer::generate(now)?;
    let device_key = EcPrivateKey::generate(config.holder.curve);
    let mdoc = issuer.issue_mdl(&device_key.public_key(), now)?;
    let source = SimplePresentmentSource {
        credentials: vec![Credential { mdoc, device_key }],
        ..Default::default()
    };

    let repository = DocumentTypeRepository::with_defaults();
    let request = repository
        .for_mdoc(MDL_DOCTYPE)
        .and_then(|document_type| document_type.canned_request(&config.reader.canned_request))
        .ok_or_else(|| anyhow!("unknown canned request {:?}", config.reader.canned_request))?
        .to_items_request(MDL_DOCTYPE);
    let credentials = reader_credentials(&MemoryStorageTable::new(), config)?;
    let context = ReaderContext {
        reader_key: credentials.reader_key,
        reader_certificate: credentials.reader_certificate,
        reader_root_certificate: credentials.reader_root_certificate,
        request,
        transport_options: config.reader.transport_options,
        connection_timeout: config.reader.connection_timeout(),
        message_timeout: config.reader.message_timeout(),
    };

    let factory = LoopbackTransportFactory::new();
    let mut holder = HolderPresentment::new(Arc::new(factory.clone()), config.holder.clone());
    let mut engagement = holder.subscribe_engagement();

    let holder_side = async {
        holder.set_connecting().await?;
        holder.present(&source).await
    };
    let reader_side = async {
        let bytes = engagement
            .wait_for(Option::is_some)
            .await
            .map_err(|_| anyhow!("holder went away before publishing an engagement"))?
            .clone()
            .unwrap_or_default();
        let payload = device_engagement::to_qr_code_uri(&bytes);
        println!("{payload}");
        run_reader_flow(&payload, &context, &factory)
            .await
            .map_err(|e| anyhow!(e.user_message()))
    };
    tokio::pin!(holder_side, reader_side);
    // Whichever side fails first ends the simulation.
    let (presented, read) = tokio::select! {
        presented = &mut holder_side => {
            let presented = presented.map_err(|e| anyhow!(e.user_message()))?;
            (presented, reader_side.await?)
        }
        read = &mut reader_side => {
            let read = read?;
            (holder_side.await.map_err(|e| anyhow!(e.user_message()))?, read)
        }
    };
    tracing::info!("holder: {presented:?}");

    let ReaderOutcome::Completed(result) = read else {
        bail!("no usable transport");
    };
    let Some(response) = result.device_response else {
        bail!("holder ended the session without a response");
    };
    let parsed = DeviceResponseParser::new(&response, &result.session_transcript)
        .with_ephemeral_reader_key(&result.e_reader_key)
        .parse()?;

    let mut trust_manager = TrustManager::new();
    trust_manager
        .add_trust_point(TrustPoint::new(issuer.iaca_certificate).with_display_name("ACME DMV"));
    for document in &parsed.documents {
        print_rendered(&render_document(
            document,
            &repository,
            &trust_manager,
            OffsetDateTime::now_utc(),
        ));
    }
    Ok(())
}

fn print_rendered(rendered: &RenderedDocument) {
    for message in &rendered.info_messages {
        println!("info: {message}");
    }
    for message in &rendered.warning_messages {
        println!("warning: {message}");
    }
    for pair in &rendered.key_value_pairs {
        match &pair.image {
            Some(image) => println!("{}: <{} image>", pair.key, image.format),
            None => println!("{}: {}", pair.key, pair.text_value),
        }
    }
}
