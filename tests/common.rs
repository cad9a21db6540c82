use anyhow::{Context, Result};
use time::{Duration, OffsetDateTime};

use mdoc_proximity::definitions::device_engagement::Engagement;
use mdoc_proximity::definitions::device_request::ItemsRequest;
use mdoc_proximity::definitions::keys::{EcCurve, EcPrivateKey};
use mdoc_proximity::document_type::{DocumentTypeRepository, MDL_DOCTYPE};
use mdoc_proximity::issuance::sample::SampleIssuer;
use mdoc_proximity::presentation::{Credential, ReaderContext, TrustManager, TrustPoint};
use mdoc_proximity::reader_credentials::{init_reader_credentials, MemoryStorageTable};
use mdoc_proximity::transport::loopback::LoopbackTransportFactory;
use mdoc_proximity::transport::{Role, Transport, TransportFactory, TransportOptions};

pub const ISSUER_DISPLAY_NAME: &str = "ACME DMV";

#[allow(dead_code)]
fn main() {}

/// A sample issuer and an mDL it issued, valid from now for a year.
#[allow(dead_code)]
pub fn sample_credential() -> Result<(SampleIssuer, Credential)> {
    let now = OffsetDateTime::now_utc();
    let issuer = SampleIssuer::generate(now).context("could not create issuer")?;
    let device_key = EcPrivateKey::generate(EcCurve::P256);
    let mdoc = issuer
        .issue_mdl(&device_key.public_key(), now)
        .context("could not issue mDL")?;
    Ok((issuer, Credential { mdoc, device_key }))
}

/// Trusts the sample issuer's IACA certificate under [ISSUER_DISPLAY_NAME].
#[allow(dead_code)]
pub fn trust_manager(issuer: &SampleIssuer) -> TrustManager {
    let mut trust_manager = TrustManager::new();
    trust_manager.add_trust_point(
        TrustPoint::new(issuer.iaca_certificate.clone()).with_display_name(ISSUER_DISPLAY_NAME),
    );
    trust_manager
}

/// The canned mDL request called `name`.
#[allow(dead_code)]
pub fn canned_request(name: &str) -> Result<ItemsRequest> {
    Ok(DocumentTypeRepository::with_defaults()
        .for_mdoc(MDL_DOCTYPE)
        .and_then(|document_type| document_type.canned_request(name))
        .with_context(|| format!("no canned request {name}"))?
        .to_items_request(MDL_DOCTYPE))
}

/// A reader context with freshly generated credentials and short timeouts.
#[allow(dead_code)]
pub fn reader_context(request: ItemsRequest) -> Result<ReaderContext> {
    let now = OffsetDateTime::now_utc().replace_nanosecond(0)?;
    let credentials =
        init_reader_credentials(&MemoryStorageTable::new(), now, now + Duration::days(30))
            .context("could not create reader credentials")?;
    Ok(ReaderContext {
        reader_key: credentials.reader_key,
        reader_certificate: credentials.reader_certificate,
        reader_root_certificate: credentials.reader_root_certificate,
        request,
        transport_options: TransportOptions::default(),
        connection_timeout: std::time::Duration::from_secs(5),
        message_timeout: std::time::Duration::from_secs(5),
    })
}

/// Connects a reader transport to the holder that published `engagement_bytes`.
#[allow(dead_code)]
pub async fn connect_reader(
    factory: &LoopbackTransportFactory,
    engagement_bytes: &[u8],
) -> Result<(Engagement, Box<dyn Transport>)> {
    let engagement = Engagement::parse(engagement_bytes).context("invalid engagement")?;
    let method = engagement
        .connection_methods
        .first()
        .context("engagement has no connection methods")?;
    let mut transport =
        factory.create_transport(method, Role::MdocReader, &TransportOptions::default())?;
    transport.open(&engagement.e_sender_key).await?;
    Ok((engagement, transport))
}
