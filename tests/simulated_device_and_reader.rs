use std::sync::Arc;

use anyhow::{bail, Context, Result};
use time::{Duration, OffsetDateTime};

use mdoc_proximity::config::HolderConfig;
use mdoc_proximity::definitions::device_engagement::{self, BleOptions, ConnectionMethod};
use mdoc_proximity::definitions::validity_info::ValidityInfo;
use mdoc_proximity::definitions::{
    DeviceResponseParser, EcCurve, EcPrivateKey, ParsedDeviceResponse,
};
use mdoc_proximity::document_type::{DocumentTypeRepository, MDL_DOCTYPE, MDL_NAMESPACE};
use mdoc_proximity::issuance::sample::SampleIssuer;
use mdoc_proximity::presentation::{
    render_document, run_reader_flow, Credential, DeviceAuthMode, HolderPresentment,
    PresentmentState, ReaderOutcome, SimplePresentmentSource, Termination,
};
use mdoc_proximity::transport::loopback::LoopbackTransportFactory;

mod common;

/// Runs a holder presenting `credential` and a reader asking for `canned_request`
/// against each other, and parses what the reader received.
async fn present(
    credential: Credential,
    mode: DeviceAuthMode,
    canned_request: &str,
    config: HolderConfig,
) -> Result<ParsedDeviceResponse> {
    let source = SimplePresentmentSource {
        credentials: vec![credential],
        device_auth_mode: mode,
        ..Default::default()
    };
    let context = common::reader_context(common::canned_request(canned_request)?)?;
    let factory = LoopbackTransportFactory::new();
    let mut holder = HolderPresentment::new(Arc::new(factory.clone()), config);
    let mut engagement = holder.subscribe_engagement();

    let holder_side = async {
        holder.set_connecting().await?;
        holder.present(&source).await
    };
    let reader_side = async {
        let bytes = engagement
            .wait_for(Option::is_some)
            .await?
            .clone()
            .context("no engagement")?;
        let payload = device_engagement::to_qr_code_uri(&bytes);
        Ok::<_, anyhow::Error>(run_reader_flow(&payload, &context, &factory).await?)
    };
    let (presented, outcome) = tokio::join!(holder_side, reader_side);
    presented?;
    assert_eq!(holder.state(), PresentmentState::Completed);

    let ReaderOutcome::Completed(result) = outcome? else {
        bail!("no usable transport");
    };
    assert_eq!(result.termination, Termination::HolderStatus);
    let response = result.device_response.context("no response")?;
    Ok(DeviceResponseParser::new(&response, &result.session_transcript)
        .with_ephemeral_reader_key(&result.e_reader_key)
        .parse()?)
}

#[tokio::test]
async fn trusted_issuer_is_reported_by_display_name() -> Result<()> {
    let (issuer, credential) = common::sample_credential()?;
    let parsed = present(
        credential,
        DeviceAuthMode::Signature,
        "us-transportation",
        HolderConfig::default(),
    )
    .await?;
    assert_eq!(parsed.status, 0);
    let document = parsed.documents.first().context("no document")?;
    assert!(document.issuer_signed_authenticated);
    assert!(document.device_signed_authenticated);

    let rendered = render_document(
        document,
        &DocumentTypeRepository::with_defaults(),
        &common::trust_manager(&issuer),
        OffsetDateTime::now_utc(),
    );
    assert_eq!(
        rendered.info_messages,
        vec![format!("Issuer '{}' is in a trust list", common::ISSUER_DISPLAY_NAME)]
    );
    assert!(rendered.warning_messages.is_empty());

    let value = |key: &str| {
        rendered
            .key_value_pairs
            .iter()
            .find(|pair| pair.key == key)
            .map(|pair| pair.text_value.clone())
    };
    assert_eq!(value("DocType").as_deref(), Some(MDL_DOCTYPE));
    assert_eq!(value("Namespace").as_deref(), Some(MDL_NAMESPACE));
    assert_eq!(value("Family Name").as_deref(), Some("Mustermann"));
    let portrait = rendered
        .key_value_pairs
        .iter()
        .find(|pair| pair.key == "Photo of Holder")
        .context("no portrait")?;
    assert!(portrait.image.is_some());
    Ok(())
}

#[tokio::test]
async fn mac_authentication_over_p384_session() -> Result<()> {
    let now = OffsetDateTime::now_utc();
    let issuer = SampleIssuer::generate(now)?;
    // EMacKey agreement needs the device key on the session curve.
    let device_key = EcPrivateKey::generate(EcCurve::P384);
    let mdoc = issuer.issue_mdl(&device_key.public_key(), now)?;
    let credential = Credential { mdoc, device_key };
    let config = HolderConfig {
        curve: EcCurve::P384,
        connection_methods: vec![ConnectionMethod::Ble(BleOptions {
            supports_central_client_mode: true,
            supports_peripheral_server_mode: true,
            ..Default::default()
        })],
        ..Default::default()
    };
    let parsed = present(credential, DeviceAuthMode::Mac, "age_over_18", config).await?;
    let document = parsed.documents.first().context("no document")?;
    assert!(document.issuer_signed_authenticated);
    assert!(document.device_signed_authenticated);
    assert_eq!(document.num_issuer_entry_digest_match_failures, 0);
    Ok(())
}

#[tokio::test]
async fn expired_document_warns_once() -> Result<()> {
    let now = OffsetDateTime::now_utc().replace_nanosecond(0)?;
    let issuer = SampleIssuer::generate(now)?;
    let device_key = EcPrivateKey::generate(EcCurve::P256);
    let mdoc = issuer.issue_mdl_with_validity(
        &device_key.public_key(),
        ValidityInfo {
            signed: now - Duration::days(30),
            valid_from: now - Duration::days(30),
            valid_until: now - Duration::days(1),
            expected_update: None,
        },
    )?;
    let parsed = present(
        Credential { mdoc, device_key },
        DeviceAuthMode::Signature,
        "age_over_21",
        HolderConfig::default(),
    )
    .await?;
    let document = parsed.documents.first().context("no document")?;

    let rendered = render_document(
        document,
        &DocumentTypeRepository::with_defaults(),
        &common::trust_manager(&issuer),
        now,
    );
    let expired = "Document information is not valid at this point in time.";
    assert_eq!(
        rendered
            .warning_messages
            .iter()
            .filter(|message| message.as_str() == expired)
            .count(),
        1
    );
    Ok(())
}
