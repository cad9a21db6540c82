use std::sync::Arc;

use anyhow::{Context, Result};

use mdoc_proximity::config::HolderConfig;
use mdoc_proximity::definitions::device_request::generate_device_request;
use mdoc_proximity::definitions::keys::EcPrivateKey;
use mdoc_proximity::definitions::session::{
    session_transcript_bytes, Handover, Role, SessionCipher, Status,
};
use mdoc_proximity::definitions::DeviceResponseParser;
use mdoc_proximity::document_type::{MDL_DOCTYPE, MDL_NAMESPACE};
use mdoc_proximity::presentation::{
    HolderPresentment, PresentmentOutcome, PresentmentState, SimplePresentmentSource,
};
use mdoc_proximity::transport::loopback::LoopbackTransportFactory;
use mdoc_proximity::transport::Transport;
use mdoc_proximity::Error;

mod common;

fn holder(factory: &LoopbackTransportFactory) -> HolderPresentment {
    HolderPresentment::new(Arc::new(factory.clone()), HolderConfig::default())
}

#[tokio::test]
async fn connecting_publishes_engagement_until_a_reader_connects() -> Result<()> {
    let factory = LoopbackTransportFactory::new();
    let mut holder = holder(&factory);
    let mut engagement = holder.subscribe_engagement();
    let state = holder.subscribe_state();
    assert_eq!(*state.borrow(), PresentmentState::Idle);

    let reader = async {
        let bytes = engagement
            .wait_for(Option::is_some)
            .await?
            .clone()
            .context("no engagement")?;
        assert_eq!(*state.borrow(), PresentmentState::Connecting);
        let (_, transport) = common::connect_reader(&factory, &bytes).await?;
        Ok::<_, anyhow::Error>(transport)
    };
    let (connected, transport) = tokio::join!(holder.set_connecting(), reader);
    connected?;
    let _transport = transport?;

    assert_eq!(holder.state(), PresentmentState::WaitingForSource);
    assert!(engagement.borrow().is_none());
    assert!(holder.mechanism().is_some());

    holder.reset().await;
    assert_eq!(holder.state(), PresentmentState::Idle);
    Ok(())
}

#[tokio::test]
async fn presents_requested_elements_and_terminates() -> Result<()> {
    let (_, credential) = common::sample_credential()?;
    let source = SimplePresentmentSource {
        credentials: vec![credential],
        ..Default::default()
    };
    let context = common::reader_context(common::canned_request("age_over_21")?)?;

    let factory = LoopbackTransportFactory::new();
    let mut holder = holder(&factory);
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
        let (engagement, mut transport) = common::connect_reader(&factory, &bytes).await?;

        let e_reader_key = EcPrivateKey::generate(engagement.e_sender_key.curve());
        let transcript =
            session_transcript_bytes(&bytes, &e_reader_key.public_key(), &Handover::Qr)?;
        let mut cipher = SessionCipher::new(
            Role::MdocReader,
            &e_reader_key,
            &engagement.e_sender_key,
            &transcript,
        )?;
        let request = generate_device_request(
            std::slice::from_ref(&context.request),
            &transcript,
            Some(&context.reader_key),
            &[
                context.reader_certificate.clone(),
                context.reader_root_certificate.clone(),
            ],
        )?;
        transport
            .send_message(&cipher.encrypt_message(&request, None)?)
            .await?;

        let (response, status) = cipher.decrypt_message(&transport.wait_for_message().await?)?;
        assert_eq!(status, Some(Status::SessionTermination));
        assert!(transport.wait_for_message().await?.is_empty());
        let response = response.context("no response")?;
        let parsed = DeviceResponseParser::new(&response, &transcript)
            .with_ephemeral_reader_key(&e_reader_key)
            .parse()?;
        Ok::<_, anyhow::Error>(parsed)
    };
    let (presented, parsed) = tokio::join!(holder_side, reader_side);
    assert_eq!(presented?, PresentmentOutcome::Responded { documents: 1 });
    assert_eq!(holder.state(), PresentmentState::Completed);
    assert_eq!(factory.close_count(Role::Mdoc), 1);

    let parsed = parsed?;
    assert_eq!(parsed.documents.len(), 1);
    let document = &parsed.documents[0];
    assert_eq!(document.doc_type, MDL_DOCTYPE);
    assert!(document.issuer_signed_authenticated);
    assert!(document.device_signed_authenticated);
    assert_eq!(document.num_issuer_entry_digest_match_failures, 0);
    let mut names = document.issuer_entry_names(MDL_NAMESPACE);
    names.sort();
    assert_eq!(names, vec!["age_over_21", "portrait"]);

    holder.reset().await;
    assert_eq!(holder.state(), PresentmentState::Idle);
    Ok(())
}

#[tokio::test]
async fn declined_consent_sends_termination_only() -> Result<()> {
    let (_, credential) = common::sample_credential()?;
    let source = SimplePresentmentSource {
        credentials: vec![credential],
        decline: true,
        ..Default::default()
    };
    let context = common::reader_context(common::canned_request("age_over_18")?)?;

    let factory = LoopbackTransportFactory::new();
    let mut holder = holder(&factory);
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
        let (engagement, mut transport) = common::connect_reader(&factory, &bytes).await?;
        let e_reader_key = EcPrivateKey::generate(engagement.e_sender_key.curve());
        let transcript =
            session_transcript_bytes(&bytes, &e_reader_key.public_key(), &Handover::Qr)?;
        let mut cipher = SessionCipher::new(
            Role::MdocReader,
            &e_reader_key,
            &engagement.e_sender_key,
            &transcript,
        )?;
        let request = generate_device_request(
            std::slice::from_ref(&context.request),
            &transcript,
            None,
            &[],
        )?;
        transport
            .send_message(&cipher.encrypt_message(&request, None)?)
            .await?;
        let reply = transport.wait_for_message().await?;
        let (data, status) = cipher.decrypt_message(&reply)?;
        assert!(data.is_none());
        Ok::<_, anyhow::Error>(status.context("no status")?)
    };
    let (presented, status) = tokio::join!(holder_side, reader_side);
    assert_eq!(presented?, PresentmentOutcome::Declined);
    assert_eq!(status?, Status::SessionTermination);
    assert_eq!(holder.state(), PresentmentState::Completed);
    Ok(())
}

#[tokio::test]
async fn undecryptable_request_reports_status_and_goes_idle() -> Result<()> {
    let (_, credential) = common::sample_credential()?;
    let source = SimplePresentmentSource {
        credentials: vec![credential],
        ..Default::default()
    };

    let factory = LoopbackTransportFactory::new();
    let mut holder = holder(&factory);
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
        let (engagement, mut transport) = common::connect_reader(&factory, &bytes).await?;
        let e_reader_key = EcPrivateKey::generate(engagement.e_sender_key.curve());
        // Keys derived from a transcript the holder will not compute.
        let transcript = session_transcript_bytes(
            b"not the engagement",
            &e_reader_key.public_key(),
            &Handover::Qr,
        )?;
        let mut cipher = SessionCipher::new(
            Role::MdocReader,
            &e_reader_key,
            &engagement.e_sender_key,
            &transcript,
        )?;
        transport
            .send_message(&cipher.encrypt_message(b"request", None)?)
            .await?;
        let reply = transport.wait_for_message().await?;
        let (data, status) = cipher.decrypt_message(&reply)?;
        assert!(data.is_none());
        Ok::<_, anyhow::Error>(status.context("no status")?)
    };
    let (presented, status) = tokio::join!(holder_side, reader_side);
    assert!(matches!(presented, Err(Error::DecryptionFailed)));
    assert_eq!(status?, Status::SessionEncryptionError);
    assert_eq!(holder.state(), PresentmentState::Idle);
    assert_eq!(factory.close_count(Role::Mdoc), 1);
    Ok(())
}
