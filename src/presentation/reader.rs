//! The reader side of a proximity presentment: one request per scanned engagement.
use std::time::Duration;

use crate::definitions::device_engagement::{self, Engagement};
use crate::definitions::device_request::{self, ItemsRequest};
use crate::definitions::keys::EcPrivateKey;
use crate::definitions::session::{self, Handover, Role, SessionCipher, Status};
use crate::error::{Error, Result};
use crate::transport::{Transport, TransportFactory, TransportOptions};
use crate::x509::Certificate;

/// What a reader needs to run a session.
#[derive(Debug, Clone)]
pub struct ReaderContext {
    /// Signs `ReaderAuthentication`.
    pub reader_key: EcPrivateKey,
    pub reader_certificate: Certificate,
    pub reader_root_certificate: Certificate,
    pub request: ItemsRequest,
    pub transport_options: TransportOptions,
    pub connection_timeout: Duration,
    pub message_timeout: Duration,
}

/// Decodes a scanned `mdoc:` URI into engagement bytes.
pub fn parse_scan_payload(payload: &str) -> Result<Vec<u8>> {
    Ok(device_engagement::from_qr_code_uri(payload)?)
}

/// Which side ended the session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Termination {
    /// The holder sent a termination status, possibly along with the response.
    HolderStatus,
    /// The holder went away without a status.
    HolderClosed,
    /// The reader sent the termination status after receiving the response.
    ReaderStatus,
}

#[derive(Debug)]
pub struct ReaderSessionResult {
    /// Decrypted `DeviceResponse`, absent if the holder ended the session without one.
    pub device_response: Option<Vec<u8>>,
    pub session_transcript: Vec<u8>,
    /// Needed to check a MAC authenticated response.
    pub e_reader_key: EcPrivateKey,
    pub termination: Termination,
}

#[derive(Debug)]
pub enum ReaderOutcome {
    Completed(ReaderSessionResult),
    /// None of the holder's connection methods can be used here; nothing was attempted.
    NoUsableTransport,
}

enum ReplyState {
    AwaitingReply,
    Done(Option<Vec<u8>>, Termination),
}

/// Runs a complete reader session against the holder that showed `scan_payload`.
///
/// The transport, once created, is closed exactly once whatever the outcome.
pub async fn run_reader_flow(
    scan_payload: &str,
    context: &ReaderContext,
    factory: &dyn TransportFactory,
) -> Result<ReaderOutcome> {
    let engagement_bytes = parse_scan_payload(scan_payload)?;
    let engagement = Engagement::parse(&engagement_bytes)?;
    tracing::debug!(
        "engagement version {} with {} connection methods",
        engagement.version,
        engagement.connection_methods.len()
    );

    let e_reader_key = EcPrivateKey::generate(engagement.e_sender_key.curve());
    let Some(method) =
        device_engagement::disambiguate(&engagement.connection_methods, Role::MdocReader)
            .into_iter()
            .find(|m| factory.supports(m))
    else {
        tracing::info!("no usable connection method offered");
        return Ok(ReaderOutcome::NoUsableTransport);
    };

    tracing::info!("connecting via {method}");
    let mut transport =
        factory.create_transport(&method, Role::MdocReader, &context.transport_options)?;
    let result = exchange(
        transport.as_mut(),
        context,
        &engagement,
        &engagement_bytes,
        &e_reader_key,
    )
    .await;
    transport.close().await;

    let (device_response, session_transcript, termination) = result?;
    Ok(ReaderOutcome::Completed(ReaderSessionResult {
        device_response,
        session_transcript,
        e_reader_key,
        termination,
    }))
}

async fn exchange(
    transport: &mut dyn Transport,
    context: &ReaderContext,
    engagement: &Engagement,
    engagement_bytes: &[u8],
    e_reader_key: &EcPrivateKey,
) -> Result<(Option<Vec<u8>>, Vec<u8>, Termination)> {
    let transcript = session::session_transcript_bytes(
        engagement_bytes,
        &e_reader_key.public_key(),
        &Handover::Qr,
    )?;
    let mut cipher = SessionCipher::new(
        Role::MdocReader,
        e_reader_key,
        &engagement.e_sender_key,
        &transcript,
    )?;
    let request = device_request::generate_device_request(
        std::slice::from_ref(&context.request),
        &transcript,
        Some(&context.reader_key),
        &[
            context.reader_certificate.clone(),
            context.reader_root_certificate.clone(),
        ],
    )?;

    tokio::time::timeout(
        context.connection_timeout,
        transport.open(&engagement.e_sender_key),
    )
    .await
    .map_err(|_| Error::Timeout(context.connection_timeout))??;
    transport
        .send_message(&cipher.encrypt_message(&request, None)?)
        .await?;
    tracing::info!("sent request for {}", context.request.doc_type);

    let mut state = ReplyState::AwaitingReply;
    let (response, termination) = loop {
        match state {
            ReplyState::Done(response, termination) => break (response, termination),
            ReplyState::AwaitingReply => {
                state = await_reply(transport, &mut cipher, context.message_timeout).await?;
            }
        }
    };
    Ok((response, transcript, termination))
}

async fn await_reply(
    transport: &mut dyn Transport,
    cipher: &mut SessionCipher,
    timeout: Duration,
) -> Result<ReplyState> {
    let message = tokio::time::timeout(timeout, transport.wait_for_message())
        .await
        .map_err(|_| Error::Timeout(timeout))??;
    if message.is_empty() {
        tracing::info!("holder closed the connection");
        return Ok(ReplyState::Done(None, Termination::HolderClosed));
    }
    match cipher.decrypt_message(&message)? {
        (data, Some(Status::SessionTermination)) => {
            tracing::info!("holder terminated the session");
            Ok(ReplyState::Done(data, Termination::HolderStatus))
        }
        (None, Some(status)) => Err(Error::ProtocolFailure(format!(
            "holder sent status {status}"
        ))),
        (data, status) => {
            if let Some(status) = status {
                tracing::warn!("ignoring status {status} sent with the response");
            }
            match transport
                .send_message(&session::encode_status(Status::SessionTermination))
                .await
            {
                Ok(()) => {}
                Err(crate::transport::Error::PeerClosed) => {
                    tracing::warn!("holder left before the termination status")
                }
                Err(e) => return Err(e.into()),
            }
            Ok(ReplyState::Done(data, Termination::ReaderStatus))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn scan_payload_must_be_an_mdoc_uri() {
        assert!(matches!(
            parse_scan_payload("https://example.com"),
            Err(Error::InvalidScanPayload)
        ));
        assert!(matches!(
            parse_scan_payload("mdoc:***"),
            Err(Error::MalformedEngagement(_))
        ));
    }
}
