//! Answering a reader's request over a connected [PresentmentMechanism].
use async_trait::async_trait;

use super::holder::{HolderPresentment, PresentmentMechanism, PresentmentState};
use crate::definitions::device_request::{self, DocRequest};
use crate::definitions::device_response::{DeviceAuth, DeviceResponseGenerator};
use crate::definitions::issuer_signed::IssuerSigned;
use crate::definitions::keys::{EcPrivateKey, EcPublicKey};
use crate::definitions::session::{self, Role, SessionCipher, Status};
use crate::error::{Error, Result};
use crate::issuance::mdoc::Mdoc;

/// An issued document together with the private half of its device key.
#[derive(Debug, Clone)]
pub struct Credential {
    pub mdoc: Mdoc,
    pub device_key: EcPrivateKey,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DeviceAuthMode {
    #[default]
    Signature,
    Mac,
}

/// Supplies credentials and user decisions to a presentment.
#[async_trait]
pub trait PresentmentSource: Send + Sync {
    /// Credentials that could answer a request for `doc_type`.
    fn credentials(&self, doc_type: &str) -> Vec<Credential>;

    /// Picks one of `candidates` for `request`, or `None` to send nothing for it.
    async fn select_document(
        &self,
        request: &DocRequest,
        candidates: &[Credential],
    ) -> Option<usize>;

    /// Whether the user agrees to share the requested elements of `credential`.
    async fn consent(&self, request: &DocRequest, credential: &Credential) -> bool;

    fn device_auth_mode(&self) -> DeviceAuthMode {
        DeviceAuthMode::Signature
    }
}

/// Selects the first matching credential and consents to every request.
#[derive(Debug, Clone, Default)]
pub struct SimplePresentmentSource {
    pub credentials: Vec<Credential>,
    pub device_auth_mode: DeviceAuthMode,
    pub decline: bool,
}

#[async_trait]
impl PresentmentSource for SimplePresentmentSource {
    fn credentials(&self, doc_type: &str) -> Vec<Credential> {
        self.credentials
            .iter()
            .filter(|c| c.mdoc.doc_type == doc_type)
            .cloned()
            .collect()
    }

    async fn select_document(&self, _: &DocRequest, candidates: &[Credential]) -> Option<usize> {
        (!candidates.is_empty()).then_some(0)
    }

    async fn consent(&self, _: &DocRequest, _: &Credential) -> bool {
        !self.decline
    }

    fn device_auth_mode(&self) -> DeviceAuthMode {
        self.device_auth_mode
    }
}

/// How a presentment ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentmentOutcome {
    /// A response with this many documents was sent.
    Responded { documents: usize },
    /// The user declined; only a termination status was sent.
    Declined,
}

impl HolderPresentment {
    /// Runs the request/response exchange on the bound connection.
    ///
    /// Requires [PresentmentState::WaitingForSource]. Ends in [PresentmentState::Completed]
    /// with the transport closed; on error the transport is released and the state is
    /// [PresentmentState::Idle].
    pub async fn present(&mut self, source: &dyn PresentmentSource) -> Result<PresentmentOutcome> {
        let state = self.state();
        if state != PresentmentState::WaitingForSource {
            return Err(Error::InvalidState(state.to_string()));
        }
        let message_timeout = self.config().message_timeout();
        let Some(mechanism) = self.mechanism_mut() else {
            return Err(Error::InvalidState(state.to_string()));
        };

        let establishment = match wait_for_message(mechanism, message_timeout).await {
            Ok(message) => message,
            Err(e) => return Err(self.fail(e).await),
        };
        let (e_reader_key, mut cipher, transcript) = match open_session(mechanism, &establishment)
        {
            Ok(session) => session,
            Err(e) => return Err(self.fail(e).await),
        };
        let request = match cipher.decrypt_message(&establishment) {
            Ok((Some(request), _)) => request,
            Ok((None, status)) => {
                let e = Error::ProtocolFailure(format!(
                    "session establishment without a request (status {status:?})"
                ));
                return Err(self.fail(e).await);
            }
            Err(e) => {
                send_status(mechanism, Status::SessionEncryptionError).await;
                return Err(self.fail(e.into()).await);
            }
        };
        self.set_state(PresentmentState::Processing);

        let doc_requests = match device_request::parse_device_request(&request, &transcript) {
            Ok(doc_requests) => doc_requests,
            Err(e) => {
                if let Some(mechanism) = self.mechanism_mut() {
                    send_status(mechanism, Status::CborDecodingError).await;
                }
                return Err(self.fail(e.into()).await);
            }
        };
        tracing::info!("reader requested {} documents", doc_requests.len());

        let mut selected = Vec::with_capacity(doc_requests.len());
        self.set_state(PresentmentState::WaitingForDocumentSelection);
        for doc_request in &doc_requests {
            if doc_request.reader_authenticated == Some(false) {
                tracing::warn!("reader authentication failed for {}", doc_request.items_request.doc_type);
            }
            let candidates = source.credentials(&doc_request.items_request.doc_type);
            match source.select_document(doc_request, &candidates).await {
                Some(index) if index < candidates.len() => {
                    selected.push((doc_request, candidates[index].clone()))
                }
                _ => tracing::info!(
                    "no document selected for {}",
                    doc_request.items_request.doc_type
                ),
            }
        }

        self.set_state(PresentmentState::WaitingForConsent);
        let mut consented = Vec::with_capacity(selected.len());
        for (doc_request, credential) in selected {
            if source.consent(doc_request, &credential).await {
                consented.push((doc_request, credential));
            }
        }

        let Some(mechanism) = self.mechanism_mut() else {
            return Err(Error::InvalidState(self.state().to_string()));
        };
        let outcome = if consented.is_empty() {
            tracing::info!("nothing to share, terminating");
            let result = mechanism
                .transport
                .send_message(&session::encode_status(Status::SessionTermination))
                .await;
            if let Err(e) = result {
                return Err(self.fail(e.into()).await);
            }
            PresentmentOutcome::Declined
        } else {
            let response = match build_response(
                &consented,
                &transcript,
                &e_reader_key,
                source.device_auth_mode(),
            ) {
                Ok(response) => response,
                Err(e) => return Err(self.fail(e).await),
            };
            let sent = match cipher.encrypt_message(&response, Some(Status::SessionTermination)) {
                Ok(message) => mechanism.transport.send_message(&message).await.map_err(Error::from),
                Err(e) => Err(e.into()),
            };
            if let Err(e) = sent {
                return Err(self.fail(e).await);
            }
            PresentmentOutcome::Responded {
                documents: consented.len(),
            }
        };

        if let Some(mut mechanism) = self.take_mechanism() {
            mechanism.transport.close().await;
        }
        self.set_state(PresentmentState::Completed);
        tracing::info!("presentment completed: {outcome:?}");
        Ok(outcome)
    }
}

async fn wait_for_message(
    mechanism: &mut PresentmentMechanism,
    timeout: std::time::Duration,
) -> Result<Vec<u8>> {
    let message = tokio::time::timeout(timeout, mechanism.transport.wait_for_message())
        .await
        .map_err(|_| Error::Timeout(timeout))??;
    if message.is_empty() {
        return Err(Error::ConnectionAborted);
    }
    Ok(message)
}

fn open_session(
    mechanism: &PresentmentMechanism,
    establishment: &[u8],
) -> Result<(EcPublicKey, SessionCipher, Vec<u8>)> {
    let (e_reader_key, e_reader_key_bytes) =
        session::reader_key_from_establishment(establishment)?;
    let transcript = session::session_transcript_from_key_bytes(
        &mechanism.engagement_bytes,
        &e_reader_key_bytes,
        &mechanism.handover,
    )?;
    let cipher = SessionCipher::new(
        Role::Mdoc,
        &mechanism.e_device_key,
        &e_reader_key,
        &transcript,
    )?;
    Ok((e_reader_key, cipher, transcript))
}

async fn send_status(mechanism: &mut PresentmentMechanism, status: Status) {
    if let Err(e) = mechanism
        .transport
        .send_message(&session::encode_status(status))
        .await
    {
        tracing::warn!("could not send status {status}: {e}");
    }
}

/// Keeps only the issuer signed elements the reader asked for.
fn disclose(issuer_signed: &IssuerSigned, doc_request: &DocRequest) -> IssuerSigned {
    let request = &doc_request.items_request;
    let namespaces = issuer_signed
        .namespaces
        .iter()
        .filter_map(|(namespace, items)| {
            let items: Vec<_> = items
                .iter()
                .filter(|i| request.requests(namespace, &i.item.element_identifier))
                .cloned()
                .collect();
            (!items.is_empty()).then(|| (namespace.clone(), items))
        })
        .collect();
    IssuerSigned {
        namespaces,
        issuer_auth: issuer_signed.issuer_auth.clone(),
    }
}

fn build_response(
    documents: &[(&DocRequest, Credential)],
    transcript: &[u8],
    e_reader_key: &EcPublicKey,
    mode: DeviceAuthMode,
) -> Result<Vec<u8>> {
    let mut generator = DeviceResponseGenerator::new(transcript);
    for (doc_request, credential) in documents {
        let auth = match mode {
            DeviceAuthMode::Signature => DeviceAuth::Signature,
            DeviceAuthMode::Mac => DeviceAuth::Mac { e_reader_key },
        };
        generator.add_document(
            &credential.mdoc.doc_type,
            &disclose(&credential.mdoc.issuer_signed, doc_request),
            &credential.device_key,
            auth,
        )?;
    }
    Ok(generator.generate()?)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::definitions::device_request::ItemsRequest;
    use crate::document_type::{MDL_DOCTYPE, MDL_NAMESPACE};
    use crate::issuance::sample::SampleIssuer;
    use crate::definitions::keys::EcCurve;

    fn request(elements: &[&str]) -> DocRequest {
        DocRequest {
            items_request: ItemsRequest {
                doc_type: MDL_DOCTYPE.into(),
                namespaces: vec![(
                    MDL_NAMESPACE.into(),
                    elements.iter().map(|e| (e.to_string(), false)).collect(),
                )],
            },
            reader_authenticated: None,
            reader_certificate_chain: vec![],
        }
    }

    #[test]
    fn discloses_only_requested_elements() {
        let now = time::OffsetDateTime::now_utc();
        let issuer = SampleIssuer::generate(now).unwrap();
        let device_key = EcPrivateKey::generate(EcCurve::P256);
        let mdoc = issuer.issue_mdl(&device_key.public_key(), now).unwrap();

        let disclosed = disclose(&mdoc.issuer_signed, &request(&["family_name", "age_over_21"]));
        assert_eq!(disclosed.namespaces.len(), 1);
        let names: Vec<_> = disclosed.namespaces[0]
            .1
            .iter()
            .map(|i| i.item.element_identifier.as_str())
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"family_name"));
        assert!(names.contains(&"age_over_21"));
        assert_eq!(disclosed.issuer_auth, mdoc.issuer_signed.issuer_auth);

        assert!(disclose(&mdoc.issuer_signed, &request(&["no_such_element"]))
            .namespaces
            .is_empty());
    }

    #[tokio::test]
    async fn simple_source_selects_matching_doc_type() {
        let now = time::OffsetDateTime::now_utc();
        let issuer = SampleIssuer::generate(now).unwrap();
        let device_key = EcPrivateKey::generate(EcCurve::P256);
        let mdoc = issuer.issue_mdl(&device_key.public_key(), now).unwrap();
        let source = SimplePresentmentSource {
            credentials: vec![Credential { mdoc, device_key }],
            ..Default::default()
        };

        assert!(source.credentials("org.example.other").is_empty());
        let candidates = source.credentials(MDL_DOCTYPE);
        assert_eq!(source.select_document(&request(&[]), &candidates).await, Some(0));
        assert!(source.consent(&request(&[]), &candidates[0]).await);
    }
}
