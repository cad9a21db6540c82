//! The holder side of a proximity presentment.
//!
//! [HolderPresentment] advertises the configured connection methods, publishes the device
//! engagement for QR display and binds the first reader connection into a
//! [PresentmentMechanism]. The document exchange itself is driven by
//! [HolderPresentment::present](super::presentment).
use std::sync::Arc;

use tokio::sync::watch;

use crate::config::HolderConfig;
use crate::definitions::device_engagement::{self, ENGAGEMENT_VERSION_1_0};
use crate::definitions::keys::EcPrivateKey;
use crate::definitions::session::{Handover, Role};
use crate::error::{Error, Result};
use crate::transport::{self, Transport, TransportFactory};

#[derive(Clone, Copy, Debug, PartialEq, Eq, strum_macros::Display)]
pub enum PresentmentState {
    Idle,
    Connecting,
    WaitingForSource,
    Processing,
    WaitingForDocumentSelection,
    WaitingForConsent,
    Completed,
}

/// Everything bound to one reader connection.
pub struct PresentmentMechanism {
    pub transport: Box<dyn Transport>,
    pub e_device_key: EcPrivateKey,
    pub engagement_bytes: Vec<u8>,
    pub handover: Handover,
}

impl std::fmt::Debug for PresentmentMechanism {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresentmentMechanism")
            .field("connection_method", self.transport.connection_method())
            .field("engagement_bytes", &hex::encode(&self.engagement_bytes))
            .field("handover", &self.handover)
            .finish_non_exhaustive()
    }
}

pub struct HolderPresentment {
    factory: Arc<dyn TransportFactory>,
    config: HolderConfig,
    state: watch::Sender<PresentmentState>,
    engagement: watch::Sender<Option<Vec<u8>>>,
    mechanism: Option<PresentmentMechanism>,
}

impl HolderPresentment {
    pub fn new(factory: Arc<dyn TransportFactory>, config: HolderConfig) -> Self {
        let (state, _) = watch::channel(PresentmentState::Idle);
        let (engagement, _) = watch::channel(None);
        Self {
            factory,
            config,
            state,
            engagement,
            mechanism: None,
        }
    }

    pub fn state(&self) -> PresentmentState {
        *self.state.borrow()
    }

    pub fn config(&self) -> &HolderConfig {
        &self.config
    }

    pub fn subscribe_state(&self) -> watch::Receiver<PresentmentState> {
        self.state.subscribe()
    }

    /// Engagement bytes to render as a QR code while connecting, `None` otherwise.
    pub fn subscribe_engagement(&self) -> watch::Receiver<Option<Vec<u8>>> {
        self.engagement.subscribe()
    }

    pub fn mechanism(&self) -> Option<&PresentmentMechanism> {
        self.mechanism.as_ref()
    }

    /// Returns to [PresentmentState::Idle] from any state, closing the transport if one is bound.
    pub async fn reset(&mut self) {
        if let Some(mut mechanism) = self.mechanism.take() {
            mechanism.transport.close().await;
        }
        self.engagement.send_replace(None);
        self.set_state(PresentmentState::Idle);
    }

    /// Advertises, publishes the engagement and waits for a reader to connect.
    ///
    /// Only allowed from [PresentmentState::Idle]; in any other state this fails with
    /// [Error::InvalidState] and nothing changes. On failure, or when the returned future is
    /// dropped before a reader connects, the presentment is back in [PresentmentState::Idle]
    /// with no engagement published.
    pub async fn set_connecting(&mut self) -> Result<()> {
        let state = self.state();
        if state != PresentmentState::Idle {
            return Err(Error::InvalidState(state.to_string()));
        }
        self.set_state(PresentmentState::Connecting);

        let guard = ConnectingGuard {
            state: &self.state,
            engagement: &self.engagement,
        };
        let connected = self.connect().await;
        guard.disarm();

        match connected {
            Ok(mechanism) => {
                tracing::info!("reader connected: {mechanism:?}");
                self.mechanism = Some(mechanism);
                self.engagement.send_replace(None);
                self.set_state(PresentmentState::WaitingForSource);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("connecting failed: {e}");
                self.engagement.send_replace(None);
                self.set_state(PresentmentState::Idle);
                Err(e)
            }
        }
    }

    async fn connect(&self) -> Result<PresentmentMechanism> {
        let e_device_key = EcPrivateKey::generate(self.config.curve);
        let advertised = transport::advertise(
            self.factory.as_ref(),
            &self.config.connection_methods,
            Role::Mdoc,
            &self.config.transport_options,
        )
        .map_err(|e| match e {
            transport::Error::Unsupported(_) => Error::NoUsableTransport,
            other => other.into(),
        })?;

        let methods: Vec<_> = advertised
            .iter()
            .map(|a| a.connection_method().clone())
            .collect();
        let engagement_bytes = device_engagement::generate(
            &e_device_key.public_key(),
            &methods,
            ENGAGEMENT_VERSION_1_0,
        )?;
        tracing::debug!("publishing engagement for {} methods", methods.len());
        self.engagement.send_replace(Some(engagement_bytes.clone()));

        let transport = transport::wait_for_connection(
            advertised,
            &e_device_key.public_key(),
            Some(self.config.connection_timeout()),
        )
        .await?;

        Ok(PresentmentMechanism {
            transport,
            e_device_key,
            engagement_bytes,
            handover: Handover::Qr,
        })
    }

    pub(crate) fn set_state(&self, state: PresentmentState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::debug!("presentment state {previous} -> {state}");
        }
    }

    pub(crate) fn mechanism_mut(&mut self) -> Option<&mut PresentmentMechanism> {
        self.mechanism.as_mut()
    }

    pub(crate) fn take_mechanism(&mut self) -> Option<PresentmentMechanism> {
        self.mechanism.take()
    }

    /// Releases the connection after an unrecoverable error and goes back to idle.
    pub(crate) async fn fail(&mut self, error: Error) -> Error {
        tracing::warn!("presentment failed in state {}: {error}", self.state());
        self.reset().await;
        error
    }
}

/// Puts a cancelled connection attempt back to idle.
struct ConnectingGuard<'a> {
    state: &'a watch::Sender<PresentmentState>,
    engagement: &'a watch::Sender<Option<Vec<u8>>>,
}

impl ConnectingGuard<'_> {
    fn disarm(self) {
        std::mem::forget(self);
    }
}

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        tracing::debug!("connecting cancelled");
        self.engagement.send_replace(None);
        self.state.send_replace(PresentmentState::Idle);
    }
}
