//! Transports carrying session messages between holder and reader.
//!
//! This module provides:
//! - [`Transport`]: a connected (or connectable) half-duplex message channel
//! - [`AdvertisedTransport`]: the holder's side of a connection method, waiting for a reader
//! - [`TransportFactory`]: creates both for the connection methods it supports
//! - [`loopback`]: an in-memory factory used by the CLI simulation and the tests
//!
//! BLE GATT and NFC internals live behind these traits and are not provided here.
pub mod loopback;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use uuid::Uuid;

pub use crate::definitions::session::Role;
use crate::definitions::device_engagement::{BleOptions, ConnectionMethod};
use crate::definitions::keys::EcPublicKey;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransportOptions {
    /// Prefer an L2CAP channel over GATT characteristics when both ends support it.
    pub ble_use_l2cap: bool,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("connection aborted")]
    ConnectionAborted,
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport is closed")]
    Closed,
    #[error("peer has gone away")]
    PeerClosed,
    #[error("transport is not open")]
    NotOpen,
    #[error("no peer is reachable via {0}")]
    Unreachable(String),
    #[error("unsupported connection method {0}")]
    Unsupported(String),
    #[error("transport failure: {0}")]
    Other(String),
}

/// A half-duplex message channel for one session.
///
/// An empty message from [`Transport::wait_for_message`] means the peer went away without
/// sending a status; it is not an error.
#[async_trait]
pub trait Transport: Send {
    fn connection_method(&self) -> &ConnectionMethod;

    fn role(&self) -> Role;

    /// Connects to the peer identified by its ephemeral key. A no-op on a transport that
    /// was handed out already connected.
    async fn open(&mut self, peer_key: &EcPublicKey) -> Result<(), Error>;

    async fn send_message(&mut self, message: &[u8]) -> Result<(), Error>;

    async fn wait_for_message(&mut self) -> Result<Vec<u8>, Error>;

    /// Releases the channel. Calling it more than once has no further effect.
    async fn close(&mut self);
}

/// A connection method the holder is listening on.
#[async_trait]
pub trait AdvertisedTransport: Send {
    fn connection_method(&self) -> &ConnectionMethod;

    /// Suspends until a reader connects, consuming the advertisement.
    async fn wait_for_connection(
        self: Box<Self>,
        own_key: EcPublicKey,
    ) -> Result<Box<dyn Transport>, Error>;
}

pub trait TransportFactory: Send + Sync {
    fn supports(&self, method: &ConnectionMethod) -> bool;

    /// Prepares, without opening, a transport to a holder advertising `method`.
    fn create_transport(
        &self,
        method: &ConnectionMethod,
        role: Role,
        options: &TransportOptions,
    ) -> Result<Box<dyn Transport>, Error>;

    /// Starts listening on `method`. Returns without waiting for a peer.
    fn advertise_transport(
        &self,
        method: &ConnectionMethod,
        role: Role,
        options: &TransportOptions,
    ) -> Result<Box<dyn AdvertisedTransport>, Error>;
}

/// Starts listening on every supported method.
///
/// BLE methods without a service UUID for an offered mode get a random one, so the returned
/// advertisements describe exactly what goes into the engagement.
pub fn advertise(
    factory: &dyn TransportFactory,
    methods: &[ConnectionMethod],
    role: Role,
    options: &TransportOptions,
) -> Result<Vec<Box<dyn AdvertisedTransport>>, Error> {
    let mut advertised = Vec::with_capacity(methods.len());
    for method in methods {
        let method = with_service_uuids(method);
        if !factory.supports(&method) {
            tracing::warn!("not advertising unsupported connection method {method}");
            continue;
        }
        tracing::debug!(l2cap = options.ble_use_l2cap, "advertising {method}");
        advertised.push(factory.advertise_transport(&method, role, options)?);
    }
    if advertised.is_empty() {
        return Err(Error::Unsupported(
            "none of the configured connection methods".into(),
        ));
    }
    Ok(advertised)
}

/// Fills in a random service UUID for every BLE mode offered without one.
pub fn with_service_uuids(method: &ConnectionMethod) -> ConnectionMethod {
    match method {
        ConnectionMethod::Ble(options) => ConnectionMethod::Ble(BleOptions {
            central_client_mode_uuid: options
                .supports_central_client_mode
                .then(|| options.central_client_mode_uuid.unwrap_or_else(Uuid::new_v4)),
            peripheral_server_mode_uuid: options
                .supports_peripheral_server_mode
                .then(|| options.peripheral_server_mode_uuid.unwrap_or_else(Uuid::new_v4)),
            ..options.clone()
        }),
        other => other.clone(),
    }
}

/// Waits until the first advertisement is connected and drops the others.
///
/// Fails with [`Error::ConnectionAborted`] when every advertisement is cancelled before a
/// peer connects, and with [`Error::Timeout`] once `timeout` has passed.
pub async fn wait_for_connection(
    advertised: Vec<Box<dyn AdvertisedTransport>>,
    own_key: &EcPublicKey,
    timeout: Option<Duration>,
) -> Result<Box<dyn Transport>, Error> {
    let mut pending = JoinSet::new();
    for advertisement in advertised {
        let key = own_key.clone();
        pending.spawn(async move { advertisement.wait_for_connection(key).await });
    }

    let first_connected = async {
        while let Some(joined) = pending.join_next().await {
            match joined {
                Ok(Ok(transport)) => return Ok(transport),
                Ok(Err(e)) => tracing::debug!("advertisement ended without a connection: {e}"),
                Err(e) => tracing::warn!("advertisement task failed: {e}"),
            }
        }
        Err(Error::ConnectionAborted)
    };

    let result = match timeout {
        Some(timeout) => tokio::time::timeout(timeout, first_connected)
            .await
            .unwrap_or(Err(Error::Timeout(timeout))),
        None => first_connected.await,
    };
    pending.abort_all();
    if let Ok(transport) = &result {
        tracing::info!("connected via {}", transport.connection_method());
    }
    result
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ble_methods_get_uuids_for_offered_modes() {
        let method = with_service_uuids(&ConnectionMethod::Ble(BleOptions {
            supports_central_client_mode: true,
            ..Default::default()
        }));
        let ConnectionMethod::Ble(options) = method else {
            panic!("expected BLE");
        };
        assert!(options.central_client_mode_uuid.is_some());
        assert!(options.peripheral_server_mode_uuid.is_none());

        let fixed = Uuid::new_v4();
        let method = with_service_uuids(&ConnectionMethod::Ble(BleOptions {
            supports_peripheral_server_mode: true,
            peripheral_server_mode_uuid: Some(fixed),
            ..Default::default()
        }));
        let ConnectionMethod::Ble(options) = method else {
            panic!("expected BLE");
        };
        assert_eq!(options.peripheral_server_mode_uuid, Some(fixed));
    }
}
