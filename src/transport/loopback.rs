//! In-memory transports connecting a holder and a reader in the same process.
//!
//! Advertisements register under a rendezvous key: the BLE service UUID, or the transport type
//! for NFC and Wi-Fi Aware. Opening a reader transport takes the matching registration and
//! hands the holder a pair of unbounded channels. Dropping or closing either end makes the
//! other end's next wait return an empty message.
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use super::{AdvertisedTransport, Error, Role, Transport, TransportFactory, TransportOptions};
use crate::definitions::device_engagement::ConnectionMethod;
use crate::definitions::keys::EcPublicKey;

struct Endpoint {
    outgoing: mpsc::UnboundedSender<Vec<u8>>,
    incoming: mpsc::UnboundedReceiver<Vec<u8>>,
}

fn endpoint_pair() -> (Endpoint, Endpoint) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    (
        Endpoint {
            outgoing: a_tx,
            incoming: b_rx,
        },
        Endpoint {
            outgoing: b_tx,
            incoming: a_rx,
        },
    )
}

type Registry = Arc<Mutex<HashMap<String, oneshot::Sender<Endpoint>>>>;

#[derive(Default)]
struct CloseCounters {
    holder: AtomicUsize,
    reader: AtomicUsize,
}

impl CloseCounters {
    fn for_role(&self, role: Role) -> &AtomicUsize {
        match role {
            Role::Mdoc => &self.holder,
            Role::MdocReader => &self.reader,
        }
    }
}

/// Connects transports created by clones of the same factory.
#[derive(Clone, Default)]
pub struct LoopbackTransportFactory {
    registry: Registry,
    closes: Arc<CloseCounters>,
}

impl LoopbackTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times `close()` was called on transports playing `role`.
    pub fn close_count(&self, role: Role) -> usize {
        self.closes.for_role(role).load(Ordering::SeqCst)
    }

    /// Number of advertisements still waiting for a reader.
    pub fn pending_advertisements(&self) -> usize {
        self.registry.lock().map(|r| r.len()).unwrap_or_default()
    }

    /// Withdraws every pending advertisement; their waits fail with
    /// [`Error::ConnectionAborted`].
    pub fn cancel_advertisements(&self) {
        if let Ok(mut registry) = self.registry.lock() {
            registry.clear();
        }
    }
}

fn rendezvous_key(method: &ConnectionMethod) -> Option<String> {
    match method {
        ConnectionMethod::Ble(options) => options
            .central_client_mode_uuid
            .or(options.peripheral_server_mode_uuid)
            .map(|uuid| format!("ble:{uuid}")),
        ConnectionMethod::Nfc(_) => Some("nfc".into()),
        ConnectionMethod::Wifi(_) => Some("wifi-aware".into()),
    }
}

impl TransportFactory for LoopbackTransportFactory {
    fn supports(&self, method: &ConnectionMethod) -> bool {
        match method {
            ConnectionMethod::Ble(options) => {
                options.supports_central_client_mode || options.supports_peripheral_server_mode
            }
            _ => true,
        }
    }

    fn create_transport(
        &self,
        method: &ConnectionMethod,
        role: Role,
        _options: &TransportOptions,
    ) -> Result<Box<dyn Transport>, Error> {
        let key = rendezvous_key(method).ok_or_else(|| Error::Unsupported(method.to_string()))?;
        Ok(Box::new(LoopbackTransport {
            method: method.clone(),
            role,
            state: State::Prepared(key),
            registry: self.registry.clone(),
            closes: self.closes.clone(),
        }))
    }

    fn advertise_transport(
        &self,
        method: &ConnectionMethod,
        role: Role,
        _options: &TransportOptions,
    ) -> Result<Box<dyn AdvertisedTransport>, Error> {
        let key = rendezvous_key(method).ok_or_else(|| Error::Unsupported(method.to_string()))?;
        let (sender, receiver) = oneshot::channel();
        self.registry
            .lock()
            .map_err(|_| Error::Other("loopback registry poisoned".into()))?
            .insert(key, sender);
        Ok(Box::new(LoopbackAdvertisement {
            method: method.clone(),
            role,
            receiver,
            registry: self.registry.clone(),
            closes: self.closes.clone(),
        }))
    }
}

struct LoopbackAdvertisement {
    method: ConnectionMethod,
    role: Role,
    receiver: oneshot::Receiver<Endpoint>,
    registry: Registry,
    closes: Arc<CloseCounters>,
}

impl Drop for LoopbackAdvertisement {
    fn drop(&mut self) {
        // Withdraw the registration unless a reader already took it.
        self.receiver.close();
        if let Ok(mut registry) = self.registry.lock() {
            registry.retain(|_, listener| !listener.is_closed());
        }
    }
}

#[async_trait]
impl AdvertisedTransport for LoopbackAdvertisement {
    fn connection_method(&self) -> &ConnectionMethod {
        &self.method
    }

    async fn wait_for_connection(
        self: Box<Self>,
        _own_key: EcPublicKey,
    ) -> Result<Box<dyn Transport>, Error> {
        let mut this = self;
        let endpoint = (&mut this.receiver)
            .await
            .map_err(|_| Error::ConnectionAborted)?;
        Ok(Box::new(LoopbackTransport {
            method: this.method.clone(),
            role: this.role,
            state: State::Open(endpoint),
            registry: Registry::default(),
            closes: this.closes.clone(),
        }))
    }
}

enum State {
    Prepared(String),
    Open(Endpoint),
    Closed,
}

struct LoopbackTransport {
    method: ConnectionMethod,
    role: Role,
    state: State,
    registry: Registry,
    closes: Arc<CloseCounters>,
}

#[async_trait]
impl Transport for LoopbackTransport {
    fn connection_method(&self) -> &ConnectionMethod {
        &self.method
    }

    fn role(&self) -> Role {
        self.role
    }

    async fn open(&mut self, _peer_key: &EcPublicKey) -> Result<(), Error> {
        let key = match &self.state {
            State::Prepared(key) => key.clone(),
            State::Open(_) => return Ok(()),
            State::Closed => return Err(Error::Closed),
        };
        let listener = self
            .registry
            .lock()
            .map_err(|_| Error::Other("loopback registry poisoned".into()))?
            .remove(&key)
            .ok_or_else(|| Error::Unreachable(self.method.to_string()))?;
        let (ours, theirs) = endpoint_pair();
        listener
            .send(theirs)
            .map_err(|_| Error::Unreachable(self.method.to_string()))?;
        tracing::debug!("loopback {} connected via {}", self.role, self.method);
        self.state = State::Open(ours);
        Ok(())
    }

    async fn send_message(&mut self, message: &[u8]) -> Result<(), Error> {
        match &self.state {
            State::Open(endpoint) => endpoint
                .outgoing
                .send(message.to_vec())
                .map_err(|_| Error::PeerClosed),
            State::Prepared(_) => Err(Error::NotOpen),
            State::Closed => Err(Error::Closed),
        }
    }

    async fn wait_for_message(&mut self) -> Result<Vec<u8>, Error> {
        match &mut self.state {
            State::Open(endpoint) => Ok(endpoint.incoming.recv().await.unwrap_or_default()),
            State::Prepared(_) => Err(Error::NotOpen),
            State::Closed => Err(Error::Closed),
        }
    }

    async fn close(&mut self) {
        self.closes.for_role(self.role).fetch_add(1, Ordering::SeqCst);
        if !matches!(self.state, State::Closed) {
            tracing::debug!("closing loopback {} transport", self.role);
        }
        self.state = State::Closed;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::definitions::device_engagement::{BleOptions, NfcOptions};
    use crate::definitions::keys::{EcCurve, EcPrivateKey};
    use crate::transport::{advertise, wait_for_connection};
    use std::time::Duration;

    fn ble() -> ConnectionMethod {
        ConnectionMethod::Ble(BleOptions {
            supports_central_client_mode: true,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn reader_connects_to_advertised_holder() {
        let factory = LoopbackTransportFactory::new();
        let holder_key = EcPrivateKey::generate(EcCurve::P256).public_key();
        let options = TransportOptions::default();

        let advertised = advertise(&factory, &[ble()], Role::Mdoc, &options).unwrap();
        let method = advertised[0].connection_method().clone();
        let holder = tokio::spawn({
            let key = holder_key.clone();
            async move { wait_for_connection(advertised, &key, None).await }
        });

        let mut reader = factory
            .create_transport(&method, Role::MdocReader, &options)
            .unwrap();
        reader.open(&holder_key).await.unwrap();
        let mut holder = holder.await.unwrap().unwrap();

        reader.send_message(b"request").await.unwrap();
        assert_eq!(holder.wait_for_message().await.unwrap(), b"request");
        holder.send_message(b"response").await.unwrap();
        holder.close().await;
        holder.close().await;

        assert_eq!(reader.wait_for_message().await.unwrap(), b"response");
        assert!(reader.wait_for_message().await.unwrap().is_empty());
        assert!(matches!(
            reader.send_message(b"late").await,
            Err(Error::PeerClosed)
        ));
        assert_eq!(factory.close_count(Role::Mdoc), 2);
        assert_eq!(factory.close_count(Role::MdocReader), 0);
    }

    #[tokio::test]
    async fn cancelled_advertisements_abort() {
        let factory = LoopbackTransportFactory::new();
        let key = EcPrivateKey::generate(EcCurve::P256).public_key();
        let methods = [
            ble(),
            ConnectionMethod::Nfc(NfcOptions {
                max_command_data_length: 255,
                max_response_data_length: 256,
            }),
        ];
        let advertised = advertise(&factory, &methods, Role::Mdoc, &Default::default()).unwrap();
        assert_eq!(factory.pending_advertisements(), 2);
        factory.cancel_advertisements();
        let result = wait_for_connection(advertised, &key, None).await;
        assert!(matches!(result, Err(Error::ConnectionAborted)));
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_for_a_reader_times_out() {
        let factory = LoopbackTransportFactory::new();
        let key = EcPrivateKey::generate(EcCurve::P256).public_key();
        let advertised = advertise(&factory, &[ble()], Role::Mdoc, &Default::default()).unwrap();
        let result = wait_for_connection(advertised, &key, Some(Duration::from_secs(60))).await;
        assert!(matches!(result, Err(Error::Timeout(_))));
        while factory.pending_advertisements() > 0 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn dropped_advertisements_are_withdrawn() {
        let factory = LoopbackTransportFactory::new();
        let options = TransportOptions::default();
        let advertised = advertise(&factory, &[ble()], Role::Mdoc, &options).unwrap();
        let method = advertised[0].connection_method().clone();
        assert_eq!(factory.pending_advertisements(), 1);
        drop(advertised);
        assert_eq!(factory.pending_advertisements(), 0);

        let mut reader = factory
            .create_transport(&method, Role::MdocReader, &options)
            .unwrap();
        let key = EcPrivateKey::generate(EcCurve::P256).public_key();
        assert!(matches!(
            reader.open(&key).await,
            Err(Error::Unreachable(_))
        ));
    }

    #[tokio::test]
    async fn opening_without_a_listener_fails() {
        let factory = LoopbackTransportFactory::new();
        let key = EcPrivateKey::generate(EcCurve::P256).public_key();
        let mut reader = factory
            .create_transport(
                &ConnectionMethod::Ble(BleOptions {
                    supports_central_client_mode: true,
                    central_client_mode_uuid: Some(uuid::Uuid::new_v4()),
                    ..Default::default()
                }),
                Role::MdocReader,
                &Default::default(),
            )
            .unwrap();
        assert!(matches!(
            reader.open(&key).await,
            Err(Error::Unreachable(_))
        ));
        assert!(matches!(reader.wait_for_message().await, Err(Error::NotOpen)));
    }
}
