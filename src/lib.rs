//! ISO/IEC 18013-5 proximity presentment for mdoc holders and readers.
//!
//! A holder advertises one or more connection methods and shows its device engagement as an
//! `mdoc:` QR code. A reader scans it, connects, and exchanges encrypted session messages:
//! one `DeviceRequest`, one `DeviceResponse`, then a termination status.
//!
//! The main entry points are:
//! - [presentation::HolderPresentment]: the holder state machine, from advertising to a
//!   completed presentment driven by a [presentation::PresentmentSource]
//! - [presentation::run_reader_flow]: a single-shot reader session for a scanned payload
//! - [definitions::DeviceResponseParser] and [presentation::render_document]: checking a
//!   received response and turning it into display text
//!
//! Transports are pluggable through [transport::TransportFactory]; the in-memory
//! [transport::loopback] factory connects a holder and a reader in one process.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use mdoc_proximity::config::Config;
//! use mdoc_proximity::presentation::HolderPresentment;
//! use mdoc_proximity::transport::loopback::LoopbackTransportFactory;
//!
//! # async fn run() -> Result<(), mdoc_proximity::Error> {
//! let factory = Arc::new(LoopbackTransportFactory::new());
//! let mut holder = HolderPresentment::new(factory, Config::default().holder);
//! let mut engagement = holder.subscribe_engagement();
//! tokio::spawn(async move {
//!     while engagement.changed().await.is_ok() {
//!         if let Some(bytes) = engagement.borrow().as_deref() {
//!             println!("{}", mdoc_proximity::definitions::device_engagement::to_qr_code_uri(bytes));
//!         }
//!     }
//! });
//! holder.set_connecting().await?;
//! # Ok(())
//! # }
//! ```
pub mod cbor;
pub mod config;
pub mod cose;
pub mod definitions;
pub mod document_type;
pub mod error;
pub mod issuance;
pub mod presentation;
pub mod reader_credentials;
pub mod transport;
pub mod x509;

pub use error::{Error, Result};
