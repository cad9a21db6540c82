//! Configuration of the holder and reader flows, loadable from JSON.
//!
//! Every field has a default, so a partial file (or none) is enough.
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::definitions::device_engagement::{BleOptions, ConnectionMethod};
use crate::definitions::keys::EcCurve;
use crate::transport::TransportOptions;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    pub holder: HolderConfig,
    pub reader: ReaderConfig,
}

impl Config {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("invalid configuration")
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("could not read {}", path.display()))?;
        Self::from_json(&json)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HolderConfig {
    /// Methods advertised in the engagement, in order of preference.
    pub connection_methods: Vec<ConnectionMethod>,
    pub transport_options: TransportOptions,
    /// Curve of the ephemeral device key.
    pub curve: EcCurve,
    /// Seconds to wait for a reader to connect.
    pub connection_timeout: u64,
    /// Seconds to wait for the reader's request.
    pub message_timeout: u64,
}

impl Default for HolderConfig {
    fn default() -> Self {
        Self {
            connection_methods: vec![ConnectionMethod::Ble(BleOptions {
                supports_peripheral_server_mode: false,
                supports_central_client_mode: true,
                ..Default::default()
            })],
            transport_options: TransportOptions {
                ble_use_l2cap: true,
            },
            curve: EcCurve::P256,
            connection_timeout: 60,
            message_timeout: 30,
        }
    }
}

impl HolderConfig {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout)
    }

    pub fn message_timeout(&self) -> Duration {
        Duration::from_secs(self.message_timeout)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReaderConfig {
    pub transport_options: TransportOptions,
    /// Id or display name of the canned request sent to the holder.
    pub canned_request: String,
    pub connection_timeout: u64,
    pub message_timeout: u64,
    /// Validity, in days from first use, of generated reader certificates.
    pub credential_validity_days: u32,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            transport_options: TransportOptions {
                ble_use_l2cap: false,
            },
            canned_request: "us-transportation".into(),
            connection_timeout: 60,
            message_timeout: 30,
            credential_validity_days: 365,
        }
    }
}

impl ReaderConfig {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout)
    }

    pub fn message_timeout(&self) -> Duration {
        Duration::from_secs(self.message_timeout)
    }
}
