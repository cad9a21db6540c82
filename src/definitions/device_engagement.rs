//! This module contains the [Engagement] record exchanged out of band (QR code) before a
//! proximity session, and the [ConnectionMethod]s it advertises.
//!
//! The wire form is the ISO/IEC 18013-5 `DeviceEngagement` map:
//!
//! ```text
//! { 0: version, 1: [1, #6.24(bstr .cbor COSE_Key)], 2: [[type, 1, options], ...] }
//! ```
//!
//! Server retrieval (`3`) and protocol info (`4`) are not produced and are ignored when parsing.
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ciborium::Value;
use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

use crate::cbor;
use crate::definitions::cose_key::CoseKey;
use crate::definitions::keys::EcPublicKey;
use crate::definitions::session::Role;

/// Engagement version emitted by this crate.
pub const ENGAGEMENT_VERSION_1_0: &str = "1.0";
/// URI scheme prefix of a QR/scan payload.
pub const QR_CODE_URI_PREFIX: &str = "mdoc:";

const CIPHER_SUITE: u64 = 1;
const METHOD_VERSION: u64 = 1;

const TYPE_NFC: u64 = 1;
const TYPE_BLE: u64 = 2;
const TYPE_WIFI: u64 = 3;

/// Errors that can occur when generating or parsing an engagement.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("scan payload does not start with '{QR_CODE_URI_PREFIX}'")]
    InvalidScanPayload,
    #[error("scan payload is not valid base64url")]
    InvalidBase64,
    #[error("unsupported engagement version {0}")]
    UnsupportedVersion(String),
    #[error("Malformed engagement: {0}")]
    Malformed(String),
    #[error("Something went wrong parsing a cose key: {0}")]
    CoseKey(#[from] crate::definitions::cose_key::Error),
}

impl From<cbor::CborError> for Error {
    fn from(e: cbor::CborError) -> Self {
        Error::Malformed(e.to_string())
    }
}

/// A parsed engagement record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Engagement {
    pub version: String,
    /// The sender's ephemeral public key (EDeviceKey when the holder engages).
    pub e_sender_key: EcPublicKey,
    /// `EDeviceKeyBytes` exactly as received, i.e. the encoded `#6.24` item.
    pub e_sender_key_bytes: Vec<u8>,
    pub connection_methods: Vec<ConnectionMethod>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum ConnectionMethod {
    Ble(BleOptions),
    Nfc(NfcOptions),
    Wifi(WifiOptions),
}

/// Options of a `Bluetooth Low Energy` connection method.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BleOptions {
    pub supports_peripheral_server_mode: bool,
    pub supports_central_client_mode: bool,
    pub peripheral_server_mode_uuid: Option<Uuid>,
    pub central_client_mode_uuid: Option<Uuid>,
    /// The BLE device address of the peripheral server, if known.
    pub peripheral_server_mode_mac_address: Option<Vec<u8>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NfcOptions {
    pub max_command_data_length: u64,
    pub max_response_data_length: u64,
}

/// Options of a `Wi-Fi Aware` connection method.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WifiOptions {
    pub pass_phrase: Option<String>,
    pub channel_info_operating_class: Option<u64>,
    pub channel_info_channel_number: Option<u64>,
    pub band_info: Option<Vec<u8>>,
}

impl ConnectionMethod {
    pub fn transport_type(&self) -> u64 {
        match self {
            Self::Nfc(_) => TYPE_NFC,
            Self::Ble(_) => TYPE_BLE,
            Self::Wifi(_) => TYPE_WIFI,
        }
    }
}

impl std::fmt::Display for ConnectionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ble(o) => write!(
                f,
                "ble:central_client_mode={}:peripheral_server_mode={}",
                o.supports_central_client_mode, o.supports_peripheral_server_mode
            ),
            Self::Nfc(o) => write!(
                f,
                "nfc:cmd_max_length={}:resp_max_length={}",
                o.max_command_data_length, o.max_response_data_length
            ),
            Self::Wifi(_) => write!(f, "wifi_aware"),
        }
    }
}

fn int_key(k: i64) -> Value {
    Value::Integer(k.into())
}

impl From<&ConnectionMethod> for Value {
    fn from(method: &ConnectionMethod) -> Value {
        let options = match method {
            ConnectionMethod::Ble(o) => {
                let mut map = vec![
                    (int_key(0), Value::Bool(o.supports_peripheral_server_mode)),
                    (int_key(1), Value::Bool(o.supports_central_client_mode)),
                ];
                if let Some(uuid) = o.peripheral_server_mode_uuid {
                    map.push((int_key(10), Value::Bytes(uuid.as_bytes().to_vec())));
                }
                if let Some(uuid) = o.central_client_mode_uuid {
                    map.push((int_key(11), Value::Bytes(uuid.as_bytes().to_vec())));
                }
                if let Some(address) = &o.peripheral_server_mode_mac_address {
                    map.push((int_key(20), Value::Bytes(address.clone())));
                }
                Value::Map(map)
            }
            ConnectionMethod::Nfc(o) => Value::Map(vec![
                (int_key(0), Value::Integer(o.max_command_data_length.into())),
                (int_key(1), Value::Integer(o.max_response_data_length.into())),
            ]),
            ConnectionMethod::Wifi(o) => {
                let mut map = vec![];
                if let Some(pass_phrase) = &o.pass_phrase {
                    map.push((int_key(0), Value::Text(pass_phrase.clone())));
                }
                if let Some(class) = o.channel_info_operating_class {
                    map.push((int_key(1), Value::Integer(class.into())));
                }
                if let Some(channel) = o.channel_info_channel_number {
                    map.push((int_key(2), Value::Integer(channel.into())));
                }
                if let Some(band) = &o.band_info {
                    map.push((int_key(3), Value::Bytes(band.clone())));
                }
                Value::Map(map)
            }
        };
        Value::Array(vec![
            Value::Integer(method.transport_type().into()),
            Value::Integer(METHOD_VERSION.into()),
            options,
        ])
    }
}

fn optional_uuid(map: &[(Value, Value)], key: i64) -> Result<Option<Uuid>, Error> {
    match cbor::lookup_int(map, key) {
        None => Ok(None),
        Some(value) => {
            let bytes: [u8; 16] = cbor::as_bytes(value)?
                .try_into()
                .map_err(|_| Error::Malformed(format!("BLE option {key} is not a 16 byte UUID")))?;
            Ok(Some(Uuid::from_bytes(bytes)))
        }
    }
}

fn optional_flag(map: &[(Value, Value)], key: i64) -> Result<bool, Error> {
    match cbor::lookup_int(map, key) {
        None => Ok(false),
        Some(Value::Bool(b)) => Ok(*b),
        Some(other) => Err(cbor::CborError::UnexpectedItem(cbor::kind(other), "bool").into()),
    }
}

fn optional_uint(map: &[(Value, Value)], key: i64) -> Result<Option<u64>, Error> {
    cbor::lookup_int(map, key)
        .map(cbor::as_u64)
        .transpose()
        .map_err(Into::into)
}

impl ConnectionMethod {
    /// Decodes a `[type, version, options]` entry. Unknown transport types yield `None`.
    fn from_value(value: &Value) -> Result<Option<Self>, Error> {
        let (transport_type, options) = match cbor::as_array(value)? {
            [transport_type, _version, options] => (cbor::as_u64(transport_type)?, options),
            _ => {
                return Err(Error::Malformed(
                    "connection method is not a three element array".into(),
                ))
            }
        };
        let map = cbor::as_map(options)?;
        let method = match transport_type {
            TYPE_BLE => ConnectionMethod::Ble(BleOptions {
                supports_peripheral_server_mode: optional_flag(map, 0)?,
                supports_central_client_mode: optional_flag(map, 1)?,
                peripheral_server_mode_uuid: optional_uuid(map, 10)?,
                central_client_mode_uuid: optional_uuid(map, 11)?,
                peripheral_server_mode_mac_address: cbor::lookup_int(map, 20)
                    .map(|v| cbor::as_bytes(v).map(<[u8]>::to_vec))
                    .transpose()?,
            }),
            TYPE_NFC => ConnectionMethod::Nfc(NfcOptions {
                max_command_data_length: optional_uint(map, 0)?
                    .ok_or_else(|| Error::Malformed("NFC options lack max command length".into()))?,
                max_response_data_length: optional_uint(map, 1)?
                    .ok_or_else(|| Error::Malformed("NFC options lack max response length".into()))?,
            }),
            TYPE_WIFI => ConnectionMethod::Wifi(WifiOptions {
                pass_phrase: cbor::lookup_int(map, 0)
                    .map(|v| cbor::as_text(v).map(str::to_string))
                    .transpose()?,
                channel_info_operating_class: optional_uint(map, 1)?,
                channel_info_channel_number: optional_uint(map, 2)?,
                band_info: cbor::lookup_int(map, 3)
                    .map(|v| cbor::as_bytes(v).map(<[u8]>::to_vec))
                    .transpose()?,
            }),
            other => {
                tracing::warn!("skipping unsupported connection method type {other}");
                return Ok(None);
            }
        };
        Ok(Some(method))
    }
}

/// Encodes an engagement record for `sender_key` advertising `connection_methods`.
///
/// Deterministic for a given key, method order and version.
pub fn generate(
    sender_key: &EcPublicKey,
    connection_methods: &[ConnectionMethod],
    version: &str,
) -> Result<Vec<u8>, Error> {
    let e_sender_key_bytes = cbor::tag24(CoseKey::from(sender_key).to_bytes()?);
    let mut map = vec![
        (int_key(0), Value::Text(version.to_string())),
        (
            int_key(1),
            Value::Array(vec![Value::Integer(CIPHER_SUITE.into()), e_sender_key_bytes]),
        ),
    ];
    if !connection_methods.is_empty() {
        map.push((
            int_key(2),
            Value::Array(connection_methods.iter().map(Value::from).collect()),
        ));
    }
    Ok(cbor::to_vec(&Value::Map(map))?)
}

impl Engagement {
    pub fn parse(bytes: &[u8]) -> Result<Self, Error> {
        let value: Value = cbor::from_slice(bytes)?;
        let map = cbor::as_map(&value)?;

        let version = cbor::as_text(
            cbor::lookup_int(map, 0).ok_or_else(|| Error::Malformed("missing version".into()))?,
        )?
        .to_string();
        if version.split('.').next() != Some("1") {
            return Err(Error::UnsupportedVersion(version));
        }

        let security = cbor::as_array(
            cbor::lookup_int(map, 1).ok_or_else(|| Error::Malformed("missing security".into()))?,
        )?;
        let key_item = match security {
            [_cipher_suite, key_item] => key_item,
            _ => return Err(Error::Malformed("security is not a two element array".into())),
        };
        let cose_key: Value = cbor::from_slice(cbor::untag24(key_item)?)?;
        let e_sender_key = CoseKey::try_from(cose_key)?.to_public_key()?;
        let e_sender_key_bytes = cbor::to_vec(key_item)?;

        let mut connection_methods = vec![];
        if let Some(methods) = cbor::lookup_int(map, 2) {
            for method in cbor::as_array(methods)? {
                if let Some(method) = ConnectionMethod::from_value(method)? {
                    connection_methods.push(method);
                }
            }
        }
        if cbor::lookup_int(map, 3).is_some() {
            tracing::debug!("ignoring server retrieval methods in engagement");
        }

        Ok(Engagement {
            version,
            e_sender_key,
            e_sender_key_bytes,
            connection_methods,
        })
    }

    /// `BLEIdent`, the value a holder exposes over BLE so the reader can recognise it.
    pub fn ble_ident(&self) -> [u8; 16] {
        ble_ident(&self.e_sender_key_bytes)
    }
}

/// HKDF-SHA256 over `EDeviceKeyBytes` with info `"BLEIdent"`.
pub fn ble_ident(e_device_key_bytes: &[u8]) -> [u8; 16] {
    let mut okm = [0u8; 16];
    // 16 bytes is far below the HKDF-SHA256 output limit.
    let _ = Hkdf::<Sha256>::new(None, e_device_key_bytes).expand(b"BLEIdent", &mut okm);
    okm
}

pub fn to_qr_code_uri(engagement_bytes: &[u8]) -> String {
    let mut qr_code_uri = String::from(QR_CODE_URI_PREFIX);
    URL_SAFE_NO_PAD.encode_string(engagement_bytes, &mut qr_code_uri);
    qr_code_uri
}

/// Extracts engagement bytes from a scan payload.
pub fn from_qr_code_uri(qr_code_uri: &str) -> Result<Vec<u8>, Error> {
    let encoded = qr_code_uri
        .strip_prefix(QR_CODE_URI_PREFIX)
        .ok_or(Error::InvalidScanPayload)?;
    URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|_| Error::InvalidBase64)
}

/// Expands connection methods so that each describes a single way of connecting.
///
/// A BLE method offering both modes becomes a central-client method followed by a
/// peripheral-server method; a BLE method offering neither is dropped.
pub fn disambiguate(methods: &[ConnectionMethod], role: Role) -> Vec<ConnectionMethod> {
    let mut result = Vec::with_capacity(methods.len());
    for method in methods {
        match method {
            ConnectionMethod::Ble(o)
                if o.supports_central_client_mode && o.supports_peripheral_server_mode =>
            {
                result.push(ConnectionMethod::Ble(BleOptions {
                    supports_peripheral_server_mode: false,
                    supports_central_client_mode: true,
                    peripheral_server_mode_uuid: None,
                    central_client_mode_uuid: o.central_client_mode_uuid,
                    peripheral_server_mode_mac_address: None,
                }));
                result.push(ConnectionMethod::Ble(BleOptions {
                    supports_peripheral_server_mode: true,
                    supports_central_client_mode: false,
                    peripheral_server_mode_uuid: o.peripheral_server_mode_uuid,
                    central_client_mode_uuid: None,
                    peripheral_server_mode_mac_address: o.peripheral_server_mode_mac_address.clone(),
                }));
            }
            ConnectionMethod::Ble(o)
                if !o.supports_central_client_mode && !o.supports_peripheral_server_mode =>
            {
                tracing::warn!("dropping BLE connection method supporting neither mode");
            }
            other => result.push(other.clone()),
        }
    }
    tracing::debug!(?role, "disambiguated {} connection methods into {}", methods.len(), result.len());
    result
}
