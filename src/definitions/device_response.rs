//! `DeviceResponse` generation on the holder side and parsing with authentication checks on
//! the reader side.
use ciborium::Value;
use zeroize::Zeroizing;

use crate::cbor::{self, CborError};
use crate::cose;
use crate::definitions::issuer_signed::IssuerSigned;
use crate::definitions::keys::{self, EcPrivateKey, EcPublicKey};
use crate::definitions::mso::{self, Mso};
use crate::definitions::session::{derive_key, transcript_salt};
use crate::definitions::validity_info::ValidityInfo;
use crate::x509::Certificate;

pub const DEVICE_RESPONSE_VERSION: &str = "1.0";
/// `DeviceResponse.status` for a successful response.
pub const STATUS_OK: u64 = 0;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Cbor(#[from] CborError),
    #[error(transparent)]
    Cose(#[from] cose::Error),
    #[error("invalid mobile security object: {0}")]
    Mso(#[from] mso::Error),
    #[error("key agreement failed: {0}")]
    KeyAgreement(#[from] keys::Error),
    #[error("unsupported DeviceResponse version '{0}'")]
    UnsupportedVersion(String),
    #[error("malformed DeviceResponse: {0}")]
    Malformed(String),
}

/// `#6.24(bstr .cbor DeviceAuthentication)`, the detached payload of device authentication.
pub fn device_authentication_bytes(
    transcript_bytes: &[u8],
    doc_type: &str,
    device_namespaces_bytes: &Value,
) -> Result<Vec<u8>, CborError> {
    let transcript: Value = cbor::from_slice(transcript_bytes)?;
    let device_authentication = Value::Array(vec![
        Value::Text("DeviceAuthentication".into()),
        transcript,
        Value::Text(doc_type.into()),
        device_namespaces_bytes.clone(),
    ]);
    cbor::to_vec(&cbor::embed(&device_authentication)?)
}

/// `EMacKey`: HKDF over the agreement between the device key and the reader's ephemeral key.
pub fn emac_key(
    own_key: &EcPrivateKey,
    peer_key: &EcPublicKey,
    transcript_bytes: &[u8],
) -> Result<Zeroizing<[u8; 32]>, Error> {
    let shared_secret = own_key.key_agreement(peer_key)?;
    let salt = transcript_salt(transcript_bytes)?;
    Ok(derive_key(&shared_secret, &salt, b"EMacKey"))
}

/// How the holder proves possession of the device key.
#[derive(Clone, Copy, Debug)]
pub enum DeviceAuth<'a> {
    /// ECDSA `deviceSignature`.
    Signature,
    /// HMAC `deviceMac` keyed against the reader's ephemeral key.
    Mac { e_reader_key: &'a EcPublicKey },
}

/// Accumulates documents into an encoded `DeviceResponse`.
#[derive(Debug)]
pub struct DeviceResponseGenerator<'a> {
    transcript_bytes: &'a [u8],
    documents: Vec<Value>,
    status: u64,
}

impl<'a> DeviceResponseGenerator<'a> {
    pub fn new(transcript_bytes: &'a [u8]) -> Self {
        Self {
            transcript_bytes,
            documents: vec![],
            status: STATUS_OK,
        }
    }

    pub fn status(mut self, status: u64) -> Self {
        self.status = status;
        self
    }

    /// Adds a document with empty device signed namespaces, authenticated with `device_key`.
    pub fn add_document(
        &mut self,
        doc_type: &str,
        issuer_signed: &IssuerSigned,
        device_key: &EcPrivateKey,
        auth: DeviceAuth<'_>,
    ) -> Result<(), Error> {
        let device_namespaces_bytes = cbor::embed(&Value::Map(vec![]))?;
        let payload =
            device_authentication_bytes(self.transcript_bytes, doc_type, &device_namespaces_bytes)?;
        let device_auth = match auth {
            DeviceAuth::Signature => (
                Value::Text("deviceSignature".into()),
                cose::sign1::sign_detached(device_key, &payload, &[])?,
            ),
            DeviceAuth::Mac { e_reader_key } => {
                let key = emac_key(device_key, e_reader_key, self.transcript_bytes)?;
                (
                    Value::Text("deviceMac".into()),
                    cose::mac0::tag_detached(&key[..], &payload)?,
                )
            }
        };
        self.documents.push(Value::Map(vec![
            (Value::Text("docType".into()), Value::Text(doc_type.into())),
            (Value::Text("issuerSigned".into()), issuer_signed.to_value()?),
            (
                Value::Text("deviceSigned".into()),
                Value::Map(vec![
                    (Value::Text("nameSpaces".into()), device_namespaces_bytes),
                    (
                        Value::Text("deviceAuth".into()),
                        Value::Map(vec![device_auth]),
                    ),
                ]),
            ),
        ]));
        Ok(())
    }

    pub fn generate(self) -> Result<Vec<u8>, Error> {
        let mut response = vec![(
            Value::Text("version".into()),
            Value::Text(DEVICE_RESPONSE_VERSION.into()),
        )];
        if !self.documents.is_empty() {
            response.push((
                Value::Text("documents".into()),
                Value::Array(self.documents),
            ));
        }
        response.push((
            Value::Text("status".into()),
            Value::Integer(self.status.into()),
        ));
        Ok(cbor::to_vec(&Value::Map(response))?)
    }
}

/// Issuer signed data elements of one namespace: element identifier and encoded value.
pub type IssuerEntries = Vec<(String, Vec<u8>)>;

/// A document from a parsed `DeviceResponse` with the outcome of every authentication check.
#[derive(Clone, Debug)]
pub struct ResponseDocument {
    pub doc_type: String,
    /// Issuer certificate chain from the `issuerAuth` x5chain, leaf first.
    pub issuer_certificate_chain: Vec<Certificate>,
    pub validity_info: ValidityInfo,
    pub issuer_signed_authenticated: bool,
    pub device_signed_authenticated: bool,
    pub num_issuer_entry_digest_match_failures: usize,
    pub issuer_entries: Vec<(String, IssuerEntries)>,
}

impl ResponseDocument {
    /// Issuer signed namespaces in the order they were received.
    pub fn issuer_namespaces(&self) -> Vec<&str> {
        self.issuer_entries.iter().map(|(ns, _)| ns.as_str()).collect()
    }

    pub fn issuer_entry_names(&self, namespace: &str) -> Vec<&str> {
        self.issuer_entries
            .iter()
            .filter(|(ns, _)| ns == namespace)
            .flat_map(|(_, entries)| entries.iter().map(|(name, _)| name.as_str()))
            .collect()
    }

    /// The encoded value of an issuer signed data element.
    pub fn issuer_entry_data(&self, namespace: &str, name: &str) -> Option<&[u8]> {
        self.issuer_entries
            .iter()
            .filter(|(ns, _)| ns == namespace)
            .flat_map(|(_, entries)| entries.iter())
            .find(|(entry, _)| entry == name)
            .map(|(_, data)| data.as_slice())
    }
}

#[derive(Clone, Debug)]
pub struct ParsedDeviceResponse {
    pub version: String,
    pub status: u64,
    pub documents: Vec<ResponseDocument>,
}

/// Parses a `DeviceResponse` received in a session with the given transcript.
pub struct DeviceResponseParser<'a> {
    response_bytes: &'a [u8],
    transcript_bytes: &'a [u8],
    e_reader_key: Option<&'a EcPrivateKey>,
}

impl<'a> DeviceResponseParser<'a> {
    pub fn new(response_bytes: &'a [u8], transcript_bytes: &'a [u8]) -> Self {
        Self {
            response_bytes,
            transcript_bytes,
            e_reader_key: None,
        }
    }

    /// Needed to check a `deviceMac`; without it MAC authenticated documents fail device
    /// authentication.
    pub fn with_ephemeral_reader_key(mut self, key: &'a EcPrivateKey) -> Self {
        self.e_reader_key = Some(key);
        self
    }

    pub fn parse(self) -> Result<ParsedDeviceResponse, Error> {
        let value: Value = cbor::from_slice(self.response_bytes)?;
        let map = cbor::as_map(&value)?;
        let version = cbor::as_text(cbor::require_text(map, "version")?)?.to_string();
        if !version.starts_with("1.") {
            return Err(Error::UnsupportedVersion(version));
        }
        let status = cbor::as_u64(cbor::require_text(map, "status")?)?;
        let documents = match cbor::lookup_text(map, "documents") {
            Some(documents) => cbor::as_array(documents)?
                .iter()
                .map(|document| self.parse_document(document))
                .collect::<Result<Vec<_>, _>>()?,
            None => vec![],
        };
        Ok(ParsedDeviceResponse {
            version,
            status,
            documents,
        })
    }

    fn parse_document(&self, value: &Value) -> Result<ResponseDocument, Error> {
        let map = cbor::as_map(value)?;
        let doc_type = cbor::as_text(cbor::require_text(map, "docType")?)?.to_string();
        let issuer_signed = IssuerSigned::from_value(cbor::require_text(map, "issuerSigned")?)?;

        let issuer_auth = cose::sign1::parse(&issuer_signed.issuer_auth)?;
        let issuer_certificate_chain = cose::sign1::x5chain(&issuer_auth)?;
        let payload = issuer_auth
            .payload
            .as_ref()
            .ok_or_else(|| Error::Malformed("issuerAuth has no payload".into()))?;
        let mso_value: Value = cbor::from_slice(payload)?;
        let mso = Mso::try_from(&cbor::from_slice::<Value>(cbor::untag24(&mso_value)?)?)?;

        let issuer_signed_authenticated = match issuer_certificate_chain
            .first()
            .map(Certificate::public_key)
        {
            Some(Ok(key)) => cose::sign1::verify(&issuer_auth, &key, None)
                .map_err(|e| tracing::warn!("issuerAuth does not verify: {e}"))
                .is_ok(),
            _ => false,
        } && mso.doc_type == doc_type;

        let mut num_issuer_entry_digest_match_failures = 0;
        let mut issuer_entries = Vec::with_capacity(issuer_signed.namespaces.len());
        for (namespace, items) in &issuer_signed.namespaces {
            let digests = mso.value_digests.get(namespace);
            let mut entries = Vec::with_capacity(items.len());
            for item in items {
                let expected = digests.and_then(|d| d.get(&item.item.digest_id));
                if expected != Some(&item.digest(mso.digest_algorithm)) {
                    tracing::warn!(
                        "digest mismatch for {namespace}/{}",
                        item.item.element_identifier
                    );
                    num_issuer_entry_digest_match_failures += 1;
                }
                entries.push((
                    item.item.element_identifier.clone(),
                    cbor::to_vec(&item.item.element_value)?,
                ));
            }
            issuer_entries.push((namespace.clone(), entries));
        }

        let device_signed = cbor::as_map(cbor::require_text(map, "deviceSigned")?)?;
        let device_signed_authenticated =
            self.check_device_auth(&doc_type, device_signed, &mso)?;

        Ok(ResponseDocument {
            doc_type,
            issuer_certificate_chain,
            validity_info: mso.validity_info,
            issuer_signed_authenticated,
            device_signed_authenticated,
            num_issuer_entry_digest_match_failures,
            issuer_entries,
        })
    }

    fn check_device_auth(
        &self,
        doc_type: &str,
        device_signed: &[(Value, Value)],
        mso: &Mso,
    ) -> Result<bool, Error> {
        let device_namespaces_bytes = cbor::require_text(device_signed, "nameSpaces")?;
        let device_auth = cbor::as_map(cbor::require_text(device_signed, "deviceAuth")?)?;
        let payload =
            device_authentication_bytes(self.transcript_bytes, doc_type, device_namespaces_bytes)?;
        let device_key = mso.device_key.to_public_key().map_err(mso::Error::from)?;

        if let Some(signature) = cbor::lookup_text(device_auth, "deviceSignature") {
            let sign1 = cose::sign1::parse(signature)?;
            return Ok(cose::sign1::verify(&sign1, &device_key, Some(&payload))
                .map_err(|e| tracing::warn!("deviceSignature does not verify: {e}"))
                .is_ok());
        }
        if let Some(mac) = cbor::lookup_text(device_auth, "deviceMac") {
            let Some(e_reader_key) = self.e_reader_key else {
                tracing::warn!("deviceMac present but no ephemeral reader key to check it");
                return Ok(false);
            };
            let mac0 = cose::mac0::parse(mac)?;
            let key = emac_key(e_reader_key, &device_key, self.transcript_bytes)?;
            return Ok(cose::mac0::verify_detached(&mac0, &key[..], &payload)
                .map_err(|e| tracing::warn!("deviceMac does not verify: {e}"))
                .is_ok());
        }
        Err(Error::Malformed(
            "deviceAuth holds neither deviceSignature nor deviceMac".into(),
        ))
    }
}
