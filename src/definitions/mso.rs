use std::collections::BTreeMap;

use ciborium::Value;
use sha2::{Digest, Sha256, Sha384, Sha512};

use crate::cbor;
use crate::definitions::cose_key::CoseKey;
use crate::definitions::validity_info::{self, ValidityInfo};

pub type DigestId = u64;
pub type DigestIds = BTreeMap<DigestId, Vec<u8>>;

/// The mobile security object signed by the issuer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mso {
    pub version: String,
    pub digest_algorithm: DigestAlgorithm,
    /// Digests of the issuer signed items, per namespace.
    pub value_digests: BTreeMap<String, DigestIds>,
    pub device_key: CoseKey,
    pub doc_type: String,
    pub validity_info: ValidityInfo,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DigestAlgorithm {
    SHA256,
    SHA384,
    SHA512,
}

impl DigestAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SHA256 => "SHA-256",
            Self::SHA384 => "SHA-384",
            Self::SHA512 => "SHA-512",
        }
    }

    pub fn digest(&self, bytes: &[u8]) -> Vec<u8> {
        match self {
            Self::SHA256 => Sha256::digest(bytes).to_vec(),
            Self::SHA384 => Sha384::digest(bytes).to_vec(),
            Self::SHA512 => Sha512::digest(bytes).to_vec(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Cbor(#[from] cbor::CborError),
    #[error("unsupported digest algorithm {0:?}")]
    UnsupportedDigestAlgorithm(String),
    #[error("invalid device key: {0}")]
    DeviceKey(#[from] crate::definitions::cose_key::Error),
    #[error("invalid validity info: {0}")]
    ValidityInfo(#[from] validity_info::Error),
}

impl TryFrom<&Mso> for Value {
    type Error = Error;

    fn try_from(mso: &Mso) -> Result<Value, Error> {
        let value_digests = mso
            .value_digests
            .iter()
            .map(|(namespace, digests)| {
                let digests = digests
                    .iter()
                    .map(|(id, digest)| (Value::Integer((*id).into()), Value::Bytes(digest.clone())))
                    .collect();
                (Value::Text(namespace.clone()), Value::Map(digests))
            })
            .collect();
        Ok(Value::Map(vec![
            (Value::Text("version".into()), Value::Text(mso.version.clone())),
            (
                Value::Text("digestAlgorithm".into()),
                Value::Text(mso.digest_algorithm.name().into()),
            ),
            (Value::Text("valueDigests".into()), Value::Map(value_digests)),
            (
                Value::Text("deviceKeyInfo".into()),
                Value::Map(vec![(
                    Value::Text("deviceKey".into()),
                    Value::from(mso.device_key.clone()),
                )]),
            ),
            (Value::Text("docType".into()), Value::Text(mso.doc_type.clone())),
            (
                Value::Text("validityInfo".into()),
                Value::try_from(&mso.validity_info)?,
            ),
        ]))
    }
}

impl TryFrom<&Value> for Mso {
    type Error = Error;

    fn try_from(value: &Value) -> Result<Mso, Error> {
        let map = cbor::as_map(value)?;
        let digest_algorithm = match cbor::as_text(cbor::require_text(map, "digestAlgorithm")?)? {
            "SHA-256" => DigestAlgorithm::SHA256,
            "SHA-384" => DigestAlgorithm::SHA384,
            "SHA-512" => DigestAlgorithm::SHA512,
            other => return Err(Error::UnsupportedDigestAlgorithm(other.into())),
        };

        let mut value_digests = BTreeMap::new();
        for (namespace, digests) in cbor::as_map(cbor::require_text(map, "valueDigests")?)? {
            let mut ids = DigestIds::new();
            for (id, digest) in cbor::as_map(digests)? {
                ids.insert(cbor::as_u64(id)?, cbor::as_bytes(digest)?.to_vec());
            }
            value_digests.insert(cbor::as_text(namespace)?.to_string(), ids);
        }

        let device_key_info = cbor::as_map(cbor::require_text(map, "deviceKeyInfo")?)?;
        let device_key = CoseKey::try_from(cbor::require_text(device_key_info, "deviceKey")?.clone())?;

        Ok(Mso {
            version: cbor::as_text(cbor::require_text(map, "version")?)?.to_string(),
            digest_algorithm,
            value_digests,
            device_key,
            doc_type: cbor::as_text(cbor::require_text(map, "docType")?)?.to_string(),
            validity_info: ValidityInfo::try_from(cbor::require_text(map, "validityInfo")?)?,
        })
    }
}
