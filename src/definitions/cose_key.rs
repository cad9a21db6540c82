use ciborium::Value;
use coset::iana::Algorithm;
use zeroize::Zeroizing;

use crate::cbor;
use crate::definitions::keys::{EcCurve, EcPrivateKey, EcPublicKey};

/// An RFC-8152 [COSE_Key](https://datatracker.ietf.org/doc/html/rfc8152#section-13)
/// restricted to EC2 keys on the curves this crate supports.
///
/// The private scalar `d` is only present when keys are persisted (reader credentials),
/// never on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoseKey {
    pub crv: EcCurve,
    pub x: Vec<u8>,
    pub y: Vec<u8>,
    pub d: Option<Zeroizing<Vec<u8>>>,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("COSE_Key is not a CBOR map")]
    NotAMap,
    #[error("This implementation of COSE_Key only supports EC2 keys")]
    UnsupportedKeyType,
    #[error("This implementation of COSE_Key only supports P-256 and P-384 elliptic curves")]
    UnsupportedCurve,
    #[error("COSE_Key is missing the {0} parameter")]
    MissingParameter(&'static str),
    #[error("COSE_Key does not describe a valid point: {0}")]
    InvalidKey(#[from] crate::definitions::keys::Error),
}

const KTY: i64 = 1;
const KTY_EC2: i64 = 2;
const CRV: i64 = -1;
const X: i64 = -2;
const Y: i64 = -3;
const D: i64 = -4;

impl CoseKey {
    pub fn signature_algorithm(&self) -> Algorithm {
        match self.crv {
            EcCurve::P256 => Algorithm::ES256,
            EcCurve::P384 => Algorithm::ES384,
        }
    }

    pub fn to_public_key(&self) -> Result<EcPublicKey, Error> {
        Ok(EcPublicKey::from_coordinates(self.crv, &self.x, &self.y)?)
    }

    pub fn to_private_key(&self) -> Result<EcPrivateKey, Error> {
        let d = self.d.as_ref().ok_or(Error::MissingParameter("d"))?;
        Ok(EcPrivateKey::from_bytes(self.crv, d)?)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, cbor::CborError> {
        cbor::to_vec(&Value::from(self.clone()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, anyhow::Error> {
        let value: Value = cbor::from_slice(bytes)?;
        Ok(Self::try_from(value)?)
    }
}

impl From<&EcPublicKey> for CoseKey {
    fn from(key: &EcPublicKey) -> Self {
        let (x, y) = key.coordinates();
        CoseKey {
            crv: key.curve(),
            x,
            y,
            d: None,
        }
    }
}

impl From<&EcPrivateKey> for CoseKey {
    fn from(key: &EcPrivateKey) -> Self {
        let mut cose_key = CoseKey::from(&key.public_key());
        cose_key.d = Some(key.to_bytes());
        cose_key
    }
}

fn curve_id(crv: EcCurve) -> i64 {
    match crv {
        EcCurve::P256 => 1,
        EcCurve::P384 => 2,
    }
}

impl From<CoseKey> for Value {
    fn from(key: CoseKey) -> Value {
        let mut map = vec![
            (Value::Integer(KTY.into()), Value::Integer(KTY_EC2.into())),
            (
                Value::Integer(CRV.into()),
                Value::Integer(curve_id(key.crv).into()),
            ),
            (Value::Integer(X.into()), Value::Bytes(key.x)),
            (Value::Integer(Y.into()), Value::Bytes(key.y)),
        ];
        if let Some(d) = key.d {
            map.push((Value::Integer(D.into()), Value::Bytes(d.to_vec())));
        }
        Value::Map(map)
    }
}

impl TryFrom<Value> for CoseKey {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Error> {
        let map = cbor::as_map(&value).map_err(|_| Error::NotAMap)?;
        let int_param = |label: i64, name: &'static str| -> Result<i128, Error> {
            match cbor::lookup_int(map, label) {
                Some(Value::Integer(i)) => Ok(i128::from(*i)),
                Some(_) => Err(Error::UnsupportedKeyType),
                None => Err(Error::MissingParameter(name)),
            }
        };
        let bytes_param = |label: i64, name: &'static str| -> Result<Option<Vec<u8>>, Error> {
            match cbor::lookup_int(map, label) {
                Some(Value::Bytes(b)) => Ok(Some(b.clone())),
                Some(_) => Err(Error::MissingParameter(name)),
                None => Ok(None),
            }
        };

        if int_param(KTY, "kty")? != KTY_EC2 as i128 {
            return Err(Error::UnsupportedKeyType);
        }
        let crv = match int_param(CRV, "crv")? {
            1 => EcCurve::P256,
            2 => EcCurve::P384,
            _ => return Err(Error::UnsupportedCurve),
        };
        let x = bytes_param(X, "x")?.ok_or(Error::MissingParameter("x"))?;
        // Compressed points (y as a sign bit) are not produced by any peer we talk to.
        let y = bytes_param(Y, "y")?.ok_or(Error::MissingParameter("y"))?;
        let d = bytes_param(D, "d")?.map(Zeroizing::new);
        Ok(CoseKey { crv, x, y, d })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn encodes_parameters_in_canonical_order() {
        let key = CoseKey {
            crv: EcCurve::P256,
            x: vec![1; 32],
            y: vec![2; 32],
            d: None,
        };
        let bytes = key.to_bytes().unwrap();
        // {1: 2, -1: 1, -2: h'01..', -3: h'02..'}
        assert_eq!(hex::encode(&bytes[..8]), "a401022001215820");
        assert_eq!(CoseKey::from_bytes(&bytes).unwrap(), key);
    }

    #[test]
    fn private_key_survives_encoding() {
        let private = EcPrivateKey::generate(EcCurve::P384);
        let cose_key = CoseKey::from(&private);
        let decoded = CoseKey::from_bytes(&cose_key.to_bytes().unwrap()).unwrap();
        let restored = decoded.to_private_key().unwrap();
        assert_eq!(restored.public_key(), private.public_key());
        assert_eq!(decoded.signature_algorithm(), Algorithm::ES384);
    }

    #[test]
    fn rejects_okp_keys() {
        let value = Value::Map(vec![
            (Value::Integer(1.into()), Value::Integer(1.into())),
            (Value::Integer((-1).into()), Value::Integer(6.into())),
            (Value::Integer((-2).into()), Value::Bytes(vec![0; 32])),
        ]);
        assert_eq!(CoseKey::try_from(value), Err(Error::UnsupportedKeyType));
    }
}
