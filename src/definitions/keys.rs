//! Curve-tagged elliptic curve keys.
//!
//! Ephemeral session keys and the long-lived reader/issuer keys are all P-256 or P-384
//! keys from the RustCrypto crates; these enums let the protocol code stay curve agnostic.
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use signature::{Signer, Verifier};
use zeroize::Zeroizing;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("Curve not supported for DH exchange")]
    UnsupportedCurve,
    #[error("keys are on different curves: {0} and {1}")]
    CurveMismatch(EcCurve, EcCurve),
    #[error("invalid public key encoding")]
    InvalidPublicKey,
    #[error("invalid private key encoding")]
    InvalidPrivateKey,
}

/// The curves usable for ephemeral and signing keys.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
pub enum EcCurve {
    #[serde(rename = "P-256")]
    #[strum(serialize = "P-256")]
    P256,
    #[serde(rename = "P-384")]
    #[strum(serialize = "P-384")]
    P384,
}

impl EcCurve {
    /// Size in bytes of a field element (and so of each affine coordinate).
    pub fn coordinate_size(&self) -> usize {
        match self {
            EcCurve::P256 => 32,
            EcCurve::P384 => 48,
        }
    }
}

#[derive(Clone)]
pub enum EcPrivateKey {
    P256(p256::SecretKey),
    P384(p384::SecretKey),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EcPublicKey {
    P256(p256::PublicKey),
    P384(p384::PublicKey),
}

impl std::fmt::Debug for EcPrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EcPrivateKey")
            .field("curve", &self.curve())
            .finish_non_exhaustive()
    }
}

impl EcPrivateKey {
    /// Generates a fresh random key on `curve`.
    pub fn generate(curve: EcCurve) -> Self {
        match curve {
            EcCurve::P256 => Self::P256(p256::SecretKey::random(&mut OsRng)),
            EcCurve::P384 => Self::P384(p384::SecretKey::random(&mut OsRng)),
        }
    }

    pub fn from_bytes(curve: EcCurve, d: &[u8]) -> Result<Self, Error> {
        match curve {
            EcCurve::P256 => p256::SecretKey::from_slice(d)
                .map(Self::P256)
                .map_err(|_| Error::InvalidPrivateKey),
            EcCurve::P384 => p384::SecretKey::from_slice(d)
                .map(Self::P384)
                .map_err(|_| Error::InvalidPrivateKey),
        }
    }

    /// The private scalar, big endian.
    pub fn to_bytes(&self) -> Zeroizing<Vec<u8>> {
        match self {
            Self::P256(k) => Zeroizing::new(k.to_bytes().to_vec()),
            Self::P384(k) => Zeroizing::new(k.to_bytes().to_vec()),
        }
    }

    pub fn curve(&self) -> EcCurve {
        match self {
            Self::P256(_) => EcCurve::P256,
            Self::P384(_) => EcCurve::P384,
        }
    }

    pub fn public_key(&self) -> EcPublicKey {
        match self {
            Self::P256(k) => EcPublicKey::P256(k.public_key()),
            Self::P384(k) => EcPublicKey::P384(k.public_key()),
        }
    }

    /// ECDH key agreement, returning the x-coordinate of the shared point.
    pub fn key_agreement(&self, peer: &EcPublicKey) -> Result<Zeroizing<Vec<u8>>, Error> {
        match (self, peer) {
            (Self::P256(k), EcPublicKey::P256(p)) => {
                let shared = p256::ecdh::diffie_hellman(k.to_nonzero_scalar(), p.as_affine());
                Ok(Zeroizing::new(shared.raw_secret_bytes().to_vec()))
            }
            (Self::P384(k), EcPublicKey::P384(p)) => {
                let shared = p384::ecdh::diffie_hellman(k.to_nonzero_scalar(), p.as_affine());
                Ok(Zeroizing::new(shared.raw_secret_bytes().to_vec()))
            }
            _ => Err(Error::CurveMismatch(self.curve(), peer.curve())),
        }
    }

    /// ECDSA signature in the fixed-size `r || s` form used by COSE.
    pub fn sign(&self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::P256(k) => {
                let signature: p256::ecdsa::Signature =
                    p256::ecdsa::SigningKey::from(k).sign(data);
                signature.to_bytes().to_vec()
            }
            Self::P384(k) => {
                let signature: p384::ecdsa::Signature =
                    p384::ecdsa::SigningKey::from(k).sign(data);
                signature.to_bytes().to_vec()
            }
        }
    }
}

impl EcPublicKey {
    pub fn curve(&self) -> EcCurve {
        match self {
            Self::P256(_) => EcCurve::P256,
            Self::P384(_) => EcCurve::P384,
        }
    }

    /// Builds a key from its affine coordinates.
    pub fn from_coordinates(curve: EcCurve, x: &[u8], y: &[u8]) -> Result<Self, Error> {
        let size = curve.coordinate_size();
        if x.len() != size || y.len() != size {
            return Err(Error::InvalidPublicKey);
        }
        let mut sec1 = Vec::with_capacity(1 + 2 * size);
        sec1.push(0x04);
        sec1.extend_from_slice(x);
        sec1.extend_from_slice(y);
        Self::from_sec1_bytes(curve, &sec1)
    }

    pub fn from_sec1_bytes(curve: EcCurve, bytes: &[u8]) -> Result<Self, Error> {
        match curve {
            EcCurve::P256 => p256::PublicKey::from_sec1_bytes(bytes)
                .map(Self::P256)
                .map_err(|_| Error::InvalidPublicKey),
            EcCurve::P384 => p384::PublicKey::from_sec1_bytes(bytes)
                .map(Self::P384)
                .map_err(|_| Error::InvalidPublicKey),
        }
    }

    /// Parses a SEC1 point, inferring the curve from its length.
    pub fn from_sec1_any(bytes: &[u8]) -> Result<Self, Error> {
        match bytes.len() {
            33 | 65 => Self::from_sec1_bytes(EcCurve::P256, bytes),
            49 | 97 => Self::from_sec1_bytes(EcCurve::P384, bytes),
            _ => Err(Error::UnsupportedCurve),
        }
    }

    /// Uncompressed affine coordinates `(x, y)`.
    pub fn coordinates(&self) -> (Vec<u8>, Vec<u8>) {
        let sec1 = self.to_sec1_bytes();
        let size = self.curve().coordinate_size();
        (sec1[1..1 + size].to_vec(), sec1[1 + size..].to_vec())
    }

    /// Uncompressed SEC1 encoding.
    pub fn to_sec1_bytes(&self) -> Vec<u8> {
        match self {
            Self::P256(k) => k.to_encoded_point(false).as_bytes().to_vec(),
            Self::P384(k) => k.to_encoded_point(false).as_bytes().to_vec(),
        }
    }

    /// Verifies a fixed-size `r || s` signature.
    pub fn verify(&self, data: &[u8], signature: &[u8]) -> bool {
        match self {
            Self::P256(k) => p256::ecdsa::Signature::from_slice(signature)
                .map(|s| p256::ecdsa::VerifyingKey::from(k).verify(data, &s).is_ok())
                .unwrap_or(false),
            Self::P384(k) => p384::ecdsa::Signature::from_slice(signature)
                .map(|s| p384::ecdsa::VerifyingKey::from(k).verify(data, &s).is_ok())
                .unwrap_or(false),
        }
    }

    /// Verifies an ASN.1 DER encoded signature, as found in X.509 certificates.
    pub fn verify_der(&self, data: &[u8], signature: &[u8]) -> bool {
        match self {
            Self::P256(k) => p256::ecdsa::Signature::from_der(signature)
                .map(|s| p256::ecdsa::VerifyingKey::from(k).verify(data, &s).is_ok())
                .unwrap_or(false),
            Self::P384(k) => p384::ecdsa::Signature::from_der(signature)
                .map(|s| p384::ecdsa::VerifyingKey::from(k).verify(data, &s).is_ok())
                .unwrap_or(false),
        }
    }
}
