//! COSE_Sign1 and COSE_Mac0 helpers on top of [coset], keyed by the crate's EC keys.
pub mod mac0;
pub mod sign1;

use coset::iana;

use crate::definitions::keys::EcCurve;

/// COSE header label carrying the signer's certificate chain.
pub const X5CHAIN_HEADER_LABEL: i64 = 33;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("COSE structure could not be decoded: {0}")]
    Decode(coset::CoseError),
    #[error("COSE structure could not be encoded: {0}")]
    Encode(coset::CoseError),
    #[error("Missing x5chain header")]
    MissingX5Chain,
    #[error("invalid x5chain: {0}")]
    InvalidX5Chain(String),
    #[error("signature does not verify")]
    InvalidSignature,
    #[error("MAC does not verify")]
    InvalidTag,
    #[error("unsupported algorithm {0:?}")]
    UnsupportedAlgorithm(Option<coset::Algorithm>),
}

/// The signature algorithm used with keys on `curve`.
pub fn signature_algorithm(curve: EcCurve) -> iana::Algorithm {
    match curve {
        EcCurve::P256 => iana::Algorithm::ES256,
        EcCurve::P384 => iana::Algorithm::ES384,
    }
}
