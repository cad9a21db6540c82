//! X.509 certificates for reader authentication and document issuance.
//!
//! Certificates are built with the `x509-cert` builder and signed by the crate's
//! [EcPrivateKey]; signature checks go through [EcPublicKey::verify_der].
use std::str::FromStr;
use std::time::SystemTime;

use rand::random;
use time::OffsetDateTime;
use x509_cert::builder::{Builder, CertificateBuilder, Profile};
use x509_cert::der::{Decode, DecodePem, Encode, EncodePem};
use x509_cert::ext::pkix::{BasicConstraints, KeyUsage, KeyUsages};
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;
use x509_cert::spki::SubjectPublicKeyInfoOwned;
use x509_cert::time::{Time, Validity};

use crate::definitions::keys::{EcPrivateKey, EcPublicKey};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid certificate encoding: {0}")]
    Encoding(#[from] x509_cert::der::Error),
    #[error("certificate builder failed: {0}")]
    Builder(#[from] x509_cert::builder::Error),
    #[error("invalid subject public key: {0}")]
    PublicKey(String),
    #[error("invalid name {0:?}")]
    InvalidName(String),
    #[error("invalid validity period: {0}")]
    InvalidValidity(String),
}

/// A parsed certificate together with its DER encoding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Certificate {
    der: Vec<u8>,
    inner: x509_cert::Certificate,
}

impl Certificate {
    pub fn from_der(der: &[u8]) -> Result<Self, Error> {
        let inner = x509_cert::Certificate::from_der(der)?;
        Ok(Self {
            der: der.to_vec(),
            inner,
        })
    }

    pub fn from_pem(pem: &str) -> Result<Self, Error> {
        let inner = x509_cert::Certificate::from_pem(pem)?;
        Ok(Self {
            der: inner.to_der()?,
            inner,
        })
    }

    pub fn to_der(&self) -> &[u8] {
        &self.der
    }

    pub fn to_pem(&self) -> Result<String, Error> {
        Ok(self
            .inner
            .to_pem(x509_cert::der::pem::LineEnding::LF)?)
    }

    /// Subject distinguished name in RFC 4514 form, e.g. `CN=Example Issuer,C=US`.
    pub fn subject(&self) -> String {
        self.inner.tbs_certificate.subject.to_string()
    }

    pub fn issuer(&self) -> String {
        self.inner.tbs_certificate.issuer.to_string()
    }

    /// The subject common name, if the subject has one.
    pub fn common_name(&self) -> Option<String> {
        self.subject()
            .split(',')
            .find_map(|rdn| rdn.trim().strip_prefix("CN=").map(str::to_string))
    }

    pub fn not_before(&self) -> OffsetDateTime {
        OffsetDateTime::from(self.inner.tbs_certificate.validity.not_before.to_system_time())
    }

    pub fn not_after(&self) -> OffsetDateTime {
        OffsetDateTime::from(self.inner.tbs_certificate.validity.not_after.to_system_time())
    }

    pub fn public_key(&self) -> Result<EcPublicKey, Error> {
        let sec1 = self
            .inner
            .tbs_certificate
            .subject_public_key_info
            .subject_public_key
            .raw_bytes();
        EcPublicKey::from_sec1_any(sec1).map_err(|e| Error::PublicKey(e.to_string()))
    }

    /// Checks the certificate signature against `issuer_key`.
    pub fn is_signed_by(&self, issuer_key: &EcPublicKey) -> bool {
        let Ok(tbs) = self.inner.tbs_certificate.to_der() else {
            return false;
        };
        match self.inner.signature.as_bytes() {
            Some(signature) => issuer_key.verify_der(&tbs, signature),
            None => false,
        }
    }

    pub fn is_valid_at(&self, at: OffsetDateTime) -> bool {
        self.not_before() <= at && at <= self.not_after()
    }
}

fn to_x509_time(t: OffsetDateTime) -> Result<Time, Error> {
    Time::try_from(SystemTime::from(t)).map_err(|e| Error::InvalidValidity(e.to_string()))
}

/// A random positive 16 byte serial number.
fn serial_number() -> Result<SerialNumber, Error> {
    let mut bytes: [u8; 16] = random();
    bytes[0] = bytes[0] % 0x7f + 1;
    Ok(SerialNumber::new(&bytes)?)
}

fn spki(key: &EcPublicKey) -> Result<SubjectPublicKeyInfoOwned, Error> {
    match key {
        EcPublicKey::P256(k) => SubjectPublicKeyInfoOwned::from_key(*k),
        EcPublicKey::P384(k) => SubjectPublicKeyInfoOwned::from_key(*k),
    }
    .map_err(|e| Error::PublicKey(e.to_string()))
}

/// What a certificate may be used for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CertificateUsage {
    /// A trust anchor allowed to sign end-entity certificates.
    Authority,
    /// An end-entity signing certificate (reader authentication, document signer).
    Signing,
}

/// Parameters of a certificate to issue.
pub struct CertificateRequest<'a> {
    pub subject: &'a str,
    pub subject_key: &'a EcPublicKey,
    pub valid_from: OffsetDateTime,
    pub valid_until: OffsetDateTime,
    pub usage: CertificateUsage,
}

/// Issues a certificate for `request`, signed by `issuer_key`.
///
/// `issuer` is the issuer's subject name; `None` produces a self-signed certificate
/// (the subject key must then belong to `issuer_key`).
pub fn issue_certificate(
    request: &CertificateRequest<'_>,
    issuer_key: &EcPrivateKey,
    issuer: Option<&str>,
) -> Result<Certificate, Error> {
    let subject =
        Name::from_str(request.subject).map_err(|_| Error::InvalidName(request.subject.into()))?;
    let issuer = issuer
        .map(|i| Name::from_str(i).map_err(|_| Error::InvalidName(i.into())))
        .transpose()?;
    let validity = Validity {
        not_before: to_x509_time(request.valid_from)?,
        not_after: to_x509_time(request.valid_until)?,
    };
    let spki = spki(request.subject_key)?;

    let der = match issuer_key {
        EcPrivateKey::P256(k) => {
            let signer = p256::ecdsa::SigningKey::from(k);
            let mut builder = CertificateBuilder::new(
                Profile::Manual { issuer },
                serial_number()?,
                validity,
                subject,
                spki,
                &signer,
            )?;
            add_extensions(&mut builder, request.usage)?;
            builder.build::<p256::ecdsa::DerSignature>()?.to_der()?
        }
        EcPrivateKey::P384(k) => {
            let signer = p384::ecdsa::SigningKey::from(k);
            let mut builder = CertificateBuilder::new(
                Profile::Manual { issuer },
                serial_number()?,
                validity,
                subject,
                spki,
                &signer,
            )?;
            add_extensions(&mut builder, request.usage)?;
            builder.build::<p384::ecdsa::DerSignature>()?.to_der()?
        }
    };
    Certificate::from_der(&der)
}

fn add_extensions<S>(
    builder: &mut CertificateBuilder<'_, S>,
    usage: CertificateUsage,
) -> Result<(), Error>
where
    S: signature::Keypair + x509_cert::spki::DynSignatureAlgorithmIdentifier,
    S::VerifyingKey: x509_cert::spki::EncodePublicKey,
{
    match usage {
        CertificateUsage::Authority => {
            builder.add_extension(&KeyUsage(KeyUsages::KeyCertSign | KeyUsages::CRLSign))?;
            builder.add_extension(&BasicConstraints {
                ca: true,
                path_len_constraint: Some(0),
            })?;
        }
        CertificateUsage::Signing => {
            builder.add_extension(&KeyUsage(KeyUsages::DigitalSignature.into()))?;
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use crate::definitions::keys::EcCurve;
    use time::Duration;

    pub(crate) fn root_and_leaf() -> (EcPrivateKey, Certificate, EcPrivateKey, Certificate) {
        let now = OffsetDateTime::now_utc();
        let root_key = EcPrivateKey::generate(EcCurve::P384);
        let root = issue_certificate(
            &CertificateRequest {
                subject: "CN=Test Root,C=US",
                subject_key: &root_key.public_key(),
                valid_from: now - Duration::days(1),
                valid_until: now + Duration::days(365),
                usage: CertificateUsage::Authority,
            },
            &root_key,
            None,
        )
        .unwrap();
        let leaf_key = EcPrivateKey::generate(EcCurve::P256);
        let leaf = issue_certificate(
            &CertificateRequest {
                subject: "CN=Test Leaf",
                subject_key: &leaf_key.public_key(),
                valid_from: now - Duration::days(1),
                valid_until: now + Duration::days(30),
                usage: CertificateUsage::Signing,
            },
            &root_key,
            Some("CN=Test Root,C=US"),
        )
        .unwrap();
        (root_key, root, leaf_key, leaf)
    }

    #[test]
    fn leaf_is_signed_by_root() {
        let (root_key, root, leaf_key, leaf) = root_and_leaf();
        assert!(root.is_signed_by(&root_key.public_key()));
        assert!(leaf.is_signed_by(&root_key.public_key()));
        assert!(!leaf.is_signed_by(&leaf_key.public_key()));
        assert_eq!(leaf.issuer(), root.subject());
        assert_eq!(leaf.public_key().unwrap(), leaf_key.public_key());
        assert_eq!(leaf.common_name().as_deref(), Some("Test Leaf"));
    }

    #[test]
    fn pem_roundtrip() {
        let (_, root, _, _) = root_and_leaf();
        let pem = root.to_pem().unwrap();
        assert!(pem.starts_with("-----BEGIN CERTIFICATE-----"));
        assert_eq!(Certificate::from_pem(&pem).unwrap(), root);
    }

    #[test]
    fn validity_window() {
        let (_, _, _, leaf) = root_and_leaf();
        let now = OffsetDateTime::now_utc();
        assert!(leaf.is_valid_at(now));
        assert!(!leaf.is_valid_at(now + Duration::days(60)));
    }
}
