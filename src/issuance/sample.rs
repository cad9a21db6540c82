use anyhow::Result;
use ciborium::Value;
use time::{Duration, OffsetDateTime};

use crate::cbor::TAG_FULL_DATE;
use crate::definitions::keys::{EcCurve, EcPrivateKey, EcPublicKey};
use crate::definitions::validity_info::ValidityInfo;
use crate::document_type::{MDL_DOCTYPE, MDL_NAMESPACE};
use crate::issuance::mdoc::{Mdoc, Namespaces};
use crate::x509::{issue_certificate, Certificate, CertificateRequest, CertificateUsage};

pub const SAMPLE_IACA_SUBJECT: &str = "CN=ACME DMV IACA,C=US";
pub const SAMPLE_SIGNER_SUBJECT: &str = "CN=ACME DMV Document Signer,C=US";

/// A 1x1 PNG; only the header matters to the renderer.
pub const SAMPLE_PORTRAIT: &[u8] = &[
    0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48, 0x44,
    0x52, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x02, 0x00, 0x00, 0x00, 0x90,
    0x77, 0x53, 0xde, 0x00, 0x00, 0x00, 0x0c, 0x49, 0x44, 0x41, 0x54, 0x08, 0xd7, 0x63, 0xf8,
    0xcf, 0xc0, 0x00, 0x00, 0x03, 0x01, 0x01, 0x00, 0x18, 0xdd, 0x8d, 0xb0, 0x00, 0x00, 0x00,
    0x00, 0x49, 0x45, 0x4e, 0x44, 0xae, 0x42, 0x60, 0x82,
];

/// A throwaway issuing authority: an IACA root and a document signer issued by it.
#[derive(Debug, Clone)]
pub struct SampleIssuer {
    pub iaca_key: EcPrivateKey,
    pub iaca_certificate: Certificate,
    pub signer_key: EcPrivateKey,
    pub signer_certificate: Certificate,
}

impl SampleIssuer {
    pub fn generate(now: OffsetDateTime) -> Result<Self> {
        let iaca_key = EcPrivateKey::generate(EcCurve::P256);
        let iaca_certificate = issue_certificate(
            &CertificateRequest {
                subject: SAMPLE_IACA_SUBJECT,
                subject_key: &iaca_key.public_key(),
                valid_from: now - Duration::days(1),
                valid_until: now + Duration::days(5 * 365),
                usage: CertificateUsage::Authority,
            },
            &iaca_key,
            None,
        )?;
        let signer_key = EcPrivateKey::generate(EcCurve::P256);
        let signer_certificate = issue_certificate(
            &CertificateRequest {
                subject: SAMPLE_SIGNER_SUBJECT,
                subject_key: &signer_key.public_key(),
                valid_from: now - Duration::days(1),
                valid_until: now + Duration::days(365),
                usage: CertificateUsage::Signing,
            },
            &iaca_key,
            Some(SAMPLE_IACA_SUBJECT),
        )?;
        Ok(Self {
            iaca_key,
            iaca_certificate,
            signer_key,
            signer_certificate,
        })
    }

    /// Issues the sample driving licence bound to `device_key`, valid for a year from `now`.
    pub fn issue_mdl(&self, device_key: &EcPublicKey, now: OffsetDateTime) -> Result<Mdoc> {
        let now = now.replace_nanosecond(0)?;
        self.issue_mdl_with_validity(
            device_key,
            ValidityInfo {
                signed: now,
                valid_from: now,
                valid_until: now + Duration::days(365),
                expected_update: None,
            },
        )
    }

    pub fn issue_mdl_with_validity(
        &self,
        device_key: &EcPublicKey,
        validity_info: ValidityInfo,
    ) -> Result<Mdoc> {
        Mdoc::builder()
            .doc_type(MDL_DOCTYPE)
            .namespaces(sample_mdl_namespaces())
            .validity_info(validity_info)
            .device_key(device_key.clone())
            .x5chain(vec![self.signer_certificate.clone()])
            .issue(&self.signer_key)
    }
}

fn full_date(date: &str) -> Value {
    Value::Tag(TAG_FULL_DATE, Box::new(Value::Text(date.into())))
}

fn text(s: &str) -> Value {
    Value::Text(s.into())
}

/// Erika Mustermann's driving licence.
pub fn sample_mdl_namespaces() -> Namespaces {
    let driving_privileges = Value::Array(vec![Value::Map(vec![
        (text("vehicle_category_code"), text("B")),
        (text("issue_date"), full_date("2018-08-09")),
        (text("expiry_date"), full_date("2028-09-01")),
    ])]);
    vec![(
        MDL_NAMESPACE.into(),
        vec![
            ("family_name".into(), text("Mustermann")),
            ("given_name".into(), text("Erika")),
            ("birth_date".into(), full_date("1971-09-01")),
            ("issue_date".into(), full_date("2024-01-15")),
            ("expiry_date".into(), full_date("2029-01-15")),
            ("issuing_country".into(), text("US")),
            ("issuing_authority".into(), text("ACME DMV")),
            ("document_number".into(), text("987654321")),
            ("portrait".into(), Value::Bytes(SAMPLE_PORTRAIT.to_vec())),
            ("driving_privileges".into(), driving_privileges),
            ("un_distinguishing_sign".into(), text("USA")),
            ("sex".into(), Value::Integer(2.into())),
            ("height".into(), Value::Integer(175.into())),
            ("age_over_18".into(), Value::Bool(true)),
            ("age_over_21".into(), Value::Bool(true)),
            ("resident_state".into(), text("CA")),
        ],
    )]
}
