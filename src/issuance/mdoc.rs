use std::collections::{BTreeMap, HashSet};

use anyhow::{anyhow, Result};
use ciborium::Value;
use rand::Rng;

use crate::cbor;
use crate::cose;
use crate::definitions::cose_key::CoseKey;
use crate::definitions::issuer_signed::{
    IssuerNamespaces, IssuerSigned, IssuerSignedItem, IssuerSignedItemBytes,
};
use crate::definitions::keys::{EcPrivateKey, EcPublicKey};
use crate::definitions::mso::{DigestAlgorithm, DigestId, DigestIds, Mso};
use crate::definitions::validity_info::ValidityInfo;
use crate::x509::Certificate;

/// Data elements per namespace, in the order they should be issued.
pub type Namespaces = Vec<(String, Vec<(String, Value)>)>;

/// A signed mdoc as held by the wallet.
#[derive(Debug, Clone)]
pub struct Mdoc {
    pub doc_type: String,
    pub mso: Mso,
    pub issuer_signed: IssuerSigned,
}

#[derive(Debug, Clone, Default)]
pub struct Builder {
    doc_type: Option<String>,
    namespaces: Option<Namespaces>,
    validity_info: Option<ValidityInfo>,
    digest_algorithm: Option<DigestAlgorithm>,
    device_key: Option<EcPublicKey>,
    x5chain: Option<Vec<Certificate>>,
}

impl Mdoc {
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// Directly sign and issue an mdoc.
    pub fn issue(
        doc_type: String,
        namespaces: Namespaces,
        validity_info: ValidityInfo,
        digest_algorithm: DigestAlgorithm,
        device_key: &EcPublicKey,
        x5chain: &[Certificate],
        signer: &EcPrivateKey,
    ) -> Result<Mdoc> {
        let issuer_namespaces = to_issuer_namespaces(namespaces)?;
        let value_digests = digest_namespaces(&issuer_namespaces, digest_algorithm);

        let mso = Mso {
            version: "1.0".to_string(),
            digest_algorithm,
            value_digests,
            device_key: CoseKey::from(device_key),
            doc_type: doc_type.clone(),
            validity_info,
        };

        let mso_bytes = cbor::to_vec(&cbor::embed(&Value::try_from(&mso)?)?)?;
        let issuer_auth = cose::sign1::sign(signer, mso_bytes, x5chain)
            .map_err(|e| anyhow!("error signing cosesign1: {}", e))?;

        Ok(Mdoc {
            doc_type,
            mso,
            issuer_signed: IssuerSigned {
                namespaces: issuer_namespaces,
                issuer_auth,
            },
        })
    }

    /// The issued element values, by namespace and identifier.
    pub fn element(&self, namespace: &str, identifier: &str) -> Option<&Value> {
        self.issuer_signed
            .namespaces
            .iter()
            .find(|(ns, _)| ns == namespace)?
            .1
            .iter()
            .find(|item| item.item.element_identifier == identifier)
            .map(|item| &item.item.element_value)
    }
}

impl Builder {
    /// Set the document type.
    pub fn doc_type(mut self, doc_type: impl Into<String>) -> Self {
        self.doc_type = Some(doc_type.into());
        self
    }

    /// Set the data elements.
    pub fn namespaces(mut self, namespaces: Namespaces) -> Self {
        self.namespaces = Some(namespaces);
        self
    }

    pub fn validity_info(mut self, validity_info: ValidityInfo) -> Self {
        self.validity_info = Some(validity_info);
        self
    }

    /// Set the digest algorithm to be used for hashing the data elements.
    pub fn digest_algorithm(mut self, digest_algorithm: DigestAlgorithm) -> Self {
        self.digest_algorithm = Some(digest_algorithm);
        self
    }

    /// Set the key that this mdoc will be bound to.
    pub fn device_key(mut self, device_key: EcPublicKey) -> Self {
        self.device_key = Some(device_key);
        self
    }

    /// Set the x5chain of the issuing key, leaf first.
    pub fn x5chain(mut self, x5chain: Vec<Certificate>) -> Self {
        self.x5chain = Some(x5chain);
        self
    }

    pub fn issue(self, signer: &EcPrivateKey) -> Result<Mdoc> {
        let doc_type = self
            .doc_type
            .ok_or_else(|| anyhow!("missing parameter: 'doc_type'"))?;
        let namespaces = self
            .namespaces
            .ok_or_else(|| anyhow!("missing parameter: 'namespaces'"))?;
        let validity_info = self
            .validity_info
            .ok_or_else(|| anyhow!("missing parameter: 'validity_info'"))?;
        let digest_algorithm = self.digest_algorithm.unwrap_or(DigestAlgorithm::SHA256);
        let device_key = self
            .device_key
            .ok_or_else(|| anyhow!("missing parameter: 'device_key'"))?;
        let x5chain = self
            .x5chain
            .ok_or_else(|| anyhow!("missing parameter: 'x5chain'"))?;

        Mdoc::issue(
            doc_type,
            namespaces,
            validity_info,
            digest_algorithm,
            &device_key,
            &x5chain,
            signer,
        )
    }
}

fn to_issuer_namespaces(namespaces: Namespaces) -> Result<IssuerNamespaces> {
    if namespaces.is_empty() {
        return Err(anyhow!("at least one namespace required"));
    }
    let mut used_ids = HashSet::new();
    namespaces
        .into_iter()
        .map(|(name, elements)| {
            if elements.is_empty() {
                return Err(anyhow!("at least one element required in each namespace"));
            }
            let items = elements
                .into_iter()
                .map(|(key, value)| {
                    IssuerSignedItemBytes::new(IssuerSignedItem {
                        digest_id: generate_digest_id(&mut used_ids),
                        random: rand::thread_rng().gen::<[u8; 16]>().to_vec(),
                        element_identifier: key,
                        element_value: value,
                    })
                    .map_err(|err| anyhow!("unable to encode IssuerSignedItem as cbor: {}", err))
                })
                .collect::<Result<Vec<_>>>()?;
            Ok((name, items))
        })
        .collect()
}

fn digest_namespaces(
    namespaces: &IssuerNamespaces,
    digest_algorithm: DigestAlgorithm,
) -> BTreeMap<String, DigestIds> {
    namespaces
        .iter()
        .map(|(name, elements)| (name.clone(), digest_namespace(elements, digest_algorithm)))
        .collect()
}

fn digest_namespace(
    elements: &[IssuerSignedItemBytes],
    digest_algorithm: DigestAlgorithm,
) -> DigestIds {
    let mut used_ids = elements.iter().map(|item| item.item.digest_id).collect();

    // Decoy digests hide the number of elements issued.
    let decoys = rand::thread_rng().gen_range(5..10);
    let random_digests: Vec<(DigestId, Vec<u8>)> = (0..decoys)
        .map(|_| {
            let bytes: Vec<u8> = (0..64).map(|_| rand::thread_rng().gen::<u8>()).collect();
            (
                generate_digest_id(&mut used_ids),
                digest_algorithm.digest(&bytes),
            )
        })
        .collect();

    elements
        .iter()
        .map(|item| (item.item.digest_id, item.digest(digest_algorithm)))
        .chain(random_digests)
        .collect()
}

fn generate_digest_id(used_ids: &mut HashSet<DigestId>) -> DigestId {
    loop {
        // Small ids keep the encoded MSO compact.
        let digest_id = rand::thread_rng().gen_range(0..u32::MAX as u64);
        if used_ids.insert(digest_id) {
            return digest_id;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::definitions::keys::EcCurve;
    use crate::x509::test::root_and_leaf;
    use time::{Duration, OffsetDateTime};

    #[test]
    fn issue_minimal_mdoc() {
        let (_, root, signer_key, signer) = root_and_leaf();
        let device_key = EcPrivateKey::generate(EcCurve::P256);
        let now = OffsetDateTime::now_utc().replace_nanosecond(0).unwrap();
        let validity_info = ValidityInfo {
            signed: now,
            valid_from: now,
            valid_until: now + Duration::days(365),
            expected_update: None,
        };

        let mdoc = Mdoc::builder()
            .doc_type("org.iso.18013.5.1.mDL")
            .namespaces(vec![(
                "org.iso.18013.5.1".into(),
                vec![
                    ("family_name".into(), Value::Text("Smith".into())),
                    ("given_name".into(), Value::Text("Alice".into())),
                    ("document_number".into(), Value::Text("I8889680".into())),
                ],
            )])
            .validity_info(validity_info)
            .device_key(device_key.public_key())
            .x5chain(vec![signer, root])
            .issue(&signer_key)
            .expect("failed to issue mdoc");

        let digests = &mdoc.mso.value_digests["org.iso.18013.5.1"];
        assert!(digests.len() >= 3 + 5);
        for item in &mdoc.issuer_signed.namespaces[0].1 {
            assert_eq!(
                digests.get(&item.item.digest_id),
                Some(&item.digest(DigestAlgorithm::SHA256))
            );
        }
        assert_eq!(
            mdoc.element("org.iso.18013.5.1", "given_name"),
            Some(&Value::Text("Alice".into()))
        );

        let sign1 = cose::sign1::parse(&mdoc.issuer_signed.issuer_auth).unwrap();
        assert!(cose::sign1::verify(&sign1, &signer_key.public_key(), None).is_ok());
    }

    #[test]
    fn builder_reports_missing_parameters() {
        let err = Mdoc::builder()
            .doc_type("org.iso.18013.5.1.mDL")
            .issue(&EcPrivateKey::generate(EcCurve::P256))
            .unwrap_err();
        assert_eq!(err.to_string(), "missing parameter: 'namespaces'");
    }
}
