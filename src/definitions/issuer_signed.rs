use ciborium::Value;

use crate::cbor;
use crate::definitions::mso::DigestAlgorithm;

/// A single issuer signed data element.
#[derive(Clone, Debug, PartialEq)]
pub struct IssuerSignedItem {
    pub digest_id: u64,
    pub random: Vec<u8>,
    pub element_identifier: String,
    pub element_value: Value,
}

impl From<&IssuerSignedItem> for Value {
    fn from(item: &IssuerSignedItem) -> Value {
        Value::Map(vec![
            (Value::Text("digestID".into()), Value::Integer(item.digest_id.into())),
            (Value::Text("random".into()), Value::Bytes(item.random.clone())),
            (
                Value::Text("elementIdentifier".into()),
                Value::Text(item.element_identifier.clone()),
            ),
            (Value::Text("elementValue".into()), item.element_value.clone()),
        ])
    }
}

impl TryFrom<&Value> for IssuerSignedItem {
    type Error = cbor::CborError;

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        let map = cbor::as_map(value)?;
        Ok(Self {
            digest_id: cbor::as_u64(cbor::require_text(map, "digestID")?)?,
            random: cbor::as_bytes(cbor::require_text(map, "random")?)?.to_vec(),
            element_identifier: cbor::as_text(cbor::require_text(map, "elementIdentifier")?)?
                .to_string(),
            element_value: cbor::require_text(map, "elementValue")?.clone(),
        })
    }
}

/// `IssuerSignedItemBytes` as it appears on the wire, kept verbatim so digests can be
/// recomputed over the exact bytes the issuer hashed.
#[derive(Clone, Debug, PartialEq)]
pub struct IssuerSignedItemBytes {
    pub item: IssuerSignedItem,
    /// The encoded `#6.24` item.
    pub tagged_bytes: Vec<u8>,
}

impl IssuerSignedItemBytes {
    pub fn new(item: IssuerSignedItem) -> Result<Self, cbor::CborError> {
        let tagged_bytes = cbor::to_vec(&cbor::embed(&Value::from(&item))?)?;
        Ok(Self { item, tagged_bytes })
    }

    pub fn from_value(value: &Value) -> Result<Self, cbor::CborError> {
        let embedded: Value = cbor::from_slice(cbor::untag24(value)?)?;
        Ok(Self {
            item: IssuerSignedItem::try_from(&embedded)?,
            tagged_bytes: cbor::to_vec(value)?,
        })
    }

    pub fn to_value(&self) -> Result<Value, cbor::CborError> {
        cbor::from_slice(&self.tagged_bytes)
    }

    /// Digest over the encoded `#6.24` item, as referenced from the MSO.
    pub fn digest(&self, algorithm: DigestAlgorithm) -> Vec<u8> {
        algorithm.digest(&self.tagged_bytes)
    }
}

/// Issuer signed namespaces in issuer order.
pub type IssuerNamespaces = Vec<(String, Vec<IssuerSignedItemBytes>)>;

/// `IssuerSigned`: the namespaces and the COSE_Sign1 over the mobile security object.
#[derive(Clone, Debug, PartialEq)]
pub struct IssuerSigned {
    pub namespaces: IssuerNamespaces,
    pub issuer_auth: Value,
}

impl IssuerSigned {
    pub fn to_value(&self) -> Result<Value, cbor::CborError> {
        let mut namespaces = Vec::with_capacity(self.namespaces.len());
        for (namespace, items) in &self.namespaces {
            let items = items
                .iter()
                .map(IssuerSignedItemBytes::to_value)
                .collect::<Result<Vec<_>, _>>()?;
            namespaces.push((Value::Text(namespace.clone()), Value::Array(items)));
        }
        Ok(Value::Map(vec![
            (Value::Text("nameSpaces".into()), Value::Map(namespaces)),
            (Value::Text("issuerAuth".into()), self.issuer_auth.clone()),
        ]))
    }

    pub fn from_value(value: &Value) -> Result<Self, cbor::CborError> {
        let map = cbor::as_map(value)?;
        let mut namespaces = vec![];
        if let Some(entries) = cbor::lookup_text(map, "nameSpaces") {
            for (namespace, items) in cbor::as_map(entries)? {
                let items = cbor::as_array(items)?
                    .iter()
                    .map(IssuerSignedItemBytes::from_value)
                    .collect::<Result<Vec<_>, _>>()?;
                namespaces.push((cbor::as_text(namespace)?.to_string(), items));
            }
        }
        Ok(Self {
            namespaces,
            issuer_auth: cbor::require_text(map, "issuerAuth")?.clone(),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use sha2::{Digest, Sha256};

    #[test]
    fn digest_covers_tagged_encoding() {
        let item = IssuerSignedItemBytes::new(IssuerSignedItem {
            digest_id: 3,
            random: vec![7; 16],
            element_identifier: "family_name".into(),
            element_value: Value::Text("Mustermann".into()),
        })
        .unwrap();
        assert_eq!(&item.tagged_bytes[..2], &[0xd8, 0x18]);
        let reparsed = IssuerSignedItemBytes::from_value(&item.to_value().unwrap()).unwrap();
        assert_eq!(reparsed, item);
        assert_eq!(reparsed.digest(DigestAlgorithm::SHA256), Sha256::digest(&item.tagged_bytes).to_vec());
    }
}
