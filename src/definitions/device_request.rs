//! `DeviceRequest` construction and parsing, including reader authentication.
use ciborium::Value;

use crate::cbor::{self, CborError};
use crate::cose;
use crate::definitions::keys::EcPrivateKey;
use crate::x509::Certificate;

pub const DEVICE_REQUEST_VERSION: &str = "1.0";

/// Requested element identifiers with their intent-to-retain flag.
pub type DataElements = Vec<(String, bool)>;
pub type Namespaces = Vec<(String, DataElements)>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Cbor(#[from] CborError),
    #[error("reader authentication: {0}")]
    Cose(#[from] cose::Error),
    #[error("unsupported DeviceRequest version '{0}'")]
    UnsupportedVersion(String),
    #[error("DeviceRequest contains no document requests")]
    NoDocRequests,
}

/// What the reader asks for from a single document type.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ItemsRequest {
    pub doc_type: String,
    pub namespaces: Namespaces,
}

impl From<&ItemsRequest> for Value {
    fn from(request: &ItemsRequest) -> Value {
        let namespaces = request
            .namespaces
            .iter()
            .map(|(namespace, elements)| {
                let elements = elements
                    .iter()
                    .map(|(id, retain)| (Value::Text(id.clone()), Value::Bool(*retain)))
                    .collect();
                (Value::Text(namespace.clone()), Value::Map(elements))
            })
            .collect();
        Value::Map(vec![
            (Value::Text("docType".into()), Value::Text(request.doc_type.clone())),
            (Value::Text("nameSpaces".into()), Value::Map(namespaces)),
        ])
    }
}

impl TryFrom<&Value> for ItemsRequest {
    type Error = CborError;

    fn try_from(value: &Value) -> Result<Self, CborError> {
        let map = cbor::as_map(value)?;
        let doc_type = cbor::as_text(cbor::require_text(map, "docType")?)?.to_string();
        let namespaces = cbor::as_map(cbor::require_text(map, "nameSpaces")?)?
            .iter()
            .map(|(namespace, elements)| {
                let elements = cbor::as_map(elements)?
                    .iter()
                    .map(|(id, retain)| match retain {
                        Value::Bool(retain) => Ok((cbor::as_text(id)?.to_string(), *retain)),
                        other => Err(CborError::UnexpectedItem(cbor::kind(other), "bool")),
                    })
                    .collect::<Result<DataElements, _>>()?;
                Ok((cbor::as_text(namespace)?.to_string(), elements))
            })
            .collect::<Result<Namespaces, CborError>>()?;
        Ok(Self {
            doc_type,
            namespaces,
        })
    }
}

impl ItemsRequest {
    /// Whether `element` in `namespace` was asked for.
    pub fn requests(&self, namespace: &str, element: &str) -> bool {
        self.namespaces
            .iter()
            .filter(|(ns, _)| ns == namespace)
            .flat_map(|(_, elements)| elements.iter())
            .any(|(id, _)| id == element)
    }
}

/// A document request as received, with the outcome of reader authentication.
#[derive(Clone, Debug)]
pub struct DocRequest {
    pub items_request: ItemsRequest,
    /// `None` when the request was not signed.
    pub reader_authenticated: Option<bool>,
    /// Reader certificate chain from the `readerAuth` x5chain, leaf first.
    pub reader_certificate_chain: Vec<Certificate>,
}

/// The `ReaderAuthentication` structure, encoded as `#6.24(bstr .cbor ...)`.
///
/// `items_request_bytes` is the `#6.24` wrapped `ItemsRequest` exactly as sent.
pub fn reader_authentication_bytes(
    transcript_bytes: &[u8],
    items_request_bytes: &Value,
) -> Result<Vec<u8>, CborError> {
    let transcript: Value = cbor::from_slice(transcript_bytes)?;
    let reader_authentication = Value::Array(vec![
        Value::Text("ReaderAuthentication".into()),
        transcript,
        items_request_bytes.clone(),
    ]);
    cbor::to_vec(&cbor::embed(&reader_authentication)?)
}

/// Builds an encoded `DeviceRequest`.
///
/// When `reader_key` is given every document request is signed with it and carries
/// `reader_chain` in its x5chain header.
pub fn generate_device_request(
    requests: &[ItemsRequest],
    transcript_bytes: &[u8],
    reader_key: Option<&EcPrivateKey>,
    reader_chain: &[Certificate],
) -> Result<Vec<u8>, Error> {
    let doc_requests = requests
        .iter()
        .map(|request| {
            let items_request_bytes = cbor::embed(&Value::from(request))?;
            let mut doc_request = vec![(
                Value::Text("itemsRequest".into()),
                items_request_bytes.clone(),
            )];
            if let Some(key) = reader_key {
                let payload = reader_authentication_bytes(transcript_bytes, &items_request_bytes)?;
                doc_request.push((
                    Value::Text("readerAuth".into()),
                    cose::sign1::sign_detached(key, &payload, reader_chain)?,
                ));
            }
            Ok(Value::Map(doc_request))
        })
        .collect::<Result<Vec<_>, Error>>()?;

    Ok(cbor::to_vec(&Value::Map(vec![
        (
            Value::Text("version".into()),
            Value::Text(DEVICE_REQUEST_VERSION.into()),
        ),
        (Value::Text("docRequests".into()), Value::Array(doc_requests)),
    ]))?)
}

/// Parses an encoded `DeviceRequest` and checks any reader authentication against the
/// session transcript.
pub fn parse_device_request(
    bytes: &[u8],
    transcript_bytes: &[u8],
) -> Result<Vec<DocRequest>, Error> {
    let value: Value = cbor::from_slice(bytes)?;
    let map = cbor::as_map(&value)?;
    let version = cbor::as_text(cbor::require_text(map, "version")?)?;
    if !version.starts_with("1.") {
        return Err(Error::UnsupportedVersion(version.to_string()));
    }
    let doc_requests = cbor::as_array(cbor::require_text(map, "docRequests")?)?;
    if doc_requests.is_empty() {
        return Err(Error::NoDocRequests);
    }
    doc_requests
        .iter()
        .map(|doc_request| parse_doc_request(doc_request, transcript_bytes))
        .collect()
}

fn parse_doc_request(value: &Value, transcript_bytes: &[u8]) -> Result<DocRequest, Error> {
    let map = cbor::as_map(value)?;
    let items_request_bytes = cbor::require_text(map, "itemsRequest")?;
    let items_request =
        ItemsRequest::try_from(&cbor::from_slice::<Value>(cbor::untag24(items_request_bytes)?)?)?;

    let Some(reader_auth) = cbor::lookup_text(map, "readerAuth") else {
        return Ok(DocRequest {
            items_request,
            reader_authenticated: None,
            reader_certificate_chain: vec![],
        });
    };
    let sign1 = cose::sign1::parse(reader_auth)?;
    let chain = cose::sign1::x5chain(&sign1)?;
    let payload = reader_authentication_bytes(transcript_bytes, items_request_bytes)?;
    let authenticated = match chain.first().map(Certificate::public_key) {
        Some(Ok(key)) => cose::sign1::verify(&sign1, &key, Some(&payload)).is_ok(),
        Some(Err(e)) => {
            tracing::warn!("reader certificate has an unusable key: {e}");
            false
        }
        None => false,
    };
    if !authenticated {
        tracing::warn!("reader authentication failed for {}", items_request.doc_type);
    }
    Ok(DocRequest {
        items_request,
        reader_authenticated: Some(authenticated),
        reader_certificate_chain: chain,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::definitions::keys::EcCurve;
    use crate::definitions::session::{session_transcript_bytes, Handover};
    use crate::x509::test::root_and_leaf;

    const ITEMS_REQUEST_HEX: &str = "a267646f6354797065756f72672e69736f2e31383031332e352e312e6d444c6a6e616d65537061636573a1716f72672e69736f2e31383031332e352e31a36b66616d696c795f6e616d65f46a676976656e5f6e616d65f46f646f63756d656e745f6e756d626572f4";

    fn request() -> ItemsRequest {
        ItemsRequest {
            doc_type: "org.iso.18013.5.1.mDL".into(),
            namespaces: vec![(
                "org.iso.18013.5.1".into(),
                vec![
                    ("family_name".into(), false),
                    ("given_name".into(), false),
                    ("document_number".into(), false),
                ],
            )],
        }
    }

    #[test]
    fn items_request_encoding() {
        let bytes = cbor::to_vec(&Value::from(&request())).unwrap();
        assert_eq!(hex::encode(&bytes), ITEMS_REQUEST_HEX);
        let parsed =
            ItemsRequest::try_from(&cbor::from_slice::<Value>(&bytes).unwrap()).unwrap();
        assert_eq!(parsed, request());
        assert!(parsed.requests("org.iso.18013.5.1", "given_name"));
        assert!(!parsed.requests("org.iso.18013.5.1", "portrait"));
    }

    #[test]
    fn reader_auth_is_bound_to_transcript() {
        let (_, root, reader_key, reader_cert) = root_and_leaf();
        let device_key = EcPrivateKey::generate(EcCurve::P256);
        let transcript =
            session_transcript_bytes(b"engagement", &device_key.public_key(), &Handover::Qr)
                .unwrap();
        let bytes = generate_device_request(
            &[request()],
            &transcript,
            Some(&reader_key),
            &[reader_cert.clone(), root.clone()],
        )
        .unwrap();

        let parsed = parse_device_request(&bytes, &transcript).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].reader_authenticated, Some(true));
        assert_eq!(parsed[0].reader_certificate_chain, vec![reader_cert, root]);

        let other =
            session_transcript_bytes(b"other", &device_key.public_key(), &Handover::Qr).unwrap();
        let parsed = parse_device_request(&bytes, &other).unwrap();
        assert_eq!(parsed[0].reader_authenticated, Some(false));
    }

    #[test]
    fn unsigned_request() {
        let bytes = generate_device_request(&[request()], b"\xf6", None, &[]).unwrap();
        let parsed = parse_device_request(&bytes, b"\xf6").unwrap();
        assert_eq!(parsed[0].reader_authenticated, None);
        assert_eq!(parsed[0].items_request, request());
    }
}
