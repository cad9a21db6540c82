//! Turns a received document into a flat, displayable list of key/value pairs, annotated with
//! the outcome of the trust and authentication checks.
use ciborium::Value;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

use crate::cbor;
use crate::definitions::device_response::ResponseDocument;
use crate::document_type::{AttributeType, DocumentTypeRepository, MdocNamespace};
use crate::presentation::trust::TrustManager;

pub const DOCUMENT_FORMAT: &str = "ISO mdoc (ISO/IEC 18013-5:2021)";

/// Image formats recognised in picture data elements.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum_macros::Display)]
pub enum ImageFormat {
    Jpeg,
    Jpeg2000,
    Png,
}

/// An embedded picture, checked for a known image header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedImage {
    pub format: ImageFormat,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub data: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("not a JPEG, JPEG 2000 or PNG image")]
    UnknownFormat,
    #[error("truncated {0} image")]
    Truncated(ImageFormat),
}

const PNG_SIGNATURE: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];
const JP2_SIGNATURE: &[u8] = &[0x00, 0x00, 0x00, 0x0c, b'j', b'P', 0x20, 0x20];

impl DecodedImage {
    pub fn decode(data: &[u8]) -> Result<Self, ImageError> {
        let (format, dimensions) = if data.starts_with(PNG_SIGNATURE) {
            // IHDR is always the first chunk.
            let ihdr = data
                .get(16..24)
                .ok_or(ImageError::Truncated(ImageFormat::Png))?;
            let width = u32::from_be_bytes([ihdr[0], ihdr[1], ihdr[2], ihdr[3]]);
            let height = u32::from_be_bytes([ihdr[4], ihdr[5], ihdr[6], ihdr[7]]);
            (ImageFormat::Png, Some((width, height)))
        } else if data.starts_with(&[0xff, 0xd8, 0xff]) {
            (ImageFormat::Jpeg, None)
        } else if data.starts_with(JP2_SIGNATURE) || data.starts_with(&[0xff, 0x4f, 0xff, 0x51]) {
            (ImageFormat::Jpeg2000, None)
        } else {
            return Err(ImageError::UnknownFormat);
        };
        Ok(Self {
            format,
            width: dimensions.map(|(w, _)| w),
            height: dimensions.map(|(_, h)| h),
            data: data.to_vec(),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DocumentKeyValuePair {
    pub key: String,
    pub text_value: String,
    pub image: Option<DecodedImage>,
}

impl DocumentKeyValuePair {
    fn new(key: impl Into<String>, text_value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            text_value: text_value.into(),
            image: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RenderedDocument {
    pub info_messages: Vec<String>,
    pub warning_messages: Vec<String>,
    pub key_value_pairs: Vec<DocumentKeyValuePair>,
}

/// Formats `t` as `YYYY-MM-DD HH:MM:SS` in the local offset, or in UTC when the local offset
/// cannot be determined.
pub fn format_time(t: OffsetDateTime) -> String {
    let offset = UtcOffset::local_offset_at(t).unwrap_or(UtcOffset::UTC);
    t.to_offset(offset)
        .format(format_description!(
            "[year]-[month]-[day] [hour]:[minute]:[second]"
        ))
        .unwrap_or_else(|_| t.to_string())
}

/// Renders `document` for display.
pub fn render_document(
    document: &ResponseDocument,
    repository: &DocumentTypeRepository,
    trust_manager: &TrustManager,
    now: OffsetDateTime,
) -> RenderedDocument {
    let mut rendered = RenderedDocument::default();

    if document.issuer_signed_authenticated {
        let trust = trust_manager.verify(&document.issuer_certificate_chain, now);
        match trust.trust_points.first() {
            Some(trust_point) if trust.is_trusted => {
                rendered.info_messages.push(match &trust_point.display_name {
                    Some(name) => format!("Issuer '{name}' is in a trust list"),
                    None => format!(
                        "Issuer with name '{}' is in a trust list",
                        trust_point.certificate.subject()
                    ),
                });
            }
            _ => {
                if let Some(error) = &trust.error {
                    tracing::info!("issuer not trusted: {error}");
                }
                rendered
                    .warning_messages
                    .push("Issuer is not in trust list".into());
            }
        }
    }
    if !document.device_signed_authenticated {
        rendered
            .warning_messages
            .push("Device Authentication failed".into());
    }
    if !document.issuer_signed_authenticated {
        rendered
            .warning_messages
            .push("Issuer Authentication failed".into());
    }
    if document.num_issuer_entry_digest_match_failures > 0 {
        rendered
            .warning_messages
            .push("One or more issuer provided data elements failed to authenticate".into());
    }
    let validity = &document.validity_info;
    if now < validity.valid_from || now > validity.valid_until {
        rendered
            .warning_messages
            .push("Document information is not valid at this point in time.".into());
    }

    let pairs = &mut rendered.key_value_pairs;
    pairs.push(DocumentKeyValuePair::new("Type", DOCUMENT_FORMAT));
    pairs.push(DocumentKeyValuePair::new("DocType", &document.doc_type));
    pairs.push(DocumentKeyValuePair::new(
        "Valid From",
        format_time(validity.valid_from),
    ));
    pairs.push(DocumentKeyValuePair::new(
        "Valid Until",
        format_time(validity.valid_until),
    ));
    pairs.push(DocumentKeyValuePair::new(
        "Signed At",
        format_time(validity.signed),
    ));
    pairs.push(DocumentKeyValuePair::new(
        "Expected Update",
        validity
            .expected_update
            .map(format_time)
            .unwrap_or_else(|| "Not Set".into()),
    ));

    let mdoc_type = repository
        .for_mdoc(&document.doc_type)
        .map(|document_type| &document_type.mdoc);
    for namespace in document.issuer_namespaces() {
        let mdoc_namespace = match mdoc_type {
            Some(mdoc_type) => mdoc_type.namespace(namespace),
            None => repository
                .for_mdoc_namespace(namespace)
                .and_then(|document_type| document_type.mdoc.namespace(namespace)),
        };
        pairs.push(DocumentKeyValuePair::new("Namespace", namespace));
        for name in document.issuer_entry_names(namespace) {
            let Some(data) = document.issuer_entry_data(namespace, name) else {
                continue;
            };
            pairs.push(render_element(namespace, name, data, mdoc_namespace));
        }
    }
    rendered
}

fn render_element(
    namespace: &str,
    name: &str,
    data: &[u8],
    mdoc_namespace: Option<&MdocNamespace>,
) -> DocumentKeyValuePair {
    let value: Value = match cbor::from_slice(data) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!("undecodable value for {namespace}/{name}: {e}");
            return DocumentKeyValuePair::new(name, format!("<{} bytes>", data.len()));
        }
    };
    let Some(element) = mdoc_namespace.and_then(|ns| ns.data_element(name)) else {
        return DocumentKeyValuePair::new(name, cbor::diagnostic(&value));
    };
    let image = match (&element.attribute_type, &value) {
        (AttributeType::Picture, Value::Bytes(bytes)) => DecodedImage::decode(bytes)
            .map_err(|e| {
                tracing::warn!("Error decoding image for data element {name} in namespace {namespace}: {e}")
            })
            .ok(),
        _ => None,
    };
    DocumentKeyValuePair {
        key: element.display_name.to_string(),
        text_value: element.render_value(&value),
        image,
    }
}
