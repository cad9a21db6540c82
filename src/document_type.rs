//! Document types known to the reader: display names and value semantics of data elements,
//! and the canned requests offered for each type.
use ciborium::Value;

use crate::cbor::{self, TAG_FULL_DATE, TAG_TDATE};
use crate::definitions::device_request::ItemsRequest;
use crate::definitions::validity_info::cbor_to_datetime;
use crate::presentation::render::format_time;

pub const MDL_DOCTYPE: &str = "org.iso.18013.5.1.mDL";
pub const MDL_NAMESPACE: &str = "org.iso.18013.5.1";
pub const AAMVA_NAMESPACE: &str = "org.iso.18013.5.1.aamva";

/// How a data element's value is interpreted for display.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttributeType {
    String,
    Number,
    Date,
    DateTime,
    Boolean,
    Picture,
    IntegerOptions(Vec<(i64, &'static str)>),
    StringOptions(Vec<(&'static str, &'static str)>),
    ComplexType,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MdocDataElement {
    pub identifier: &'static str,
    pub display_name: &'static str,
    pub description: &'static str,
    pub attribute_type: AttributeType,
    pub mandatory: bool,
}

impl MdocDataElement {
    /// Type aware rendering of `value`, falling back to CBOR diagnostic notation when the value
    /// does not have the expected shape.
    pub fn render_value(&self, value: &Value) -> String {
        let rendered = match (&self.attribute_type, value) {
            (AttributeType::String, Value::Text(text)) => Some(text.clone()),
            (AttributeType::Number, Value::Integer(i)) => Some(i128::from(*i).to_string()),
            (AttributeType::Number, Value::Float(f)) => Some(f.to_string()),
            (AttributeType::Boolean, Value::Bool(b)) => {
                Some(if *b { "True" } else { "False" }.to_string())
            }
            (AttributeType::Picture, Value::Bytes(bytes)) => {
                Some(format!("Image, {} bytes", bytes.len()))
            }
            (AttributeType::Date, Value::Tag(TAG_FULL_DATE, inner)) => {
                cbor::as_text(inner).ok().map(str::to_string)
            }
            (AttributeType::Date, Value::Text(text)) => Some(text.clone()),
            (AttributeType::Date | AttributeType::DateTime, Value::Tag(TAG_TDATE, _)) => {
                cbor_to_datetime(value).ok().map(|t| match self.attribute_type {
                    AttributeType::Date => format_time(t)[..10].to_string(),
                    _ => format_time(t),
                })
            }
            (AttributeType::IntegerOptions(options), Value::Integer(i)) => {
                let i = i128::from(*i);
                Some(
                    options
                        .iter()
                        .find(|(option, _)| i128::from(*option) == i)
                        .map(|(_, name)| name.to_string())
                        .unwrap_or_else(|| i.to_string()),
                )
            }
            (AttributeType::StringOptions(options), Value::Text(text)) => Some(
                options
                    .iter()
                    .find(|(option, _)| option == text)
                    .map(|(_, name)| name.to_string())
                    .unwrap_or_else(|| text.clone()),
            ),
            _ => None,
        };
        rendered.unwrap_or_else(|| cbor::diagnostic(value))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MdocNamespace {
    pub namespace: &'static str,
    pub data_elements: Vec<MdocDataElement>,
}

impl MdocNamespace {
    pub fn data_element(&self, identifier: &str) -> Option<&MdocDataElement> {
        self.data_elements
            .iter()
            .find(|element| element.identifier == identifier)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MdocDocumentType {
    pub doc_type: &'static str,
    pub namespaces: Vec<MdocNamespace>,
}

impl MdocDocumentType {
    pub fn namespace(&self, namespace: &str) -> Option<&MdocNamespace> {
        self.namespaces.iter().find(|ns| ns.namespace == namespace)
    }
}

/// A pre-defined request used instead of interactive element selection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CannedRequest {
    pub id: &'static str,
    pub display_name: &'static str,
    /// Element identifiers with intent to retain, per namespace.
    pub namespaces: Vec<(&'static str, Vec<(&'static str, bool)>)>,
}

impl CannedRequest {
    pub fn to_items_request(&self, doc_type: &str) -> ItemsRequest {
        ItemsRequest {
            doc_type: doc_type.to_string(),
            namespaces: self
                .namespaces
                .iter()
                .map(|(namespace, elements)| {
                    (
                        namespace.to_string(),
                        elements
                            .iter()
                            .map(|(id, retain)| (id.to_string(), *retain))
                            .collect(),
                    )
                })
                .collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DocumentType {
    pub display_name: &'static str,
    pub mdoc: MdocDocumentType,
    pub canned_requests: Vec<CannedRequest>,
}

impl DocumentType {
    /// Finds a canned request by id or display name.
    pub fn canned_request(&self, name: &str) -> Option<&CannedRequest> {
        self.canned_requests
            .iter()
            .find(|request| request.id == name || request.display_name == name)
    }
}

#[derive(Clone, Debug, Default)]
pub struct DocumentTypeRepository {
    document_types: Vec<DocumentType>,
}

impl DocumentTypeRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// A repository knowing the mobile driving licence.
    pub fn with_defaults() -> Self {
        let mut repository = Self::new();
        repository.add_document_type(driving_license());
        repository
    }

    pub fn add_document_type(&mut self, document_type: DocumentType) {
        self.document_types.push(document_type);
    }

    pub fn document_types(&self) -> &[DocumentType] {
        &self.document_types
    }

    pub fn for_mdoc(&self, doc_type: &str) -> Option<&DocumentType> {
        self.document_types
            .iter()
            .find(|document_type| document_type.mdoc.doc_type == doc_type)
    }

    pub fn for_mdoc_namespace(&self, namespace: &str) -> Option<&DocumentType> {
        self.document_types
            .iter()
            .find(|document_type| document_type.mdoc.namespace(namespace).is_some())
    }
}

fn element(
    identifier: &'static str,
    display_name: &'static str,
    description: &'static str,
    attribute_type: AttributeType,
    mandatory: bool,
) -> MdocDataElement {
    MdocDataElement {
        identifier,
        display_name,
        description,
        attribute_type,
        mandatory,
    }
}

fn sex_options() -> AttributeType {
    AttributeType::IntegerOptions(vec![
        (0, "Not known"),
        (1, "Male"),
        (2, "Female"),
        (9, "Not applicable"),
    ])
}

fn mdl_namespace() -> MdocNamespace {
    use AttributeType::*;
    let eye_colours = StringOptions(vec![
        ("black", "Black"),
        ("blue", "Blue"),
        ("brown", "Brown"),
        ("dichromatic", "Dichromatic"),
        ("grey", "Grey"),
        ("green", "Green"),
        ("hazel", "Hazel"),
        ("maroon", "Maroon"),
        ("pink", "Pink"),
        ("unknown", "Unknown"),
    ]);
    let hair_colours = StringOptions(vec![
        ("bald", "Bald"),
        ("black", "Black"),
        ("blond", "Blond"),
        ("brown", "Brown"),
        ("grey", "Grey"),
        ("red", "Red"),
        ("auburn", "Auburn"),
        ("sandy", "Sandy"),
        ("white", "White"),
        ("unknown", "Unknown"),
    ]);
    MdocNamespace {
        namespace: MDL_NAMESPACE,
        data_elements: vec![
            element("family_name", "Family Name", "Last name, surname, or primary identifier, of the mDL holder.", String, true),
            element("given_name", "Given Names", "First name(s), other name(s), or secondary identifier, of the mDL holder", String, true),
            element("birth_date", "Date of Birth", "Day, month and year on which the mDL holder was born. If unknown, approximate date of birth", Date, true),
            element("issue_date", "Date of Issue", "Date when mDL was issued", Date, true),
            element("expiry_date", "Date of Expiry", "Date when mDL expires", Date, true),
            element("issuing_country", "Issuing Country", "Alpha-2 country code, as defined in ISO 3166-1, of the issuing authority's country or territory", String, true),
            element("issuing_authority", "Issuing Authority", "Issuing authority name.", String, true),
            element("document_number", "License Number", "The number assigned or calculated by the issuing authority.", String, true),
            element("portrait", "Photo of Holder", "A reproduction of the mDL holder's portrait.", Picture, true),
            element("driving_privileges", "Driving Privileges", "Driving privileges of the mDL holder", ComplexType, true),
            element("un_distinguishing_sign", "UN Distinguishing Sign", "Distinguishing sign of the issuing country", String, true),
            element("administrative_number", "Administrative Number", "An audit control number assigned by the issuing authority", String, false),
            element("sex", "Sex", "mDL holder's sex using values as defined in ISO/IEC 5218", sex_options(), false),
            element("height", "Height", "mDL holder's height in centimetres", Number, false),
            element("weight", "Weight", "mDL holder's weight in kilograms", Number, false),
            element("eye_colour", "Eye Color", "mDL holder's eye colour", eye_colours, false),
            element("hair_colour", "Hair Color", "mDL holder's hair colour", hair_colours, false),
            element("birth_place", "Place of Birth", "Country and municipality or state/province where the mDL holder was born", String, false),
            element("resident_address", "Resident Address", "The place where the mDL holder resides and/or may be contacted", String, false),
            element("portrait_capture_date", "Portrait Image Timestamp", "Date when portrait was taken", DateTime, false),
            element("age_in_years", "Age in Years", "The age of the mDL holder", Number, false),
            element("age_birth_year", "Year of Birth", "The year when the mDL holder was born", Number, false),
            element("age_over_18", "Older Than 18 Years", "Indication whether the mDL holder is as old or older than 18", Boolean, false),
            element("age_over_21", "Older Than 21 Years", "Indication whether the mDL holder is as old or older than 21", Boolean, false),
            element("issuing_jurisdiction", "Issuing Jurisdiction", "Country subdivision code of the jurisdiction that issued the mDL", String, false),
            element("nationality", "Nationality", "Nationality of the mDL holder", String, false),
            element("resident_city", "Resident City", "The city where the mDL holder lives", String, false),
            element("resident_state", "Resident State", "The state/province/district where the mDL holder lives", String, false),
            element("resident_postal_code", "Resident Postal Code", "The postal code of the mDL holder", String, false),
            element("resident_country", "Resident Country", "The country where the mDL holder lives", String, false),
            element("family_name_national_character", "Family Name National Characters", "The family name of the mDL holder", String, false),
            element("given_name_national_character", "Given Name National Characters", "The given name of the mDL holder", String, false),
            element("signature_usual_mark", "Signature / Usual Mark", "Image of the signature or usual mark of the mDL holder", Picture, false),
        ],
    }
}

fn aamva_namespace() -> MdocNamespace {
    use AttributeType::*;
    MdocNamespace {
        namespace: AAMVA_NAMESPACE,
        data_elements: vec![
            element("DHS_compliance", "Compliance Type", "DHS compliance status", StringOptions(vec![("F", "Fully compliant"), ("N", "Non-compliant")]), false),
            element("EDL_credential", "EDL Indicator", "Present if the credential is an EDL", IntegerOptions(vec![(1, "Driver's license"), (2, "Identification card")]), false),
            element("sex", "Sex", "mDL holder's sex", sex_options(), false),
        ],
    }
}

/// The ISO/IEC 18013-5 mobile driving licence.
pub fn driving_license() -> DocumentType {
    let mdl = mdl_namespace();
    let full: Vec<(&'static str, bool)> = mdl
        .data_elements
        .iter()
        .map(|element| (element.identifier, false))
        .collect();
    DocumentType {
        display_name: "Driving License",
        mdoc: MdocDocumentType {
            doc_type: MDL_DOCTYPE,
            namespaces: vec![mdl, aamva_namespace()],
        },
        canned_requests: vec![
            CannedRequest {
                id: "us-transportation",
                display_name: "US Transportation",
                namespaces: vec![
                    (
                        MDL_NAMESPACE,
                        vec![
                            ("sex", false),
                            ("portrait", false),
                            ("given_name", false),
                            ("issue_date", false),
                            ("expiry_date", false),
                            ("family_name", false),
                            ("document_number", false),
                            ("issuing_authority", false),
                        ],
                    ),
                    (
                        AAMVA_NAMESPACE,
                        vec![("DHS_compliance", false), ("EDL_credential", false)],
                    ),
                ],
            },
            CannedRequest {
                id: "age_over_18",
                display_name: "Age Over 18",
                namespaces: vec![(MDL_NAMESPACE, vec![("age_over_18", false), ("portrait", false)])],
            },
            CannedRequest {
                id: "age_over_21",
                display_name: "Age Over 21",
                namespaces: vec![(MDL_NAMESPACE, vec![("age_over_21", false), ("portrait", false)])],
            },
            CannedRequest {
                id: "full",
                display_name: "Full mDL",
                namespaces: vec![(MDL_NAMESPACE, full)],
            },
        ],
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn lookup_by_doc_type_and_namespace() {
        let repository = DocumentTypeRepository::with_defaults();
        assert!(repository.for_mdoc(MDL_DOCTYPE).is_some());
        assert!(repository.for_mdoc("org.example.unknown").is_none());
        let by_namespace = repository.for_mdoc_namespace(AAMVA_NAMESPACE).unwrap();
        assert_eq!(by_namespace.display_name, "Driving License");
    }

    #[test]
    fn canned_requests() {
        let mdl = driving_license();
        let names: Vec<_> = mdl.canned_requests.iter().map(|r| r.display_name).collect();
        assert_eq!(names, ["US Transportation", "Age Over 18", "Age Over 21", "Full mDL"]);
        let request = mdl.canned_request("age_over_21").unwrap().to_items_request(MDL_DOCTYPE);
        assert!(request.requests(MDL_NAMESPACE, "age_over_21"));
        assert_eq!(mdl.canned_request("Full mDL").unwrap().namespaces[0].1.len(), 33);
    }

    #[test]
    fn type_aware_rendering() {
        let mdl = mdl_namespace();
        let render = |id: &str, value: Value| mdl.data_element(id).unwrap().render_value(&value);
        assert_eq!(render("sex", Value::Integer(2.into())), "Female");
        assert_eq!(render("sex", Value::Integer(7.into())), "7");
        assert_eq!(render("age_over_18", Value::Bool(true)), "True");
        assert_eq!(render("eye_colour", Value::Text("hazel".into())), "Hazel");
        assert_eq!(render("portrait", Value::Bytes(vec![0; 42])), "Image, 42 bytes");
        assert_eq!(
            render(
                "birth_date",
                Value::Tag(TAG_FULL_DATE, Box::new(Value::Text("1971-09-01".into())))
            ),
            "1971-09-01"
        );
        assert_eq!(render("family_name", Value::Integer(3.into())), "3");
        assert_eq!(
            render("driving_privileges", Value::Array(vec![])),
            "[]"
        );
    }
}
