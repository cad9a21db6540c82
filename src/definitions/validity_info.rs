use ciborium::Value;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::OffsetDateTime;

use crate::cbor::{self, TAG_TDATE};

/// `ValidityInfo` of a mobile security object.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidityInfo {
    pub signed: OffsetDateTime,
    pub valid_from: OffsetDateTime,
    pub valid_until: OffsetDateTime,
    pub expected_update: Option<OffsetDateTime>,
}

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("When parsing a CBOR map, could not find required field: '{0}'")]
    MissingField(&'static str),
    #[error(transparent)]
    Cbor(#[from] cbor::CborError),
    #[error("Expected to parse a CBOR tag (number 0), received: '{0}'")]
    NotATag(&'static str),
    #[error("Failed to parse date string as rfc3339 date: {0}")]
    UnableToParseDate(#[from] time::error::Parse),
    #[error("Failed to format date: {0}")]
    UnableToFormatDate(#[from] time::error::Format),
}

/// Encodes `t` as a `tdate`: UTC, whole seconds, `Z` suffix.
pub fn datetime_to_cbor(t: OffsetDateTime) -> Result<Value> {
    let text = t
        .to_offset(time::UtcOffset::UTC)
        .format(format_description!(
            "[year]-[month]-[day]T[hour]:[minute]:[second]Z"
        ))?;
    Ok(Value::Tag(TAG_TDATE, Box::new(Value::Text(text))))
}

pub fn cbor_to_datetime(v: &Value) -> Result<OffsetDateTime> {
    match v {
        Value::Tag(TAG_TDATE, inner) => Ok(OffsetDateTime::parse(cbor::as_text(inner)?, &Rfc3339)?),
        other => Err(Error::NotATag(cbor::kind(other))),
    }
}

impl TryFrom<&ValidityInfo> for Value {
    type Error = Error;

    fn try_from(v: &ValidityInfo) -> Result<Value> {
        let mut map = vec![
            (Value::Text("signed".into()), datetime_to_cbor(v.signed)?),
            (Value::Text("validFrom".into()), datetime_to_cbor(v.valid_from)?),
            (Value::Text("validUntil".into()), datetime_to_cbor(v.valid_until)?),
        ];
        if let Some(expected_update) = v.expected_update {
            map.push((
                Value::Text("expectedUpdate".into()),
                datetime_to_cbor(expected_update)?,
            ));
        }
        Ok(Value::Map(map))
    }
}

impl TryFrom<&Value> for ValidityInfo {
    type Error = Error;

    fn try_from(v: &Value) -> Result<ValidityInfo> {
        let map = cbor::as_map(v)?;
        let field = |name: &'static str| {
            cbor::lookup_text(map, name)
                .ok_or(Error::MissingField(name))
                .and_then(cbor_to_datetime)
        };
        Ok(Self {
            signed: field("signed")?,
            valid_from: field("validFrom")?,
            valid_until: field("validUntil")?,
            expected_update: cbor::lookup_text(map, "expectedUpdate")
                .map(cbor_to_datetime)
                .transpose()?,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn dates_are_whole_second_utc() {
        let value = datetime_to_cbor(datetime!(2024-05-01 12:30:45.123 +02:00)).unwrap();
        assert_eq!(
            value,
            Value::Tag(0, Box::new(Value::Text("2024-05-01T10:30:45Z".into())))
        );
        assert_eq!(
            cbor_to_datetime(&value).unwrap(),
            datetime!(2024-05-01 10:30:45 UTC)
        );
    }

    #[test]
    fn expected_update_is_optional() {
        let info = ValidityInfo {
            signed: datetime!(2024-01-01 0:00 UTC),
            valid_from: datetime!(2024-01-01 0:00 UTC),
            valid_until: datetime!(2025-01-01 0:00 UTC),
            expected_update: None,
        };
        let value = Value::try_from(&info).unwrap();
        assert_eq!(cbor::as_map(&value).unwrap().len(), 3);
        assert_eq!(ValidityInfo::try_from(&value).unwrap(), info);
    }
}
