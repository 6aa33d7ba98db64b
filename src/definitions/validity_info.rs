use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::cbor::CborValue;

/// The signing and validity window of an MSO.
///
/// Timestamps are carried on the wire as tag 0 (RFC 3339 text) date-times.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(try_from = "CborValue", into = "CborValue")]
pub struct ValidityInfo {
    pub signed: OffsetDateTime,
    pub valid_from: OffsetDateTime,
    pub valid_until: OffsetDateTime,
    pub expected_update: Option<OffsetDateTime>,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("expected a CBOR map for ValidityInfo")]
    NotAMap,
    #[error("missing required field: '{0}'")]
    MissingField(&'static str),
    #[error("expected a tag 0 date-time for field '{0}'")]
    NotATag0(&'static str),
    #[error("unable to parse date-time: {0}")]
    UnableToParse(#[from] time::error::Parse),
    #[error("unable to format date-time: {0}")]
    UnableToFormat(#[from] time::error::Format),
}

fn tag0(dt: &OffsetDateTime) -> Result<ciborium::Value, Error> {
    // Truncate to whole seconds; tag 0 date-times in 18013-5 do not carry
    // fractional seconds.
    let dt = dt.replace_nanosecond(0).unwrap_or(*dt);
    Ok(ciborium::Value::Tag(
        0,
        Box::new(ciborium::Value::Text(dt.format(&Rfc3339)?)),
    ))
}

fn from_tag0(value: ciborium::Value, field: &'static str) -> Result<OffsetDateTime, Error> {
    match value {
        ciborium::Value::Tag(0, inner) => match *inner {
            ciborium::Value::Text(text) => Ok(OffsetDateTime::parse(&text, &Rfc3339)?),
            _ => Err(Error::NotATag0(field)),
        },
        _ => Err(Error::NotATag0(field)),
    }
}

impl ValidityInfo {
    fn to_cbor_value(&self) -> Result<ciborium::Value, Error> {
        let v = self;
        let mut map = vec![
            (
                ciborium::Value::Text("signed".to_string()),
                tag0(&v.signed)?,
            ),
            (
                ciborium::Value::Text("validFrom".to_string()),
                tag0(&v.valid_from)?,
            ),
            (
                ciborium::Value::Text("validUntil".to_string()),
                tag0(&v.valid_until)?,
            ),
        ];
        if let Some(expected_update) = &v.expected_update {
            map.push((
                ciborium::Value::Text("expectedUpdate".to_string()),
                tag0(expected_update)?,
            ));
        }
        Ok(ciborium::Value::Map(map))
    }
}

impl From<ValidityInfo> for CborValue {
    fn from(v: ValidityInfo) -> CborValue {
        // RFC 3339 formatting only fails for years outside 0..=9999, which
        // replace_nanosecond-truncated wall-clock times cannot produce.
        v.to_cbor_value()
            .unwrap_or(ciborium::Value::Map(Vec::new()))
            .into()
    }
}

impl TryFrom<CborValue> for ValidityInfo {
    type Error = Error;

    fn try_from(v: CborValue) -> Result<ValidityInfo, Error> {
        let entries = v.into_inner().into_map().map_err(|_| Error::NotAMap)?;
        let mut signed = None;
        let mut valid_from = None;
        let mut valid_until = None;
        let mut expected_update = None;
        for (key, value) in entries {
            match key.as_text() {
                Some("signed") => signed = Some(from_tag0(value, "signed")?),
                Some("validFrom") => valid_from = Some(from_tag0(value, "validFrom")?),
                Some("validUntil") => valid_until = Some(from_tag0(value, "validUntil")?),
                Some("expectedUpdate") => {
                    expected_update = Some(from_tag0(value, "expectedUpdate")?)
                }
                _ => {}
            }
        }
        Ok(ValidityInfo {
            signed: signed.ok_or(Error::MissingField("signed"))?,
            valid_from: valid_from.ok_or(Error::MissingField("validFrom"))?,
            valid_until: valid_until.ok_or(Error::MissingField("validUntil"))?,
            expected_update,
        })
    }
}

/// A standalone tag 0 (RFC 3339 text) date-time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tag0DateTime(pub OffsetDateTime);

impl serde::Serialize for Tag0DateTime {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        tag0(&self.0)
            .map_err(serde::ser::Error::custom)?
            .serialize(serializer)
    }
}

impl<'de> serde::Deserialize<'de> for Tag0DateTime {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = ciborium::Value::deserialize(deserializer)?;
        from_tag0(value, "datetime")
            .map(Tag0DateTime)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cbor;
    use time::macros::datetime;

    #[test]
    fn roundtrip() {
        let info = ValidityInfo {
            signed: datetime!(2020-10-01 13:30:02 UTC),
            valid_from: datetime!(2020-10-01 13:30:02 UTC),
            valid_until: datetime!(2030-10-01 13:30:02 UTC),
            expected_update: None,
        };
        let bytes = cbor::to_vec(&info).unwrap();
        let parsed: ValidityInfo = cbor::from_slice(&bytes).unwrap();
        assert_eq!(info, parsed);
    }

    #[test]
    fn encodes_as_tag0_text() {
        let info = ValidityInfo {
            signed: datetime!(2020-10-01 13:30:02 UTC),
            valid_from: datetime!(2020-10-01 13:30:02 UTC),
            valid_until: datetime!(2030-10-01 13:30:02 UTC),
            expected_update: Some(datetime!(2021-10-01 13:30:02 UTC)),
        };
        let value = cbor::into_value(&info).unwrap();
        let map = value.into_map().unwrap();
        assert_eq!(map.len(), 4);
        for (_, v) in map {
            assert!(matches!(v, ciborium::Value::Tag(0, _)));
        }
    }
}
