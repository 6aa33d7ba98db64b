use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::cbor::{self, CborError};

/// A wrapper for CBOR tag 24: an embedded data item carried as a byte string.
///
/// The encoded form of the inner value is preserved on parse, so digests
/// computed over the wire bytes survive re-serialization even when the
/// producer used a different (but valid) encoding than ours.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag24<T> {
    inner: T,
    inner_bytes: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("expected a tag 24 data item")]
    NotATag24,
    #[error("unable to encode value as CBOR: {0}")]
    UnableToEncode(CborError),
    #[error("unable to decode embedded bytes as CBOR: {0}")]
    UnableToDecode(CborError),
}

impl<T: Serialize> Tag24<T> {
    pub fn new(inner: T) -> Result<Tag24<T>, Error> {
        let inner_bytes = cbor::to_vec(&inner).map_err(Error::UnableToEncode)?;
        Ok(Tag24 { inner, inner_bytes })
    }
}

impl<T> Tag24<T> {
    pub fn inner_bytes(&self) -> &[u8] {
        &self.inner_bytes
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    /// The tag 24 data item itself, i.e. `24(<inner_bytes>)` encoded.
    pub fn to_tagged_bytes(&self) -> Result<Vec<u8>, CborError> {
        cbor::to_vec(self)
    }
}

impl<T> AsRef<T> for Tag24<T> {
    fn as_ref(&self) -> &T {
        &self.inner
    }
}

impl<T> std::ops::Deref for Tag24<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T: DeserializeOwned> Tag24<T> {
    pub fn from_bytes(inner_bytes: Vec<u8>) -> Result<Tag24<T>, Error> {
        let inner: T = cbor::from_slice(&inner_bytes).map_err(Error::UnableToDecode)?;
        Ok(Tag24 { inner, inner_bytes })
    }
}

impl<T: DeserializeOwned> TryFrom<ciborium::Value> for Tag24<T> {
    type Error = Error;

    fn try_from(v: ciborium::Value) -> Result<Tag24<T>, Error> {
        match v {
            ciborium::Value::Tag(24, inner) => match *inner {
                ciborium::Value::Bytes(inner_bytes) => Tag24::from_bytes(inner_bytes),
                _ => Err(Error::NotATag24),
            },
            _ => Err(Error::NotATag24),
        }
    }
}

impl<T> From<Tag24<T>> for ciborium::Value {
    fn from(t: Tag24<T>) -> ciborium::Value {
        ciborium::Value::Tag(24, Box::new(ciborium::Value::Bytes(t.inner_bytes)))
    }
}

impl<T> Serialize for Tag24<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        ciborium::Value::Tag(
            24,
            Box::new(ciborium::Value::Bytes(self.inner_bytes.clone())),
        )
        .serialize(serializer)
    }
}

impl<'de, T: DeserializeOwned> Deserialize<'de> for Tag24<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = ciborium::Value::deserialize(deserializer)?;
        value.try_into().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cbor;

    #[test]
    fn tagged_encoding_roundtrip() {
        let tagged = Tag24::new(String::from("2020-10-01")).unwrap();
        let bytes = cbor::to_vec(&tagged).unwrap();
        // d8 18 4e <10-byte text string item>
        assert_eq!(bytes[0], 0xd8);
        assert_eq!(bytes[1], 0x18);
        let parsed: Tag24<String> = cbor::from_slice(&bytes).unwrap();
        assert_eq!(parsed, tagged);
        assert_eq!(parsed.as_ref(), "2020-10-01");
    }

    #[test]
    fn untagged_item_is_rejected() {
        // 4(["-2", 27]) is a decimal fraction, not a tag 24 item.
        let bytes = hex::decode("c482201819").unwrap();
        assert!(cbor::from_slice::<Tag24<ciborium::Value>>(&bytes).is_err());
    }

    #[test]
    fn preserves_producer_bytes() {
        // An indefinite-length text string re-encodes canonically, but the
        // preserved bytes must stay as received.
        let item_bytes = hex::decode("7f626162626162ff").unwrap();
        let wire = [vec![0xd8, 0x18, 0x48], item_bytes.clone()].concat();
        let parsed: Tag24<String> = cbor::from_slice(&wire).unwrap();
        assert_eq!(parsed.inner_bytes(), item_bytes.as_slice());
        assert_eq!(cbor::to_vec(&parsed).unwrap(), wire);
    }
}
