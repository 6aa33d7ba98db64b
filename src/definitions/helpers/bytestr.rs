use std::ops::Deref;

use serde::{Deserialize, Serialize};

/// An opaque CBOR byte string.
///
/// Serializes as a CBOR `bstr` rather than an array of integers.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct ByteStr(Vec<u8>);

impl From<Vec<u8>> for ByteStr {
    fn from(bytes: Vec<u8>) -> ByteStr {
        ByteStr(bytes)
    }
}

impl From<ByteStr> for Vec<u8> {
    fn from(ByteStr(bytes): ByteStr) -> Vec<u8> {
        bytes
    }
}

impl AsRef<[u8]> for ByteStr {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Deref for ByteStr {
    type Target = Vec<u8>;

    fn deref(&self) -> &Vec<u8> {
        &self.0
    }
}

impl Serialize for ByteStr {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> Deserialize<'de> for ByteStr {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = ciborium::Value::deserialize(deserializer)?;
        let bytes = value
            .into_bytes()
            .map_err(|_| serde::de::Error::custom("expected a byte string"))?;
        Ok(ByteStr(bytes))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cbor;
    use hex::FromHex;

    static BYTES: &str = "D903EC6B323032302D31302D3031";

    #[test]
    fn bytestr_encodes_as_bstr() {
        let bytes: Vec<u8> = Vec::from_hex(BYTES).unwrap();
        let expected = [vec![0x4e], bytes.clone()].concat();
        let byte_str = ByteStr::from(bytes);
        let roundtripped = cbor::to_vec(&byte_str).unwrap();
        assert_eq!(expected, roundtripped);
        let parsed: ByteStr = cbor::from_slice(&roundtripped).unwrap();
        assert_eq!(byte_str, parsed);
    }
}
