use serde::{Deserialize, Serialize};

use crate::definitions::device_key::DeviceKeyInfo;
use crate::definitions::helpers::{ByteStr, NonEmptyMap};
use crate::definitions::validity_info::ValidityInfo;

pub type Namespace = String;
pub type DigestIds = NonEmptyMap<DigestId, ByteStr>;

/// Mobile security object: the issuer-signed digest table over the mdoc's
/// data elements, together with the device key and the validity window.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Mso {
    pub version: String,
    pub digest_algorithm: DigestAlgorithm,
    pub value_digests: NonEmptyMap<Namespace, DigestIds>,
    pub device_key_info: DeviceKeyInfo,
    pub doc_type: String,
    pub validity_info: ValidityInfo,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub enum DigestAlgorithm {
    #[serde(rename = "SHA-256")]
    SHA256,
    #[serde(rename = "SHA-384")]
    SHA384,
    #[serde(rename = "SHA-512")]
    SHA512,
}

/// An identifier unique within a namespace for an issuer-signed item digest.
#[derive(
    Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(transparent)]
pub struct DigestId(u64);

impl DigestId {
    pub fn new(i: u64) -> DigestId {
        DigestId(i)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl DigestAlgorithm {
    /// Digest arbitrary bytes with this algorithm.
    pub fn digest(&self, bytes: &[u8]) -> Vec<u8> {
        use sha2::{Digest, Sha256, Sha384, Sha512};
        match self {
            DigestAlgorithm::SHA256 => Sha256::digest(bytes).to_vec(),
            DigestAlgorithm::SHA384 => Sha384::digest(bytes).to_vec(),
            DigestAlgorithm::SHA512 => Sha512::digest(bytes).to_vec(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cbor;

    #[test]
    fn digest_algorithm_renames() {
        let bytes = cbor::to_vec(&DigestAlgorithm::SHA256).unwrap();
        let value: ciborium::Value = cbor::from_slice(&bytes).unwrap();
        assert_eq!(value, ciborium::Value::Text("SHA-256".to_string()));
    }

    #[test]
    fn digest_lengths() {
        assert_eq!(DigestAlgorithm::SHA256.digest(b"x").len(), 32);
        assert_eq!(DigestAlgorithm::SHA384.digest(b"x").len(), 48);
        assert_eq!(DigestAlgorithm::SHA512.digest(b"x").len(), 64);
    }
}
