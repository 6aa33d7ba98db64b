//! Zero-knowledge-proved documents.
//!
//! Proof math is delegated to an external proving system behind the
//! [ZkSystem] trait; this module only carries the opaque proof bytes and the
//! cleartext document summary through the response structure.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::cbor::CborValue;
use crate::definitions::helpers::{ByteStr, NonEmptyMap, Tag24};
use crate::definitions::validity_info::Tag0DateTime;
use crate::definitions::x509::X5Chain;

/// Identification of a proving circuit.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ZkSystemSpec {
    pub circuit_hash: ByteStr,
    pub num_attributes: u64,
    pub version: u64,
    pub block_enc_hash: ByteStr,
    pub block_enc_sig: ByteStr,
}

/// A document disclosed via a zero-knowledge proof instead of direct
/// signature verification.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ZkDocument {
    pub zk_document_data: Tag24<ZkDocumentData>,
    pub proof: ByteStr,
}

/// The cleartext summary that accompanies a proof.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ZkDocumentData {
    pub doc_type: String,
    pub timestamp: Tag0DateTime,
    /// Disclosed claim values: namespace, then element identifier.
    pub issuer_signed: BTreeMap<String, NonEmptyMap<String, CborValue>>,
    pub x5chain: X5Chain,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no available circuit matches the requested specs")]
    NoMatchingSpec,
    #[error("proof generation failed: {0}")]
    ProofGeneration(String),
    #[error("proof verification failed: {0}")]
    ProofVerification(String),
    #[error("CBOR error: {0}")]
    Cbor(#[from] crate::cbor::CborError),
}

/// An external proving system. Implementations wrap native provers; this
/// crate treats proofs as opaque bytes.
pub trait ZkSystem {
    /// The circuit specs this system can prove and verify with.
    fn specs(&self) -> Vec<ZkSystemSpec>;

    /// Produce a proof over the document data, bound to the session
    /// transcript bytes.
    fn prove(
        &self,
        spec: &ZkSystemSpec,
        document_data: &Tag24<ZkDocumentData>,
        transcript_bytes: &[u8],
    ) -> Result<Vec<u8>, Error>;

    /// Check a proof against the document's cleartext summary and the
    /// session transcript bytes.
    fn verify(
        &self,
        spec: &ZkSystemSpec,
        document: &ZkDocument,
        transcript_bytes: &[u8],
    ) -> Result<(), Error>;
}

/// Select the circuit to prove with: the greatest version among available
/// specs whose circuit hash the requester allow-lists and whose attribute
/// count matches the number of disclosed attributes exactly.
pub fn match_system_spec<'a>(
    available: &'a [ZkSystemSpec],
    allowed_circuit_hashes: &[ByteStr],
    num_attributes: u64,
) -> Option<&'a ZkSystemSpec> {
    available
        .iter()
        .filter(|spec| spec.num_attributes == num_attributes)
        .filter(|spec| allowed_circuit_hashes.contains(&spec.circuit_hash))
        .max_by_key(|spec| spec.version)
}

#[cfg(test)]
mod test {
    use super::*;

    fn spec(hash: u8, attributes: u64, version: u64) -> ZkSystemSpec {
        ZkSystemSpec {
            circuit_hash: vec![hash; 32].into(),
            num_attributes: attributes,
            version,
            block_enc_hash: vec![0; 32].into(),
            block_enc_sig: vec![0; 32].into(),
        }
    }

    #[test]
    fn greatest_allowed_version_wins() {
        let available = vec![spec(1, 2, 1), spec(1, 2, 3), spec(2, 2, 9)];
        let allowed = vec![ByteStr::from(vec![1u8; 32])];
        let matched = match_system_spec(&available, &allowed, 2).unwrap();
        assert_eq!(matched.version, 3);
    }

    #[test]
    fn attribute_count_must_match_exactly() {
        let available = vec![spec(1, 2, 1)];
        let allowed = vec![ByteStr::from(vec![1u8; 32])];
        assert!(match_system_spec(&available, &allowed, 3).is_none());
    }

    #[test]
    fn disallowed_circuit_is_skipped() {
        let available = vec![spec(1, 2, 1)];
        let allowed = vec![ByteStr::from(vec![9u8; 32])];
        assert!(match_system_spec(&available, &allowed, 2).is_none());
    }
}
