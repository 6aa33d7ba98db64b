//! HPKE-encrypted document sets.
//!
//! Encryption is transport confidentiality only: after decryption the
//! plaintext documents must go through full verification against the
//! substituted session transcript, exactly as plain documents would.

use serde::{Deserialize, Serialize};

use crate::cbor;
use crate::crypto::hpke;
use crate::definitions::device_key::CoseKey;
use crate::definitions::helpers::{ByteStr, Tag24};
use crate::definitions::session::{DeviceEngagementBytes, Handover, SessionTranscript};

/// A set of documents sealed to a reader-provided public key.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedDocuments {
    /// HPKE encapsulated key.
    pub enc: ByteStr,
    pub ciphertext: ByteStr,
    /// Identifies which document request this answers.
    pub doc_request_id: u64,
}

/// What an [EncryptedDocuments] decrypts to. No top-level status or errors;
/// those stay on the outer response.
#[derive(Clone, Debug, Deserialize, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedDocumentsPlaintext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub documents: Option<crate::definitions::device_response::Documents>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zk_documents: Option<crate::definitions::device_response::ZkDocuments>,
}

/// The negotiated parameters that replace the reader key in the session
/// transcript that the inner documents are verified against.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionParameters {
    pub version: u64,
    /// The key documents are sealed to.
    pub recipient_public_key: CoseKey,
}

/// Session transcript variant for verifying decrypted documents: the middle
/// element carries the encryption parameters instead of the reader key.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SessionTranscriptWithEncryptionParameters(
    pub DeviceEngagementBytes,
    pub Tag24<EncryptionParameters>,
    pub Handover,
);

impl SessionTranscript for SessionTranscriptWithEncryptionParameters {}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HPKE failure: {0}")]
    Hpke(#[from] hpke::Error),
    #[error("recipient key is not a P-256 key: {0}")]
    InvalidRecipientKey(#[from] crate::definitions::device_key::cose_key::Error),
    #[error("CBOR error: {0}")]
    Cbor(#[from] crate::cbor::CborError),
}

impl EncryptedDocuments {
    /// Seal a plaintext document set to the recipient key named by the
    /// encryption parameters. The transcript is bound as HPKE info.
    pub fn seal(
        plaintext: &EncryptedDocumentsPlaintext,
        transcript: &Tag24<SessionTranscriptWithEncryptionParameters>,
        doc_request_id: u64,
    ) -> Result<Self, Error> {
        let recipient: p256::PublicKey = transcript
            .as_ref()
            .1
            .as_ref()
            .recipient_public_key
            .clone()
            .try_into()?;
        let info = cbor::to_vec(transcript)?;
        let (enc, ciphertext) = hpke::seal(&recipient, &info, &[], &cbor::to_vec(plaintext)?)?;
        Ok(Self {
            enc: enc.into(),
            ciphertext: ciphertext.into(),
            doc_request_id,
        })
    }

    /// Decrypt with the recipient's secret key. The caller must verify the
    /// returned documents against the same transcript.
    pub fn open(
        &self,
        recipient: &p256::SecretKey,
        transcript: &Tag24<SessionTranscriptWithEncryptionParameters>,
    ) -> Result<EncryptedDocumentsPlaintext, Error> {
        let info = cbor::to_vec(transcript)?;
        let plaintext = hpke::open(recipient, &self.enc, &info, &[], &self.ciphertext)?;
        Ok(cbor::from_slice(&plaintext)?)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::definitions::device_engagement::DeviceEngagement;

    fn transcript(
        recipient: &p256::PublicKey,
    ) -> Tag24<SessionTranscriptWithEncryptionParameters> {
        Tag24::new(SessionTranscriptWithEncryptionParameters(
            Tag24::new(DeviceEngagement::test_value()).unwrap(),
            Tag24::new(EncryptionParameters {
                version: 1,
                recipient_public_key: (*recipient).into(),
            })
            .unwrap(),
            Handover::QR,
        ))
        .unwrap()
    }

    #[test]
    fn seal_open_roundtrip() {
        let recipient = p256::SecretKey::random(&mut rand::thread_rng());
        let transcript = transcript(&recipient.public_key());
        let plaintext = EncryptedDocumentsPlaintext::default();
        let sealed = EncryptedDocuments::seal(&plaintext, &transcript, 7).unwrap();
        assert_eq!(sealed.doc_request_id, 7);
        let opened = sealed.open(&recipient, &transcript).unwrap();
        assert!(opened.documents.is_none());
    }

    #[test]
    fn open_with_different_transcript_fails() {
        let recipient = p256::SecretKey::random(&mut rand::thread_rng());
        let transcript_a = transcript(&recipient.public_key());
        let transcript_b = transcript(&recipient.public_key());
        let sealed =
            EncryptedDocuments::seal(&EncryptedDocumentsPlaintext::default(), &transcript_a, 0)
                .unwrap();
        // A fresh engagement means different transcript bytes, so the HPKE
        // info no longer matches.
        assert!(sealed.open(&recipient, &transcript_b).is_err());
    }
}
