//! Verification rules for received documents: issuer signature, validity
//! window, device authentication and the digest tree.

use coset::Label;
use hmac::{Hmac, Mac as _};
use p256::NonZeroScalar;
use sha2::Sha256;
use time::OffsetDateTime;

use crate::cbor;
use crate::cose::{self, MaybeTagged};
use crate::definitions::device_response::Document;
use crate::definitions::device_signed::{DeviceAuth, DeviceAuthentication};
use crate::definitions::encrypted::{
    EncryptedDocuments, EncryptedDocumentsPlaintext, SessionTranscriptWithEncryptionParameters,
};
use crate::definitions::helpers::Tag24;
use crate::definitions::issuer_signed::{IssuerNamespaces, IssuerSigned};
use crate::definitions::session::{self, derive_e_mac_key, get_shared_secret, SessionTranscript};
use crate::definitions::x509::{TrustAnchorRegistry, X5Chain, X5CHAIN_HEADER_LABEL};
use crate::definitions::zk::{ZkDocument, ZkSystem, ZkSystemSpec};
use crate::definitions::{DeviceResponse, Mso};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("issuerAuth has no attached payload")]
    DetachedIssuerAuth,
    #[error("unable to parse issuerAuth payload as an MSO: {0}")]
    MsoParsing(crate::cbor::CborError),
    #[error("no x5chain header found on issuerAuth")]
    MissingX5Chain,
    #[error("x5chain: {0}")]
    X509(#[from] crate::definitions::x509::Error),
    #[error("Signature on MSO failed to verify")]
    IssuerAuthentication(#[source] cose::Error),
    #[error("document doctype '{document}' does not match MSO doctype '{mso}'")]
    DocTypeMismatch { document: String, mso: String },
    #[error("MSO is not yet valid")]
    NotYetValid,
    #[error("MSO is not valid anymore")]
    Expired,
    #[error("Device authentication signature failed to verify")]
    DeviceSignature(#[source] cose::Error),
    #[error("Device authentication MAC failed to verify")]
    DeviceMac(#[source] cose::Error),
    #[error("an eReaderKey is required to check a device MAC")]
    MissingEReaderKey,
    #[error("unsupported device key: {0}")]
    UnsupportedDeviceKey(String),
    #[error("no digest found for element '{element}' in namespace '{namespace}'")]
    DigestMissing { namespace: String, element: String },
    #[error("digest mismatch for element '{element}' in namespace '{namespace}'")]
    DigestMismatch { namespace: String, element: String },
    #[error("session key derivation failed: {0}")]
    Session(#[from] session::Error),
    #[error("CBOR error: {0}")]
    Cbor(#[from] crate::cbor::CborError),
    #[error("encoding error: {0}")]
    Tag24(#[from] crate::definitions::helpers::tag24::Error),
    #[error("unable to decrypt documents: {0}")]
    Decryption(#[from] crate::definitions::encrypted::Error),
    #[error("zero-knowledge proof: {0}")]
    Zk(#[from] crate::definitions::zk::Error),
    #[error("document {index}: {source}")]
    Document {
        index: usize,
        #[source]
        source: Box<Error>,
    },
}

/// Parse the MSO out of the issuerAuth payload.
pub fn parse_mso(issuer_signed: &IssuerSigned) -> Result<Tag24<Mso>, Error> {
    let payload = issuer_signed
        .issuer_auth
        .payload
        .as_ref()
        .ok_or(Error::DetachedIssuerAuth)?;
    cbor::from_slice(payload).map_err(Error::MsoParsing)
}

/// Extract the certificate chain from the issuerAuth unprotected header.
pub fn extract_x5chain(issuer_auth: &MaybeTagged<coset::CoseSign1>) -> Result<X5Chain, Error> {
    let value = issuer_auth
        .unprotected
        .rest
        .iter()
        .find_map(|(label, value)| match label {
            Label::Int(l) if *l == X5CHAIN_HEADER_LABEL => Some(value),
            _ => None,
        })
        .ok_or(Error::MissingX5Chain)?;
    Ok(X5Chain::try_from(value.clone())?)
}

/// Check the issuer signature over the MSO against the leaf certificate of
/// the embedded chain.
pub fn issuer_authentication(
    x5chain: &X5Chain,
    issuer_signed: &IssuerSigned,
) -> Result<(), Error> {
    let signer_key = x5chain.end_entity_key()?;
    cose::sign1::verify::<_, p256::ecdsa::Signature>(&signer_key, &issuer_signed.issuer_auth, None)
        .map_err(Error::IssuerAuthentication)
}

/// The validity window is inclusive at both boundaries.
pub fn check_validity_info(mso: &Mso, at: OffsetDateTime) -> Result<(), Error> {
    if at < mso.validity_info.valid_from {
        return Err(Error::NotYetValid);
    }
    if at > mso.validity_info.valid_until {
        return Err(Error::Expired);
    }
    Ok(())
}

/// Check the device signature or MAC over the reconstructed
/// `DeviceAuthenticationBytes`.
///
/// A MAC can only be checked by the party holding the reader's ephemeral
/// secret; passing `None` when the document carries a MAC is a caller error,
/// not a verification failure.
pub fn device_authentication<S>(
    mso: &Mso,
    document: &Document,
    session_transcript: S,
    e_reader_key: Option<&NonZeroScalar>,
) -> Result<(), Error>
where
    S: SessionTranscript,
{
    let device_key = &mso.device_key_info.device_key;

    let detached_payload = Tag24::new(DeviceAuthentication::new(
        session_transcript.clone(),
        document.doc_type.clone(),
        document.device_signed.namespaces.clone(),
    ))?;
    let payload_bytes = cbor::to_vec(&detached_payload)?;

    match &document.device_signed.device_auth {
        DeviceAuth::DeviceSignature(device_signature) => {
            let verifying_key: p256::ecdsa::VerifyingKey = device_key
                .clone()
                .try_into()
                .map_err(|e: crate::definitions::device_key::cose_key::Error| {
                    Error::UnsupportedDeviceKey(e.to_string())
                })?;
            cose::sign1::verify::<_, p256::ecdsa::Signature>(
                &verifying_key,
                device_signature,
                Some(&payload_bytes),
            )
            .map_err(Error::DeviceSignature)
        }
        DeviceAuth::DeviceMac(device_mac) => {
            let e_reader_key = e_reader_key.ok_or(Error::MissingEReaderKey)?;
            let shared_secret = get_shared_secret(device_key.clone(), e_reader_key)?;
            let transcript_bytes = cbor::to_vec(&Tag24::new(session_transcript)?)?;
            let e_mac_key = derive_e_mac_key(&shared_secret, &transcript_bytes)?;
            let key = Hmac::<Sha256>::new_from_slice(e_mac_key.as_slice())
                .map_err(|e| Error::UnsupportedDeviceKey(e.to_string()))?;
            cose::mac0::verify(key, device_mac, Some(&payload_bytes)).map_err(Error::DeviceMac)
        }
    }
}

/// Recompute each disclosed item's digest from its preserved wire bytes and
/// compare against the MSO's digest table.
pub fn verify_digests(mso: &Mso, namespaces: &IssuerNamespaces) -> Result<(), Error> {
    for (namespace, items) in namespaces.iter() {
        for item in items.iter() {
            let element = &item.as_ref().element_identifier;
            let missing = || Error::DigestMissing {
                namespace: namespace.clone(),
                element: element.clone(),
            };
            let expected = mso
                .value_digests
                .get(namespace)
                .ok_or_else(missing)?
                .get(&item.as_ref().digest_id)
                .ok_or_else(missing)?;
            let computed = mso.digest_algorithm.digest(&cbor::to_vec(item)?);
            if computed != **expected {
                return Err(Error::DigestMismatch {
                    namespace: namespace.clone(),
                    element: element.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Full verification of a single presented document.
pub fn verify_document<S>(
    document: &Document,
    session_transcript: S,
    at: OffsetDateTime,
    e_reader_key: Option<&NonZeroScalar>,
    trust_anchors: Option<&TrustAnchorRegistry>,
) -> Result<(), Error>
where
    S: SessionTranscript,
{
    let mso = parse_mso(&document.issuer_signed)?;
    let mso = mso.as_ref();

    let x5chain = extract_x5chain(&document.issuer_signed.issuer_auth)?;
    if let Some(registry) = trust_anchors {
        x5chain.validate_against(registry)?;
    }
    issuer_authentication(&x5chain, &document.issuer_signed)?;

    if document.doc_type != mso.doc_type {
        return Err(Error::DocTypeMismatch {
            document: document.doc_type.clone(),
            mso: mso.doc_type.clone(),
        });
    }
    check_validity_info(mso, at)?;

    device_authentication(mso, document, session_transcript, e_reader_key)?;

    if let Some(namespaces) = &document.issuer_signed.namespaces {
        verify_digests(mso, namespaces)?;
    }
    Ok(())
}

impl DeviceResponse {
    /// Verify every plain document in the response, unlocking the document
    /// accessors on success.
    ///
    /// Encrypted and zero-knowledge documents have their own verification
    /// paths: [verify_encrypted_documents] and [verify_zk_document].
    pub fn verify<S>(
        &self,
        session_transcript: &S,
        at: OffsetDateTime,
        e_reader_key: Option<&NonZeroScalar>,
        trust_anchors: Option<&TrustAnchorRegistry>,
    ) -> Result<(), Error>
    where
        S: SessionTranscript,
    {
        if let Some(documents) = &self.documents {
            for (index, document) in documents.iter().enumerate() {
                verify_document(
                    document,
                    session_transcript.clone(),
                    at,
                    e_reader_key,
                    trust_anchors,
                )
                .map_err(|source| Error::Document {
                    index,
                    source: Box::new(source),
                })?;
            }
        }
        self.mark_verified();
        Ok(())
    }
}

/// Decrypt an encrypted document set and verify every document inside it
/// against the substituted transcript. Encryption provides confidentiality
/// only; the decrypted documents still require full verification.
pub fn verify_encrypted_documents(
    encrypted: &EncryptedDocuments,
    recipient: &p256::SecretKey,
    transcript: &Tag24<SessionTranscriptWithEncryptionParameters>,
    at: OffsetDateTime,
    e_reader_key: Option<&NonZeroScalar>,
    trust_anchors: Option<&TrustAnchorRegistry>,
) -> Result<EncryptedDocumentsPlaintext, Error> {
    let plaintext = encrypted.open(recipient, transcript)?;
    if let Some(documents) = &plaintext.documents {
        for (index, document) in documents.iter().enumerate() {
            verify_document(
                document,
                transcript.as_ref().clone(),
                at,
                e_reader_key,
                trust_anchors,
            )
            .map_err(|source| Error::Document {
                index,
                source: Box::new(source),
            })?;
        }
    }
    Ok(plaintext)
}

/// Check a zero-knowledge document's proof with the external proving system
/// and its certificate chain against the trust anchors.
pub fn verify_zk_document(
    system: &dyn ZkSystem,
    spec: &ZkSystemSpec,
    document: &ZkDocument,
    transcript_bytes: &[u8],
    trust_anchors: Option<&TrustAnchorRegistry>,
) -> Result<(), Error> {
    if let Some(registry) = trust_anchors {
        document
            .zk_document_data
            .as_ref()
            .x5chain
            .validate_against(registry)?;
    }
    system.verify(spec, document, transcript_bytes)?;
    Ok(())
}
