use aes_gcm::aead::generic_array::{typenum::U32, GenericArray};
use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use elliptic_curve::ecdh::SharedSecret;
use p256::{NistP256, NonZeroScalar, PublicKey, SecretKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::definitions::device_engagement::DeviceEngagement;
use crate::definitions::device_key::CoseKey;
use crate::definitions::helpers::{ByteStr, Tag24};

pub type EReaderKeyBytes = Tag24<CoseKey>;
pub type EDeviceKeyBytes = Tag24<CoseKey>;
pub type DeviceEngagementBytes = Tag24<DeviceEngagement>;
pub type SessionTranscriptBytes = Tag24<SessionTranscript180135>;
pub type SessionKey = GenericArray<u8, U32>;

/// Anything that can stand in as the session transcript of a device
/// authentication payload.
pub trait SessionTranscript: Serialize + Clone {}

/// The session transcript defined by ISO/IEC 18013-5: the engagement, the
/// reader's ephemeral key and the handover that led to the session.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SessionTranscript180135(
    pub DeviceEngagementBytes,
    pub EReaderKeyBytes,
    pub Handover,
);

impl SessionTranscript for SessionTranscript180135 {}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Handover {
    // Serializes as null.
    QR,
    NFC(ByteStr, Option<ByteStr>),
}

/// First message of the session layer, sent by the reader.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEstablishment {
    pub e_reader_key: EReaderKeyBytes,
    pub data: ByteStr,
}

/// Any subsequent message of the session layer.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SessionData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<ByteStr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(try_from = "u64", into = "u64")]
pub enum Status {
    SessionEncryptionError,
    CborDecodingError,
    SessionTermination,
}

impl From<Status> for u64 {
    fn from(s: Status) -> u64 {
        match s {
            Status::SessionEncryptionError => 10,
            Status::CborDecodingError => 11,
            Status::SessionTermination => 20,
        }
    }
}

impl TryFrom<u64> for Status {
    type Error = Error;

    fn try_from(n: u64) -> Result<Status, Error> {
        match n {
            10 => Ok(Status::SessionEncryptionError),
            11 => Ok(Status::CborDecodingError),
            20 => Ok(Status::SessionTermination),
            _ => Err(Error::UnrecognisedStatus(n)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unrecognised session status code: {0}")]
    UnrecognisedStatus(u64),
    #[error("unable to interpret the key as a P-256 public key: {0}")]
    InvalidPublicKey(#[from] crate::definitions::device_key::cose_key::Error),
    #[error("unable to derive key material: {0}")]
    KeyDerivation(#[from] hkdf::InvalidLength),
    #[error("CBOR error: {0}")]
    Cbor(#[from] crate::cbor::CborError),
    #[error("encoding error: {0}")]
    Tag24(#[from] crate::definitions::helpers::tag24::Error),
}

const READER_IDENTIFIER: [u8; 8] = [0, 0, 0, 0, 0, 0, 0, 0];
const DEVICE_IDENTIFIER: [u8; 8] = [0, 0, 0, 0, 0, 0, 0, 1];

/// Generate an ephemeral P-256 key pair, returning the secret scalar and the
/// public key in COSE_Key form.
pub fn create_p256_ephemeral_keys() -> (NonZeroScalar, CoseKey) {
    let secret = SecretKey::random(&mut OsRng);
    let public: CoseKey = secret.public_key().into();
    (secret.to_nonzero_scalar(), public)
}

/// ECDH between our ephemeral secret and the other party's session key.
pub fn get_shared_secret(
    their_key: CoseKey,
    our_secret: &NonZeroScalar,
) -> Result<SharedSecret<NistP256>, Error> {
    let public_key: PublicKey = their_key.try_into()?;
    Ok(p256::ecdh::diffie_hellman(
        our_secret,
        public_key.as_affine(),
    ))
}

fn derive_session_key_inner(
    shared_secret: &SharedSecret<NistP256>,
    transcript_bytes: &[u8],
    info: &[u8],
) -> Result<SessionKey, Error> {
    let salt = Sha256::digest(transcript_bytes);
    let hkdf = shared_secret.extract::<Sha256>(Some(salt.as_ref()));
    let mut key = SessionKey::default();
    hkdf.expand(info, &mut key)?;
    Ok(key)
}

/// SKDevice: encrypts mdoc-to-reader messages.
pub fn derive_device_session_key(
    shared_secret: &SharedSecret<NistP256>,
    transcript: &SessionTranscriptBytes,
) -> Result<SessionKey, Error> {
    derive_session_key_inner(
        shared_secret,
        &crate::cbor::to_vec(transcript)?,
        b"SKDevice",
    )
}

/// SKReader: encrypts reader-to-mdoc messages.
pub fn derive_reader_session_key(
    shared_secret: &SharedSecret<NistP256>,
    transcript: &SessionTranscriptBytes,
) -> Result<SessionKey, Error> {
    derive_session_key_inner(
        shared_secret,
        &crate::cbor::to_vec(transcript)?,
        b"SKReader",
    )
}

/// EMacKey: authenticates deviceAuth when the device key only supports key
/// agreement. Derived from ECDH between the device key and the reader's
/// ephemeral key, salted with the hash of the tagged transcript bytes.
pub fn derive_e_mac_key(
    shared_secret: &SharedSecret<NistP256>,
    transcript_bytes: &[u8],
) -> Result<SessionKey, Error> {
    let salt = Sha256::digest(transcript_bytes);
    let hkdf = shared_secret.extract::<Sha256>(Some(salt.as_ref()));
    let mut key = SessionKey::default();
    hkdf.expand(b"EMacKey", &mut key)?;
    Ok(key)
}

fn nonce(identifier: [u8; 8], message_count: u32) -> Nonce<aes_gcm::aead::generic_array::typenum::U12> {
    let mut bytes = [0u8; 12];
    bytes[..8].copy_from_slice(&identifier);
    bytes[8..].copy_from_slice(&message_count.to_be_bytes());
    *Nonce::from_slice(&bytes)
}

fn encrypt(
    session_key: &SessionKey,
    plaintext: &[u8],
    message_count: &mut u32,
    identifier: [u8; 8],
) -> Result<Vec<u8>, aes_gcm::Error> {
    *message_count += 1;
    Aes256Gcm::new(session_key).encrypt(&nonce(identifier, *message_count), plaintext)
}

fn decrypt(
    session_key: &SessionKey,
    ciphertext: &[u8],
    message_count: &mut u32,
    identifier: [u8; 8],
) -> Result<Vec<u8>, aes_gcm::Error> {
    *message_count += 1;
    Aes256Gcm::new(session_key).decrypt(&nonce(identifier, *message_count), ciphertext)
}

pub fn encrypt_device_data(
    session_key: &SessionKey,
    plaintext: &[u8],
    message_count: &mut u32,
) -> Result<Vec<u8>, aes_gcm::Error> {
    encrypt(session_key, plaintext, message_count, DEVICE_IDENTIFIER)
}

pub fn decrypt_device_data(
    session_key: &SessionKey,
    ciphertext: &[u8],
    message_count: &mut u32,
) -> Result<Vec<u8>, aes_gcm::Error> {
    decrypt(session_key, ciphertext, message_count, DEVICE_IDENTIFIER)
}

pub fn encrypt_reader_data(
    session_key: &SessionKey,
    plaintext: &[u8],
    message_count: &mut u32,
) -> Result<Vec<u8>, aes_gcm::Error> {
    encrypt(session_key, plaintext, message_count, READER_IDENTIFIER)
}

pub fn decrypt_reader_data(
    session_key: &SessionKey,
    ciphertext: &[u8],
    message_count: &mut u32,
) -> Result<Vec<u8>, aes_gcm::Error> {
    decrypt(session_key, ciphertext, message_count, READER_IDENTIFIER)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cbor;

    #[test]
    fn qr_handover_is_null() {
        let bytes = cbor::to_vec(&Handover::QR).unwrap();
        assert_eq!(bytes, vec![0xf6]);
    }

    #[test]
    fn status_codes() {
        assert_eq!(u64::from(Status::SessionTermination), 20);
        assert!(Status::try_from(21).is_err());
        let bytes = cbor::to_vec(&Status::SessionEncryptionError).unwrap();
        assert_eq!(bytes, vec![0x0a]);
    }

    #[test]
    fn shared_secret_agreement_and_channel() {
        let (device_secret, device_public) = create_p256_ephemeral_keys();
        let (reader_secret, reader_public) = create_p256_ephemeral_keys();

        let device_shared = get_shared_secret(reader_public, &device_secret).unwrap();
        let reader_shared = get_shared_secret(device_public.clone(), &reader_secret).unwrap();
        assert_eq!(
            device_shared.raw_secret_bytes(),
            reader_shared.raw_secret_bytes()
        );

        let transcript = SessionTranscript180135(
            Tag24::new(DeviceEngagement::test_value()).unwrap(),
            Tag24::new(device_public).unwrap(),
            Handover::QR,
        );
        let transcript = Tag24::new(transcript).unwrap();

        let sk_device = derive_device_session_key(&device_shared, &transcript).unwrap();
        let sk_device_r = derive_device_session_key(&reader_shared, &transcript).unwrap();
        assert_eq!(sk_device, sk_device_r);

        let mut send_count = 0;
        let mut recv_count = 0;
        let ciphertext = encrypt_device_data(&sk_device, b"hello", &mut send_count).unwrap();
        let plaintext = decrypt_device_data(&sk_device_r, &ciphertext, &mut recv_count).unwrap();
        assert_eq!(plaintext, b"hello");
        assert_eq!(send_count, 1);
    }
}
