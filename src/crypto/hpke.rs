//! Minimal RFC 9180 HPKE: base mode, single-shot, with the fixed cipher
//! suite DHKEM(P-256, HKDF-SHA256) / HKDF-SHA256 / AES-128-GCM.
//!
//! Only what document encryption needs: one sealed message per encapsulated
//! key, empty AAD handled by the caller passing `&[]`.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes128Gcm, KeyInit, Nonce};
use hkdf::Hkdf;
use p256::ecdh;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey, SecretKey};
use rand::rngs::OsRng;
use sha2::Sha256;

/// KEM id 0x0010: DHKEM(P-256, HKDF-SHA256).
const KEM_ID: u16 = 0x0010;
/// KDF id 0x0001: HKDF-SHA256.
const KDF_ID: u16 = 0x0001;
/// AEAD id 0x0001: AES-128-GCM.
const AEAD_ID: u16 = 0x0001;

const NK: usize = 16;
const NN: usize = 12;
const NSECRET: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid public key for HPKE encapsulation")]
    InvalidPublicKey,
    #[error("unable to derive key material: {0}")]
    KeyDerivation(#[from] hkdf::InvalidLength),
    #[error("AEAD failure")]
    Aead,
}

fn suite_id() -> Vec<u8> {
    let mut id = b"HPKE".to_vec();
    id.extend_from_slice(&KEM_ID.to_be_bytes());
    id.extend_from_slice(&KDF_ID.to_be_bytes());
    id.extend_from_slice(&AEAD_ID.to_be_bytes());
    id
}

fn kem_suite_id() -> Vec<u8> {
    let mut id = b"KEM".to_vec();
    id.extend_from_slice(&KEM_ID.to_be_bytes());
    id
}

fn labeled_extract(suite_id: &[u8], salt: &[u8], label: &[u8], ikm: &[u8]) -> Hkdf<Sha256> {
    let mut labeled_ikm = b"HPKE-v1".to_vec();
    labeled_ikm.extend_from_slice(suite_id);
    labeled_ikm.extend_from_slice(label);
    labeled_ikm.extend_from_slice(ikm);
    let salt = if salt.is_empty() { None } else { Some(salt) };
    Hkdf::<Sha256>::new(salt, &labeled_ikm)
}

fn labeled_expand(
    hkdf: &Hkdf<Sha256>,
    suite_id: &[u8],
    label: &[u8],
    info: &[u8],
    out: &mut [u8],
) -> Result<(), hkdf::InvalidLength> {
    let mut labeled_info = (out.len() as u16).to_be_bytes().to_vec();
    labeled_info.extend_from_slice(b"HPKE-v1");
    labeled_info.extend_from_slice(suite_id);
    labeled_info.extend_from_slice(label);
    labeled_info.extend_from_slice(info);
    hkdf.expand(&labeled_info, out)
}

/// ExtractAndExpand of DHKEM: derive the KEM shared secret from the ECDH
/// output and the concatenation of both public keys.
fn extract_and_expand(dh: &[u8], kem_context: &[u8]) -> Result<[u8; NSECRET], Error> {
    let kem_id = kem_suite_id();
    let eae_prk = labeled_extract(&kem_id, b"", b"eae_prk", dh);
    let mut shared_secret = [0u8; NSECRET];
    labeled_expand(
        &eae_prk,
        &kem_id,
        b"shared_secret",
        kem_context,
        &mut shared_secret,
    )?;
    Ok(shared_secret)
}

struct Context {
    key: [u8; NK],
    base_nonce: [u8; NN],
}

/// KeySchedule for base mode (0x00) with default psk inputs.
fn key_schedule(shared_secret: &[u8; NSECRET], info: &[u8]) -> Result<Context, Error> {
    let id = suite_id();

    let (psk_id_hash, _) = Hkdf::<Sha256>::extract(None, &labeled_ikm(&id, b"psk_id_hash", b""));
    let (info_hash, _) = Hkdf::<Sha256>::extract(None, &labeled_ikm(&id, b"info_hash", info));

    // mode_base || psk_id_hash || info_hash
    let mut ks_context = vec![0x00u8];
    ks_context.extend_from_slice(psk_id_hash.as_slice());
    ks_context.extend_from_slice(info_hash.as_slice());

    let secret = labeled_extract(&id, shared_secret, b"secret", b"");

    let mut key = [0u8; NK];
    labeled_expand(&secret, &id, b"key", &ks_context, &mut key)?;
    let mut base_nonce = [0u8; NN];
    labeled_expand(&secret, &id, b"base_nonce", &ks_context, &mut base_nonce)?;

    Ok(Context { key, base_nonce })
}

fn labeled_ikm(suite_id: &[u8], label: &[u8], ikm: &[u8]) -> Vec<u8> {
    let mut labeled = b"HPKE-v1".to_vec();
    labeled.extend_from_slice(suite_id);
    labeled.extend_from_slice(label);
    labeled.extend_from_slice(ikm);
    labeled
}

/// Single-shot seal: encapsulate to the recipient's public key and encrypt
/// one message at sequence number zero. Returns `(enc, ciphertext)`.
pub fn seal(
    recipient: &PublicKey,
    info: &[u8],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<(Vec<u8>, Vec<u8>), Error> {
    let ephemeral = SecretKey::random(&mut OsRng);
    seal_deterministic(&ephemeral, recipient, info, aad, plaintext)
}

fn seal_deterministic(
    ephemeral: &SecretKey,
    recipient: &PublicKey,
    info: &[u8],
    aad: &[u8],
    plaintext: &[u8],
) -> Result<(Vec<u8>, Vec<u8>), Error> {
    let enc = ephemeral
        .public_key()
        .to_encoded_point(false)
        .as_bytes()
        .to_vec();
    let dh = ecdh::diffie_hellman(ephemeral.to_nonzero_scalar(), recipient.as_affine());

    let mut kem_context = enc.clone();
    kem_context.extend_from_slice(recipient.to_encoded_point(false).as_bytes());
    let shared_secret = extract_and_expand(dh.raw_secret_bytes().as_slice(), &kem_context)?;

    let ctx = key_schedule(&shared_secret, info)?;
    // seq 0: the nonce is the base nonce unchanged.
    let ciphertext = Aes128Gcm::new(ctx.key.as_slice().into())
        .encrypt(Nonce::from_slice(&ctx.base_nonce), aes_gcm::aead::Payload {
            msg: plaintext,
            aad,
        })
        .map_err(|_| Error::Aead)?;
    Ok((enc, ciphertext))
}

/// Single-shot open: decapsulate with the recipient's secret key and decrypt
/// the message sealed at sequence number zero.
pub fn open(
    recipient: &SecretKey,
    enc: &[u8],
    info: &[u8],
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, Error> {
    let ephemeral = PublicKey::from_sec1_bytes(enc).map_err(|_| Error::InvalidPublicKey)?;
    let dh = ecdh::diffie_hellman(recipient.to_nonzero_scalar(), ephemeral.as_affine());

    let mut kem_context = enc.to_vec();
    kem_context.extend_from_slice(recipient.public_key().to_encoded_point(false).as_bytes());
    let shared_secret = extract_and_expand(dh.raw_secret_bytes().as_slice(), &kem_context)?;

    let ctx = key_schedule(&shared_secret, info)?;
    Aes128Gcm::new(ctx.key.as_slice().into())
        .decrypt(Nonce::from_slice(&ctx.base_nonce), aes_gcm::aead::Payload {
            msg: ciphertext,
            aad,
        })
        .map_err(|_| Error::Aead)
}
