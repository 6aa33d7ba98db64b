//! COSE_Sign1 construction and verification.

use coset::{sig_structure_data, CoseSign1, CoseSign1Builder, HeaderBuilder, SignatureContext};
use signature::{SignatureEncoding, Signer, Verifier};

use super::{Error, MaybeTagged, SignatureAlgorithm};

/// The `Sig_structure` bytes that are signed for a COSE_Sign1.
///
/// If the structure carries an attached payload, `detached_payload` must be
/// `None`; if the payload is detached it must be provided here.
pub fn signature_payload(
    sign1: &CoseSign1,
    detached_payload: Option<&[u8]>,
) -> Result<Vec<u8>, Error> {
    let payload = match (sign1.payload.as_ref(), detached_payload) {
        (Some(attached), None) => attached.as_slice(),
        (None, Some(detached)) => detached,
        (Some(_), Some(_)) => return Err(Error::DoublePayload),
        (None, None) => return Err(Error::NoPayload),
    };
    Ok(sig_structure_data(
        SignatureContext::CoseSign1,
        sign1.protected.clone(),
        None,
        &[],
        payload,
    ))
}

/// Build and sign a COSE_Sign1.
///
/// The signature algorithm is taken from the signer and placed in the
/// protected header. Exactly one of `payload` (attached) and
/// `detached_payload` must be provided.
pub fn sign<S, Sig>(
    signer: &S,
    unprotected: coset::Header,
    payload: Option<Vec<u8>>,
    detached_payload: Option<&[u8]>,
) -> Result<MaybeTagged<CoseSign1>, Error>
where
    S: Signer<Sig> + SignatureAlgorithm,
    Sig: SignatureEncoding,
{
    let protected = HeaderBuilder::new().algorithm(signer.algorithm()).build();
    let mut builder = CoseSign1Builder::new()
        .protected(protected)
        .unprotected(unprotected);
    if let Some(payload) = payload {
        if detached_payload.is_some() {
            return Err(Error::DoublePayload);
        }
        builder = builder.payload(payload);
    }
    let mut sign1 = builder.build();
    let to_sign = signature_payload(&sign1, detached_payload)?;
    sign1.signature = signer.try_sign(&to_sign).map_err(Error::Signing)?.to_vec();
    Ok(MaybeTagged::new(false, sign1))
}

/// Verify the signature of a COSE_Sign1 against a verifying key.
pub fn verify<V, Sig>(
    verifier: &V,
    sign1: &CoseSign1,
    detached_payload: Option<&[u8]>,
) -> Result<(), Error>
where
    V: Verifier<Sig>,
    Sig: SignatureEncoding,
{
    let to_verify = signature_payload(sign1, detached_payload)?;
    let signature =
        Sig::try_from(sign1.signature.as_slice()).map_err(|_| Error::MalformedSignature(signature::Error::new()))?;
    verifier
        .verify(&to_verify, &signature)
        .map_err(Error::VerificationFailed)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cbor;
    use p256::ecdsa::{Signature, SigningKey, VerifyingKey};

    #[test]
    fn sign_and_verify_attached() {
        let key = SigningKey::random(&mut rand::thread_rng());
        let sign1: MaybeTagged<CoseSign1> = sign::<_, Signature>(
            &key,
            coset::Header::default(),
            Some(b"payload".to_vec()),
            None,
        )
        .unwrap();
        verify::<_, Signature>(&VerifyingKey::from(&key), &sign1, None).unwrap();
    }

    #[test]
    fn sign_and_verify_detached() {
        let key = SigningKey::random(&mut rand::thread_rng());
        let sign1 =
            sign::<_, Signature>(&key, coset::Header::default(), None, Some(b"detached")).unwrap();
        assert!(sign1.payload.is_none());
        verify::<_, Signature>(&VerifyingKey::from(&key), &sign1, Some(b"detached")).unwrap();
        assert!(verify::<_, Signature>(&VerifyingKey::from(&key), &sign1, Some(b"tampered")).is_err());
    }

    #[test]
    fn tagged_roundtrip_preserves_tag() {
        let key = SigningKey::random(&mut rand::thread_rng());
        let mut sign1 =
            sign::<_, Signature>(&key, coset::Header::default(), Some(vec![1, 2, 3]), None)
                .unwrap();
        sign1.tagged = true;
        let bytes = cbor::to_vec(&sign1).unwrap();
        // d2 is tag 18.
        assert_eq!(bytes[0], 0xd2);
        let parsed: MaybeTagged<CoseSign1> = cbor::from_slice(&bytes).unwrap();
        assert!(parsed.tagged);
        assert_eq!(cbor::to_vec(&parsed).unwrap(), bytes);
    }
}
