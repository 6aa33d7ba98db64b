//! COSE_Mac0 construction and verification with HMAC-SHA256.

use coset::{mac_structure_data, CoseMac0, CoseMac0Builder, HeaderBuilder, MacContext};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::{Error, MaybeTagged, SignatureAlgorithm};

/// The `MAC_structure` bytes that are authenticated for a COSE_Mac0.
pub fn tag_payload(mac0: &CoseMac0, detached_payload: Option<&[u8]>) -> Result<Vec<u8>, Error> {
    let payload = match (mac0.payload.as_ref(), detached_payload) {
        (Some(attached), None) => attached.as_slice(),
        (None, Some(detached)) => detached,
        (Some(_), Some(_)) => return Err(Error::DoublePayload),
        (None, None) => return Err(Error::NoPayload),
    };
    Ok(mac_structure_data(
        MacContext::CoseMac0,
        mac0.protected.clone(),
        &[],
        payload,
    ))
}

/// Build a COSE_Mac0 over an attached or detached payload.
pub fn tag(
    key: Hmac<Sha256>,
    unprotected: coset::Header,
    payload: Option<Vec<u8>>,
    detached_payload: Option<&[u8]>,
) -> Result<MaybeTagged<CoseMac0>, Error> {
    let protected = HeaderBuilder::new().algorithm(key.algorithm()).build();
    let mut builder = CoseMac0Builder::new()
        .protected(protected)
        .unprotected(unprotected);
    if let Some(payload) = payload {
        if detached_payload.is_some() {
            return Err(Error::DoublePayload);
        }
        builder = builder.payload(payload);
    }
    let mut mac0 = builder.build();
    let to_mac = tag_payload(&mac0, detached_payload)?;
    let mut key = key;
    key.update(&to_mac);
    mac0.tag = key.finalize().into_bytes().to_vec();
    Ok(MaybeTagged::new(false, mac0))
}

/// Check the authentication tag of a COSE_Mac0.
pub fn verify(
    key: Hmac<Sha256>,
    mac0: &CoseMac0,
    detached_payload: Option<&[u8]>,
) -> Result<(), Error> {
    let to_mac = tag_payload(mac0, detached_payload)?;
    let mut key = key;
    key.update(&to_mac);
    key.verify_slice(&mac0.tag).map_err(|_| Error::TagMismatch)
}

#[cfg(test)]
mod test {
    use super::*;

    fn key() -> Hmac<Sha256> {
        Hmac::<Sha256>::new_from_slice(&[7u8; 32]).unwrap()
    }

    #[test]
    fn tag_and_verify_detached() {
        let mac0 = tag(key(), coset::Header::default(), None, Some(b"detached")).unwrap();
        verify(key(), &mac0, Some(b"detached")).unwrap();
        assert!(verify(key(), &mac0, Some(b"other")).is_err());
    }

    #[test]
    fn wrong_key_fails() {
        let mac0 = tag(key(), coset::Header::default(), Some(b"hi".to_vec()), None).unwrap();
        let other = Hmac::<Sha256>::new_from_slice(&[8u8; 32]).unwrap();
        assert!(verify(other, &mac0, None).is_err());
    }
}
