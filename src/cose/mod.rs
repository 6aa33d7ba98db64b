//! COSE_Sign1 / COSE_Mac0 support on top of [coset].

pub mod mac0;
pub mod sign1;

use coset::{iana, AsCborValue, TaggedCborSerializable};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("COSE structure is missing a payload")]
    NoPayload,
    #[error("a detached payload was provided, but the COSE structure carries its own")]
    DoublePayload,
    #[error("malformed signature: {0}")]
    MalformedSignature(signature::Error),
    #[error("signing failed: {0}")]
    Signing(signature::Error),
    #[error("verification failed: {0}")]
    VerificationFailed(signature::Error),
    #[error("MAC tag does not match")]
    TagMismatch,
    #[error("CBOR error: {0}")]
    Cbor(#[from] crate::cbor::CborError),
}

/// Trait to represent the signature algorithm of a signer or verifier.
pub trait SignatureAlgorithm {
    fn algorithm(&self) -> iana::Algorithm;
}

/// A COSE structure which may or may not carry its CBOR tag on the wire.
///
/// ISO/IEC 18013-5 permits both forms. The parsed form is remembered so that
/// re-serialization is byte-faithful.
#[derive(Debug, Clone, PartialEq)]
pub struct MaybeTagged<T> {
    pub tagged: bool,
    pub inner: T,
}

impl<T> MaybeTagged<T> {
    pub fn new(tagged: bool, inner: T) -> Self {
        Self { tagged, inner }
    }
}

impl<T> std::ops::Deref for MaybeTagged<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T> std::ops::DerefMut for MaybeTagged<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner
    }
}

impl<T> Serialize for MaybeTagged<T>
where
    T: AsCborValue + TaggedCborSerializable + Clone,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let value = self
            .inner
            .clone()
            .to_cbor_value()
            .map_err(serde::ser::Error::custom)?;
        if self.tagged {
            ciborium::Value::Tag(T::TAG, Box::new(value)).serialize(serializer)
        } else {
            value.serialize(serializer)
        }
    }
}

impl<'de, T> Deserialize<'de> for MaybeTagged<T>
where
    T: AsCborValue + TaggedCborSerializable,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = ciborium::Value::deserialize(deserializer)?;
        let (tagged, value) = match value {
            ciborium::Value::Tag(tag, inner) if tag == T::TAG => (true, *inner),
            other => (false, other),
        };
        let inner = T::from_cbor_value(value).map_err(serde::de::Error::custom)?;
        Ok(MaybeTagged { tagged, inner })
    }
}

mod p256_alg {
    use super::SignatureAlgorithm;
    use coset::iana;
    use p256::ecdsa::{SigningKey, VerifyingKey};

    impl SignatureAlgorithm for SigningKey {
        fn algorithm(&self) -> iana::Algorithm {
            iana::Algorithm::ES256
        }
    }

    impl SignatureAlgorithm for VerifyingKey {
        fn algorithm(&self) -> iana::Algorithm {
            iana::Algorithm::ES256
        }
    }
}

mod p384_alg {
    use super::SignatureAlgorithm;
    use coset::iana;
    use p384::ecdsa::{SigningKey, VerifyingKey};

    impl SignatureAlgorithm for SigningKey {
        fn algorithm(&self) -> iana::Algorithm {
            iana::Algorithm::ES384
        }
    }

    impl SignatureAlgorithm for VerifyingKey {
        fn algorithm(&self) -> iana::Algorithm {
            iana::Algorithm::ES384
        }
    }
}

mod hmac_alg {
    use super::SignatureAlgorithm;
    use coset::iana;
    use hmac::Hmac;
    use sha2::Sha256;

    impl SignatureAlgorithm for Hmac<Sha256> {
        fn algorithm(&self) -> iana::Algorithm {
            iana::Algorithm::HMAC_256_256
        }
    }
}
