//! X.509 certificate chains as carried in the `x5chain` unprotected header
//! of an issuerAuth COSE_Sign1, and the trust-anchor check applied to them.

use p256::ecdsa::signature::Verifier;
use p256::ecdsa::VerifyingKey;
use serde::{Deserialize, Serialize};
use x509_cert::certificate::Certificate;
use x509_cert::der::{Decode, Encode};

use crate::definitions::helpers::NonEmptyVec;

/// COSE unprotected header label for an X.509 certificate chain.
pub const X5CHAIN_HEADER_LABEL: i64 = 33;

const ECDSA_WITH_SHA256_OID: &str = "1.2.840.10045.4.3.2";

/// A DER-encoded X.509 certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct X509 {
    pub bytes: Vec<u8>,
}

/// A chain of certificates, leaf first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ciborium::Value", into = "ciborium::Value")]
pub struct X5Chain(NonEmptyVec<X509>);

/// The set of IACA root certificates a verifier is willing to chain to.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrustAnchorRegistry {
    anchors: Vec<X509>,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unable to parse pem: {0}")]
    Pem(pem_rfc7468::Error),
    #[error("unable to parse certificate: {0}")]
    Der(x509_cert::der::Error),
    #[error("at least one certificate must be given")]
    Empty,
    #[error("expected a bstr or an array of bstr for x5chain")]
    InvalidCbor,
    #[error("unsupported signature algorithm on certificate: {0}")]
    UnsupportedAlgorithm(String),
    #[error("unable to interpret subject public key as P-256: {0}")]
    InvalidSubjectPublicKey(String),
    #[error("certificate signature is invalid")]
    InvalidSignature,
    #[error("certificate chain does not terminate at a trusted anchor")]
    NoTrustAnchor,
}

impl X509 {
    pub fn from_pem(data: &[u8]) -> Result<Self, Error> {
        let (_, bytes) = pem_rfc7468::decode_vec(data).map_err(Error::Pem)?;
        Self::from_der(&bytes)
    }

    pub fn from_der(data: &[u8]) -> Result<Self, Error> {
        // Parse and re-encode so the stored bytes are exactly one cert.
        let cert = Certificate::from_der(data).map_err(Error::Der)?;
        Ok(Self {
            bytes: cert.to_der().map_err(Error::Der)?,
        })
    }

    pub fn certificate(&self) -> Result<Certificate, Error> {
        Certificate::from_der(&self.bytes).map_err(Error::Der)
    }

    /// The subject public key, interpreted as a P-256 verifying key.
    pub fn public_key(&self) -> Result<VerifyingKey, Error> {
        let cert = self.certificate()?;
        let spki = cert
            .tbs_certificate
            .subject_public_key_info
            .to_der()
            .map_err(Error::Der)?;
        use p256::pkcs8::DecodePublicKey;
        VerifyingKey::from_public_key_der(&spki)
            .map_err(|e| Error::InvalidSubjectPublicKey(e.to_string()))
    }

    /// Check that this certificate is signed by the holder of `issuer`'s
    /// subject key.
    pub fn verify_signed_by(&self, issuer: &X509) -> Result<(), Error> {
        let cert = self.certificate()?;
        let oid = cert.signature_algorithm.oid.to_string();
        if oid != ECDSA_WITH_SHA256_OID {
            return Err(Error::UnsupportedAlgorithm(oid));
        }
        let message = cert.tbs_certificate.to_der().map_err(Error::Der)?;
        let signature = p256::ecdsa::Signature::from_der(cert.signature.raw_bytes())
            .map_err(|_| Error::InvalidSignature)?;
        issuer
            .public_key()?
            .verify(&message, &signature)
            .map_err(|_| Error::InvalidSignature)
    }
}

impl X5Chain {
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// The end-entity (document signer) certificate.
    pub fn end_entity(&self) -> &X509 {
        self.0.first()
    }

    /// The verifying key of the end-entity certificate.
    pub fn end_entity_key(&self) -> Result<VerifyingKey, Error> {
        self.end_entity().public_key()
    }

    pub fn certs(&self) -> &[X509] {
        self.0.as_ref()
    }

    /// Walk the chain leaf-to-root checking each link, then require the last
    /// certificate to be signed by (or identical to) a registered anchor.
    ///
    /// Full path validation (expiry, name constraints, revocation) is out of
    /// scope; callers wanting it should run the chain through a dedicated
    /// PKI library.
    pub fn validate_against(&self, registry: &TrustAnchorRegistry) -> Result<(), Error> {
        let certs = self.certs();
        for pair in certs.windows(2) {
            pair[0].verify_signed_by(&pair[1])?;
        }
        let last = &certs[certs.len() - 1];
        if registry.anchors.iter().any(|anchor| anchor == last) {
            return Ok(());
        }
        for anchor in &registry.anchors {
            if last.verify_signed_by(anchor).is_ok() {
                return Ok(());
            }
        }
        Err(Error::NoTrustAnchor)
    }
}

impl From<NonEmptyVec<X509>> for X5Chain {
    fn from(v: NonEmptyVec<X509>) -> Self {
        Self(v)
    }
}

impl From<X5Chain> for ciborium::Value {
    fn from(chain: X5Chain) -> ciborium::Value {
        match chain.0.as_ref() {
            [cert] => ciborium::Value::Bytes(cert.bytes.clone()),
            certs => ciborium::Value::Array(
                certs
                    .iter()
                    .map(|x509| ciborium::Value::Bytes(x509.bytes.clone()))
                    .collect(),
            ),
        }
    }
}

impl TryFrom<ciborium::Value> for X5Chain {
    type Error = Error;

    fn try_from(value: ciborium::Value) -> Result<X5Chain, Error> {
        let certs = match value {
            ciborium::Value::Bytes(bytes) => vec![X509::from_der(&bytes)?],
            ciborium::Value::Array(values) => values
                .into_iter()
                .map(|v| match v {
                    ciborium::Value::Bytes(bytes) => X509::from_der(&bytes),
                    _ => Err(Error::InvalidCbor),
                })
                .collect::<Result<_, _>>()?,
            _ => return Err(Error::InvalidCbor),
        };
        Ok(X5Chain(certs.try_into().map_err(|_| Error::Empty)?))
    }
}

#[derive(Default, Debug, Clone)]
pub struct Builder {
    certs: Vec<X509>,
}

impl Builder {
    pub fn with_pem(mut self, data: &[u8]) -> Result<Builder, Error> {
        self.certs.push(X509::from_pem(data)?);
        Ok(self)
    }

    pub fn with_der(mut self, data: &[u8]) -> Result<Builder, Error> {
        self.certs.push(X509::from_der(data)?);
        Ok(self)
    }

    pub fn build(self) -> Result<X5Chain, Error> {
        Ok(X5Chain(self.certs.try_into().map_err(|_| Error::Empty)?))
    }
}

impl TrustAnchorRegistry {
    pub fn from_pem_certificates(pems: &[&[u8]]) -> Result<Self, Error> {
        Ok(Self {
            anchors: pems
                .iter()
                .map(|pem| X509::from_pem(pem))
                .collect::<Result<_, _>>()?,
        })
    }

    pub fn add_anchor(&mut self, anchor: X509) {
        self.anchors.push(anchor);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    static DS_CERT: &[u8] = include_bytes!("../../../test/issuance/ds-cert.pem");
    static ROOT_CERT: &[u8] = include_bytes!("../../../test/issuance/iaca-root-cert.pem");
    static OTHER_ROOT_CERT: &[u8] = include_bytes!("../../../test/issuance/other-root-cert.pem");

    #[test]
    fn single_cert_encodes_as_bytes() {
        let chain = X5Chain::builder().with_pem(DS_CERT).unwrap().build().unwrap();
        let value: ciborium::Value = chain.clone().into();
        assert!(value.is_bytes());
        let parsed = X5Chain::try_from(value).unwrap();
        assert_eq!(chain, parsed);
    }

    #[test]
    fn two_certs_encode_as_array() {
        let chain = X5Chain::builder()
            .with_pem(DS_CERT)
            .unwrap()
            .with_pem(ROOT_CERT)
            .unwrap()
            .build()
            .unwrap();
        let value: ciborium::Value = chain.into();
        assert!(value.is_array());
    }

    #[test]
    fn leaf_chains_to_root() {
        let chain = X5Chain::builder().with_pem(DS_CERT).unwrap().build().unwrap();
        let registry = TrustAnchorRegistry::from_pem_certificates(&[ROOT_CERT]).unwrap();
        chain.validate_against(&registry).unwrap();
    }

    #[test]
    fn leaf_does_not_chain_to_unrelated_root() {
        let chain = X5Chain::builder().with_pem(DS_CERT).unwrap().build().unwrap();
        let registry = TrustAnchorRegistry::from_pem_certificates(&[OTHER_ROOT_CERT]).unwrap();
        assert!(matches!(
            chain.validate_against(&registry),
            Err(Error::NoTrustAnchor)
        ));
    }
}
