#![allow(dead_code)]

use std::collections::HashMap;

use anyhow::{Context, Result};
use p256::pkcs8::DecodePrivateKey;

use mdoc_presentment::cbor::CborValue;
use mdoc_presentment::definitions::device_key::KeyAuthorizations;
use mdoc_presentment::definitions::helpers::NonEmptyVec;
use mdoc_presentment::definitions::x509::TrustAnchorRegistry;
use mdoc_presentment::definitions::{CoseKey, DeviceKeyInfo, DigestAlgorithm, ValidityInfo, X5Chain};
use mdoc_presentment::issuance::Mdoc;
use mdoc_presentment::presentation::device::{Document, Documents};

pub const DOC_TYPE: &str = "org.iso.18013.5.1.mDL";
pub const NAMESPACE: &str = "org.iso.18013.5.1";

pub static DS_CERT: &[u8] = include_bytes!("../test/issuance/ds-cert.pem");
pub static DS_KEY: &str = include_str!("../test/issuance/ds-key.pem");
pub static IACA_ROOT_CERT: &[u8] = include_bytes!("../test/issuance/iaca-root-cert.pem");
pub static OTHER_ROOT_CERT: &[u8] = include_bytes!("../test/issuance/other-root-cert.pem");

#[allow(dead_code)]
fn main() {}

pub fn issuer_signer() -> Result<p256::ecdsa::SigningKey> {
    Ok(p256::SecretKey::from_pkcs8_pem(DS_KEY)
        .context("could not parse issuer key")?
        .into())
}

pub fn issuer_x5chain() -> Result<X5Chain> {
    X5Chain::builder()
        .with_pem(DS_CERT)
        .context("could not parse issuer certificate")?
        .build()
        .context("could not build x5chain")
}

pub fn trust_anchors() -> Result<TrustAnchorRegistry> {
    TrustAnchorRegistry::from_pem_certificates(&[IACA_ROOT_CERT])
        .context("could not build trust anchor registry")
}

pub fn validity(
    valid_from: time::OffsetDateTime,
    valid_until: time::OffsetDateTime,
) -> ValidityInfo {
    ValidityInfo {
        signed: valid_from,
        valid_from,
        valid_until,
        expected_update: None,
    }
}

#[allow(dead_code)]
pub fn default_validity() -> ValidityInfo {
    validity(
        time::macros::datetime!(2026-01-01 00:00 UTC),
        time::macros::datetime!(2036-01-01 00:00 UTC),
    )
}

/// Issue Erika Mustermann's mDL to the given device key.
pub fn issue_mdl(device_key: CoseKey, validity_info: ValidityInfo) -> Result<Mdoc> {
    let elements: HashMap<String, CborValue> = [
        (
            "family_name".to_string(),
            ciborium::Value::Text("Mustermann".to_string()).into(),
        ),
        (
            "given_name".to_string(),
            ciborium::Value::Text("Erika".to_string()).into(),
        ),
        (
            "age_over_18".to_string(),
            ciborium::Value::Bool(true).into(),
        ),
    ]
    .into_iter()
    .collect();
    let namespaces = [(NAMESPACE.to_string(), elements)].into_iter().collect();

    let device_key_info = DeviceKeyInfo {
        device_key,
        key_authorizations: Some(KeyAuthorizations {
            namespaces: Some(NonEmptyVec::new(NAMESPACE.to_string())),
            data_elements: None,
        }),
        key_info: None,
    };

    Mdoc::builder()
        .doc_type(DOC_TYPE.to_string())
        .namespaces(namespaces)
        .x5chain(issuer_x5chain()?)
        .validity_info(validity_info)
        .digest_algorithm(DigestAlgorithm::SHA256)
        .device_key_info(device_key_info)
        .issue::<_, p256::ecdsa::Signature>(&issuer_signer()?)
        .context("could not issue mdoc")
}

/// The holder's document set: one freshly issued mDL.
#[allow(dead_code)]
pub fn mdl_documents(device_key: CoseKey) -> Result<Documents> {
    let mdoc = issue_mdl(device_key, default_validity())?;
    Ok(Documents::new(DOC_TYPE.to_string(), Document::from(mdoc)))
}
