use std::collections::{BTreeMap, HashMap, HashSet};

use anyhow::{anyhow, Result};
use coset::{iana, CoseSign1Builder, HeaderBuilder};
use rand::Rng;
use serde::{Deserialize, Serialize};
use signature::{SignatureEncoding, Signer};

use crate::cbor::{self, CborValue};
use crate::cose::{sign1, MaybeTagged, SignatureAlgorithm};
use crate::definitions::helpers::{NonEmptyMap, NonEmptyVec, Tag24};
use crate::definitions::issuer_signed::{IssuerNamespaces, IssuerSignedItemBytes};
use crate::definitions::x509::{X5Chain, X5CHAIN_HEADER_LABEL};
use crate::definitions::{
    DeviceKeyInfo, DigestAlgorithm, DigestId, DigestIds, IssuerSignedItem, Mso, ValidityInfo,
};

pub type Namespaces = HashMap<String, HashMap<String, CborValue>>;

/// A signed mdoc.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Mdoc {
    pub doc_type: String,
    pub mso: Mso,
    pub namespaces: IssuerNamespaces,
    pub issuer_auth: MaybeTagged<coset::CoseSign1>,
}

/// An incomplete mdoc, requiring a remotely produced signature to complete.
#[derive(Debug, Clone)]
pub struct PreparedMdoc {
    doc_type: String,
    mso: Mso,
    namespaces: IssuerNamespaces,
    sign1: coset::CoseSign1,
    signature_payload: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct Builder {
    doc_type: Option<String>,
    namespaces: Option<Namespaces>,
    validity_info: Option<ValidityInfo>,
    digest_algorithm: Option<DigestAlgorithm>,
    device_key_info: Option<DeviceKeyInfo>,
    x5chain: Option<X5Chain>,
}

impl Mdoc {
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// Prepare an mdoc for remote signing.
    pub fn prepare(
        doc_type: String,
        namespaces: Namespaces,
        validity_info: ValidityInfo,
        digest_algorithm: DigestAlgorithm,
        device_key_info: DeviceKeyInfo,
        x5chain: X5Chain,
        signature_algorithm: iana::Algorithm,
    ) -> Result<PreparedMdoc> {
        if let Some(authorizations) = &device_key_info.key_authorizations {
            authorizations.validate()?;
        }

        let issuer_namespaces = to_issuer_namespaces(namespaces)?;
        let value_digests = digest_namespaces(&issuer_namespaces, digest_algorithm)?;

        let mso = Mso {
            version: "1.0".to_string(),
            digest_algorithm,
            value_digests,
            device_key_info,
            doc_type: doc_type.clone(),
            validity_info,
        };

        let mso_bytes = cbor::to_vec(&Tag24::new(&mso)?)?;

        let protected = HeaderBuilder::new().algorithm(signature_algorithm).build();
        let unprotected = HeaderBuilder::new()
            .value(X5CHAIN_HEADER_LABEL, x5chain.into())
            .build();
        let sign1 = CoseSign1Builder::new()
            .protected(protected)
            .unprotected(unprotected)
            .payload(mso_bytes)
            .build();
        let signature_payload = sign1::signature_payload(&sign1, None)
            .map_err(|e| anyhow!("error preparing issuerAuth: {e}"))?;

        Ok(PreparedMdoc {
            doc_type,
            namespaces: issuer_namespaces,
            mso,
            sign1,
            signature_payload,
        })
    }

    /// Directly sign and issue an mdoc.
    pub fn issue<S, Sig>(
        doc_type: String,
        namespaces: Namespaces,
        validity_info: ValidityInfo,
        digest_algorithm: DigestAlgorithm,
        device_key_info: DeviceKeyInfo,
        x5chain: X5Chain,
        signer: &S,
    ) -> Result<Mdoc>
    where
        S: Signer<Sig> + SignatureAlgorithm,
        Sig: SignatureEncoding,
    {
        let prepared = Self::prepare(
            doc_type,
            namespaces,
            validity_info,
            digest_algorithm,
            device_key_info,
            x5chain,
            signer.algorithm(),
        )?;

        let signature = signer
            .try_sign(prepared.signature_payload())
            .map_err(|e| anyhow!("error signing issuerAuth: {e}"))?
            .to_vec();

        Ok(prepared.complete(signature))
    }
}

impl PreparedMdoc {
    /// The payload a remote signer must sign.
    pub fn signature_payload(&self) -> &[u8] {
        &self.signature_payload
    }

    /// Supply the signature to complete the prepared mdoc.
    pub fn complete(self, signature: Vec<u8>) -> Mdoc {
        let PreparedMdoc {
            doc_type,
            namespaces,
            mso,
            mut sign1,
            ..
        } = self;

        sign1.signature = signature;

        Mdoc {
            doc_type,
            mso,
            namespaces,
            // issuerAuth is carried tagged on the wire.
            issuer_auth: MaybeTagged::new(true, sign1),
        }
    }
}

impl Builder {
    /// Set the document type.
    pub fn doc_type(mut self, doc_type: String) -> Self {
        self.doc_type = Some(doc_type);
        self
    }

    /// Set the data elements.
    pub fn namespaces(mut self, namespaces: Namespaces) -> Self {
        self.namespaces = Some(namespaces);
        self
    }

    /// Set the validity window.
    pub fn validity_info(mut self, validity_info: ValidityInfo) -> Self {
        self.validity_info = Some(validity_info);
        self
    }

    /// Set the digest algorithm used for hashing the data elements.
    pub fn digest_algorithm(mut self, digest_algorithm: DigestAlgorithm) -> Self {
        self.digest_algorithm = Some(digest_algorithm);
        self
    }

    /// Set the information about the device key this mdoc is issued to.
    pub fn device_key_info(mut self, device_key_info: DeviceKeyInfo) -> Self {
        self.device_key_info = Some(device_key_info);
        self
    }

    /// Set the x5chain of the issuing key.
    pub fn x5chain(mut self, x5chain: X5Chain) -> Self {
        self.x5chain = Some(x5chain);
        self
    }

    /// Prepare the mdoc for remote signing.
    ///
    /// The signature algorithm must be known ahead of time as it is a
    /// required protected header.
    pub fn prepare(self, signature_algorithm: iana::Algorithm) -> Result<PreparedMdoc> {
        Mdoc::prepare(
            self.doc_type
                .ok_or_else(|| anyhow!("missing parameter: 'doc_type'"))?,
            self.namespaces
                .ok_or_else(|| anyhow!("missing parameter: 'namespaces'"))?,
            self.validity_info
                .ok_or_else(|| anyhow!("missing parameter: 'validity_info'"))?,
            self.digest_algorithm
                .ok_or_else(|| anyhow!("missing parameter: 'digest_algorithm'"))?,
            self.device_key_info
                .ok_or_else(|| anyhow!("missing parameter: 'device_key_info'"))?,
            self.x5chain
                .ok_or_else(|| anyhow!("missing parameter: 'x5chain'"))?,
            signature_algorithm,
        )
    }

    /// Directly issue an mdoc.
    pub fn issue<S, Sig>(self, signer: &S) -> Result<Mdoc>
    where
        S: Signer<Sig> + SignatureAlgorithm,
        Sig: SignatureEncoding,
    {
        Mdoc::issue(
            self.doc_type
                .ok_or_else(|| anyhow!("missing parameter: 'doc_type'"))?,
            self.namespaces
                .ok_or_else(|| anyhow!("missing parameter: 'namespaces'"))?,
            self.validity_info
                .ok_or_else(|| anyhow!("missing parameter: 'validity_info'"))?,
            self.digest_algorithm
                .ok_or_else(|| anyhow!("missing parameter: 'digest_algorithm'"))?,
            self.device_key_info
                .ok_or_else(|| anyhow!("missing parameter: 'device_key_info'"))?,
            self.x5chain
                .ok_or_else(|| anyhow!("missing parameter: 'x5chain'"))?,
            signer,
        )
    }
}

fn to_issuer_namespaces(namespaces: Namespaces) -> Result<IssuerNamespaces> {
    namespaces
        .into_iter()
        .map(|(name, elements)| {
            to_issuer_signed_items(elements)
                .map(Tag24::new)
                .collect::<Result<Vec<IssuerSignedItemBytes>, _>>()
                .map_err(|err| anyhow!("unable to encode IssuerSignedItem as cbor: {err}"))
                .and_then(|items| {
                    NonEmptyVec::try_from(items)
                        .map_err(|_| anyhow!("at least one element required in each namespace"))
                })
                .map(|elems| (name, elems))
        })
        .collect::<Result<HashMap<String, NonEmptyVec<IssuerSignedItemBytes>>>>()
        .and_then(|namespaces| {
            NonEmptyMap::try_from(namespaces.into_iter().collect::<BTreeMap<_, _>>())
                .map_err(|_| anyhow!("at least one namespace required"))
        })
}

fn to_issuer_signed_items(
    elements: HashMap<String, CborValue>,
) -> impl Iterator<Item = IssuerSignedItem> {
    let mut used_ids = HashSet::new();
    elements.into_iter().map(move |(key, value)| {
        let digest_id = generate_digest_id(&mut used_ids);
        let random = Vec::from(rand::thread_rng().gen::<[u8; 16]>()).into();
        IssuerSignedItem {
            digest_id,
            random,
            element_identifier: key,
            element_value: value,
        }
    })
}

fn digest_namespaces(
    namespaces: &IssuerNamespaces,
    digest_algorithm: DigestAlgorithm,
) -> Result<NonEmptyMap<String, DigestIds>> {
    namespaces
        .iter()
        .map(|(name, elements)| Ok((name.clone(), digest_namespace(elements, digest_algorithm)?)))
        .collect::<Result<BTreeMap<String, DigestIds>>>()
        .map(NonEmptyMap::maybe_new)?
        .ok_or_else(|| anyhow!("at least one namespace required"))
}

fn digest_namespace(
    elements: &[IssuerSignedItemBytes],
    digest_algorithm: DigestAlgorithm,
) -> Result<DigestIds> {
    let mut used_ids = elements
        .iter()
        .map(|item| item.as_ref().digest_id)
        .collect();

    // Decoy digests over random bytes so the digest table does not reveal
    // how many elements the mdoc carries.
    let decoy_ids = std::iter::repeat_with(|| generate_digest_id(&mut used_ids));
    let decoy_bytes = std::iter::repeat_with(|| {
        std::iter::repeat_with(|| rand::thread_rng().gen::<u8>())
            .take(512)
            .collect::<Vec<u8>>()
    });
    let decoy_digests = decoy_ids
        .zip(decoy_bytes)
        .map(Result::<_, anyhow::Error>::Ok)
        .take(rand::thread_rng().gen_range(5..10));

    elements
        .iter()
        .map(|item| Ok((item.as_ref().digest_id, cbor::to_vec(item)?)))
        .chain(decoy_digests)
        .map(|result| {
            let (digest_id, bytes) = result?;
            Ok((digest_id, digest_algorithm.digest(&bytes).into()))
        })
        .collect::<Result<BTreeMap<_, _>>>()
        .map(NonEmptyMap::maybe_new)?
        .ok_or_else(|| anyhow!("at least one element required in each namespace"))
}

fn generate_digest_id(used_ids: &mut HashSet<DigestId>) -> DigestId {
    let mut digest_id;
    loop {
        digest_id = DigestId::new(rand::thread_rng().gen::<u32>().into());
        if used_ids.insert(digest_id) {
            break;
        }
    }
    digest_id
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use crate::definitions::device_key::{CoseKey, KeyAuthorizations};
    use time::OffsetDateTime;

    static ISSUER_CERT: &[u8] = include_bytes!("../../test/issuance/ds-cert.pem");
    static ISSUER_KEY: &str = include_str!("../../test/issuance/ds-key.pem");

    pub(crate) fn minimal_mdoc(device_key: CoseKey) -> Mdoc {
        let doc_type = String::from("org.iso.18013.5.1.mDL");

        let mdl_namespace = String::from("org.iso.18013.5.1");
        let mdl_elements: HashMap<String, CborValue> = [
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
        let namespaces = [(mdl_namespace.clone(), mdl_elements)].into_iter().collect();

        let x5chain = X5Chain::builder()
            .with_pem(ISSUER_CERT)
            .unwrap()
            .build()
            .unwrap();

        let now = OffsetDateTime::now_utc();
        let validity_info = ValidityInfo {
            signed: now,
            valid_from: now,
            valid_until: now + time::Duration::days(365),
            expected_update: None,
        };

        let device_key_info = DeviceKeyInfo {
            device_key,
            key_authorizations: Some(KeyAuthorizations {
                namespaces: Some(NonEmptyVec::new(mdl_namespace)),
                data_elements: None,
            }),
            key_info: None,
        };

        use p256::pkcs8::DecodePrivateKey;
        let signer: p256::ecdsa::SigningKey = p256::SecretKey::from_pkcs8_pem(ISSUER_KEY)
            .expect("failed to parse pem")
            .into();

        Mdoc::builder()
            .doc_type(doc_type)
            .namespaces(namespaces)
            .x5chain(x5chain)
            .validity_info(validity_info)
            .digest_algorithm(DigestAlgorithm::SHA256)
            .device_key_info(device_key_info)
            .issue::<_, p256::ecdsa::Signature>(&signer)
            .expect("failed to issue mdoc")
    }

    #[test]
    fn issue_minimal_mdoc() {
        let device_key = p256::SecretKey::random(&mut rand::thread_rng());
        let mdoc = minimal_mdoc(device_key.public_key().into());
        assert_eq!(mdoc.mso.doc_type, "org.iso.18013.5.1.mDL");
        // Decoy digests inflate the digest table past the element count.
        let digests = mdoc
            .mso
            .value_digests
            .get(&"org.iso.18013.5.1".to_string())
            .unwrap();
        assert!(digests.len() > 3);
    }

    #[test]
    fn remote_signing_matches_direct() {
        use p256::pkcs8::DecodePrivateKey;
        let signer: p256::ecdsa::SigningKey = p256::SecretKey::from_pkcs8_pem(ISSUER_KEY)
            .unwrap()
            .into();
        let device_key = p256::SecretKey::random(&mut rand::thread_rng());

        let prepared = Mdoc::builder()
            .doc_type("org.iso.18013.5.1.mDL".to_string())
            .namespaces(
                [(
                    "org.iso.18013.5.1".to_string(),
                    [(
                        "family_name".to_string(),
                        CborValue::from(ciborium::Value::Text("Mustermann".to_string())),
                    )]
                    .into_iter()
                    .collect(),
                )]
                .into_iter()
                .collect(),
            )
            .x5chain(
                X5Chain::builder()
                    .with_pem(ISSUER_CERT)
                    .unwrap()
                    .build()
                    .unwrap(),
            )
            .validity_info(ValidityInfo {
                signed: OffsetDateTime::now_utc(),
                valid_from: OffsetDateTime::now_utc(),
                valid_until: OffsetDateTime::now_utc() + time::Duration::days(1),
                expected_update: None,
            })
            .digest_algorithm(DigestAlgorithm::SHA256)
            .device_key_info(DeviceKeyInfo {
                device_key: device_key.public_key().into(),
                key_authorizations: None,
                key_info: None,
            })
            .prepare(iana::Algorithm::ES256)
            .unwrap();

        use signature::Signer;
        let signature: p256::ecdsa::Signature =
            signer.try_sign(prepared.signature_payload()).unwrap();
        let mdoc = prepared.complete(signature.to_vec());
        assert!(!mdoc.issuer_auth.signature.is_empty());
    }
}
