use coset::CoseSign1;
use serde::{Deserialize, Serialize};

use crate::cbor::CborValue;
use crate::cose::MaybeTagged;
use crate::definitions::helpers::{ByteStr, NonEmptyMap, NonEmptyVec, Tag24};
use crate::definitions::mso::DigestId;

/// The issuer-signed part of an mdoc: disclosed data elements grouped by
/// namespace, and the COSE_Sign1 whose payload is the `Tag24`-wrapped MSO.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuerSigned {
    #[serde(skip_serializing_if = "Option::is_none", rename = "nameSpaces")]
    pub namespaces: Option<IssuerNamespaces>,
    pub issuer_auth: MaybeTagged<CoseSign1>,
}

pub type IssuerNamespaces = NonEmptyMap<String, NonEmptyVec<IssuerSignedItemBytes>>;
pub type IssuerSignedItemBytes = Tag24<IssuerSignedItem>;

/// A single data element as attested to by the issuer.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IssuerSignedItem {
    #[serde(rename = "digestID")]
    pub digest_id: DigestId,
    pub random: ByteStr,
    pub element_identifier: String,
    pub element_value: CborValue,
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cbor;

    #[test]
    fn issuer_signed_item_roundtrip() {
        let item = IssuerSignedItem {
            digest_id: DigestId::new(42),
            random: vec![0u8; 16].into(),
            element_identifier: "family_name".to_string(),
            element_value: ciborium::Value::Text("Mustermann".to_string()).into(),
        };
        let tagged = Tag24::new(item.clone()).unwrap();
        let bytes = cbor::to_vec(&tagged).unwrap();
        let parsed: IssuerSignedItemBytes = cbor::from_slice(&bytes).unwrap();
        assert_eq!(*parsed.as_ref(), item);
        assert_eq!(parsed.inner_bytes(), tagged.inner_bytes());
    }
}
