use coset::CoseSign1;
use serde::{Deserialize, Serialize};

use crate::cbor::CborValue;
use crate::cose::MaybeTagged;
use crate::definitions::helpers::{NonEmptyMap, NonEmptyVec, Tag24};

/// The reader's request for data elements, sent over the established session.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRequest {
    pub version: String,
    pub doc_requests: NonEmptyVec<DocRequest>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocRequest {
    pub items_request: ItemsRequestBytes,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reader_auth: Option<MaybeTagged<CoseSign1>>,
}

pub type ItemsRequestBytes = Tag24<ItemsRequest>;
pub type Namespaces = NonEmptyMap<String, DataElements>;
/// Element identifier mapped to its intent-to-retain flag.
pub type DataElements = NonEmptyMap<String, bool>;

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ItemsRequest {
    pub doc_type: String,
    #[serde(rename = "nameSpaces")]
    pub namespaces: Namespaces,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_info: Option<std::collections::BTreeMap<String, CborValue>>,
}

impl DeviceRequest {
    pub const VERSION: &'static str = "1.0";
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cbor;

    #[test]
    fn items_request_roundtrip() {
        let request = ItemsRequest {
            doc_type: "org.iso.18013.5.1.mDL".to_string(),
            namespaces: NonEmptyMap::new(
                "org.iso.18013.5.1".to_string(),
                NonEmptyMap::new("age_over_18".to_string(), false),
            ),
            request_info: None,
        };
        let bytes = cbor::to_vec(&Tag24::new(request.clone()).unwrap()).unwrap();
        let parsed: ItemsRequestBytes = cbor::from_slice(&bytes).unwrap();
        assert_eq!(*parsed.as_ref(), request);
    }
}
