pub mod cose_key;

use serde::{Deserialize, Serialize};

use crate::cbor::CborValue;
use crate::definitions::helpers::{NonEmptyMap, NonEmptyVec};

pub use cose_key::CoseKey;

pub type EDeviceKey = CoseKey;
pub type EReaderKey = CoseKey;

/// Mdoc authentication public key and information related to it, as carried
/// in the MSO.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceKeyInfo {
    pub device_key: CoseKey,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_authorizations: Option<KeyAuthorizations>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_info: Option<std::collections::BTreeMap<i64, CborValue>>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct KeyAuthorizations {
    #[serde(skip_serializing_if = "Option::is_none", rename = "nameSpaces")]
    pub namespaces: Option<NonEmptyVec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_elements: Option<NonEmptyMap<String, NonEmptyVec<String>>>,
}

impl KeyAuthorizations {
    /// A namespace that is fully authorized must not also appear in the
    /// element authorizations.
    pub fn validate(&self) -> Result<(), Error> {
        let (Some(namespaces), Some(data_elements)) = (&self.namespaces, &self.data_elements)
        else {
            return Ok(());
        };
        for namespace in namespaces.iter() {
            if data_elements.contains_key(namespace) {
                return Err(Error::DoubleAuthorization(namespace.clone()));
            }
        }
        Ok(())
    }

    /// Check whether the key is permitted to sign over the given element.
    ///
    /// A fully authorized namespace must not also appear in the element
    /// authorizations.
    pub fn validate_element(&self, namespace: &str, element: &str) -> Result<(), Error> {
        if let Some(namespaces) = &self.namespaces {
            if namespaces.iter().any(|ns| ns == namespace) {
                return Ok(());
            }
        }
        if let Some(data_elements) = &self.data_elements {
            if let Some(elements) = data_elements.get(&namespace.to_string()) {
                if elements.iter().any(|el| el == element) {
                    return Ok(());
                }
            }
        }
        Err(Error::UnauthorizedElement {
            namespace: namespace.to_string(),
            element: element.to_string(),
        })
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("device key is not authorized to sign over element '{element}' in namespace '{namespace}'")]
    UnauthorizedElement { namespace: String, element: String },
    #[error("namespace '{0}' is fully authorized and cannot also authorize individual elements")]
    DoubleAuthorization(String),
}

impl From<CoseKey> for DeviceKeyInfo {
    fn from(device_key: CoseKey) -> Self {
        Self {
            device_key,
            key_authorizations: None,
            key_info: None,
        }
    }
}
