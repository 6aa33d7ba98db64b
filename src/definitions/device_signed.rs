use std::collections::BTreeMap;

use coset::{CoseMac0, CoseSign1};
use serde::{Deserialize, Serialize};

use crate::cbor::CborValue;
use crate::cose::MaybeTagged;
use crate::definitions::helpers::{NonEmptyMap, Tag24};
use crate::definitions::session::SessionTranscript;

/// The device-signed part of a presented document: self-attested data
/// elements and the device authentication over them.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSigned {
    #[serde(rename = "nameSpaces")]
    pub namespaces: DeviceNamespacesBytes,
    pub device_auth: DeviceAuth,
}

pub type DeviceNamespacesBytes = Tag24<DeviceNamespaces>;
pub type DeviceNamespaces = BTreeMap<String, DeviceSignedItems>;
pub type DeviceSignedItems = NonEmptyMap<String, CborValue>;

/// Device authentication: either an ECDSA signature or an ECDH-derived MAC,
/// both detached over `DeviceAuthenticationBytes`.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DeviceAuth {
    DeviceSignature(MaybeTagged<CoseSign1>),
    DeviceMac(MaybeTagged<CoseMac0>),
}

pub type DeviceAuthenticationBytes<S> = Tag24<DeviceAuthentication<S>>;

/// The structure that device authentication signs over. Never transmitted;
/// both sides construct it independently.
#[derive(Clone, Debug, Serialize)]
pub struct DeviceAuthentication<S: SessionTranscript>(
    &'static str,
    S,
    String,
    DeviceNamespacesBytes,
);

impl<S: SessionTranscript> DeviceAuthentication<S> {
    pub fn new(transcript: S, doc_type: String, namespaces_bytes: DeviceNamespacesBytes) -> Self {
        Self("DeviceAuthentication", transcript, doc_type, namespaces_bytes)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cbor;
    use crate::definitions::session::SessionTranscript180135;

    #[test]
    fn device_authentication_shape() {
        let transcript = SessionTranscript180135(
            Tag24::new(crate::definitions::device_engagement::DeviceEngagement::test_value())
                .unwrap(),
            Tag24::new(crate::definitions::device_key::CoseKey::EC2 {
                crv: crate::definitions::device_key::cose_key::EC2Curve::P256,
                x: vec![0; 32],
                y: crate::definitions::device_key::cose_key::EC2Y::SignBit(false),
            })
            .unwrap(),
            crate::definitions::session::Handover::QR,
        );
        let namespaces = Tag24::new(DeviceNamespaces::new()).unwrap();
        let auth =
            DeviceAuthentication::new(transcript, "org.iso.18013.5.1.mDL".to_string(), namespaces);
        let value = cbor::into_value(&auth).unwrap();
        let array = value.into_array().unwrap();
        assert_eq!(array.len(), 4);
        assert_eq!(
            array[0],
            ciborium::Value::Text("DeviceAuthentication".to_string())
        );
    }
}
