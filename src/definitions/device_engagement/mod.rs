//! DeviceEngagement: the structure the mdoc transmits (in a QR code or over
//! an NFC tap) to advertise its ephemeral key and the retrieval methods it
//! supports.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use error::Error;
pub use nfc_options::NfcOptions;

use crate::cbor::{self, CborError};
use crate::definitions::device_key::CoseKey;
use crate::definitions::helpers::{ByteStr, NonEmptyVec, Tag24};

pub mod error;
pub mod nfc_options;

pub type EDeviceKeyBytes = Tag24<CoseKey>;

pub type DeviceRetrievalMethods = NonEmptyVec<DeviceRetrievalMethod>;
pub type ProtocolInfo = ciborium::Value;
pub type Oidc = (u64, String, String);
pub type WebApi = (u64, String, String);

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(
    try_from = "ciborium::Value",
    into = "ciborium::Value",
    rename_all = "camelCase"
)]
pub struct DeviceEngagement {
    pub version: String,
    /// Cipher suite identifier and the device's ephemeral session key.
    pub security: Security,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_retrieval_methods: Option<DeviceRetrievalMethods>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_retrieval_methods: Option<ServerRetrievalMethods>,
    /// RFU; ignored on deserialization and never serialized.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol_info: Option<ProtocolInfo>,
}

impl PartialEq for DeviceEngagement {
    fn eq(&self, other: &Self) -> bool {
        self.version == other.version
            && self.security == other.security
            && self.device_retrieval_methods == other.device_retrieval_methods
            && self.server_retrieval_methods == other.server_retrieval_methods
    }
}

impl Eq for DeviceEngagement {}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Security(pub u64, pub EDeviceKeyBytes);

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "ciborium::Value", into = "ciborium::Value")]
pub enum DeviceRetrievalMethod {
    WIFI(WifiOptions),
    BLE(BleOptions),
    NFC(NfcOptions),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServerRetrievalMethods {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_api: Option<WebApi>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub oidc: Option<Oidc>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(try_from = "ciborium::Value", into = "ciborium::Value")]
pub struct BleOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub peripheral_server_mode: Option<PeripheralServerMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub central_client_mode: Option<CentralClientMode>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeripheralServerMode {
    pub uuid: Uuid,
    pub ble_device_address: Option<ByteStr>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CentralClientMode {
    pub uuid: Uuid,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(try_from = "ciborium::Value", into = "ciborium::Value")]
pub struct WifiOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pass_phrase: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_info_operating_class: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_info_channel_number: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub band_info: Option<ByteStr>,
}

fn int(i: i64) -> ciborium::Value {
    ciborium::Value::Integer(i.into())
}

impl From<DeviceEngagement> for ciborium::Value {
    fn from(device_engagement: DeviceEngagement) -> ciborium::Value {
        let mut map = vec![(int(0), ciborium::Value::Text(device_engagement.version))];
        map.push((
            int(1),
            ciborium::Value::Array(vec![
                int(device_engagement.security.0 as i64),
                device_engagement.security.1.into(),
            ]),
        ));
        if let Some(methods) = device_engagement.device_retrieval_methods {
            let methods = methods.into_iter().map(ciborium::Value::from).collect();
            map.push((int(2), ciborium::Value::Array(methods)));
        }
        if let Some(methods) = device_engagement.server_retrieval_methods {
            map.push((int(3), methods.into()));
        }
        // protocol_info is RFU and intentionally not serialized.
        ciborium::Value::Map(map)
    }
}

impl TryFrom<ciborium::Value> for DeviceEngagement {
    type Error = Error;

    fn try_from(v: ciborium::Value) -> Result<Self, Error> {
        let entries = v.into_map().map_err(|_| Error::InvalidDeviceEngagement)?;
        let mut map: BTreeMap<i128, ciborium::Value> = entries
            .into_iter()
            .map(|(k, v)| {
                let k = k.into_integer().map_err(|_| Error::Cbor)?;
                Ok((k.into(), v))
            })
            .collect::<Result<_, Error>>()?;
        match map.remove(&0) {
            Some(ciborium::Value::Text(v)) if v == "1.0" => {}
            Some(_) => return Err(Error::UnsupportedVersion),
            None => return Err(Error::Malformed),
        }
        let security: Security =
            cbor::from_value(map.remove(&1).ok_or(Error::Malformed)?).map_err(|_| Error::Malformed)?;
        let device_retrieval_methods = map
            .remove(&2)
            .map(cbor::from_value)
            .transpose()
            .map_err(|_| Error::Malformed)?;
        let server_retrieval_methods = map
            .remove(&3)
            .map(cbor::from_value)
            .transpose()
            .map_err(|_| Error::Malformed)?;
        let protocol_info = map.remove(&4);
        if protocol_info.is_some() {
            tracing::warn!("protocol_info is RFU and has been ignored in deserialization");
        }
        Ok(DeviceEngagement {
            version: "1.0".into(),
            security,
            device_retrieval_methods,
            server_retrieval_methods,
            protocol_info,
        })
    }
}

impl Tag24<DeviceEngagement> {
    const BASE64_CONFIG: base64::Config = base64::Config::new(base64::CharacterSet::UrlSafe, false);

    /// Render the engagement as an `mdoc:` URI for display in a QR code.
    pub fn to_qr_code_uri(&self) -> Result<String, CborError> {
        let mut qr_code_uri = String::from("mdoc:");
        base64::encode_config_buf(self.inner_bytes(), Self::BASE64_CONFIG, &mut qr_code_uri);
        Ok(qr_code_uri)
    }

    pub fn from_qr_code_uri(qr_code_uri: &str) -> anyhow::Result<Self> {
        let encoded_de = qr_code_uri
            .strip_prefix("mdoc:")
            .ok_or_else(|| anyhow::anyhow!("qr code has invalid prefix"))?;
        let decoded_de = base64::decode_config(encoded_de, Self::BASE64_CONFIG)?;
        Tag24::<DeviceEngagement>::from_bytes(decoded_de).map_err(Into::into)
    }
}

impl DeviceEngagement {
    #[cfg(test)]
    pub(crate) fn test_value() -> Self {
        let (_, public) = crate::definitions::session::create_p256_ephemeral_keys();
        DeviceEngagement {
            version: "1.0".into(),
            security: Security(1, Tag24::new(public).unwrap()),
            device_retrieval_methods: None,
            server_retrieval_methods: None,
            protocol_info: None,
        }
    }
}

impl DeviceRetrievalMethod {
    pub fn version(&self) -> u64 {
        1
    }

    pub fn transport_type(&self) -> u64 {
        match self {
            Self::NFC(_) => 1,
            Self::BLE(_) => 2,
            Self::WIFI(_) => 3,
        }
    }

    /// Human-oriented name, used when matching against a reader's ordered
    /// carrier preferences.
    pub fn name(&self) -> &'static str {
        match self {
            Self::NFC(_) => "nfc",
            Self::BLE(_) => "ble",
            Self::WIFI(_) => "wifi",
        }
    }
}

impl TryFrom<ciborium::Value> for DeviceRetrievalMethod {
    type Error = Error;

    fn try_from(value: ciborium::Value) -> Result<Self, Error> {
        let list = value.into_array().map_err(|_| Error::Malformed)?;
        let [transport_type, version, options] = <[ciborium::Value; 3]>::try_from(list)
            .map_err(|_| Error::Malformed)?;
        let transport_type: i128 = transport_type
            .into_integer()
            .map_err(|_| Error::Malformed)?
            .into();
        let version: i128 = version.into_integer().map_err(|_| Error::Malformed)?.into();
        if version != 1 {
            return Err(Error::UnsupportedDRM);
        }
        match transport_type {
            1 => Ok(DeviceRetrievalMethod::NFC(NfcOptions::try_from(
                crate::cbor::CborValue::from(options),
            )?)),
            2 => Ok(DeviceRetrievalMethod::BLE(BleOptions::try_from(options)?)),
            3 => Ok(DeviceRetrievalMethod::WIFI(WifiOptions::try_from(options)?)),
            _ => Err(Error::UnsupportedDRM),
        }
    }
}

impl From<DeviceRetrievalMethod> for ciborium::Value {
    fn from(drm: DeviceRetrievalMethod) -> Self {
        let transport_type = int(drm.transport_type() as i64);
        let version = int(drm.version() as i64);
        let retrieval_method = match drm {
            DeviceRetrievalMethod::NFC(opts) => crate::cbor::CborValue::from(opts).into(),
            DeviceRetrievalMethod::BLE(opts) => opts.into(),
            DeviceRetrievalMethod::WIFI(opts) => opts.into(),
        };
        ciborium::Value::Array(vec![transport_type, version, retrieval_method])
    }
}

impl TryFrom<ciborium::Value> for BleOptions {
    type Error = Error;

    fn try_from(v: ciborium::Value) -> Result<Self, Error> {
        let entries = v.into_map().map_err(|_| Error::Malformed)?;
        let mut map: BTreeMap<i128, ciborium::Value> = entries
            .into_iter()
            .map(|(k, v)| {
                let k = k.into_integer().map_err(|_| Error::Cbor)?;
                Ok((k.into(), v))
            })
            .collect::<Result<_, Error>>()?;

        let central_client_mode = match (map.remove(&1), map.remove(&11)) {
            (Some(ciborium::Value::Bool(true)), Some(ciborium::Value::Bytes(uuid))) => {
                let uuid_bytes: [u8; 16] = uuid.try_into().map_err(|_| Error::Malformed)?;
                Some(CentralClientMode {
                    uuid: Uuid::from_bytes(uuid_bytes),
                })
            }
            (Some(ciborium::Value::Bool(false)), _) => None,
            _ => return Err(Error::Malformed),
        };

        let peripheral_server_mode = match (map.remove(&0), map.remove(&10)) {
            (Some(ciborium::Value::Bool(true)), Some(ciborium::Value::Bytes(uuid))) => {
                let uuid_bytes: [u8; 16] = uuid.try_into().map_err(|_| Error::Malformed)?;
                let ble_device_address = match map.remove(&20) {
                    Some(ciborium::Value::Bytes(address)) => Some(address.into()),
                    Some(_) => return Err(Error::Malformed),
                    None => None,
                };
                Some(PeripheralServerMode {
                    uuid: Uuid::from_bytes(uuid_bytes),
                    ble_device_address,
                })
            }
            (Some(ciborium::Value::Bool(false)), _) => None,
            _ => return Err(Error::Malformed),
        };

        Ok(BleOptions {
            central_client_mode,
            peripheral_server_mode,
        })
    }
}

impl From<BleOptions> for ciborium::Value {
    fn from(o: BleOptions) -> ciborium::Value {
        let mut map = vec![];

        match o.central_client_mode {
            Some(CentralClientMode { uuid }) => {
                map.push((int(1), ciborium::Value::Bool(true)));
                map.push((
                    int(11),
                    ciborium::Value::Bytes(uuid.as_bytes().to_vec()),
                ));
            }
            None => {
                map.push((int(1), ciborium::Value::Bool(false)));
            }
        }

        match o.peripheral_server_mode {
            Some(PeripheralServerMode {
                uuid,
                ble_device_address,
            }) => {
                map.push((int(0), ciborium::Value::Bool(true)));
                map.push((
                    int(10),
                    ciborium::Value::Bytes(uuid.as_bytes().to_vec()),
                ));
                if let Some(address) = ble_device_address {
                    map.push((int(20), ciborium::Value::Bytes(address.into())));
                }
            }
            None => {
                map.push((int(0), ciborium::Value::Bool(false)));
            }
        }

        ciborium::Value::Map(map)
    }
}

impl TryFrom<ciborium::Value> for WifiOptions {
    type Error = Error;

    fn try_from(v: ciborium::Value) -> Result<Self, Error> {
        let entries = v.into_map().map_err(|_| Error::InvalidWifiOptions)?;
        let mut map: BTreeMap<i128, ciborium::Value> = entries
            .into_iter()
            .map(|(k, v)| {
                let k = k.into_integer().map_err(|_| Error::InvalidWifiOptions)?;
                Ok((k.into(), v))
            })
            .collect::<Result<_, Error>>()?;

        let pass_phrase = match map.remove(&0) {
            Some(ciborium::Value::Text(text)) => Some(text),
            Some(_) => return Err(Error::InvalidWifiOptions),
            None => None,
        };
        let channel_info_operating_class = match map.remove(&1) {
            Some(ciborium::Value::Integer(i)) => {
                Some(u64::try_from(i128::from(i)).map_err(|_| Error::InvalidWifiOptions)?)
            }
            Some(_) => return Err(Error::InvalidWifiOptions),
            None => None,
        };
        let channel_info_channel_number = match map.remove(&2) {
            Some(ciborium::Value::Integer(i)) => {
                Some(u64::try_from(i128::from(i)).map_err(|_| Error::InvalidWifiOptions)?)
            }
            Some(_) => return Err(Error::InvalidWifiOptions),
            None => None,
        };
        let band_info = match map.remove(&3) {
            Some(ciborium::Value::Bytes(bytes)) => Some(bytes.into()),
            Some(_) => return Err(Error::InvalidWifiOptions),
            None => None,
        };

        Ok(WifiOptions {
            pass_phrase,
            channel_info_operating_class,
            channel_info_channel_number,
            band_info,
        })
    }
}

impl From<WifiOptions> for ciborium::Value {
    fn from(o: WifiOptions) -> ciborium::Value {
        let mut map = vec![];
        if let Some(v) = o.pass_phrase {
            map.push((int(0), ciborium::Value::Text(v)));
        }
        if let Some(v) = o.channel_info_operating_class {
            map.push((int(1), ciborium::Value::Integer(v.into())));
        }
        if let Some(v) = o.channel_info_channel_number {
            map.push((int(2), ciborium::Value::Integer(v.into())));
        }
        if let Some(v) = o.band_info {
            map.push((int(3), ciborium::Value::Bytes(v.into())));
        }
        ciborium::Value::Map(map)
    }
}

impl From<ServerRetrievalMethods> for ciborium::Value {
    fn from(m: ServerRetrievalMethods) -> ciborium::Value {
        let mut map: Vec<(ciborium::Value, ciborium::Value)> = vec![];

        if let Some((x, y, z)) = m.web_api {
            map.push((
                ciborium::Value::Text("webApi".to_string()),
                ciborium::Value::Array(vec![
                    ciborium::Value::Integer(x.into()),
                    ciborium::Value::Text(y),
                    ciborium::Value::Text(z),
                ]),
            ));
        }

        if let Some((x, y, z)) = m.oidc {
            map.push((
                ciborium::Value::Text("oidc".to_string()),
                ciborium::Value::Array(vec![
                    ciborium::Value::Integer(x.into()),
                    ciborium::Value::Text(y),
                    ciborium::Value::Text(z),
                ]),
            ));
        }

        ciborium::Value::Map(map)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::definitions::session::create_p256_ephemeral_keys;

    #[test]
    fn device_engagement_cbor_roundtrip() {
        let (_, public_key) = create_p256_ephemeral_keys();
        let public_key = Tag24::new(public_key).unwrap();

        let uuid = Uuid::now_v1(&[0, 1, 2, 3, 4, 5]);

        let ble_option = BleOptions {
            peripheral_server_mode: None,
            central_client_mode: Some(CentralClientMode { uuid }),
        };

        let device_engagement = DeviceEngagement {
            version: "1.0".into(),
            security: Security(1, public_key),
            device_retrieval_methods: Some(NonEmptyVec::new(DeviceRetrievalMethod::BLE(
                ble_option,
            ))),
            server_retrieval_methods: None,
            protocol_info: None,
        };

        let bytes = crate::cbor::to_vec(&device_engagement).unwrap();
        let roundtripped = crate::cbor::from_slice(&bytes).unwrap();

        assert_eq!(device_engagement, roundtripped)
    }

    #[test]
    fn qr_code_uri_roundtrip() {
        let engagement = Tag24::new(DeviceEngagement::test_value()).unwrap();
        let uri = engagement.to_qr_code_uri().unwrap();
        assert!(uri.starts_with("mdoc:"));
        // base64url without padding
        assert!(!uri.contains('='));
        let parsed = Tag24::<DeviceEngagement>::from_qr_code_uri(&uri).unwrap();
        assert_eq!(engagement, parsed);
    }

    #[test]
    fn unknown_version_is_rejected() {
        let (_, public_key) = create_p256_ephemeral_keys();
        let mut value: ciborium::Value = DeviceEngagement {
            version: "1.0".into(),
            security: Security(1, Tag24::new(public_key).unwrap()),
            device_retrieval_methods: None,
            server_retrieval_methods: None,
            protocol_info: None,
        }
        .into();
        if let ciborium::Value::Map(map) = &mut value {
            map[0].1 = ciborium::Value::Text("2.0".to_string());
        }
        assert_eq!(
            DeviceEngagement::try_from(value),
            Err(Error::UnsupportedVersion)
        );
    }

    fn wifi_options_cbor_roundtrip_test(wifi_options: WifiOptions) {
        let bytes: Vec<u8> = crate::cbor::to_vec(&wifi_options).unwrap();
        let deserialized: WifiOptions = crate::cbor::from_slice(&bytes).unwrap();
        assert_eq!(wifi_options, deserialized);
    }

    #[test]
    fn wifi_options_cbor_roundtrip_all_some() {
        wifi_options_cbor_roundtrip_test(WifiOptions {
            pass_phrase: Some(String::from("secret")),
            channel_info_operating_class: Some(2),
            channel_info_channel_number: Some(3),
            band_info: Some(ByteStr::from(vec![20, 30, 40])),
        });
    }

    #[test]
    fn wifi_options_cbor_roundtrip_all_none() {
        wifi_options_cbor_roundtrip_test(WifiOptions::default());
    }
}
