use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::cbor::CborValue;
use crate::definitions::device_engagement::error::Error;

/// The maximum length of the NFC command data field, as specified in
/// ISO/IEC 18013-5 Section 8.3.3.1.2. Values must lie between 255 and 65535
/// inclusive.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandDataLength(u16);

/// The maximum length of the NFC response data field, as specified in
/// ISO/IEC 18013-5 Section 8.3.3.1.2. Values must lie between 256 and 65536
/// inclusive.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResponseDataLength(u32);

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(try_from = "CborValue", into = "CborValue")]
pub struct NfcOptions {
    pub max_len_command_data_field: CommandDataLength,
    pub max_len_response_data_field: ResponseDataLength,
}

impl NfcOptions {
    pub fn new(
        max_len_command_data_field: CommandDataLength,
        max_len_response_data_field: ResponseDataLength,
    ) -> Self {
        Self {
            max_len_command_data_field,
            max_len_response_data_field,
        }
    }
}

impl TryFrom<CborValue> for NfcOptions {
    type Error = Error;

    fn try_from(v: CborValue) -> Result<Self, Error> {
        let map: BTreeMap<i128, ciborium::Value> = v
            .into_inner()
            .into_map()
            .map_err(|_| Error::InvalidNfcOptions)?
            .into_iter()
            .map(|(k, v)| {
                let k = k.into_integer().map_err(|_| Error::InvalidNfcOptions)?;
                Ok((k.into(), v))
            })
            .collect::<Result<_, Error>>()?;
        let command = map
            .get(&0)
            .and_then(|v| v.as_integer())
            .ok_or(Error::InvalidNfcOptions)?;
        let response = map
            .get(&1)
            .and_then(|v| v.as_integer())
            .ok_or(Error::InvalidNfcOptions)?;
        Ok(NfcOptions {
            max_len_command_data_field: CommandDataLength::try_from(i128::from(command))?,
            max_len_response_data_field: ResponseDataLength::try_from(i128::from(response))?,
        })
    }
}

impl From<NfcOptions> for CborValue {
    fn from(o: NfcOptions) -> CborValue {
        ciborium::Value::Map(vec![
            (
                ciborium::Value::Integer(0.into()),
                ciborium::Value::Integer(o.max_len_command_data_field.get().into()),
            ),
            (
                ciborium::Value::Integer(1.into()),
                ciborium::Value::Integer(o.max_len_response_data_field.get().into()),
            ),
        ])
        .into()
    }
}

impl CommandDataLength {
    pub const MIN: CommandDataLength = CommandDataLength(255);
    pub const MAX: CommandDataLength = CommandDataLength(65535);

    pub const fn new(v: u16) -> Option<CommandDataLength> {
        if v >= Self::MIN.get() {
            Some(CommandDataLength(v))
        } else {
            None
        }
    }

    pub const fn get(&self) -> u16 {
        self.0
    }
}

// ISO/IEC 18013-5 does not specify a default, so assume the minimum.
impl Default for CommandDataLength {
    fn default() -> Self {
        Self::MIN
    }
}

impl TryFrom<i128> for CommandDataLength {
    type Error = Error;

    fn try_from(v: i128) -> Result<Self, Error> {
        u16::try_from(v)
            .ok()
            .and_then(CommandDataLength::new)
            .ok_or(Error::InvalidNfcCommandDataLength)
    }
}

impl ResponseDataLength {
    pub const MIN: ResponseDataLength = ResponseDataLength(256);
    pub const MAX: ResponseDataLength = ResponseDataLength(65536);

    pub const fn new(v: u32) -> Option<ResponseDataLength> {
        if v >= Self::MIN.get() && v <= Self::MAX.get() {
            Some(ResponseDataLength(v))
        } else {
            None
        }
    }

    pub const fn get(&self) -> u32 {
        self.0
    }
}

impl Default for ResponseDataLength {
    fn default() -> Self {
        Self::MIN
    }
}

impl TryFrom<i128> for ResponseDataLength {
    type Error = Error;

    fn try_from(v: i128) -> Result<Self, Error> {
        u32::try_from(v)
            .ok()
            .and_then(ResponseDataLength::new)
            .ok_or(Error::InvalidNfcResponseDataLength)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cbor;

    #[test]
    fn length_bounds() {
        assert!(CommandDataLength::new(254).is_none());
        assert!(CommandDataLength::new(255).is_some());
        assert!(ResponseDataLength::new(255).is_none());
        assert!(ResponseDataLength::new(65536).is_some());
    }

    #[test]
    fn roundtrip() {
        let options = NfcOptions::new(
            CommandDataLength::new(4096).unwrap(),
            ResponseDataLength::new(32768).unwrap(),
        );
        let bytes = cbor::to_vec(&options).unwrap();
        let parsed: NfcOptions = cbor::from_slice(&bytes).unwrap();
        assert_eq!(options, parsed);
    }

    #[test]
    fn out_of_range_is_rejected() {
        let value = ciborium::Value::Map(vec![
            (
                ciborium::Value::Integer(0.into()),
                ciborium::Value::Integer(100.into()),
            ),
            (
                ciborium::Value::Integer(1.into()),
                ciborium::Value::Integer(512.into()),
            ),
        ]);
        assert!(NfcOptions::try_from(CborValue::from(value)).is_err());
    }
}
