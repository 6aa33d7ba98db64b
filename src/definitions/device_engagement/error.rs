use crate::definitions::device_key::cose_key::Error as CoseKeyError;
use crate::definitions::helpers::tag24::Error as Tag24Error;

/// Errors that can occur when deserialising a DeviceEngagement.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("expected device engagement version 1.0")]
    UnsupportedVersion,
    #[error("unsupported device retrieval method")]
    UnsupportedDRM,
    #[error("invalid DeviceEngagement found")]
    InvalidDeviceEngagement,
    #[error("invalid WifiOptions found")]
    InvalidWifiOptions,
    #[error("invalid NfcOptions found")]
    InvalidNfcOptions,
    #[error("malformed object not recognised")]
    Malformed,
    #[error("something went wrong parsing a cose key")]
    CoseKey,
    #[error("something went wrong parsing a tag24")]
    Tag24,
    #[error("could not deserialize from cbor")]
    Cbor,
    #[error("NFC command data length must be between 255 and 65535")]
    InvalidNfcCommandDataLength,
    #[error("NFC response data length must be between 256 and 65536")]
    InvalidNfcResponseDataLength,
}

impl From<CoseKeyError> for Error {
    fn from(_: CoseKeyError) -> Self {
        Error::CoseKey
    }
}

impl From<Tag24Error> for Error {
    fn from(_: Tag24Error) -> Self {
        Error::Tag24
    }
}

impl From<crate::cbor::CborError> for Error {
    fn from(_: crate::cbor::CborError) -> Self {
        Error::Cbor
    }
}
