//! Data structures from ISO/IEC 18013-5, plus the encrypted and
//! zero-knowledge document extensions carried in response version 1.1.

pub mod device_engagement;
pub mod device_key;
pub mod device_request;
pub mod device_response;
pub mod device_signed;
pub mod encrypted;
pub mod helpers;
pub mod issuer_signed;
pub mod mso;
pub mod session;
pub mod validity_info;
pub mod x509;
pub mod zk;

pub use device_engagement::{
    BleOptions, DeviceEngagement, DeviceRetrievalMethod, NfcOptions, Security, WifiOptions,
};
pub use device_key::{CoseKey, DeviceKeyInfo, KeyAuthorizations};
pub use device_request::{DeviceRequest, DocRequest, ItemsRequest};
pub use device_response::{DeviceResponse, Document};
pub use device_signed::{DeviceAuth, DeviceSigned};
pub use encrypted::{EncryptedDocuments, EncryptionParameters};
pub use issuer_signed::{IssuerSigned, IssuerSignedItem};
pub use mso::{DigestAlgorithm, DigestId, DigestIds, Mso};
pub use session::{SessionData, SessionEstablishment, SessionTranscript, SessionTranscript180135};
pub use validity_info::ValidityInfo;
pub use x509::{TrustAnchorRegistry, X5Chain};
pub use zk::{ZkDocument, ZkSystem, ZkSystemSpec};
