//! Holder ("device") and verifier ("reader") sides of the presentment
//! protocol, plus the verification rules applied to received responses.

pub mod authentication;
pub mod device;
pub mod reader;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::cbor;
use crate::definitions::device_key::CoseKey;
use crate::definitions::helpers::Tag24;

/// Serialization of CBOR objects to and from base64 [String]s, for moving
/// session state across process boundaries.
pub trait Stringify: Serialize + for<'a> Deserialize<'a> {
    fn stringify(&self) -> Result<String> {
        let data = cbor::to_vec(self)?;
        Ok(base64::encode(data))
    }

    fn parse(encoded: String) -> Result<Self> {
        let data = base64::decode(encoded)?;
        let this = cbor::from_slice(&data)?;
        Ok(this)
    }
}

impl Stringify for device::Document {}
impl Stringify for device::SessionManagerInit {}
impl Stringify for device::SessionManagerEngaged {}
impl Stringify for device::SessionManager {}
impl Stringify for reader::SessionManager {}

/// The BLE ident value both parties derive from the device's ephemeral key
/// to recognise each other during connection.
pub fn calculate_ble_ident(e_device_key: &Tag24<CoseKey>) -> Result<[u8; 16]> {
    let e_device_key_bytes = cbor::to_vec(e_device_key)?;
    let mut ble_ident = [0u8; 16];

    hkdf::Hkdf::<sha2::Sha256>::new(None, &e_device_key_bytes)
        .expand(b"BLEIdent", &mut ble_ident)
        .map_err(|e| anyhow::anyhow!("unable to perform HKDF: {e}"))?;

    Ok(ble_ident)
}
