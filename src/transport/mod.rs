//! Transports that carry session-layer messages once engagement is complete.
//!
//! The NFC data transfer path is fully implemented here (APDU parsing, DO53
//! enveloping, chunked exchange). BLE and Wi-Fi Aware are platform plumbing
//! and are expected to be provided by the embedding application through the
//! [Transport] trait.

pub mod nfc;

use async_trait::async_trait;

/// A connected, bidirectional message transport.
///
/// Implementations move whole session-layer messages; fragmentation and
/// reassembly happen below this interface.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, message: Vec<u8>) -> anyhow::Result<()>;
    async fn recv(&mut self) -> anyhow::Result<Vec<u8>>;
}
