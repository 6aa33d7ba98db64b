//! ISO/IEC 18013-5 mdoc presentment.
//!
//! This crate implements the mdoc response protocol: construction and
//! verification of `DeviceResponse` structures (issuer-signed digest trees,
//! device authentication by signature or MAC, HPKE-encrypted and
//! zero-knowledge-proved document variants), the session transcript and
//! session-layer encryption that bind a response to a particular engagement,
//! and the engagement/transport negotiation state machine (QR and NFC) that
//! establishes the channel before documents are exchanged.
//!
//! The three top-level roles are:
//!
//! - [`issuance`]: building and signing an mdoc on the issuing authority side.
//! - [`presentation::device`]: holder-side response construction.
//! - [`presentation::reader`]: verifier-side request construction and response
//!   verification.
//!
//! [`engagement`] and [`transport`] carry the proximity flows (QR handover,
//! NFC tap, APDU data transfer) that surround the exchange.

pub mod cbor;
pub mod cose;
pub mod crypto;
pub mod definitions;
pub mod engagement;
pub mod issuance;
pub mod presentation;
pub mod transport;
