//! Construction of signed mdocs.
//!
//! Issuance here exists to produce holdable credentials for the presentment
//! flows; it is not a full issuing-authority implementation.
pub mod mdoc;

pub use mdoc::{Mdoc, Namespaces};
