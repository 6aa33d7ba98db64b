//! Thin wrapper around [ciborium] providing the byte-level encode/decode
//! entry points used throughout the crate, plus an orderable [Value] for use
//! as a map key.

use std::borrow::{Borrow, BorrowMut};
use std::io::Cursor;
use std::ops::{Deref, DerefMut};

use serde::{de, Deserialize, Serialize};
use thiserror::Error;

/// Wraps [ciborium::Value] and implements [PartialEq], [Eq], [PartialOrd] and
/// [Ord], so it can be used in maps and sets.
#[derive(Debug, Clone)]
pub struct Value(pub ciborium::Value);

pub type CborValue = Value;

#[derive(Debug, Error)]
pub enum CborError {
    /// CBOR decoding failure.
    #[error("CBOR decoding failure: {0}")]
    DecodeFailed(String),
    /// CBOR encoding failure.
    #[error("CBOR encoding failure: {0}")]
    EncodeFailed(String),
    /// Unexpected CBOR item encountered (got, want).
    #[error("unexpected item: {0}, want {1}")]
    UnexpectedItem(&'static str, &'static str),
}

pub fn to_vec<T>(value: &T) -> Result<Vec<u8>, CborError>
where
    T: Serialize,
{
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| CborError::EncodeFailed(e.to_string()))?;
    Ok(buf)
}

pub fn from_slice<T>(slice: &[u8]) -> Result<T, CborError>
where
    T: de::DeserializeOwned,
{
    ciborium::from_reader(Cursor::new(&slice)).map_err(|e| CborError::DecodeFailed(e.to_string()))
}

/// Convert a [ciborium::Value] into a type `T`.
#[allow(clippy::needless_pass_by_value)]
pub fn from_value<T>(value: ciborium::Value) -> Result<T, CborError>
where
    T: de::DeserializeOwned,
{
    // Roundtrip through a buffer; ciborium::Value does not expose a direct
    // serde::Deserializer.
    let buf = to_vec(&value)?;
    from_slice(buf.as_slice())
}

pub fn into_value<S>(v: S) -> Result<ciborium::Value, CborError>
where
    S: Serialize,
{
    let bytes = to_vec(&v)?;
    from_slice(&bytes)
}

impl Value {
    pub fn into_inner(self) -> ciborium::Value {
        self.0
    }
}

impl Deref for Value {
    type Target = ciborium::Value;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Value {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // ciborium's partial_cmp is total in practice; fall back to Equal for
        // the unreachable case instead of panicking.
        self.0
            .partial_cmp(&other.0)
            .unwrap_or(std::cmp::Ordering::Equal)
    }
}

impl std::hash::Hash for Value {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        // Hash the canonical encoding; cheap enough for the small keys this
        // is used with.
        to_vec(&self.0).unwrap_or_default().hash(state)
    }
}

impl From<ciborium::Value> for Value {
    fn from(value: ciborium::Value) -> Self {
        Self(value)
    }
}

impl From<Value> for ciborium::Value {
    fn from(value: Value) -> Self {
        value.0
    }
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        ciborium::Value::deserialize(deserializer).map(Value)
    }
}

impl AsRef<ciborium::Value> for Value {
    fn as_ref(&self) -> &ciborium::Value {
        &self.0
    }
}

impl Borrow<ciborium::Value> for Value {
    fn borrow(&self) -> &ciborium::Value {
        &self.0
    }
}

impl BorrowMut<ciborium::Value> for Value {
    fn borrow_mut(&mut self) -> &mut ciborium::Value {
        &mut self.0
    }
}

macro_rules! impl_from {
    ($variant:path, $for_type:ty) => {
        impl From<$for_type> for Value {
            fn from(v: $for_type) -> Value {
                $variant(v.into()).into()
            }
        }
    };
}

impl_from!(ciborium::Value::Bool, bool);
impl_from!(ciborium::Value::Integer, i8);
impl_from!(ciborium::Value::Integer, i16);
impl_from!(ciborium::Value::Integer, i32);
impl_from!(ciborium::Value::Integer, i64);
impl_from!(ciborium::Value::Integer, u8);
impl_from!(ciborium::Value::Integer, u16);
impl_from!(ciborium::Value::Integer, u32);
impl_from!(ciborium::Value::Integer, u64);
impl_from!(ciborium::Value::Float, f32);
impl_from!(ciborium::Value::Float, f64);
impl_from!(ciborium::Value::Bytes, Vec<u8>);
impl_from!(ciborium::Value::Text, String);
impl_from!(ciborium::Value::Array, Vec<ciborium::Value>);

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn roundtrip_map_value() {
        let value = ciborium::Value::Map(vec![(
            ciborium::Value::Integer(1.into()),
            ciborium::Value::Text("a".to_string()),
        )]);
        let bytes = to_vec(&value).unwrap();
        let back: ciborium::Value = from_slice(&bytes).unwrap();
        assert_eq!(value, back);
    }

    #[test]
    fn value_orders_in_btreemap() {
        let mut map = std::collections::BTreeMap::new();
        map.insert(Value::from(2u8), "b");
        map.insert(Value::from(1u8), "a");
        assert_eq!(map.values().copied().collect::<Vec<_>>(), vec!["a", "b"]);
    }
}
