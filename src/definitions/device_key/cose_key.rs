use std::collections::BTreeMap;

use coset::iana::Algorithm;
use coset::{AsCborValue, CborSerializable};
use p256::EncodedPoint;
use serde::{Deserialize, Serialize};

use crate::cbor::CborValue;

/// An implementation of RFC-8152 [COSE_Key](https://datatracker.ietf.org/doc/html/rfc8152#section-13)
/// restricted to the requirements of ISO/IEC 18013-5:2021.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "CborValue", into = "CborValue")]
pub enum CoseKey {
    EC2 { crv: EC2Curve, x: Vec<u8>, y: EC2Y },
    OKP { crv: OKPCurve, x: Vec<u8> },
}

/// The sign bit or value of the y-coordinate for the EC point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EC2Y {
    Value(Vec<u8>),
    SignBit(bool),
}

/// The RFC-8152 identifier of the curve, for EC2 key type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EC2Curve {
    P256,
    P384,
    P521,
    P256K,
}

/// The RFC-8152 identifier of the curve, for OKP key type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OKPCurve {
    X25519,
    X448,
    Ed25519,
    Ed448,
}

/// Errors that can occur when deserialising a COSE_Key.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("COSE_Key of kty 'EC2' missing x coordinate")]
    EC2MissingX,
    #[error("COSE_Key of kty 'EC2' missing y coordinate")]
    EC2MissingY,
    #[error("expected to parse a CBOR bool or bstr for y-coordinate")]
    InvalidTypeY,
    #[error("expected to parse a CBOR map")]
    NotAMap,
    #[error("unable to discern the elliptic curve")]
    UnknownCurve,
    #[error("this implementation of COSE_Key only supports P-256, P-384, P-521, Ed25519 and Ed448 elliptic curves")]
    UnsupportedCurve,
    #[error("this implementation of COSE_Key only supports EC2 and OKP keys")]
    UnsupportedKeyType,
    #[error("could not reconstruct coordinates from the provided COSE_Key")]
    InvalidCoseKey,
}

impl CoseKey {
    pub fn signature_algorithm(&self) -> Option<Algorithm> {
        match self {
            CoseKey::EC2 {
                crv: EC2Curve::P256,
                ..
            } => Some(Algorithm::ES256),
            CoseKey::EC2 {
                crv: EC2Curve::P384,
                ..
            } => Some(Algorithm::ES384),
            CoseKey::EC2 {
                crv: EC2Curve::P521,
                ..
            } => Some(Algorithm::ES512),
            CoseKey::OKP {
                crv: OKPCurve::Ed25519,
                ..
            }
            | CoseKey::OKP {
                crv: OKPCurve::Ed448,
                ..
            } => Some(Algorithm::EdDSA),
            _ => None,
        }
    }
}

impl CborSerializable for CoseKey {}
impl AsCborValue for CoseKey {
    fn from_cbor_value(value: ciborium::Value) -> coset::Result<Self> {
        CborValue::from(value).try_into().map_err(|_| {
            coset::CoseError::DecodeFailed(ciborium::de::Error::Semantic(
                None,
                "invalid COSE_Key".to_string(),
            ))
        })
    }

    fn to_cbor_value(self) -> coset::Result<ciborium::Value> {
        let v: CborValue = self.into();
        Ok(v.into())
    }
}

fn int(i: i64) -> ciborium::Value {
    ciborium::Value::Integer(i.into())
}

impl From<CoseKey> for CborValue {
    fn from(key: CoseKey) -> CborValue {
        let mut map: Vec<(ciborium::Value, ciborium::Value)> = Vec::new();
        match key {
            CoseKey::EC2 { crv, x, y } => {
                // kty: 1, EC2: 2
                map.push((int(1), int(2)));
                // crv: -1
                map.push((
                    int(-1),
                    match crv {
                        EC2Curve::P256 => int(1),
                        EC2Curve::P384 => int(2),
                        EC2Curve::P521 => int(3),
                        EC2Curve::P256K => int(8),
                    },
                ));
                // x: -2
                map.push((int(-2), ciborium::Value::Bytes(x)));
                // y: -3
                map.push((
                    int(-3),
                    match y {
                        EC2Y::Value(v) => ciborium::Value::Bytes(v),
                        EC2Y::SignBit(b) => ciborium::Value::Bool(b),
                    },
                ));
            }
            CoseKey::OKP { crv, x } => {
                // kty: 1, OKP: 1
                map.push((int(1), int(1)));
                // crv: -1
                map.push((
                    int(-1),
                    match crv {
                        OKPCurve::X25519 => int(4),
                        OKPCurve::X448 => int(5),
                        OKPCurve::Ed25519 => int(6),
                        OKPCurve::Ed448 => int(7),
                    },
                ));
                // x: -2
                map.push((int(-2), ciborium::Value::Bytes(x)));
            }
        }
        CborValue::from(ciborium::Value::Map(map))
    }
}

impl TryFrom<CborValue> for CoseKey {
    type Error = Error;

    fn try_from(v: CborValue) -> Result<Self, Error> {
        let entries = v.into_inner().into_map().map_err(|_| Error::NotAMap)?;
        let mut map: BTreeMap<CborValue, ciborium::Value> = entries
            .into_iter()
            .map(|(k, v)| (CborValue::from(k), v))
            .collect();
        let kty = map
            .remove(&CborValue::from(ciborium::Value::Integer(1.into())))
            .and_then(|v| v.as_integer())
            .ok_or(Error::UnsupportedKeyType)?;
        let crv_id: i128 = map
            .remove(&CborValue::from(ciborium::Value::Integer((-1).into())))
            .and_then(|v| v.as_integer())
            .ok_or(Error::UnknownCurve)?
            .into();
        let x = map
            .remove(&CborValue::from(ciborium::Value::Integer((-2).into())))
            .ok_or(Error::EC2MissingX)?
            .into_bytes()
            .map_err(|_| Error::EC2MissingX)?;
        match i128::from(kty) {
            // EC2
            2 => {
                let crv = crv_id.try_into()?;
                let y = map
                    .remove(&CborValue::from(ciborium::Value::Integer((-3).into())))
                    .ok_or(Error::EC2MissingY)?;
                let y = match y {
                    ciborium::Value::Bytes(b) => EC2Y::Value(b),
                    ciborium::Value::Bool(b) => EC2Y::SignBit(b),
                    _ => return Err(Error::InvalidTypeY),
                };
                Ok(CoseKey::EC2 { crv, x, y })
            }
            // OKP
            1 => Ok(CoseKey::OKP {
                crv: crv_id.try_into()?,
                x,
            }),
            _ => Err(Error::UnsupportedKeyType),
        }
    }
}

impl TryFrom<i128> for EC2Curve {
    type Error = Error;

    fn try_from(crv_id: i128) -> Result<Self, Error> {
        match crv_id {
            1 => Ok(EC2Curve::P256),
            2 => Ok(EC2Curve::P384),
            3 => Ok(EC2Curve::P521),
            8 => Ok(EC2Curve::P256K),
            _ => Err(Error::UnsupportedCurve),
        }
    }
}

impl TryFrom<i128> for OKPCurve {
    type Error = Error;

    fn try_from(crv_id: i128) -> Result<Self, Error> {
        match crv_id {
            4 => Ok(OKPCurve::X25519),
            5 => Ok(OKPCurve::X448),
            6 => Ok(OKPCurve::Ed25519),
            7 => Ok(OKPCurve::Ed448),
            _ => Err(Error::UnsupportedCurve),
        }
    }
}

impl TryFrom<CoseKey> for EncodedPoint {
    type Error = Error;

    fn try_from(value: CoseKey) -> Result<EncodedPoint, Error> {
        match value {
            CoseKey::EC2 {
                crv: EC2Curve::P256,
                x,
                y,
            } => match y {
                EC2Y::Value(y) => {
                    if x.len() != 32 || y.len() != 32 {
                        return Err(Error::InvalidCoseKey);
                    }
                    Ok(EncodedPoint::from_affine_coordinates(
                        x.as_slice().into(),
                        y.as_slice().into(),
                        false,
                    ))
                }
                EC2Y::SignBit(sign) => {
                    let mut bytes = x;
                    bytes.insert(0, if sign { 3 } else { 2 });
                    EncodedPoint::from_bytes(bytes).map_err(|_| Error::InvalidCoseKey)
                }
            },
            _ => Err(Error::InvalidCoseKey),
        }
    }
}

impl TryFrom<CoseKey> for p256::PublicKey {
    type Error = Error;

    fn try_from(value: CoseKey) -> Result<p256::PublicKey, Error> {
        let point: EncodedPoint = value.try_into()?;
        p256::PublicKey::from_sec1_bytes(point.as_bytes()).map_err(|_| Error::InvalidCoseKey)
    }
}

impl From<p256::PublicKey> for CoseKey {
    fn from(key: p256::PublicKey) -> CoseKey {
        let point = EncodedPoint::from(&key);
        CoseKey::EC2 {
            crv: EC2Curve::P256,
            x: point.x().map(|x| x.to_vec()).unwrap_or_default(),
            y: EC2Y::Value(point.y().map(|y| y.to_vec()).unwrap_or_default()),
        }
    }
}

impl From<&p256::ecdsa::VerifyingKey> for CoseKey {
    fn from(key: &p256::ecdsa::VerifyingKey) -> CoseKey {
        p256::PublicKey::from(key).into()
    }
}

impl TryFrom<CoseKey> for p256::ecdsa::VerifyingKey {
    type Error = Error;

    fn try_from(value: CoseKey) -> Result<p256::ecdsa::VerifyingKey, Error> {
        let pk: p256::PublicKey = value.try_into()?;
        Ok(pk.into())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cbor;

    #[test]
    fn p256_key_roundtrip() {
        let sk = p256::SecretKey::random(&mut rand::thread_rng());
        let key: CoseKey = sk.public_key().into();
        let bytes = cbor::to_vec(&key).unwrap();
        let parsed: CoseKey = cbor::from_slice(&bytes).unwrap();
        assert_eq!(key, parsed);
        let recovered: p256::PublicKey = parsed.try_into().unwrap();
        assert_eq!(sk.public_key(), recovered);
    }

    #[test]
    fn compressed_point_is_expanded() {
        let sk = p256::SecretKey::random(&mut rand::thread_rng());
        let point = EncodedPoint::from(sk.public_key()).compress();
        let key = CoseKey::EC2 {
            crv: EC2Curve::P256,
            x: point.x().unwrap().to_vec(),
            y: EC2Y::SignBit(point.as_bytes()[0] == 3),
        };
        let recovered: p256::PublicKey = key.try_into().unwrap();
        assert_eq!(sk.public_key(), recovered);
    }

    #[test]
    fn signature_algorithm_for_curves() {
        let key = CoseKey::EC2 {
            crv: EC2Curve::P256,
            x: vec![0; 32],
            y: EC2Y::SignBit(false),
        };
        assert_eq!(key.signature_algorithm(), Some(Algorithm::ES256));
    }
}
