//! The verifier's side of the interaction: scan the engagement, establish
//! the encrypted session, send requests and validate responses.

use std::collections::BTreeMap;

use p256::{FieldBytes, NonZeroScalar, SecretKey};
use serde::{Deserialize, Serialize};
use serde_json::json;
use time::OffsetDateTime;

use crate::cbor::{self, CborValue};
use crate::definitions::device_request::{self, DeviceRequest, DocRequest, ItemsRequest};
use crate::definitions::helpers::{NonEmptyVec, Tag24};
use crate::definitions::session::{
    self, create_p256_ephemeral_keys, derive_device_session_key, derive_reader_session_key,
    get_shared_secret, Handover, SessionData, SessionEstablishment, SessionTranscript180135,
};
use crate::definitions::x509::TrustAnchorRegistry;
use crate::definitions::{DeviceEngagement, DeviceResponse};
use crate::presentation::authentication;

/// The reader's session state. The ephemeral secret is retained for the
/// lifetime of the session so that MAC-authenticated documents can be
/// checked.
#[derive(Serialize, Deserialize)]
pub struct SessionManager {
    session_transcript: SessionTranscript180135,
    sk_device: [u8; 32],
    device_message_counter: u32,
    sk_reader: [u8; 32],
    reader_message_counter: u32,
    e_reader_secret: Vec<u8>,
    trust_anchor_registry: Option<TrustAnchorRegistry>,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("the qr code had the wrong prefix or the contained data could not be decoded: {0}")]
    InvalidQrCode(anyhow::Error),
    #[error("device did not transmit any data")]
    DeviceTransmissionError,
    #[error("device did not transmit an mdoc")]
    DocumentTypeError,
    #[error("the device response could not be decrypted")]
    DecryptionError,
    #[error("device terminated the session")]
    SessionTermination,
    #[error("could not reconstruct the reader's ephemeral key")]
    InvalidEphemeralKey,
    #[error("unable to derive session keys: {0}")]
    Session(#[from] session::Error),
    #[error("CBOR error: {0}")]
    Cbor(#[from] crate::cbor::CborError),
    #[error("encoding error: {0}")]
    Tag24(#[from] crate::definitions::helpers::tag24::Error),
    #[error(transparent)]
    Verification(#[from] authentication::Error),
}

/// The outcome of handling a device response: verified, decoded data
/// elements grouped by doc type and namespace.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidatedResponse {
    pub items: BTreeMap<String, BTreeMap<String, serde_json::Value>>,
}

impl SessionManager {
    /// Establish a new session from a scanned QR engagement, producing the
    /// [SessionEstablishment] bytes to transmit and the BLE ident to find
    /// the device with.
    pub fn establish_session(
        qr_code: String,
        namespaces: device_request::Namespaces,
        trust_anchor_registry: Option<TrustAnchorRegistry>,
    ) -> Result<(Self, Vec<u8>, [u8; 16]), Error> {
        let device_engagement_bytes =
            Tag24::<DeviceEngagement>::from_qr_code_uri(&qr_code).map_err(Error::InvalidQrCode)?;

        let e_device_key = device_engagement_bytes.as_ref().security.1.clone();
        let ble_ident = super::calculate_ble_ident(&e_device_key)
            .map_err(|_| Error::InvalidEphemeralKey)?;

        let (e_reader_secret, e_reader_key_pub) = create_p256_ephemeral_keys();
        let e_reader_key_bytes = Tag24::new(e_reader_key_pub)?;

        let session_transcript = SessionTranscript180135(
            device_engagement_bytes,
            e_reader_key_bytes.clone(),
            Handover::QR,
        );
        let session_transcript_bytes = Tag24::new(session_transcript.clone())?;

        let shared_secret = get_shared_secret(e_device_key.into_inner(), &e_reader_secret)?;
        let sk_reader = derive_reader_session_key(&shared_secret, &session_transcript_bytes)?.into();
        let sk_device = derive_device_session_key(&shared_secret, &session_transcript_bytes)?.into();

        let mut session_manager = Self {
            session_transcript,
            sk_device,
            device_message_counter: 0,
            sk_reader,
            reader_message_counter: 0,
            e_reader_secret: e_reader_secret.to_bytes().to_vec(),
            trust_anchor_registry,
        };

        let request = session_manager.build_request(namespaces)?;
        let session_establishment = SessionEstablishment {
            e_reader_key: e_reader_key_bytes,
            data: request.into(),
        };
        let session_request = cbor::to_vec(&session_establishment)?;

        Ok((session_manager, session_request, ble_ident))
    }

    /// Encrypt a follow-up request within the established session.
    pub fn new_request(&mut self, namespaces: device_request::Namespaces) -> Result<Vec<u8>, Error> {
        let request = self.build_request(namespaces)?;
        let session_data = SessionData {
            data: Some(request.into()),
            status: None,
        };
        Ok(cbor::to_vec(&session_data)?)
    }

    fn build_request(&mut self, namespaces: device_request::Namespaces) -> Result<Vec<u8>, Error> {
        let items_request = ItemsRequest {
            doc_type: "org.iso.18013.5.1.mDL".into(),
            namespaces,
            request_info: None,
        };
        let doc_request = DocRequest {
            reader_auth: None,
            items_request: Tag24::new(items_request)?,
        };
        let device_request = DeviceRequest {
            version: DeviceRequest::VERSION.to_string(),
            doc_requests: NonEmptyVec::new(doc_request),
        };
        let device_request_bytes = cbor::to_vec(&device_request)?;
        session::encrypt_reader_data(
            &self.sk_reader.into(),
            &device_request_bytes,
            &mut self.reader_message_counter,
        )
        .map_err(|_| Error::DecryptionError)
    }

    fn e_reader_scalar(&self) -> Result<NonZeroScalar, Error> {
        let secret = SecretKey::from_bytes(FieldBytes::from_slice(&self.e_reader_secret))
            .map_err(|_| Error::InvalidEphemeralKey)?;
        Ok(secret.to_nonzero_scalar())
    }

    /// Decrypt a device response, verify every document in it and decode the
    /// disclosed data elements.
    pub fn handle_response(&mut self, response: &[u8]) -> Result<ValidatedResponse, Error> {
        let session_data: SessionData = cbor::from_slice(response)?;
        if let Some(session::Status::SessionTermination) = session_data.status {
            return Err(Error::SessionTermination);
        }
        let encrypted_response = session_data.data.ok_or(Error::DeviceTransmissionError)?;
        let decrypted_response = session::decrypt_device_data(
            &self.sk_device.into(),
            encrypted_response.as_ref(),
            &mut self.device_message_counter,
        )
        .map_err(|_| Error::DecryptionError)?;

        let device_response: DeviceResponse = cbor::from_slice(&decrypted_response)?;
        self.validate_response(&device_response)
    }

    fn validate_response(
        &self,
        device_response: &DeviceResponse,
    ) -> Result<ValidatedResponse, Error> {
        let e_reader_key = self.e_reader_scalar()?;
        device_response.verify(
            &self.session_transcript,
            OffsetDateTime::now_utc(),
            Some(&e_reader_key),
            self.trust_anchor_registry.as_ref(),
        )?;

        let mut validated = ValidatedResponse::default();
        let documents = device_response
            .documents()
            .map_err(|_| Error::DocumentTypeError)?
            .ok_or(Error::DocumentTypeError)?;
        for document in documents.iter() {
            let mut namespaces = BTreeMap::new();
            if let Some(issuer_namespaces) = &document.issuer_signed.namespaces {
                for (namespace, items) in issuer_namespaces.iter() {
                    let elements = items
                        .iter()
                        .map(|item| {
                            let item = item.as_ref();
                            (
                                item.element_identifier.clone(),
                                parse_response(item.element_value.clone()),
                            )
                        })
                        .collect();
                    namespaces.insert(namespace.clone(), serde_json::Value::Object(elements));
                }
            }
            validated.items.insert(document.doc_type.clone(), namespaces);
        }
        Ok(validated)
    }
}

/// Decode a disclosed CBOR element into JSON for presentation. Byte strings
/// become base64, dates keep their string form, unrepresentable values are
/// rendered through serde_json's CBOR mapping.
pub fn parse_response(value: CborValue) -> serde_json::Value {
    match value.into_inner() {
        ciborium::Value::Text(s) => json!(s),
        ciborium::Value::Bool(b) => json!(b),
        ciborium::Value::Integer(i) => match i64::try_from(i) {
            Ok(i) => json!(i),
            Err(_) => serde_json::Value::Null,
        },
        ciborium::Value::Float(f) => json!(f),
        ciborium::Value::Bytes(b) => json!(base64::encode(b)),
        ciborium::Value::Array(a) => {
            serde_json::Value::Array(a.into_iter().map(|v| parse_response(v.into())).collect())
        }
        ciborium::Value::Map(m) => serde_json::Value::Object(
            m.into_iter()
                .filter_map(|(k, v)| {
                    let key = k.into_text().ok()?;
                    Some((key, parse_response(v.into())))
                })
                .collect(),
        ),
        // Dates (tags 0 and 1004) and other tagged values carry their
        // content through.
        ciborium::Value::Tag(_, inner) => parse_response((*inner).into()),
        _ => serde_json::Value::Null,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_response_decodes_common_element_values() {
        assert_eq!(
            parse_response(ciborium::Value::Text("Erika".to_string()).into()),
            json!("Erika")
        );
        assert_eq!(parse_response(ciborium::Value::Bool(true).into()), json!(true));
        assert_eq!(
            parse_response(ciborium::Value::Integer(175.into()).into()),
            json!(175)
        );
        assert_eq!(
            parse_response(
                ciborium::Value::Tag(
                    1004,
                    Box::new(ciborium::Value::Text("1988-03-12".to_string()))
                )
                .into()
            ),
            json!("1988-03-12")
        );
        assert_eq!(
            parse_response(ciborium::Value::Bytes(vec![1, 2, 3]).into()),
            json!(base64::encode([1, 2, 3]))
        );
    }
}
