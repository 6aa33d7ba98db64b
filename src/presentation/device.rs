//! The holder's side of the interaction, modelled as a state machine:
//! initialise with documents, engage over QR or NFC, establish the encrypted
//! session, then answer request/response cycles.

use std::collections::BTreeMap;
use std::num::ParseIntError;

use coset::{CoseSign1Builder, HeaderBuilder};
use p256::FieldBytes;
use serde::{Deserialize, Serialize};
use hmac::Mac;
use signature::{SignatureEncoding, Signer};
use uuid::Uuid;

use crate::cbor::{self, CborValue};
use crate::cose::{self, MaybeTagged};
use crate::definitions::device_engagement::{DeviceRetrievalMethod, ServerRetrievalMethods};
use crate::definitions::device_request::{DeviceRequest, DocRequest, ItemsRequest};
use crate::definitions::device_response::{
    Document as DeviceResponseDoc, DocumentError, DocumentErrorCode, DocumentErrors,
    Errors as NamespaceErrors, Status,
};
use crate::definitions::device_signed::{
    DeviceAuth, DeviceAuthentication, DeviceNamespacesBytes, DeviceSigned,
};
use crate::definitions::helpers::{tag24, NonEmptyMap, NonEmptyVec, Tag24};
use crate::definitions::issuer_signed::{IssuerSigned, IssuerSignedItemBytes};
use crate::definitions::session::{
    self, derive_device_session_key, derive_e_mac_key, derive_reader_session_key,
    get_shared_secret, Handover, SessionData, SessionTranscript, SessionTranscript180135,
};
use crate::definitions::{
    CoseKey, DeviceEngagement, DeviceResponse, IssuerSignedItem, Mso, Security,
    SessionEstablishment,
};
use crate::issuance::Mdoc;

/// Initialisation state: holds the documents, the freshly generated
/// ephemeral device key and the device engagement.
#[derive(Serialize, Deserialize)]
pub struct SessionManagerInit {
    documents: Documents,
    e_device_key: Vec<u8>,
    device_engagement: Tag24<DeviceEngagement>,
}

/// Engaged state: the engagement has been shown to the reader and the device
/// is waiting for session establishment.
#[derive(Clone, Serialize, Deserialize)]
pub struct SessionManagerEngaged {
    documents: Documents,
    e_device_key: Vec<u8>,
    device_engagement: Tag24<DeviceEngagement>,
    handover: Handover,
}

/// Established state: request/response cycles happen here.
#[derive(Clone, Serialize, Deserialize)]
pub struct SessionManager {
    documents: Documents,
    session_transcript: SessionTranscript180135,
    sk_device: [u8; 32],
    device_message_counter: u32,
    sk_reader: [u8; 32],
    reader_message_counter: u32,
    state: State,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub enum State {
    #[default]
    AwaitingRequest,
    Signing(PreparedDeviceResponse),
    ReadyToRespond(Vec<u8>),
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("error encoding value to CBOR: {0}")]
    Tag24CborEncoding(#[from] tag24::Error),
    #[error("unable to generate shared secret: {0}")]
    SharedSecretGeneration(session::Error),
    #[error("error encoding value to CBOR: {0}")]
    CborEncoding(#[from] crate::cbor::CborError),
    #[error("session manager was used incorrectly")]
    ApiMisuse,
    #[error("could not parse age attestation claim")]
    ParsingError(#[from] ParseIntError),
    #[error("age_over element identifier is malformed")]
    PrefixError,
}

/// The documents the device owns, keyed by doc type.
pub type Documents = NonEmptyMap<DocType, Document>;
type DocType = String;

/// Device-internal document datatype.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub issuer_auth: MaybeTagged<coset::CoseSign1>,
    pub mso: Mso,
    pub namespaces: Namespaces,
}

/// A response in the middle of being signed. Documents move one at a time
/// from `prepared_documents` to `signed_documents` as signatures arrive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreparedDeviceResponse {
    prepared_documents: Vec<PreparedDocument>,
    signed_documents: Vec<DeviceResponseDoc>,
    document_errors: Option<DocumentErrors>,
    status: Status,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PreparedDocument {
    id: Uuid,
    doc_type: String,
    issuer_signed: IssuerSigned,
    device_namespaces: DeviceNamespacesBytes,
    unsigned_cose_sign1: MaybeTagged<coset::CoseSign1>,
    signature_payload: Vec<u8>,
    errors: Option<NamespaceErrors>,
}

type Namespaces = NonEmptyMap<Namespace, NonEmptyMap<ElementIdentifier, IssuerSignedItemBytes>>;
type Namespace = String;
type ElementIdentifier = String;

/// The items requested by the reader.
pub type RequestedItems = Vec<ItemsRequest>;
/// The items the holder has permitted to be shared, grouped by doc type and
/// namespace.
pub type PermittedItems = BTreeMap<DocType, BTreeMap<Namespace, Vec<ElementIdentifier>>>;

impl SessionManagerInit {
    /// Generate the ephemeral device key and assemble the engagement.
    pub fn initialise(
        documents: Documents,
        device_retrieval_methods: Option<NonEmptyVec<DeviceRetrievalMethod>>,
        server_retrieval_methods: Option<ServerRetrievalMethods>,
    ) -> Result<Self, Error> {
        let (e_device_key, e_device_key_pub) = session::create_p256_ephemeral_keys();
        let e_device_key_bytes = Tag24::<CoseKey>::new(e_device_key_pub)?;
        let security = Security(1, e_device_key_bytes);

        let device_engagement = DeviceEngagement {
            version: "1.0".to_string(),
            security,
            device_retrieval_methods,
            server_retrieval_methods,
            protocol_info: None,
        };

        let device_engagement = Tag24::<DeviceEngagement>::new(device_engagement)?;

        Ok(Self {
            documents,
            e_device_key: e_device_key.to_bytes().to_vec(),
            device_engagement,
        })
    }

    pub fn ble_ident(&self) -> anyhow::Result<[u8; 16]> {
        super::calculate_ble_ident(&self.device_engagement.as_ref().security.1)
    }

    /// Begin engagement over a QR code, producing the `mdoc:` URI to render.
    pub fn qr_engagement(self) -> anyhow::Result<(SessionManagerEngaged, String)> {
        let qr_code_uri = self.device_engagement.to_qr_code_uri()?;
        let sm = SessionManagerEngaged {
            documents: self.documents,
            device_engagement: self.device_engagement,
            e_device_key: self.e_device_key,
            handover: Handover::QR,
        };
        Ok((sm, qr_code_uri))
    }

    /// Begin engagement over NFC with the given handover messages.
    pub fn nfc_engagement(self, handover: Handover) -> SessionManagerEngaged {
        SessionManagerEngaged {
            documents: self.documents,
            device_engagement: self.device_engagement,
            e_device_key: self.e_device_key,
            handover,
        }
    }

    pub fn device_engagement(&self) -> &Tag24<DeviceEngagement> {
        &self.device_engagement
    }
}

impl SessionManagerEngaged {
    /// Process the reader's [SessionEstablishment]: derive the session keys
    /// from ECDH, then handle the embedded first request.
    pub fn process_session_establishment(
        self,
        session_establishment: SessionEstablishment,
    ) -> anyhow::Result<(SessionManager, RequestedItems)> {
        let e_reader_key = session_establishment.e_reader_key;
        let session_transcript =
            SessionTranscript180135(self.device_engagement, e_reader_key.clone(), self.handover);
        let session_transcript_bytes = Tag24::new(session_transcript.clone())?;

        let e_device_key = p256::SecretKey::from_bytes(FieldBytes::from_slice(&self.e_device_key))?;

        let shared_secret = get_shared_secret(
            e_reader_key.into_inner(),
            &e_device_key.to_nonzero_scalar(),
        )
        .map_err(Error::SharedSecretGeneration)?;

        let sk_reader = derive_reader_session_key(&shared_secret, &session_transcript_bytes)?.into();
        let sk_device = derive_device_session_key(&shared_secret, &session_transcript_bytes)?.into();

        let mut sm = SessionManager {
            documents: self.documents,
            session_transcript,
            sk_device,
            device_message_counter: 0,
            sk_reader,
            reader_message_counter: 0,
            state: State::AwaitingRequest,
        };

        let requested_data = sm.handle_decoded_request(SessionData {
            data: Some(session_establishment.data),
            status: None,
        })?;

        Ok((sm, requested_data))
    }
}

impl SessionManager {
    fn parse_request(&self, request: &[u8]) -> Result<DeviceRequest, PreparedDeviceResponse> {
        let request: CborValue = cbor::from_slice(request).map_err(|error| {
            tracing::error!("unable to decode DeviceRequest bytes as cbor: {error}");
            PreparedDeviceResponse::empty(Status::CborDecodingError)
        })?;

        cbor::from_value(request.into_inner()).map_err(|error| {
            tracing::error!("unable to validate DeviceRequest cbor: {error}");
            PreparedDeviceResponse::empty(Status::CborValidationError)
        })
    }

    fn validate_request(
        &self,
        request: DeviceRequest,
    ) -> Result<Vec<ItemsRequest>, PreparedDeviceResponse> {
        if request.version != DeviceRequest::VERSION {
            tracing::error!(
                "unsupported DeviceRequest version: {} ({} is supported)",
                request.version,
                DeviceRequest::VERSION
            );
            return Err(PreparedDeviceResponse::empty(Status::GeneralError));
        }
        Ok(request
            .doc_requests
            .into_inner()
            .into_iter()
            .map(|DocRequest { items_request, .. }| items_request.into_inner())
            .collect())
    }

    /// Prepare the response to the given request, restricted to the items
    /// the holder has permitted. Transitions to [State::Signing].
    pub fn prepare_response(&mut self, requests: &RequestedItems, permitted: PermittedItems) {
        let prepared_response = DeviceSession::prepare_response(self, requests, permitted);
        self.state = State::Signing(prepared_response);
    }

    fn handle_decoded_request(&mut self, request: SessionData) -> anyhow::Result<RequestedItems> {
        let data = request.data.ok_or_else(|| {
            anyhow::anyhow!("no mdoc requests received, assume session can be terminated")
        })?;
        let decrypted_request = session::decrypt_reader_data(
            &self.sk_reader.into(),
            data.as_ref(),
            &mut self.reader_message_counter,
        )
        .map_err(|e| anyhow::anyhow!("unable to decrypt request: {e}"))?;
        let request = match self.parse_request(&decrypted_request) {
            Ok(r) => r,
            Err(e) => {
                self.state = State::Signing(e);
                return Ok(Default::default());
            }
        };
        let request = match self.validate_request(request) {
            Ok(r) => r,
            Err(e) => {
                self.state = State::Signing(e);
                return Ok(Default::default());
            }
        };
        Ok(request)
    }

    /// Handle a new encrypted request from the reader, returning the items
    /// it asks for.
    pub fn handle_request(&mut self, request: &[u8]) -> anyhow::Result<RequestedItems> {
        let session_data: SessionData = cbor::from_slice(request)?;
        self.handle_decoded_request(session_data)
    }

    /// The next payload awaiting an external signature, if any.
    pub fn get_next_signature_payload(&self) -> Option<(Uuid, &[u8])> {
        match &self.state {
            State::Signing(p) => p.get_next_signature_payload(),
            _ => None,
        }
    }

    /// Submit an externally produced signature for the payload returned by
    /// [SessionManager::get_next_signature_payload]. Once all documents are
    /// signed the response is encrypted and the state moves to
    /// [State::ReadyToRespond].
    pub fn submit_next_signature(&mut self, signature: Vec<u8>) -> anyhow::Result<()> {
        if matches!(self.state, State::Signing(_)) {
            match std::mem::take(&mut self.state) {
                State::Signing(mut p) => {
                    p.submit_next_signature(signature);
                    self.state = State::Signing(p);
                }
                _ => unreachable!(),
            }
        }
        self.finalize_if_complete()
    }

    /// Sign all pending documents with an in-process signer.
    pub fn sign_pending<S, Sig>(&mut self, signer: &S) -> anyhow::Result<()>
    where
        S: Signer<Sig>,
        Sig: SignatureEncoding,
    {
        while let Some((_, payload)) = self.get_next_signature_payload() {
            let signature = signer
                .try_sign(payload)
                .map_err(|e| anyhow::anyhow!("signing failed: {e}"))?
                .to_vec();
            self.submit_next_signature(signature)?;
        }
        // A response with no prepared documents (an error response) never
        // receives a signature, so it is finalized here.
        self.finalize_if_complete()
    }

    fn finalize_if_complete(&mut self) -> anyhow::Result<()> {
        let complete = matches!(&self.state, State::Signing(p) if p.is_complete());
        if !complete {
            return Ok(());
        }
        match std::mem::take(&mut self.state) {
            State::Signing(p) => {
                let response = p.finalize_response();
                let mut status: Option<session::Status> = None;
                let response_bytes = cbor::to_vec(&response)?;
                let encrypted_response = session::encrypt_device_data(
                    &self.sk_device.into(),
                    &response_bytes,
                    &mut self.device_message_counter,
                )
                .unwrap_or_else(|e| {
                    tracing::warn!("unable to encrypt response: {e}");
                    status = Some(session::Status::SessionEncryptionError);
                    Default::default()
                });
                let data = if status.is_some() {
                    None
                } else {
                    Some(encrypted_response.into())
                };
                let session_data = SessionData { status, data };
                let encoded_response = cbor::to_vec(&session_data)?;
                self.state = State::ReadyToRespond(encoded_response);
            }
            _ => unreachable!(),
        }
        Ok(())
    }

    pub fn response_ready(&self) -> bool {
        matches!(self.state, State::ReadyToRespond(_))
    }

    /// Take the encrypted response, returning to [State::AwaitingRequest].
    pub fn retrieve_response(&mut self) -> Option<Vec<u8>> {
        if self.response_ready() {
            let state = std::mem::take(&mut self.state);
            match state {
                State::ReadyToRespond(r) => Some(r),
                _ => unreachable!(),
            }
        } else {
            None
        }
    }
}

impl PreparedDeviceResponse {
    fn empty(status: Status) -> Self {
        PreparedDeviceResponse {
            status,
            prepared_documents: Vec::new(),
            document_errors: None,
            signed_documents: Vec::new(),
        }
    }

    /// `false` while documents still await signatures.
    pub fn is_complete(&self) -> bool {
        self.prepared_documents.is_empty()
    }

    pub fn get_next_signature_payload(&self) -> Option<(Uuid, &[u8])> {
        self.prepared_documents
            .last()
            .map(|doc| (doc.id, doc.signature_payload.as_slice()))
    }

    pub fn submit_next_signature(&mut self, signature: Vec<u8>) {
        let signed_doc = match self.prepared_documents.pop() {
            Some(doc) => doc.finalize(signature),
            None => {
                tracing::error!(
                    "received a signature for finalising when there are no more prepared docs"
                );
                return;
            }
        };
        self.signed_documents.push(signed_doc);
    }

    pub fn finalize_response(self) -> DeviceResponse {
        if !self.is_complete() {
            tracing::warn!("attempt to finalize PreparedDeviceResponse before all prepared documents had been authorized");
            return PreparedDeviceResponse::empty(Status::GeneralError).finalize_response();
        }

        DeviceResponse::new(
            self.signed_documents.try_into().ok(),
            None,
            None,
            self.document_errors,
            self.status,
        )
    }
}

impl PreparedDocument {
    fn finalize(self, signature: Vec<u8>) -> DeviceResponseDoc {
        let Self {
            issuer_signed,
            device_namespaces,
            mut unsigned_cose_sign1,
            errors,
            doc_type,
            ..
        } = self;
        unsigned_cose_sign1.signature = signature;
        let device_signed = DeviceSigned {
            namespaces: device_namespaces,
            device_auth: DeviceAuth::DeviceSignature(unsigned_cose_sign1),
        };
        DeviceResponseDoc {
            doc_type,
            issuer_signed,
            device_signed,
            errors,
        }
    }
}

/// Holds the device's session state; implemented by [SessionManager] and by
/// transcript-substituting wrappers.
pub trait DeviceSession {
    type ST: SessionTranscript;

    fn documents(&self) -> &Documents;
    fn session_transcript(&self) -> Self::ST;

    /// Assemble the (as yet unsigned) response from the requested and
    /// permitted items.
    fn prepare_response(
        &self,
        requests: &RequestedItems,
        permitted: PermittedItems,
    ) -> PreparedDeviceResponse {
        let mut prepared_documents: Vec<PreparedDocument> = Vec::new();
        let mut document_errors: Vec<DocumentError> = Vec::new();

        for (doc_type, namespaces) in filter_permitted(requests, permitted).into_iter() {
            let data_not_returned = |doc_type: String| -> DocumentError {
                [(doc_type, DocumentErrorCode::DataNotReturned)]
                    .into_iter()
                    .collect()
            };
            let document = match self.documents().get(&doc_type) {
                Some(doc) => doc,
                None => {
                    tracing::error!("holder owns no documents of type {doc_type}");
                    document_errors.push(data_not_returned(doc_type));
                    continue;
                }
            };
            let signature_algorithm = match document
                .mso
                .device_key_info
                .device_key
                .signature_algorithm()
            {
                Some(alg) => alg,
                None => {
                    tracing::error!(
                        "device key for document '{}' cannot perform signing",
                        document.id
                    );
                    document_errors.push(data_not_returned(doc_type));
                    continue;
                }
            };

            let mut issuer_namespaces: BTreeMap<String, NonEmptyVec<IssuerSignedItemBytes>> =
                Default::default();
            let mut errors: BTreeMap<String, NonEmptyMap<String, DocumentErrorCode>> =
                Default::default();

            for (namespace, elements) in namespaces.into_iter() {
                if let Some(issuer_items) = document.namespaces.get(&namespace) {
                    for element_identifier in elements.into_iter() {
                        if let Some(item) = issuer_items.get(&element_identifier) {
                            if let Some(returned_items) = issuer_namespaces.get_mut(&namespace) {
                                returned_items.push(item.clone());
                            } else {
                                issuer_namespaces
                                    .insert(namespace.clone(), NonEmptyVec::new(item.clone()));
                            }
                        } else if let Some(returned_errors) = errors.get_mut(&namespace) {
                            returned_errors
                                .insert(element_identifier, DocumentErrorCode::DataNotReturned);
                        } else {
                            errors.insert(
                                namespace.clone(),
                                NonEmptyMap::new(
                                    element_identifier,
                                    DocumentErrorCode::DataNotReturned,
                                ),
                            );
                        }
                    }
                } else {
                    for element_identifier in elements.into_iter() {
                        if let Some(returned_errors) = errors.get_mut(&namespace) {
                            returned_errors
                                .insert(element_identifier, DocumentErrorCode::DataNotReturned);
                        } else {
                            errors.insert(
                                namespace.clone(),
                                NonEmptyMap::new(
                                    element_identifier,
                                    DocumentErrorCode::DataNotReturned,
                                ),
                            );
                        }
                    }
                }
            }

            let device_namespaces: DeviceNamespacesBytes = match Tag24::new(Default::default()) {
                Ok(dp) => dp,
                Err(_e) => {
                    document_errors.push(data_not_returned(doc_type));
                    continue;
                }
            };
            let device_auth = DeviceAuthentication::new(
                self.session_transcript(),
                doc_type.clone(),
                device_namespaces.clone(),
            );
            let device_auth = match Tag24::new(device_auth) {
                Ok(da) => da,
                Err(_e) => {
                    document_errors.push(data_not_returned(doc_type));
                    continue;
                }
            };
            let device_auth_bytes = match cbor::to_vec(&device_auth) {
                Ok(dab) => dab,
                Err(_e) => {
                    document_errors.push(data_not_returned(doc_type));
                    continue;
                }
            };

            // Detached COSE_Sign1 over the device authentication bytes.
            let protected = HeaderBuilder::new().algorithm(signature_algorithm).build();
            let unsigned_cose_sign1 =
                MaybeTagged::new(false, CoseSign1Builder::new().protected(protected).build());
            let signature_payload =
                match cose::sign1::signature_payload(&unsigned_cose_sign1, Some(&device_auth_bytes))
                {
                    Ok(payload) => payload,
                    Err(_e) => {
                        document_errors.push(data_not_returned(doc_type));
                        continue;
                    }
                };

            let prepared_document = PreparedDocument {
                id: document.id,
                doc_type,
                issuer_signed: IssuerSigned {
                    namespaces: NonEmptyMap::maybe_new(
                        issuer_namespaces.into_iter().collect(),
                    ),
                    issuer_auth: document.issuer_auth.clone(),
                },
                device_namespaces,
                unsigned_cose_sign1,
                signature_payload,
                errors: NonEmptyMap::maybe_new(errors.into_iter().collect()),
            };
            prepared_documents.push(prepared_document);
        }
        PreparedDeviceResponse {
            prepared_documents,
            document_errors: NonEmptyVec::maybe_new(document_errors),
            status: Status::OK,
            signed_documents: Vec::new(),
        }
    }
}

impl DeviceSession for SessionManager {
    type ST = SessionTranscript180135;

    fn documents(&self) -> &Documents {
        &self.documents
    }

    fn session_transcript(&self) -> SessionTranscript180135 {
        self.session_transcript.clone()
    }
}

/// Build a device-signed structure authenticated with a MAC, for device keys
/// that only support key agreement.
pub fn build_device_signed_mac<S>(
    device_key: &p256::SecretKey,
    e_reader_key: &CoseKey,
    session_transcript: S,
    doc_type: String,
    device_namespaces: DeviceNamespacesBytes,
) -> anyhow::Result<DeviceSigned>
where
    S: SessionTranscript,
{
    let shared_secret =
        get_shared_secret(e_reader_key.clone(), &device_key.to_nonzero_scalar())?;
    let transcript_bytes = cbor::to_vec(&Tag24::new(session_transcript.clone())?)?;
    let e_mac_key = derive_e_mac_key(&shared_secret, &transcript_bytes)?;

    let device_auth_bytes = cbor::to_vec(&Tag24::new(DeviceAuthentication::new(
        session_transcript,
        doc_type,
        device_namespaces.clone(),
    ))?)?;

    let key = hmac::Hmac::<sha2::Sha256>::new_from_slice(e_mac_key.as_slice())
        .map_err(|e| anyhow::anyhow!("invalid MAC key length: {e}"))?;
    let mac0 = cose::mac0::tag(key, coset::Header::default(), None, Some(&device_auth_bytes))
        .map_err(|e| anyhow::anyhow!("unable to compute device MAC: {e}"))?;

    Ok(DeviceSigned {
        namespaces: device_namespaces,
        device_auth: DeviceAuth::DeviceMac(mac0),
    })
}

impl From<Mdoc> for Document {
    fn from(mdoc: Mdoc) -> Document {
        fn extract(
            v: NonEmptyVec<IssuerSignedItemBytes>,
        ) -> NonEmptyMap<ElementIdentifier, IssuerSignedItemBytes> {
            v.into_inner()
                .into_iter()
                .map(|i| (i.as_ref().element_identifier.clone(), i))
                .collect::<BTreeMap<_, _>>()
                .try_into()
                // There is always at least one element in a NonEmptyVec.
                .unwrap()
        }

        let Mdoc {
            mso,
            namespaces,
            issuer_auth,
            ..
        } = mdoc;
        let namespaces = namespaces
            .into_inner()
            .into_iter()
            .map(|(ns, v)| (ns, extract(v)))
            .collect::<BTreeMap<_, _>>()
            .try_into()
            // There is always at least one entry in a NonEmptyMap.
            .unwrap();

        Document {
            id: Uuid::now_v1(&[0, 0, 0, 0, 0, 0]),
            mso,
            namespaces,
            issuer_auth,
        }
    }
}

/// Restrict the permitted items to those that were actually requested.
fn filter_permitted(request: &RequestedItems, permitted: PermittedItems) -> PermittedItems {
    permitted
        .into_iter()
        .filter_map(|(doc_type, namespaces)| {
            request
                .iter()
                .find(|item| item.doc_type == doc_type)
                .map(|item| {
                    namespaces
                        .into_iter()
                        .filter_map(|(ns, elems)| {
                            item.namespaces
                                .get(&ns)
                                .map(|req_elems| {
                                    elems
                                        .into_iter()
                                        .filter(|elem| req_elems.contains_key(elem))
                                        .collect()
                                })
                                .map(|e| (ns, e))
                        })
                        .collect()
                })
                .map(|ns| (doc_type, ns))
        })
        .collect()
}

/// Find the nearest age attestation the holder owns that can answer an
/// `age_over_NN` request without over-disclosing.
pub fn nearest_age_attestation(
    element_identifier: String,
    issuer_items: NonEmptyMap<String, Tag24<IssuerSignedItem>>,
) -> Result<Option<Tag24<IssuerSignedItem>>, Error> {
    let requested_age: u8 = parse_age_from_element_identifier(element_identifier)?;

    let owned_age_over_claims: Vec<(String, Tag24<IssuerSignedItem>)> = issuer_items
        .into_inner()
        .into_iter()
        .filter(|element| element.0.contains("age_over"))
        .collect();

    let age_over_claims_numerical: Vec<(u8, Tag24<IssuerSignedItem>)> = owned_age_over_claims
        .into_iter()
        .map(|(id, item)| Ok((parse_age_from_element_identifier(id)?, item)))
        .collect::<Result<_, Error>>()?;

    let (true_age_over_claims, false_age_over_claims): (Vec<_>, Vec<_>) =
        age_over_claims_numerical.into_iter().partition(|(_, item)| {
            item.as_ref().element_value == CborValue::from(ciborium::Value::Bool(true))
        });

    // The lowest true attestation at or above the requested age, otherwise
    // the highest false attestation at or below it.
    if let Some((_, attestation)) = true_age_over_claims
        .iter()
        .filter(|(age, _)| *age >= requested_age)
        .min_by_key(|(age, _)| *age)
    {
        return Ok(Some(attestation.clone()));
    }
    if let Some((_, attestation)) = false_age_over_claims
        .iter()
        .filter(|(age, _)| *age <= requested_age)
        .max_by_key(|(age, _)| *age)
    {
        return Ok(Some(attestation.clone()));
    }
    Ok(None)
}

/// Parse the age from an `age_over_NN` element identifier.
pub fn parse_age_from_element_identifier(element_identifier: String) -> Result<u8, Error> {
    let Some(age) = element_identifier.strip_prefix("age_over_") else {
        return Err(Error::PrefixError);
    };
    Ok(str::parse::<u8>(age)?)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::definitions::helpers::ByteStr;
    use crate::definitions::mso::DigestId;
    use serde_json::json;

    #[test]
    fn filter_permitted() {
        let requested = serde_json::from_value(json!([
            {
                "docType": "doc_type_1",
                "nameSpaces": {
                    "namespace_1": {
                        "element_1": false,
                        "element_2": false,
                    },
                    "namespace_2": {
                        "element_1": false,
                    }
                }
            },
            {
                "docType": "doc_type_2",
                "nameSpaces": {
                    "namespace_1": {
                        "element_1": false,
                    }
                }
            }
        ]))
        .unwrap();
        let permitted = serde_json::from_value(json!({
            "doc_type_1": {
                "namespace_1": [
                    "element_1",
                    "element_3"
                ],
                "namespace_3": [
                    "element_1",
                ]
            },
            "doc_type_3": {
                "namespace_1": [
                    "element_1",
                ],
            }
        }))
        .unwrap();
        let expected: PermittedItems = serde_json::from_value(json!({
            "doc_type_1": {
                "namespace_1": [
                    "element_1",
                ],
            }
        }))
        .unwrap();

        let filtered = super::filter_permitted(&requested, permitted);

        assert_eq!(expected, filtered);
    }

    #[test]
    fn parse_age_from_element() {
        let element_identifier = "age_over_88".to_string();
        let age = parse_age_from_element_identifier(element_identifier).unwrap();
        assert_eq!(age, 88)
    }

    #[test]
    fn age_attestation_response() {
        let requested_element_identifier = "age_over_23".to_string();
        let element_identifier1 = "age_over_18".to_string();
        let element_identifier2 = "age_over_22".to_string();
        let element_identifier3 = "age_over_21".to_string();

        let random = vec![1, 2, 3, 4, 5];
        let item = |id: u64, element_identifier: &str, value: bool| {
            Tag24::new(IssuerSignedItem {
                digest_id: DigestId::new(id),
                random: ByteStr::from(random.clone()),
                element_identifier: element_identifier.to_string(),
                element_value: ciborium::Value::Bool(value).into(),
            })
            .unwrap()
        };

        let issuer_item1 = item(1, &element_identifier1, true);
        let issuer_item2 = item(2, &element_identifier2, false);
        let issuer_item3 = item(3, &element_identifier3, false);
        let mut issuer_items = NonEmptyMap::new(element_identifier1, issuer_item1.clone());
        issuer_items.insert(element_identifier2, issuer_item2.clone());
        issuer_items.insert(element_identifier3, issuer_item3.clone());

        let result = nearest_age_attestation(requested_element_identifier, issuer_items)
            .expect("failed to process age attestation request");

        assert_eq!(result.unwrap().inner_bytes(), issuer_item2.inner_bytes());
    }
}
