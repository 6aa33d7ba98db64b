use anyhow::{anyhow, Context, Result};
use signature::Signer;
use uuid::Uuid;

use mdoc_presentment::cbor;
use mdoc_presentment::definitions::device_engagement::CentralClientMode;
use mdoc_presentment::definitions::device_request::{DataElements, Namespaces};
use mdoc_presentment::definitions::helpers::NonEmptyVec;
use mdoc_presentment::definitions::{BleOptions, DeviceRetrievalMethod, SessionEstablishment};
use mdoc_presentment::presentation::device::{
    self, RequestedItems, SessionManagerEngaged, SessionManagerInit,
};
use mdoc_presentment::presentation::reader;

mod common;
use common::{mdl_documents, trust_anchors, DOC_TYPE, NAMESPACE};

fn main() {}

#[test]
fn simulated_device_and_reader_interaction() -> Result<()> {
    let device_key = p256::SecretKey::random(&mut rand::rngs::OsRng);
    let signing_key: p256::ecdsa::SigningKey = device_key.clone().into();

    // Device initialization and engagement
    let (engaged_state, qr_code_uri) = initialise_session(&device_key)?;

    // Reader processing QR and requesting the necessary fields
    let (mut reader_session_manager, request) = establish_reader_session(qr_code_uri)?;

    // Device accepting request
    let (mut device_session_manager, requested_items) = handle_request(engaged_state, request)?;

    // Prepare response with required elements
    let response = create_response(&mut device_session_manager, &requested_items, &signing_key)?;

    // Reader processing mDL data
    let validated = reader_session_manager
        .handle_response(&response)
        .context("response did not verify")?;
    let elements = validated
        .items
        .get(DOC_TYPE)
        .and_then(|namespaces| namespaces.get(NAMESPACE))
        .ok_or_else(|| anyhow!("expected namespace missing from response"))?;
    assert_eq!(elements["given_name"], serde_json::json!("Erika"));
    assert_eq!(elements["age_over_18"], serde_json::json!(true));
    // Only the requested elements are disclosed.
    assert_eq!(elements.as_object().map(|o| o.len()), Some(2));

    // A follow-up request within the same session
    let request = reader_session_manager.new_request(requested_namespaces())?;
    let requested_items = device_session_manager
        .handle_request(&request)
        .context("could not handle follow-up request")?;
    let response = create_response(&mut device_session_manager, &requested_items, &signing_key)?;
    let validated = reader_session_manager
        .handle_response(&response)
        .context("follow-up response did not verify")?;
    assert!(validated.items.contains_key(DOC_TYPE));

    Ok(())
}

fn requested_namespaces() -> Namespaces {
    let mut elements = DataElements::new("given_name".to_string(), false);
    elements.insert("age_over_18".to_string(), false);
    Namespaces::new(NAMESPACE.to_string(), elements)
}

/// Creates a QR code containing `DeviceEngagement` data, which includes its
/// public key.
fn initialise_session(device_key: &p256::SecretKey) -> Result<(SessionManagerEngaged, String)> {
    let docs = mdl_documents(device_key.public_key().into())?;

    let drms = NonEmptyVec::new(DeviceRetrievalMethod::BLE(BleOptions {
        peripheral_server_mode: None,
        central_client_mode: Some(CentralClientMode {
            uuid: Uuid::new_v4(),
        }),
    }));

    let session = SessionManagerInit::initialise(docs, Some(drms), None)
        .context("failed to initialize device")?;

    session
        .qr_engagement()
        .context("could not generate qr engagement")
}

/// Establishes the reader session from the given QR code and creates the
/// request for the needed elements.
fn establish_reader_session(qr: String) -> Result<(reader::SessionManager, Vec<u8>)> {
    let (reader_sm, session_request, _ble_ident) =
        reader::SessionManager::establish_session(qr, requested_namespaces(), Some(trust_anchors()?))
            .context("failed to establish reader session")?;
    Ok((reader_sm, session_request))
}

/// The device handles the request from the reader and advances the state.
fn handle_request(
    state: SessionManagerEngaged,
    request: Vec<u8>,
) -> Result<(device::SessionManager, RequestedItems)> {
    let session_establishment: SessionEstablishment =
        cbor::from_slice(&request).context("could not deserialize request")?;
    let (session_manager, items_requests) = state
        .process_session_establishment(session_establishment)
        .context("could not process session establishment")?;
    Ok((session_manager, items_requests))
}

/// Prepare a response disclosing the requested elements.
fn create_response(
    session_manager: &mut device::SessionManager,
    requested_items: &RequestedItems,
    key: &p256::ecdsa::SigningKey,
) -> Result<Vec<u8>> {
    let permitted_items = [(
        DOC_TYPE.to_string(),
        [(
            NAMESPACE.to_string(),
            vec!["given_name".to_string(), "age_over_18".to_string()],
        )]
        .into_iter()
        .collect(),
    )]
    .into_iter()
    .collect();
    session_manager.prepare_response(requested_items, permitted_items);
    while let Some((_, payload)) = session_manager.get_next_signature_payload() {
        let signature: p256::ecdsa::Signature = key.sign(payload);
        let signature = signature.to_vec();
        session_manager
            .submit_next_signature(signature)
            .context("failed to submit signature")?;
    }
    session_manager
        .retrieve_response()
        .ok_or_else(|| anyhow!("cannot prepare response"))
}
