//! QR (static handover) presentment: render the engagement as an `mdoc:`
//! URI, wait for the reader to connect over a listening transport, then run
//! the request/response exchange.

use signature::{SignatureEncoding, Signer};
use tokio::sync::watch;

use crate::definitions::device_engagement::DeviceRetrievalMethod;
use crate::definitions::helpers::NonEmptyVec;
use crate::presentation::device::{
    Documents, PermittedItems, RequestedItems, SessionManagerEngaged, SessionManagerInit,
};
use crate::transport::Transport;

use super::{cancelled, EngagementCallbacks, Outcome, Progress, State};

/// A presentment session awaiting a reader connection. Created together
/// with the `mdoc:` URI to render as a QR code.
pub struct QrPresentment {
    engaged: SessionManagerEngaged,
    progress: Progress,
}

impl QrPresentment {
    pub fn new(
        documents: Documents,
        device_retrieval_methods: Option<NonEmptyVec<DeviceRetrievalMethod>>,
    ) -> anyhow::Result<(Self, String)> {
        let mut progress = Progress::new();
        progress.advance(State::Engaging)?;
        let init = SessionManagerInit::initialise(documents, device_retrieval_methods, None)?;
        let (engaged, uri) = init.qr_engagement()?;
        progress.advance(State::HandoverComplete)?;
        Ok((QrPresentment { engaged, progress }, uri))
    }

    /// Run the exchange to completion over a connected transport.
    ///
    /// `permit` is the user-input hook: given the reader's requested items
    /// it returns the items the holder agrees to share.
    pub async fn run<T, S, Sig, P, C>(
        mut self,
        mut transport: T,
        signer: &S,
        permit: P,
        callbacks: &C,
        mut cancel: watch::Receiver<bool>,
    ) -> anyhow::Result<Outcome>
    where
        T: Transport,
        S: Signer<Sig>,
        Sig: SignatureEncoding,
        P: Fn(&RequestedItems) -> PermittedItems,
        C: EngagementCallbacks,
    {
        self.progress.advance(State::Connecting)?;
        callbacks.on_waiting_for_request();

        let establishment = tokio::select! {
            message = transport.recv() => message?,
            _ = cancelled(&mut cancel) => {
                self.progress.advance(State::Closed)?;
                return Ok(Outcome::Cancelled);
            }
        };
        self.progress.advance(State::Connected)?;

        let session_establishment = crate::cbor::from_slice(&establishment)?;
        let (mut session, mut requested) = self
            .engaged
            .process_session_establishment(session_establishment)?;
        self.progress.advance(State::Transacting)?;

        loop {
            callbacks.on_documents_in_focus();
            callbacks.on_waiting_for_user_input();
            let permitted = permit(&requested);
            session.prepare_response(&requested, permitted);
            session.sign_pending(signer)?;
            callbacks.on_sending_response();
            let response = session
                .retrieve_response()
                .ok_or_else(|| anyhow::anyhow!("response was not ready after signing"))?;
            transport.send(response).await?;

            callbacks.on_waiting_for_request();
            let message = tokio::select! {
                message = transport.recv() => message,
                _ = cancelled(&mut cancel) => {
                    self.progress.advance(State::Closed)?;
                    return Ok(Outcome::Cancelled);
                }
            };
            let message = match message {
                Ok(message) => message,
                // The reader closing the connection ends the session.
                Err(_) => break,
            };
            match session.handle_request(&message) {
                Ok(next) => requested = next,
                // A status-only message terminates the session.
                Err(_) => break,
            }
        }

        self.progress.advance(State::Closed)?;
        Ok(Outcome::Completed)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn qr_presentment_renders_uri() {
        let key = p256::SecretKey::random(&mut rand::rngs::OsRng);
        let device_key = crate::definitions::CoseKey::from(key.public_key());
        let mdoc = crate::issuance::mdoc::test::minimal_mdoc(device_key);
        let documents = Documents::new("org.iso.18013.5.1.mDL".to_string(), mdoc.into());
        let (_presentment, uri) = QrPresentment::new(documents, None).unwrap();
        assert!(uri.starts_with("mdoc:"));
    }
}
