//! NFC presentment: the first SELECT is answered inline in the OS callback
//! context, every other command and the deactivation event are serialized
//! through an unbounded channel to a single consumer task.

use std::time::Instant;

use signature::{SignatureEncoding, Signer};
use tokio::sync::{mpsc, watch};

use crate::definitions::session::Handover;
use crate::presentation::device::{
    Documents, PermittedItems, RequestedItems, SessionManager, SessionManagerInit,
};
use crate::transport::nfc::{apdu, DeviceDataTransfer, DeviceEvent, SessionLimits};

use super::{cancelled, EngagementCallbacks, Outcome, Progress, State};

/// Events funneled from the OS NFC callbacks into the processing task.
#[derive(Debug)]
pub enum NfcEvent {
    Command(Vec<u8>),
    Deactivated,
}

/// The handle given to the OS NFC callback glue. Never blocks.
#[derive(Clone)]
pub struct NfcHandler {
    events: mpsc::UnboundedSender<NfcEvent>,
}

impl NfcHandler {
    /// Handle an inbound command APDU from the OS callback context.
    ///
    /// A SELECT of the mdoc application is answered immediately. The
    /// callback context cannot suspend, so everything else is queued for
    /// the processing task and its reply is delivered asynchronously.
    pub fn on_command(&self, command: Vec<u8>) -> Option<Vec<u8>> {
        if is_select_mdoc_aid(&command) {
            if self.events.send(NfcEvent::Command(command)).is_err() {
                tracing::warn!("NFC processing task is gone; tap ignored");
            }
            return Some(apdu::StatusWord::Ok.to_bytes().to_vec());
        }
        if self.events.send(NfcEvent::Command(command)).is_err() {
            tracing::warn!("NFC processing task is gone; command dropped");
        }
        None
    }

    pub fn on_deactivated(&self) {
        let _ = self.events.send(NfcEvent::Deactivated);
    }
}

fn is_select_mdoc_aid(command: &[u8]) -> bool {
    matches!(
        apdu::Command::parse(command),
        Ok(apdu::Command::SelectAid { aid }) if aid == apdu::AID_MDOC_DATA_TRANSFER
    )
}

/// Application-provided NFC session settings, retrieved once per tap.
#[derive(Debug, Clone, Copy)]
pub struct NfcSettings {
    pub limits: SessionLimits,
}

/// Retrieve the settings through a (possibly slow) application callback,
/// logging the elapsed time since NFC field dwell time is short.
pub async fn retrieve_settings<F, Fut>(get: F) -> NfcSettings
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = NfcSettings>,
{
    let start = Instant::now();
    let settings = get().await;
    tracing::debug!("NFC settings retrieved in {:?}", start.elapsed());
    settings
}

/// One NFC presentment session: consumes queued events, reassembles
/// session-layer messages and drives the exchange.
pub struct NfcPresentment {
    events: mpsc::UnboundedReceiver<NfcEvent>,
    replies: mpsc::UnboundedSender<Vec<u8>>,
    progress: Progress,
}

/// Create the OS-facing handler, the presentment driver and the stream of
/// deferred replies for the glue layer to transmit.
pub fn session() -> (NfcHandler, NfcPresentment, mpsc::UnboundedReceiver<Vec<u8>>) {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (replies_tx, replies_rx) = mpsc::unbounded_channel();
    (
        NfcHandler { events: events_tx },
        NfcPresentment {
            events: events_rx,
            replies: replies_tx,
            progress: Progress::new(),
        },
        replies_rx,
    )
}

impl NfcPresentment {
    /// Run the presentment to completion.
    ///
    /// `handover` carries the NFC handover messages produced during
    /// engagement, bound into the session transcript.
    #[allow(clippy::too_many_arguments)]
    pub async fn run<S, Sig, P, C>(
        mut self,
        documents: Documents,
        handover: Handover,
        settings: NfcSettings,
        signer: &S,
        permit: P,
        callbacks: &C,
        mut cancel: watch::Receiver<bool>,
    ) -> anyhow::Result<Outcome>
    where
        S: Signer<Sig>,
        Sig: SignatureEncoding,
        P: Fn(&RequestedItems) -> PermittedItems,
        C: EngagementCallbacks,
    {
        let mut transfer = DeviceDataTransfer::new(settings.limits);
        let init = SessionManagerInit::initialise(documents, None, None)?;
        let mut engaged = Some(init.nfc_engagement(handover));
        let mut session: Option<SessionManager> = None;

        self.progress.advance(State::ReceivedFirstTap)?;
        self.progress.advance(State::Engaging)?;
        self.progress.advance(State::HandoverComplete)?;
        self.progress.advance(State::Connecting)?;
        callbacks.on_waiting_for_request();

        loop {
            let event = tokio::select! {
                event = self.events.recv() => event,
                _ = cancelled(&mut cancel) => {
                    self.progress.advance(State::Closed)?;
                    return Ok(Outcome::Cancelled);
                }
            };
            let Some(event) = event else {
                // All handler clones dropped.
                self.progress.advance(State::Closed)?;
                return Ok(Outcome::Failed);
            };
            let command = match event {
                NfcEvent::Command(command) => command,
                NfcEvent::Deactivated => {
                    // A torn tap is an expected negative case: close
                    // quietly, do not surface an error to the user.
                    tracing::debug!("NFC field deactivated");
                    self.progress.advance(State::Failed)?;
                    return Ok(Outcome::Failed);
                }
            };

            let message = match transfer.process_command(&command) {
                DeviceEvent::Reply(bytes) => {
                    self.send_reply(bytes)?;
                    continue;
                }
                DeviceEvent::MessageReceived(message) => message,
            };

            let response = match &mut session {
                None => {
                    // First message: session establishment.
                    let engaged_sm = engaged
                        .take()
                        .ok_or_else(|| anyhow::anyhow!("session establishment received twice"))?;
                    let session_establishment = crate::cbor::from_slice(&message)?;
                    let (mut sm, requested) =
                        engaged_sm.process_session_establishment(session_establishment)?;
                    self.progress.advance(State::Connected)?;
                    self.progress.advance(State::Transacting)?;
                    let response = self.respond(&mut sm, &requested, &permit, signer, callbacks)?;
                    session = Some(sm);
                    response
                }
                Some(sm) => match sm.handle_request(&message) {
                    Ok(requested) => self.respond(sm, &requested, &permit, signer, callbacks)?,
                    Err(_) => {
                        // Status-only message: session termination.
                        self.progress.advance(State::Closed)?;
                        return Ok(Outcome::Completed);
                    }
                },
            };
            self.send_reply(transfer.respond(&response))?;
            callbacks.on_waiting_for_request();
        }
    }

    fn respond<S, Sig, P, C>(
        &mut self,
        session: &mut SessionManager,
        requested: &RequestedItems,
        permit: &P,
        signer: &S,
        callbacks: &C,
    ) -> anyhow::Result<Vec<u8>>
    where
        S: Signer<Sig>,
        Sig: SignatureEncoding,
        P: Fn(&RequestedItems) -> PermittedItems,
        C: EngagementCallbacks,
    {
        callbacks.on_documents_in_focus();
        callbacks.on_waiting_for_user_input();
        let permitted = permit(requested);
        session.prepare_response(requested, permitted);
        session.sign_pending(signer)?;
        callbacks.on_sending_response();
        session
            .retrieve_response()
            .ok_or_else(|| anyhow::anyhow!("response was not ready after signing"))
    }

    fn send_reply(&self, bytes: Vec<u8>) -> anyhow::Result<()> {
        self.replies
            .send(bytes)
            .map_err(|_| anyhow::anyhow!("NFC reply channel closed"))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn select_mdoc_aid_is_answered_inline() {
        let (handler, _presentment, _replies) = session();
        let select = apdu::Command::SelectAid {
            aid: apdu::AID_MDOC_DATA_TRANSFER,
        }
        .to_bytes();
        assert_eq!(handler.on_command(select), Some(vec![0x90, 0x00]));
    }

    #[test]
    fn other_commands_are_queued() {
        let (handler, mut presentment, _replies) = session();
        let envelope = apdu::Command::Envelope {
            chaining: true,
            data: &[0x53, 0x00],
        }
        .to_bytes();
        assert_eq!(handler.on_command(envelope.clone()), None);
        match presentment.events.try_recv() {
            Ok(NfcEvent::Command(queued)) => assert_eq!(queued, envelope),
            other => panic!("expected queued command, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn settings_retrieval_is_timed() {
        let settings = retrieve_settings(|| async {
            NfcSettings {
                limits: SessionLimits::new(255, 256, 4096),
            }
        })
        .await;
        assert_eq!(settings.limits.command_data_field_max_length, 255);
    }
}
