//! The engagement and transaction lifecycle on the holder's side: from the
//! first reader contact (QR scan or NFC tap) through connection-method
//! negotiation to the request/response exchange, with cooperative
//! cancellation throughout.

pub mod nfc;
pub mod qr;

use tokio::sync::watch;

use crate::definitions::device_engagement::DeviceRetrievalMethod;

/// Protocol phase. Transitions are checked; an illegal transition is a
/// programming error surfaced as [Error::IllegalTransition].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    /// NFC only: the first SELECT has been answered.
    ReceivedFirstTap,
    Engaging,
    HandoverComplete,
    Connecting,
    Connected,
    Transacting,
    Closed,
    Failed,
}

/// Terminal result of a presentment session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Cancelled,
    Failed,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("illegal engagement state transition: {from:?} -> {to:?}")]
    IllegalTransition { from: State, to: State },
    #[error("session cancelled")]
    Cancelled,
}

/// Lifecycle notifications for UI layers. All methods default to no-ops.
pub trait EngagementCallbacks {
    fn on_waiting_for_request(&self) {}
    fn on_waiting_for_user_input(&self) {}
    fn on_documents_in_focus(&self) {}
    fn on_sending_response(&self) {}
}

/// No-op callbacks for headless use.
pub struct NoCallbacks;

impl EngagementCallbacks for NoCallbacks {}

/// Tracks and enforces the engagement state machine.
#[derive(Debug)]
pub struct Progress {
    state: State,
}

impl Default for Progress {
    fn default() -> Self {
        Self { state: State::Idle }
    }
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn advance(&mut self, to: State) -> Result<(), Error> {
        use State::*;
        let legal = matches!(
            (self.state, to),
            (Idle, ReceivedFirstTap)
                | (Idle, Engaging)
                | (ReceivedFirstTap, Engaging)
                | (Engaging, HandoverComplete)
                | (HandoverComplete, Connecting)
                | (Connecting, Connected)
                | (Connected, Transacting)
                | (Transacting, Closed)
                // Failure and closure are reachable from any live state.
                | (_, Failed)
        ) || (to == Closed && self.state != Failed);
        if !legal {
            return Err(Error::IllegalTransition {
                from: self.state,
                to,
            });
        }
        tracing::debug!("engagement state: {:?} -> {:?}", self.state, to);
        self.state = to;
        Ok(())
    }
}

/// A handle that cancels a running presentment session from another task,
/// typically wired to a UI cancel control.
#[derive(Clone)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        // Receivers may already be gone if the session finished first.
        let _ = self.tx.send(true);
    }
}

/// A cancellation pair: keep the handle, give the token to the session.
pub fn cancellation() -> (CancelHandle, watch::Receiver<bool>) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, rx)
}

pub(crate) async fn cancelled(token: &mut watch::Receiver<bool>) {
    // Already-cancelled tokens resolve immediately; a dropped sender means
    // cancellation can no longer arrive.
    while !*token.borrow_and_update() {
        if token.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Select the connection method to use from the methods the other party
/// offered, honouring an ordered list of carrier-name prefixes. Falls back
/// to the first offered method when nothing matches.
pub fn pick_connection_method<'a>(
    offered: &'a [DeviceRetrievalMethod],
    preferences: &[&str],
) -> Option<&'a DeviceRetrievalMethod> {
    preferences
        .iter()
        .find_map(|preference| {
            offered
                .iter()
                .find(|method| method.name().starts_with(preference))
        })
        .or_else(|| offered.first())
}
