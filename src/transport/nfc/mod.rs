//! NFC data transfer: session-layer messages wrapped in a BER-TLV DO53
//! envelope and fragmented over ENVELOPE / GET RESPONSE APDU pairs.

pub mod apdu;

use apdu::{Command, Response, StatusWord};

/// Fixed APDU overhead (header, Lc, Le) subtracted from the physical
/// max transceive length when clamping negotiated data field sizes.
const APDU_OVERHEAD: usize = 7;

/// Tag of the BER-TLV data object that carries a session-layer message.
const DO53_TAG: u8 = 0x53;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("expected a DO53 data object, got tag {0:#04x}")]
    UnexpectedTag(u8),
    #[error("malformed BER-TLV length")]
    MalformedLength,
    #[error("envelope is truncated: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("unexpected status word in response: {0:?}")]
    UnexpectedStatus(StatusWord),
    #[error("malformed response APDU: {0}")]
    MalformedResponse(&'static str),
}

/// Data field limits for one NFC session, negotiated during handover and
/// clamped to what the physical link can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLimits {
    pub command_data_field_max_length: usize,
    pub response_data_field_max_length: usize,
}

impl SessionLimits {
    /// Clamp the negotiated limits to the tag's maximum transceive length
    /// minus the APDU overhead.
    pub fn new(
        command_data_field_max_length: usize,
        response_data_field_max_length: usize,
        max_transceive_length: usize,
    ) -> Self {
        let ceiling = max_transceive_length.saturating_sub(APDU_OVERHEAD).max(1);
        SessionLimits {
            command_data_field_max_length: command_data_field_max_length.min(ceiling),
            response_data_field_max_length: response_data_field_max_length.min(ceiling),
        }
    }
}

/// Wrap a message in a DO53 BER-TLV data object.
pub fn wrap_do53(message: &[u8]) -> Vec<u8> {
    let mut envelope = vec![DO53_TAG];
    match message.len() {
        len if len < 0x80 => envelope.push(len as u8),
        len if len <= 0xFF => {
            envelope.push(0x81);
            envelope.push(len as u8);
        }
        len => {
            let len = (len as u16).to_be_bytes();
            envelope.push(0x82);
            envelope.extend_from_slice(&len);
        }
    }
    envelope.extend_from_slice(message);
    envelope
}

/// Unwrap a DO53 BER-TLV data object.
pub fn unwrap_do53(envelope: &[u8]) -> Result<Vec<u8>, Error> {
    let (&tag, rest) = envelope.split_first().ok_or(Error::MalformedLength)?;
    if tag != DO53_TAG {
        return Err(Error::UnexpectedTag(tag));
    }
    let (len, rest) = match rest {
        [len, rest @ ..] if *len < 0x80 => (*len as usize, rest),
        [0x81, len, rest @ ..] => (*len as usize, rest),
        [0x82, hi, lo, rest @ ..] => (u16::from_be_bytes([*hi, *lo]) as usize, rest),
        _ => return Err(Error::MalformedLength),
    };
    if rest.len() < len {
        return Err(Error::Truncated {
            expected: len,
            actual: rest.len(),
        });
    }
    Ok(rest[..len].to_vec())
}

/// Reader-side chunking: fragment an outbound message into ENVELOPE
/// commands and reassemble the chunked response.
#[derive(Debug, Clone)]
pub struct ReaderDataTransfer {
    limits: SessionLimits,
    assembling: Vec<u8>,
}

/// What the reader should do next after absorbing a response fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderEvent {
    /// The full message has arrived.
    Complete(Vec<u8>),
    /// Transmit this GET RESPONSE command and absorb its response.
    RequestMore(Vec<u8>),
}

impl ReaderDataTransfer {
    pub fn new(limits: SessionLimits) -> Self {
        Self {
            limits,
            assembling: Vec::new(),
        }
    }

    /// The ordered ENVELOPE commands carrying `message`. All but the last
    /// have the chaining class bit set.
    pub fn envelope_commands(&self, message: &[u8]) -> Vec<Vec<u8>> {
        let envelope = wrap_do53(message);
        let chunk_size = self.limits.command_data_field_max_length;
        let chunks: Vec<&[u8]> = envelope.chunks(chunk_size).collect();
        let last = chunks.len() - 1;
        chunks
            .iter()
            .enumerate()
            .map(|(i, data)| {
                Command::Envelope {
                    chaining: i != last,
                    data,
                }
                .to_bytes()
            })
            .collect()
    }

    /// Absorb one response APDU, following the `61 XX` / `90 00`
    /// continuation protocol.
    pub fn absorb_response(&mut self, response: &[u8]) -> Result<ReaderEvent, Error> {
        let response = Response::try_from(response).map_err(Error::MalformedResponse)?;
        self.assembling.extend_from_slice(&response.payload);
        match response.status {
            StatusWord::Ok => {
                let envelope = std::mem::take(&mut self.assembling);
                Ok(ReaderEvent::Complete(unwrap_do53(&envelope)?))
            }
            StatusWord::MoreData(remaining) => {
                let expected = if remaining == 0 {
                    self.limits.response_data_field_max_length.min(256)
                } else {
                    remaining as usize
                };
                Ok(ReaderEvent::RequestMore(
                    Command::GetResponse { expected }.to_bytes(),
                ))
            }
            other => {
                self.assembling.clear();
                Err(Error::UnexpectedStatus(other))
            }
        }
    }
}

/// Device-side chunking: reassemble inbound ENVELOPE chains and serve the
/// outbound response through GET RESPONSE continuation.
#[derive(Debug, Clone)]
pub struct DeviceDataTransfer {
    limits: SessionLimits,
    inbound: Vec<u8>,
    outbound: Vec<u8>,
}

/// What happened when the device processed a command APDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// Transmit these response bytes immediately.
    Reply(Vec<u8>),
    /// A complete message arrived. The caller must produce a response and
    /// pass it to [DeviceDataTransfer::respond]; the result of that call is
    /// the reply to this final ENVELOPE.
    MessageReceived(Vec<u8>),
}

impl DeviceDataTransfer {
    pub fn new(limits: SessionLimits) -> Self {
        Self {
            limits,
            inbound: Vec::new(),
            outbound: Vec::new(),
        }
    }

    pub fn process_command(&mut self, command: &[u8]) -> DeviceEvent {
        let command = match Command::parse(command) {
            Ok(command) => command,
            Err(response) => return DeviceEvent::Reply(response.into()),
        };
        match command {
            Command::SelectAid { aid } => {
                if aid == apdu::AID_MDOC_DATA_TRANSFER {
                    DeviceEvent::Reply(Response::status(StatusWord::Ok).into())
                } else {
                    DeviceEvent::Reply(
                        Response::status(StatusWord::FileOrApplicationNotFound).into(),
                    )
                }
            }
            Command::Envelope { chaining, data } => {
                self.inbound.extend_from_slice(data);
                if chaining {
                    return DeviceEvent::Reply(Response::status(StatusWord::Ok).into());
                }
                let envelope = std::mem::take(&mut self.inbound);
                match unwrap_do53(&envelope) {
                    Ok(message) => DeviceEvent::MessageReceived(message),
                    Err(e) => {
                        tracing::error!("malformed inbound envelope: {e}");
                        DeviceEvent::Reply(Response::status(StatusWord::Unspecified).into())
                    }
                }
            }
            Command::GetResponse { .. } => {
                if self.outbound.is_empty() {
                    return DeviceEvent::Reply(
                        Response::status(StatusWord::ConditionsNotSatisfied).into(),
                    );
                }
                DeviceEvent::Reply(self.next_fragment().into())
            }
        }
    }

    /// Queue the response to a received message and return the reply to the
    /// final ENVELOPE command.
    pub fn respond(&mut self, message: &[u8]) -> Vec<u8> {
        self.outbound = wrap_do53(message);
        self.next_fragment().into()
    }

    fn next_fragment(&mut self) -> Response {
        let take = self
            .limits
            .response_data_field_max_length
            .min(self.outbound.len());
        let payload: Vec<u8> = self.outbound.drain(..take).collect();
        let status = if self.outbound.is_empty() {
            StatusWord::Ok
        } else {
            // 0 signals 256 or more remaining.
            StatusWord::MoreData(u8::try_from(self.outbound.len()).unwrap_or(0))
        };
        Response { status, payload }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn limits() -> SessionLimits {
        SessionLimits::new(32, 32, 4096)
    }

    #[test]
    fn limits_clamp_to_max_transceive() {
        let limits = SessionLimits::new(65536, 65536, 253);
        assert_eq!(limits.command_data_field_max_length, 253 - APDU_OVERHEAD);
        assert_eq!(limits.response_data_field_max_length, 253 - APDU_OVERHEAD);
    }

    #[test]
    fn do53_length_forms() {
        let short = vec![0xAA; 0x7F];
        assert_eq!(wrap_do53(&short)[..2], [0x53, 0x7F]);
        let medium = vec![0xBB; 0xFF];
        assert_eq!(wrap_do53(&medium)[..3], [0x53, 0x81, 0xFF]);
        let long = vec![0xCC; 0x1234];
        assert_eq!(wrap_do53(&long)[..4], [0x53, 0x82, 0x12, 0x34]);
        for message in [short, medium, long] {
            assert_eq!(unwrap_do53(&wrap_do53(&message)).unwrap(), message);
        }
    }

    #[test]
    fn truncated_envelope_is_rejected() {
        let mut envelope = wrap_do53(&[1, 2, 3, 4]);
        envelope.pop();
        assert!(matches!(
            unwrap_do53(&envelope),
            Err(Error::Truncated { .. })
        ));
    }

    #[test]
    fn full_exchange_with_chunking() {
        let request = vec![0x11; 100];
        let response_message = vec![0x22; 100];

        let mut reader = ReaderDataTransfer::new(limits());
        let mut device = DeviceDataTransfer::new(limits());

        let commands = reader.envelope_commands(&request);
        assert!(commands.len() > 1);

        let mut received = None;
        let mut reply = Vec::new();
        for command in &commands {
            match device.process_command(command) {
                DeviceEvent::Reply(bytes) => reply = bytes,
                DeviceEvent::MessageReceived(message) => {
                    received = Some(message);
                    reply = device.respond(&response_message);
                }
            }
        }
        assert_eq!(received.as_deref(), Some(request.as_slice()));

        loop {
            match reader.absorb_response(&reply).unwrap() {
                ReaderEvent::Complete(message) => {
                    assert_eq!(message, response_message);
                    break;
                }
                ReaderEvent::RequestMore(get_response) => {
                    match device.process_command(&get_response) {
                        DeviceEvent::Reply(bytes) => reply = bytes,
                        DeviceEvent::MessageReceived(_) => unreachable!(),
                    }
                }
            }
        }
    }

    #[test]
    fn select_aid_is_answered_ok() {
        let mut device = DeviceDataTransfer::new(limits());
        let select = Command::SelectAid {
            aid: apdu::AID_MDOC_DATA_TRANSFER,
        }
        .to_bytes();
        assert_eq!(
            device.process_command(&select),
            DeviceEvent::Reply(vec![0x90, 0x00])
        );
        let select_other = Command::SelectAid { aid: &[0xA0, 0x00] }.to_bytes();
        assert_eq!(
            device.process_command(&select_other),
            DeviceEvent::Reply(vec![0x6A, 0x82])
        );
    }
}
