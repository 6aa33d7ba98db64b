//! ISO 7816-4 command/response APDUs for the 18013-5 NFC data transfer
//! procedure: SELECT (application), ENVELOPE and GET RESPONSE.

use strum::IntoEnumIterator;
use strum_macros::EnumIter;

/// Application identifier of the mdoc NFC data transfer applet.
pub const AID_MDOC_DATA_TRANSFER: &[u8] = &[0xD2, 0x76, 0x00, 0x00, 0x85, 0x01, 0x01];

/// CLA with the command chaining bit set: more ENVELOPE fragments follow.
pub const CLA_CHAINING: u8 = 0x10;
pub const CLA_PLAIN: u8 = 0x00;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter)]
pub enum Instruction {
    Select = 0xA4,
    Envelope = 0xC3,
    GetResponse = 0xC0,
}

impl TryFrom<u8> for Instruction {
    type Error = ();

    fn try_from(ins: u8) -> Result<Self, ()> {
        Self::iter().find(|i| *i as u8 == ins).ok_or(())
    }
}

/// Status words used by the data transfer procedure. `61 XX` signals that
/// more response data is available and must be fetched with GET RESPONSE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusWord {
    Ok,
    /// More response bytes available; the value is the number remaining,
    /// with 0 meaning 256 or more.
    MoreData(u8),
    IncorrectLength,
    ConditionsNotSatisfied,
    FileOrApplicationNotFound,
    InstructionNotSupported,
    Unspecified,
}

impl StatusWord {
    pub fn to_bytes(self) -> [u8; 2] {
        match self {
            StatusWord::Ok => [0x90, 0x00],
            StatusWord::MoreData(remaining) => [0x61, remaining],
            StatusWord::IncorrectLength => [0x67, 0x00],
            StatusWord::ConditionsNotSatisfied => [0x69, 0x85],
            StatusWord::FileOrApplicationNotFound => [0x6A, 0x82],
            StatusWord::InstructionNotSupported => [0x6D, 0x00],
            StatusWord::Unspecified => [0x6F, 0x00],
        }
    }
}

impl TryFrom<[u8; 2]> for StatusWord {
    type Error = ();

    fn try_from(sw: [u8; 2]) -> Result<Self, ()> {
        match sw {
            [0x90, 0x00] => Ok(StatusWord::Ok),
            [0x61, remaining] => Ok(StatusWord::MoreData(remaining)),
            [0x67, 0x00] => Ok(StatusWord::IncorrectLength),
            [0x69, 0x85] => Ok(StatusWord::ConditionsNotSatisfied),
            [0x6A, 0x82] => Ok(StatusWord::FileOrApplicationNotFound),
            [0x6D, 0x00] => Ok(StatusWord::InstructionNotSupported),
            [0x6F, 0x00] => Ok(StatusWord::Unspecified),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: StatusWord,
    pub payload: Vec<u8>,
}

impl Response {
    pub fn status(status: StatusWord) -> Self {
        Response {
            status,
            payload: Vec::new(),
        }
    }
}

impl From<Response> for Vec<u8> {
    fn from(response: Response) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(response.payload.len() + 2);
        bytes.extend_from_slice(&response.payload);
        bytes.extend_from_slice(&response.status.to_bytes());
        bytes
    }
}

impl TryFrom<&[u8]> for Response {
    type Error = &'static str;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        if bytes.len() < 2 {
            return Err("response shorter than a status word");
        }
        let (payload, sw) = bytes.split_at(bytes.len() - 2);
        let status = StatusWord::try_from([sw[0], sw[1]]).map_err(|_| "unknown status word")?;
        Ok(Response {
            status,
            payload: payload.to_vec(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<'a> {
    SelectAid {
        aid: &'a [u8],
    },
    Envelope {
        /// Command chaining: another ENVELOPE fragment follows this one.
        chaining: bool,
        data: &'a [u8],
    },
    GetResponse {
        /// Requested length; 0 means the maximum the card can return.
        expected: usize,
    },
}

fn serialize_lc(len: usize) -> Vec<u8> {
    if len < 256 {
        vec![len as u8]
    } else {
        let len = (len as u16).to_be_bytes();
        vec![0x00, len[0], len[1]]
    }
}

impl<'a> Command<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self, Response> {
        if bytes.len() < 4 {
            return Err(Response::status(StatusWord::IncorrectLength));
        }
        let (cla, ins, p1, p2) = (bytes[0], bytes[1], bytes[2], bytes[3]);
        let body = &bytes[4..];

        let (lc, lc_len) = match body {
            [] => (0usize, 0usize),
            // Lone Le byte, no command data.
            [_] => (0, 0),
            [0x00, hi, lo, rest @ ..] if !rest.is_empty() => {
                (u16::from_be_bytes([*hi, *lo]) as usize, 3)
            }
            [short, ..] => (*short as usize, 1),
        };

        let ins = Instruction::try_from(ins)
            .map_err(|_| Response::status(StatusWord::InstructionNotSupported))?;

        match ins {
            Instruction::Select => {
                // Only SELECT by AID (P1 = 0x04) is used by the data
                // transfer applet.
                if p1 != 0x04 {
                    return Err(Response::status(StatusWord::InstructionNotSupported));
                }
                let data = body
                    .get(lc_len..lc_len + lc)
                    .ok_or_else(|| Response::status(StatusWord::IncorrectLength))?;
                Ok(Command::SelectAid { aid: data })
            }
            Instruction::Envelope => {
                let data = body
                    .get(lc_len..lc_len + lc)
                    .ok_or_else(|| Response::status(StatusWord::IncorrectLength))?;
                Ok(Command::Envelope {
                    chaining: cla & CLA_CHAINING != 0,
                    data,
                })
            }
            Instruction::GetResponse => {
                let expected = match body {
                    [] => 0,
                    [le] => *le as usize,
                    [0x00, hi, lo] => u16::from_be_bytes([*hi, *lo]) as usize,
                    _ => return Err(Response::status(StatusWord::IncorrectLength)),
                };
                Ok(Command::GetResponse { expected })
            }
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Command::SelectAid { aid } => {
                let mut bytes = vec![CLA_PLAIN, Instruction::Select as u8, 0x04, 0x00];
                bytes.extend_from_slice(&serialize_lc(aid.len()));
                bytes.extend_from_slice(aid);
                bytes.push(0x00);
                bytes
            }
            Command::Envelope { chaining, data } => {
                let cla = if *chaining { CLA_CHAINING } else { CLA_PLAIN };
                let mut bytes = vec![cla, Instruction::Envelope as u8, 0x00, 0x00];
                bytes.extend_from_slice(&serialize_lc(data.len()));
                bytes.extend_from_slice(data);
                if !chaining {
                    // Le: accept up to the maximum response length.
                    bytes.push(0x00);
                }
                bytes
            }
            Command::GetResponse { expected } => {
                let mut bytes = vec![CLA_PLAIN, Instruction::GetResponse as u8, 0x00, 0x00];
                if *expected < 256 {
                    bytes.push(*expected as u8);
                } else {
                    let expected = (*expected as u16).to_be_bytes();
                    bytes.extend_from_slice(&[0x00, expected[0], expected[1]]);
                }
                bytes
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn select_aid_roundtrip() {
        let command = Command::SelectAid {
            aid: AID_MDOC_DATA_TRANSFER,
        };
        let bytes = command.to_bytes();
        assert_eq!(
            bytes,
            vec![0x00, 0xA4, 0x04, 0x00, 0x07, 0xD2, 0x76, 0x00, 0x00, 0x85, 0x01, 0x01, 0x00,]
        );
        assert_eq!(Command::parse(&bytes).unwrap(), command);
    }

    #[test]
    fn envelope_chaining_bit() {
        let data = vec![0x53, 0x02, 0xAB, 0xCD];
        let chained = Command::Envelope {
            chaining: true,
            data: &data,
        };
        let bytes = chained.to_bytes();
        assert_eq!(bytes[0], 0x10);
        assert_eq!(Command::parse(&bytes).unwrap(), chained);

        let last = Command::Envelope {
            chaining: false,
            data: &data,
        };
        let bytes = last.to_bytes();
        assert_eq!(bytes[0], 0x00);
        assert_eq!(Command::parse(&bytes).unwrap(), last);
    }

    #[test]
    fn extended_length_envelope() {
        let data = vec![0xA5; 300];
        let command = Command::Envelope {
            chaining: true,
            data: &data,
        };
        let bytes = command.to_bytes();
        // 00 01 2C extended Lc
        assert_eq!(&bytes[4..7], &[0x00, 0x01, 0x2C]);
        assert_eq!(Command::parse(&bytes).unwrap(), command);
    }

    #[test]
    fn status_word_roundtrip() {
        assert_eq!(StatusWord::Ok.to_bytes(), [0x90, 0x00]);
        assert_eq!(
            StatusWord::try_from([0x61, 0x10]),
            Ok(StatusWord::MoreData(0x10))
        );
        assert!(StatusWord::try_from([0x12, 0x34]).is_err());
    }

    #[test]
    fn unknown_instruction_is_rejected() {
        let err = Command::parse(&[0x00, 0xB0, 0x00, 0x00, 0x02]).unwrap_err();
        assert_eq!(err.status, StatusWord::InstructionNotSupported);
    }
}
