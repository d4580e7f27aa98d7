/// Read and write implementations for the protocol messages
use std::io::{self, Read, Write};

use crate::{
    error::ReadError,
    protocol::{
        AgentCommand, HEADER_SIZE, JtagCommand, MAX_PAYLOAD_SIZE, Message, MessageHeader,
        MessageType, PaddingKind, Request,
    },
    tap::TapState,
};

impl MessageHeader {
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let size = self.size as u32 & 0x1fff;
        let word = size
            | (self.msg_type as u32 & 0x7) << 13
            | (self.tag as u32 & 0x7) << 16
            | (self.origin_id as u32 & 0x7) << 19
            | (self.enc_bit as u32) << 23
            | (self.cmd_stat as u32) << 24;
        word.to_le_bytes()
    }

    pub fn from_bytes(bytes: [u8; HEADER_SIZE]) -> Result<MessageHeader, ReadError> {
        let word = u32::from_le_bytes(bytes);
        let type_bits = ((word >> 13) & 0x7) as u8;
        let msg_type = MessageType::from_bits(type_bits).ok_or_else(|| {
            ReadError::InvalidHeader(format!("unknown message type {}", type_bits))
        })?;
        Ok(MessageHeader {
            size: (word & 0x1fff) as u16,
            msg_type,
            tag: ((word >> 16) & 0x7) as u8,
            origin_id: ((word >> 19) & 0x7) as u8,
            enc_bit: (word >> 23) & 1 == 1,
            cmd_stat: (word >> 24) as u8,
        })
    }
}

/// Payload size encoded in a raw header, without validating the rest of it.
pub fn payload_size(header: &[u8]) -> Option<usize> {
    match header {
        [lsb, msb, ..] => Some(((*msb as usize & 0x1f) << 8) | *lsb as usize),
        _ => None,
    }
}

#[test]
fn header_layout() {
    let header = MessageHeader {
        size: 0x123,
        msg_type: MessageType::Jtag,
        tag: 5,
        origin_id: 2,
        enc_bit: false,
        cmd_stat: 0xA5,
    };
    let bytes = header.to_bytes();
    assert_eq!(bytes, [0x23, 0x21, 0x15, 0xA5]);
    assert_eq!(payload_size(&bytes), Some(0x123));
    assert_eq!(MessageHeader::from_bytes(bytes).unwrap(), header);
}

#[test]
fn header_rejects_unknown_type() {
    let bytes = [0x00, 0xE0, 0x00, 0x00];
    assert!(matches!(
        MessageHeader::from_bytes(bytes),
        Err(ReadError::InvalidHeader(_))
    ));
}

impl Message {
    /// Reads one message. Fails without consuming the payload if it exceeds `max_payload`.
    pub fn from_reader(reader: &mut impl Read, max_payload: usize) -> Result<Message, ReadError> {
        let mut bytes = [0u8; HEADER_SIZE];
        reader.read_exact(&mut bytes)?;
        let header = MessageHeader::from_bytes(bytes)?;
        let size = header.size as usize;
        if size > max_payload {
            return Err(ReadError::TooManyBytes {
                max: max_payload,
                got: size,
            });
        }
        let mut payload = vec![0u8; size].into_boxed_slice();
        reader.read_exact(&mut payload)?;
        Ok(Message { header, payload })
    }

    pub fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        writer.write_all(&self.to_bytes()?)
    }

    /// Serializes header and payload into one buffer.
    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        if self.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "payload of {} bytes exceeds maximum of {}",
                    self.payload.len(),
                    MAX_PAYLOAD_SIZE
                ),
            ));
        }
        let mut header = self.header;
        header.size = self.payload.len() as u16;
        let mut out = Vec::with_capacity(HEADER_SIZE + self.payload.len());
        out.extend_from_slice(&header.to_bytes());
        out.extend_from_slice(&self.payload);
        Ok(out)
    }
}

impl JtagCommand {
    const CMD_INIT: u8 = 0x01;
    const CMD_SET_PADDING: u8 = 0x02;
    const CMD_SET_TAP_STATE: u8 = 0x03;
    const CMD_GET_TAP_STATE: u8 = 0x04;
    const CMD_SHIFT: u8 = 0x05;
    const CMD_WAIT_CYCLES: u8 = 0x06;
    const CMD_SET_ACTIVE_CHAIN: u8 = 0x07;
    const CMD_TAP_RESET: u8 = 0x08;
    const CMD_SET_TCK: u8 = 0x09;

    const SHIFT_READ_TDO: u8 = 0x01;

    pub fn code(&self) -> u8 {
        match self {
            JtagCommand::Init { .. } => Self::CMD_INIT,
            JtagCommand::SetPadding { .. } => Self::CMD_SET_PADDING,
            JtagCommand::SetTapState(_) => Self::CMD_SET_TAP_STATE,
            JtagCommand::GetTapState => Self::CMD_GET_TAP_STATE,
            JtagCommand::Shift { .. } => Self::CMD_SHIFT,
            JtagCommand::WaitCycles(_) => Self::CMD_WAIT_CYCLES,
            JtagCommand::SetActiveChain(_) => Self::CMD_SET_ACTIVE_CHAIN,
            JtagCommand::TapReset => Self::CMD_TAP_RESET,
            JtagCommand::SetTck(_) => Self::CMD_SET_TCK,
        }
    }

    pub fn decode(cmd: u8, payload: &[u8]) -> Result<JtagCommand, ReadError> {
        let command = match cmd {
            Self::CMD_INIT => JtagCommand::Init {
                sw_mode: take::<1>(payload)?[0] != 0,
            },
            Self::CMD_SET_PADDING => {
                let [kind, rest @ ..] = take::<5>(payload)?;
                let kind = PaddingKind::from_u8(kind).ok_or_else(|| {
                    ReadError::InvalidFormat(format!("Unknown padding kind {}", kind))
                })?;
                JtagCommand::SetPadding {
                    kind,
                    value: u32::from_le_bytes(rest),
                }
            }
            Self::CMD_SET_TAP_STATE => {
                JtagCommand::SetTapState(TapState::try_from(take::<1>(payload)?[0])?)
            }
            Self::CMD_GET_TAP_STATE => JtagCommand::GetTapState,
            Self::CMD_SHIFT => {
                let [b0, b1, b2, b3, end_state, flags] = take::<6>(payload)?;
                JtagCommand::Shift {
                    num_bits: u32::from_le_bytes([b0, b1, b2, b3]),
                    end_state: TapState::try_from(end_state)?,
                    read_tdo: flags & Self::SHIFT_READ_TDO != 0,
                    tdi: payload[6..].into(),
                }
            }
            Self::CMD_WAIT_CYCLES => JtagCommand::WaitCycles(u32::from_le_bytes(take(payload)?)),
            Self::CMD_SET_ACTIVE_CHAIN => JtagCommand::SetActiveChain(take::<1>(payload)?[0]),
            Self::CMD_TAP_RESET => JtagCommand::TapReset,
            Self::CMD_SET_TCK => JtagCommand::SetTck(u32::from_le_bytes(take(payload)?)),
            _ => {
                return Err(ReadError::InvalidCommand {
                    msg_type: MessageType::Jtag as u8,
                    cmd,
                });
            }
        };
        Ok(command)
    }

    pub fn encode(&self) -> Box<[u8]> {
        match self {
            JtagCommand::Init { sw_mode } => vec![*sw_mode as u8].into_boxed_slice(),
            JtagCommand::SetPadding { kind, value } => {
                let mut out = vec![*kind as u8];
                out.extend_from_slice(&value.to_le_bytes());
                out.into_boxed_slice()
            }
            JtagCommand::SetTapState(state) => vec![state.index()].into_boxed_slice(),
            JtagCommand::GetTapState | JtagCommand::TapReset => Box::default(),
            JtagCommand::Shift {
                num_bits,
                end_state,
                read_tdo,
                tdi,
            } => {
                let mut out = Vec::with_capacity(6 + tdi.len());
                out.extend_from_slice(&num_bits.to_le_bytes());
                out.push(end_state.index());
                out.push(if *read_tdo { Self::SHIFT_READ_TDO } else { 0 });
                out.extend_from_slice(tdi);
                out.into_boxed_slice()
            }
            JtagCommand::WaitCycles(cycles) => cycles.to_le_bytes().into(),
            JtagCommand::SetActiveChain(chain) => vec![*chain].into_boxed_slice(),
            JtagCommand::SetTck(period) => period.to_le_bytes().into(),
        }
    }
}

/// Copies the fixed-size prefix of a payload.
fn take<const N: usize>(payload: &[u8]) -> Result<[u8; N], ReadError> {
    payload
        .get(..N)
        .and_then(|prefix| prefix.try_into().ok())
        .ok_or_else(|| {
            ReadError::InvalidFormat(format!(
                "Payload too short: expected at least {} bytes, got {}",
                N,
                payload.len()
            ))
        })
}

impl AgentCommand {
    const CMD_CLOSE: u8 = 0x01;

    pub fn code(&self) -> u8 {
        match self {
            AgentCommand::Close => Self::CMD_CLOSE,
        }
    }
}

impl Request {
    pub fn from_message(message: &Message) -> Result<Request, ReadError> {
        let cmd = message.header.cmd_stat;
        match message.header.msg_type {
            MessageType::Jtag => Ok(Request::Jtag(JtagCommand::decode(cmd, &message.payload)?)),
            MessageType::AgentControl if cmd == AgentCommand::CMD_CLOSE => {
                Ok(Request::Agent(AgentCommand::Close))
            }
            other => Err(ReadError::InvalidCommand {
                msg_type: other as u8,
                cmd,
            }),
        }
    }

    pub fn to_message(&self, tag: u8) -> Message {
        let (msg_type, cmd, payload) = match self {
            Request::Agent(command) => (MessageType::AgentControl, command.code(), Box::default()),
            Request::Jtag(command) => (MessageType::Jtag, command.code(), command.encode()),
        };
        let mut header = MessageHeader::new(msg_type, cmd);
        header.tag = tag & 0x7;
        Message::new(header, payload)
    }
}
