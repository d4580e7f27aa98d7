use crate::tap::TapState;

/// Size of the packed [`MessageHeader`] on the wire.
pub const HEADER_SIZE: usize = 4;

/// The header carries a 13-bit payload size.
pub const MAX_PAYLOAD_SIZE: usize = 0x1fff;

/// Selects which component of the agent handles a message.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MessageType {
    /// Session-level control such as closing the connection.
    AgentControl = 0,
    /// JTAG engine operations.
    Jtag = 1,
    /// Asynchronous target events sent from the server to the client.
    Event = 2,
    /// Messages relayed from the downstream bridge controller.
    Passthrough = 3,
}

impl MessageType {
    pub fn from_bits(bits: u8) -> Option<MessageType> {
        match bits {
            0 => Some(MessageType::AgentControl),
            1 => Some(MessageType::Jtag),
            2 => Some(MessageType::Event),
            3 => Some(MessageType::Passthrough),
            _ => None,
        }
    }
}

/// Header preceding every message in both directions.
///
/// Packed into four little-endian bytes:
///
/// | bits    | field                        |
/// |---------|------------------------------|
/// | 0..=12  | payload size                 |
/// | 13..=15 | message type                 |
/// | 16..=18 | tag, echoed in the response  |
/// | 19..=21 | origin id                    |
/// | 23      | payload encrypted            |
/// | 24..=31 | command (request) or status (response) |
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MessageHeader {
    pub size: u16,
    pub msg_type: MessageType,
    pub tag: u8,
    pub origin_id: u8,
    pub enc_bit: bool,
    pub cmd_stat: u8,
}

impl MessageHeader {
    pub fn new(msg_type: MessageType, cmd_stat: u8) -> MessageHeader {
        MessageHeader {
            size: 0,
            msg_type,
            tag: 0,
            origin_id: 0,
            enc_bit: false,
            cmd_stat,
        }
    }
}

/// A message exchanged between client and server.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Message {
    pub header: MessageHeader,
    pub payload: Box<[u8]>,
}

impl Message {
    /// Creates a message and sets the header size from the payload.
    ///
    /// Payloads larger than [`MAX_PAYLOAD_SIZE`] are rejected when writing.
    pub fn new(mut header: MessageHeader, payload: Box<[u8]>) -> Message {
        header.size = payload.len().min(MAX_PAYLOAD_SIZE) as u16;
        Message { header, payload }
    }

    /// The response to a request: same type and tag, status in the command byte.
    pub fn response(request: &MessageHeader, status: Status, payload: Box<[u8]>) -> Message {
        let header = MessageHeader {
            size: 0,
            msg_type: request.msg_type,
            tag: request.tag,
            origin_id: request.origin_id,
            enc_bit: false,
            cmd_stat: status as u8,
        };
        Message::new(header, payload)
    }

    /// An unsolicited notification about a target event.
    pub fn event(event: TargetEvent, value: u8) -> Message {
        Message::new(
            MessageHeader::new(MessageType::Event, event as u8),
            Box::new([value]),
        )
    }

    pub fn status(&self) -> Option<Status> {
        Status::from_u8(self.header.cmd_stat)
    }
}

/// Result code carried in the command byte of a response.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Status {
    Ok = 0,
    ProtocolError = 1,
    StateError = 2,
    ConfigError = 3,
    TransportError = 4,
    Unsupported = 5,
}

impl Status {
    pub fn from_u8(value: u8) -> Option<Status> {
        match value {
            0 => Some(Status::Ok),
            1 => Some(Status::ProtocolError),
            2 => Some(Status::StateError),
            3 => Some(Status::ConfigError),
            4 => Some(Status::TransportError),
            5 => Some(Status::Unsupported),
            _ => None,
        }
    }
}

/// Scan chain padding categories.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PaddingKind {
    DRPre = 0,
    DRPost = 1,
    IRPre = 2,
    IRPost = 3,
}

impl PaddingKind {
    pub fn from_u8(value: u8) -> Option<PaddingKind> {
        match value {
            0 => Some(PaddingKind::DRPre),
            1 => Some(PaddingKind::DRPost),
            2 => Some(PaddingKind::IRPre),
            3 => Some(PaddingKind::IRPost),
            _ => None,
        }
    }

    pub fn is_ir(self) -> bool {
        matches!(self, PaddingKind::IRPre | PaddingKind::IRPost)
    }
}

/// Target pin events forwarded to the client.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TargetEvent {
    PlatformReset = 0,
    PowerGood = 1,
    Prdy = 2,
    XdpPresent = 3,
}

impl TargetEvent {
    pub fn from_u8(value: u8) -> Option<TargetEvent> {
        match value {
            0 => Some(TargetEvent::PlatformReset),
            1 => Some(TargetEvent::PowerGood),
            2 => Some(TargetEvent::Prdy),
            3 => Some(TargetEvent::XdpPresent),
            _ => None,
        }
    }
}

/// Operations on the JTAG engine, carried in [`MessageType::Jtag`] messages.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum JtagCommand {
    /// Reset the TAP and all scan chains, selecting software or hardware mode.
    Init { sw_mode: bool },
    SetPadding { kind: PaddingKind, value: u32 },
    SetTapState(TapState),
    /// Responds with the state of the active chain as one byte.
    GetTapState,
    /// Shift `num_bits` through the active chain, ending in `end_state`.
    /// When `read_tdo` is set, the response carries ⌈num_bits / 8⌉ bytes of TDO.
    Shift {
        num_bits: u32,
        end_state: TapState,
        read_tdo: bool,
        tdi: Box<[u8]>,
    },
    WaitCycles(u32),
    SetActiveChain(u8),
    TapReset,
    SetTck(u32),
}

/// Session-level commands, carried in [`MessageType::AgentControl`] messages.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AgentCommand {
    /// The client is done; the server releases the engine and closes the connection.
    Close,
}

/// A decoded client request.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Request {
    Agent(AgentCommand),
    Jtag(JtagCommand),
}
