//! # ASD Client
//!
//! A Rust client library for connecting to At-Scale-Debug (ASD) servers
//! and performing remote JTAG operations on a target.
//!
//! ## Overview
//!
//! The client speaks the ASD message protocol over TCP: every request carries a
//! 3-bit tag that the server echoes together with a status in its response.
//! Target events the server pushes in between are queued and can be fetched with
//! [`AsdClient::read_event`].
//!
//! For the message format, see the [`asd_protocol`] crate.
//!
//! ## Basic Usage
//!
//! ```no_run
//! use asd_client::AsdClient;
//! use asd_protocol::tap::TapState;
//!
//! let mut client = AsdClient::connect("127.0.0.1:5123")?;
//! client.init(false)?;
//! client.set_tap_state(TapState::ShfIR)?;
//! let tdo = client.shift(8, &[0x02], TapState::RTI, true)?;
//! println!("TDO data: {:02x?}", tdo);
//! client.close()?;
//! # Ok::<(), asd_client::ClientError>(())
//! ```
use std::{
    collections::VecDeque,
    io::{self, Read, Write},
    net::{TcpStream, ToSocketAddrs},
    time::Duration,
};

use asd_protocol::{
    AgentCommand, JtagCommand, MAX_PAYLOAD_SIZE, Message, MessageType, PaddingKind, Request,
    Status, TargetEvent, error::ReadError, tap::TapState,
};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Read(#[from] ReadError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("server answered with {0:?}")]
    Status(Status),
    #[error("server answered with unknown status {0}")]
    UnknownStatus(u8),
    #[error("authentication rejected")]
    Rejected,
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

/// ASD client for remote JTAG operations.
pub struct AsdClient {
    tcp: TcpStream,
    tag: u8,
    events: VecDeque<(TargetEvent, u8)>,
}

impl AsdClient {
    pub fn connect(addr: impl ToSocketAddrs) -> io::Result<AsdClient> {
        Ok(AsdClient {
            tcp: TcpStream::connect(addr)?,
            tag: 0,
            events: VecDeque::new(),
        })
    }

    pub fn set_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.tcp.set_read_timeout(timeout)?;
        self.tcp.set_write_timeout(timeout)
    }

    /// Sends the authentication token. Needed only if the server requires one.
    pub fn authenticate(&mut self, token: &str) -> Result<(), ClientError> {
        let len = u8::try_from(token.len()).map_err(|_| {
            ClientError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "token longer than 255 bytes",
            ))
        })?;
        let mut packet = vec![len];
        packet.extend_from_slice(token.as_bytes());
        self.tcp.write_all(&packet)?;
        let mut status = [0u8; 1];
        self.tcp.read_exact(&mut status)?;
        match status[0] {
            0 => Ok(()),
            _ => Err(ClientError::Rejected),
        }
    }

    /// Sends a request and waits for its response payload.
    pub fn request(&mut self, request: Request) -> Result<Box<[u8]>, ClientError> {
        let tag = self.tag;
        self.tag = (self.tag + 1) & 0x7;
        request.to_message(tag).write_to(&mut self.tcp)?;

        let response = loop {
            let message = self.read_message()?;
            if message.header.msg_type != MessageType::Event {
                break message;
            }
            self.queue_event(&message)?;
        };
        if response.header.tag != tag {
            return Err(ClientError::UnexpectedResponse(format!(
                "tag {} for request tag {}",
                response.header.tag, tag
            )));
        }
        match response.status() {
            Some(Status::Ok) => Ok(response.payload),
            Some(status) => Err(ClientError::Status(status)),
            None => Err(ClientError::UnknownStatus(response.header.cmd_stat)),
        }
    }

    fn jtag(&mut self, command: JtagCommand) -> Result<Box<[u8]>, ClientError> {
        self.request(Request::Jtag(command))
    }

    /// Resets the TAP and all scan chains.
    pub fn init(&mut self, sw_mode: bool) -> Result<(), ClientError> {
        self.jtag(JtagCommand::Init { sw_mode }).map(drop)
    }

    pub fn set_padding(&mut self, kind: PaddingKind, value: u32) -> Result<(), ClientError> {
        self.jtag(JtagCommand::SetPadding { kind, value }).map(drop)
    }

    pub fn set_tap_state(&mut self, state: TapState) -> Result<(), ClientError> {
        self.jtag(JtagCommand::SetTapState(state)).map(drop)
    }

    pub fn get_tap_state(&mut self) -> Result<TapState, ClientError> {
        let payload = self.jtag(JtagCommand::GetTapState)?;
        match payload[..] {
            [state] => Ok(TapState::try_from(state)?),
            _ => Err(ClientError::UnexpectedResponse(format!(
                "TAP state of {} bytes",
                payload.len()
            ))),
        }
    }

    /// Perform a JTAG shift operation.
    ///
    /// # Arguments
    ///
    /// * `num_bits` - Number of bits to shift
    /// * `tdi` - Test Data In vector, extended with zeros up to ⌈num_bits / 8⌉ bytes
    /// * `end_state` - State the TAP moves to after the shift
    /// * `read_tdo` - Whether the server returns the TDO vector
    ///
    /// # Returns
    ///
    /// ⌈num_bits / 8⌉ bytes of TDO if `read_tdo` is set, otherwise an empty slice.
    pub fn shift(
        &mut self,
        num_bits: u32,
        tdi: &[u8],
        end_state: TapState,
        read_tdo: bool,
    ) -> Result<Box<[u8]>, ClientError> {
        let tdo = self.jtag(JtagCommand::Shift {
            num_bits,
            end_state,
            read_tdo,
            tdi: tdi.into(),
        })?;
        let expected = if read_tdo {
            num_bits.div_ceil(8) as usize
        } else {
            0
        };
        if tdo.len() != expected {
            return Err(ClientError::UnexpectedResponse(format!(
                "{} bytes of TDO, expected {}",
                tdo.len(),
                expected
            )));
        }
        Ok(tdo)
    }

    pub fn wait_cycles(&mut self, cycles: u32) -> Result<(), ClientError> {
        self.jtag(JtagCommand::WaitCycles(cycles)).map(drop)
    }

    pub fn set_active_chain(&mut self, chain: u8) -> Result<(), ClientError> {
        self.jtag(JtagCommand::SetActiveChain(chain)).map(drop)
    }

    pub fn tap_reset(&mut self) -> Result<(), ClientError> {
        self.jtag(JtagCommand::TapReset).map(drop)
    }

    pub fn set_tck(&mut self, period: u32) -> Result<(), ClientError> {
        self.jtag(JtagCommand::SetTck(period)).map(drop)
    }

    /// Ends the session. The server releases the bridge and closes the connection.
    pub fn close(mut self) -> Result<(), ClientError> {
        self.request(Request::Agent(AgentCommand::Close)).map(drop)
    }

    /// Returns the next target event, waiting for one if none is queued.
    pub fn read_event(&mut self) -> Result<(TargetEvent, u8), ClientError> {
        while self.events.is_empty() {
            let message = self.read_message()?;
            if message.header.msg_type != MessageType::Event {
                return Err(ClientError::UnexpectedResponse(format!(
                    "{:?} message while waiting for an event",
                    message.header.msg_type
                )));
            }
            self.queue_event(&message)?;
        }
        self.events
            .pop_front()
            .ok_or_else(|| ClientError::UnexpectedResponse("no event".to_string()))
    }

    fn read_message(&mut self) -> Result<Message, ClientError> {
        Ok(Message::from_reader(&mut self.tcp, MAX_PAYLOAD_SIZE)?)
    }

    fn queue_event(&mut self, message: &Message) -> Result<(), ClientError> {
        let event = TargetEvent::from_u8(message.header.cmd_stat).ok_or_else(|| {
            ClientError::UnexpectedResponse(format!("unknown event {}", message.header.cmd_stat))
        })?;
        let value = message.payload.first().copied().unwrap_or_default();
        self.events.push_back((event, value));
        Ok(())
    }
}
