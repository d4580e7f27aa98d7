//! Executes client requests against the JTAG engine of the authenticated session.
use asd_protocol::{
    AgentCommand, JtagCommand, MAX_PAYLOAD_SIZE, Message, Request, Status, error::ReadError,
    tap::TapState,
};

use crate::{Transport, error::AsdError, events::GpioEvents, jtag::JtagHandler};

/// What the event loop does with the session after a message was handled.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Disposition {
    Continue,
    Close,
}

/// Lives from authentication until the client disconnects.
pub struct Agent<T> {
    handler: JtagHandler<T>,
    events: Option<GpioEvents>,
}

impl<T: Transport> Agent<T> {
    pub fn new(handler: JtagHandler<T>, events: Option<GpioEvents>) -> Agent<T> {
        Agent { handler, events }
    }

    pub fn events(&self) -> Option<&GpioEvents> {
        self.events.as_ref()
    }

    /// Event messages for everything queued on the GPIO socket.
    pub fn poll_events(&self) -> Result<Vec<Message>, AsdError> {
        let Some(events) = &self.events else {
            return Ok(Vec::new());
        };
        Ok(events
            .drain()?
            .into_iter()
            .map(|(event, value)| Message::event(event, value))
            .collect())
    }

    /// Handles one client message. Failed requests are answered with the error's status.
    pub fn handle(&mut self, message: &Message) -> (Option<Message>, Disposition) {
        let request = match Request::from_message(message) {
            Ok(request) => request,
            Err(e) => {
                log::error!("Rejecting message: {}", e);
                let response =
                    Message::response(&message.header, Status::ProtocolError, Box::default());
                return (Some(response), Disposition::Continue);
            }
        };
        match request {
            Request::Agent(AgentCommand::Close) => {
                log::info!("Client requested close");
                let response = Message::response(&message.header, Status::Ok, Box::default());
                (Some(response), Disposition::Close)
            }
            Request::Jtag(command) => {
                log::debug!("Received JTAG command 0x{:02x}", command.code());
                let response = match self.execute(command) {
                    Ok(payload) => Message::response(&message.header, Status::Ok, payload),
                    Err(e) => {
                        log::error!("JTAG command failed: {}", e);
                        Message::response(&message.header, e.status(), Box::default())
                    }
                };
                (Some(response), Disposition::Continue)
            }
        }
    }

    fn execute(&mut self, command: JtagCommand) -> Result<Box<[u8]>, AsdError> {
        match command {
            JtagCommand::Init { sw_mode } => self.handler.initialize(sw_mode)?,
            JtagCommand::SetPadding { kind, value } => self.handler.set_padding(kind, value)?,
            JtagCommand::SetTapState(state) => self.handler.set_tap_state(state)?,
            JtagCommand::GetTapState => return Ok(Box::new([self.handler.tap_state().index()])),
            JtagCommand::Shift {
                num_bits,
                end_state,
                read_tdo,
                tdi,
            } => return self.shift(num_bits, end_state, read_tdo, &tdi),
            JtagCommand::WaitCycles(cycles) => self.handler.wait_cycles(cycles)?,
            JtagCommand::SetActiveChain(chain) => self.handler.set_active_chain(chain)?,
            JtagCommand::TapReset => self.handler.tap_reset()?,
            JtagCommand::SetTck(period) => self.handler.set_tck(period)?,
        }
        Ok(Box::default())
    }

    /// TDI shorter than the shift is extended with zeros.
    fn shift(
        &mut self,
        num_bits: u32,
        end_state: TapState,
        read_tdo: bool,
        tdi: &[u8],
    ) -> Result<Box<[u8]>, AsdError> {
        let bytes = (num_bits as usize).div_ceil(8);
        if bytes > MAX_PAYLOAD_SIZE {
            return Err(AsdError::Protocol(ReadError::TooManyBytes {
                max: MAX_PAYLOAD_SIZE * 8,
                got: num_bits as usize,
            }));
        }
        let mut input = vec![0u8; bytes];
        let copied = tdi.len().min(bytes);
        input[..copied].copy_from_slice(&tdi[..copied]);
        let mut output = if read_tdo { vec![0u8; bytes] } else { Vec::new() };
        self.handler.shift(num_bits, &input, &mut output, end_state)?;
        Ok(output.into_boxed_slice())
    }

    /// Releases the bridge once the client is gone.
    pub fn on_disconnect(&mut self) {
        self.handler.deinitialize();
    }
}
