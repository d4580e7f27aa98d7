//! A bridge stand-in that tracks the TAP in software and loops TDI back as TDO.
//!
//! Used by the `sim` backend of the daemon and by tests, which inspect the
//! recorded [`Exchange`]s.
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use asd_protocol::{
    error::ReadError,
    frame::{BridgeCommand, IANA_ID, ShiftFrame, TapStateFrame, strip_iana},
    tap::TapState,
    tms::TmsSequence,
};

use crate::{Transport, error::TransportError};

/// One frame as received by the simulated bridge.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Exchange {
    Shift(ShiftFrame),
    TapState(TapStateFrame),
    AsdInit(u8),
}

#[derive(Debug)]
struct SimState {
    tap: TapState,
    exchanges: Vec<Exchange>,
    fail_after: Option<usize>,
    truncate: bool,
    flow: Option<u8>,
}

#[derive(Debug, Clone)]
pub struct LoopbackTransport {
    state: Arc<Mutex<SimState>>,
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        LoopbackTransport::new()
    }
}

impl LoopbackTransport {
    pub fn new() -> LoopbackTransport {
        LoopbackTransport {
            state: Arc::new(Mutex::new(SimState {
                tap: TapState::TLR,
                exchanges: Vec::new(),
                fail_after: None,
                truncate: false,
                flow: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn tap_state(&self) -> TapState {
        self.lock().tap
    }

    pub fn force_tap_state(&self, state: TapState) {
        self.lock().tap = state;
    }

    /// All frames received so far.
    pub fn exchanges(&self) -> Vec<Exchange> {
        self.lock().exchanges.clone()
    }

    pub fn clear_exchanges(&self) {
        self.lock().exchanges.clear();
    }

    /// Flow of the last AsdInit, `None` before the first one.
    pub fn flow(&self) -> Option<u8> {
        self.lock().flow
    }

    /// Lets `count` more transfers succeed, then fails every following one.
    pub fn fail_after(&self, count: usize) {
        self.lock().fail_after = Some(count);
    }

    /// Replies carry only the IANA id, dropping any TDO.
    pub fn truncate_replies(&self, truncate: bool) {
        self.lock().truncate = truncate;
    }
}

impl Transport for LoopbackTransport {
    fn transfer(
        &self,
        command: BridgeCommand,
        tx: &[u8],
        rx: &mut [u8],
    ) -> Result<usize, TransportError> {
        let mut state = self.lock();
        let fail_after = state.fail_after;
        match fail_after {
            Some(0) => {
                return Err(TransportError::Unavailable(
                    "simulated bridge failure".to_string(),
                ));
            }
            Some(n) => state.fail_after = Some(n - 1),
            None => {}
        }

        let mut reply = IANA_ID.to_vec();
        let malformed = |e: ReadError| TransportError::MalformedReply(format!("{}", e));
        match command {
            BridgeCommand::SetTapState => {
                let frame = TapStateFrame::decode(tx).map_err(malformed)?;
                let sequence = TmsSequence {
                    length: frame.tms_length,
                    bits: frame.tms_bits,
                };
                state.tap = sequence.apply(state.tap);
                state.exchanges.push(Exchange::TapState(frame));
            }
            BridgeCommand::JtagShift => {
                let frame = ShiftFrame::decode(tx).map_err(malformed)?;
                if !state.tap.is_shift() {
                    return Err(TransportError::Unavailable(format!(
                        "cannot shift in {}",
                        state.tap
                    )));
                }
                let read_bytes = (frame.read_bits as usize).div_ceil(8);
                if !state.truncate {
                    let mut tdo = frame.write_data.to_vec();
                    tdo.resize(read_bytes, 0);
                    reply.extend_from_slice(&tdo);
                }
                if frame.last_transaction {
                    state.tap = if state.tap == TapState::ShfIR {
                        TapState::Ex1IR
                    } else {
                        TapState::Ex1DR
                    };
                }
                state.exchanges.push(Exchange::Shift(frame));
            }
            BridgeCommand::AsdInit => {
                let flow = match strip_iana(tx).map_err(malformed)? {
                    [flow] => *flow,
                    other => {
                        return Err(TransportError::MalformedReply(format!(
                            "AsdInit carries {} bytes",
                            other.len()
                        )));
                    }
                };
                state.flow = Some(flow);
                state.exchanges.push(Exchange::AsdInit(flow));
            }
        }

        let len = reply.len().min(rx.len());
        rx[..len].copy_from_slice(&reply[..len]);
        Ok(len)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn tracks_tap_through_tms_frames() {
        let sim = LoopbackTransport::new();
        let frame = TapStateFrame::from_sequence(TmsSequence::transition(
            TapState::TLR,
            TapState::ShfIR,
        ));
        let mut rx = [0u8; 8];
        let len = sim
            .transfer(BridgeCommand::SetTapState, &frame.encode(), &mut rx)
            .unwrap();
        assert_eq!(&rx[..len], &IANA_ID);
        assert_eq!(sim.tap_state(), TapState::ShfIR);
    }

    #[test]
    fn shift_outside_shift_state_fails() {
        let sim = LoopbackTransport::new();
        let frame = ShiftFrame {
            write_bits: 8,
            write_data: Box::new([0xAA]),
            read_bits: 8,
            last_transaction: false,
        };
        let mut rx = [0u8; 8];
        assert!(
            sim.transfer(BridgeCommand::JtagShift, &frame.encode(), &mut rx)
                .is_err()
        );
    }

    #[test]
    fn failure_injection() {
        let sim = LoopbackTransport::new();
        sim.fail_after(1);
        let mut rx = [0u8; 8];
        let tx = asd_protocol::frame::asd_init_frame(1);
        assert!(sim.transfer(BridgeCommand::AsdInit, &tx, &mut rx).is_ok());
        assert_eq!(sim.flow(), Some(1));
        assert!(sim.transfer(BridgeCommand::AsdInit, &tx, &mut rx).is_err());
    }
}
