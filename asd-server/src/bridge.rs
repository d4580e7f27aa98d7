//! Encodes JTAG operations as bridge frames and interprets the replies.
use asd_protocol::{
    error::ReadError,
    frame::{
        ASD_DEINIT_FLOW, BridgeCommand, IANA_ID, MAX_TRANSFER_BITS, ShiftFrame, TapStateFrame,
        asd_init_frame, strip_iana,
    },
    tms::TmsSequence,
};

use crate::{Transport, error::AsdError};

const MAX_REPLY_SIZE: usize = IANA_ID.len() + (MAX_TRANSFER_BITS as usize).div_ceil(8);

/// The bridge controller as seen by the JTAG engine.
#[derive(Debug, Clone)]
pub struct Bridge<T> {
    transport: T,
}

impl<T: Transport> Bridge<T> {
    pub fn new(transport: T) -> Bridge<T> {
        Bridge { transport }
    }

    /// Shifts up to [`MAX_TRANSFER_BITS`] bits. `write` must hold ⌈write_bits / 8⌉ bytes
    /// and `read` receives ⌈read_bits / 8⌉ bytes of TDO.
    pub fn shift_wrapper(
        &self,
        write_bits: u16,
        write: &[u8],
        read_bits: u16,
        read: &mut [u8],
        last_transaction: bool,
    ) -> Result<(), AsdError> {
        let write_bytes = (write_bits as usize).div_ceil(8);
        let read_bytes = (read_bits as usize).div_ceil(8);
        if write_bits as u32 > MAX_TRANSFER_BITS || read_bits as u32 > MAX_TRANSFER_BITS {
            return Err(AsdError::InvalidLength(format!(
                "frame of {}/{} bits exceeds {} bits",
                write_bits, read_bits, MAX_TRANSFER_BITS
            )));
        }
        if write.len() < write_bytes || read.len() < read_bytes {
            return Err(AsdError::InvalidLength(format!(
                "buffers of {}/{} bytes cannot hold {}/{} bits",
                write.len(),
                read.len(),
                write_bits,
                read_bits
            )));
        }
        let frame = ShiftFrame {
            write_bits,
            write_data: write[..write_bytes].into(),
            read_bits,
            last_transaction,
        };
        let tx = frame.encode();
        log::trace!("JtagShift frame: {:02x?}", &tx[..]);

        let mut rx = [0u8; MAX_REPLY_SIZE];
        let len = self
            .transport
            .transfer(BridgeCommand::JtagShift, &tx, &mut rx)?;
        let data = strip_iana(&rx[..len.min(rx.len())])?;
        log::trace!("JtagShift reply: {:02x?}", data);
        if data.len() < read_bytes {
            return Err(AsdError::Protocol(ReadError::InvalidFormat(format!(
                "Shift reply carries {} bytes, expected {}",
                data.len(),
                read_bytes
            ))));
        }
        read[..read_bytes].copy_from_slice(&data[..read_bytes]);
        Ok(())
    }

    pub fn set_tap_state_wrapper(&self, sequence: TmsSequence) -> Result<(), AsdError> {
        self.send_tap_state_frame(TapStateFrame::from_sequence(sequence))
    }

    /// Idles the TAP for `cycles` clocks with TMS low, clamped to 255 cycles.
    pub fn clock_cycle(&self, cycles: u32) -> Result<(), AsdError> {
        if cycles > TapStateFrame::MAX_CYCLES as u32 {
            log::warn!(
                "Requested {} idle cycles, clocking {}",
                cycles,
                TapStateFrame::MAX_CYCLES
            );
        }
        self.send_tap_state_frame(TapStateFrame::clock_cycles(cycles))
    }

    /// Puts the bridge into ASD mode for the given message flow.
    pub fn asd_init(&self, flow: u8) -> Result<(), AsdError> {
        let tx = asd_init_frame(flow);
        let mut rx = [0u8; IANA_ID.len() + 1];
        let len = self.transport.transfer(BridgeCommand::AsdInit, &tx, &mut rx)?;
        strip_iana(&rx[..len.min(rx.len())])?;
        Ok(())
    }

    pub fn asd_deinit(&self) -> Result<(), AsdError> {
        self.asd_init(ASD_DEINIT_FLOW)
    }

    fn send_tap_state_frame(&self, frame: TapStateFrame) -> Result<(), AsdError> {
        let tx = frame.encode();
        log::trace!("SetTapState frame: {:02x?}", &tx[..]);
        let mut rx = [0u8; IANA_ID.len() + 2];
        let len = self
            .transport
            .transfer(BridgeCommand::SetTapState, &tx, &mut rx)?;
        strip_iana(&rx[..len.min(rx.len())])?;
        Ok(())
    }
}
