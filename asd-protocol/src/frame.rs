//! Command frames exchanged with the downstream bridge controller.
//!
//! Every request starts with the 3-byte vendor IANA id, and every reply echoes it
//! before the payload.
//!
//! - **JtagShift**: `<iana><write_bits: u16 le><write data><read_bits: u16 le><last_transaction: u8>`
//! - **SetTapState**: `<iana><tms_length: u8><tms_bits: u8>`
//! - **AsdInit**: `<iana><flow: u8>`, where flow `0xFF` de-initializes the bridge
use crate::{error::ReadError, tms::TmsSequence};

/// Vendor IANA id (0x00A015), least significant byte first.
pub const IANA_ID: [u8; 3] = [0x15, 0xA0, 0x00];

/// The most bits a single shift frame may carry in either direction.
pub const MAX_TRANSFER_BITS: u32 = 0x400;

/// Flow value that tells the bridge to leave ASD mode.
pub const ASD_DEINIT_FLOW: u8 = 0xFF;

/// Commands understood by the bridge controller.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BridgeCommand {
    SetTapState,
    JtagShift,
    AsdInit,
}

/// A data phase of up to [`MAX_TRANSFER_BITS`] bits.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ShiftFrame {
    pub write_bits: u16,
    pub write_data: Box<[u8]>,
    pub read_bits: u16,
    /// Set on the final frame of a scan; the bridge then leaves the shift state for Exit1.
    pub last_transaction: bool,
}

impl ShiftFrame {
    pub fn encode(&self) -> Vec<u8> {
        let write_bytes = (self.write_bits as usize).div_ceil(8);
        let mut out = Vec::with_capacity(IANA_ID.len() + write_bytes + 5);
        out.extend_from_slice(&IANA_ID);
        out.extend_from_slice(&self.write_bits.to_le_bytes());
        out.extend_from_slice(&self.write_data[..write_bytes.min(self.write_data.len())]);
        // zero fill if the caller handed in a short buffer
        out.resize(IANA_ID.len() + 2 + write_bytes, 0);
        out.extend_from_slice(&self.read_bits.to_le_bytes());
        out.push(self.last_transaction as u8);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<ShiftFrame, ReadError> {
        let body = strip_iana(bytes)?;
        if body.len() < 2 {
            return Err(ReadError::InvalidFormat(
                "Shift frame misses write length".to_string(),
            ));
        }
        let write_bits = u16::from_le_bytes([body[0], body[1]]);
        let write_bytes = (write_bits as usize).div_ceil(8);
        let body = &body[2..];
        if body.len() != write_bytes + 3 {
            return Err(ReadError::InvalidFormat(format!(
                "Shift frame of {} write bits has {} trailing bytes",
                write_bits,
                body.len()
            )));
        }
        Ok(ShiftFrame {
            write_bits,
            write_data: body[..write_bytes].into(),
            read_bits: u16::from_le_bytes([body[write_bytes], body[write_bytes + 1]]),
            last_transaction: body[write_bytes + 2] != 0,
        })
    }
}

/// Clocks a TMS sequence, also used to idle for a number of cycles.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TapStateFrame {
    pub tms_length: u8,
    pub tms_bits: u8,
}

impl TapStateFrame {
    /// Largest cycle count a single frame can request.
    pub const MAX_CYCLES: u8 = 255;

    pub fn from_sequence(sequence: TmsSequence) -> TapStateFrame {
        TapStateFrame {
            tms_length: sequence.length,
            tms_bits: sequence.bits,
        }
    }

    /// Idle clocking with TMS held low. The length field is one byte, so requests
    /// above 255 cycles, including exactly 256, are clamped to 255.
    pub fn clock_cycles(cycles: u32) -> TapStateFrame {
        TapStateFrame {
            tms_length: cycles.min(Self::MAX_CYCLES as u32) as u8,
            tms_bits: 0x00,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = IANA_ID.to_vec();
        out.push(self.tms_length);
        out.push(self.tms_bits);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<TapStateFrame, ReadError> {
        match strip_iana(bytes)? {
            [tms_length, tms_bits] => Ok(TapStateFrame {
                tms_length: *tms_length,
                tms_bits: *tms_bits,
            }),
            other => Err(ReadError::InvalidFormat(format!(
                "Tap state frame has {} bytes after the IANA id",
                other.len()
            ))),
        }
    }
}

pub fn asd_init_frame(flow: u8) -> Vec<u8> {
    let mut out = IANA_ID.to_vec();
    out.push(flow);
    out
}

/// Verifies and removes the IANA id that leads every frame and reply.
pub fn strip_iana(bytes: &[u8]) -> Result<&[u8], ReadError> {
    match bytes.split_at_checked(IANA_ID.len()) {
        Some((iana, rest)) if iana == IANA_ID => Ok(rest),
        Some((iana, _)) => Err(ReadError::InvalidFormat(format!(
            "Unexpected IANA id {:02x?}",
            iana
        ))),
        None => Err(ReadError::InvalidFormat(format!(
            "Frame of {} bytes is shorter than the IANA id",
            bytes.len()
        ))),
    }
}
