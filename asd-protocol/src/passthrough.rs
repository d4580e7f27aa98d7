//! Reassembly of messages the bridge controller sends out of band.
//!
//! The bridge splits a client-protocol message into packets, each led by a
//! one-byte [`PacketTag`]. The first (or only) packet starts with the 4-byte
//! message header whose size field fixes the total length of the message.
use bytes::{Bytes, BytesMut};

use crate::{codec::payload_size, error::ReadError, protocol::HEADER_SIZE};

/// Upper bound of packets that make up one message.
pub const MAX_PACKETS: usize = 16;

#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PacketTag {
    Only = 0x02,
    First = 0x03,
    Middle = 0x04,
    Last = 0x05,
}

impl PacketTag {
    pub fn from_u8(value: u8) -> Option<PacketTag> {
        match value {
            0x02 => Some(PacketTag::Only),
            0x03 => Some(PacketTag::First),
            0x04 => Some(PacketTag::Middle),
            0x05 => Some(PacketTag::Last),
            _ => None,
        }
    }
}

/// Collects packets until a message is complete.
#[derive(Debug, Default)]
pub struct Reassembler {
    buffer: BytesMut,
    expected: usize,
    packets: usize,
}

impl Reassembler {
    pub fn new() -> Reassembler {
        Reassembler::default()
    }

    /// Whether a first packet has been seen and the message is not complete yet.
    pub fn in_progress(&self) -> bool {
        !self.buffer.is_empty()
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.expected = 0;
        self.packets = 0;
    }

    /// Feeds one tagged packet. Returns the message once it is complete.
    ///
    /// A failed packet leaves a message in progress untouched unless the packet
    /// corrupted it, in which case the partial message is discarded.
    pub fn push(&mut self, packet: &[u8]) -> Result<Option<Bytes>, ReadError> {
        let Some((&tag, data)) = packet.split_first() else {
            return Err(ReadError::UnexpectedPacket("empty packet".to_string()));
        };
        let tag = PacketTag::from_u8(tag)
            .ok_or_else(|| ReadError::UnexpectedPacket(format!("unknown tag 0x{:02x}", tag)))?;
        match tag {
            PacketTag::Only | PacketTag::First => {
                self.reset();
                let expected = match payload_size(data) {
                    Some(size) if data.len() >= HEADER_SIZE => HEADER_SIZE + size,
                    _ => {
                        return Err(ReadError::UnexpectedPacket(format!(
                            "{} bytes cannot hold a message header",
                            data.len()
                        )));
                    }
                };
                self.expected = expected;
                self.append(data)?;
                if tag == PacketTag::Only {
                    return self.finish().map(Some);
                }
                Ok(None)
            }
            PacketTag::Middle | PacketTag::Last => {
                if !self.in_progress() {
                    return Err(ReadError::UnexpectedPacket(format!(
                        "{:?} packet without a first packet",
                        tag
                    )));
                }
                self.append(data)?;
                if tag == PacketTag::Last {
                    return self.finish().map(Some);
                }
                Ok(None)
            }
        }
    }

    fn append(&mut self, data: &[u8]) -> Result<(), ReadError> {
        self.packets += 1;
        if self.packets > MAX_PACKETS {
            self.reset();
            return Err(ReadError::UnexpectedPacket(format!(
                "message spans more than {} packets",
                MAX_PACKETS
            )));
        }
        if self.buffer.len() + data.len() > self.expected {
            let got = self.buffer.len() + data.len();
            let max = self.expected;
            self.reset();
            return Err(ReadError::TooManyBytes { max, got });
        }
        self.buffer.extend_from_slice(data);
        Ok(())
    }

    fn finish(&mut self) -> Result<Bytes, ReadError> {
        let got = self.buffer.len();
        let expected = self.expected;
        let message = self.buffer.split().freeze();
        self.reset();
        if got != expected {
            return Err(ReadError::UnexpectedPacket(format!(
                "message ended after {} of {} bytes",
                got, expected
            )));
        }
        Ok(message)
    }
}

/// Splits a serialized message into tagged packets of at most `chunk` data bytes.
///
/// `chunk` must be at least [`HEADER_SIZE`] so the first packet carries the whole header.
pub fn split_message(message: &[u8], chunk: usize) -> Vec<Vec<u8>> {
    let chunks: Vec<&[u8]> = message.chunks(chunk.max(1)).collect();
    let count = chunks.len();
    chunks
        .into_iter()
        .enumerate()
        .map(|(i, data)| {
            let tag = match (i, count) {
                (_, 1) => PacketTag::Only,
                (0, _) => PacketTag::First,
                (i, n) if i + 1 == n => PacketTag::Last,
                _ => PacketTag::Middle,
            };
            let mut packet = Vec::with_capacity(data.len() + 1);
            packet.push(tag as u8);
            packet.extend_from_slice(data);
            packet
        })
        .collect()
}
