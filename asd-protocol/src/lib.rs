//! # ASD Protocol Library
//!
//! Building blocks of the At-Scale-Debug (ASD) protocol: the JTAG TAP state machine,
//! the shortest-path TMS table that moves the TAP between any two states, the message
//! framing spoken by debug clients, and the command frames sent to the bridge
//! controller that owns the physical JTAG pins.
//!
//! ## Overview
//!
//! - [`tap::TapState`] and [`tms::TmsSequence`] model the 16-state TAP controller
//! - [`Message`] and [`Request`] carry client requests and responses
//! - [`frame`] encodes `JtagShift`, `SetTapState` and `AsdInit` bridge frames
//! - [`passthrough::Reassembler`] rebuilds messages the bridge sends in packets
//!
//! ## TMS Sequences
//!
//! ```
//! use asd_protocol::{tap::TapState, tms::TmsSequence};
//!
//! let seq = TmsSequence::transition(TapState::TLR, TapState::ShfDR);
//! assert_eq!((seq.length, seq.bits), (4, 0x02));
//! assert_eq!(seq.apply(TapState::TLR), TapState::ShfDR);
//! ```
//!
//! ## Reading Requests
//!
//! ```
//! use asd_protocol::{JtagCommand, Message, Request, tap::TapState};
//! use std::io::Cursor;
//!
//! // Jtag message, tag 0, command SetTapState, one byte payload
//! let bytes = [0x01, 0x20, 0x00, 0x03, 0x04];
//! let message = Message::from_reader(&mut Cursor::new(bytes), 64).expect("Message should parse");
//! let request = Request::from_message(&message).expect("Request should decode");
//! assert_eq!(request, Request::Jtag(JtagCommand::SetTapState(TapState::ShfDR)));
//! ```
//!
//! ## Message Format
//!
//! Every message starts with a packed 4-byte little-endian [`MessageHeader`] followed by
//! up to [`MAX_PAYLOAD_SIZE`] payload bytes. Responses echo type and tag of the request
//! and carry a [`Status`] in place of the command.
//!
//! ## Error Handling
//!
//! Parsing and framing failures are reported as [`error::ReadError`].

pub mod protocol;
pub use protocol::*;
pub mod codec;
pub mod error;
pub mod frame;
pub mod passthrough;
pub mod tap;
pub mod tms;
