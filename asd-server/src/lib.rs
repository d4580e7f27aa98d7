//! # ASD Server Library
//!
//! This crate implements an At-Scale-Debug (ASD) server: it accepts a debug client over
//! TCP, authenticates it and translates its requests into operations on a JTAG engine
//! that drives the target's TAP through a bridge controller.
//!
//! ## Architecture
//!
//! - **[`Transport`] Trait**: the single request/response primitive a platform binding
//!   provides to reach the bridge controller
//! - **[`bridge::Bridge`]**: encodes shift, TAP state and ASD init frames on top of a [`Transport`]
//! - **[`jtag::JtagHandler`]**: the JTAG engine with per-chain TAP state, padding and
//!   scan segmentation
//! - **[`server::Server`]**: the single-threaded poll loop multiplexing the listening socket,
//!   client sessions and GPIO event sockets
//! - **[`relay::Relay`]**: an optional thread forwarding out-of-band messages from the bridge
//!
//! ## How It Works
//!
//! 1. A platform binding implements the [`Transport`] trait
//! 2. The transport is wrapped in a [`server::Server`] instance
//! 3. The server listens for TCP connections; one client at a time may be authenticated
//! 4. On authentication the client gets a fresh JTAG engine, released again on disconnect
//! 5. Each request is answered with a status and, where applicable, TDO data or the TAP state
//!
//! ## Basic Usage
//!
//! ```no_run
//! use asd_server::{server::Builder, sim::LoopbackTransport};
//! use std::time::Duration;
//!
//! let server = Builder::new()
//!     .fru(1)
//!     .auth_timeout(Duration::from_secs(5))
//!     .build(LoopbackTransport::new());
//! server.listen("127.0.0.1:5123")?;
//! # Ok::<(), asd_server::error::AsdError>(())
//! ```
//!
//! ## Logging
//!
//! This crate uses the `log` crate for diagnostics. Client connections, TAP transitions
//! and failed requests are logged at info and error level, multi-frame transfers at debug
//! and raw frames at trace level.
//!
//! ## Thread Model
//!
//! Sessions and the JTAG engine live on the thread running [`server::Server::listen`].
//! Bridge calls block that thread. The passthrough relay runs on its own thread and only
//! shares the client socket with the main loop.
pub mod agent;
pub mod auth;
pub mod bridge;
pub mod error;
pub mod events;
pub mod jtag;
pub mod relay;
pub mod server;
pub mod session;
pub mod sim;

use asd_protocol::frame::BridgeCommand;

use crate::error::TransportError;

/// Request/response channel to the bridge controller.
///
/// See the `asd-bridge` crate for the IPMB binding.
pub trait Transport {
    /// Send one command frame and receive the reply.
    ///
    /// # Arguments
    ///
    /// * `command` - The bridge command the frame belongs to
    /// * `tx` - The encoded frame, starting with the IANA id
    /// * `rx` - Buffer for the reply, large enough for the expected reply
    ///
    /// # Returns
    ///
    /// The number of reply bytes written to `rx`, including the echoed IANA id.
    fn transfer(
        &self,
        command: BridgeCommand,
        tx: &[u8],
        rx: &mut [u8],
    ) -> Result<usize, TransportError>;
}
