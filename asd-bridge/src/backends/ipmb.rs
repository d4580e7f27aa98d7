//! # IPMB Backend
//!
//! Reaches the bridge controller through the platform's `ipmbd` daemon, which
//! owns the I2C bus and exchanges IPMB messages over a Unix socket per bus.
//!
//! ## Example Usage
//!
//! ```ignore
//! use asd_bridge::backends::ipmb::IpmbTransport;
//! use asd_server::server::Builder;
//!
//! let transport = IpmbTransport::new(3);
//! let server = Builder::new().fru(1).build(transport);
//! server.listen("0.0.0.0:5123")?;
//! ```
use std::{
    io::{Read, Write},
    os::unix::net::UnixStream,
    path::{Path, PathBuf},
    time::Duration,
};

use asd_protocol::frame::BridgeCommand;
use asd_server::{Transport, error::TransportError};

/// OEM network function of the bridge controller.
pub const NETFN_OEM_1S_REQ: u8 = 0x38;
pub const CMD_SET_TAP_STATE: u8 = 0x21;
pub const CMD_JTAG_SHIFT: u8 = 0x22;
pub const CMD_ASD_INIT: u8 = 0x28;

pub const DEFAULT_BRIDGE_ADDR: u8 = 0x20;
pub const DEFAULT_BMC_ADDR: u8 = 0x10;

const LUN_OFFSET: u8 = 2;
const IPMB_HDR_SIZE: usize = 3;
const IPMI_RESP_HDR_SIZE: usize = 4;
const MAX_IPMB_RES_LEN: usize = 300;
const SOCKET_TIMEOUT: Duration = Duration::from_secs(2);

/// Sends bridge commands as IPMB requests through `ipmbd`.
#[derive(Debug, Clone)]
pub struct IpmbTransport {
    socket: PathBuf,
    bridge_addr: u8,
    bmc_addr: u8,
    retries: u32,
}

impl IpmbTransport {
    /// A transport for the `ipmbd` instance serving I2C bus `bus`.
    pub fn new(bus: u8) -> IpmbTransport {
        IpmbTransport::with_socket(format!("/tmp/ipmb_socket_{}", bus))
    }

    pub fn with_socket(socket: impl Into<PathBuf>) -> IpmbTransport {
        IpmbTransport {
            socket: socket.into(),
            bridge_addr: DEFAULT_BRIDGE_ADDR,
            bmc_addr: DEFAULT_BMC_ADDR,
            retries: 3,
        }
    }

    /// 7-bit slave addresses of the bridge controller and of the BMC.
    pub fn addresses(mut self, bridge_addr: u8, bmc_addr: u8) -> Self {
        self.bridge_addr = bridge_addr;
        self.bmc_addr = bmc_addr;
        self
    }

    /// Additional attempts after a failed exchange.
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    /// Wraps `data` into an IPMB request for the bridge controller.
    pub fn encode_request(&self, cmd: u8, data: &[u8]) -> Vec<u8> {
        let res_addr = self.bridge_addr << 1;
        let netfn_lun = NETFN_OEM_1S_REQ << LUN_OFFSET;
        let mut request = Vec::with_capacity(IPMB_HDR_SIZE + 4 + data.len());
        request.extend_from_slice(&[res_addr, netfn_lun, checksum(&[res_addr, netfn_lun])]);
        request.extend_from_slice(&[self.bmc_addr << 1, 0x00, cmd]);
        request.extend_from_slice(data);
        request.push(checksum(&request[IPMB_HDR_SIZE..]));
        request
    }

    fn exchange(&self, request: &[u8]) -> Result<Vec<u8>, TransportError> {
        let mut stream = UnixStream::connect(&self.socket)?;
        stream.set_read_timeout(Some(SOCKET_TIMEOUT))?;
        stream.set_write_timeout(Some(SOCKET_TIMEOUT))?;
        stream.write_all(request)?;
        let mut reply = vec![0u8; MAX_IPMB_RES_LEN];
        let len = stream.read(&mut reply)?;
        reply.truncate(len);
        log::trace!("IPMB reply: {:02x?}", reply);
        Ok(reply)
    }
}

fn command_code(command: BridgeCommand) -> u8 {
    match command {
        BridgeCommand::SetTapState => CMD_SET_TAP_STATE,
        BridgeCommand::JtagShift => CMD_JTAG_SHIFT,
        BridgeCommand::AsdInit => CMD_ASD_INIT,
    }
}

/// Two's complement checksum: the bytes and the checksum sum to zero.
fn checksum(bytes: &[u8]) -> u8 {
    0u8.wrapping_sub(bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b)))
}

/// The response data after the completion code.
fn response_data(reply: &[u8]) -> Result<&[u8], TransportError> {
    if reply.len() < IPMB_HDR_SIZE + IPMI_RESP_HDR_SIZE {
        return Err(TransportError::MalformedReply(format!(
            "IPMB reply of {} bytes",
            reply.len()
        )));
    }
    let cc = reply[IPMB_HDR_SIZE + IPMI_RESP_HDR_SIZE - 1];
    if cc != 0 {
        return Err(TransportError::CompletionCode(cc));
    }
    Ok(&reply[IPMB_HDR_SIZE + IPMI_RESP_HDR_SIZE..])
}

impl Transport for IpmbTransport {
    fn transfer(
        &self,
        command: BridgeCommand,
        tx: &[u8],
        rx: &mut [u8],
    ) -> Result<usize, TransportError> {
        let request = self.encode_request(command_code(command), tx);
        log::trace!("IPMB {:?} request: {:02x?}", command, request);

        let mut attempt = 0;
        let reply = loop {
            match self.exchange(&request) {
                Ok(reply) => match response_data(&reply) {
                    Ok(data) => break data.to_vec(),
                    Err(e) if attempt < self.retries => {
                        log::warn!("{:?} attempt {} failed: {}", command, attempt + 1, e)
                    }
                    Err(e) => return Err(e),
                },
                Err(e) if attempt < self.retries => {
                    log::warn!("{:?} attempt {} failed: {}", command, attempt + 1, e)
                }
                Err(e) => return Err(e),
            }
            attempt += 1;
        };

        if reply.len() > rx.len() {
            log::warn!(
                "{:?} reply truncated: expected {}, actual {}",
                command,
                rx.len(),
                reply.len()
            );
        }
        let len = reply.len().min(rx.len());
        rx[..len].copy_from_slice(&reply[..len]);
        Ok(len)
    }
}
