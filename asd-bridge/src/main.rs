//! # At-Scale-Debug Daemon
//!
//! Serves the ASD client protocol for one target (FRU) and drives its JTAG TAP
//! through the bridge controller that sits between the BMC and the host.
//!
//! ## Overview
//!
//! The daemon wires a [`Transport`] backend into an [`asd_server::server::Server`].
//! The `ipmb` backend talks to the bridge through the platform `ipmbd` socket, the
//! `sim` backend runs against a software TAP for bring-up without hardware.
pub mod backends;

use std::error::Error;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use asd_server::{
    Transport,
    auth::AuthMode,
    jtag::MessageFlow,
    server::{Builder, Server},
    sim::LoopbackTransport,
};
use clap::Parser;
use clap_num::maybe_hex;
use env_logger::Env;

use crate::backends::ipmb::{DEFAULT_BMC_ADDR, DEFAULT_BRIDGE_ADDR, IpmbTransport};

#[derive(Parser, Eq, PartialEq, Clone)]
enum Backend {
    /// Reach the bridge controller through ipmbd
    Ipmb {
        /// I2C bus of the bridge controller
        bus: u8,
        #[arg(long, value_parser = maybe_hex::<u8>, default_value_t = DEFAULT_BRIDGE_ADDR)]
        bridge_addr: u8,
        #[arg(long, value_parser = maybe_hex::<u8>, default_value_t = DEFAULT_BMC_ADDR)]
        bmc_addr: u8,
        #[arg(long, help = "Retries of a failed bridge exchange", default_value = "3")]
        retries: u32,
    },
    /// Simulated TAP that loops TDI back as TDO
    Sim,
}

#[derive(Parser)]
#[command(about = "At-Scale-Debug (ASD) JTAG server", long_about=None)]
struct Args {
    #[arg(short, long, default_value = "5123")]
    port: u16,

    #[arg(short, long, default_value = "0.0.0.0")]
    ip: IpAddr,

    #[arg(short, long, default_value = "1")]
    fru: u8,

    #[arg(short = 'j', long, help = "Message flow: 1 = BMC, 2 = BIC", default_value = "1")]
    flow: u8,

    #[arg(short = 'm', long, help = "Always use hardware JTAG mode")]
    force_jtag_hw: bool,

    #[arg(long, help = "Require clients to authenticate with this token")]
    token: Option<String>,

    #[arg(long, help = "Default log filter, overridden by RUST_LOG", default_value = "info")]
    log_level: String,

    #[arg(long, help = "Directory of the GPIO event and relay sockets", default_value = "/tmp")]
    socket_dir: PathBuf,

    #[clap(subcommand)]
    backend: Backend,
}

fn run<T>(server: Server<T>, addr: SocketAddr) -> Result<(), Box<dyn Error>>
where
    T: Transport + Clone + Send + 'static,
{
    server.install_signal_cleanup()?;
    server.listen(addr)?;
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    env_logger::Builder::from_env(Env::default().default_filter_or(&args.log_level)).init();
    log::info!("Starting ASD server, fru {}", args.fru);
    log::debug!("Parsed arguments: ip={}, port={}", args.ip, args.port);

    let Some(msg_flow) = MessageFlow::from_u8(args.flow) else {
        println!("Unknown message flow {}. Use 1 (BMC) or 2 (BIC).", args.flow);
        return Ok(());
    };

    let mut builder = Builder::new()
        .fru(args.fru)
        .msg_flow(msg_flow)
        .force_jtag_hw(args.force_jtag_hw)
        .event_socket(args.socket_dir.join(format!("asd_gpio_evt_{}", args.fru)))
        .relay_socket(args.socket_dir.join(format!("jtag_msg_socket_{}", args.fru)));
    if let Some(token) = args.token {
        builder = builder.auth(AuthMode::Token(token));
    }

    let addr = SocketAddr::new(args.ip, args.port);
    log::info!("Binding to address: {}", addr);

    match args.backend {
        Backend::Ipmb {
            bus,
            bridge_addr,
            bmc_addr,
            retries,
        } => {
            let transport = IpmbTransport::new(bus)
                .addresses(bridge_addr, bmc_addr)
                .retries(retries);
            log::info!(
                "Using ipmbd at {}, bridge 0x{:02x}",
                transport.socket().display(),
                bridge_addr
            );
            run(builder.build(transport), addr)
        }
        Backend::Sim => {
            log::info!("Using simulated TAP");
            run(builder.build(LoopbackTransport::new()), addr)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_ipmb_backend() {
        let args = Args::parse_from([
            "asd",
            "-f",
            "2",
            "-j",
            "2",
            "--token",
            "secret",
            "ipmb",
            "4",
            "--bridge-addr",
            "0x2c",
        ]);
        assert_eq!(args.fru, 2);
        assert_eq!(args.flow, 2);
        assert_eq!(args.port, 5123);
        assert_eq!(args.token.as_deref(), Some("secret"));
        assert!(
            args.backend
                == Backend::Ipmb {
                    bus: 4,
                    bridge_addr: 0x2c,
                    bmc_addr: DEFAULT_BMC_ADDR,
                    retries: 3,
                }
        );
    }

    #[test]
    fn parses_sim_backend() {
        let args = Args::parse_from(["asd", "-m", "-p", "6000", "sim"]);
        assert!(args.force_jtag_hw);
        assert_eq!(args.port, 6000);
        assert!(args.backend == Backend::Sim);
        assert_eq!(args.socket_dir, PathBuf::from("/tmp"));
    }
}
