//! Helpers for running a daemon on a loopback port against the simulated TAP.
use std::{
    io,
    net::{SocketAddr, TcpListener},
    path::PathBuf,
    thread,
    time::{Duration, Instant},
};

use asd_server::{server::Builder, sim::LoopbackTransport};

/// Starts the event loop on an ephemeral port. The server thread runs until the
/// test process exits.
pub fn spawn_server(builder: Builder) -> io::Result<(SocketAddr, LoopbackTransport)> {
    let transport = LoopbackTransport::new();
    let server = builder.build(transport.clone());
    let listener = TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    thread::spawn(move || {
        if let Err(e) = server.serve(listener) {
            log::error!("Test server stopped: {}", e);
        }
    });
    Ok((addr, transport))
}

/// A socket path unique to this process and `name`.
pub fn socket_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("{}_{}", name, std::process::id()))
}

/// Polls `condition` until it holds or `timeout` passes.
pub fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}
