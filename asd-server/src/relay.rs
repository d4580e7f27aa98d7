//! Out-of-band messages from the bridge controller, forwarded to the client.
//!
//! The bridge connects to a Unix socket once per packet. Packets are reassembled
//! into client-protocol messages and written to the authenticated client.
use std::{
    fs,
    io::{self, ErrorKind, Read},
    os::unix::net::UnixListener,
    path::PathBuf,
    sync::{
        Arc, Mutex, MutexGuard, Once, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use asd_protocol::passthrough::Reassembler;

use crate::{
    Transport,
    bridge::Bridge,
    error::AsdError,
    session::{ClientLink, ClientWriter},
};

const PACKET_TIMEOUT: Duration = Duration::from_secs(1);

/// The authenticated client's connection, shared with the relay thread.
#[derive(Debug, Clone, Default)]
pub struct SharedClient {
    writer: Arc<Mutex<Option<ClientWriter>>>,
}

impl SharedClient {
    fn lock(&self) -> MutexGuard<'_, Option<ClientWriter>> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn attach(&self, writer: ClientWriter) {
        *self.lock() = Some(writer);
    }

    pub fn detach(&self) {
        *self.lock() = None;
    }

    pub fn is_attached(&self) -> bool {
        self.lock().is_some()
    }
}

impl ClientLink for SharedClient {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        let writer = self.lock().clone();
        match writer {
            Some(writer) => writer.write_all(bytes),
            None => Err(io::Error::new(ErrorKind::NotConnected, "no client attached")),
        }
    }

    /// Client requests are read by the event loop only.
    fn receive(&mut self, _buffer: &mut [u8]) -> io::Result<()> {
        Err(ErrorKind::Unsupported.into())
    }
}

#[derive(Debug)]
pub struct Relay {
    path: PathBuf,
    fru: u8,
    client: SharedClient,
    started: AtomicBool,
}

impl Relay {
    pub fn new(path: impl Into<PathBuf>, fru: u8) -> Relay {
        Relay {
            path: path.into(),
            fru,
            client: SharedClient::default(),
            started: AtomicBool::new(false),
        }
    }

    pub fn client(&self) -> &SharedClient {
        &self.client
    }

    /// Binds the rendezvous socket and spawns the relay thread.
    ///
    /// The thread runs for the rest of the process; later calls return `Ok(false)`.
    pub fn start(&self) -> Result<bool, AsdError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }
        let listener = match self.bind() {
            Ok(listener) => listener,
            Err(e) => {
                self.started.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        };
        log::info!(
            "Relaying bridge messages from {}, fru {}",
            self.path.display(),
            self.fru
        );
        let client = self.client.clone();
        let fru = self.fru;
        thread::Builder::new()
            .name(format!("asd-relay-{}", fru))
            .spawn(move || run(listener, client, fru))?;
        Ok(true)
    }

    fn bind(&self) -> io::Result<UnixListener> {
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != ErrorKind::NotFound => return Err(e),
            _ => {}
        }
        UnixListener::bind(&self.path)
    }
}

fn run(listener: UnixListener, mut client: SharedClient, fru: u8) {
    let mut reassembler = Reassembler::new();
    for stream in listener.incoming() {
        let mut stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                log::error!("Relay accept failed, fru {}: {}", fru, e);
                thread::sleep(PACKET_TIMEOUT);
                continue;
            }
        };
        let mut packet = Vec::new();
        let received = stream
            .set_read_timeout(Some(PACKET_TIMEOUT))
            .and_then(|_| stream.read_to_end(&mut packet));
        match received {
            Ok(0) => log::error!("Relay received an empty packet, fru {}", fru),
            Ok(_) => {
                relay_packet(&mut reassembler, &packet, &mut client, fru);
            }
            Err(e) => log::error!("Relay receive failed, fru {}: {}", fru, e),
        }
    }
}

/// Feeds one packet into the reassembler and forwards a completed message.
/// Returns whether a message was forwarded. Malformed packets are logged and dropped.
pub fn relay_packet(
    reassembler: &mut Reassembler,
    packet: &[u8],
    link: &mut impl ClientLink,
    fru: u8,
) -> bool {
    log::trace!("Relay packet: {:02x?}", packet);
    match reassembler.push(packet) {
        Ok(Some(message)) => match link.send(&message) {
            Ok(()) => {
                log::debug!("Relayed {} byte message, fru {}", message.len(), fru);
                true
            }
            Err(e) => {
                log::error!("Cannot relay message to client, fru {}: {}", fru, e);
                false
            }
        },
        Ok(None) => false,
        Err(e) => {
            log::error!("Dropping relay packet, fru {}: {}", fru, e);
            false
        }
    }
}

/// On SIGINT, SIGTERM or SIGHUP: takes the bridge out of ASD mode, removes the
/// given socket files and exits.
pub fn install_signal_cleanup<T>(transport: T, fru: u8, paths: Vec<PathBuf>) -> Result<(), AsdError>
where
    T: Transport + Send + 'static,
{
    let once = Once::new();
    let bridge = Bridge::new(transport);
    ctrlc::set_handler(move || {
        once.call_once(|| {
            log::info!("Terminating, fru {}", fru);
            if let Err(e) = bridge.asd_deinit() {
                log::error!("ASD deinit failed, fru {}: {}", fru, e);
            }
            for path in &paths {
                if let Err(e) = fs::remove_file(path) {
                    log::debug!("Could not remove {}: {}", path.display(), e);
                }
            }
            std::process::exit(0);
        })
    })
    .map_err(|e| AsdError::Config(format!("cannot install signal handler: {}", e)))
}
