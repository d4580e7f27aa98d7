//! Target pin events delivered by platform GPIO monitors over a Unix socket.
//!
//! Every connection to the socket carries one event as `[event_id, value]`.
use std::{
    fs,
    io::{self, ErrorKind, Read, Write},
    os::{
        fd::{AsFd, BorrowedFd},
        unix::net::{UnixListener, UnixStream},
    },
    path::{Path, PathBuf},
    time::Duration,
};

use asd_protocol::TargetEvent;

const READ_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub struct GpioEvents {
    listener: UnixListener,
    path: PathBuf,
}

impl GpioEvents {
    /// Binds the event socket, replacing a stale socket file.
    pub fn bind(path: impl AsRef<Path>) -> io::Result<GpioEvents> {
        let path = path.as_ref().to_path_buf();
        match fs::remove_file(&path) {
            Ok(()) => log::debug!("Removed stale event socket {}", path.display()),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        let listener = UnixListener::bind(&path)?;
        listener.set_nonblocking(true)?;
        log::info!("Listening for GPIO events on {}", path.display());
        Ok(GpioEvents { listener, path })
    }

    /// Reads all events currently queued on the socket.
    pub fn drain(&self) -> io::Result<Vec<(TargetEvent, u8)>> {
        let mut events = Vec::new();
        loop {
            let mut stream = match self.listener.accept() {
                Ok((stream, _)) => stream,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            };
            stream.set_nonblocking(false)?;
            stream.set_read_timeout(Some(READ_TIMEOUT))?;
            let mut event = [0u8; 2];
            stream.read_exact(&mut event)?;
            match TargetEvent::from_u8(event[0]) {
                Some(kind) => {
                    log::debug!("GPIO event {:?} = {}", kind, event[1]);
                    events.push((kind, event[1]));
                }
                None => log::warn!("Ignoring unknown GPIO event {}", event[0]),
            }
        }
        Ok(events)
    }
}

impl AsFd for GpioEvents {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.listener.as_fd()
    }
}

impl Drop for GpioEvents {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            log::debug!("Could not remove {}: {}", self.path.display(), e);
        }
    }
}

/// Delivers one event to the socket at `path`.
pub fn notify(path: impl AsRef<Path>, event: TargetEvent, value: u8) -> io::Result<()> {
    let mut stream = UnixStream::connect(path)?;
    stream.write_all(&[event as u8, value])
}
