//! Client sessions: the accepted connections, their authentication deadlines and
//! the single authenticated session.
use std::{
    io::{self, BufReader, Read, Write},
    net::{Shutdown, SocketAddr, TcpStream},
    os::fd::{AsFd, BorrowedFd},
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

use asd_protocol::{MAX_PAYLOAD_SIZE, Message, error::ReadError};

use crate::error::AsdError;

pub type SessionId = usize;

/// Byte-level access to a connected client.
pub trait ClientLink {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Fills `buffer` completely.
    fn receive(&mut self, buffer: &mut [u8]) -> io::Result<()>;
}

/// Write half of a client connection, shared between the event loop and the relay
/// thread. Each message is written whole while the lock is held.
#[derive(Debug, Clone)]
pub struct ClientWriter {
    stream: Arc<Mutex<TcpStream>>,
}

impl ClientWriter {
    pub fn new(stream: TcpStream) -> ClientWriter {
        ClientWriter {
            stream: Arc::new(Mutex::new(stream)),
        }
    }

    pub fn write_all(&self, bytes: &[u8]) -> io::Result<()> {
        let mut stream = self.stream.lock().unwrap_or_else(PoisonError::into_inner);
        stream.write_all(bytes)
    }
}

#[derive(Debug)]
pub struct Session {
    id: SessionId,
    reader: BufReader<TcpStream>,
    writer: ClientWriter,
    peer: Option<SocketAddr>,
    auth_deadline: Instant,
}

impl Session {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn stream(&self) -> &TcpStream {
        self.reader.get_ref()
    }

    pub fn writer(&self) -> ClientWriter {
        self.writer.clone()
    }

    pub fn auth_deadline(&self) -> Instant {
        self.auth_deadline
    }

    /// Whether bytes were already read from the socket but not consumed.
    pub fn data_pending(&self) -> bool {
        !self.reader.buffer().is_empty()
    }

    pub fn read_message(&mut self) -> Result<Message, ReadError> {
        Message::from_reader(&mut self.reader, MAX_PAYLOAD_SIZE)
    }

    pub fn send_message(&mut self, message: &Message) -> io::Result<()> {
        log::trace!("Sending message: {:02x?}", message);
        self.writer.write_all(&message.to_bytes()?)
    }
}

impl ClientLink for Session {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writer.write_all(bytes)
    }

    fn receive(&mut self, buffer: &mut [u8]) -> io::Result<()> {
        self.reader.read_exact(buffer)
    }
}

#[derive(Debug)]
pub struct Sessions {
    slots: Vec<Option<Session>>,
    auth_timeout: Duration,
    authenticated: Option<SessionId>,
}

impl Sessions {
    pub fn new(max_sessions: usize, auth_timeout: Duration) -> Sessions {
        Sessions {
            slots: (0..max_sessions).map(|_| None).collect(),
            auth_timeout,
            authenticated: None,
        }
    }

    /// Adds a connection that has to authenticate within the configured timeout.
    pub fn open(&mut self, stream: TcpStream, now: Instant) -> Result<SessionId, AsdError> {
        let Some(id) = self.slots.iter().position(Option::is_none) else {
            return Err(AsdError::Session(format!(
                "all {} session slots in use",
                self.slots.len()
            )));
        };
        let peer = stream.peer_addr().ok();
        let writer = ClientWriter::new(stream.try_clone()?);
        self.slots[id] = Some(Session {
            id,
            reader: BufReader::new(stream),
            writer,
            peer,
            auth_deadline: now + self.auth_timeout,
        });
        log::debug!("Opened session {} for {:?}", id, peer);
        Ok(id)
    }

    /// Shuts the connection down and frees the slot.
    pub fn close(&mut self, id: SessionId) {
        if let Some(session) = self.slots.get_mut(id).and_then(Option::take) {
            if let Err(e) = session.stream().shutdown(Shutdown::Both) {
                log::debug!("Shutdown of session {} failed: {}", id, e);
            }
            log::debug!("Closed session {}", id);
        }
        if self.authenticated == Some(id) {
            self.authenticated = None;
        }
    }

    /// Closes unauthenticated sessions whose deadline passed.
    pub fn close_expired_unauth(&mut self, now: Instant) -> Vec<SessionId> {
        let expired: Vec<SessionId> = self
            .sessions()
            .filter(|s| !self.is_authenticated(s.id) && s.auth_deadline <= now)
            .map(Session::id)
            .collect();
        for &id in &expired {
            log::warn!("Session {} did not authenticate in time", id);
            self.close(id);
        }
        expired
    }

    /// Marks `id` as the authenticated session. Fails while another session holds it.
    pub fn auth_complete(&mut self, id: SessionId) -> Result<(), AsdError> {
        match self.authenticated {
            Some(other) if other != id => Err(AsdError::Session(format!(
                "session {} is already authenticated",
                other
            ))),
            _ if self.get(id).is_none() => {
                Err(AsdError::Session(format!("no session {}", id)))
            }
            _ => {
                self.authenticated = Some(id);
                Ok(())
            }
        }
    }

    pub fn authenticated(&self) -> Option<SessionId> {
        self.authenticated
    }

    pub fn is_authenticated(&self, id: SessionId) -> bool {
        self.authenticated == Some(id)
    }

    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.slots.get(id).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        self.slots.get_mut(id).and_then(Option::as_mut)
    }

    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.slots.iter().flatten()
    }

    pub fn len(&self) -> usize {
        self.sessions().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn poll_fds(&self) -> Vec<(SessionId, BorrowedFd<'_>)> {
        self.sessions().map(|s| (s.id, s.stream().as_fd())).collect()
    }

    /// How long the event loop may block. Zero while buffered data waits to be
    /// processed, `None` if no deadline is pending.
    pub fn poll_timeout(&self, now: Instant) -> Option<Duration> {
        if self.sessions().any(Session::data_pending) {
            return Some(Duration::ZERO);
        }
        self.sessions()
            .filter(|s| !self.is_authenticated(s.id))
            .map(|s| s.auth_deadline.saturating_duration_since(now))
            .min()
    }
}
