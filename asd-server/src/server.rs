use std::{
    net::{TcpListener, TcpStream, ToSocketAddrs},
    os::fd::AsFd,
    path::PathBuf,
    time::{Duration, Instant},
};

use nix::{
    errno::Errno,
    poll::{PollFd, PollFlags, PollTimeout, poll},
};

use crate::{
    Transport,
    agent::{Agent, Disposition},
    auth::AuthMode,
    error::AsdError,
    events::GpioEvents,
    jtag::{HandlerSettings, JtagHandler, MessageFlow},
    relay::{self, Relay},
    session::{SessionId, Sessions},
};

const MIN_AUTH_READ_TIMEOUT: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
pub struct Config {
    pub fru: u8,
    pub msg_flow: MessageFlow,
    pub force_jtag_hw: bool,
    pub max_sessions: usize,
    /// Time a new connection has to complete authentication.
    pub auth_timeout: Duration,
    pub read_write_timeout: Duration,
    pub auth: AuthMode,
    /// GPIO event socket, bound while a client is authenticated.
    pub event_socket: Option<PathBuf>,
    /// Rendezvous socket of the passthrough relay. Only used with [`MessageFlow::Bic`].
    pub relay_socket: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fru: 1,
            msg_flow: MessageFlow::Bmc,
            force_jtag_hw: false,
            max_sessions: 5,
            auth_timeout: Duration::from_secs(2),
            read_write_timeout: Duration::from_secs(30),
            auth: AuthMode::None,
            event_socket: None,
            relay_socket: None,
        }
    }
}

#[derive(Debug)]
pub struct Server<T: Transport> {
    transport: T,
    config: Config,
}

/// Builder to create a [Server] instance and modify configuration options
///
/// # Example
///
/// ```
/// use asd_server::{auth::AuthMode, server::Builder, sim::LoopbackTransport};
/// use std::time::Duration;
///
/// let server = Builder::new()
///     .fru(2)
///     .auth(AuthMode::Token("secret".to_string()))
///     .rw_timeout(Duration::from_secs(20))
///     .build(LoopbackTransport::new());
/// assert_eq!(server.config().fru, 2);
/// ```
#[derive(Default)]
pub struct Builder {
    config: Config,
}

impl Builder {
    pub fn new() -> Builder {
        Builder::default()
    }

    /// Set the FRU (target slot) the bridge serves.
    pub fn fru(mut self, fru: u8) -> Self {
        self.config.fru = fru;
        self
    }

    pub fn msg_flow(mut self, flow: MessageFlow) -> Self {
        self.config.msg_flow = flow;
        self
    }

    /// Always drive the JTAG engine in hardware mode.
    pub fn force_jtag_hw(mut self, force: bool) -> Self {
        self.config.force_jtag_hw = force;
        self
    }

    pub fn max_sessions(mut self, max: usize) -> Self {
        self.config.max_sessions = max;
        self
    }

    pub fn auth_timeout(mut self, timeout: Duration) -> Self {
        self.config.auth_timeout = timeout;
        self
    }

    /// Set the TCP read and write timeout
    pub fn rw_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_write_timeout = timeout;
        self
    }

    pub fn auth(mut self, auth: AuthMode) -> Self {
        self.config.auth = auth;
        self
    }

    pub fn event_socket(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.event_socket = Some(path.into());
        self
    }

    pub fn relay_socket(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.relay_socket = Some(path.into());
        self
    }

    /// Build and return the server
    pub fn build<T: Transport>(self, transport: T) -> Server<T> {
        Server::new(transport, self.config)
    }
}

impl<T: Transport> Server<T> {
    pub fn new(transport: T, config: Config) -> Server<T> {
        Server { transport, config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl<T> Server<T>
where
    T: Transport + Clone + Send + 'static,
{
    pub fn listen(&self, addr: impl ToSocketAddrs) -> Result<(), AsdError> {
        let listener = TcpListener::bind(addr)?;
        log::info!(
            "Server listening for connections on {}, fru {}",
            listener.local_addr()?,
            self.config.fru
        );
        self.serve(listener)
    }

    /// Runs the event loop on an already bound listener. Returns only when polling fails.
    pub fn serve(&self, listener: TcpListener) -> Result<(), AsdError> {
        let mut event_loop = EventLoop {
            server: self,
            listener,
            sessions: Sessions::new(self.config.max_sessions, self.config.auth_timeout),
            agent: None,
            relay: self
                .config
                .relay_socket
                .as_ref()
                .filter(|_| self.config.msg_flow == MessageFlow::Bic)
                .map(|path| Relay::new(path, self.config.fru)),
        };
        loop {
            event_loop.run_once()?;
        }
    }

    /// Leaves ASD mode and removes the configured sockets on termination signals.
    pub fn install_signal_cleanup(&self) -> Result<(), AsdError> {
        let paths = [&self.config.event_socket, &self.config.relay_socket]
            .into_iter()
            .flatten()
            .cloned()
            .collect();
        relay::install_signal_cleanup(self.transport.clone(), self.config.fru, paths)
    }
}

struct EventLoop<'a, T: Transport> {
    server: &'a Server<T>,
    listener: TcpListener,
    sessions: Sessions,
    agent: Option<Agent<T>>,
    relay: Option<Relay>,
}

/// Readiness reported by one call to poll.
struct Readiness {
    listener: bool,
    events: bool,
    sessions: Vec<SessionId>,
}

impl<T> EventLoop<'_, T>
where
    T: Transport + Clone + Send + 'static,
{
    fn config(&self) -> &Config {
        &self.server.config
    }

    fn run_once(&mut self) -> Result<(), AsdError> {
        let Some(readiness) = self.poll()? else {
            return Ok(());
        };
        let mut ready = readiness.sessions;

        if readiness.listener
            && let Some(id) = self.accept()
            && self.config().auth.is_none()
        {
            ready.push(id);
        }
        if readiness.events {
            self.forward_events();
        }
        self.process_client_messages(&ready);
        Ok(())
    }

    fn poll(&self) -> Result<Option<Readiness>, AsdError> {
        let timeout = poll_timeout(self.sessions.poll_timeout(Instant::now()));
        let session_fds = self.sessions.poll_fds();
        let event_fd = self
            .agent
            .as_ref()
            .and_then(Agent::events)
            .map(GpioEvents::as_fd);

        let mut fds = vec![PollFd::new(self.listener.as_fd(), PollFlags::POLLIN)];
        fds.extend(event_fd.map(|fd| PollFd::new(fd, PollFlags::POLLIN)));
        fds.extend(
            session_fds
                .iter()
                .map(|(_, fd)| PollFd::new(*fd, PollFlags::POLLIN)),
        );

        match poll(&mut fds, timeout) {
            Ok(_) => {}
            Err(Errno::EINTR) => return Ok(None),
            Err(e) => {
                log::error!("Poll failed: {}", e);
                return Err(AsdError::Io(e.into()));
            }
        }

        let readable = |fd: &PollFd| {
            fd.revents().is_some_and(|flags| {
                flags.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR)
            })
        };
        let offset = 1 + event_fd.is_some() as usize;
        let sessions = session_fds
            .iter()
            .zip(&fds[offset..])
            .filter(|&((id, _), fd)| {
                readable(fd) || self.sessions.get(*id).is_some_and(|s| s.data_pending())
            })
            .map(|((id, _), _)| *id)
            .collect();
        Ok(Some(Readiness {
            listener: readable(&fds[0]),
            events: event_fd.is_some() && readable(&fds[1]),
            sessions,
        }))
    }

    fn accept(&mut self) -> Option<SessionId> {
        let (stream, addr) = match self.listener.accept() {
            Ok(accepted) => accepted,
            Err(e) => {
                log::error!("Connection error: {}", e);
                return None;
            }
        };
        log::info!("New client connection from {}", addr);
        if let Err(e) = self.configure_stream(&stream) {
            log::error!("Cannot configure client socket: {}", e);
            return None;
        }
        match self.sessions.open(stream, Instant::now()) {
            Ok(id) => Some(id),
            Err(e) => {
                log::error!("Rejecting client {}: {}", addr, e);
                None
            }
        }
    }

    fn configure_stream(&self, stream: &TcpStream) -> Result<(), AsdError> {
        let timeout = Some(self.config().read_write_timeout);
        stream.set_read_timeout(timeout)?;
        stream.set_write_timeout(timeout)?;
        stream.set_nodelay(true)?;
        Ok(())
    }

    fn forward_events(&mut self) {
        let Some(id) = self.sessions.authenticated() else {
            return;
        };
        let result = self.agent.as_ref().map_or(Ok(Vec::new()), Agent::poll_events);
        let result = result.and_then(|messages| {
            let session = self
                .sessions
                .get_mut(id)
                .ok_or_else(|| AsdError::Session(format!("no session {}", id)))?;
            for message in &messages {
                session.send_message(message)?;
            }
            Ok(())
        });
        if let Err(e) = result {
            log::error!("Failed to forward GPIO events: {}", e);
            self.close_connection(id);
        }
    }

    fn process_client_messages(&mut self, ready: &[SessionId]) {
        for id in self.sessions.close_expired_unauth(Instant::now()) {
            log::info!("Closed session {} after authentication timeout", id);
        }
        for &id in ready {
            if self.sessions.get(id).is_none() {
                continue;
            }
            if !self.sessions.is_authenticated(id) {
                if let Err(e) = self.authenticate(id) {
                    log::error!("Authentication of session {} failed: {}", id, e);
                    self.sessions.close(id);
                    continue;
                }
                if !self.sessions.get(id).is_some_and(|s| s.data_pending()) {
                    continue;
                }
            }
            if let Err(e) = self.process_message(id) {
                log::error!("Session {} failed: {}", id, e);
                self.close_connection(id);
            }
        }
    }

    fn authenticate(&mut self, id: SessionId) -> Result<(), AsdError> {
        let admit = self.sessions.authenticated().is_none_or(|other| other == id);
        let config = &self.server.config;
        let session = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| AsdError::Session(format!("no session {}", id)))?;

        // the handshake may not outlive the authentication deadline
        let remaining = session
            .auth_deadline()
            .saturating_duration_since(Instant::now())
            .max(MIN_AUTH_READ_TIMEOUT);
        session.stream().set_read_timeout(Some(remaining))?;
        config.auth.handshake(&mut *session, admit)?;
        session
            .stream()
            .set_read_timeout(Some(config.read_write_timeout))?;
        let peer = session.peer();

        self.sessions.auth_complete(id)?;
        self.on_client_connect(id)?;
        log::info!("Session {} authenticated, peer {:?}", id, peer);
        Ok(())
    }

    fn on_client_connect(&mut self, id: SessionId) -> Result<(), AsdError> {
        let config = &self.server.config;
        let settings = HandlerSettings {
            fru: config.fru,
            msg_flow: config.msg_flow,
            force_jtag_hw: config.force_jtag_hw,
        };
        let events = config.event_socket.as_ref().map(GpioEvents::bind).transpose()?;
        let handler = JtagHandler::new(self.server.transport.clone(), settings);
        if let Some(relay) = &self.relay {
            relay.start()?;
            if let Some(session) = self.sessions.get(id) {
                relay.client().attach(session.writer());
            }
        }
        self.agent = Some(Agent::new(handler, events));
        Ok(())
    }

    fn process_message(&mut self, id: SessionId) -> Result<(), AsdError> {
        let session = self
            .sessions
            .get_mut(id)
            .ok_or_else(|| AsdError::Session(format!("no session {}", id)))?;
        let message = session.read_message()?;
        log::trace!("Received message: {:02x?}", message);
        let agent = self
            .agent
            .as_mut()
            .ok_or_else(|| AsdError::Session(format!("session {} has no agent", id)))?;
        let (response, disposition) = agent.handle(&message);
        if let Some(response) = response {
            session.send_message(&response)?;
        }
        if disposition == Disposition::Close {
            self.close_connection(id);
        }
        Ok(())
    }

    /// Releases the engine if `id` is the authenticated client and closes the session.
    fn close_connection(&mut self, id: SessionId) {
        if self.sessions.is_authenticated(id) {
            if let Some(mut agent) = self.agent.take() {
                agent.on_disconnect();
            }
            if let Some(relay) = &self.relay {
                relay.client().detach();
            }
            log::info!("Client of session {} disconnected", id);
        }
        self.sessions.close(id);
    }
}

fn poll_timeout(timeout: Option<Duration>) -> PollTimeout {
    match timeout {
        Some(timeout) => PollTimeout::try_from(timeout).unwrap_or(PollTimeout::MAX),
        None => PollTimeout::NONE,
    }
}
