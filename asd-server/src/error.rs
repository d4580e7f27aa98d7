use std::io;

use asd_protocol::{Status, error::ReadError};

/// Failures of the byte channel to the bridge controller.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("bridge I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("bridge returned completion code 0x{0:02x}")]
    CompletionCode(u8),
    #[error("malformed bridge reply: {0}")]
    MalformedReply(String),
    #[error("bridge unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum AsdError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ReadError),
    #[error("invalid TAP state: {0}")]
    State(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("session error: {0}")]
    Session(String),
    #[error("invalid bit length: {0}")]
    InvalidLength(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl AsdError {
    /// Status reported to the client for a failed request.
    pub fn status(&self) -> Status {
        match self {
            AsdError::State(_) => Status::StateError,
            AsdError::Config(_) => Status::ConfigError,
            AsdError::Transport(_) => Status::TransportError,
            AsdError::Protocol(_)
            | AsdError::Session(_)
            | AsdError::InvalidLength(_)
            | AsdError::Io(_) => Status::ProtocolError,
        }
    }
}

#[test]
fn status_follows_error_class() {
    assert_eq!(
        AsdError::State("ShfDR".to_string()).status(),
        Status::StateError
    );
    assert_eq!(
        AsdError::from(TransportError::CompletionCode(0xC0)).status(),
        Status::TransportError
    );
    assert_eq!(
        AsdError::from(ReadError::InvalidState(17)).status(),
        Status::ProtocolError
    );
}
