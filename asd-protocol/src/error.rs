use std::{
    error::Error,
    fmt::Display,
    io::{self},
};

/// Errors that may occur when reading or decoding a message.
#[derive(Debug)]
pub enum ReadError {
    IoError(io::Error),
    /// A TAP state index outside of `0..16`
    InvalidState(u8),
    InvalidHeader(String),
    InvalidCommand { msg_type: u8, cmd: u8 },
    InvalidFormat(String),
    TooManyBytes { max: usize, got: usize },
    /// A passthrough packet that cannot be placed into the message being reassembled
    UnexpectedPacket(String),
}

impl From<io::Error> for ReadError {
    fn from(value: io::Error) -> Self {
        ReadError::IoError(value)
    }
}

impl Display for ReadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadError::IoError(error) => write!(f, "{}", error),
            ReadError::InvalidState(state) => write!(f, "Invalid TAP state {}", state),
            ReadError::InvalidHeader(reason) => write!(f, "Invalid message header: {}", reason),
            ReadError::InvalidCommand { msg_type, cmd } => {
                write!(
                    f,
                    "Received invalid command 0x{:02x} for message type {}",
                    cmd, msg_type
                )
            }
            ReadError::InvalidFormat(format) => write!(f, "{}", format),
            ReadError::TooManyBytes { max, got } => {
                write!(f, "Message too large! Maximum is {}, but got {}", max, got)
            }
            ReadError::UnexpectedPacket(reason) => write!(f, "Unexpected packet: {}", reason),
        }
    }
}

impl Error for ReadError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ReadError::IoError(error) => Some(error),
            _ => None,
        }
    }
}
