//! Client authentication performed once per connection, before any JTAG access.
use crate::{error::AsdError, session::ClientLink};

const ACCEPTED: u8 = 0;
const REJECTED: u8 = 1;

#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub enum AuthMode {
    /// Every connection is accepted right away.
    #[default]
    None,
    /// The client sends `[len: u8][token]` and receives one status byte,
    /// 0 if accepted and 1 if rejected.
    Token(String),
}

impl AuthMode {
    pub fn is_none(&self) -> bool {
        matches!(self, AuthMode::None)
    }

    /// Reads the client's credentials and answers with the verdict. Unless `admit`
    /// holds the client is rejected even with a valid token.
    pub fn handshake(&self, link: &mut impl ClientLink, admit: bool) -> Result<(), AsdError> {
        let busy = || AsdError::Session("another session is authenticated".to_string());
        let expected = match self {
            AuthMode::None if admit => return Ok(()),
            AuthMode::None => return Err(busy()),
            AuthMode::Token(token) => token.as_bytes(),
        };
        let mut len = [0u8; 1];
        link.receive(&mut len)?;
        let mut token = vec![0u8; len[0] as usize];
        link.receive(&mut token)?;

        if !admit {
            link.send(&[REJECTED])?;
            Err(busy())
        } else if constant_time_eq(&token, expected) {
            link.send(&[ACCEPTED])?;
            Ok(())
        } else {
            link.send(&[REJECTED])?;
            Err(AsdError::Session("authentication rejected".to_string()))
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
