use std::io;

use thiserror::Error;

use crate::executor::QueryError;

/// Malformed framing or command payload.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("packets out of order: expected sequence {expected}, got {actual}")]
    SequenceMismatch { expected: u8, actual: u8 },

    #[error("connection closed mid-packet: expected {expected} bytes, read {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("malformed packet: {0}")]
    Malformed(String),

    #[error("empty command packet")]
    EmptyCommand,

    #[error("command not supported: 0x{0:02x}")]
    UnsupportedCommand(u8),

    #[error("client does not support authentication protocol requested by server")]
    UnsupportedClient,
}

impl ProtocolError {
    pub fn code(&self) -> u16 {
        match self {
            ProtocolError::SequenceMismatch { .. } => 1156,
            ProtocolError::Truncated { .. } => 1158,
            ProtocolError::Malformed(_) => 1835,
            ProtocolError::EmptyCommand | ProtocolError::UnsupportedCommand(_) => 1047,
            ProtocolError::UnsupportedClient => 1251,
        }
    }

    pub fn sql_state(&self) -> &'static str {
        match self {
            ProtocolError::Malformed(_) => "HY000",
            ProtocolError::UnsupportedClient => "08004",
            _ => "08S01",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    UnknownUser,
    BadCredentials,
}

/// Rejected login. Always terminates the session.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Access denied for user '{username}'")]
pub struct AuthError {
    pub username: String,
    pub reason: AuthFailure,
}

impl AuthError {
    pub fn new(username: impl Into<String>, reason: AuthFailure) -> Self {
        Self {
            username: username.into(),
            reason,
        }
    }

    pub fn code(&self) -> u16 {
        1045
    }

    pub fn sql_state(&self) -> &'static str {
        "28000"
    }
}

/// Admission refused before any handshake took place.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CapacityError {
    #[error("Too many connections")]
    TooManyConnections { limit: usize },

    #[error("Server shutdown in progress")]
    ShuttingDown,

    #[error("connection ids exhausted")]
    IdsExhausted,
}

impl CapacityError {
    pub fn code(&self) -> u16 {
        match self {
            CapacityError::TooManyConnections { .. } | CapacityError::IdsExhausted => 1040,
            CapacityError::ShuttingDown => 1053,
        }
    }

    pub fn sql_state(&self) -> &'static str {
        match self {
            CapacityError::ShuttingDown => "08S01",
            _ => "08004",
        }
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport io error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Anything that ends a session abnormally.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    /// The database named in the handshake response was refused.
    #[error(transparent)]
    Database(#[from] QueryError),
}

impl From<io::Error> for SessionError {
    fn from(value: io::Error) -> Self {
        SessionError::Transport(TransportError::Io(value))
    }
}

impl From<ProtocolError> for SessionError {
    fn from(value: ProtocolError) -> Self {
        SessionError::Transport(TransportError::Protocol(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_command_message() {
        let err = ProtocolError::UnsupportedCommand(0xfe);
        assert_eq!(err.to_string(), "command not supported: 0xfe");
        assert_eq!(err.code(), 1047);
    }

    #[test]
    fn capacity_codes() {
        assert_eq!(CapacityError::TooManyConnections { limit: 2 }.code(), 1040);
        assert_eq!(CapacityError::ShuttingDown.code(), 1053);
    }
}
