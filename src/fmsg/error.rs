// Error taxonomy for the message host

use crate::fmsg::hash::MessageHash;
use thiserror::Error;

/// Errors raised by the protocol engine
#[derive(Debug, Error)]
pub enum FmsgError {
    /// Malformed or unsyntactic address
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Header failed validation before encoding or sending
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Wire-format violation while reading
    #[error("decode error: {0}")]
    Decode(String),

    /// Semantic protocol violation (unknown challenge, spoofed sender, ...)
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Body received does not match the hash obtained by challenge
    #[error("protocol error: message hash mismatch, expected {expected}, got {actual}")]
    HashMismatch {
        expected: MessageHash,
        actual: MessageHash,
    },

    #[error("timed out while {0}")]
    Timeout(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FmsgError {
    /// True for semantic violations that abort an inbound connection without a response
    pub fn is_protocol(&self) -> bool {
        matches!(self, FmsgError::Protocol(_) | FmsgError::HashMismatch { .. })
    }

    pub(crate) fn decode(msg: impl Into<String>) -> Self {
        FmsgError::Decode(msg.into())
    }

    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        FmsgError::Protocol(msg.into())
    }

    pub(crate) fn invalid_message(msg: impl Into<String>) -> Self {
        FmsgError::InvalidMessage(msg.into())
    }
}

pub type Result<T, E = FmsgError> = std::result::Result<T, E>;
