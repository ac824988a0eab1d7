//! Error types for strandline

use std::io;

use thiserror::Error;

/// Main error type for strandline
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Empty address string")]
    EmptyAddress,

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("End point already bound")]
    AlreadyBound,

    #[error("Near end point not bound")]
    NotBound,

    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    #[error("Timeout")]
    Timeout,

    #[error("Address unreachable: {0}")]
    AddressUnreachable(String),

    #[error("Listener closed")]
    ListenerClosed,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Negotiation failed: {0}")]
    NegotiationFailed(String),
}

impl Error {
    /// True when an accept loop should stop rather than retry.
    pub fn is_listener_closed(&self) -> bool {
        matches!(self, Error::ListenerClosed)
    }

    /// Classify an error returned while opening an outbound stream.
    pub(crate) fn from_connect(err: io::Error, target: &str) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut => Error::Timeout,
            io::ErrorKind::HostUnreachable
            | io::ErrorKind::NetworkUnreachable
            | io::ErrorKind::AddrNotAvailable => {
                Error::AddressUnreachable(format!("{}: {}", target, err))
            }
            _ => Error::ConnectFailed(format!("{}: {}", target, err)),
        }
    }
}

/// Result type alias for strandline
pub type Result<T> = std::result::Result<T, Error>;
