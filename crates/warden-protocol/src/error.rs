//! Error taxonomy shared across the warden crates.

use std::time::Duration;

use thiserror::Error;

/// Every failure mode the core distinguishes between.
///
/// The supervisor keys its state machine off this taxonomy: transport,
/// timeout, auth, and protocol failures tear the connection down and
/// schedule a backoff reconnect; parse and persistence failures are
/// contained to the component that raised them.
#[derive(Debug, Error)]
pub enum WardenError {
    /// Connection refused, reset, or any other socket failure.
    #[error("transport failure: {0}")]
    Transport(#[from] std::io::Error),

    /// A request (or the initial dial) exceeded its deadline.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The server rejected the RCON credential.
    #[error("authentication rejected by server")]
    Auth,

    /// Malformed packet, fragmentation mismatch, or unexpected request id.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// A roster response in a format the game parser does not recognize.
    #[error("unparseable roster response: {0}")]
    Parse(String),

    /// The playtime store could not be read or written.
    #[error("persistence failure: {0}")]
    Persistence(String),

    /// An `execute` was attempted while the profile is not authenticated.
    #[error("not connected")]
    NotConnected,
}

impl WardenError {
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol(reason.into())
    }

    pub fn parse(reason: impl Into<String>) -> Self {
        Self::Parse(reason.into())
    }

    pub fn persistence(reason: impl Into<String>) -> Self {
        Self::Persistence(reason.into())
    }

    /// Whether this failure invalidates the underlying connection.
    ///
    /// Fatal failures move the supervisor toward `Disconnected` and schedule
    /// a reconnect; non-fatal ones leave the connection in place.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Timeout(_) | Self::Auth | Self::Protocol(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, WardenError>;
