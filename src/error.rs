//! Error types
//!
//! Errors surfaced by the relay's listeners and lifecycle controller.
//! Malformed datagrams have their own type in [`crate::protocol`] since they
//! are dropped and logged, never propagated.

use std::net::SocketAddr;

use crate::server::Listener;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for relay operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Generic I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A listener could not bind its endpoint
    #[error("failed to bind {listener} listener to {addr}: {source}")]
    Bind {
        listener: Listener,
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// A listener's loop ended with an unrecoverable I/O error
    #[error("{listener} listener failed: {source}")]
    Listener {
        listener: Listener,
        #[source]
        source: std::io::Error,
    },

    /// A listener task panicked
    #[error("{listener} listener panicked")]
    ListenerPanicked { listener: Listener },

    /// A listener task was cancelled before it returned
    #[error("{listener} listener was cancelled")]
    ListenerCancelled { listener: Listener },

    /// A listener did not exit within the shutdown timeout
    #[error("{listener} listener did not stop in time")]
    ShutdownTimeout { listener: Listener },

    /// `start` was called while the relay was not stopped
    #[error("relay is already running")]
    AlreadyRunning,
}
