//! Error taxonomy for the terminal streaming session.
//!
//! Only [`TerminalError::InvalidIdentity`] is fatal, and only to
//! construction. Everything else is surfaced through session state, a
//! [`SendOutcome`](crate::transport::SendOutcome), or the log.

// Rust guideline compliant 2026-02

use thiserror::Error;

/// Errors produced by the terminal session core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TerminalError {
    /// The (project, agent) pair is not usable as an endpoint address.
    #[error("invalid session identity: {0}")]
    InvalidIdentity(String),

    /// Resize dimensions with a zero component.
    #[error("invalid terminal size {cols}x{rows}: cols and rows must be >= 1")]
    InvalidSize {
        /// Requested columns.
        cols: u16,
        /// Requested rows.
        rows: u16,
    },

    /// The remote endpoint could not be reached.
    #[error("connect failed: {0}")]
    ConnectFailure(String),

    /// A wire message that is neither output nor a known control message.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// A send was attempted while the transport was not open.
    #[error("transport not connected")]
    NotConnected,

    /// The physical connection failed after it was established.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Convenience alias for results in the session core.
pub type Result<T, E = TerminalError> = std::result::Result<T, E>;
