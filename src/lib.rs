//! KOS Terminal - interactive terminal client for remote agent shells.
//!
//! Binds a local terminal renderer to the shell of an agent running in a
//! KOS project, over a WebSocket.
//!
//! # Architecture
//!
//! - **TerminalSession** - Controller. Owns one render sink and one transport
//!   session, pumps events between them, tears both down on dispose
//! - **TransportSession** - One logical connection and its state machine,
//!   on top of a pluggable [`transport::Connector`]
//! - **Frame codec** - Maps terminal frames to WebSocket messages
//! - **RenderSink** - The terminal surface (stdout in the CLI, a double in
//!   tests)
//!
//! # Modules
//!
//! - [`session`] - Session controller
//! - [`transport`] - Transport state machine and WebSocket connector
//! - [`frame`] - Frame codec
//! - [`api`] - KOS agent API client
//! - [`config`] - Configuration loading/saving

// Rust guideline compliant 2026-02

// Library modules
pub mod api;
pub mod frame;
pub mod identity;
pub mod reconnect;
pub mod session;
pub mod sink;
pub mod stdio;
pub mod transport;

pub mod config;
pub mod constants;
pub mod error;

// Re-export commonly used types
pub use config::Config;
pub use error::TerminalError;
pub use frame::{Frame, TerminalSize, WireMessage};
pub use identity::{Endpoint, SessionIdentity};
pub use reconnect::ReconnectPolicy;
pub use session::{EndReason, SessionOptions, SessionState, SessionStats, TerminalSession};
pub use sink::{RenderSink, SinkEvent};
pub use transport::{Connector, Link, LinkEvent, LinkEvents, SendOutcome, WsConnector};
