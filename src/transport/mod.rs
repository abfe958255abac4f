//! Transport session: one logical connection and its state machine.
//!
//! ```text
//!              Opened                 Closed / Failed
//! Connecting ─────────► Open ─────────────────────────► Closed
//!      │                                                  ▲
//!      └──────────────── Failed / close() ────────────────┘
//! ```
//!
//! The physical connection sits behind the [`Connector`]/[`Link`] seam so
//! tests can substitute a double for the WebSocket. Link events travel over
//! one channel shared by every attempt; each event is tagged with the
//! attempt that produced it so a superseded link can never drive the
//! current one.
//!
//! Sends are valid only while `Open`. Anything else returns
//! [`SendOutcome::NotConnected`] instead of failing: a user typing before
//! the connection completes is an expected race, not an error. Nothing is
//! buffered across `Connecting → Open`.

// Rust guideline compliant 2026-02

pub mod websocket;

use std::fmt;

use tokio::sync::mpsc;

use crate::error::TerminalError;
use crate::frame::{self, Frame, WireMessage};
use crate::identity::Endpoint;

pub use websocket::WsConnector;

/// Connection state of a [`TransportSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// Physical connect in flight.
    Connecting,
    /// Bidirectional traffic flows.
    Open,
    /// Terminal. The link has been released.
    Closed,
}

/// Why a transport reached `Closed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The remote side closed the connection.
    Remote {
        /// WebSocket close code (1005 when none was given, 1006 on abrupt EOF).
        code: u16,
        /// Close reason text.
        reason: String,
    },
    /// The connection never opened.
    ConnectFailed(String),
    /// The established connection failed.
    Error(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Remote { code, reason } if reason.is_empty() => {
                write!(f, "closed by remote ({code})")
            }
            Self::Remote { code, reason } => write!(f, "closed by remote ({code}: {reason})"),
            Self::ConnectFailed(msg) => write!(f, "connect failed: {msg}"),
            Self::Error(msg) => write!(f, "connection lost: {msg}"),
        }
    }
}

/// Raw event produced by a [`Link`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Handshake completed.
    Opened,
    /// A message arrived from the remote side.
    Message(WireMessage),
    /// The connection closed (remote close frame or EOF).
    Closed {
        /// WebSocket close code.
        code: u16,
        /// Close reason text.
        reason: String,
    },
    /// Connect or I/O failure.
    Failed(String),
}

/// Link events tagged with the attempt that produced them.
pub type TaggedLinkEvent = (u64, LinkEvent);

/// Event emitter handed to a [`Connector`] for one connection attempt.
#[derive(Debug, Clone)]
pub struct LinkEvents {
    attempt: u64,
    tx: mpsc::UnboundedSender<TaggedLinkEvent>,
}

impl LinkEvents {
    /// Create an emitter for `attempt`.
    pub fn new(attempt: u64, tx: mpsc::UnboundedSender<TaggedLinkEvent>) -> Self {
        Self { attempt, tx }
    }

    /// Attempt number this emitter is bound to.
    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    /// Emit an event. Returns `false` once the session has gone away.
    pub fn emit(&self, event: LinkEvent) -> bool {
        self.tx.send((self.attempt, event)).is_ok()
    }
}

/// One physical connection. Created fresh for every attempt, never reused.
pub trait Link: Send + fmt::Debug {
    /// Enqueue a message on the single outbound stream. Must not block.
    fn send(&mut self, message: WireMessage) -> Result<(), TerminalError>;

    /// Close the connection if open, abort it if still connecting.
    /// Idempotent.
    fn close(&mut self);
}

/// Factory for physical connections.
pub trait Connector: Send + Sync + fmt::Debug {
    /// Start connecting to `endpoint`. Completion and all later traffic are
    /// reported through `events`; this call itself must not block.
    fn connect(&self, endpoint: &Endpoint, events: LinkEvents) -> Box<dyn Link>;
}

/// Non-throwing result of a send.
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Enqueued on the outbound stream.
    Sent,
    /// The transport is not `Open`; nothing was sent or buffered.
    NotConnected,
    /// Rejected before transmission (e.g. a zero resize dimension).
    Invalid(TerminalError),
}

/// Decoded transport-level event for the session controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Entered `Open`.
    Open,
    /// A decoded frame from the remote side.
    Frame(Frame),
    /// A message that failed to decode and was discarded.
    Discarded(TerminalError),
    /// Error notification, fired at most once.
    Error(TerminalError),
    /// Entered `Closed`, fired at most once.
    Close(CloseReason),
}

/// Owns exactly one logical connection.
#[derive(Debug)]
pub struct TransportSession {
    attempt: u64,
    state: TransportState,
    link: Option<Box<dyn Link>>,
}

impl TransportSession {
    /// Begin connecting to `endpoint` as attempt number `attempt`.
    pub fn connect(
        connector: &dyn Connector,
        endpoint: &Endpoint,
        attempt: u64,
        events_tx: mpsc::UnboundedSender<TaggedLinkEvent>,
    ) -> Self {
        log::info!("[Transport] Connecting to {} (attempt {})", endpoint, attempt);
        let link = connector.connect(endpoint, LinkEvents::new(attempt, events_tx));
        Self {
            attempt,
            state: TransportState::Connecting,
            link: Some(link),
        }
    }

    /// Attempt number of this connection.
    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    /// Current state.
    pub fn state(&self) -> TransportState {
        self.state
    }

    /// Send keystroke bytes.
    pub fn send(&mut self, data: &[u8]) -> SendOutcome {
        self.send_message(frame::encode_input(data))
    }

    /// Send a resize control message.
    pub fn send_resize(&mut self, cols: u16, rows: u16) -> SendOutcome {
        if self.state != TransportState::Open {
            return SendOutcome::NotConnected;
        }
        match frame::encode_resize(cols, rows) {
            Ok(message) => self.send_message(message),
            Err(e) => SendOutcome::Invalid(e),
        }
    }

    fn send_message(&mut self, message: WireMessage) -> SendOutcome {
        if self.state != TransportState::Open {
            return SendOutcome::NotConnected;
        }
        let Some(link) = self.link.as_mut() else {
            return SendOutcome::NotConnected;
        };
        match link.send(message) {
            Ok(()) => SendOutcome::Sent,
            Err(e) => {
                log::debug!("[Transport] Link refused send: {e}");
                SendOutcome::NotConnected
            }
        }
    }

    /// Apply a link event to the state machine.
    ///
    /// Events arriving in `Closed` are absorbed and produce nothing.
    pub fn handle(&mut self, event: LinkEvent) -> Vec<TransportEvent> {
        match (self.state, event) {
            (TransportState::Closed, event) => {
                log::trace!("[Transport] Ignoring {event:?} after close");
                Vec::new()
            }
            (TransportState::Connecting, LinkEvent::Opened) => {
                self.state = TransportState::Open;
                vec![TransportEvent::Open]
            }
            (TransportState::Connecting, LinkEvent::Failed(msg)) => {
                self.enter_closed();
                vec![
                    TransportEvent::Error(TerminalError::ConnectFailure(msg.clone())),
                    TransportEvent::Close(CloseReason::ConnectFailed(msg)),
                ]
            }
            (TransportState::Connecting, LinkEvent::Closed { code, reason }) => {
                self.enter_closed();
                let msg = format!("closed during handshake ({code}) {reason}");
                vec![
                    TransportEvent::Error(TerminalError::ConnectFailure(msg.clone())),
                    TransportEvent::Close(CloseReason::ConnectFailed(msg)),
                ]
            }
            (TransportState::Connecting, LinkEvent::Message(_)) => {
                log::warn!("[Transport] Message before open, discarding");
                Vec::new()
            }
            (TransportState::Open, LinkEvent::Message(message)) => match frame::decode(message) {
                Ok(frame) => vec![TransportEvent::Frame(frame)],
                Err(e) => vec![TransportEvent::Discarded(e)],
            },
            (TransportState::Open, LinkEvent::Closed { code, reason }) => {
                self.enter_closed();
                vec![TransportEvent::Close(CloseReason::Remote { code, reason })]
            }
            (TransportState::Open, LinkEvent::Failed(msg)) => {
                self.enter_closed();
                vec![
                    TransportEvent::Error(TerminalError::Transport(msg.clone())),
                    TransportEvent::Close(CloseReason::Error(msg)),
                ]
            }
            (TransportState::Open, LinkEvent::Opened) => {
                log::warn!("[Transport] Duplicate open event ignored");
                Vec::new()
            }
        }
    }

    /// Close locally. Returns `true` if this call performed the transition.
    pub fn close(&mut self) -> bool {
        if self.state == TransportState::Closed {
            return false;
        }
        log::info!("[Transport] Closing attempt {} from {:?}", self.attempt, self.state);
        self.enter_closed();
        true
    }

    /// Enter `Closed` and release the link synchronously.
    fn enter_closed(&mut self) {
        self.state = TransportState::Closed;
        if let Some(mut link) = self.link.take() {
            link.close();
        }
    }
}

impl Drop for TransportSession {
    fn drop(&mut self) {
        self.enter_closed();
    }
}
