//! Frame codec for the terminal WebSocket.
//!
//! Terminal data and control traffic are separated by WebSocket message
//! kind so neither side has to sniff payloads:
//!
//! ```text
//! Binary message  -> raw terminal bytes (input upstream, output downstream)
//! Text message    -> JSON control object tagged by "type"
//!   {"type":"resize","cols":120,"rows":40}        client -> remote
//!   {"type":"session_end","exit_code":0}          remote -> client
//!   {"type":"output","data":"$ "}                 remote -> client (text-only servers)
//! ```
//!
//! Binary payloads are passed through untouched, so control bytes
//! (`0x00..=0x1F`, `0x7F`) and invalid UTF-8 round-trip exactly.

// Rust guideline compliant 2026-02

use serde::{Deserialize, Serialize};

use crate::error::{Result, TerminalError};

/// Message as carried by the transport's native message boundaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    /// UTF-8 text message (control traffic).
    Text(String),
    /// Binary message (terminal bytes).
    Binary(Vec<u8>),
}

/// Terminal viewport size. Both dimensions are at least 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TerminalSize {
    cols: u16,
    rows: u16,
}

impl TerminalSize {
    /// Validate a viewport size.
    pub fn new(cols: u16, rows: u16) -> Result<Self> {
        if cols == 0 || rows == 0 {
            return Err(TerminalError::InvalidSize { cols, rows });
        }
        Ok(Self { cols, rows })
    }

    /// Columns.
    pub fn cols(self) -> u16 {
        self.cols
    }

    /// Rows.
    pub fn rows(self) -> u16 {
        self.rows
    }
}

/// One classified unit of terminal traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Bytes produced by the remote process, written verbatim to the sink.
    Output(Vec<u8>),
    /// Keystroke bytes produced by the sink, sent verbatim to the remote.
    Input(Vec<u8>),
    /// Viewport resize.
    Resize(TerminalSize),
    /// The remote process exited; no more output will follow.
    SessionEnded {
        /// Exit code, if the remote reported one.
        exit_code: Option<i32>,
    },
}

/// JSON control vocabulary carried in text messages.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ControlMessage {
    Resize {
        cols: u16,
        rows: u16,
    },
    SessionEnd {
        #[serde(default)]
        exit_code: Option<i32>,
    },
    Output {
        data: String,
    },
}

/// Wrap keystroke bytes for transmission.
#[must_use]
pub fn encode_input(data: &[u8]) -> WireMessage {
    WireMessage::Binary(data.to_vec())
}

/// Encode a resize control message. Rejects zero dimensions before
/// anything reaches the wire.
pub fn encode_resize(cols: u16, rows: u16) -> Result<WireMessage> {
    let size = TerminalSize::new(cols, rows)?;
    Ok(encode_size(size))
}

fn encode_size(size: TerminalSize) -> WireMessage {
    control_to_text(&ControlMessage::Resize {
        cols: size.cols,
        rows: size.rows,
    })
}

fn control_to_text(control: &ControlMessage) -> WireMessage {
    // Fixed-shape struct of integers and strings: serialization is infallible,
    // fall back to an empty object rather than panic.
    WireMessage::Text(serde_json::to_string(control).unwrap_or_else(|_| "{}".to_string()))
}

/// Encode any frame, including the remote-to-client vocabulary.
#[must_use]
pub fn encode(frame: &Frame) -> WireMessage {
    match frame {
        Frame::Output(data) | Frame::Input(data) => WireMessage::Binary(data.clone()),
        Frame::Resize(size) => encode_size(*size),
        Frame::SessionEnded { exit_code } => control_to_text(&ControlMessage::SessionEnd {
            exit_code: *exit_code,
        }),
    }
}

/// Classify a message received from the remote side.
///
/// Fails with [`TerminalError::MalformedFrame`] when a text message is not
/// a recognised control object. Callers log and discard such frames.
pub fn decode(message: WireMessage) -> Result<Frame> {
    match message {
        WireMessage::Binary(data) => Ok(Frame::Output(data)),
        WireMessage::Text(text) => {
            let control: ControlMessage = serde_json::from_str(&text)
                .map_err(|e| TerminalError::MalformedFrame(format!("{e}: {}", preview(&text))))?;
            match control {
                ControlMessage::Output { data } => Ok(Frame::Output(data.into_bytes())),
                ControlMessage::SessionEnd { exit_code } => Ok(Frame::SessionEnded { exit_code }),
                ControlMessage::Resize { cols, rows } => {
                    TerminalSize::new(cols, rows)
                        .map(Frame::Resize)
                        .map_err(|e| TerminalError::MalformedFrame(e.to_string()))
                }
            }
        }
    }
}

/// First few characters of a rejected payload, for log lines.
fn preview(text: &str) -> String {
    const MAX: usize = 64;
    if text.chars().count() > MAX {
        let head: String = text.chars().take(MAX).collect();
        format!("{head:?}...")
    } else {
        format!("{text:?}")
    }
}
