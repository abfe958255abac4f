//! Render sink: the terminal surface a session draws into.
//!
//! Any terminal renderer that can accept output bytes, report keystrokes
//! and viewport changes, and tear itself down can back a session. The
//! session is the sole writer and the sole subscriber; nothing else holds
//! the sink once it has been handed over.

// Rust guideline compliant 2026-02

use std::fmt;

use tokio::sync::mpsc;

use crate::constants::SESSION_ENDED_BANNER;
use crate::session::EndReason;

/// Event produced by a render sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    /// Keystroke bytes, verbatim.
    Input(Vec<u8>),
    /// Viewport resized.
    Resize {
        /// Columns.
        cols: u16,
        /// Rows.
        rows: u16,
    },
}

/// Capability set a session needs from a terminal renderer.
pub trait RenderSink: Send + fmt::Debug {
    /// Write remote output verbatim.
    fn write(&mut self, data: &[u8]);

    /// Start delivering input and resize events to `events`. Called once,
    /// when the session is created.
    fn subscribe(&mut self, events: mpsc::UnboundedSender<SinkEvent>);

    /// Show that the session is over. Called at most once per session.
    fn show_ended(&mut self, reason: &EndReason) {
        let banner = format!("\r\n{SESSION_ENDED_BANNER} {reason}\r\n");
        self.write(banner.as_bytes());
    }

    /// Release the renderer and drop the event subscription.
    fn dispose(&mut self);
}
