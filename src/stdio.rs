//! Render sink backed by the local terminal.
//!
//! Output goes straight to stdout (the local terminal emulator does the
//! escape-sequence work). Keystrokes are read raw from stdin on a
//! dedicated thread; `SIGWINCH` is turned into resize events on another.
//! `Ctrl+]` detaches, like telnet.

// Rust guideline compliant 2026-02

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use anyhow::{Context, Result};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use tokio::sync::{mpsc, oneshot};

use crate::sink::{RenderSink, SinkEvent};

/// Byte produced by `Ctrl+]`.
pub const DETACH_BYTE: u8 = 0x1d;

/// Split a stdin chunk at the first `Ctrl+]`.
///
/// Returns the bytes to forward and whether a detach was requested. Bytes
/// after the detach byte are discarded.
fn split_detach(chunk: &[u8]) -> (&[u8], bool) {
    match chunk.iter().position(|&b| b == DETACH_BYTE) {
        Some(pos) => (&chunk[..pos], true),
        None => (chunk, false),
    }
}

/// Raw mode for the lifetime of the guard, restored on drop (including panics).
#[derive(Debug)]
pub struct RawModeGuard;

impl RawModeGuard {
    /// Switch the local terminal into raw mode.
    pub fn enable() -> Result<Self> {
        enable_raw_mode().context("failed to enable raw mode")?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = crossterm::execute!(std::io::stdout(), crossterm::cursor::Show);
    }
}

type EventSlot = Arc<Mutex<Option<mpsc::UnboundedSender<SinkEvent>>>>;

/// Sends the current local terminal size as a resize event.
///
/// Events raised before the session is open are dropped, so callers fire
/// this once the session reports `Open`.
#[derive(Debug, Clone)]
pub struct ResizeNotifier {
    events: EventSlot,
}

impl ResizeNotifier {
    /// Emit the current size. Returns `false` if no subscriber is attached
    /// or the size could not be read.
    pub fn notify(&self) -> bool {
        emit_current_size(&self.events)
    }
}

fn emit_current_size(events: &EventSlot) -> bool {
    let Ok((cols, rows)) = crossterm::terminal::size() else {
        return false;
    };
    let slot = events.lock().unwrap_or_else(PoisonError::into_inner);
    slot.as_ref()
        .is_some_and(|tx| tx.send(SinkEvent::Resize { cols, rows }).is_ok())
}

/// Stdout/stdin render sink.
#[derive(Debug)]
pub struct StdioSink {
    events: EventSlot,
    shutdown: Arc<AtomicBool>,
    detach_tx: Arc<Mutex<Option<oneshot::Sender<()>>>>,
    #[cfg(unix)]
    signals: Option<signal_hook::iterator::Handle>,
}

impl StdioSink {
    /// Create the sink and a receiver that fires when the user presses
    /// `Ctrl+]`.
    pub fn new() -> (Self, oneshot::Receiver<()>) {
        let (detach_tx, detach_rx) = oneshot::channel();
        let sink = Self {
            events: Arc::new(Mutex::new(None)),
            shutdown: Arc::new(AtomicBool::new(false)),
            detach_tx: Arc::new(Mutex::new(Some(detach_tx))),
            #[cfg(unix)]
            signals: None,
        };
        (sink, detach_rx)
    }

    /// Handle for pushing the current size on demand.
    pub fn resize_notifier(&self) -> ResizeNotifier {
        ResizeNotifier {
            events: Arc::clone(&self.events),
        }
    }

    fn spawn_stdin_reader(&self) {
        let events = Arc::clone(&self.events);
        let shutdown = Arc::clone(&self.shutdown);
        let detach_tx = Arc::clone(&self.detach_tx);

        let spawned = thread::Builder::new()
            .name("kos-stdin".to_string())
            .spawn(move || {
                let mut stdin = std::io::stdin();
                let mut buf = [0u8; 4096];
                loop {
                    let n = match stdin.read(&mut buf) {
                        Ok(0) => {
                            log::info!("[StdioSink] stdin EOF");
                            break;
                        }
                        Ok(n) => n,
                        Err(e) => {
                            log::error!("[StdioSink] stdin read error: {e}");
                            break;
                        }
                    };
                    if shutdown.load(Ordering::Relaxed) {
                        break;
                    }
                    let (input, detach) = split_detach(&buf[..n]);
                    if !input.is_empty() {
                        let slot = events.lock().unwrap_or_else(PoisonError::into_inner);
                        if let Some(tx) = slot.as_ref() {
                            let _ = tx.send(SinkEvent::Input(input.to_vec()));
                        }
                    }
                    if detach {
                        log::info!("[StdioSink] Detach requested");
                        let tx = detach_tx.lock().unwrap_or_else(PoisonError::into_inner).take();
                        if let Some(tx) = tx {
                            let _ = tx.send(());
                        }
                        break;
                    }
                }
            });
        if let Err(e) = spawned {
            log::error!("[StdioSink] Failed to spawn stdin reader: {e}");
        }
    }

    #[cfg(unix)]
    fn spawn_resize_watcher(&mut self) {
        use signal_hook::consts::signal::SIGWINCH;
        use signal_hook::iterator::Signals;

        let mut signals = match Signals::new([SIGWINCH]) {
            Ok(signals) => signals,
            Err(e) => {
                log::warn!("[StdioSink] SIGWINCH unavailable, resize disabled: {e}");
                return;
            }
        };
        self.signals = Some(signals.handle());

        let events = Arc::clone(&self.events);
        let spawned = thread::Builder::new()
            .name("kos-sigwinch".to_string())
            .spawn(move || {
                for _ in signals.forever() {
                    emit_current_size(&events);
                }
            });
        if let Err(e) = spawned {
            log::error!("[StdioSink] Failed to spawn resize watcher: {e}");
        }
    }
}

impl RenderSink for StdioSink {
    fn write(&mut self, data: &[u8]) {
        let mut out = std::io::stdout().lock();
        if let Err(e) = out.write_all(data).and_then(|()| out.flush()) {
            log::warn!("[StdioSink] stdout write failed: {e}");
        }
    }

    fn subscribe(&mut self, events: mpsc::UnboundedSender<SinkEvent>) {
        *self.events.lock().unwrap_or_else(PoisonError::into_inner) = Some(events);
        self.spawn_stdin_reader();
        #[cfg(unix)]
        self.spawn_resize_watcher();
    }

    fn dispose(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        self.events.lock().unwrap_or_else(PoisonError::into_inner).take();
        #[cfg(unix)]
        {
            if let Some(handle) = self.signals.take() {
                handle.close();
            }
        }
        let _ = std::io::stdout().flush();
    }
}
