//! Terminal session controller.
//!
//! A [`TerminalSession`] binds one render sink to one remote agent shell.
//! Creating it starts connecting immediately; [`TerminalSession::dispose`]
//! (or drop) tears everything down.
//!
//! # Architecture
//!
//! ```text
//!                       ┌──────────── Shared (mutex) ────────────┐
//! RenderSink ─SinkEvent─┤ disposed flag                          │
//!   ▲                   │ TransportSession ──Link──► WebSocket   │
//!   └───── write ───────┤ RenderSink                             │
//!                       └────────────────────────────────────────┘
//!                              ▲                 ▲
//!                        pump task: SinkEvent, TaggedLinkEvent, retry timer
//! ```
//!
//! Every event is processed by one pump task under the shared lock, and
//! every handler checks the disposed flag first. `dispose()` sets that flag
//! under the same lock, so once it returns no handler can reach the sink,
//! whatever the network does afterwards.

// Rust guideline compliant 2026-02

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::constants::DEFAULT_SERVER_URL;
use crate::error::{Result, TerminalError};
use crate::frame::Frame;
use crate::identity::{Endpoint, SessionIdentity};
use crate::reconnect::ReconnectPolicy;
use crate::sink::{RenderSink, SinkEvent};
use crate::transport::{
    CloseReason, Connector, SendOutcome, TaggedLinkEvent, TransportEvent, TransportSession,
};

/// Options for a new session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Server base URL (`http(s)://` or `ws(s)://`).
    pub base_url: String,
    /// What to do when the connection drops.
    pub reconnect: ReconnectPolicy,
    /// Whether to write an ended indicator into the sink when the session ends.
    pub show_ended: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_SERVER_URL.to_string(),
            reconnect: ReconnectPolicy::Disabled,
            show_ended: true,
        }
    }
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    /// The remote closed the connection.
    RemoteClosed {
        /// WebSocket close code.
        code: u16,
        /// Close reason text.
        reason: String,
    },
    /// The endpoint could not be reached.
    ConnectFailed(String),
    /// The connection failed after opening.
    TransportError(String),
    /// The remote shell exited.
    ProcessExited(Option<i32>),
}

impl From<CloseReason> for EndReason {
    fn from(reason: CloseReason) -> Self {
        match reason {
            CloseReason::Remote { code, reason } => Self::RemoteClosed { code, reason },
            CloseReason::ConnectFailed(msg) => Self::ConnectFailed(msg),
            CloseReason::Error(msg) => Self::TransportError(msg),
        }
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RemoteClosed { code, reason } if reason.is_empty() => {
                write!(f, "connection closed ({code})")
            }
            Self::RemoteClosed { code, reason } => write!(f, "connection closed ({code}: {reason})"),
            Self::ConnectFailed(msg) => write!(f, "could not connect: {msg}"),
            Self::TransportError(msg) => write!(f, "connection lost: {msg}"),
            Self::ProcessExited(Some(code)) => write!(f, "process exited with code {code}"),
            Self::ProcessExited(None) => write!(f, "process exited"),
        }
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// First connection attempt in flight.
    Connecting,
    /// Traffic flows in both directions.
    Open,
    /// Waiting to retry after a drop.
    Reconnecting {
        /// Consecutive failure count (1-based).
        attempt: u32,
    },
    /// The session is over; the sink stays mounted until `dispose()`.
    Ended(EndReason),
    /// `dispose()` ran.
    Disposed,
}

impl SessionState {
    /// `Ended` or `Disposed`.
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Ended(_) | Self::Disposed)
    }
}

/// Traffic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Output bytes written to the sink.
    pub bytes_received: u64,
    /// Input bytes handed to the transport.
    pub bytes_sent: u64,
    /// Resize messages handed to the transport.
    pub resizes_sent: u64,
    /// Undecodable messages discarded.
    pub malformed_frames: u64,
    /// Sink events dropped because the transport was not open.
    pub dropped_sends: u64,
    /// Physical connections opened (including retries).
    pub connect_attempts: u64,
}

struct Shared {
    disposed: bool,
    transport: Option<TransportSession>,
    sink: Option<Box<dyn RenderSink>>,
    ended_shown: bool,
    stats: SessionStats,
    state_tx: watch::Sender<SessionState>,
}

impl Shared {
    fn set_state(&mut self, state: SessionState) {
        self.state_tx.send_replace(state);
    }

    fn end(&mut self, reason: EndReason, show_indicator: bool) {
        if self.disposed || self.state_tx.borrow().is_finished() {
            return;
        }
        log::info!("[TerminalSession] Ended: {reason}");
        if show_indicator && !self.ended_shown {
            self.ended_shown = true;
            if let Some(sink) = self.sink.as_mut() {
                sink.show_ended(&reason);
            }
        }
        self.set_state(SessionState::Ended(reason));
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Live bridge between one render sink and one remote agent terminal.
pub struct TerminalSession {
    id: Uuid,
    identity: SessionIdentity,
    endpoint: Endpoint,
    shared: Arc<Mutex<Shared>>,
    pump: Mutex<Option<JoinHandle<()>>>,
    state_rx: watch::Receiver<SessionState>,
}

impl fmt::Debug for TerminalSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TerminalSession")
            .field("id", &self.id)
            .field("identity", &self.identity)
            .field("state", &*self.state_rx.borrow())
            .finish_non_exhaustive()
    }
}

impl TerminalSession {
    /// Validate the identity, then [`create`](Self::create).
    pub fn connect(
        project_id: &str,
        agent_id: &str,
        sink: Box<dyn RenderSink>,
        connector: Arc<dyn Connector>,
        options: SessionOptions,
    ) -> Result<Self> {
        let identity = SessionIdentity::new(project_id, agent_id)?;
        Self::create(identity, sink, connector, options)
    }

    /// Mount `sink` and start connecting to the endpoint for `identity`.
    ///
    /// Must be called from within a tokio runtime. Exactly one connection
    /// attempt is issued before this returns.
    pub fn create(
        identity: SessionIdentity,
        mut sink: Box<dyn RenderSink>,
        connector: Arc<dyn Connector>,
        options: SessionOptions,
    ) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            TerminalError::Transport(format!("terminal session requires a tokio runtime: {e}"))
        })?;

        let id = Uuid::new_v4();
        let endpoint = Endpoint::for_identity(&options.base_url, &identity);
        log::info!("[TerminalSession] {} mounting {} ({})", id, identity, endpoint);

        let (link_tx, link_rx) = mpsc::unbounded_channel();
        let (sink_tx, sink_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Connecting);

        sink.subscribe(sink_tx);
        let transport = TransportSession::connect(connector.as_ref(), &endpoint, 1, link_tx.clone());

        let shared = Arc::new(Mutex::new(Shared {
            disposed: false,
            transport: Some(transport),
            sink: Some(sink),
            ended_shown: false,
            stats: SessionStats {
                connect_attempts: 1,
                ..SessionStats::default()
            },
            state_tx,
        }));

        let pump = Pump {
            shared: Arc::clone(&shared),
            connector,
            endpoint: endpoint.clone(),
            policy: options.reconnect,
            show_ended: options.show_ended,
            link_tx,
            link_rx,
            sink_rx: Some(sink_rx),
            failures: 0,
            next_attempt: 2,
            retry_at: None,
        };
        let handle = runtime.spawn(pump.run());

        Ok(Self {
            id,
            identity,
            endpoint,
            shared,
            pump: Mutex::new(Some(handle)),
            state_rx,
        })
    }

    /// Unique id of this session, for logs.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The identity this session is bound to.
    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    /// The resolved endpoint.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state_rx.borrow().clone()
    }

    /// Watch lifecycle state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    /// Snapshot of traffic counters.
    pub fn stats(&self) -> SessionStats {
        lock(&self.shared).stats
    }

    /// Whether `dispose()` has run.
    pub fn is_disposed(&self) -> bool {
        lock(&self.shared).disposed
    }

    /// Wait until the session has ended or been disposed.
    pub async fn finished(&self) -> SessionState {
        let mut rx = self.state_rx.clone();
        let state = match rx.wait_for(SessionState::is_finished).await {
            Ok(state) => state.clone(),
            Err(_) => SessionState::Disposed,
        };
        state
    }

    /// Tear the session down.
    ///
    /// Stops accepting sink events, closes (or aborts) the connection and
    /// disposes the sink, synchronously. Calling it again is a no-op. Any
    /// network completion arriving later is absorbed without touching the
    /// sink.
    pub fn dispose(&self) {
        {
            let mut shared = lock(&self.shared);
            if shared.disposed {
                return;
            }
            shared.disposed = true;
            if let Some(mut transport) = shared.transport.take() {
                transport.close();
            }
            if let Some(mut sink) = shared.sink.take() {
                sink.dispose();
            }
            shared.set_state(SessionState::Disposed);
        }
        if let Some(handle) = lock(&self.pump).take() {
            handle.abort();
        }
        log::info!("[TerminalSession] {} disposed ({})", self.id, self.identity);
    }
}

impl Drop for TerminalSession {
    fn drop(&mut self) {
        self.dispose();
    }
}

enum Flow {
    Continue,
    Exit,
}

/// Event loop owning the receive side of every channel.
struct Pump {
    shared: Arc<Mutex<Shared>>,
    connector: Arc<dyn Connector>,
    endpoint: Endpoint,
    policy: ReconnectPolicy,
    show_ended: bool,
    link_tx: mpsc::UnboundedSender<TaggedLinkEvent>,
    link_rx: mpsc::UnboundedReceiver<TaggedLinkEvent>,
    sink_rx: Option<mpsc::UnboundedReceiver<SinkEvent>>,
    failures: u32,
    next_attempt: u64,
    retry_at: Option<Instant>,
}

impl Pump {
    async fn run(mut self) {
        loop {
            let flow = tokio::select! {
                Some((attempt, event)) = self.link_rx.recv() => {
                    self.on_link_event(attempt, event)
                }
                event = recv_sink(&mut self.sink_rx), if self.sink_rx.is_some() => {
                    match event {
                        Some(event) => self.on_sink_event(event),
                        None => {
                            log::debug!("[TerminalSession] Sink unsubscribed");
                            self.sink_rx = None;
                            Flow::Continue
                        }
                    }
                }
                () = tokio::time::sleep_until(self.retry_at.unwrap_or_else(Instant::now)),
                    if self.retry_at.is_some() => {
                    self.on_retry()
                }
                else => Flow::Exit,
            };
            if matches!(flow, Flow::Exit) {
                break;
            }
        }
        log::debug!("[TerminalSession] Pump for {} exiting", self.endpoint);
    }

    fn on_link_event(&mut self, attempt: u64, event: crate::transport::LinkEvent) -> Flow {
        let shared_arc = Arc::clone(&self.shared);
        let mut shared = lock(&shared_arc);
        if shared.disposed {
            return Flow::Exit;
        }

        let events = match shared.transport.as_mut() {
            Some(transport) if transport.attempt() == attempt => transport.handle(event),
            _ => {
                log::debug!("[TerminalSession] Stale event from attempt {attempt}: {event:?}");
                return Flow::Continue;
            }
        };

        for event in events {
            match event {
                TransportEvent::Open => {
                    self.failures = 0;
                    log::info!("[TerminalSession] Connected to {}", self.endpoint);
                    shared.set_state(SessionState::Open);
                }
                TransportEvent::Frame(Frame::Output(data)) => {
                    shared.stats.bytes_received += data.len() as u64;
                    if let Some(sink) = shared.sink.as_mut() {
                        sink.write(&data);
                    }
                }
                TransportEvent::Frame(Frame::SessionEnded { exit_code }) => {
                    if let Some(transport) = shared.transport.as_mut() {
                        transport.close();
                    }
                    shared.end(EndReason::ProcessExited(exit_code), self.show_ended);
                    return Flow::Exit;
                }
                TransportEvent::Frame(other) => {
                    log::debug!("[TerminalSession] Ignoring client-bound-only frame {other:?}");
                }
                TransportEvent::Discarded(e) => {
                    shared.stats.malformed_frames += 1;
                    log::warn!("[TerminalSession] Discarding frame: {e}");
                }
                TransportEvent::Error(e) => {
                    log::warn!("[TerminalSession] Transport error: {e}");
                }
                TransportEvent::Close(reason) => {
                    return self.after_close(&mut shared, reason);
                }
            }
        }
        Flow::Continue
    }

    fn after_close(&mut self, shared: &mut Shared, reason: CloseReason) -> Flow {
        self.failures = self.failures.saturating_add(1);
        match self.policy.delay(self.failures) {
            Some(delay) => {
                log::info!(
                    "[TerminalSession] {reason}; reconnecting in {:.1}s (attempt {})",
                    delay.as_secs_f32(),
                    self.failures
                );
                self.retry_at = Some(Instant::now() + delay);
                shared.set_state(SessionState::Reconnecting {
                    attempt: self.failures,
                });
                Flow::Continue
            }
            None => {
                shared.end(reason.into(), self.show_ended);
                Flow::Exit
            }
        }
    }

    fn on_retry(&mut self) -> Flow {
        self.retry_at = None;
        let shared_arc = Arc::clone(&self.shared);
        let mut shared = lock(&shared_arc);
        if shared.disposed {
            return Flow::Exit;
        }
        let attempt = self.next_attempt;
        self.next_attempt += 1;
        shared.transport = Some(TransportSession::connect(
            self.connector.as_ref(),
            &self.endpoint,
            attempt,
            self.link_tx.clone(),
        ));
        shared.stats.connect_attempts += 1;
        shared.set_state(SessionState::Connecting);
        Flow::Continue
    }

    fn on_sink_event(&mut self, event: SinkEvent) -> Flow {
        let mut shared = lock(&self.shared);
        if shared.disposed {
            return Flow::Exit;
        }
        let outcome = match (shared.transport.as_mut(), &event) {
            (Some(transport), SinkEvent::Input(data)) => transport.send(data),
            (Some(transport), SinkEvent::Resize { cols, rows }) => {
                transport.send_resize(*cols, *rows)
            }
            (None, _) => SendOutcome::NotConnected,
        };
        match outcome {
            SendOutcome::Sent => match event {
                SinkEvent::Input(data) => shared.stats.bytes_sent += data.len() as u64,
                SinkEvent::Resize { .. } => shared.stats.resizes_sent += 1,
            },
            SendOutcome::NotConnected => {
                shared.stats.dropped_sends += 1;
                log::debug!("[TerminalSession] Not connected, dropping {event:?}");
            }
            SendOutcome::Invalid(e) => {
                log::warn!("[TerminalSession] Rejected {event:?}: {e}");
            }
        }
        Flow::Continue
    }
}

async fn recv_sink(rx: &mut Option<mpsc::UnboundedReceiver<SinkEvent>>) -> Option<SinkEvent> {
    match rx.as_mut() {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
