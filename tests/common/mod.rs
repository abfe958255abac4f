//! Shared test doubles: a connector that hands out scripted links and a
//! render sink that records everything written into it.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use kos_terminal::session::EndReason;
use kos_terminal::{
    Connector, Endpoint, Link, LinkEvent, LinkEvents, RenderSink, SessionState, SinkEvent,
    TerminalError, TerminalSession, WireMessage,
};
use tokio::sync::mpsc;

pub const WAIT: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Connector double
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct LinkLog {
    pub sent: Vec<WireMessage>,
    pub closes: usize,
}

/// Test-side handle on one link: inject events, inspect traffic.
#[derive(Debug, Clone)]
pub struct LinkHandle {
    pub endpoint: String,
    events: LinkEvents,
    log: Arc<Mutex<LinkLog>>,
}

impl LinkHandle {
    pub fn attempt(&self) -> u64 {
        self.events.attempt()
    }

    pub fn emit(&self, event: LinkEvent) {
        self.events.emit(event);
    }

    pub fn open(&self) {
        self.emit(LinkEvent::Opened);
    }

    pub fn output(&self, data: &[u8]) {
        self.emit(LinkEvent::Message(WireMessage::Binary(data.to_vec())));
    }

    pub fn text(&self, text: &str) {
        self.emit(LinkEvent::Message(WireMessage::Text(text.to_string())));
    }

    pub fn remote_close(&self, code: u16, reason: &str) {
        self.emit(LinkEvent::Closed {
            code,
            reason: reason.to_string(),
        });
    }

    pub fn fail(&self, msg: &str) {
        self.emit(LinkEvent::Failed(msg.to_string()));
    }

    pub fn sent(&self) -> Vec<WireMessage> {
        self.log.lock().unwrap().sent.clone()
    }

    pub fn closes(&self) -> usize {
        self.log.lock().unwrap().closes
    }
}

#[derive(Debug)]
struct RecordingLink {
    log: Arc<Mutex<LinkLog>>,
    closed: bool,
}

impl Link for RecordingLink {
    fn send(&mut self, message: WireMessage) -> Result<(), TerminalError> {
        if self.closed {
            return Err(TerminalError::NotConnected);
        }
        self.log.lock().unwrap().sent.push(message);
        Ok(())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.log.lock().unwrap().closes += 1;
        }
    }
}

/// Connector that records every attempt and never touches the network.
#[derive(Debug, Default)]
pub struct RecordingConnector {
    links: Mutex<Vec<LinkHandle>>,
}

impl RecordingConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn attempts(&self) -> usize {
        self.links.lock().unwrap().len()
    }

    /// Link for the given attempt (1-based).
    pub fn link(&self, attempt: usize) -> LinkHandle {
        self.links.lock().unwrap()[attempt - 1].clone()
    }

    pub async fn wait_for_attempts(&self, n: usize) -> LinkHandle {
        wait_until(|| self.attempts() >= n).await;
        self.link(n)
    }
}

impl Connector for RecordingConnector {
    fn connect(&self, endpoint: &Endpoint, events: LinkEvents) -> Box<dyn Link> {
        let log = Arc::new(Mutex::new(LinkLog::default()));
        self.links.lock().unwrap().push(LinkHandle {
            endpoint: endpoint.url().to_string(),
            events,
            log: Arc::clone(&log),
        });
        Box::new(RecordingLink { log, closed: false })
    }
}

// ---------------------------------------------------------------------------
// Render sink double
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct SinkLog {
    pub output: Vec<u8>,
    pub writes: usize,
    pub ended: Vec<EndReason>,
    pub disposals: usize,
    pub writes_after_dispose: usize,
    events: Option<mpsc::UnboundedSender<SinkEvent>>,
}

#[derive(Debug)]
pub struct RecordingSink {
    log: Arc<Mutex<SinkLog>>,
}

/// Test-side handle on the sink: inject keystrokes and resizes, inspect output.
#[derive(Debug, Clone)]
pub struct SinkHandle {
    log: Arc<Mutex<SinkLog>>,
}

impl RecordingSink {
    pub fn new() -> (Box<dyn RenderSink>, SinkHandle) {
        let log = Arc::new(Mutex::new(SinkLog::default()));
        let sink = Box::new(Self {
            log: Arc::clone(&log),
        });
        (sink, SinkHandle { log })
    }
}

impl RenderSink for RecordingSink {
    fn write(&mut self, data: &[u8]) {
        let mut log = self.log.lock().unwrap();
        if log.disposals > 0 {
            log.writes_after_dispose += 1;
        }
        log.writes += 1;
        log.output.extend_from_slice(data);
    }

    fn subscribe(&mut self, events: mpsc::UnboundedSender<SinkEvent>) {
        self.log.lock().unwrap().events = Some(events);
    }

    fn show_ended(&mut self, reason: &EndReason) {
        let mut log = self.log.lock().unwrap();
        if log.disposals > 0 {
            log.writes_after_dispose += 1;
        }
        log.ended.push(reason.clone());
    }

    fn dispose(&mut self) {
        let mut log = self.log.lock().unwrap();
        log.disposals += 1;
        log.events = None;
    }
}

impl SinkHandle {
    /// Simulate keystrokes. Returns `false` if nobody is subscribed.
    pub fn input(&self, data: &[u8]) -> bool {
        self.send(SinkEvent::Input(data.to_vec()))
    }

    pub fn resize(&self, cols: u16, rows: u16) -> bool {
        self.send(SinkEvent::Resize { cols, rows })
    }

    fn send(&self, event: SinkEvent) -> bool {
        let log = self.log.lock().unwrap();
        log.events.as_ref().is_some_and(|tx| tx.send(event).is_ok())
    }

    pub fn is_subscribed(&self) -> bool {
        self.log.lock().unwrap().events.is_some()
    }

    pub fn output(&self) -> Vec<u8> {
        self.log.lock().unwrap().output.clone()
    }

    pub fn writes(&self) -> usize {
        self.log.lock().unwrap().writes
    }

    pub fn ended(&self) -> Vec<EndReason> {
        self.log.lock().unwrap().ended.clone()
    }

    pub fn disposals(&self) -> usize {
        self.log.lock().unwrap().disposals
    }

    pub fn writes_after_dispose(&self) -> usize {
        self.log.lock().unwrap().writes_after_dispose
    }
}

// ---------------------------------------------------------------------------
// Waiting helpers
// ---------------------------------------------------------------------------

/// Poll `cond` until it holds, panicking after [`WAIT`].
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// Wait until the session state satisfies `pred` and return it.
pub async fn wait_for_state(
    session: &TerminalSession,
    pred: impl Fn(&SessionState) -> bool,
) -> SessionState {
    let mut rx = session.subscribe_state();
    tokio::time::timeout(WAIT, async {
        rx.wait_for(|state| pred(state)).await.map(|s| s.clone())
    })
    .await
    .expect("state not reached in time")
    .expect("state channel closed")
}

/// Let the session's pump drain whatever is queued.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
