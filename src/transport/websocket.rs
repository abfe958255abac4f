//! WebSocket-backed [`Connector`].
//!
//! Each [`WsConnector::connect`] spawns one tokio task that owns the
//! physical socket for its whole life:
//!
//! ```text
//! WsLink::send ──► outbound mpsc ──► TerminalWriter ──► socket
//! socket ──► TerminalReader ──► LinkEvents::emit ──► session
//! WsLink::close ──► CancellationToken ──► abort connect / send close frame
//! ```
//!
//! All outbound traffic (input and resize alike) goes through one channel
//! and one writer, so frames reach the socket in submission order across
//! kinds.

// Rust guideline compliant 2026-02

use anyhow::{Context, Result};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::frame::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::{Connector, Link, LinkEvent, LinkEvents};
use crate::error::TerminalError;
use crate::frame::WireMessage;
use crate::identity::Endpoint;

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Close reason sent when the session releases the link.
const DISPOSE_REASON: &str = "client disposed";

/// Opens terminal links over `tokio-tungstenite`.
#[derive(Debug, Clone, Default)]
pub struct WsConnector {
    headers: Vec<(String, String)>,
}

impl WsConnector {
    /// Connector that sends no extra upgrade headers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a header to every upgrade request (e.g. the API key).
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

impl Connector for WsConnector {
    fn connect(&self, endpoint: &Endpoint, events: LinkEvents) -> Box<dyn Link> {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        tokio::spawn(run_link(
            endpoint.url().to_string(),
            self.headers.clone(),
            events,
            outbound_rx,
            cancel.clone(),
        ));

        Box::new(WsLink {
            outbound: Some(outbound_tx),
            cancel,
        })
    }
}

/// Handle to one spawned connection task.
#[derive(Debug)]
struct WsLink {
    outbound: Option<mpsc::UnboundedSender<WireMessage>>,
    cancel: CancellationToken,
}

impl Link for WsLink {
    fn send(&mut self, message: WireMessage) -> Result<(), TerminalError> {
        let tx = self.outbound.as_ref().ok_or(TerminalError::NotConnected)?;
        tx.send(message).map_err(|_| TerminalError::NotConnected)
    }

    fn close(&mut self) {
        self.outbound = None;
        self.cancel.cancel();
    }
}

impl Drop for WsLink {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Upstream half of a terminal socket.
struct TerminalWriter {
    sink: SplitSink<Socket, Message>,
}

impl TerminalWriter {
    async fn send(&mut self, message: WireMessage) -> Result<()> {
        let message = match message {
            WireMessage::Binary(data) => Message::Binary(data),
            WireMessage::Text(text) => Message::Text(text),
        };
        self.sink.send(message).await.context("terminal send failed")
    }

    /// Local close: send a normal close frame, then shut the sink.
    async fn close_local(&mut self) {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: DISPOSE_REASON.into(),
        };
        if let Err(e) = self.sink.send(Message::Close(Some(frame))).await {
            log::debug!("[WsLink] Close frame not sent: {e}");
        }
        let _ = self.sink.close().await;
    }

    /// Flush whatever tungstenite queued (the reply to a remote close) and
    /// shut the sink.
    async fn finish(&mut self) {
        let _ = self.sink.close().await;
    }
}

/// Downstream half of a terminal socket, already mapped to link events.
struct TerminalReader {
    stream: SplitStream<Socket>,
}

impl TerminalReader {
    /// Next event for the session. Anything but `Message` ends the link.
    async fn next_event(&mut self) -> LinkEvent {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Binary(data))) => {
                    return LinkEvent::Message(WireMessage::Binary(data));
                }
                Some(Ok(Message::Text(text))) => {
                    return LinkEvent::Message(WireMessage::Text(text));
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.into_owned()))
                        .unwrap_or((1005, String::new()));
                    return LinkEvent::Closed { code, reason };
                }
                // Pings are answered by tungstenite
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Err(e)) => return LinkEvent::Failed(format!("read failed: {e}")),
                None => {
                    return LinkEvent::Closed {
                        code: 1006,
                        reason: "stream ended".to_string(),
                    };
                }
            }
        }
    }
}

/// Perform the upgrade handshake for `url`, adding `headers` to the request.
async fn open_socket(
    url: &str,
    headers: &[(String, String)],
) -> Result<(TerminalWriter, TerminalReader)> {
    let mut request = url
        .into_client_request()
        .with_context(|| format!("invalid terminal URL: {url}"))?;

    for (name, value) in headers {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .with_context(|| format!("invalid header name: {name}"))?;
        let header_value = HeaderValue::from_str(value)
            .with_context(|| format!("invalid header value for {name}"))?;
        request.headers_mut().insert(header_name, header_value);
    }

    let (socket, _response) = tokio_tungstenite::connect_async(request)
        .await
        .context("handshake failed")?;
    let (sink, stream) = socket.split();

    Ok((TerminalWriter { sink }, TerminalReader { stream }))
}

async fn run_link(
    url: String,
    headers: Vec<(String, String)>,
    events: LinkEvents,
    outbound_rx: mpsc::UnboundedReceiver<WireMessage>,
    cancel: CancellationToken,
) {
    let connected = tokio::select! {
        result = open_socket(&url, &headers) => result,
        () = cancel.cancelled() => {
            log::info!("[WsLink] Connect to {} aborted (attempt {})", url, events.attempt());
            return;
        }
    };

    let (mut writer, reader) = match connected {
        Ok(pair) => pair,
        Err(e) => {
            log::warn!("[WsLink] Connect to {} failed: {:#}", url, e);
            events.emit(LinkEvent::Failed(format!("{e:#}")));
            return;
        }
    };

    // close() may have raced the handshake.
    if cancel.is_cancelled() {
        writer.close_local().await;
        return;
    }

    log::info!("[WsLink] Connected to {} (attempt {})", url, events.attempt());
    events.emit(LinkEvent::Opened);

    pump(writer, reader, &events, outbound_rx, &cancel).await;
}

async fn pump(
    mut writer: TerminalWriter,
    mut reader: TerminalReader,
    events: &LinkEvents,
    mut outbound_rx: mpsc::UnboundedReceiver<WireMessage>,
    cancel: &CancellationToken,
) {
    loop {
        tokio::select! {
            // Local close wins over pending traffic.
            biased;

            () = cancel.cancelled() => {
                writer.close_local().await;
                return;
            }

            message = outbound_rx.recv() => {
                let Some(message) = message else {
                    // Link handle dropped without close(); treat as local close.
                    writer.close_local().await;
                    return;
                };
                if let Err(e) = writer.send(message).await {
                    log::warn!("[WsLink] {e:#}");
                    events.emit(LinkEvent::Failed(format!("{e:#}")));
                    return;
                }
            }

            event = reader.next_event() => {
                if matches!(event, LinkEvent::Message(_)) {
                    events.emit(event);
                } else {
                    match &event {
                        LinkEvent::Closed { code, reason } => {
                            log::info!("[WsLink] Remote closed ({code}) {reason}");
                        }
                        LinkEvent::Failed(msg) => log::warn!("[WsLink] {msg}"),
                        LinkEvent::Opened | LinkEvent::Message(_) => {}
                    }
                    events.emit(event);
                    // Completes the close handshake if the remote started one
                    writer.finish().await;
                    return;
                }
            }
        }
    }
}
