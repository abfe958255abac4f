//! Terminal session controller tests against recording doubles.
//!
//! The connector double never touches the network: each test drives the link
//! events by hand and inspects what the session wrote to the sink and to the
//! link.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{settle, wait_for_state, wait_until, RecordingConnector, RecordingSink};
use kos_terminal::reconnect::Backoff;
use kos_terminal::{
    EndReason, ReconnectPolicy, SessionIdentity, SessionOptions, SessionState, TerminalError,
    TerminalSession, WireMessage,
};

fn start(
    connector: &Arc<RecordingConnector>,
    options: SessionOptions,
) -> (TerminalSession, common::SinkHandle) {
    let (sink, handle) = RecordingSink::new();
    let identity = SessionIdentity::new("proj-123", "agent-456").unwrap();
    let session = TerminalSession::create(identity, sink, connector.clone(), options).unwrap();
    (session, handle)
}

async fn start_open(
    connector: &Arc<RecordingConnector>,
    options: SessionOptions,
) -> (TerminalSession, common::SinkHandle, common::LinkHandle) {
    let (session, sink) = start(connector, options);
    let link = connector.link(1);
    link.open();
    wait_for_state(&session, |s| *s == SessionState::Open).await;
    (session, sink, link)
}

fn backoff(initial_ms: u64, max_ms: u64, max_attempts: u32) -> SessionOptions {
    SessionOptions {
        reconnect: ReconnectPolicy::Backoff(Backoff {
            initial: Duration::from_millis(initial_ms),
            max: Duration::from_millis(max_ms),
            max_attempts,
        }),
        ..SessionOptions::default()
    }
}

fn resize_fields(message: &WireMessage) -> (String, u64, u64) {
    let WireMessage::Text(text) = message else {
        panic!("expected text control message, got {message:?}");
    };
    let value: serde_json::Value = serde_json::from_str(text).unwrap();
    (
        value["type"].as_str().unwrap().to_string(),
        value["cols"].as_u64().unwrap(),
        value["rows"].as_u64().unwrap(),
    )
}

// =============================================================================
// Construction
// =============================================================================

#[tokio::test]
async fn test_create_connects_once_to_derived_endpoint() {
    let connector = RecordingConnector::new();
    let (session, _sink) = start(&connector, SessionOptions::default());

    assert_eq!(connector.attempts(), 1);
    let link = connector.link(1);
    assert_eq!(link.endpoint, "ws://localhost:8080/ws/terminal/proj-123/agent-456");
    assert_eq!(session.endpoint().url(), link.endpoint);
    assert_eq!(session.state(), SessionState::Connecting);

    settle().await;
    assert_eq!(connector.attempts(), 1);
}

#[tokio::test]
async fn test_create_uses_configured_base_url() {
    let connector = RecordingConnector::new();
    let options = SessionOptions {
        base_url: "https://kos.example.com/".to_string(),
        ..SessionOptions::default()
    };
    let (_session, _sink) = start(&connector, options);

    assert_eq!(
        connector.link(1).endpoint,
        "wss://kos.example.com/ws/terminal/proj-123/agent-456"
    );
}

#[tokio::test]
async fn test_invalid_identity_never_connects() {
    let connector = RecordingConnector::new();

    for (project, agent) in [
        ("", "agent-456"),
        ("proj-123", ""),
        ("  ", "a"),
        ("p/x", "a"),
        ("proj-\u{e9}", "a"),
    ] {
        let (sink, handle) = RecordingSink::new();
        let err = TerminalSession::connect(
            project,
            agent,
            sink,
            connector.clone(),
            SessionOptions::default(),
        )
        .unwrap_err();

        assert!(matches!(err, TerminalError::InvalidIdentity(_)), "{err:?}");
        assert!(!handle.is_subscribed());
    }
    assert_eq!(connector.attempts(), 0);
}

#[tokio::test]
async fn test_sessions_get_distinct_ids() {
    let connector = RecordingConnector::new();
    let (first, _sink1) = start(&connector, SessionOptions::default());
    let (second, _sink2) = start(&connector, SessionOptions::default());

    assert_ne!(first.id(), second.id());
    assert_eq!(first.endpoint(), second.endpoint());
}

#[test]
fn test_create_outside_runtime_is_error() {
    let connector = RecordingConnector::new();
    let (sink, _handle) = RecordingSink::new();
    let identity = SessionIdentity::new("p", "a").unwrap();

    let err = TerminalSession::create(identity, sink, connector.clone(), SessionOptions::default())
        .unwrap_err();

    assert!(matches!(err, TerminalError::Transport(_)));
    assert_eq!(connector.attempts(), 0);
}

// =============================================================================
// Data plane
// =============================================================================

#[tokio::test]
async fn test_remote_output_written_verbatim() {
    let connector = RecordingConnector::new();
    let (session, sink, link) = start_open(&connector, SessionOptions::default()).await;

    link.output(b"$ ");
    wait_until(|| sink.writes() == 1).await;

    assert_eq!(sink.output(), b"$ ");
    assert_eq!(session.stats().bytes_received, 2);
}

#[tokio::test]
async fn test_text_output_frame_written() {
    let connector = RecordingConnector::new();
    let (_session, sink, link) = start_open(&connector, SessionOptions::default()).await;

    link.text(r#"{"type":"output","data":"hello\r\n"}"#);
    wait_until(|| sink.writes() == 1).await;

    assert_eq!(sink.output(), b"hello\r\n");
}

#[tokio::test]
async fn test_input_before_open_is_dropped_not_buffered() {
    let connector = RecordingConnector::new();
    let (session, sink) = start(&connector, SessionOptions::default());
    let link = connector.link(1);

    assert!(sink.input(b"ls\n"));
    assert!(sink.resize(80, 24));
    wait_until(|| session.stats().dropped_sends == 2).await;

    link.open();
    wait_for_state(&session, |s| *s == SessionState::Open).await;
    settle().await;

    assert!(link.sent().is_empty());
    assert_eq!(session.stats().bytes_sent, 0);
}

#[tokio::test]
async fn test_control_bytes_sent_unmodified() {
    let connector = RecordingConnector::new();
    let (session, sink, link) = start_open(&connector, SessionOptions::default()).await;

    let raw: Vec<u8> = (0x00..=0x1F).chain([0x7F, 0x80, 0xFF]).collect();
    sink.input(&raw);
    sink.input(b"\x1b[A");
    wait_until(|| link.sent().len() == 2).await;

    assert_eq!(
        link.sent(),
        vec![WireMessage::Binary(raw.clone()), WireMessage::Binary(b"\x1b[A".to_vec())]
    );
    assert_eq!(session.stats().bytes_sent, raw.len() as u64 + 3);
}

#[tokio::test]
async fn test_input_and_resize_share_one_ordered_stream() {
    let connector = RecordingConnector::new();
    let (session, sink, link) = start_open(&connector, SessionOptions::default()).await;

    sink.input(b"a");
    sink.resize(120, 40);
    sink.input(b"b");
    sink.resize(80, 24);
    wait_until(|| link.sent().len() == 4).await;

    let sent = link.sent();
    assert_eq!(sent[0], WireMessage::Binary(b"a".to_vec()));
    assert_eq!(resize_fields(&sent[1]), ("resize".to_string(), 120, 40));
    assert_eq!(sent[2], WireMessage::Binary(b"b".to_vec()));
    assert_eq!(resize_fields(&sent[3]), ("resize".to_string(), 80, 24));
    assert_eq!(session.stats().resizes_sent, 2);
}

#[tokio::test]
async fn test_zero_resize_rejected_before_transmission() {
    let connector = RecordingConnector::new();
    let (session, sink, link) = start_open(&connector, SessionOptions::default()).await;

    sink.resize(0, 24);
    sink.resize(80, 0);
    sink.resize(10, 5);
    wait_until(|| link.sent().len() == 1).await;
    settle().await;

    let sent = link.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(resize_fields(&sent[0]), ("resize".to_string(), 10, 5));
    assert_eq!(session.stats().resizes_sent, 1);
    assert_eq!(session.state(), SessionState::Open);
}

#[tokio::test]
async fn test_malformed_frames_are_discarded_not_fatal() {
    let connector = RecordingConnector::new();
    let (session, sink, link) = start_open(&connector, SessionOptions::default()).await;

    link.text("not json");
    link.text(r#"{"type":"bogus"}"#);
    link.text(r#"{"type":"resize","cols":0,"rows":3}"#);
    link.output(b"still alive");
    wait_until(|| sink.writes() == 1).await;

    assert_eq!(sink.output(), b"still alive");
    assert_eq!(session.state(), SessionState::Open);
    assert_eq!(session.stats().malformed_frames, 3);
    assert_eq!(link.closes(), 0);
}

// =============================================================================
// Ending
// =============================================================================

#[tokio::test]
async fn test_remote_close_ends_session_once() {
    let connector = RecordingConnector::new();
    let (session, sink, link) = start_open(&connector, SessionOptions::default()).await;

    link.remote_close(1000, "bye");
    let state = wait_for_state(&session, SessionState::is_finished).await;
    let expected = EndReason::RemoteClosed {
        code: 1000,
        reason: "bye".to_string(),
    };
    assert_eq!(state, SessionState::Ended(expected.clone()));

    // Late duplicates are absorbed
    link.remote_close(1000, "bye");
    link.fail("reset");
    settle().await;

    assert_eq!(sink.ended(), vec![expected]);
    assert_eq!(sink.disposals(), 0);
    assert_eq!(connector.attempts(), 1);

    session.dispose();
    assert_eq!(sink.ended().len(), 1);
    assert_eq!(sink.disposals(), 1);
}

#[tokio::test]
async fn test_connect_failure_ends_session() {
    let connector = RecordingConnector::new();
    let (session, sink) = start(&connector, SessionOptions::default());

    connector.link(1).fail("connection refused");
    let state = session.finished().await;

    assert_eq!(
        state,
        SessionState::Ended(EndReason::ConnectFailed("connection refused".to_string()))
    );
    assert_eq!(sink.ended().len(), 1);
    assert_eq!(connector.attempts(), 1);
}

#[tokio::test]
async fn test_session_end_frame_ends_session() {
    let connector = RecordingConnector::new();
    let (session, sink, link) = start_open(&connector, backoff(5, 10, 3)).await;

    link.text(r#"{"type":"session_end","exit_code":0}"#);
    let state = wait_for_state(&session, SessionState::is_finished).await;

    assert_eq!(state, SessionState::Ended(EndReason::ProcessExited(Some(0))));
    assert_eq!(link.closes(), 1);
    settle().await;
    assert_eq!(connector.attempts(), 1);
    assert_eq!(sink.ended(), vec![EndReason::ProcessExited(Some(0))]);
}

#[tokio::test]
async fn test_ended_indicator_can_be_suppressed() {
    let connector = RecordingConnector::new();
    let options = SessionOptions {
        show_ended: false,
        ..SessionOptions::default()
    };
    let (session, sink, link) = start_open(&connector, options).await;

    link.remote_close(1001, "");
    wait_for_state(&session, SessionState::is_finished).await;

    assert!(sink.ended().is_empty());
}

// =============================================================================
// Dispose
// =============================================================================

#[tokio::test]
async fn test_dispose_before_open_aborts_connect() {
    let connector = RecordingConnector::new();
    let (session, sink) = start(&connector, SessionOptions::default());
    let link = connector.link(1);

    session.dispose();
    assert_eq!(link.closes(), 1);
    assert_eq!(session.state(), SessionState::Disposed);

    link.open();
    link.output(b"too late");
    settle().await;

    assert_eq!(session.state(), SessionState::Disposed);
    assert_eq!(sink.writes(), 0);
    assert!(sink.ended().is_empty());
    assert_eq!(sink.writes_after_dispose(), 0);
}

#[tokio::test]
async fn test_dispose_twice_is_noop() {
    let connector = RecordingConnector::new();
    let (session, sink, link) = start_open(&connector, SessionOptions::default()).await;

    session.dispose();
    session.dispose();

    assert!(session.is_disposed());
    assert_eq!(link.closes(), 1);
    assert_eq!(sink.disposals(), 1);
    assert!(sink.ended().is_empty());
    assert!(!sink.is_subscribed());
}

#[tokio::test]
async fn test_no_sink_writes_after_dispose() {
    let connector = RecordingConnector::new();
    let (session, sink, link) = start_open(&connector, SessionOptions::default()).await;

    link.output(b"before");
    wait_until(|| sink.writes() == 1).await;

    session.dispose();
    link.output(b"after");
    link.remote_close(1000, "");
    settle().await;

    assert_eq!(sink.output(), b"before");
    assert_eq!(sink.writes_after_dispose(), 0);
    assert!(sink.ended().is_empty());
    assert_eq!(session.state(), SessionState::Disposed);
}

#[tokio::test]
async fn test_drop_disposes() {
    let connector = RecordingConnector::new();
    let (session, sink, link) = start_open(&connector, SessionOptions::default()).await;

    drop(session);

    assert_eq!(link.closes(), 1);
    assert_eq!(sink.disposals(), 1);
}

// =============================================================================
// Reconnect
// =============================================================================

#[tokio::test]
async fn test_reconnect_opens_fresh_link_and_ignores_stale_one() {
    let connector = RecordingConnector::new();
    let (session, sink, first) = start_open(&connector, backoff(200, 400, 3)).await;

    first.remote_close(1006, "stream ended");
    let state = wait_for_state(&session, |s| matches!(s, SessionState::Reconnecting { .. })).await;
    assert_eq!(state, SessionState::Reconnecting { attempt: 1 });
    assert!(sink.ended().is_empty());

    let second = connector.wait_for_attempts(2).await;
    assert_eq!(second.attempt(), 2);
    assert_eq!(second.endpoint, first.endpoint);

    // The superseded link cannot drive the new one
    first.output(b"stale");
    first.open();
    settle().await;
    assert_eq!(sink.writes(), 0);
    assert_eq!(session.state(), SessionState::Connecting);

    second.open();
    wait_for_state(&session, |s| *s == SessionState::Open).await;
    second.output(b"fresh");
    wait_until(|| sink.writes() == 1).await;

    assert_eq!(sink.output(), b"fresh");
    assert_eq!(session.stats().connect_attempts, 2);
}

#[tokio::test]
async fn test_reconnect_gives_up_after_max_attempts() {
    let connector = RecordingConnector::new();
    let (session, sink) = start(&connector, backoff(5, 10, 2));

    connector.link(1).fail("refused");
    connector.wait_for_attempts(2).await.fail("refused");
    connector.wait_for_attempts(3).await.fail("refused");

    let state = session.finished().await;
    assert_eq!(
        state,
        SessionState::Ended(EndReason::ConnectFailed("refused".to_string()))
    );
    settle().await;
    assert_eq!(connector.attempts(), 3);
    assert_eq!(sink.ended().len(), 1);
}

#[tokio::test]
async fn test_dispose_while_reconnecting_cancels_retry() {
    let connector = RecordingConnector::new();
    let (session, _sink, link) = start_open(&connector, backoff(100, 100, 3)).await;

    link.remote_close(1011, "");
    wait_for_state(&session, |s| matches!(s, SessionState::Reconnecting { .. })).await;
    session.dispose();

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(connector.attempts(), 1);
    assert_eq!(session.state(), SessionState::Disposed);
}
