//! Session tests against a fake relay on an in-memory pipe.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio::time::timeout;

use tether_core::{RpcError, SendMessageArgs};
use tether_framework::{ListenerGroup, message_hook, task_callback};
use tether_runtime::{BotSession, SessionError};
use tether_transport::StreamTransport;

const ACCOUNT: &str = "+15550009999";
const WAIT: Duration = Duration::from_secs(5);

struct FakeRelay {
    lines: Lines<BufReader<ReadHalf<DuplexStream>>>,
    writer: WriteHalf<DuplexStream>,
}

impl FakeRelay {
    async fn next_request(&mut self) -> Value {
        let line = timeout(WAIT, self.lines.next_line())
            .await
            .expect("no request in time")
            .unwrap()
            .expect("stream closed");
        serde_json::from_str(&line).unwrap()
    }

    async fn send(&mut self, frame: Value) {
        let mut line = serde_json::to_string(&frame).unwrap();
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    async fn deliver(&mut self, timestamp: i64, text: &str) {
        self.send(json!({
            "jsonrpc": "2.0",
            "method": "receive",
            "params": {
                "envelope": {
                    "sourceNumber": "+15550001111",
                    "sourceName": "Ada",
                    "timestamp": timestamp,
                    "dataMessage": { "timestamp": timestamp, "message": text }
                }
            }
        }))
        .await;
    }
}

fn session_pair() -> (BotSession, FakeRelay) {
    let (ours, theirs) = tokio::io::duplex(64 * 1024);
    let transport = StreamTransport::from_stream("test", ours)
        .with_poll_interval(Duration::from_millis(20));
    let session = BotSession::new(ACCOUNT, Arc::new(transport));

    let (reader, writer) = tokio::io::split(theirs);
    let relay = FakeRelay {
        lines: BufReader::new(reader).lines(),
        writer,
    };
    (session, relay)
}

fn spawn_run(session: &BotSession) -> tokio::task::JoinHandle<Result<(), SessionError>> {
    let session = session.clone();
    tokio::spawn(async move { session.run().await })
}

#[tokio::test]
async fn test_send_message_round_trip() {
    let (session, mut relay) = session_pair();
    let run = spawn_run(&session);

    let pending = session
        .client()
        .send_message("+15551234567", "hi", SendMessageArgs::default())
        .await
        .unwrap();

    let request = relay.next_request().await;
    assert_eq!(request["jsonrpc"], "2.0");
    assert_eq!(request["method"], "send");
    assert_eq!(request["params"]["recipient"], "+15551234567");
    assert_eq!(request["params"]["message"], "hi");
    assert_eq!(request["params"]["account"], ACCOUNT);
    assert_eq!(request["id"], pending.request_id());

    relay
        .send(json!({ "jsonrpc": "2.0", "id": request["id"], "result": {} }))
        .await;
    let result = timeout(WAIT, pending).await.unwrap().unwrap();
    assert_eq!(result, json!({}));

    session.stop().await;
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_relay_error_reaches_caller() {
    let (session, mut relay) = session_pair();
    let run = spawn_run(&session);

    let pending = session.client().call("listGroups", Default::default()).await.unwrap();
    let request = relay.next_request().await;
    relay
        .send(json!({
            "jsonrpc": "2.0",
            "id": request["id"],
            "error": { "code": -32601, "message": "Method not implemented" }
        }))
        .await;

    match timeout(WAIT, pending).await.unwrap() {
        Err(RpcError::Relay { code, message, .. }) => {
            assert_eq!(code, -32601);
            assert_eq!(message, "Method not implemented");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }

    session.stop().await;
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_messages_before_start_are_not_dispatched() {
    let (session, mut relay) = session_pair();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let calls = Arc::new(AtomicUsize::new(0));
    {
        let calls = Arc::clone(&calls);
        session.root().on_message(message_hook(move |_, _, message| {
            calls.fetch_add(1, Ordering::SeqCst);
            let tx = tx.clone();
            async move {
                let _ = tx.send(message.text().unwrap_or_default().to_string());
                Ok(true)
            }
        }));
    }
    let run = spawn_run(&session);

    let start = session.start_time();
    relay.deliver(start - 60_000, "queued while offline").await;
    relay.deliver(start, "exactly at start").await;
    relay.deliver(start + 1_000, "fresh").await;

    let seen = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(seen, "fresh");
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    session.stop().await;
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_groups_before_root() {
    let (session, mut relay) = session_pair();
    let (tx, mut rx) = mpsc::unbounded_channel::<&'static str>();

    let scoped = ListenerGroup::with_contexts("elsewhere", ["some-group-id"]);
    let commands = ListenerGroup::new("commands");
    for (group, label) in [(&scoped, "elsewhere"), (&commands, "commands")] {
        let tx = tx.clone();
        group.on_prefix(
            "!",
            message_hook(move |_, _, _| {
                let _ = tx.send(label);
                async { Ok(true) }
            }),
        );
    }
    {
        let tx = tx.clone();
        session.root().on_message(message_hook(move |_, _, _| {
            let _ = tx.send("root");
            async { Ok(true) }
        }));
    }
    session.add_group(scoped);
    session.add_group(commands);
    assert_eq!(session.groups().len(), 2);

    let run = spawn_run(&session);
    let start = session.start_time();

    relay.deliver(start + 1, "!help").await;
    assert_eq!(timeout(WAIT, rx.recv()).await.unwrap(), Some("commands"));

    relay.deliver(start + 2, "hello").await;
    assert_eq!(timeout(WAIT, rx.recv()).await.unwrap(), Some("root"));

    session.stop().await;
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_started_callback_runs() {
    let (session, _relay) = session_pair();
    let (tx, mut rx) = mpsc::unbounded_channel();
    session.root().on_started(task_callback(move |client| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(client.account().to_string());
            Ok(())
        }
    }));

    let run = spawn_run(&session);
    assert_eq!(timeout(WAIT, rx.recv()).await.unwrap().as_deref(), Some(ACCOUNT));

    session.stop().await;
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_stop_is_idempotent_and_cancels_pending_calls() {
    let (session, mut relay) = session_pair();
    let run = spawn_run(&session);

    let pending = session
        .client()
        .send_typing("+15551234567", false)
        .await
        .unwrap();
    relay.next_request().await;

    session.stop().await;
    session.stop().await;
    assert!(session.is_stopped());
    assert!(!session.is_running());

    assert!(matches!(pending.await, Err(RpcError::Cancelled)));
    run.await.unwrap().unwrap();
    assert!(matches!(session.run().await, Err(SessionError::Stopped)));
}

#[tokio::test]
async fn test_stop_before_run() {
    let (session, _relay) = session_pair();
    timeout(WAIT, session.stop()).await.unwrap();
    assert!(matches!(session.run().await, Err(SessionError::Stopped)));
}

#[tokio::test]
async fn test_relay_closing_stream_stops_session() {
    let (session, relay) = session_pair();
    let run = spawn_run(&session);

    drop(relay);
    timeout(WAIT, run).await.unwrap().unwrap().unwrap();
    assert!(session.is_stopped());
}

#[tokio::test]
async fn test_second_run_is_rejected() {
    let (session, _relay) = session_pair();
    let run = spawn_run(&session);

    // Give the first run a chance to claim the session.
    while !session.is_running() {
        tokio::task::yield_now().await;
    }
    assert!(matches!(session.run().await, Err(SessionError::AlreadyRunning)));

    session.stop().await;
    run.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_stop_after_run_task_aborted() {
    let (session, mut relay) = session_pair();
    let run = spawn_run(&session);
    while !session.is_running() {
        tokio::task::yield_now().await;
    }

    run.abort();
    assert!(run.await.unwrap_err().is_cancelled());

    timeout(WAIT, session.stop()).await.unwrap();
    assert!(session.is_stopped());
    // Terminating the transport shuts our write half, so the relay sees EOF.
    let eof = timeout(WAIT, relay.lines.next_line()).await.unwrap().unwrap();
    assert!(eof.is_none());
}

#[tokio::test]
async fn test_dropped_run_future_closes_transport() {
    let (session, mut relay) = session_pair();

    let outcome = timeout(Duration::from_millis(100), session.run()).await;
    assert!(outcome.is_err());
    assert!(session.is_stopped());

    let eof = timeout(WAIT, relay.lines.next_line()).await.unwrap().unwrap();
    assert!(eof.is_none());
    timeout(WAIT, session.stop()).await.unwrap();
    assert!(matches!(session.run().await, Err(SessionError::Stopped)));
}
