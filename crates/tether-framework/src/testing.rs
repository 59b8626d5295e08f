//! Test doubles shared by the framework's unit tests.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Local, TimeZone};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::scheduler::Clock;

use tether_core::{
    AccountId, BotClient, DataMessage, Envelope, FrameHandler, RequestFrame, RpcCorrelator,
    Transport, TransportResult,
};

pub(crate) const BOT_ACCOUNT: &str = "+10000000000";

/// Transport that only records what is written to it.
#[derive(Default)]
pub(crate) struct SinkTransport {
    pub(crate) written: Mutex<Vec<RequestFrame>>,
}

#[async_trait]
impl Transport for SinkTransport {
    fn scheme(&self) -> &'static str {
        "test"
    }

    async fn write(&self, frame: &RequestFrame) -> TransportResult<()> {
        self.written.lock().push(frame.clone());
        Ok(())
    }

    async fn listen(
        &self,
        _handler: Arc<dyn FrameHandler>,
        cancel: CancellationToken,
    ) -> TransportResult<()> {
        cancel.cancelled().await;
        Ok(())
    }

    async fn terminate(&self) -> TransportResult<()> {
        Ok(())
    }
}

pub(crate) fn client_on(transport: Arc<SinkTransport>) -> BotClient {
    let rpc = RpcCorrelator::new(AccountId::new(BOT_ACCOUNT), transport, TaskTracker::new());
    BotClient::new(Arc::new(rpc))
}

pub(crate) fn test_client() -> BotClient {
    client_on(Arc::new(SinkTransport::default()))
}

pub(crate) fn envelope(value: Value) -> Envelope {
    serde_json::from_value(value).unwrap()
}

/// A direct message from `+15550001111` with the given text.
pub(crate) fn text_message(text: &str) -> Arc<DataMessage> {
    Arc::new(
        DataMessage::from_envelope(envelope(json!({
            "sourceNumber": "+15550001111",
            "timestamp": 1_000,
            "dataMessage": { "timestamp": 1_000, "message": text }
        })))
        .unwrap(),
    )
}

/// A message that mentions `account` by number.
pub(crate) fn mention_message(text: &str, account: &str) -> Arc<DataMessage> {
    Arc::new(
        DataMessage::from_envelope(envelope(json!({
            "sourceNumber": "+15550001111",
            "timestamp": 1_000,
            "dataMessage": {
                "timestamp": 1_000,
                "message": text,
                "mentions": [{ "number": account, "start": 0, "length": 1 }]
            }
        })))
        .unwrap(),
    )
}

/// Wall clock that advances with tokio's (pausable) clock.
pub(crate) struct TokioClock {
    base: DateTime<Local>,
    origin: Instant,
}

impl TokioClock {
    pub(crate) fn at(h: u32, m: u32, s: u32) -> Arc<Self> {
        let base = Local
            .with_ymd_and_hms(2024, 6, 1, h, m, s)
            .single()
            .unwrap();
        Arc::new(Self {
            base,
            origin: Instant::now(),
        })
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Local> {
        let elapsed = Instant::now() - self.origin;
        self.base + chrono::Duration::from_std(elapsed).unwrap()
    }
}
