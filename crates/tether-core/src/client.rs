//! Outbound relay operations.
//!
//! [`BotClient`] is a cheap, cloneable handle over the session's
//! [`RpcCorrelator`]. Every operation shapes the relay's parameters, sends
//! the request and returns the [`PendingCall`] for its outcome:
//!
//! ```rust,ignore
//! let pending = client.send_message("+15551234567", "hi", SendMessageArgs::default()).await?;
//! let result = pending.await?;
//! ```
//!
//! | Operation | Method | Parameters |
//! |-----------|--------|------------|
//! | [`send_message`](BotClient::send_message) | `send` | `message`, `recipient`/`groupId`, [`SendMessageArgs`] |
//! | [`send_reaction`](BotClient::send_reaction) | `sendReaction` | `emoji`, `targetAuthor`, `targetTimestamp`, target |
//! | [`send_typing`](BotClient::send_typing) | `sendTyping` | target, `stop` when stopping |
//! | [`delete_message`](BotClient::delete_message) | `remoteDelete` | target, `targetTimestamp` |

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{RpcError, RpcResult};
use crate::model::{AccountId, Context, DataMessage, Recipient};
use crate::rpc::{PendingCall, RpcCorrelator};

/// Optional parts of an outgoing message.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageArgs {
    /// Mentions, each `start:length:account`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub mention: Vec<String>,
    /// Formatting ranges, each `start:length:STYLE`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub text_style: Vec<String>,
    /// Paths or data URIs of files to attach.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachment: Vec<String>,
    /// Timestamp of the message being quoted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quote_timestamp: Option<i64>,
    /// Author of the message being quoted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quote_author: Option<String>,
}

impl SendMessageArgs {
    /// Mentions `account` over the UTF-16 range `start..start + length`.
    pub fn mention(mut self, start: usize, length: usize, account: &AccountId) -> Self {
        self.mention.push(format!("{start}:{length}:{account}"));
        self
    }

    /// Applies `style` (`BOLD`, `ITALIC`, `SPOILER`, `STRIKETHROUGH`, `MONOSPACE`).
    pub fn style(mut self, start: usize, length: usize, style: &str) -> Self {
        self.text_style.push(format!("{start}:{length}:{style}"));
        self
    }

    /// Attaches a file.
    pub fn attachment(mut self, path: impl Into<String>) -> Self {
        self.attachment.push(path.into());
        self
    }

    /// Quotes `message` in the reply.
    pub fn quote(mut self, message: &DataMessage) -> Self {
        self.quote_timestamp = Some(message.timestamp);
        self.quote_author = Some(message.sender.to_string());
        self
    }
}

/// Handle for issuing relay operations.
#[derive(Clone)]
pub struct BotClient {
    rpc: Arc<RpcCorrelator>,
}

impl BotClient {
    /// Wraps a correlator.
    pub fn new(rpc: Arc<RpcCorrelator>) -> Self {
        Self { rpc }
    }

    /// The bot's own account.
    pub fn account(&self) -> &AccountId {
        self.rpc.account()
    }

    /// Issues an arbitrary relay method.
    pub async fn call(&self, method: &str, params: Map<String, Value>) -> RpcResult<PendingCall> {
        self.rpc.send(method, params).await
    }

    /// Sends a text message.
    ///
    /// Fails with [`RpcError::InvalidArgument`] when `message` is empty and
    /// nothing is attached.
    pub async fn send_message(
        &self,
        to: impl Into<Recipient>,
        message: &str,
        args: SendMessageArgs,
    ) -> RpcResult<PendingCall> {
        if message.is_empty() && args.attachment.is_empty() {
            return Err(RpcError::InvalidArgument(
                "a message needs text or an attachment".into(),
            ));
        }

        let mut params = match serde_json::to_value(&args)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        params.insert("message".into(), Value::from(message));
        to.into().write_params(&mut params);
        self.call("send", params).await
    }

    /// Replies into the conversation `ctx` came from.
    pub async fn reply(&self, ctx: &Context, message: &str) -> RpcResult<PendingCall> {
        self.send_message(ctx, message, SendMessageArgs::default())
            .await
    }

    /// Reacts to `message` with `emoji`.
    pub async fn send_reaction(&self, message: &DataMessage, emoji: &str) -> RpcResult<PendingCall> {
        self.call("sendReaction", reaction_params(message, emoji, false))
            .await
    }

    /// Withdraws an earlier reaction to `message`.
    pub async fn remove_reaction(
        &self,
        message: &DataMessage,
        emoji: &str,
    ) -> RpcResult<PendingCall> {
        self.call("sendReaction", reaction_params(message, emoji, true))
            .await
    }

    /// Starts or stops the typing indicator.
    pub async fn send_typing(&self, to: impl Into<Recipient>, stop: bool) -> RpcResult<PendingCall> {
        let mut params = Map::new();
        to.into().write_params(&mut params);
        if stop {
            params.insert("stop".into(), Value::Bool(true));
        }
        self.call("sendTyping", params).await
    }

    /// Deletes a previously sent message for everyone.
    ///
    /// `target_timestamp` is the sent message's timestamp in milliseconds.
    pub async fn delete_message(
        &self,
        to: impl Into<Recipient>,
        target_timestamp: i64,
    ) -> RpcResult<PendingCall> {
        let mut params = Map::new();
        to.into().write_params(&mut params);
        params.insert("targetTimestamp".into(), Value::from(target_timestamp));
        self.call("remoteDelete", params).await
    }
}

fn reaction_params(message: &DataMessage, emoji: &str, remove: bool) -> Map<String, Value> {
    let mut params = Map::new();
    params.insert("emoji".into(), Value::from(emoji));
    params.insert("targetAuthor".into(), Value::from(message.sender.as_str()));
    params.insert("targetTimestamp".into(), Value::from(message.timestamp));
    match message.group_id() {
        Some(group) => Recipient::Group(group),
        None => Recipient::Account(message.sender.clone()),
    }
    .write_params(&mut params);
    if remove {
        params.insert("remove".into(), Value::Bool(true));
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ResponseFrame;
    use crate::model::{Envelope, GroupId};
    use crate::rpc::tests::RecordingTransport;
    use serde_json::json;
    use tokio_util::task::TaskTracker;

    fn client() -> (BotClient, Arc<RpcCorrelator>, Arc<RecordingTransport>) {
        let transport = Arc::new(RecordingTransport::default());
        let rpc = Arc::new(RpcCorrelator::new(
            AccountId::new("+10000000000"),
            Arc::clone(&transport) as _,
            TaskTracker::new(),
        ));
        (BotClient::new(Arc::clone(&rpc)), rpc, transport)
    }

    fn group_message() -> DataMessage {
        let envelope: Envelope = serde_json::from_value(json!({
            "sourceNumber": "+15550001111",
            "timestamp": 1700000000000i64,
            "dataMessage": {
                "timestamp": 1700000000000i64,
                "message": "hey",
                "groupInfo": { "groupId": "R3JvdXA=" }
            }
        }))
        .unwrap();
        DataMessage::from_envelope(envelope).unwrap()
    }

    #[tokio::test]
    async fn test_send_message_scenario() {
        let (client, rpc, transport) = client();

        let pending = client
            .send_message("+15551234567", "hi", SendMessageArgs::default())
            .await
            .unwrap();

        let frame = transport.last();
        assert_eq!(frame.method, "send");
        assert_eq!(frame.params["recipient"], "+15551234567");
        assert_eq!(frame.params["message"], "hi");
        assert_eq!(frame.params["account"], "+10000000000");
        assert!(!frame.params.contains_key("mention"));

        rpc.handle_response(ResponseFrame {
            id: Some(frame.id.clone()),
            outcome: Ok(json!({})),
        });
        assert_eq!(pending.await.unwrap(), json!({}));
    }

    #[tokio::test]
    async fn test_send_message_to_group_with_args() {
        let (client, _rpc, transport) = client();
        let group = "A".repeat(44);
        let args = SendMessageArgs::default()
            .mention(0, 1, &AccountId::new("+15550001111"))
            .style(2, 3, "BOLD");

        client.send_message(group.as_str(), "\u{fffc} hey", args).await.unwrap();

        let frame = transport.last();
        assert_eq!(frame.params["groupId"], group.as_str());
        assert!(!frame.params.contains_key("recipient"));
        assert_eq!(frame.params["mention"], json!(["0:1:+15550001111"]));
        assert_eq!(frame.params["textStyle"], json!(["2:3:BOLD"]));
    }

    #[tokio::test]
    async fn test_empty_message_without_attachment_is_rejected() {
        let (client, _rpc, transport) = client();

        let result = client
            .send_message("+15551234567", "", SendMessageArgs::default())
            .await;
        assert!(matches!(result, Err(RpcError::InvalidArgument(_))));
        assert!(transport.written.lock().is_empty());

        let args = SendMessageArgs::default().attachment("/tmp/cat.png");
        assert!(client.send_message("+15551234567", "", args).await.is_ok());
    }

    #[tokio::test]
    async fn test_reaction_targets_group_message() {
        let (client, _rpc, transport) = client();
        let message = group_message();

        client.send_reaction(&message, "👍").await.unwrap();
        let frame = transport.last();
        assert_eq!(frame.method, "sendReaction");
        assert_eq!(frame.params["emoji"], "👍");
        assert_eq!(frame.params["targetAuthor"], "+15550001111");
        assert_eq!(frame.params["targetTimestamp"], 1700000000000i64);
        assert_eq!(frame.params["groupId"], "R3JvdXA=");
        assert!(!frame.params.contains_key("remove"));

        client.remove_reaction(&message, "👍").await.unwrap();
        assert_eq!(transport.last().params["remove"], true);
    }

    #[tokio::test]
    async fn test_typing_and_delete() {
        let (client, _rpc, transport) = client();
        let group = GroupId::new("R3JvdXA=");

        client.send_typing(group.clone(), false).await.unwrap();
        let frame = transport.last();
        assert_eq!(frame.method, "sendTyping");
        assert!(!frame.params.contains_key("stop"));

        client.send_typing(group.clone(), true).await.unwrap();
        assert_eq!(transport.last().params["stop"], true);

        client.delete_message(group, 42).await.unwrap();
        let frame = transport.last();
        assert_eq!(frame.method, "remoteDelete");
        assert_eq!(frame.params["targetTimestamp"], 42);
        assert_eq!(frame.params["groupId"], "R3JvdXA=");
    }
}
