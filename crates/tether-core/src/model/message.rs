//! Realized inbound data message.

use std::time::Duration;

use super::context::Context;
use super::envelope::{
    Attachment, DataMessageFrame, Envelope, GroupInfo, Mention, Quote, Reaction, TextStyle,
};
use super::ids::{AccountId, GroupId};

/// Immutable projection of an envelope's `dataMessage`.
///
/// Constructed once per inbound message with [`DataMessage::from_envelope`]
/// and shared by reference with every hook that sees it.
#[derive(Debug, Clone)]
pub struct DataMessage {
    /// Sender-side timestamp in milliseconds.
    pub timestamp: i64,
    /// Account that sent the message.
    pub sender: AccountId,
    /// Sender profile name.
    pub sender_name: Option<String>,
    /// Text body.
    pub text: Option<String>,
    /// Disappearing-message timer, `None` when disabled.
    pub expires_in: Option<Duration>,
    pub view_once: bool,
    pub mentions: Vec<Mention>,
    pub attachments: Vec<Attachment>,
    pub quote: Option<Quote>,
    pub reaction: Option<Reaction>,
    pub group: Option<GroupInfo>,
    pub text_styles: Vec<TextStyle>,
}

impl DataMessage {
    /// Realizes the data message carried by `envelope`.
    ///
    /// Returns `None` when the envelope has no `dataMessage` or no sender.
    pub fn from_envelope(envelope: Envelope) -> Option<Self> {
        let sender = AccountId::new(envelope.sender()?);
        let Envelope {
            source_name,
            timestamp: envelope_timestamp,
            data_message,
            ..
        } = envelope;
        let DataMessageFrame {
            timestamp,
            message,
            expires_in_seconds,
            view_once,
            mentions,
            attachments,
            quote,
            reaction,
            group_info,
            text_styles,
            ..
        } = data_message?;

        Some(Self {
            timestamp: if timestamp == 0 {
                envelope_timestamp
            } else {
                timestamp
            },
            sender,
            sender_name: source_name,
            text: message,
            expires_in: (expires_in_seconds > 0).then(|| Duration::from_secs(expires_in_seconds)),
            view_once,
            mentions,
            attachments,
            quote,
            reaction,
            group: group_info,
            text_styles,
        })
    }

    /// Text body, if any.
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    /// Group the message was sent to.
    pub fn group_id(&self) -> Option<GroupId> {
        self.group.as_ref().map(|g| GroupId::new(g.group_id.as_str()))
    }

    /// Conversation context: the group when present, otherwise the sender.
    pub fn context(&self) -> Context {
        match self.group_id() {
            Some(id) => Context::Group(id),
            None => Context::Individual {
                account: self.sender.clone(),
                name: self.sender_name.clone(),
            },
        }
    }

    /// Whether `account` is among the mentioned accounts.
    pub fn mentions_account(&self, account: &AccountId) -> bool {
        self.mentions.iter().any(|m| m.refers_to(account.as_str()))
    }
}
