//! Inbound envelope as emitted by the relay's `receive` notification.
//!
//! # Shape
//!
//! ```text
//! Envelope { source*, timestamp }
//! ├── dataMessage   → DataMessageFrame { message, mentions, groupInfo, ... }
//! ├── typingMessage → ignored
//! └── others        → ignored
//! ```
//!
//! Every member defaults when missing or `null`; nothing here rejects a
//! frame because the relay left a field out.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Deserializes `null` the same way as a missing member.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// ============================================================================
// Envelope
// ============================================================================

/// Raw inbound wrapper.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Envelope {
    /// Legacy source field (number or uuid).
    pub source: Option<String>,
    /// Sender phone number.
    pub source_number: Option<String>,
    /// Sender service UUID.
    pub source_uuid: Option<String>,
    /// Sender profile name.
    pub source_name: Option<String>,
    /// Sending device.
    pub source_device: Option<u32>,
    /// Server timestamp in milliseconds since the epoch.
    #[serde(deserialize_with = "null_as_default")]
    pub timestamp: i64,
    /// Message payload.
    pub data_message: Option<DataMessageFrame>,
    /// Typing indicator payload.
    pub typing_message: Option<Value>,
    /// Read/delivery receipt payload.
    pub receipt_message: Option<Value>,
    /// Payload synced from a linked device.
    pub sync_message: Option<Value>,
}

impl Envelope {
    /// Sender identity: phone number when known, otherwise the service UUID.
    pub fn sender(&self) -> Option<&str> {
        self.source_number
            .as_deref()
            .or(self.source_uuid.as_deref())
            .or(self.source.as_deref())
    }
}

// ============================================================================
// Data message payload
// ============================================================================

/// `dataMessage` member of an [`Envelope`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DataMessageFrame {
    /// Sender-side timestamp; identifies the message for reactions and deletes.
    #[serde(deserialize_with = "null_as_default")]
    pub timestamp: i64,
    /// Text body.
    pub message: Option<String>,
    /// Disappearing-message timer.
    #[serde(deserialize_with = "null_as_default")]
    pub expires_in_seconds: u64,
    /// View-once media flag.
    #[serde(deserialize_with = "null_as_default")]
    pub view_once: bool,
    /// Accounts mentioned in the text.
    #[serde(deserialize_with = "null_as_default")]
    pub mentions: Vec<Mention>,
    /// Attached files.
    #[serde(deserialize_with = "null_as_default")]
    pub attachments: Vec<Attachment>,
    /// Message being replied to.
    pub quote: Option<Quote>,
    /// Reaction to an earlier message.
    pub reaction: Option<Reaction>,
    /// Present when sent to a group.
    pub group_info: Option<GroupInfo>,
    /// Formatting ranges.
    #[serde(deserialize_with = "null_as_default")]
    pub text_styles: Vec<TextStyle>,
    /// Sticker payload.
    pub sticker: Option<Value>,
    /// Link previews.
    #[serde(deserialize_with = "null_as_default")]
    pub previews: Vec<Value>,
}

/// A mention of an account inside the message text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Mention {
    /// Display name at the time of sending.
    pub name: Option<String>,
    /// Phone number of the mentioned account.
    pub number: Option<String>,
    /// Service UUID of the mentioned account.
    pub uuid: Option<String>,
    /// UTF-16 offset of the placeholder.
    #[serde(deserialize_with = "null_as_default")]
    pub start: u32,
    /// Placeholder length.
    #[serde(deserialize_with = "null_as_default")]
    pub length: u32,
}

impl Mention {
    /// Whether this mention refers to `account` by number or UUID.
    pub fn refers_to(&self, account: &str) -> bool {
        self.number.as_deref() == Some(account) || self.uuid.as_deref() == Some(account)
    }
}

/// Attachment metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Attachment {
    pub id: Option<String>,
    pub content_type: Option<String>,
    pub filename: Option<String>,
    pub size: Option<u64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub caption: Option<String>,
}

/// Quoted (replied-to) message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Quote {
    /// Timestamp of the quoted message.
    #[serde(deserialize_with = "null_as_default")]
    pub id: i64,
    pub author: Option<String>,
    pub author_number: Option<String>,
    pub author_uuid: Option<String>,
    pub text: Option<String>,
}

/// Emoji reaction to an earlier message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Reaction {
    pub emoji: String,
    pub target_author: Option<String>,
    pub target_author_number: Option<String>,
    pub target_author_uuid: Option<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub target_sent_timestamp: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub is_remove: bool,
}

/// Group membership information.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GroupInfo {
    pub group_id: String,
    pub group_name: Option<String>,
    pub revision: Option<u32>,
    /// `DELIVER`, `UPDATE`, ...
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

/// Formatting range applied to the text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TextStyle {
    pub style: String,
    #[serde(deserialize_with = "null_as_default")]
    pub start: u32,
    #[serde(deserialize_with = "null_as_default")]
    pub length: u32,
}
