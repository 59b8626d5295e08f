//! Data model shared by every layer.
//!
//! - [`ids`]: [`AccountId`], [`GroupId`] and the outbound [`Recipient`].
//! - [`envelope`]: serde mirror of the relay's inbound `envelope` object.
//! - [`message`]: the realized [`DataMessage`] handed to hooks.
//! - [`context`]: the [`Context`] a message arrived in.

pub mod context;
pub mod envelope;
pub mod ids;
pub mod message;

pub use context::Context;
pub use envelope::{
    Attachment, DataMessageFrame, Envelope, GroupInfo, Mention, Quote, Reaction, TextStyle,
};
pub use ids::{AccountId, GROUP_ID_LEN, GroupId, Recipient};
pub use message::DataMessage;
