//! Tether Core - protocol engine of the Tether bot framework.
//!
//! This crate owns everything that touches the relay protocol directly:
//!
//! - [`model`]: identities, inbound envelopes and the realized [`DataMessage`]
//! - [`codec`]: the line-delimited JSON-RPC [`WireCodec`]
//! - [`transport`]: the [`Transport`] / [`FrameHandler`] seam
//! - [`rpc`]: the [`RpcCorrelator`] matching replies to requests
//! - [`client`]: [`BotClient`], the public outbound operations
//!
//! Concrete transports live in `tether-transport`; hook routing and cron
//! scheduling live in `tether-framework`.

pub mod client;
pub mod codec;
pub mod error;
pub mod model;
pub mod rpc;
pub mod transport;

pub use client::{BotClient, SendMessageArgs};
pub use codec::{ErrorObject, Frame, NotificationFrame, RequestFrame, ResponseFrame, WireCodec};
pub use error::{
    CodecError, CodecResult, RpcError, RpcResult, TransportError, TransportResult,
};
pub use model::{AccountId, Context, DataMessage, Envelope, GroupId, Mention, Recipient};
pub use rpc::{DEFAULT_RPC_TIMEOUT, PendingCall, RpcCorrelator};
pub use transport::{BoxedTransport, FrameHandler, Transport};
