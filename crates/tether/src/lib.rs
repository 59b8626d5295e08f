//! # Tether
//!
//! An async bot framework for messaging relays that speak line-delimited
//! JSON-RPC over a child process or a TCP socket.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐ lines ┌───────────┐ responses     ┌───────────────┐
//! │   relay   │◀─────▶│ Transport │──────────────▶│ RpcCorrelator │◀── BotClient
//! └───────────┘       └───────────┘               └───────────────┘
//!                           │ notifications
//!                           ▼
//!                     ┌─────────────┐   ┌─────────────────────────────┐
//!                     │ EventRouter │──▶│ group "a" ▶ group "b" ▶ root │──▶ hooks
//!                     └─────────────┘   └─────────────────────────────┘
//!                                        each group: crons ─▶ TaskScheduler
//! ```
//!
//! - **Transport**: `ipc://[path]` spawns the relay, `tcp://host:port` connects to it
//! - **RpcCorrelator**: matches replies to requests, enforces per-call timeouts
//! - **EventRouter**: walks listener groups, then the root group
//! - **ListenerGroup**: prefix, mention, keyword and catch-all hooks plus crons
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tether::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let session = tether::create("+15551234567", "ipc://").await?;
//!
//!     session.root().on_prefix("!ping", message_hook(|client, ctx, _msg| async move {
//!         client.reply(&ctx, "pong").await?;
//!         Ok(true)
//!     }));
//!
//!     session.run_until_signal().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config` (default): TOML configuration files
//! - `yaml-config`: YAML configuration files
//! - `json-log`: JSON log output

pub use tether_core as core;
pub use tether_framework as framework;
pub use tether_runtime as runtime;
pub use tether_transport as transport;

use tether_core::AccountId;
use tether_runtime::{BotSession, SessionResult};

/// Connects to the relay named by `connection` and returns a session acting
/// as `account`.
pub async fn create(account: impl Into<AccountId>, connection: &str) -> SessionResult<BotSession> {
    BotSession::connect(account, connection).await
}

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use tether::prelude::*;
/// ```
pub mod prelude {
    // Session - main entry point
    pub use tether_runtime::{BotSession, ConfigLoader, LoggingBuilder, TetherConfig};

    // Hook registration
    pub use tether_framework::{
        CallbackRef, KeywordOptions, ListenerGroup, message_hook, task_callback,
    };

    // Message model and outbound operations
    pub use tether_core::{
        AccountId, BotClient, Context, DataMessage, GroupId, Recipient, RpcError,
        SendMessageArgs,
    };
}
