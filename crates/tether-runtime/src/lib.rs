//! Tether Runtime - session orchestration for the Tether bot framework.
//!
//! This crate provides:
//! - [`BotSession`], which owns the relay connection and drives `run`/`stop`
//! - Layered configuration ([`config`])
//! - Logging initialisation ([`logging`])
//!
//! ```rust,ignore
//! use tether_runtime::{BotSession, config::load_config, logging};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config()?;
//!     logging::init_from_config(&config.logging);
//!
//!     let session = BotSession::from_config(&config).await?;
//!     session.root().on_prefix("!ping", message_hook(|client, ctx, _| async move {
//!         client.reply(&ctx, "pong").await?;
//!         Ok(true)
//!     }));
//!     session.run_until_signal().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod session;

pub use config::{ConfigError, ConfigLoader, ConfigResult, TetherConfig};
pub use error::{SessionError, SessionResult};
pub use logging::LoggingBuilder;
pub use session::{BotSession, ROOT_GROUP, wait_for_shutdown};

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Logging macros for bot code.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
