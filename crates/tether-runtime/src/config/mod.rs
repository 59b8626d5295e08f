//! Configuration for Tether sessions.
//!
//! Loading is layered with figment (see [`loader`]); [`validate_config`]
//! checks the result before a session is built from it.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{LogFormat, LogLevel, LogOutput, LoggingConfig, SessionConfig, TetherConfig};
pub use validation::{validate_config, validate_session_config};
