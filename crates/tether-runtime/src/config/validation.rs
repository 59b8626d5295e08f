//! Configuration validation.

use std::time::Duration;

use tether_transport::ConnectionTarget;

use super::error::{ConfigError, ConfigResult};
use super::schema::{LogLevel, LogOutput, LoggingConfig, SessionConfig, TetherConfig};

/// Smallest accepted poll interval.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Largest accepted poll interval.
pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Validates the entire configuration.
pub fn validate_config(config: &TetherConfig) -> ConfigResult<()> {
    validate_session_config(&config.session)?;
    validate_logging_config(&config.logging)?;
    Ok(())
}

/// Validates session settings and returns the parsed connection target.
pub fn validate_session_config(session: &SessionConfig) -> ConfigResult<ConnectionTarget> {
    if let Some(account) = &session.account
        && account.trim().is_empty()
    {
        return Err(ConfigError::validation("session.account cannot be empty"));
    }

    if session.rpc_timeout_ms == 0 {
        return Err(ConfigError::validation(
            "session.rpc_timeout_ms must be greater than 0",
        ));
    }

    let poll = session.poll_interval();
    if !(MIN_POLL_INTERVAL..=MAX_POLL_INTERVAL).contains(&poll) {
        return Err(ConfigError::validation(format!(
            "session.poll_interval_ms must be between {} and {}, got {}",
            MIN_POLL_INTERVAL.as_millis(),
            MAX_POLL_INTERVAL.as_millis(),
            session.poll_interval_ms
        )));
    }

    session
        .connection
        .parse::<ConnectionTarget>()
        .map_err(|e| ConfigError::InvalidConnection {
            connection: session.connection.clone(),
            reason: e.to_string(),
        })
}

fn validate_logging_config(logging: &LoggingConfig) -> ConfigResult<()> {
    for (target, level) in &logging.filters {
        if target.is_empty() {
            return Err(ConfigError::validation("logging.filters contains an empty target"));
        }
        if !LogLevel::ALL.contains(&level.to_lowercase().as_str()) {
            return Err(ConfigError::validation(format!(
                "Invalid log level for '{target}': {level}. Valid values are: {:?}",
                LogLevel::ALL
            )));
        }
    }

    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::missing_field("logging.file_path"));
    }

    Ok(())
}
