//! Connection-string parsing and transport selection.
//!
//! | Form | Transport |
//! |------|-----------|
//! | `ipc://` | spawn `signal-cli` found on `PATH` |
//! | `ipc:///opt/signal-cli/bin/signal-cli` | spawn the given binary (percent-decoded) |
//! | `tcp://127.0.0.1:7583` | connect to a relay socket |

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use url::{Host, Url};

use tether_core::{BoxedTransport, TransportError, TransportResult};

use crate::ipc::IpcTransport;
use crate::line::DEFAULT_POLL_INTERVAL;
use crate::tcp;

/// Schemes [`connect`] understands.
pub const SUPPORTED_SCHEMES: &[&str] = &["ipc", "tcp"];

/// Parsed connection string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionTarget {
    /// Spawn the relay, optionally from an explicit path.
    Ipc { binary: Option<PathBuf> },
    /// Connect to a relay socket.
    Tcp { host: String, port: u16 },
}

impl ConnectionTarget {
    /// Scheme of this target.
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Ipc { .. } => "ipc",
            Self::Tcp { .. } => "tcp",
        }
    }
}

impl fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ipc { binary: None } => f.write_str("ipc://"),
            Self::Ipc {
                binary: Some(path),
            } => write!(f, "ipc://{}", path.display()),
            Self::Tcp { host, port } => write!(f, "tcp://{host}:{port}"),
        }
    }
}

impl FromStr for ConnectionTarget {
    type Err = TransportError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let scheme = input
            .split_once(':')
            .map(|(scheme, _)| scheme)
            .ok_or_else(|| TransportError::invalid_connection(input, "missing scheme"))?;

        if !SUPPORTED_SCHEMES.contains(&scheme) {
            return Err(TransportError::UnsupportedScheme {
                scheme: scheme.to_string(),
                supported: SUPPORTED_SCHEMES.join(", "),
            });
        }

        let url =
            Url::parse(input).map_err(|e| TransportError::invalid_connection(input, e.to_string()))?;

        match scheme {
            "ipc" => {
                let path = urlencoding::decode(url.path())
                    .map_err(|e| TransportError::invalid_connection(input, e.to_string()))?;
                let binary = (!path.is_empty()).then(|| PathBuf::from(path.into_owned()));
                Ok(Self::Ipc { binary })
            }
            _ => {
                let host = match url.host() {
                    Some(Host::Domain(domain)) if !domain.is_empty() => domain.to_string(),
                    Some(Host::Ipv4(addr)) => addr.to_string(),
                    Some(Host::Ipv6(addr)) => addr.to_string(),
                    _ => return Err(TransportError::invalid_connection(input, "missing host")),
                };
                let port = url
                    .port()
                    .ok_or_else(|| TransportError::invalid_connection(input, "missing port"))?;
                Ok(Self::Tcp { host, port })
            }
        }
    }
}

/// Opens the transport named by a connection string.
pub async fn connect(connection: &str) -> TransportResult<BoxedTransport> {
    let target: ConnectionTarget = connection.parse()?;
    connect_target(&target, DEFAULT_POLL_INTERVAL).await
}

/// Opens the transport for an already parsed target.
pub async fn connect_target(
    target: &ConnectionTarget,
    poll_interval: Duration,
) -> TransportResult<BoxedTransport> {
    match target {
        ConnectionTarget::Ipc { binary } => {
            let transport = IpcTransport::spawn(binary.as_deref())?;
            Ok(Arc::new(transport.with_poll_interval(poll_interval)))
        }
        ConnectionTarget::Tcp { host, port } => {
            let transport = tcp::connect(host, *port).await?;
            Ok(Arc::new(transport.with_poll_interval(poll_interval)))
        }
    }
}
