//! Relay transports for the Tether bot framework.
//!
//! | Scheme | Type | Channel |
//! |--------|------|---------|
//! | `ipc` | [`IpcTransport`] | relay child process, stdin/stdout |
//! | `tcp` | [`TcpTransport`] | TCP socket |
//!
//! Both are newline-framed [`LineTransport`]s underneath. Use [`connect`]
//! to open the one named by a connection string:
//!
//! ```rust,ignore
//! let transport = tether_transport::connect("tcp://127.0.0.1:7583").await?;
//! ```

pub mod connection;
pub mod ipc;
pub mod line;
pub mod tcp;

pub use connection::{ConnectionTarget, SUPPORTED_SCHEMES, connect, connect_target};
pub use ipc::{IpcTransport, RELAY_ARGS, RELAY_BINARY};
pub use line::{DEFAULT_POLL_INTERVAL, LineTransport, StreamTransport};
pub use tcp::TcpTransport;
