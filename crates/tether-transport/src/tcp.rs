//! Socket transport (`tcp://host:port`).
//!
//! Connects to a relay already running in socket mode
//! (`signal-cli daemon --tcp`).

use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::info;

use tether_core::{TransportError, TransportResult};

use crate::line::LineTransport;

/// Line transport over a TCP connection.
pub type TcpTransport = LineTransport<OwnedReadHalf, OwnedWriteHalf>;

/// Opens a connection to `host:port`.
pub async fn connect(host: &str, port: u16) -> TransportResult<TcpTransport> {
    let stream = TcpStream::connect((host, port))
        .await
        .map_err(|e| TransportError::ConnectionFailed {
            url: format!("tcp://{host}:{port}"),
            reason: e.to_string(),
        })?;
    stream.set_nodelay(true)?;

    info!(host, port, "Connected to relay");
    let (reader, writer) = stream.into_split();
    Ok(LineTransport::new("tcp", reader, writer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;
    use tether_core::{RequestFrame, Transport};
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_and_write() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let accept = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut lines = BufReader::new(socket).lines();
            lines.next_line().await.unwrap().unwrap()
        });

        let transport = connect("127.0.0.1", port).await.unwrap();
        transport
            .write(&RequestFrame::new("7", "version", Map::new()))
            .await
            .unwrap();

        let line = accept.await.unwrap();
        assert!(line.starts_with(r#"{"jsonrpc":"2.0","id":"7""#));
    }

    #[tokio::test]
    async fn test_refused_connection_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = connect("127.0.0.1", port).await;
        assert!(matches!(result, Err(TransportError::ConnectionFailed { .. })));
    }
}
