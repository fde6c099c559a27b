//! TCP transport: dialing the server with a connect timeout.
//!
//! The stream is split into owned halves so the request writer and the
//! response reader can live side by side in one
//! [`Connection`](crate::connection::Connection); both halves are buffered.

use std::time::Duration;

use tokio::io::{BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::error::{LinkError, Result};

/// Buffered, split halves of one server connection.
pub type ReadHalf = BufReader<OwnedReadHalf>;
pub type WriteHalf = BufWriter<OwnedWriteHalf>;

/// Dial `endpoint` (a `host:port` string), failing with
/// [`LinkError::Timeout`] if the connect does not complete in time.
pub async fn connect(endpoint: &str, connect_timeout: Duration) -> Result<(ReadHalf, WriteHalf)> {
    let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(endpoint))
        .await
        .map_err(|_| LinkError::Timeout("connect"))??;
    // Request/response exchanges are small and latency-bound.
    stream.set_nodelay(true)?;
    let (read, write) = stream.into_split();
    Ok((BufReader::new(read), BufWriter::new(write)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_to_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let accept = tokio::spawn(async move { listener.accept().await });
        let result = connect(&addr, Duration::from_secs(5)).await;
        assert!(result.is_ok());
        accept.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_connect_refused_is_transport_error() {
        // Bind then drop to get a port nothing is listening on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let result = connect(&addr, Duration::from_secs(5)).await;
        assert!(matches!(result, Err(LinkError::Transport(_))));
    }
}
