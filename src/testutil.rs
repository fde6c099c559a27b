//! In-process mock server helpers shared by unit tests.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::codec::{WireReader, WireWriter};
use crate::error::Result;
use crate::protocol::{status, CommandId, ProtocolVersion};

/// Server side of one accepted connection.
pub(crate) struct ServerConn {
    pub reader: WireReader<BufReader<OwnedReadHalf>>,
    pub writer: BufWriter<OwnedWriteHalf>,
}

impl ServerConn {
    fn new(stream: TcpStream) -> Self {
        let (read, write) = stream.into_split();
        Self {
            reader: WireReader::new(BufReader::new(read)),
            writer: BufWriter::new(write),
        }
    }

    /// Flush one encoded buffer to the client.
    pub async fn send(&mut self, w: WireWriter) -> std::io::Result<()> {
        self.writer.write_all(&w.into_bytes()).await?;
        self.writer.flush().await
    }

    /// Accept the connect handshake, echoing the client's session id or
    /// assigning `4242` on first contact.
    pub async fn serve_handshake(&mut self) -> Result<()> {
        let version = self.reader.read_compressed().await?;
        assert!(ProtocolVersion::from_ordinal(version as u16).is_some());
        let _username = self.reader.read_string().await?;
        let _password = self.reader.read_string().await?;
        let session = self.reader.read_nullable_i64().await?;

        let mut reply = WireWriter::new();
        reply.write_u8(status::NEXT)?;
        reply.write_bool(true)?;
        reply.write_i64(session.unwrap_or(4242))?;
        self.send(reply).await?;
        Ok(())
    }

    /// Read the next command ordinal.
    pub async fn read_command(&mut self) -> Result<CommandId> {
        self.reader
            .read_enum(|ordinal| CommandId::from_ordinal(ordinal))
            .await
    }

    /// Reply with a bare DONE status.
    pub async fn send_done(&mut self) -> std::io::Result<()> {
        let mut reply = WireWriter::new();
        reply.write_u8(status::DONE).unwrap();
        self.send(reply).await
    }
}

/// A localhost TCP server driving test-provided per-connection logic.
pub(crate) struct MockServer {
    pub addr: String,
    pub connections: Arc<AtomicUsize>,
    accept_task: JoinHandle<()>,
}

impl MockServer {
    /// Spawn a server; `handler` runs once per accepted connection with the
    /// zero-based connection index.
    pub async fn spawn<F, Fut>(handler: F) -> Self
    where
        F: Fn(ServerConn, usize) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let connections = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&connections);
        let accept_task = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let index = counter.fetch_add(1, Ordering::SeqCst);
                let handler = handler.clone();
                tokio::spawn(handler(ServerConn::new(stream), index));
            }
        });

        Self {
            addr,
            connections,
            accept_task,
        }
    }

    /// A server that handshakes every connection, answers Ping with DONE,
    /// and otherwise just drains the socket.
    pub async fn handshake_only() -> Self {
        Self::spawn(|mut conn, _| async move {
            if conn.serve_handshake().await.is_err() {
                return;
            }
            loop {
                match conn.read_command().await {
                    Ok(CommandId::Ping) => {
                        if conn.send_done().await.is_err() {
                            return;
                        }
                    }
                    // Park listen connections, drop everything else.
                    Ok(CommandId::Listen) => {
                        std::future::pending::<()>().await;
                    }
                    _ => return,
                }
            }
        })
        .await
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}
