//! One duplex channel to the server.
//!
//! A [`Connection`] is exclusively owned by one in-flight request (or by the
//! cache monitor's long-lived listen loop); exclusivity is enforced
//! structurally by hand-out, never by locking. On any error while the
//! connection is open it is aborted: the transport closes and the connection
//! is never reused.
//!
//! # Connect handshake
//!
//! Every new connection performs one handshake before carrying commands:
//!
//! ```text
//! client → [version: compressed ordinal][username: string][password: string]
//!          [session id: nullable i64]
//! server → NEXT [accepted: bool]
//!            accepted  → [session id: i64]
//!            rejected  → [message: string]        (authentication failure)
//!        | IO_EXCEPTION  [message: string]
//!        | SQL_EXCEPTION [message: string]
//! ```
//!
//! The session id assigned on first contact is resent on every later
//! connection of the same connector.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;

use crate::codec::{WireReader, WireWriter};
use crate::config::ConnectorSpec;
use crate::error::{LinkError, Result};
use crate::protocol::{status, ProtocolVersion, CURRENT_VERSION};
use crate::transport::{self, ReadHalf, WriteHalf};

/// The response-reading side of a connection, as handed to body closures.
pub type SocketReader = WireReader<ReadHalf>;

/// Per-connector session identity, assigned by the server on first contact
/// and resent in every later handshake.
#[derive(Debug, Default)]
pub(crate) struct SessionState {
    id: Mutex<Option<i64>>,
}

impl SessionState {
    pub(crate) fn get(&self) -> Option<i64> {
        *self.id.lock().expect("session lock poisoned")
    }

    pub(crate) fn set(&self, id: i64) {
        *self.id.lock().expect("session lock poisoned") = Some(id);
    }
}

/// Dials and handshakes new connections for one connector.
///
/// Shared by the pool (request traffic) and the cache monitor (its dedicated
/// listen connection), so both see the same session id and the same
/// monotonically increasing connection ids.
#[derive(Debug)]
pub(crate) struct Dialer {
    spec: ConnectorSpec,
    session: std::sync::Arc<SessionState>,
    next_id: AtomicU64,
}

impl Dialer {
    pub(crate) fn new(spec: ConnectorSpec, session: std::sync::Arc<SessionState>) -> Self {
        Self {
            spec,
            session,
            next_id: AtomicU64::new(1),
        }
    }

    pub(crate) async fn dial(&self) -> Result<Connection> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Connection::connect(&self.spec, &self.session, id).await
    }
}

/// One ephemeral duplex exchange channel.
#[derive(Debug)]
pub struct Connection {
    id: u64,
    created: Instant,
    version: ProtocolVersion,
    reader: SocketReader,
    writer: WriteHalf,
}

impl Connection {
    /// Dial and handshake one connection.
    pub(crate) async fn connect(
        spec: &ConnectorSpec,
        session: &SessionState,
        id: u64,
    ) -> Result<Self> {
        let (read, write) = transport::connect(&spec.endpoint, spec.pool.connect_timeout).await?;
        let mut conn = Self {
            id,
            created: Instant::now(),
            version: CURRENT_VERSION,
            reader: WireReader::new(read),
            writer: write,
        };
        conn.handshake(spec, session).await?;
        tracing::debug!(connection = id, endpoint = %spec.endpoint, "connection established");
        Ok(conn)
    }

    async fn handshake(&mut self, spec: &ConnectorSpec, session: &SessionState) -> Result<()> {
        let mut hello = WireWriter::new();
        hello.write_compressed(i64::from(CURRENT_VERSION.ordinal()))?;
        hello.write_string(&spec.username)?;
        hello.write_string(&spec.password)?;
        hello.write_nullable_i64(session.get())?;
        self.send(&hello.into_bytes()).await?;

        match self.reader.read_u8().await? {
            status::NEXT => {
                if self.reader.read_bool().await? {
                    let session_id = self.reader.read_i64().await?;
                    session.set(session_id);
                    Ok(())
                } else {
                    let message = self.reader.read_string().await?;
                    Err(LinkError::Auth(message))
                }
            }
            status::IO_EXCEPTION => Err(LinkError::RemoteIo(self.reader.read_string().await?)),
            status::SQL_EXCEPTION => Err(LinkError::RemoteData(self.reader.read_string().await?)),
            other => Err(LinkError::Protocol(format!(
                "unexpected handshake status byte {other:#04x}"
            ))),
        }
    }

    /// Connection id, unique within one connector.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Protocol version this connection speaks.
    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// Time since the connection was established.
    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }

    /// Write one fully framed request (or ack) and flush it.
    pub async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// The response-reading side.
    pub fn reader(&mut self) -> &mut SocketReader {
        &mut self.reader
    }

    /// Close the transport and hand the cause back for propagation.
    ///
    /// Abort never itself fails: dropping the halves closes the socket
    /// unconditionally.
    pub fn abort(self, cause: LinkError) -> LinkError {
        tracing::debug!(connection = self.id, cause = %cause, "connection aborted");
        cause
    }
}
