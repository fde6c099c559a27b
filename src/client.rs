//! The connector: the client-facing entry point.
//!
//! A [`Connector`] owns one pool of request connections, one table cache per
//! entity type, one delayed-listener dispatcher, and one cache monitor. All
//! commands flow through the request engine here, which pairs each exchange
//! with one pooled connection and decides, per error, between aborting the
//! connection and retrying on a fresh one.
//!
//! # Retry discipline
//!
//! A retryable failure sleeps [`RETRY_DELAYS`]`[attempt - 1]` milliseconds
//! and tries again on a newly acquired connection, up to ten attempts total.
//! Authentication, configuration, and interruption errors are never
//! retried; protocol and decode failures are not retried either, since
//! replaying a framing bug reproduces it.
//!
//! # Invalidating commands
//!
//! A command marked invalidating is followed on the wire by an invalidation
//! list. The list is read before the connection is released and applied
//! after: each named table's cache is cleared first (all tables), then
//! listeners fire, so a listener reading a sibling table never observes
//! pre-invalidation rows.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use crate::codec::WireWriter;
use crate::config::ConnectorSpec;
use crate::connection::{Dialer, SessionState, SocketReader};
use crate::error::{LinkError, Result};
use crate::invalidation::InvalidationList;
use crate::listener::DelayedDispatcher;
use crate::monitor::CacheMonitor;
use crate::pool::ConnectionPool;
use crate::protocol::{status, CommandId, TableId, CURRENT_VERSION};
use crate::table::{AnyTable, Row, Table};

/// Milliseconds slept before retry attempt `n + 2`; attempt 1 runs
/// immediately. The array length bounds total attempts at ten.
pub const RETRY_DELAYS: [u64; 10] = [0, 4, 8, 16, 32, 64, 128, 256, 1024, 3072];

/// Boxed future with a borrowed reader, as returned by response-body
/// closures.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One authenticated client of one server.
///
/// Created with [`Connector::connect`]; always handled through `Arc` so the
/// cache monitor and tables can hold weak references back to it. Dialing is
/// lazy: construction performs no I/O, the first request does.
pub struct Connector {
    spec: ConnectorSpec,
    session: Arc<SessionState>,
    dialer: Arc<Dialer>,
    pool: ConnectionPool,
    tables: Mutex<HashMap<TableId, Arc<dyn AnyTable>>>,
    dispatcher: DelayedDispatcher,
    monitor: CacheMonitor,
    weak_self: Weak<Connector>,
}

impl Connector {
    /// Validate the spec and build a connector. No connection is dialed
    /// until the first request.
    pub fn connect(spec: ConnectorSpec) -> Result<Arc<Self>> {
        spec.validate()?;
        let session = Arc::new(SessionState::default());
        let dialer = Arc::new(Dialer::new(spec.clone(), Arc::clone(&session)));
        let pool = ConnectionPool::new(spec.pool.clone(), Arc::clone(&dialer));
        Ok(Arc::new_cyclic(|weak| Self {
            monitor: CacheMonitor::new(spec.max_idle),
            spec,
            session,
            dialer,
            pool,
            tables: Mutex::new(HashMap::new()),
            dispatcher: DelayedDispatcher::new(),
            weak_self: weak.clone(),
        }))
    }

    /// The spec this connector was built from.
    pub fn spec(&self) -> &ConnectorSpec {
        &self.spec
    }

    /// Session id assigned by the server, `None` before first contact.
    pub fn session_id(&self) -> Option<i64> {
        self.session.get()
    }

    /// The underlying connection pool, for observability.
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// The cache of `R`'s rows, created on first use.
    ///
    /// # Panics
    ///
    /// Panics if `R::TABLE_ID` was previously requested with a different
    /// row type; table ids are one-to-one with entity types.
    pub fn table<R: Row>(&self) -> Arc<Table<R>> {
        let mut tables = self.tables.lock().expect("registry lock poisoned");
        if let Some(existing) = tables.get(&R::TABLE_ID) {
            return Arc::clone(existing)
                .as_any()
                .downcast::<Table<R>>()
                .unwrap_or_else(|_| {
                    panic!(
                        "{} already registered with a different row type",
                        R::TABLE_ID
                    )
                });
        }
        let table = Arc::new(Table::<R>::new(self.weak_self.clone(), self.dispatcher.clone()));
        tables.insert(R::TABLE_ID, Arc::clone(&table) as Arc<dyn AnyTable>);
        table
    }

    /// Liveness probe: one full command round trip.
    pub async fn ping(&self) -> Result<()> {
        self.request_update(CommandId::Ping, |_: &mut WireWriter| Ok(()), true)
            .await
    }

    /// Discard every cached row in every table. Loads happen lazily on the
    /// next read.
    pub fn clear_caches(&self) {
        for table in self.snapshot_tables() {
            table.clear_cache();
        }
    }

    /// Release the server-side session, stop the cache monitor, and shut the
    /// pool down. Further requests fail with [`LinkError::PoolClosed`].
    pub async fn close(&self) {
        // Shut the monitor down first so the release request below cannot
        // restart its listen task.
        self.monitor.shutdown();
        let released = self
            .request_update(CommandId::ReleaseSession, |_: &mut WireWriter| Ok(()), false)
            .await;
        if let Err(e) = released {
            tracing::debug!(error = %e, "session release failed, closing anyway");
        }
        self.pool.close();
    }

    /// Issue a command whose response carries a payload after `NEXT`.
    pub async fn request<T, WB, RB>(
        &self,
        command: CommandId,
        write_body: WB,
        read_body: RB,
        allow_retry: bool,
    ) -> Result<T>
    where
        T: Send,
        WB: Fn(&mut WireWriter) -> Result<()> + Send + Sync,
        RB: for<'a> Fn(&'a mut SocketReader) -> BoxFuture<'a, Result<T>> + Send + Sync,
    {
        let value = self
            .call(command, &write_body, &read_body, None, false, true, allow_retry)
            .await?;
        value.ok_or_else(|| LinkError::Protocol(format!("{command} response carried no payload")))
    }

    /// Like [`request`](Self::request) for a command followed by an
    /// invalidation list.
    pub async fn request_invalidating<T, WB, RB>(
        &self,
        command: CommandId,
        write_body: WB,
        read_body: RB,
        allow_retry: bool,
    ) -> Result<T>
    where
        T: Send,
        WB: Fn(&mut WireWriter) -> Result<()> + Send + Sync,
        RB: for<'a> Fn(&'a mut SocketReader) -> BoxFuture<'a, Result<T>> + Send + Sync,
    {
        let value = self
            .call(command, &write_body, &read_body, None, true, true, allow_retry)
            .await?;
        value.ok_or_else(|| LinkError::Protocol(format!("{command} response carried no payload")))
    }

    /// Issue a command acknowledged by a bare `DONE`.
    pub async fn request_update<WB>(
        &self,
        command: CommandId,
        write_body: WB,
        allow_retry: bool,
    ) -> Result<()>
    where
        WB: Fn(&mut WireWriter) -> Result<()> + Send + Sync,
    {
        self.call(command, &write_body, &read_unit_body, None, false, false, allow_retry)
            .await?;
        Ok(())
    }

    /// Issue a mutation acknowledged by `DONE` and followed by an
    /// invalidation list.
    pub async fn request_update_invalidating<WB>(
        &self,
        command: CommandId,
        write_body: WB,
        allow_retry: bool,
    ) -> Result<()>
    where
        WB: Fn(&mut WireWriter) -> Result<()> + Send + Sync,
    {
        self.call(command, &write_body, &read_unit_body, None, true, false, allow_retry)
            .await?;
        Ok(())
    }

    /// Query returning one boolean.
    pub async fn request_bool<WB>(
        &self,
        command: CommandId,
        write_body: WB,
        allow_retry: bool,
    ) -> Result<bool>
    where
        WB: Fn(&mut WireWriter) -> Result<()> + Send + Sync,
    {
        self.request(command, write_body, read_bool_body, allow_retry)
            .await
    }

    /// Invalidating command returning one boolean.
    pub async fn request_bool_invalidating<WB>(
        &self,
        command: CommandId,
        write_body: WB,
        allow_retry: bool,
    ) -> Result<bool>
    where
        WB: Fn(&mut WireWriter) -> Result<()> + Send + Sync,
    {
        self.request_invalidating(command, write_body, read_bool_body, allow_retry)
            .await
    }

    /// Query returning one `i16`.
    pub async fn request_i16<WB>(
        &self,
        command: CommandId,
        write_body: WB,
        allow_retry: bool,
    ) -> Result<i16>
    where
        WB: Fn(&mut WireWriter) -> Result<()> + Send + Sync,
    {
        self.request(command, write_body, read_i16_body, allow_retry)
            .await
    }

    /// Invalidating command returning one `i16`.
    pub async fn request_i16_invalidating<WB>(
        &self,
        command: CommandId,
        write_body: WB,
        allow_retry: bool,
    ) -> Result<i16>
    where
        WB: Fn(&mut WireWriter) -> Result<()> + Send + Sync,
    {
        self.request_invalidating(command, write_body, read_i16_body, allow_retry)
            .await
    }

    /// Query returning one `i32`.
    pub async fn request_i32<WB>(
        &self,
        command: CommandId,
        write_body: WB,
        allow_retry: bool,
    ) -> Result<i32>
    where
        WB: Fn(&mut WireWriter) -> Result<()> + Send + Sync,
    {
        self.request(command, write_body, read_i32_body, allow_retry)
            .await
    }

    /// Invalidating command returning one `i32` (typically a generated key).
    pub async fn request_i32_invalidating<WB>(
        &self,
        command: CommandId,
        write_body: WB,
        allow_retry: bool,
    ) -> Result<i32>
    where
        WB: Fn(&mut WireWriter) -> Result<()> + Send + Sync,
    {
        self.request_invalidating(command, write_body, read_i32_body, allow_retry)
            .await
    }

    /// Query returning one `i64`.
    pub async fn request_i64<WB>(
        &self,
        command: CommandId,
        write_body: WB,
        allow_retry: bool,
    ) -> Result<i64>
    where
        WB: Fn(&mut WireWriter) -> Result<()> + Send + Sync,
    {
        self.request(command, write_body, read_i64_body, allow_retry)
            .await
    }

    /// Invalidating command returning one `i64`.
    pub async fn request_i64_invalidating<WB>(
        &self,
        command: CommandId,
        write_body: WB,
        allow_retry: bool,
    ) -> Result<i64>
    where
        WB: Fn(&mut WireWriter) -> Result<()> + Send + Sync,
    {
        self.request_invalidating(command, write_body, read_i64_body, allow_retry)
            .await
    }

    /// Query returning one bounded string.
    pub async fn request_string<WB>(
        &self,
        command: CommandId,
        write_body: WB,
        allow_retry: bool,
    ) -> Result<String>
    where
        WB: Fn(&mut WireWriter) -> Result<()> + Send + Sync,
    {
        self.request(command, write_body, read_string_body, allow_retry)
            .await
    }

    /// Invalidating command returning one bounded string.
    pub async fn request_string_invalidating<WB>(
        &self,
        command: CommandId,
        write_body: WB,
        allow_retry: bool,
    ) -> Result<String>
    where
        WB: Fn(&mut WireWriter) -> Result<()> + Send + Sync,
    {
        self.request_invalidating(command, write_body, read_string_body, allow_retry)
            .await
    }

    /// Query returning one long string (u32-length framed).
    pub async fn request_long_string<WB>(
        &self,
        command: CommandId,
        write_body: WB,
        allow_retry: bool,
    ) -> Result<String>
    where
        WB: Fn(&mut WireWriter) -> Result<()> + Send + Sync,
    {
        self.request(command, write_body, read_long_string_body, allow_retry)
            .await
    }

    /// Invalidating command returning one long string.
    pub async fn request_long_string_invalidating<WB>(
        &self,
        command: CommandId,
        write_body: WB,
        allow_retry: bool,
    ) -> Result<String>
    where
        WB: Fn(&mut WireWriter) -> Result<()> + Send + Sync,
    {
        self.request_invalidating(command, write_body, read_long_string_body, allow_retry)
            .await
    }

    /// Load the full contents of `R`'s table: a `NEXT`-prefixed row stream
    /// terminated by `DONE`. An immediate `DONE` is an empty table.
    pub(crate) async fn load_table<R: Row>(&self) -> Result<Vec<R>> {
        let empty: &(dyn Fn() -> Vec<R> + Send + Sync) = &Vec::new;
        let rows = self
            .call(
                CommandId::GetTable,
                &|w: &mut WireWriter| w.write_compressed(i64::from(R::TABLE_ID.0)),
                &|reader: &mut SocketReader| -> BoxFuture<'_, Result<Vec<R>>> {
                    Box::pin(async move {
                        let mut rows = vec![R::read(reader, CURRENT_VERSION).await?];
                        loop {
                            match reader.read_u8().await? {
                                status::NEXT => rows.push(R::read(reader, CURRENT_VERSION).await?),
                                status::DONE => return Ok(rows),
                                other => {
                                    return Err(LinkError::Protocol(format!(
                                        "unexpected row stream status byte {other:#04x}"
                                    )))
                                }
                            }
                        }
                    })
                },
                Some(empty),
                false,
                true,
                true,
            )
            .await?;
        Ok(rows.unwrap_or_default())
    }

    /// Apply one invalidation list: clear every named table's cache, then
    /// fire listeners. The two passes keep listeners from ever reading a
    /// sibling table's pre-invalidation rows.
    pub(crate) fn tables_updated(&self, list: &InvalidationList) {
        if list.is_empty() {
            return;
        }
        let targets: Vec<Arc<dyn AnyTable>> = {
            let tables = self.tables.lock().expect("registry lock poisoned");
            list.tables()
                .iter()
                .filter_map(|id| tables.get(id).map(Arc::clone))
                .collect()
        };
        for table in &targets {
            table.clear_cache();
        }
        for table in &targets {
            table.fire_listeners();
        }
        tracing::debug!(
            invalidated = list.tables().len(),
            cached = targets.len(),
            "invalidation applied"
        );
    }

    /// True if any table has at least one registered listener.
    pub(crate) fn has_any_listeners(&self) -> bool {
        self.snapshot_tables()
            .iter()
            .any(|table| table.has_listeners())
    }

    /// Called by tables when a listener is added: refresh the idle clock
    /// and make sure the monitor is running.
    pub(crate) fn on_listener_activity(&self) {
        self.monitor.touch();
        self.ensure_monitor();
    }

    pub(crate) fn monitor(&self) -> &CacheMonitor {
        &self.monitor
    }

    pub(crate) fn dialer(&self) -> &Arc<Dialer> {
        &self.dialer
    }

    fn ensure_monitor(&self) {
        // Fails to upgrade only inside new_cyclic, before any caller can
        // reach this method.
        if let Some(me) = self.weak_self.upgrade() {
            self.monitor.ensure_started(&me);
        }
    }

    fn snapshot_tables(&self) -> Vec<Arc<dyn AnyTable>> {
        self.tables
            .lock()
            .expect("registry lock poisoned")
            .values()
            .map(Arc::clone)
            .collect()
    }

    /// The request engine. One exchange per attempt, each on its own pooled
    /// connection; the connection is aborted on any mid-exchange error and
    /// released only after a complete response.
    #[allow(clippy::too_many_arguments)]
    async fn call<T, WB, RB>(
        &self,
        command: CommandId,
        write_body: &WB,
        read_body: &RB,
        on_empty: Option<&(dyn Fn() -> T + Send + Sync)>,
        invalidating: bool,
        expect_payload: bool,
        allow_retry: bool,
    ) -> Result<Option<T>>
    where
        T: Send,
        WB: Fn(&mut WireWriter) -> Result<()> + Send + Sync,
        RB: for<'a> Fn(&'a mut SocketReader) -> BoxFuture<'a, Result<T>> + Send + Sync,
    {
        self.monitor.touch();
        self.ensure_monitor();

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self
                .call_once(command, write_body, read_body, on_empty, invalidating, expect_payload)
                .await
            {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if e.is_immediate_fail()
                        || !allow_retry
                        || !e.is_retryable()
                        || attempt >= RETRY_DELAYS.len()
                    {
                        return Err(e);
                    }
                    let delay = Duration::from_millis(RETRY_DELAYS[attempt - 1]);
                    tracing::debug!(
                        command = %command,
                        attempt,
                        delay_ms = RETRY_DELAYS[attempt - 1],
                        error = %e,
                        "retrying after transient failure"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }

    async fn call_once<T, WB, RB>(
        &self,
        command: CommandId,
        write_body: &WB,
        read_body: &RB,
        on_empty: Option<&(dyn Fn() -> T + Send + Sync)>,
        invalidating: bool,
        expect_payload: bool,
    ) -> Result<Option<T>>
    where
        T: Send,
        WB: Fn(&mut WireWriter) -> Result<()> + Send + Sync,
        RB: for<'a> Fn(&'a mut SocketReader) -> BoxFuture<'a, Result<T>> + Send + Sync,
    {
        let mut conn = self.pool.acquire().await?;

        let mut request = WireWriter::new();
        request.write_enum_ordinal(command.ordinal())?;
        write_body(&mut request)?;
        if let Err(e) = conn.send(&request.into_bytes()).await {
            return Err(conn.abort(e));
        }

        let status_byte = match conn.reader().read_u8().await {
            Ok(byte) => byte,
            Err(e) => return Err(conn.abort(e)),
        };

        let mut remote_error = None;
        let value = match status_byte {
            status::NEXT if expect_payload => match read_body(conn.reader()).await {
                Ok(v) => Some(v),
                Err(e) => return Err(conn.abort(e)),
            },
            status::DONE if !expect_payload => None,
            status::DONE if on_empty.is_some() => on_empty.map(|f| f()),
            status::IO_EXCEPTION | status::SQL_EXCEPTION => {
                let message = match conn.reader().read_string().await {
                    Ok(m) => m,
                    Err(e) => return Err(conn.abort(e)),
                };
                remote_error = Some(if status_byte == status::IO_EXCEPTION {
                    LinkError::RemoteIo(message)
                } else {
                    LinkError::RemoteData(message)
                });
                None
            }
            other => {
                return Err(conn.abort(LinkError::Protocol(format!(
                    "unexpected status byte {other:#04x} for {command}"
                ))))
            }
        };

        // A server-reported failure still completes the exchange in frame;
        // the connection is clean and the error carries no list.
        let invalidations = if invalidating && remote_error.is_none() {
            match InvalidationList::read(conn.reader()).await {
                Ok(list) => Some(list),
                Err(e) => return Err(conn.abort(e)),
            }
        } else {
            None
        };

        conn.release();

        if let Some(err) = remote_error {
            return Err(err);
        }
        if let Some(list) = invalidations {
            self.tables_updated(&list);
        }
        Ok(value)
    }
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("spec", &self.spec)
            .field("session", &self.session.get())
            .field("outstanding", &self.pool.outstanding())
            .finish()
    }
}

fn read_unit_body(_reader: &mut SocketReader) -> BoxFuture<'_, Result<()>> {
    Box::pin(async { Ok(()) })
}

fn read_bool_body(reader: &mut SocketReader) -> BoxFuture<'_, Result<bool>> {
    Box::pin(async move { reader.read_bool().await })
}

fn read_i16_body(reader: &mut SocketReader) -> BoxFuture<'_, Result<i16>> {
    Box::pin(async move { reader.read_i16().await })
}

fn read_i32_body(reader: &mut SocketReader) -> BoxFuture<'_, Result<i32>> {
    Box::pin(async move { reader.read_i32().await })
}

fn read_i64_body(reader: &mut SocketReader) -> BoxFuture<'_, Result<i64>> {
    Box::pin(async move { reader.read_i64().await })
}

fn read_string_body(reader: &mut SocketReader) -> BoxFuture<'_, Result<String>> {
    Box::pin(async move { reader.read_string().await })
}

fn read_long_string_body(reader: &mut SocketReader) -> BoxFuture<'_, Result<String>> {
    Box::pin(async move { reader.read_long_string().await })
}
