//! Bounded connection pool.
//!
//! The pool bounds simultaneous connections with a semaphore: at capacity,
//! `acquire` waits for a release/abort cycle instead of dialing without
//! bound. Clean releases are recycled through an idle list; a connection
//! past its maximum age is discarded rather than returned, cycling traffic
//! through fresh connections.
//!
//! Accounting rules:
//! - a permit is taken exactly once per hand-out and returned exactly once,
//!   whether the guard is released, aborted, or just dropped;
//! - release after abort cannot happen: both consume the guard;
//! - an aborted connection is closed and never handed out again.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::PoolConfig;
use crate::connection::{Connection, Dialer};
use crate::error::{LinkError, Result};

/// Bounded pool of server connections.
#[derive(Debug, Clone)]
pub struct ConnectionPool {
    shared: Arc<PoolShared>,
}

#[derive(Debug)]
struct PoolShared {
    cfg: PoolConfig,
    dialer: Arc<Dialer>,
    semaphore: Arc<Semaphore>,
    idle: Mutex<VecDeque<Connection>>,
    outstanding: AtomicUsize,
    total_dialed: AtomicU64,
}

impl ConnectionPool {
    pub(crate) fn new(cfg: PoolConfig, dialer: Arc<Dialer>) -> Self {
        let semaphore = Arc::new(Semaphore::new(cfg.max_connections));
        Self {
            shared: Arc::new(PoolShared {
                cfg,
                dialer,
                semaphore,
                idle: Mutex::new(VecDeque::new()),
                outstanding: AtomicUsize::new(0),
                total_dialed: AtomicU64::new(0),
            }),
        }
    }

    /// Take exclusive ownership of one connection.
    ///
    /// Waits while all slots are outstanding; fails with
    /// [`LinkError::Timeout`] after the configured acquire timeout, which is
    /// the pool-level replacement for a per-call waiter bound. An idle
    /// connection younger than `max_age` is reused, anything older is
    /// discarded on the spot, and a fresh connection is dialed only when no
    /// reusable one remains.
    pub async fn acquire(&self) -> Result<PooledConnection> {
        let shared = &self.shared;
        let permit = tokio::time::timeout(
            shared.cfg.acquire_timeout,
            Arc::clone(&shared.semaphore).acquire_owned(),
        )
        .await
        .map_err(|_| LinkError::Timeout("pool acquire"))?
        .map_err(|_| LinkError::PoolClosed)?;

        let reusable = loop {
            let popped = shared.idle.lock().expect("pool lock poisoned").pop_front();
            match popped {
                Some(conn) if conn.age() < shared.cfg.max_age => break Some(conn),
                Some(conn) => {
                    tracing::debug!(connection = conn.id(), "discarding aged-out connection");
                    drop(conn);
                }
                None => break None,
            }
        };

        let conn = match reusable {
            Some(conn) => conn,
            None => {
                // Dial failure drops the permit, freeing the slot.
                let conn = shared.dialer.dial().await?;
                shared.total_dialed.fetch_add(1, Ordering::Relaxed);
                conn
            }
        };

        shared.outstanding.fetch_add(1, Ordering::AcqRel);
        Ok(PooledConnection {
            conn: Some(conn),
            _permit: permit,
            shared: Arc::clone(shared),
        })
    }

    /// Connections currently handed out.
    pub fn outstanding(&self) -> usize {
        self.shared.outstanding.load(Ordering::Acquire)
    }

    /// Connections sitting in the idle list.
    pub fn idle(&self) -> usize {
        self.shared.idle.lock().expect("pool lock poisoned").len()
    }

    /// Connections dialed over the pool's lifetime (excludes reuse).
    pub fn total_dialed(&self) -> u64 {
        self.shared.total_dialed.load(Ordering::Relaxed)
    }

    /// Shut the pool down: pending and future `acquire` calls fail with
    /// [`LinkError::PoolClosed`], idle connections are closed.
    pub fn close(&self) {
        self.shared.semaphore.close();
        self.shared.idle.lock().expect("pool lock poisoned").clear();
    }
}

/// Exclusive hand-out of one connection.
///
/// Exactly one of [`release`](Self::release) or [`abort`](Self::abort)
/// should be called; a guard dropped without either closes its connection
/// (treated as an abort) and still returns its slot.
#[derive(Debug)]
pub struct PooledConnection {
    conn: Option<Connection>,
    _permit: OwnedSemaphorePermit,
    shared: Arc<PoolShared>,
}

impl PooledConnection {
    /// Return a clean connection for reuse.
    pub fn release(mut self) {
        if let Some(conn) = self.conn.take() {
            if conn.age() < self.shared.cfg.max_age {
                self.shared
                    .idle
                    .lock()
                    .expect("pool lock poisoned")
                    .push_back(conn);
            } else {
                tracing::debug!(connection = conn.id(), "not recycling aged-out connection");
            }
        }
        // Dropping self returns the permit and fixes the outstanding count.
    }

    /// Close the connection and hand the cause back for propagation.
    ///
    /// Never itself fails; the slot frees when the guard drops.
    pub fn abort(mut self, cause: LinkError) -> LinkError {
        match self.conn.take() {
            Some(conn) => conn.abort(cause),
            None => cause,
        }
    }
}

impl std::ops::Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // Invariant: `conn` is Some for the guard's whole externally
        // observable life; release/abort consume self.
        self.conn.as_ref().expect("connection already consumed")
    }
}

impl std::ops::DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().expect("connection already consumed")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            tracing::debug!(
                connection = conn.id(),
                "guard dropped without release, closing connection"
            );
        }
        self.shared.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::config::ConnectorSpec;
    use crate::connection::SessionState;
    use crate::testutil::MockServer;

    async fn pool_against(server: &MockServer, cfg: PoolConfig) -> ConnectionPool {
        let mut spec = ConnectorSpec::new(server.addr.clone(), "app", "pw");
        spec.pool = cfg.clone();
        let dialer = Arc::new(Dialer::new(spec, Arc::new(SessionState::default())));
        ConnectionPool::new(cfg, dialer)
    }

    fn small_pool_cfg(max_connections: usize) -> PoolConfig {
        PoolConfig {
            max_connections,
            max_age: Duration::from_secs(60),
            acquire_timeout: Duration::from_millis(500),
            connect_timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_acquire_release_recycles() {
        let server = MockServer::handshake_only().await;
        let pool = pool_against(&server, small_pool_cfg(2)).await;

        let conn = pool.acquire().await.unwrap();
        let first_id = conn.id();
        assert_eq!(pool.outstanding(), 1);
        conn.release();

        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.idle(), 1);

        let again = pool.acquire().await.unwrap();
        assert_eq!(again.id(), first_id, "clean release should be recycled");
        assert_eq!(pool.total_dialed(), 1);
        again.release();
    }

    #[tokio::test]
    async fn test_abort_never_rehanded_out() {
        let server = MockServer::handshake_only().await;
        let pool = pool_against(&server, small_pool_cfg(1)).await;

        let conn = pool.acquire().await.unwrap();
        let aborted_id = conn.id();
        let cause = conn.abort(LinkError::UnexpectedEof);
        assert!(matches!(cause, LinkError::UnexpectedEof));
        assert_eq!(pool.outstanding(), 0, "abort returns the slot");
        assert_eq!(pool.idle(), 0);

        let next = pool.acquire().await.unwrap();
        assert_ne!(next.id(), aborted_id);
        next.release();
    }

    #[tokio::test]
    async fn test_acquire_blocks_at_capacity() {
        let server = MockServer::handshake_only().await;
        let pool = pool_against(&server, small_pool_cfg(1)).await;

        let held = pool.acquire().await.unwrap();

        let contended = pool.clone();
        let waiter = tokio::spawn(async move {
            let started = std::time::Instant::now();
            let conn = contended.acquire().await.unwrap();
            conn.release();
            started.elapsed()
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        held.release();

        let waited = waiter.await.unwrap();
        assert!(
            waited >= Duration::from_millis(90),
            "second acquire should have blocked, waited only {waited:?}"
        );
    }

    #[tokio::test]
    async fn test_acquire_timeout_when_exhausted() {
        let server = MockServer::handshake_only().await;
        let mut cfg = small_pool_cfg(1);
        cfg.acquire_timeout = Duration::from_millis(50);
        let pool = pool_against(&server, cfg).await;

        let _held = pool.acquire().await.unwrap();
        let result = pool.acquire().await;
        assert!(matches!(result, Err(LinkError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_aged_out_connection_not_reused() {
        let server = MockServer::handshake_only().await;
        let mut cfg = small_pool_cfg(1);
        cfg.max_age = Duration::from_millis(50);
        let pool = pool_against(&server, cfg).await;

        let conn = pool.acquire().await.unwrap();
        let first_id = conn.id();
        conn.release();

        tokio::time::sleep(Duration::from_millis(80)).await;

        let fresh = pool.acquire().await.unwrap();
        assert_ne!(fresh.id(), first_id);
        assert_eq!(pool.total_dialed(), 2);
        fresh.release();
    }

    #[tokio::test]
    async fn test_drop_without_release_returns_slot() {
        let server = MockServer::handshake_only().await;
        let pool = pool_against(&server, small_pool_cfg(1)).await;

        {
            let _conn = pool.acquire().await.unwrap();
            assert_eq!(pool.outstanding(), 1);
        }
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.idle(), 0, "dropped guard closes its connection");

        // The slot is usable again.
        pool.acquire().await.unwrap().release();
    }

    #[tokio::test]
    async fn test_closed_pool_rejects_acquire() {
        let server = MockServer::handshake_only().await;
        let pool = pool_against(&server, small_pool_cfg(1)).await;
        pool.close();
        assert!(matches!(pool.acquire().await, Err(LinkError::PoolClosed)));
    }
}
