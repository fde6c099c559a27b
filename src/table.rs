//! Per-entity-type cache tables.
//!
//! The core never sees entity-specific fields. Each entity type implements
//! [`Row`] — stable table id, primary key extraction, and version-gated wire
//! codec — and gets a [`Table`] handle: a lazily populated full-table cache
//! with listener registration. Invalidation always discards the whole cached
//! set for a table, never partial rows.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use tokio::io::AsyncRead;

use crate::client::Connector;
use crate::codec::{WireReader, WireWriter};
use crate::error::{LinkError, Result};
use crate::listener::{fire_immediate, next_registration_id, DelayedDispatcher, TableListener};
use crate::protocol::{ProtocolVersion, TableId};

/// Capability interface every cached entity type supplies.
///
/// `read`/`write` must consult `version` for every field that is not present
/// in all supported protocol versions (see
/// [`ProtocolVersion::includes`]); the gate calls are the single source of
/// backward-compatibility truth for that entity.
pub trait Row: Clone + Send + Sync + 'static {
    /// Primary key type.
    type Key: Eq + Hash + Clone + Send + Sync + 'static;

    /// Stable table id; part of the wire format.
    const TABLE_ID: TableId;

    /// Extract the primary key.
    fn key(&self) -> Self::Key;

    /// Decode one row at the given protocol version.
    fn read<S: AsyncRead + Unpin + Send>(
        reader: &mut WireReader<S>,
        version: ProtocolVersion,
    ) -> impl Future<Output = Result<Self>> + Send;

    /// Encode one row at the given protocol version.
    fn write(&self, writer: &mut WireWriter, version: ProtocolVersion) -> Result<()>;

    /// Column names, for diagnostics and generic tooling.
    fn columns() -> &'static [&'static str];
}

#[derive(Clone)]
struct Registration {
    id: u64,
    listener: Arc<dyn TableListener>,
    delay: Duration,
}

/// Cache of one entity type's rows, keyed by primary key.
pub struct Table<R: Row> {
    connector: Weak<Connector>,
    dispatcher: DelayedDispatcher,
    /// `None` = not loaded. Lock scoped to this table only, distinct from
    /// the pool lock, so invalidation never contends with connection
    /// traffic.
    cache: RwLock<Option<HashMap<R::Key, R>>>,
    listeners: Mutex<Vec<Registration>>,
}

impl<R: Row> Table<R> {
    pub(crate) fn new(connector: Weak<Connector>, dispatcher: DelayedDispatcher) -> Self {
        Self {
            connector,
            dispatcher,
            cache: RwLock::new(None),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Stable id of this table.
    pub fn table_id(&self) -> TableId {
        R::TABLE_ID
    }

    /// Fetch one row by primary key, populating the cache on first use.
    pub async fn get(&self, key: &R::Key) -> Result<Option<R>> {
        self.ensure_loaded().await?;
        let cache = self.cache.read().expect("table lock poisoned");
        Ok(cache.as_ref().and_then(|map| map.get(key).cloned()))
    }

    /// Snapshot of every row, populating the cache on first use.
    pub async fn rows(&self) -> Result<Vec<R>> {
        self.ensure_loaded().await?;
        let cache = self.cache.read().expect("table lock poisoned");
        Ok(cache
            .as_ref()
            .map(|map| map.values().cloned().collect())
            .unwrap_or_default())
    }

    /// Number of rows, populating the cache on first use.
    pub async fn size(&self) -> Result<usize> {
        self.ensure_loaded().await?;
        let cache = self.cache.read().expect("table lock poisoned");
        Ok(cache.as_ref().map(HashMap::len).unwrap_or(0))
    }

    /// Row count without triggering a load; `None` while unloaded.
    pub fn cached_size(&self) -> Option<usize> {
        self.cache
            .read()
            .expect("table lock poisoned")
            .as_ref()
            .map(HashMap::len)
    }

    /// Discard every cached row. The next read reloads lazily.
    pub fn clear_cache(&self) {
        *self.cache.write().expect("table lock poisoned") = None;
    }

    /// Register a listener fired after this table's cache is invalidated.
    ///
    /// `delay == 0` fires immediately and concurrently per event; a positive
    /// delay coalesces bursts to one notification per window.
    pub fn add_listener(&self, listener: Arc<dyn TableListener>, delay: Duration) {
        let registration = Registration {
            id: next_registration_id(),
            listener,
            delay,
        };
        if !delay.is_zero() {
            self.dispatcher.register();
        }
        self.listeners
            .lock()
            .expect("table lock poisoned")
            .push(registration);
        if let Some(connector) = self.connector.upgrade() {
            connector.on_listener_activity();
        }
    }

    /// Remove a previously registered listener (matched by identity).
    /// Removing an unknown listener is a no-op.
    pub fn remove_listener(&self, listener: &Arc<dyn TableListener>) {
        let mut listeners = self.listeners.lock().expect("table lock poisoned");
        if let Some(index) = listeners
            .iter()
            .position(|reg| Arc::ptr_eq(&reg.listener, listener))
        {
            let removed = listeners.remove(index);
            drop(listeners);
            if !removed.delay.is_zero() {
                self.dispatcher.unregister(removed.id);
            }
        }
    }

    async fn ensure_loaded(&self) -> Result<()> {
        if self
            .cache
            .read()
            .expect("table lock poisoned")
            .is_some()
        {
            return Ok(());
        }
        let connector = self
            .connector
            .upgrade()
            .ok_or(LinkError::PoolClosed)?;
        let rows = connector.load_table::<R>().await?;
        let map: HashMap<R::Key, R> = rows.into_iter().map(|row| (row.key(), row)).collect();
        // Two racing loads both observed an empty cache; either result is a
        // fresh server snapshot, last writer wins.
        *self.cache.write().expect("table lock poisoned") = Some(map);
        Ok(())
    }
}

impl<R: Row> Drop for Table<R> {
    fn drop(&mut self) {
        let listeners = self.listeners.lock().expect("table lock poisoned");
        for reg in listeners.iter().filter(|reg| !reg.delay.is_zero()) {
            self.dispatcher.unregister(reg.id);
        }
    }
}

/// Type-erased view of a [`Table`] held in the connector's registry.
pub(crate) trait AnyTable: Send + Sync {
    fn table_id(&self) -> TableId;
    fn clear_cache(&self);
    fn fire_listeners(&self);
    fn has_listeners(&self) -> bool;
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<R: Row> AnyTable for Table<R> {
    fn table_id(&self) -> TableId {
        R::TABLE_ID
    }

    fn clear_cache(&self) {
        Table::clear_cache(self);
    }

    fn fire_listeners(&self) {
        let registrations: Vec<Registration> = self
            .listeners
            .lock()
            .expect("table lock poisoned")
            .clone();
        for reg in registrations {
            if reg.delay.is_zero() {
                fire_immediate(reg.listener, R::TABLE_ID);
            } else {
                self.dispatcher
                    .schedule(reg.id, reg.listener, R::TABLE_ID, reg.delay);
            }
        }
    }

    fn has_listeners(&self) -> bool {
        !self
            .listeners
            .lock()
            .expect("table lock poisoned")
            .is_empty()
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
