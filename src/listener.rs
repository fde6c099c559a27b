//! Table listener dispatch.
//!
//! Two delivery modes per registration:
//! - **immediate** (`delay == 0`): one spawned task per listener per event,
//!   never on the thread applying the invalidation;
//! - **delayed** (`delay > 0`): bursts coalesce to at most one pending
//!   notification per registration, fired `delay` after the *first*
//!   invalidation of the window.
//!
//! Delayed notifications are driven by one per-connector dispatcher task.
//! It is created lazily on the first delayed registration, wakes at the
//! nearest deadline across all registrations, and terminates once the last
//! delayed registration is removed. Its lifecycle is an explicit state
//! machine guarded by one lock, with idempotent start/stop.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::protocol::TableId;

/// Callback invoked after a table's cache has been cleared.
///
/// Implementations must not block for long: immediate listeners share the
/// runtime's worker pool and delayed listeners share one dispatcher task.
pub trait TableListener: Send + Sync + 'static {
    fn table_updated(&self, table: TableId);
}

static NEXT_REGISTRATION_ID: AtomicU64 = AtomicU64::new(1);

/// Allocate a process-wide unique listener registration id.
pub(crate) fn next_registration_id() -> u64 {
    NEXT_REGISTRATION_ID.fetch_add(1, Ordering::Relaxed)
}

/// Run an immediate listener on the shared worker pool.
pub(crate) fn fire_immediate(listener: Arc<dyn TableListener>, table: TableId) {
    tokio::spawn(async move {
        listener.table_updated(table);
    });
}

/// Dispatcher task lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DispatcherState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

struct PendingFire {
    deadline: Instant,
    listener: Arc<dyn TableListener>,
    table: TableId,
}

struct DispatchState {
    machine: DispatcherState,
    /// Live delayed registrations; the task exits when this reaches zero.
    registered: usize,
    /// At most one pending notification per registration id.
    pending: HashMap<u64, PendingFire>,
}

/// Coalescing dispatcher for delayed listeners of one connector.
#[derive(Clone)]
pub(crate) struct DelayedDispatcher {
    inner: Arc<DispatchInner>,
}

struct DispatchInner {
    state: Mutex<DispatchState>,
    notify: Notify,
}

impl DelayedDispatcher {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(DispatchInner {
                state: Mutex::new(DispatchState {
                    machine: DispatcherState::Stopped,
                    registered: 0,
                    pending: HashMap::new(),
                }),
                notify: Notify::new(),
            }),
        }
    }

    /// Account for one new delayed registration, starting the task if it is
    /// not running. Idempotent with respect to the task: at most one runs.
    pub(crate) fn register(&self) {
        let mut state = self.inner.state.lock().expect("dispatcher lock poisoned");
        state.registered += 1;
        if state.machine == DispatcherState::Stopped {
            state.machine = DispatcherState::Starting;
            drop(state);
            let inner = Arc::clone(&self.inner);
            tokio::spawn(run(inner));
        }
    }

    /// Remove one delayed registration and discard its pending notification.
    pub(crate) fn unregister(&self, registration: u64) {
        let mut state = self.inner.state.lock().expect("dispatcher lock poisoned");
        state.registered = state.registered.saturating_sub(1);
        state.pending.remove(&registration);
        drop(state);
        self.inner.notify.notify_one();
    }

    /// Record an invalidation for a delayed registration.
    ///
    /// If a notification is already pending for it, the event collapses into
    /// that one: the deadline stays anchored at the first invalidation of
    /// the window.
    pub(crate) fn schedule(
        &self,
        registration: u64,
        listener: Arc<dyn TableListener>,
        table: TableId,
        delay: Duration,
    ) {
        let mut state = self.inner.state.lock().expect("dispatcher lock poisoned");
        state
            .pending
            .entry(registration)
            .or_insert_with(|| PendingFire {
                deadline: Instant::now() + delay,
                listener,
                table,
            });
        drop(state);
        self.inner.notify.notify_one();
    }

    #[cfg(test)]
    pub(crate) fn machine(&self) -> DispatcherState {
        self.inner.state.lock().unwrap().machine
    }

    #[cfg(test)]
    pub(crate) fn pending_count(&self) -> usize {
        self.inner.state.lock().unwrap().pending.len()
    }
}

async fn run(inner: Arc<DispatchInner>) {
    {
        let mut state = inner.state.lock().expect("dispatcher lock poisoned");
        state.machine = DispatcherState::Running;
    }
    tracing::debug!("delayed dispatcher started");

    loop {
        let nearest = {
            let mut state = inner.state.lock().expect("dispatcher lock poisoned");
            if state.registered == 0 {
                state.machine = DispatcherState::Stopping;
                state.pending.clear();
                state.machine = DispatcherState::Stopped;
                tracing::debug!("delayed dispatcher stopped");
                return;
            }
            state.pending.values().map(|p| p.deadline).min()
        };

        match nearest {
            Some(deadline) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(deadline) => {}
                    _ = inner.notify.notified() => {}
                }
            }
            None => inner.notify.notified().await,
        }

        let now = Instant::now();
        let due: Vec<PendingFire> = {
            let mut state = inner.state.lock().expect("dispatcher lock poisoned");
            let ids: Vec<u64> = state
                .pending
                .iter()
                .filter(|(_, p)| p.deadline <= now)
                .map(|(&id, _)| id)
                .collect();
            ids.into_iter()
                .filter_map(|id| state.pending.remove(&id))
                .collect()
        };

        for fire in due {
            fire.listener.table_updated(fire.table);
        }
    }
}
