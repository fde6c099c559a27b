//! Cache monitor: the out-of-band invalidation push channel.
//!
//! One background task per connector keeps a dedicated listen connection
//! open while the connector is live: either a table has registered listeners
//! or a request ran within the idle window. The server pushes
//! `(is_synchronous, invalidation list)` frames over it; synchronous frames
//! are acknowledged before the next read, which is how the server paces
//! slow clients.
//!
//! When the liveness condition fails the task clears every table cache and
//! exits: without the listen channel, cached rows could go stale silently.
//! The task restarts on the next request or listener registration.

use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use crate::client::{Connector, RETRY_DELAYS};
use crate::codec::WireWriter;
use crate::connection::Connection;
use crate::error::Result;
use crate::invalidation::InvalidationList;
use crate::protocol::{status, CommandId};

/// A listen session that stayed up at least this long resets the
/// reconnect backoff; shorter sessions count as consecutive failures.
const BACKOFF_RESET_AFTER: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MonitorState {
    Stopped,
    Running,
    /// Terminal: the connector was closed. The task never restarts.
    ShutDown,
}

/// Lifecycle and idle accounting for one connector's listen task.
pub(crate) struct CacheMonitor {
    machine: Mutex<MonitorState>,
    last_activity: Mutex<Instant>,
    max_idle: Duration,
}

impl CacheMonitor {
    pub(crate) fn new(max_idle: Duration) -> Self {
        Self {
            machine: Mutex::new(MonitorState::Stopped),
            last_activity: Mutex::new(Instant::now()),
            max_idle,
        }
    }

    /// Record connector activity (a request or listener registration).
    pub(crate) fn touch(&self) {
        *self.last_activity.lock().expect("monitor lock poisoned") = Instant::now();
    }

    /// Time since the last recorded activity.
    pub(crate) fn idle_for(&self) -> Duration {
        self.last_activity
            .lock()
            .expect("monitor lock poisoned")
            .elapsed()
    }

    /// The liveness condition: not shut down, and either listeners exist or
    /// the idle window is open.
    pub(crate) fn live(&self, has_listeners: bool) -> bool {
        if *self.machine.lock().expect("monitor lock poisoned") == MonitorState::ShutDown {
            return false;
        }
        has_listeners || self.idle_for() < self.max_idle
    }

    pub(crate) fn is_running(&self) -> bool {
        *self.machine.lock().expect("monitor lock poisoned") == MonitorState::Running
    }

    /// Start the listen task if it is not already running. Idempotent, and
    /// a no-op after [`shutdown`](Self::shutdown).
    pub(crate) fn ensure_started(&self, connector: &Arc<Connector>) {
        let mut machine = self.machine.lock().expect("monitor lock poisoned");
        if *machine != MonitorState::Stopped {
            return;
        }
        *machine = MonitorState::Running;
        drop(machine);
        tracing::debug!("cache monitor starting");
        tokio::spawn(run(Arc::downgrade(connector)));
    }

    /// Terminally stop the monitor: the running listen task exits at its
    /// next liveness check and no future activity restarts it.
    pub(crate) fn shutdown(&self) {
        *self.machine.lock().expect("monitor lock poisoned") = MonitorState::ShutDown;
    }

    fn set_stopped(&self) {
        let mut machine = self.machine.lock().expect("monitor lock poisoned");
        if *machine == MonitorState::Running {
            *machine = MonitorState::Stopped;
        }
    }

    /// How often a blocked listen read re-checks the liveness condition.
    fn check_interval(&self) -> Duration {
        (self.max_idle / 4).clamp(Duration::from_millis(50), Duration::from_secs(60))
    }
}

/// Reconnecting listen loop. Holds no strong connector reference across
/// waits so a dropped connector is never kept alive by its own monitor.
async fn run(weak: Weak<Connector>) {
    let mut failures = 0usize;
    loop {
        let Some(connector) = weak.upgrade() else {
            return;
        };
        if !connector.monitor().live(connector.has_any_listeners()) {
            tracing::info!("cache monitor idle with no listeners, clearing caches");
            connector.clear_caches();
            connector.monitor().set_stopped();
            return;
        }
        let dialer = Arc::clone(connector.dialer());
        drop(connector);

        match dialer.dial().await {
            Ok(mut conn) => {
                let opened = Instant::now();
                match listen(&weak, &mut conn).await {
                    Ok(()) => failures = 0,
                    Err(e) => {
                        // A session that lasted a while was healthy; only
                        // rapid-fire drops escalate the backoff.
                        if opened.elapsed() >= BACKOFF_RESET_AFTER {
                            failures = 0;
                        }
                        failures = (failures + 1).min(RETRY_DELAYS.len() - 1);
                        tracing::warn!(error = %e, "listen connection failed");
                    }
                }
            }
            Err(e) => {
                failures = (failures + 1).min(RETRY_DELAYS.len() - 1);
                tracing::warn!(error = %e, "listen connect failed");
            }
        }
        tokio::time::sleep(Duration::from_millis(RETRY_DELAYS[failures])).await;
    }
}

/// Drive one listen connection until it fails or the connector goes away.
///
/// Returns `Ok(())` on an orderly stop (connector dropped or no longer
/// live); the caller then re-evaluates without treating it as a failure.
async fn listen(weak: &Weak<Connector>, conn: &mut Connection) -> Result<()> {
    let check_interval = match weak.upgrade() {
        Some(connector) => connector.monitor().check_interval(),
        None => return Ok(()),
    };

    let mut request = WireWriter::new();
    request.write_enum_ordinal(CommandId::Listen.ordinal())?;
    conn.send(&request.into_bytes()).await?;
    tracing::debug!(connection = conn.id(), "listen channel open");

    loop {
        // Block on the next frame, waking periodically to re-check liveness.
        let is_synchronous = loop {
            match tokio::time::timeout(check_interval, conn.reader().read_bool()).await {
                Ok(read) => break read?,
                Err(_) => {
                    let Some(connector) = weak.upgrade() else {
                        return Ok(());
                    };
                    if !connector.monitor().live(connector.has_any_listeners()) {
                        return Ok(());
                    }
                }
            }
        };

        let list = InvalidationList::read(conn.reader()).await?;
        let Some(connector) = weak.upgrade() else {
            return Ok(());
        };
        tracing::debug!(tables = list.tables().len(), "push invalidation received");
        connector.tables_updated(&list);
        drop(connector);

        if is_synchronous {
            // The server withholds the next frame until this arrives.
            conn.send(&[status::DONE]).await?;
        }
    }
}
