//! Process-wide connector sharing.
//!
//! Connectors are expensive to duplicate: each carries a pool, a session,
//! and a cache monitor. The registry hands out one shared [`Connector`] per
//! distinct [`ConnectorSpec`], so two callers configured identically share
//! connections and caches instead of competing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::client::Connector;
use crate::config::ConnectorSpec;
use crate::error::Result;

/// Registry of live connectors, keyed by their full spec.
///
/// Keying on the whole spec means two specs differing in any parameter
/// (even a pool size) get separate connectors; only exact duplicates share.
#[derive(Default)]
pub struct ConnectorRegistry {
    connectors: Mutex<HashMap<ConnectorSpec, Arc<Connector>>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the connector for `spec`, creating it on first request.
    pub fn get(&self, spec: &ConnectorSpec) -> Result<Arc<Connector>> {
        let mut connectors = self.connectors.lock().expect("registry lock poisoned");
        if let Some(existing) = connectors.get(spec) {
            return Ok(Arc::clone(existing));
        }
        let connector = Connector::connect(spec.clone())?;
        connectors.insert(spec.clone(), Arc::clone(&connector));
        tracing::debug!(endpoint = %spec.endpoint, username = %spec.username, "connector created");
        Ok(connector)
    }

    /// Drop the registry's reference to `spec`'s connector, closing it once
    /// all other holders release theirs.
    pub fn remove(&self, spec: &ConnectorSpec) -> Option<Arc<Connector>> {
        self.connectors
            .lock()
            .expect("registry lock poisoned")
            .remove(spec)
    }

    /// Number of live connectors.
    pub fn len(&self) -> usize {
        self.connectors.lock().expect("registry lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
