//! Connector configuration.
//!
//! A [`ConnectorSpec`] names one authenticated identity + endpoint plus its
//! pool parameters. Two specs that compare equal describe the same connector;
//! the [`ConnectorRegistry`](crate::registry::ConnectorRegistry) hands out one
//! shared connector per distinct spec.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LinkError, Result};

/// Sizing and lifetime parameters for the connection pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Upper bound on simultaneous connections. At capacity, new requests
    /// wait rather than dial.
    pub max_connections: usize,
    /// A connection older than this is discarded instead of being returned
    /// to the idle list, cycling traffic through fresh connections.
    pub max_age: Duration,
    /// How long `acquire` may wait for a slot before failing with a timeout.
    pub acquire_timeout: Duration,
    /// TCP connect timeout for each new connection.
    pub connect_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 8,
            max_age: Duration::from_secs(10 * 60),
            acquire_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(15),
        }
    }
}

/// One authenticated identity + endpoint and its connection parameters.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectorSpec {
    /// Server address as `host:port`.
    pub endpoint: String,
    /// Identity presented in the connect handshake.
    pub username: String,
    /// Credential presented in the connect handshake. Redacted from `Debug`.
    pub password: String,
    /// Connection pool parameters.
    #[serde(default)]
    pub pool: PoolConfig,
    /// How long the cache monitor keeps the listen connection alive after
    /// the last request when no table has listeners.
    #[serde(default = "default_max_idle")]
    pub max_idle: Duration,
}

fn default_max_idle() -> Duration {
    Duration::from_secs(90 * 60)
}

impl ConnectorSpec {
    /// Build a spec with default pool parameters.
    pub fn new(
        endpoint: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            username: username.into(),
            password: password.into(),
            pool: PoolConfig::default(),
            max_idle: default_max_idle(),
        }
    }

    /// Parse a spec from its JSON form.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| LinkError::Config(format!("invalid spec JSON: {e}")))
    }

    /// Serialize the spec to JSON. The password is included; treat the
    /// output as a secret.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| LinkError::Config(format!("spec to JSON: {e}")))
    }

    /// Reject specs that could never connect. Configuration errors are
    /// classified immediate-fail: the retry loop will not mask them.
    pub fn validate(&self) -> Result<()> {
        if self.endpoint.is_empty() || !self.endpoint.contains(':') {
            return Err(LinkError::Config(format!(
                "endpoint {:?} is not a host:port address",
                self.endpoint
            )));
        }
        if self.username.is_empty() {
            return Err(LinkError::Config("username is empty".into()));
        }
        if self.pool.max_connections == 0 {
            return Err(LinkError::Config("pool.max_connections must be at least 1".into()));
        }
        Ok(())
    }
}

impl fmt::Debug for ConnectorSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectorSpec")
            .field("endpoint", &self.endpoint)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("pool", &self.pool)
            .field("max_idle", &self.max_idle)
            .finish()
    }
}
