//! Policy document schema.
//!
//! A `PolicyDocument` is deserialized from TOML. It holds gateway-level
//! settings and the root of the assertion tree. The `kind` key selects the
//! node type; catalog steps carry their own `config` table, which is passed
//! to the step factory untouched.
//!
//! ```toml
//! [settings]
//! name = "orders-api"
//! forced_open = ["legacy-billing"]
//!
//! [policy]
//! kind = "all"
//!
//! [[policy.children]]
//! kind = "leaf"
//! step = "throughput-quota"
//! config = { counter_name = "orders", max = 100, period = "minute" }
//!
//! [[policy.children]]
//! kind = "leaf"
//! step = "failover-route"
//! config = { backends = ["${backends}"], strategy = "round-robin" }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use portcullis_contracts::{
    assertion::AssertionNode,
    error::{GatewayError, GatewayResult},
};
use portcullis_resilience::{FailureTracker, DEFAULT_CLEANUP_INTERVAL};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDocument {
    #[serde(default)]
    pub settings: GatewaySettings,

    /// Root of the assertion tree.
    pub policy: AssertionNode,
}

/// Gateway-wide settings that travel with a policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewaySettings {
    /// Name used in logs and audit records.
    pub name: String,

    /// How often the failure tracker discards old events.
    pub cleanup_interval_secs: u64,

    /// Circuit tracker ids held open regardless of their failure counts.
    pub forced_open: Vec<String>,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            cleanup_interval_secs: DEFAULT_CLEANUP_INTERVAL.as_secs(),
            forced_open: Vec::new(),
        }
    }
}

impl GatewaySettings {
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs.max(1))
    }

    /// Push the forced-open list to the tracker, replacing the previous one.
    pub fn apply(&self, tracker: &FailureTracker) {
        info!(policy = %self.name, forced_open = self.forced_open.len(), "applying gateway settings");
        tracker.set_forced_open(self.forced_open.iter().cloned());
    }
}

impl PolicyDocument {
    /// Parse `s` as a TOML policy document.
    ///
    /// Returns `GatewayError::ConfigError` if the TOML is malformed or does
    /// not match the document schema.
    pub fn from_toml_str(s: &str) -> GatewayResult<Self> {
        toml::from_str(s).map_err(|e| GatewayError::ConfigError {
            reason: format!("failed to parse policy TOML: {}", e),
        })
    }

    /// Read the file at `path` and parse it as a TOML policy document.
    pub fn from_file(path: &Path) -> GatewayResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| GatewayError::ConfigError {
            reason: format!("failed to read policy file '{}': {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }
}
