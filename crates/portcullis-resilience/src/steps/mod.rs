//! Built-in catalog steps backed by the shared resilience state.
//!
//! | Kind               | Shape     | Backed by          |
//! |--------------------|-----------|--------------------|
//! | `circuit-breaker`  | container | `FailureTracker`   |
//! | `throughput-quota` | leaf      | `QuotaCounter`     |
//! | `failover-route`   | leaf      | `StrategyCache` + a `Transport` |

pub mod circuit_breaker;
pub mod routing;
pub mod throughput_quota;

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::info;

use portcullis_contracts::{
    error::{GatewayError, GatewayResult},
    value::Value,
};
use portcullis_core::{clock::Clock, registry::StepRegistry, template, traits::Step, ExecutionContext};

use crate::{
    failure_tracker::FailureTracker,
    maintenance::Maintenance,
    quota::QuotaCounter,
};

pub use circuit_breaker::CircuitBreakerStep;
pub use routing::{FailoverRoutingStep, Transport};
pub use throughput_quota::ThroughputQuotaStep;

/// Process-wide state shared by every compiled policy version.
///
/// Created once at startup. Recompiling a policy reuses the same tracker
/// and counters, and unnamed circuits and quotas are keyed by their compile
/// path, so their state survives republishing the same tree.
#[derive(Clone)]
pub struct ResilienceServices {
    pub clock: Arc<dyn Clock>,
    pub tracker: Arc<FailureTracker>,
    pub quotas: Arc<QuotaCounter>,
}

impl ResilienceServices {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            tracker: Arc::new(FailureTracker::new(clock.clone())),
            quotas: Arc::new(QuotaCounter::new(clock.clone())),
            clock,
        }
    }

    /// Start failure-tracker compaction and quota gc, both every `every`.
    /// Must be called inside a tokio runtime.
    pub fn spawn_maintenance(&self, every: Duration) -> Maintenance {
        info!(every_secs = every.as_secs(), "resilience maintenance started");
        Maintenance {
            compaction: self.tracker.spawn_compaction(every),
            gc: self.quotas.spawn_gc(every),
        }
    }

    /// Register `circuit-breaker` and `throughput-quota`.
    pub fn register(&self, registry: &mut StepRegistry) {
        let tracker = self.tracker.clone();
        let clock = self.clock.clone();
        registry.register_container(circuit_breaker::KIND, move |config, body, path| {
            let step = CircuitBreakerStep::from_config(config, body, path, tracker.clone(), clock.clone())?;
            Ok(Arc::new(step) as Arc<dyn Step>)
        });

        let quotas = self.quotas.clone();
        registry.register_leaf(throughput_quota::KIND, move |config, path| {
            let step = ThroughputQuotaStep::from_config(config, path, quotas.clone())?;
            Ok(Arc::new(step) as Arc<dyn Step>)
        });
    }
}

/// Register `failover-route` forwarding through `transport`.
pub fn register_routing(registry: &mut StepRegistry, transport: Arc<dyn Transport>) {
    registry.register_leaf(routing::KIND, move |config, _path| {
        let step = FailoverRoutingStep::from_config(config, transport.clone())?;
        Ok(Arc::new(step) as Arc<dyn Step>)
    });
}

/// Deserialize a step's opaque configuration. A missing (`null`)
/// configuration reads as an empty table.
pub(crate) fn parse_config<T: DeserializeOwned>(kind: &str, config: &serde_json::Value) -> GatewayResult<T> {
    let config = match config {
        serde_json::Value::Null => serde_json::Value::Object(serde_json::Map::new()),
        other => other.clone(),
    };
    serde_json::from_value(config).map_err(|e| GatewayError::InvalidStepConfig {
        kind: kind.to_string(),
        path: String::new(),
        reason: e.to_string(),
    })
}

/// A configuration value fixed at compile time or read from a `${var}`
/// template on every request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Setting<T> {
    Fixed(T),
    Template(String),
}

impl Setting<String> {
    pub(crate) fn text(raw: &str) -> Self {
        if template::is_template(raw) {
            Setting::Template(raw.to_string())
        } else {
            Setting::Fixed(raw.to_string())
        }
    }

    pub(crate) fn resolve(&self, ctx: &ExecutionContext) -> Result<String, String> {
        match self {
            Setting::Fixed(s) => Ok(s.clone()),
            Setting::Template(t) => template::expand(t, ctx).map_err(|e| e.to_string()),
        }
    }
}

impl Setting<u64> {
    /// Accept an integer or a string holding either an integer or a
    /// template.
    pub(crate) fn count(kind: &str, field: &str, value: &Value) -> GatewayResult<Self> {
        let invalid = |shown: String| GatewayError::InvalidStepConfig {
            kind: kind.to_string(),
            path: String::new(),
            reason: format!("{} must be a non-negative integer, got '{}'", field, shown),
        };
        match value {
            Value::Int(n) => u64::try_from(*n).map(Setting::Fixed).map_err(|_| invalid(n.to_string())),
            Value::Str(s) if template::is_template(s) => Ok(Setting::Template(s.clone())),
            Value::Str(s) => s.trim().parse::<u64>().map(Setting::Fixed).map_err(|_| invalid(s.clone())),
            other => Err(invalid(other.to_string())),
        }
    }

    pub(crate) fn resolve(&self, field: &str, ctx: &ExecutionContext) -> Result<u64, String> {
        match self {
            Setting::Fixed(n) => Ok(*n),
            Setting::Template(t) => {
                let expanded = template::expand(t, ctx).map_err(|e| e.to_string())?;
                expanded.trim().parse::<u64>().map_err(|_| {
                    format!("{} resolved to '{}', expected a non-negative integer", field, expanded)
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::{TimeZone, Utc};

    use portcullis_contracts::value::Value;
    use portcullis_core::{clock::ManualClock, ExecutionContext};

    use super::{ResilienceServices, Setting};
    use crate::{
        failure_tracker::CircuitConfig,
        quota::{PeriodUnit, QuotaKey},
    };

    #[test]
    fn counts_accept_integers_strings_and_templates() {
        assert_eq!(Setting::<u64>::count("k", "max", &Value::Int(4)).unwrap(), Setting::Fixed(4));
        assert_eq!(Setting::<u64>::count("k", "max", &Value::from(" 7 ")).unwrap(), Setting::Fixed(7));
        assert_eq!(
            Setting::<u64>::count("k", "max", &Value::from("${limit}")).unwrap(),
            Setting::Template("${limit}".to_string())
        );
        assert!(Setting::<u64>::count("k", "max", &Value::Int(-4)).is_err());
        assert!(Setting::<u64>::count("k", "max", &Value::Bool(true)).is_err());
    }

    #[test]
    fn templated_count_rejects_negative_values() {
        let mut ctx = ExecutionContext::new();
        ctx.set_variable("limit", "-4");
        let setting = Setting::<u64>::Template("${limit}".to_string());
        assert!(setting.resolve("max", &ctx).unwrap_err().contains("-4"));

        ctx.set_variable("limit", "4");
        assert_eq!(setting.resolve("max", &ctx), Ok(4));
    }

    #[tokio::test]
    async fn maintenance_sweeps_tracker_and_quotas() {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()));
        let services = ResilienceServices::new(clock.clone());
        let circuit = CircuitConfig {
            sampling_window: Duration::from_secs(10),
            max_failures: 5,
            recovery_period: Duration::from_secs(10),
            max_latency: None,
        };
        services.tracker.record_failure("orders", &circuit);
        services.quotas.try_increment(&QuotaKey::per_requester("api", "alice"), 1, PeriodUnit::Second);
        clock.advance(Duration::from_secs(60));

        let maintenance = services.spawn_maintenance(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(services.tracker.tracked(), 0);
        assert!(services.quotas.is_empty());

        maintenance.shutdown();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(maintenance.is_finished());
    }
}
