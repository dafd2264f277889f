//! Circuit breaker container step.
//!
//! Wraps a child policy with up to two circuits:
//!
//! - the **policy-failure** circuit counts child evaluations that did not
//!   succeed
//! - the **latency** circuit counts child evaluations slower than
//!   `max_latency_ms`, whatever their outcome
//!
//! While either circuit is open the child is not evaluated and the step
//! returns `Falsified`. Tracker ids and max-failure counts may be `${var}`
//! templates; a template that cannot be resolved, or resolves to an invalid
//! count, yields `ServerError`. A circuit without a tracker id is named
//! after its kind and the step's compile path, e.g. `latency@root/2`, so
//! recompiling the same tree keeps its state.
//!
//! ```toml
//! kind = "container"
//! step = "circuit-breaker"
//! config = { policy_failure = { tracker_id = "orders-${tenant}", max_failures = 5 } }
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use portcullis_contracts::{
    audit::AuditLevel,
    error::{GatewayError, GatewayResult},
    outcome::Outcome,
    value::Value,
};
use portcullis_core::{
    clock::{to_duration, Clock},
    traits::Step,
    ExecutionContext,
};

use super::{parse_config, Setting};
use crate::failure_tracker::{CircuitConfig, CircuitState, FailureTracker};

pub const KIND: &str = "circuit-breaker";

pub const DEFAULT_MAX_FAILURES: u64 = 10;
pub const DEFAULT_SAMPLING_WINDOW_MS: u64 = 10_000;
pub const DEFAULT_RECOVERY_PERIOD_MS: u64 = 10_000;
pub const DEFAULT_MAX_LATENCY_MS: u64 = 500;
/// Upper bound for every duration setting: one year.
pub const MAX_DURATION_MS: u64 = 365 * 24 * 60 * 60 * 1000;

// ── Configuration ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CircuitBreakerConfig {
    pub policy_failure: CircuitSettings,
    pub latency: CircuitSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CircuitSettings {
    pub enabled: bool,
    /// Shared circuit name. Breakers with the same id share one circuit.
    /// Defaults to an id derived from the step's position in the tree.
    pub tracker_id: Option<String>,
    /// Integer, numeric string, or template.
    pub max_failures: Value,
    pub sampling_window_ms: u64,
    pub recovery_period_ms: u64,
    /// Latency circuit only.
    pub max_latency_ms: Option<u64>,
}

impl Default for CircuitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            tracker_id: None,
            max_failures: Value::Int(DEFAULT_MAX_FAILURES as i64),
            sampling_window_ms: DEFAULT_SAMPLING_WINDOW_MS,
            recovery_period_ms: DEFAULT_RECOVERY_PERIOD_MS,
            max_latency_ms: None,
        }
    }
}

// ── Circuit ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CircuitKind {
    PolicyFailure,
    Latency,
}

impl CircuitKind {
    fn label(self) -> &'static str {
        match self {
            CircuitKind::PolicyFailure => "policy-failure",
            CircuitKind::Latency => "latency",
        }
    }
}

struct Circuit {
    kind: CircuitKind,
    tracker_id: Setting<String>,
    max_failures: Setting<u64>,
    sampling_window: Duration,
    recovery_period: Duration,
    max_latency: Option<Duration>,
}

/// A circuit with its templates resolved for one request.
struct Resolved {
    kind: CircuitKind,
    tracker_id: String,
    config: CircuitConfig,
}

impl Circuit {
    fn build(kind: CircuitKind, settings: &CircuitSettings, path: &str) -> GatewayResult<Option<Self>> {
        if !settings.enabled {
            return Ok(None);
        }
        let field = format!("{}.max_failures", kind.label());
        let max_failures = Setting::<u64>::count(KIND, &field, &settings.max_failures)?;
        if max_failures == Setting::Fixed(0) {
            return Err(invalid(format!("{} must be at least 1", field)));
        }
        let tracker_id = match settings.tracker_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => Setting::text(id),
            _ => Setting::Fixed(format!("{}@{}", kind.label(), path)),
        };
        let max_latency = match kind {
            CircuitKind::Latency => Some(duration(
                kind,
                "max_latency_ms",
                settings.max_latency_ms.unwrap_or(DEFAULT_MAX_LATENCY_MS),
            )?),
            CircuitKind::PolicyFailure => None,
        };
        Ok(Some(Self {
            kind,
            tracker_id,
            max_failures,
            sampling_window: duration(kind, "sampling_window_ms", settings.sampling_window_ms)?,
            recovery_period: duration(kind, "recovery_period_ms", settings.recovery_period_ms)?,
            max_latency,
        }))
    }

    fn resolve(&self, ctx: &ExecutionContext) -> Result<Resolved, String> {
        let label = self.kind.label();
        let tracker_id = self
            .tracker_id
            .resolve(ctx)
            .map_err(|e| format!("{} tracker id: {}", label, e))?;
        if tracker_id.trim().is_empty() {
            return Err(format!("{} tracker id resolved to an empty string", label));
        }
        let field = format!("{}.max_failures", label);
        let max_failures = self.max_failures.resolve(&field, ctx)?;
        let max_failures = u32::try_from(max_failures)
            .ok()
            .filter(|n| *n >= 1)
            .ok_or_else(|| format!("{} must be between 1 and {}, got {}", field, u32::MAX, max_failures))?;

        Ok(Resolved {
            kind: self.kind,
            tracker_id,
            config: CircuitConfig {
                sampling_window: self.sampling_window,
                max_failures,
                recovery_period: self.recovery_period,
                max_latency: self.max_latency,
            },
        })
    }
}

fn invalid(reason: String) -> GatewayError {
    GatewayError::InvalidStepConfig { kind: KIND.to_string(), path: String::new(), reason }
}

fn duration(kind: CircuitKind, field: &str, ms: u64) -> GatewayResult<Duration> {
    if ms > MAX_DURATION_MS {
        return Err(invalid(format!(
            "{}.{} must be at most {} (one year), got {}",
            kind.label(),
            field,
            MAX_DURATION_MS,
            ms
        )));
    }
    Ok(Duration::from_millis(ms))
}

// ── CircuitBreakerStep ────────────────────────────────────────────────────────

pub struct CircuitBreakerStep {
    body: Option<Arc<dyn Step>>,
    tracker: Arc<FailureTracker>,
    clock: Arc<dyn Clock>,
    circuits: Vec<Circuit>,
}

impl CircuitBreakerStep {
    /// `path` is the step's compile path, used to name circuits that have
    /// no tracker id.
    pub fn new(
        config: &CircuitBreakerConfig,
        body: Option<Arc<dyn Step>>,
        path: &str,
        tracker: Arc<FailureTracker>,
        clock: Arc<dyn Clock>,
    ) -> GatewayResult<Self> {
        let circuits = [
            Circuit::build(CircuitKind::PolicyFailure, &config.policy_failure, path)?,
            Circuit::build(CircuitKind::Latency, &config.latency, path)?,
        ]
        .into_iter()
        .flatten()
        .collect();
        Ok(Self { body, tracker, clock, circuits })
    }

    pub fn from_config(
        config: &serde_json::Value,
        body: Option<Arc<dyn Step>>,
        path: &str,
        tracker: Arc<FailureTracker>,
        clock: Arc<dyn Clock>,
    ) -> GatewayResult<Self> {
        let config: CircuitBreakerConfig = parse_config(KIND, config)?;
        Self::new(&config, body, path, tracker, clock)
    }

    fn misconfigured(&self, ctx: &mut ExecutionContext, reason: String) -> Outcome {
        warn!(request_id = %ctx.request_id(), reason = %reason, "circuit breaker misconfigured");
        ctx.audit(AuditLevel::Error, KIND, format!("invalid configuration: {}", reason));
        Outcome::server_error(reason)
    }
}

impl Step for CircuitBreakerStep {
    fn name(&self) -> &str {
        KIND
    }

    fn evaluate(&self, ctx: &mut ExecutionContext) -> Outcome {
        // ── Resolve templates ──
        let mut resolved = Vec::with_capacity(self.circuits.len());
        for circuit in &self.circuits {
            match circuit.resolve(ctx) {
                Ok(r) => resolved.push(r),
                Err(reason) => return self.misconfigured(ctx, reason),
            }
        }

        // ── Check circuits ──
        for circuit in &resolved {
            let state = self.tracker.check(&circuit.tracker_id, &circuit.config);
            if state == CircuitState::Tripped {
                ctx.audit(
                    AuditLevel::Warning,
                    KIND,
                    format!("{} circuit '{}' tripped", circuit.kind.label(), circuit.tracker_id),
                );
            }
            if state.is_open() {
                let forced = if state == CircuitState::ForcedOpen { " (forced)" } else { "" };
                let message = format!(
                    "{} circuit '{}' is open{}",
                    circuit.kind.label(),
                    circuit.tracker_id,
                    forced
                );
                debug!(request_id = %ctx.request_id(), tracker_id = %circuit.tracker_id, ?state, "short-circuit");
                ctx.audit(AuditLevel::Warning, KIND, message.clone());
                return Outcome::falsified(message);
            }
        }

        // ── Evaluate child policy ──
        let Some(body) = &self.body else {
            return Outcome::success();
        };
        let started = self.clock.now();
        let outcome = body.evaluate(ctx);
        let elapsed = to_duration(self.clock.now() - started);

        // ── Record ──
        for circuit in &resolved {
            match circuit.kind {
                CircuitKind::PolicyFailure if !outcome.is_success() => {
                    self.tracker.record_failure(&circuit.tracker_id, &circuit.config);
                }
                CircuitKind::PolicyFailure => {}
                CircuitKind::Latency => {
                    self.tracker
                        .record_success_or_latency(&circuit.tracker_id, elapsed, &circuit.config);
                }
            }
        }
        outcome
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
