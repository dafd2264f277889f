//! Demo step catalog and simulated backends.
//!
//! Real deployments register leaves that inspect HTTP messages. The demo
//! registers three small leaves that work on context variables, plus a
//! transport whose backends can be taken down or slowed on command.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Deserialize;

use portcullis_contracts::{
    error::{GatewayError, GatewayResult},
    outcome::{Outcome, Status},
    value::Value,
};
use portcullis_core::{
    clock::ManualClock,
    traits::Step,
    ExecutionContext, MessageHandle, StepRegistry,
};
use portcullis_resilience::Transport;

// ── Leaves ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SetVariableConfig {
    name: String,
    value: Value,
}

/// `set-variable`: always succeeds.
struct SetVariable(SetVariableConfig);

impl Step for SetVariable {
    fn name(&self) -> &str {
        "set-variable"
    }

    fn evaluate(&self, ctx: &mut ExecutionContext) -> Outcome {
        ctx.set_variable(self.0.name.clone(), self.0.value.clone());
        Outcome::success()
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RequireVariableConfig {
    name: String,
    #[serde(default)]
    equals: Option<Value>,
}

/// `require-variable`: `Failed` if the variable is missing, `Falsified` if
/// it does not hold the expected value.
struct RequireVariable(RequireVariableConfig);

impl Step for RequireVariable {
    fn name(&self) -> &str {
        "require-variable"
    }

    fn evaluate(&self, ctx: &mut ExecutionContext) -> Outcome {
        let Some(actual) = ctx.get_variable(&self.0.name) else {
            return Outcome::failed(format!("variable '{}' is not set", self.0.name));
        };
        match &self.0.equals {
            Some(expected) if expected != actual => Outcome::falsified(format!(
                "'{}' is '{}', expected '{}'",
                self.0.name, actual, expected
            )),
            _ => Outcome::success(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RespondConfig {
    status: Status,
    #[serde(default)]
    message: Option<String>,
}

/// `respond`: returns a fixed outcome.
struct Respond(RespondConfig);

impl Step for Respond {
    fn name(&self) -> &str {
        "respond"
    }

    fn evaluate(&self, _ctx: &mut ExecutionContext) -> Outcome {
        Outcome::new(self.0.status, self.0.message.clone())
    }
}

fn parse<T: serde::de::DeserializeOwned>(kind: &str, config: &serde_json::Value) -> GatewayResult<T> {
    serde_json::from_value(config.clone()).map_err(|e| GatewayError::InvalidStepConfig {
        kind: kind.to_string(),
        path: String::new(),
        reason: e.to_string(),
    })
}

/// Register `set-variable`, `require-variable` and `respond`.
pub fn register_demo_steps(registry: &mut StepRegistry) {
    registry
        .register_leaf("set-variable", |config, _path| {
            Ok(Arc::new(SetVariable(parse("set-variable", config)?)) as Arc<dyn Step>)
        })
        .register_leaf("require-variable", |config, _path| {
            Ok(Arc::new(RequireVariable(parse("require-variable", config)?)) as Arc<dyn Step>)
        })
        .register_leaf("respond", |config, _path| {
            Ok(Arc::new(Respond(parse("respond", config)?)) as Arc<dyn Step>)
        });
}

// ── Simulated backends ────────────────────────────────────────────────────────

/// Backends reachable through the `failover-route` leaf.
///
/// A call to a slow backend advances the shared manual clock by its latency,
/// which is what the circuit breaker measures.
pub struct SimulatedBackends {
    clock: Arc<ManualClock>,
    down: Mutex<HashSet<String>>,
    latency: Mutex<HashMap<String, Duration>>,
    calls: Mutex<Vec<String>>,
}

impl SimulatedBackends {
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            clock,
            down: Mutex::new(HashSet::new()),
            latency: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn take_down(&self, backend: &str) {
        self.down.lock().insert(backend.to_string());
    }

    pub fn bring_up(&self, backend: &str) {
        self.down.lock().remove(backend);
    }

    pub fn set_latency(&self, backend: &str, latency: Duration) {
        self.latency.lock().insert(backend.to_string(), latency);
    }

    /// Backends contacted since the last call, in order.
    pub fn drain_calls(&self) -> Vec<String> {
        std::mem::take(&mut *self.calls.lock())
    }
}

impl Transport for SimulatedBackends {
    fn send(&self, backend: &str, _ctx: &ExecutionContext) -> GatewayResult<MessageHandle> {
        self.calls.lock().push(backend.to_string());
        if let Some(latency) = self.latency.lock().get(backend) {
            self.clock.advance(*latency);
        }
        if self.down.lock().contains(backend) {
            return Err(GatewayError::Unreachable {
                backend: backend.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        Ok(MessageHandle::new(format!("200 OK from {}", backend)))
    }
}
