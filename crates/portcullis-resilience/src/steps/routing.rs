//! Failover routing leaf step.
//!
//! Forwards the request to one of a list of backends through a `Transport`.
//! Backend entries may be `${var}` templates, and a template naming a list
//! variable contributes every element. The expanded list is the strategy
//! cache signature: the failover strategy (and its sticky / rotation state)
//! survives across requests for as long as the list stays the same.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, warn};

use portcullis_contracts::{
    audit::AuditLevel,
    error::{GatewayError, GatewayResult},
    outcome::Outcome,
};
use portcullis_core::{template, traits::Step, ExecutionContext, MessageHandle};

use super::parse_config;
use crate::{
    failover::{FailoverKind, FailoverStrategy},
    strategy_cache::StrategyCache,
};

pub const KIND: &str = "failover-route";

/// Delivers a request to one backend.
pub trait Transport: Send + Sync {
    /// Forward the current request to `backend` and return the response.
    ///
    /// `GatewayError::Unreachable` (or any other error) makes the routing
    /// step fail over to the next backend.
    fn send(&self, backend: &str, ctx: &ExecutionContext) -> GatewayResult<MessageHandle>;
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FailoverRoutingConfig {
    pub backends: Vec<String>,
    #[serde(default = "default_strategy")]
    pub strategy: String,
    /// Variable that receives the backend that answered.
    #[serde(default = "default_target_variable")]
    pub target_variable: String,
}

fn default_strategy() -> String {
    FailoverKind::Sticky.to_string()
}

fn default_target_variable() -> String {
    "route.backend".to_string()
}

pub struct FailoverRoutingStep {
    backends: Vec<String>,
    kind: FailoverKind,
    target_variable: String,
    transport: Arc<dyn Transport>,
    cache: StrategyCache<dyn FailoverStrategy>,
}

impl FailoverRoutingStep {
    /// An unknown strategy name falls back to sticky with a warning.
    pub fn new(config: &FailoverRoutingConfig, transport: Arc<dyn Transport>) -> Self {
        let kind = config.strategy.parse::<FailoverKind>().unwrap_or_else(|e| {
            warn!(error = %e, fallback = %FailoverKind::Sticky, "unknown failover strategy");
            FailoverKind::Sticky
        });
        Self {
            backends: config.backends.clone(),
            kind,
            target_variable: config.target_variable.clone(),
            transport,
            cache: StrategyCache::new(KIND),
        }
    }

    pub fn from_config(config: &serde_json::Value, transport: Arc<dyn Transport>) -> GatewayResult<Self> {
        let config: FailoverRoutingConfig = parse_config(KIND, config)?;
        Ok(Self::new(&config, transport))
    }

    pub fn kind(&self) -> FailoverKind {
        self.kind
    }

    fn signature(&self, ctx: &ExecutionContext) -> GatewayResult<Vec<String>> {
        let mut signature = Vec::with_capacity(self.backends.len());
        for entry in &self.backends {
            if template::is_template(entry) {
                signature.extend(template::expand_values(entry, ctx)?);
            } else if !entry.trim().is_empty() {
                signature.push(entry.clone());
            }
        }
        Ok(signature)
    }

    fn strategy(&self, ctx: &ExecutionContext) -> GatewayResult<Arc<dyn FailoverStrategy>> {
        let signature = self.signature(ctx)?;
        self.cache
            .get_or_build(signature, |backends| Ok(Arc::from(self.kind.build(backends.to_vec()))))
    }

    fn unroutable(&self, ctx: &mut ExecutionContext, error: GatewayError) -> Outcome {
        warn!(request_id = %ctx.request_id(), error = %error, "routing configuration unusable");
        ctx.audit(AuditLevel::Warning, KIND, error.to_string());
        Outcome::failed(error.to_string())
    }
}

impl Step for FailoverRoutingStep {
    fn name(&self) -> &str {
        KIND
    }

    fn evaluate(&self, ctx: &mut ExecutionContext) -> Outcome {
        let strategy = match self.strategy(ctx) {
            Ok(strategy) => strategy,
            Err(e) => return self.unroutable(ctx, e),
        };

        let attempts = strategy.backends().len();
        let mut previous: Option<String> = None;
        for _ in 0..attempts {
            if ctx.is_cancelled() {
                return Outcome::failed("request cancelled during routing");
            }
            let Some(backend) = strategy.select() else {
                break;
            };
            if let Some(previous) = &previous {
                ctx.audit(
                    AuditLevel::Info,
                    KIND,
                    format!("failing over from '{}' to '{}'", previous, backend),
                );
            }

            match self.transport.send(&backend, ctx) {
                Ok(response) => {
                    strategy.report_success(&backend);
                    debug!(request_id = %ctx.request_id(), backend = %backend, strategy = %self.kind, "routed");
                    ctx.set_response(response);
                    ctx.set_variable(self.target_variable.clone(), backend);
                    return Outcome::success();
                }
                Err(e) => {
                    strategy.report_failure(&backend);
                    warn!(request_id = %ctx.request_id(), backend = %backend, error = %e, "backend failed");
                    ctx.audit(AuditLevel::Warning, KIND, e.to_string());
                    previous = Some(backend);
                }
            }
        }

        let message = format!("no backend reachable ({} tried)", attempts);
        ctx.audit(AuditLevel::Error, KIND, message.clone());
        Outcome::server_error(message)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};

    use serde_json::json;

    use portcullis_contracts::{
        error::{GatewayError, GatewayResult},
        outcome::Status,
        value::Value,
    };
    use portcullis_core::{traits::Step, ExecutionContext, MessageHandle};

    use super::{FailoverRoutingStep, Transport};
    use crate::failover::FailoverKind;

    // ── Mock transport ───────────────────────────────────────────────────────

    #[derive(Default)]
    struct MockTransport {
        down: Mutex<HashSet<String>>,
        attempts: Mutex<Vec<String>>,
    }

    impl MockTransport {
        fn take_down(&self, backend: &str) {
            self.down.lock().unwrap().insert(backend.to_string());
        }

        fn bring_up(&self, backend: &str) {
            self.down.lock().unwrap().remove(backend);
        }

        fn attempts(&self) -> Vec<String> {
            std::mem::take(&mut *self.attempts.lock().unwrap())
        }
    }

    impl Transport for MockTransport {
        fn send(&self, backend: &str, _ctx: &ExecutionContext) -> GatewayResult<MessageHandle> {
            self.attempts.lock().unwrap().push(backend.to_string());
            if self.down.lock().unwrap().contains(backend) {
                return Err(GatewayError::Unreachable {
                    backend: backend.to_string(),
                    reason: "connection refused".to_string(),
                });
            }
            Ok(MessageHandle::new(format!("response from {}", backend)))
        }
    }

    fn route(transport: &Arc<MockTransport>, config: serde_json::Value) -> FailoverRoutingStep {
        FailoverRoutingStep::from_config(&config, transport.clone()).unwrap()
    }

    // ── Routing ──────────────────────────────────────────────────────────────

    #[test]
    fn routes_to_first_backend_and_records_it() {
        let transport = Arc::new(MockTransport::default());
        let step = route(&transport, json!({ "backends": ["a:80", "b:80"] }));

        let mut ctx = ExecutionContext::new();
        assert!(step.evaluate(&mut ctx).is_success());
        assert_eq!(ctx.get_variable("route.backend"), Some(&Value::from("a:80")));
        let body = ctx.response().and_then(|r| r.downcast_ref::<String>()).cloned();
        assert_eq!(body.as_deref(), Some("response from a:80"));
    }

    #[test]
    fn sticky_strategy_persists_across_requests() {
        let transport = Arc::new(MockTransport::default());
        let step = route(&transport, json!({ "backends": ["a", "b", "c"], "strategy": "sticky" }));

        transport.take_down("a");
        let mut ctx = ExecutionContext::new();
        assert!(step.evaluate(&mut ctx).is_success());
        assert_eq!(transport.attempts(), vec!["a", "b"]);
        assert!(ctx.audit_trail().iter().any(|e| e.message.contains("failing over from 'a' to 'b'")));

        transport.bring_up("a");
        assert!(step.evaluate(&mut ExecutionContext::new()).is_success());
        assert_eq!(transport.attempts(), vec!["b"], "stays on b while b is healthy");
    }

    #[test]
    fn round_robin_rotates_between_requests() {
        let transport = Arc::new(MockTransport::default());
        let step = route(&transport, json!({ "backends": ["a", "b"], "strategy": "round-robin" }));

        for _ in 0..3 {
            assert!(step.evaluate(&mut ExecutionContext::new()).is_success());
        }
        assert_eq!(transport.attempts(), vec!["a", "b", "a"]);
    }

    #[test]
    fn all_backends_down_is_a_server_error() {
        let transport = Arc::new(MockTransport::default());
        let step = route(&transport, json!({ "backends": ["a", "b"], "strategy": "ordered" }));
        transport.take_down("a");
        transport.take_down("b");

        let outcome = step.evaluate(&mut ExecutionContext::new());
        assert_eq!(outcome.status, Status::ServerError);
        assert_eq!(transport.attempts(), vec!["a", "b"]);
    }

    #[test]
    fn unknown_strategy_falls_back_to_sticky() {
        let transport = Arc::new(MockTransport::default());
        let step = route(&transport, json!({ "backends": ["a"], "strategy": "random" }));
        assert_eq!(step.kind(), FailoverKind::Sticky);
    }

    // ── Templated backends ───────────────────────────────────────────────────

    #[test]
    fn list_variable_expands_into_backends_and_rebuilds_on_change() {
        let transport = Arc::new(MockTransport::default());
        let step = route(&transport, json!({ "backends": ["${pool}", "fallback"] }));
        transport.take_down("east");

        let mut ctx = ExecutionContext::new();
        ctx.set_variable("pool", vec!["east", "west"]);
        assert!(step.evaluate(&mut ctx).is_success());
        assert_eq!(transport.attempts(), vec!["east", "west"]);

        // Same list: the sticky state from the first request is kept.
        let mut ctx = ExecutionContext::new();
        ctx.set_variable("pool", vec!["east", "west"]);
        assert!(step.evaluate(&mut ctx).is_success());
        assert_eq!(transport.attempts(), vec!["west"]);

        // Reordered list is a new signature, so a fresh strategy starts at
        // the top again.
        let mut ctx = ExecutionContext::new();
        ctx.set_variable("pool", vec!["west", "east"]);
        assert!(step.evaluate(&mut ctx).is_success());
        assert_eq!(transport.attempts(), vec!["west"]);
        assert_eq!(ctx.get_variable("route.backend"), Some(&Value::from("west")));
    }

    #[test]
    fn unresolvable_or_empty_backends_fail_without_sending() {
        let transport = Arc::new(MockTransport::default());

        let templated = route(&transport, json!({ "backends": ["${pool}"] }));
        assert_eq!(templated.evaluate(&mut ExecutionContext::new()).status, Status::Failed);

        let mut blank = ExecutionContext::new();
        blank.set_variable("pool", "  ");
        assert_eq!(templated.evaluate(&mut blank).status, Status::Failed);

        let empty = route(&transport, json!({ "backends": [] }));
        assert_eq!(empty.evaluate(&mut ExecutionContext::new()).status, Status::Failed);

        assert!(transport.attempts().is_empty());
    }
}
