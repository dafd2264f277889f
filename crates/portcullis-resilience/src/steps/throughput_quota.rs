//! Throughput quota leaf step.
//!
//! Counts requests against a named counter for the current period and
//! denies with `Falsified` once the configured maximum is passed. After
//! every evaluation the step publishes `<prefix>.name`, `<prefix>.value`
//! and `<prefix>.max` as context variables.
//!
//! With the default `increment-on-success` strategy the unit is reserved
//! and a compensation is registered that hands it back if the request
//! later fails. A request that succeeds keeps the unit.
//!
//! Without a `counter_name` the counter is named after the step's compile
//! path (`quota@root/0`), so republishing the same tree keeps counting.

use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use portcullis_contracts::{audit::AuditLevel, error::GatewayResult, outcome::Outcome, value::Value};
use portcullis_core::{traits::Step, ExecutionContext};

use super::{parse_config, Setting};
use crate::quota::{PeriodUnit, QuotaCounter, QuotaDecision, QuotaKey};

pub const KIND: &str = "throughput-quota";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuotaStrategy {
    IncrementAlways,
    #[default]
    IncrementOnSuccess,
    Decrement,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QuotaScope {
    #[default]
    Global,
    PerRequester,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThroughputQuotaConfig {
    /// Counter name, may be a template. Defaults to a name derived from the
    /// step's position in the tree.
    #[serde(default)]
    pub counter_name: Option<String>,
    /// Integer, numeric string, or template.
    pub max: Value,
    #[serde(default = "default_period")]
    pub period: PeriodUnit,
    #[serde(default)]
    pub strategy: QuotaStrategy,
    #[serde(default)]
    pub scope: QuotaScope,
    #[serde(default = "default_prefix")]
    pub variable_prefix: String,
}

fn default_period() -> PeriodUnit {
    PeriodUnit::Second
}

fn default_prefix() -> String {
    "counter".to_string()
}

pub struct ThroughputQuotaStep {
    quotas: Arc<QuotaCounter>,
    counter_name: Setting<String>,
    max: Setting<u64>,
    period: PeriodUnit,
    strategy: QuotaStrategy,
    scope: QuotaScope,
    prefix: String,
}

impl ThroughputQuotaStep {
    pub fn new(config: &ThroughputQuotaConfig, path: &str, quotas: Arc<QuotaCounter>) -> GatewayResult<Self> {
        let counter_name = match config.counter_name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => Setting::text(name),
            _ => Setting::Fixed(format!("quota@{}", path)),
        };
        Ok(Self {
            quotas,
            counter_name,
            max: Setting::<u64>::count(KIND, "max", &config.max)?,
            period: config.period,
            strategy: config.strategy,
            scope: config.scope,
            prefix: config.variable_prefix.clone(),
        })
    }

    pub fn from_config(config: &serde_json::Value, path: &str, quotas: Arc<QuotaCounter>) -> GatewayResult<Self> {
        let config: ThroughputQuotaConfig = parse_config(KIND, config)?;
        Self::new(&config, path, quotas)
    }

    fn publish(&self, ctx: &mut ExecutionContext, key: &QuotaKey, decision: QuotaDecision, max: u64) {
        ctx.set_variable(format!("{}.name", self.prefix), key.name.clone());
        ctx.set_variable(format!("{}.value", self.prefix), Value::Int(to_i64(decision.value)));
        ctx.set_variable(format!("{}.max", self.prefix), Value::Int(to_i64(max)));
    }
}

fn to_i64(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

impl Step for ThroughputQuotaStep {
    fn name(&self) -> &str {
        KIND
    }

    fn evaluate(&self, ctx: &mut ExecutionContext) -> Outcome {
        let resolved = self
            .counter_name
            .resolve(ctx)
            .and_then(|name| Ok((name, self.max.resolve("max", ctx)?)));
        let (name, max) = match resolved {
            Ok(r) => r,
            Err(reason) => {
                ctx.audit(AuditLevel::Error, KIND, format!("invalid configuration: {}", reason));
                return Outcome::server_error(reason);
            }
        };

        let key = match self.scope {
            QuotaScope::Global => QuotaKey::global(name),
            QuotaScope::PerRequester => match ctx.requester() {
                Some(requester) => QuotaKey::per_requester(name, requester),
                None => {
                    let message = format!("per-requester quota '{}' needs an identified requester", name);
                    ctx.audit(AuditLevel::Warning, KIND, message.clone());
                    return Outcome::failed(message);
                }
            },
        };

        let decision = match self.strategy {
            QuotaStrategy::IncrementAlways => self.quotas.try_increment(&key, max, self.period),
            QuotaStrategy::Decrement => self.quotas.decrement(&key, self.period),
            QuotaStrategy::IncrementOnSuccess => {
                let (decision, reservation) = self.quotas.reserve(&key, max, self.period);
                if let Some(reservation) = reservation {
                    ctx.register_compensation(format!("release quota '{}'", key), move || {
                        reservation.cancel();
                        Ok(())
                    });
                }
                decision
            }
        };
        self.publish(ctx, &key, decision, max);

        if decision.allowed {
            debug!(request_id = %ctx.request_id(), counter = %key, value = decision.value, "quota allowed");
            return Outcome::success();
        }
        let message = format!("quota '{}' exceeded: {} of {} per {}", key, decision.value, max, self.period);
        ctx.audit(AuditLevel::Warning, KIND, message.clone());
        Outcome::falsified(message)
    }
}
