//! Core trait definitions for the policy execution pipeline.
//!
//! - `Step`       : one executable unit, leaf or composite
//! - `StepFactory`: resolves catalog steps while a policy is compiled
//! - `AuditSink`  : receives each finished request's audit trail
//!
//! Steps are compiled once per policy version and shared by every request
//! evaluating that version, so they must be `Send + Sync` and must keep all
//! per-request state in the `ExecutionContext`.

use std::sync::Arc;

use portcullis_contracts::{
    audit::{AuditEntry, RequestId},
    error::GatewayResult,
    outcome::Outcome,
};

use crate::context::ExecutionContext;

/// An executable policy step.
pub trait Step: Send + Sync {
    /// Short name used in logs and audit entries.
    fn name(&self) -> &str;

    /// Run against one request.
    ///
    /// Implementations run synchronously inside the request's task and must
    /// map every internal error onto an `Outcome`. Steps that cause an
    /// externally visible side effect register a compensation on `ctx`.
    fn evaluate(&self, ctx: &mut ExecutionContext) -> Outcome;
}

/// Resolves catalog (non-composite) steps during compilation.
///
/// The compiler handles `All`, `OneOrMore` and `ExactlyOne` itself and asks
/// the factory for everything else.
///
/// `path` is the node's position in the tree (`root/0/1`). It is the same
/// every time the same tree is compiled, so steps name their default shared
/// state after it.
pub trait StepFactory: Send + Sync {
    /// Build a leaf step of `kind` from its opaque configuration.
    fn create_leaf(&self, kind: &str, config: &serde_json::Value, path: &str) -> GatewayResult<Arc<dyn Step>>;

    /// Build a container step of `kind` around an already compiled body.
    ///
    /// `body` is `None` when the container was declared without children.
    fn create_container(
        &self,
        kind: &str,
        config: &serde_json::Value,
        body: Option<Arc<dyn Step>>,
        path: &str,
    ) -> GatewayResult<Arc<dyn Step>>;
}

/// Destination for finished requests' audit trails.
///
/// Format and transport are up to the implementation. A failed write is
/// reported to the caller but does not change the request outcome.
pub trait AuditSink: Send + Sync {
    fn write(&self, request_id: &RequestId, outcome: &Outcome, entries: &[AuditEntry]) -> GatewayResult<()>;
}
