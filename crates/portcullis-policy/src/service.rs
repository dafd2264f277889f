//! The versioned policy service.
//!
//! Holds the compiled policy that is currently live and runs requests
//! against it:
//!
//!   publish: AssertionNode → compile → swap
//!   handle:  ExecutionContext → evaluate → finish → AuditSink
//!
//! A publish is all-or-nothing. If compilation fails the previous version
//! keeps serving. Requests that already hold an `Arc<CompiledPolicy>` finish
//! on the version they started with.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use portcullis_contracts::{
    assertion::AssertionNode,
    audit::AuditLevel,
    error::GatewayResult,
    outcome::Outcome,
};
use portcullis_core::{
    traits::{AuditSink, Step, StepFactory},
    ExecutionContext, PolicyCompiler,
};

use crate::document::PolicyDocument;

/// One successfully compiled policy version.
pub struct CompiledPolicy {
    version: u64,
    name: String,
    root: Arc<dyn Step>,
}

impl CompiledPolicy {
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Evaluate the policy against one request without finishing it.
    pub fn evaluate(&self, ctx: &mut ExecutionContext) -> Outcome {
        self.root.evaluate(ctx)
    }
}

pub struct PolicyService {
    factory: Arc<dyn StepFactory>,
    audit: Arc<dyn AuditSink>,
    live: RwLock<Option<Arc<CompiledPolicy>>>,
    versions: AtomicU64,
}

impl PolicyService {
    pub fn new(factory: Arc<dyn StepFactory>, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            factory,
            audit,
            live: RwLock::new(None),
            versions: AtomicU64::new(0),
        }
    }

    /// Compile `tree` and make it the live policy.
    ///
    /// Returns the new version number. On error nothing changes.
    pub fn publish(&self, name: &str, tree: &AssertionNode) -> GatewayResult<u64> {
        let root = PolicyCompiler::new(self.factory.as_ref())
            .compile(tree)
            .inspect_err(|e| warn!(policy = %name, error = %e, "policy rejected; previous version stays live"))?;

        let version = self.versions.fetch_add(1, Ordering::SeqCst) + 1;
        let compiled = Arc::new(CompiledPolicy {
            version,
            name: name.to_string(),
            root,
        });
        let previous = self.live.write().replace(compiled);

        info!(
            policy = %name,
            version,
            replaced = previous.as_ref().map(|p| p.version),
            "policy published"
        );
        Ok(version)
    }

    pub fn publish_document(&self, document: &PolicyDocument) -> GatewayResult<u64> {
        self.publish(&document.settings.name, &document.policy)
    }

    /// The live policy, if any has been published.
    pub fn current(&self) -> Option<Arc<CompiledPolicy>> {
        self.live.read().clone()
    }

    /// Run one request against the live policy and close it out.
    ///
    /// Compensations are committed on success and run otherwise. The audit
    /// trail goes to the sink; a sink failure is logged and does not change
    /// the returned outcome.
    pub fn handle(&self, mut ctx: ExecutionContext) -> Outcome {
        let request_id = ctx.request_id().clone();
        let started_at = ctx.started_at();

        // ── Step 1: Pin the live version ─────────────────────────────────────
        let outcome = match self.current() {
            Some(policy) => {
                debug!(request_id = %request_id, policy = %policy.name, version = policy.version, "request starting");

                // ── Step 2: Evaluate ─────────────────────────────────────────
                policy.evaluate(&mut ctx)
            }
            None => {
                ctx.audit(AuditLevel::Error, "gateway", "no policy published");
                Outcome::server_error("no policy published")
            }
        };

        // ── Step 3: Commit or roll back ──────────────────────────────────────
        let trail = ctx.finish(&outcome);

        // ── Step 4: Audit ────────────────────────────────────────────────────
        if let Err(e) = self.audit.write(&request_id, &outcome, &trail) {
            warn!(request_id = %request_id, error = %e, "audit sink rejected request record");
        }

        debug!(
            request_id = %request_id,
            status = %outcome.status,
            entries = trail.len(),
            elapsed_ms = (Utc::now() - started_at).num_milliseconds(),
            "request finished"
        );
        outcome
    }
}
