//! The three control-flow composites.
//!
//! | Composite       | Evaluates                         | Succeeds when            |
//! |-----------------|-----------------------------------|--------------------------|
//! | `AllStep`       | in order, stops at first failure  | every child succeeds     |
//! | `OneOrMoreStep` | in order, stops at first success  | any child succeeds       |
//! | `ExactlyOneStep`| every child, no short-circuit     | exactly one child does   |
//!
//! Children always run strictly in declaration order against the shared
//! context; later children may read variables set by earlier ones.
//!
//! Whenever a composite's final outcome is a failure it first rolls back
//! every compensation registered during its own subtree, newest first.
//! Composites never invent statuses: AND propagates the failing child's
//! outcome, OR and XOR report `Falsified`.

use std::sync::Arc;

use tracing::debug;

use portcullis_contracts::{
    audit::AuditLevel,
    error::{GatewayError, GatewayResult},
    outcome::Outcome,
};

use crate::{
    context::{CompensationMark, ExecutionContext},
    traits::Step,
};

fn require_children(kind: &str, children: &[Arc<dyn Step>]) -> GatewayResult<()> {
    if children.is_empty() {
        return Err(GatewayError::EmptyComposite {
            kind: kind.to_string(),
            path: String::new(),
        });
    }
    Ok(())
}

/// Roll back this composite's subtree and hand the failure upward.
fn fail(ctx: &mut ExecutionContext, mark: CompensationMark, composite: &str, outcome: Outcome) -> Outcome {
    let compensated = ctx.rollback_to(mark);
    debug!(
        request_id = %ctx.request_id(),
        composite,
        status = %outcome.status,
        compensated,
        "composite failed"
    );
    ctx.audit(AuditLevel::Warning, composite, format!("composite failed ({})", outcome));
    outcome
}

fn cancelled(composite: &str, index: usize) -> Outcome {
    Outcome::failed(format!("request cancelled before {} child {}", composite, index))
}

// ── Sequential-AND ────────────────────────────────────────────────────────────

/// Every child must succeed. Stops at the first non-success.
pub struct AllStep {
    children: Vec<Arc<dyn Step>>,
}

impl AllStep {
    pub const KIND: &'static str = "all";

    /// Returns `GatewayError::EmptyComposite` if `children` is empty.
    pub fn new(children: Vec<Arc<dyn Step>>) -> GatewayResult<Self> {
        require_children(Self::KIND, &children)?;
        Ok(Self { children })
    }
}

impl Step for AllStep {
    fn name(&self) -> &str {
        Self::KIND
    }

    fn evaluate(&self, ctx: &mut ExecutionContext) -> Outcome {
        let mark = ctx.compensation_mark();
        for (index, child) in self.children.iter().enumerate() {
            if ctx.is_cancelled() {
                return fail(ctx, mark, Self::KIND, cancelled(Self::KIND, index));
            }
            let outcome = child.evaluate(ctx);
            if !outcome.is_success() {
                debug!(
                    request_id = %ctx.request_id(),
                    child = child.name(),
                    index,
                    status = %outcome.status,
                    "all: short-circuit on child failure"
                );
                return fail(ctx, mark, Self::KIND, outcome);
            }
        }
        Outcome::success()
    }
}

// ── First-Success-OR ──────────────────────────────────────────────────────────

/// At least one child must succeed. Stops at the first success.
pub struct OneOrMoreStep {
    children: Vec<Arc<dyn Step>>,
}

impl OneOrMoreStep {
    pub const KIND: &'static str = "one-or-more";

    pub fn new(children: Vec<Arc<dyn Step>>) -> GatewayResult<Self> {
        require_children(Self::KIND, &children)?;
        Ok(Self { children })
    }
}

impl Step for OneOrMoreStep {
    fn name(&self) -> &str {
        Self::KIND
    }

    fn evaluate(&self, ctx: &mut ExecutionContext) -> Outcome {
        let mark = ctx.compensation_mark();
        for (index, child) in self.children.iter().enumerate() {
            if ctx.is_cancelled() {
                return fail(ctx, mark, Self::KIND, cancelled(Self::KIND, index));
            }
            let outcome = child.evaluate(ctx);
            if outcome.is_success() {
                debug!(
                    request_id = %ctx.request_id(),
                    child = child.name(),
                    index,
                    "one-or-more: child succeeded"
                );
                return outcome;
            }
        }
        let outcome = Outcome::falsified(format!(
            "none of {} children succeeded",
            self.children.len()
        ));
        fail(ctx, mark, Self::KIND, outcome)
    }
}

// ── Exactly-One-XOR ───────────────────────────────────────────────────────────

/// Exactly one child must succeed. Every child is evaluated.
pub struct ExactlyOneStep {
    children: Vec<Arc<dyn Step>>,
}

impl ExactlyOneStep {
    pub const KIND: &'static str = "exactly-one";

    pub fn new(children: Vec<Arc<dyn Step>>) -> GatewayResult<Self> {
        require_children(Self::KIND, &children)?;
        Ok(Self { children })
    }
}

impl Step for ExactlyOneStep {
    fn name(&self) -> &str {
        Self::KIND
    }

    fn evaluate(&self, ctx: &mut ExecutionContext) -> Outcome {
        let mark = ctx.compensation_mark();
        let mut succeeded = 0usize;
        for (index, child) in self.children.iter().enumerate() {
            if ctx.is_cancelled() {
                return fail(ctx, mark, Self::KIND, cancelled(Self::KIND, index));
            }
            if child.evaluate(ctx).is_success() {
                succeeded += 1;
            }
        }
        if succeeded == 1 {
            return Outcome::success();
        }
        let outcome = Outcome::falsified(format!(
            "{} of {} children succeeded; exactly one required",
            succeeded,
            self.children.len()
        ));
        fail(ctx, mark, Self::KIND, outcome)
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
