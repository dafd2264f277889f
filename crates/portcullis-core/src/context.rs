//! Per-request execution state.
//!
//! An `ExecutionContext` is created when a request arrives and is owned by
//! the task handling that request until it finishes. It is never shared, so
//! nothing in here locks.
//!
//! The context holds:
//! - typed variables (case-insensitive lookup, case-preserving storage)
//! - the compensation log used for rollback
//! - the audit trail drained by the audit sink when the request ends
//! - opaque request/response payload handles
//! - a cancellation flag the request owner may trip at any time

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use portcullis_contracts::{
    audit::{AuditEntry, AuditLevel, RequestId},
    error::GatewayResult,
    outcome::Outcome,
    value::Value,
};

// ── Payload handles ───────────────────────────────────────────────────────────

/// An opaque reference to an in-flight request or response message.
///
/// The core never looks inside. Transport-specific steps downcast to the
/// concrete type they expect.
#[derive(Clone)]
pub struct MessageHandle(Arc<dyn Any + Send + Sync>);

impl MessageHandle {
    pub fn new<T: Any + Send + Sync>(message: T) -> Self {
        Self(Arc::new(message))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl fmt::Debug for MessageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MessageHandle(..)")
    }
}

// ── Cancellation ──────────────────────────────────────────────────────────────

/// Shared flag the request owner sets when the request is cancelled or
/// times out. Steps poll it; composites check it before every child.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

// ── Compensation ──────────────────────────────────────────────────────────────

type CompensationFn = Box<dyn FnOnce() -> GatewayResult<()> + Send>;

/// A deferred action that reverses a side effect, e.g. releasing a quota
/// reservation.
pub struct Compensation {
    label: String,
    action: CompensationFn,
}

impl Compensation {
    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Debug for Compensation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Compensation").field("label", &self.label).finish()
    }
}

/// Position in the compensation log, taken by a composite before it
/// evaluates its children. Rolling back to a mark runs only what was
/// registered inside that composite's subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompensationMark(usize);

// ── Variables ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Variable {
    /// Name as first written, for display.
    name: String,
    value: Value,
}

// ── ExecutionContext ──────────────────────────────────────────────────────────

pub struct ExecutionContext {
    request_id: RequestId,
    started_at: DateTime<Utc>,
    requester: Option<String>,
    /// Keyed by lowercased name.
    variables: HashMap<String, Variable>,
    compensations: Vec<Compensation>,
    audit: Vec<AuditEntry>,
    request: Option<MessageHandle>,
    response: Option<MessageHandle>,
    cancellation: CancellationFlag,
    finished: bool,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self {
            request_id: RequestId::new(),
            started_at: Utc::now(),
            requester: None,
            variables: HashMap::new(),
            compensations: Vec::new(),
            audit: Vec::new(),
            request: None,
            response: None,
            cancellation: CancellationFlag::new(),
            finished: false,
        }
    }

    /// Identify the caller. Per-requester quotas key on this.
    pub fn with_requester(mut self, requester: impl Into<String>) -> Self {
        self.requester = Some(requester.into());
        self
    }

    pub fn with_request(mut self, request: MessageHandle) -> Self {
        self.request = Some(request);
        self
    }

    /// Share a cancellation flag owned by the surrounding request handler.
    pub fn with_cancellation(mut self, flag: CancellationFlag) -> Self {
        self.cancellation = flag;
        self
    }

    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// Wall-clock time the context was created. Not read through a `Clock`.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn requester(&self) -> Option<&str> {
        self.requester.as_deref()
    }

    pub fn request(&self) -> Option<&MessageHandle> {
        self.request.as_ref()
    }

    pub fn response(&self) -> Option<&MessageHandle> {
        self.response.as_ref()
    }

    pub fn set_response(&mut self, response: MessageHandle) {
        self.response = Some(response);
    }

    // ── Variables ────────────────────────────────────────────────────────────

    /// Look up a variable by name, ignoring case. `None` means absent.
    pub fn get_variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(&name.to_lowercase()).map(|v| &v.value)
    }

    /// Set a variable, replacing any previous value under the same name in
    /// any case. The originally written spelling of the name is kept.
    pub fn set_variable(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.variables.get_mut(&name.to_lowercase()) {
            Some(existing) => existing.value = value,
            None => {
                self.variables.insert(name.to_lowercase(), Variable { name, value });
            }
        }
    }

    pub fn remove_variable(&mut self, name: &str) -> Option<Value> {
        self.variables.remove(&name.to_lowercase()).map(|v| v.value)
    }

    /// Variable names as stored, in no particular order.
    pub fn variable_names(&self) -> impl Iterator<Item = &str> {
        self.variables.values().map(|v| v.name.as_str())
    }

    // ── Compensation ─────────────────────────────────────────────────────────

    /// Register an action that undoes a side effect this request performed.
    ///
    /// Actions must be idempotent. An error from an action is logged and
    /// recorded in the audit trail; it never changes the request outcome.
    pub fn register_compensation<F>(&mut self, label: impl Into<String>, action: F)
    where
        F: FnOnce() -> GatewayResult<()> + Send + 'static,
    {
        let label = label.into();
        debug!(request_id = %self.request_id, compensation = %label, "compensation registered");
        self.compensations.push(Compensation { label, action: Box::new(action) });
    }

    pub fn compensation_mark(&self) -> CompensationMark {
        CompensationMark(self.compensations.len())
    }

    pub fn pending_compensations(&self) -> usize {
        self.compensations.len()
    }

    /// Run, newest first, every compensation registered after `mark`, and
    /// remove them from the log. Returns how many ran.
    pub fn rollback_to(&mut self, mark: CompensationMark) -> usize {
        if mark.0 >= self.compensations.len() {
            return 0;
        }
        let pending: Vec<Compensation> = self.compensations.drain(mark.0..).collect();
        let count = pending.len();
        for compensation in pending.into_iter().rev() {
            let Compensation { label, action } = compensation;
            match action() {
                Ok(()) => {
                    debug!(request_id = %self.request_id, compensation = %label, "compensation ran");
                }
                Err(e) => {
                    warn!(
                        request_id = %self.request_id,
                        compensation = %label,
                        error = %e,
                        "compensation failed; continuing rollback"
                    );
                    self.audit(
                        AuditLevel::Warning,
                        "rollback",
                        format!("compensation '{}' failed: {}", label, e),
                    );
                }
            }
        }
        count
    }

    // ── Audit ────────────────────────────────────────────────────────────────

    pub fn audit(&mut self, level: AuditLevel, source: impl Into<String>, message: impl Into<String>) {
        self.audit.push(AuditEntry {
            timestamp: Utc::now(),
            level,
            source: source.into(),
            message: message.into(),
        });
    }

    pub fn audit_trail(&self) -> &[AuditEntry] {
        &self.audit
    }

    // ── Cancellation ─────────────────────────────────────────────────────────

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn cancellation(&self) -> CancellationFlag {
        self.cancellation.clone()
    }

    // ── Completion ───────────────────────────────────────────────────────────

    /// Close out the request.
    ///
    /// On success the outstanding compensations are committed (discarded).
    /// On any other outcome they are run. Returns the audit trail for the
    /// sink.
    pub fn finish(mut self, outcome: &Outcome) -> Vec<AuditEntry> {
        if outcome.is_success() {
            let committed = self.compensations.len();
            self.compensations.clear();
            debug!(request_id = %self.request_id, committed, "request succeeded; side effects committed");
        } else {
            let ran = self.rollback_to(CompensationMark(0));
            debug!(request_id = %self.request_id, ran, status = %outcome.status, "request failed; side effects rolled back");
        }
        self.finished = true;
        std::mem::take(&mut self.audit)
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ExecutionContext {
    /// A context dropped without `finish` belongs to a request that was
    /// abandoned mid-flight. Anything it reserved is released.
    fn drop(&mut self) {
        if !self.finished && !self.compensations.is_empty() {
            warn!(
                request_id = %self.request_id,
                pending = self.compensations.len(),
                "execution context dropped unfinished; rolling back"
            );
            self.rollback_to(CompensationMark(0));
        }
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("request_id", &self.request_id)
            .field("requester", &self.requester)
            .field("variables", &self.variables.len())
            .field("compensations", &self.compensations.len())
            .field("audit", &self.audit.len())
            .finish()
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use portcullis_contracts::{
        audit::AuditLevel,
        error::GatewayError,
        outcome::Outcome,
        value::Value,
    };

    use super::{CancellationFlag, ExecutionContext, MessageHandle};

    fn recording(log: &Arc<Mutex<Vec<String>>>, label: &str) -> impl FnOnce() -> Result<(), GatewayError> + Send + 'static {
        let log = log.clone();
        let label = label.to_string();
        move || {
            log.lock().unwrap().push(label);
            Ok(())
        }
    }

    #[test]
    fn variable_lookup_ignores_case_and_preserves_spelling() {
        let mut ctx = ExecutionContext::new();
        ctx.set_variable("Request.Tier", "gold");

        assert_eq!(ctx.get_variable("request.tier"), Some(&Value::from("gold")));
        assert_eq!(ctx.get_variable("REQUEST.TIER"), Some(&Value::from("gold")));
        assert_eq!(ctx.variable_names().collect::<Vec<_>>(), vec!["Request.Tier"]);
    }

    #[test]
    fn set_overwrites_regardless_of_case() {
        let mut ctx = ExecutionContext::new();
        ctx.set_variable("count", Value::Int(1));
        ctx.set_variable("COUNT", Value::Int(2));

        assert_eq!(ctx.get_variable("Count"), Some(&Value::Int(2)));
        assert_eq!(ctx.variable_names().count(), 1);
    }

    #[test]
    fn absent_variable_is_none_not_error() {
        let mut ctx = ExecutionContext::new();
        assert!(ctx.get_variable("missing").is_none());
        ctx.set_variable("present", true);
        assert_eq!(ctx.remove_variable("PRESENT"), Some(Value::Bool(true)));
        assert!(ctx.get_variable("present").is_none());
    }

    #[test]
    fn rollback_runs_newest_first_and_only_after_mark() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut ctx = ExecutionContext::new();
        ctx.register_compensation("outer", recording(&log, "outer"));

        let mark = ctx.compensation_mark();
        ctx.register_compensation("first", recording(&log, "first"));
        ctx.register_compensation("second", recording(&log, "second"));

        assert_eq!(ctx.rollback_to(mark), 2);
        assert_eq!(*log.lock().unwrap(), vec!["second", "first"]);
        assert_eq!(ctx.pending_compensations(), 1);

        // Rolling back again to the same mark is a no-op.
        assert_eq!(ctx.rollback_to(mark), 0);
    }

    #[test]
    fn failing_compensation_is_audited_and_rollback_continues() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut ctx = ExecutionContext::new();
        ctx.register_compensation("ok", recording(&log, "ok"));
        ctx.register_compensation("broken", || {
            Err(GatewayError::CompensationFailed {
                label: "broken".to_string(),
                reason: "backend gone".to_string(),
            })
        });

        let mark = super::CompensationMark(0);
        assert_eq!(ctx.rollback_to(mark), 2);
        assert_eq!(*log.lock().unwrap(), vec!["ok"]);

        let warnings: Vec<_> = ctx
            .audit_trail()
            .iter()
            .filter(|e| e.level == AuditLevel::Warning)
            .collect();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.contains("broken"));
    }

    #[test]
    fn finish_commits_on_success() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut ctx = ExecutionContext::new();
        ctx.register_compensation("release", recording(&log, "release"));
        ctx.audit(AuditLevel::Info, "test", "hello");

        let trail = ctx.finish(&Outcome::success());
        assert!(log.lock().unwrap().is_empty(), "success must not compensate");
        assert_eq!(trail.len(), 1);
    }

    #[test]
    fn finish_rolls_back_on_failure() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut ctx = ExecutionContext::new();
        ctx.register_compensation("release", recording(&log, "release"));

        ctx.finish(&Outcome::falsified("denied"));
        assert_eq!(*log.lock().unwrap(), vec!["release"]);
    }

    #[test]
    fn dropping_unfinished_context_releases_side_effects() {
        let log = Arc::new(Mutex::new(Vec::new()));
        {
            let mut ctx = ExecutionContext::new();
            ctx.register_compensation("release", recording(&log, "release"));
        }
        assert_eq!(*log.lock().unwrap(), vec!["release"]);
    }

    #[test]
    fn cancellation_flag_is_shared() {
        let flag = CancellationFlag::new();
        let ctx = ExecutionContext::new().with_cancellation(flag.clone());
        assert!(!ctx.is_cancelled());
        flag.cancel();
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn message_handle_downcasts_to_original_type() {
        let ctx = ExecutionContext::new().with_request(MessageHandle::new(String::from("<req/>")));
        let body = ctx.request().and_then(|h| h.downcast_ref::<String>());
        assert_eq!(body.map(String::as_str), Some("<req/>"));
        assert!(ctx.request().unwrap().downcast_ref::<u32>().is_none());
    }
}
