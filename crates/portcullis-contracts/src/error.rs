//! Error types for the Portcullis gateway core.
//!
//! Configuration, compilation and collaborator failures return
//! `GatewayResult<T>`. Step evaluation never returns an error: leaves fold
//! their failures into an `Outcome` instead.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// A composite node was declared without children.
    #[error("composite '{kind}' at '{path}' has no children")]
    EmptyComposite { kind: String, path: String },

    /// The step factory does not know the requested kind.
    #[error("no step registered for kind '{kind}' at '{path}'")]
    UnresolvedStep { kind: String, path: String },

    /// The step factory knows the kind but rejected its configuration.
    /// `path` is empty until the compiler fills in the node's position.
    #[error("invalid configuration for step '{kind}' at '{path}': {reason}")]
    InvalidStepConfig { kind: String, path: String, reason: String },

    /// A strategy cache signature resolved to zero entries.
    #[error("strategy signature for '{owner}' resolved to an empty set")]
    EmptySignature { owner: String },

    /// A `${...}` template could not be expanded.
    #[error("template error in '{template}': {reason}")]
    Template { template: String, reason: String },

    /// A configuration document is missing, malformed, or inconsistent.
    #[error("configuration error: {reason}")]
    ConfigError { reason: String },

    /// A compensating action reported an error. Logged, never surfaced as
    /// a request outcome.
    #[error("compensation '{label}' failed: {reason}")]
    CompensationFailed { label: String, reason: String },

    /// A routing target refused or dropped the forwarded request.
    #[error("backend '{backend}' unreachable: {reason}")]
    Unreachable { backend: String, reason: String },

    /// The audit sink could not persist a request's trail.
    #[error("audit write failed: {reason}")]
    AuditWriteFailed { reason: String },
}

pub type GatewayResult<T> = Result<T, GatewayError>;
