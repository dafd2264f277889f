//! Step outcomes.
//!
//! Every step, leaf or composite, reports exactly one `Outcome`. The status
//! set is closed: composites aggregate the statuses their children produce
//! and never invent new ones.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The kind of result a step produced.
///
/// Only `Success` lets a Sequential-AND continue. Everything else is a
/// failure variant whose meaning matters to the response mapper and to
/// retrying composites such as First-Success-OR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    /// The step did what it was configured to do.
    Success,
    /// Business-level "no". An enclosing OR may still try another branch.
    Falsified,
    /// Unexpected local failure, e.g. a required variable is missing.
    Failed,
    /// A backend or infrastructure dependency failed.
    ServerError,
    /// The step does not apply to this request.
    NotApplicable,
    /// The inbound request is malformed and should not be retried.
    BadRequest,
}

impl Status {
    pub fn is_success(self) -> bool {
        matches!(self, Status::Success)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Success => "success",
            Status::Falsified => "falsified",
            Status::Failed => "failed",
            Status::ServerError => "server-error",
            Status::NotApplicable => "not-applicable",
            Status::BadRequest => "bad-request",
        };
        f.write_str(name)
    }
}

/// The result of evaluating one step: a status plus an optional diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub status: Status,
    /// Human-readable detail for the audit trail. Never parsed.
    pub message: Option<String>,
}

impl Outcome {
    pub fn new(status: Status, message: Option<String>) -> Self {
        Self { status, message }
    }

    pub fn success() -> Self {
        Self::new(Status::Success, None)
    }

    pub fn falsified(message: impl Into<String>) -> Self {
        Self::new(Status::Falsified, Some(message.into()))
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::new(Status::Failed, Some(message.into()))
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(Status::ServerError, Some(message.into()))
    }

    pub fn not_applicable(message: impl Into<String>) -> Self {
        Self::new(Status::NotApplicable, Some(message.into()))
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(Status::BadRequest, Some(message.into()))
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

impl From<Status> for Outcome {
    fn from(status: Status) -> Self {
        Self::new(status, None)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {}", self.status, message),
            None => write!(f, "{}", self.status),
        }
    }
}
