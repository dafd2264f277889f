//! # portcullis-core
//!
//! The policy execution core of the Portcullis gateway.
//!
//! This crate provides:
//! - The `Step`, `StepFactory` and `AuditSink` traits
//! - The per-request `ExecutionContext` with variables, compensation log and
//!   audit trail
//! - The three composites (`AllStep`, `OneOrMoreStep`, `ExactlyOneStep`)
//! - The `PolicyCompiler` that builds a step tree from an `AssertionNode`
//! - `StepRegistry`, the stock name-keyed `StepFactory`
//! - `${var}` template expansion and the `Clock` abstraction
//!
//! ## Usage
//!
//! ```rust,ignore
//! use portcullis_core::{ExecutionContext, PolicyCompiler, StepRegistry};
//!
//! let registry = StepRegistry::new();
//! let root = PolicyCompiler::new(&registry).compile(&tree)?;
//! let mut ctx = ExecutionContext::new();
//! let outcome = root.evaluate(&mut ctx);
//! let trail = ctx.finish(&outcome);
//! ```

pub mod clock;
pub mod compiler;
pub mod composite;
pub mod context;
pub mod registry;
pub mod template;
pub mod traits;

pub use clock::{Clock, ManualClock, SystemClock};
pub use compiler::PolicyCompiler;
pub use composite::{AllStep, ExactlyOneStep, OneOrMoreStep};
pub use context::{CancellationFlag, ExecutionContext, MessageHandle};
pub use registry::StepRegistry;
pub use traits::{AuditSink, Step, StepFactory};
