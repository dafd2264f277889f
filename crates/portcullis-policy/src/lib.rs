//! # portcullis-policy
//!
//! TOML policy documents and the versioned policy service.
//!
//! ## Overview
//!
//! [`PolicyDocument`] is the on-disk form of a policy: gateway settings plus
//! an assertion tree. [`PolicyService`] compiles a tree through a
//! [`StepFactory`](portcullis_core::traits::StepFactory), swaps it in
//! atomically, and runs each request against the live version.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use std::path::Path;
//! use portcullis_policy::{PolicyDocument, PolicyService};
//!
//! let document = PolicyDocument::from_file(Path::new("policies/orders.toml"))?;
//! document.settings.apply(&services.tracker);
//! let service = PolicyService::new(Arc::new(registry), audit_sink);
//! service.publish_document(&document)?;
//! let outcome = service.handle(ExecutionContext::new().with_requester("alice"));
//! ```

pub mod document;
pub mod service;

pub use document::{GatewaySettings, PolicyDocument};
pub use service::{CompiledPolicy, PolicyService};

// ── Tests ─────────────────────────────────────────────────────────────────────
