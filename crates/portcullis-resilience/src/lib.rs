//! # portcullis-resilience
//!
//! Shared, concurrently mutated state for the Portcullis gateway and the
//! built-in steps that use it.
//!
//! This crate provides:
//! - `StrategyCache`: per-node memo rebuilt only when its signature changes
//! - `FailoverStrategy` implementations (sticky, round-robin, ordered)
//! - `FailureTracker`: sliding-window circuit state with a forced-open
//!   override and background compaction
//! - `QuotaCounter`: period-bound counters with two-phase reservations and
//!   a background gc task
//! - The `circuit-breaker`, `throughput-quota` and `failover-route` steps
//!
//! ## Usage
//!
//! ```rust,ignore
//! use portcullis_core::{SystemClock, StepRegistry};
//! use portcullis_resilience::steps::{register_routing, ResilienceServices};
//!
//! let services = ResilienceServices::new(Arc::new(SystemClock));
//! let mut registry = StepRegistry::new();
//! services.register(&mut registry);
//! register_routing(&mut registry, transport);
//! let maintenance = services.spawn_maintenance(DEFAULT_CLEANUP_INTERVAL);
//! ```

pub mod failover;
pub mod failure_tracker;
pub mod maintenance;
pub mod quota;
pub mod steps;
pub mod strategy_cache;

pub use failover::{FailoverKind, FailoverStrategy};
pub use failure_tracker::{CircuitConfig, CircuitState, FailureTracker, DEFAULT_CLEANUP_INTERVAL};
pub use maintenance::{Maintenance, MaintenanceHandle};
pub use quota::{PeriodUnit, QuotaCounter, QuotaDecision, QuotaKey, Reservation};
pub use steps::{register_routing, ResilienceServices, Transport};
pub use strategy_cache::StrategyCache;
