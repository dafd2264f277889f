//! Demo scenarios.
//!
//! Each scenario builds its own gateway from real Portcullis components
//! (compiler, resilience services, policy service, audit ledger) wired to
//! the simulated backends in `crate::steps`.

pub mod circuit;
pub mod composites;
pub mod policy_file;
pub mod quota;
pub mod routing;

use std::sync::Arc;

use chrono::Utc;

use portcullis_audit::InMemoryAuditSink;
use portcullis_contracts::{audit::AuditLevel, outcome::Outcome};
use portcullis_core::{clock::ManualClock, ExecutionContext, StepRegistry};
use portcullis_policy::PolicyService;
use portcullis_resilience::{register_routing, ResilienceServices};

use crate::steps::{register_demo_steps, SimulatedBackends};

/// One gateway instance with a manual clock.
pub struct Gateway {
    pub clock: Arc<ManualClock>,
    pub services: ResilienceServices,
    pub backends: Arc<SimulatedBackends>,
    pub ledger: Arc<InMemoryAuditSink>,
    pub service: PolicyService,
}

impl Gateway {
    pub fn new(name: &str) -> Self {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let services = ResilienceServices::new(clock.clone());
        let backends = Arc::new(SimulatedBackends::new(clock.clone()));
        let ledger = Arc::new(InMemoryAuditSink::new(name));

        let mut registry = StepRegistry::new();
        services.register(&mut registry);
        register_routing(&mut registry, backends.clone());
        register_demo_steps(&mut registry);

        let service = PolicyService::new(Arc::new(registry), ledger.clone());
        Self {
            clock,
            services,
            backends,
            ledger,
            service,
        }
    }

    /// Run one request and print a one-line summary of it.
    pub fn request(&self, label: &str, ctx: ExecutionContext) -> Outcome {
        let request_id = ctx.request_id().clone();
        let outcome = self.service.handle(ctx);
        println!("  {:<34} {}", label, outcome);

        if let Some(record) = self.ledger.record(&request_id) {
            for entry in record.entries.iter().filter(|e| e.level != AuditLevel::Info) {
                println!("      [{:?}] {}: {}", entry.level, entry.source, entry.message);
            }
        }
        outcome
    }

    pub fn print_ledger(&self) {
        let export = self.ledger.export_log();
        println!(
            "  Audit chain integrity:  {} ({} request(s), terminal hash {})",
            if self.ledger.verify_integrity() { "VERIFIED" } else { "FAILED" },
            export.events.len(),
            short(&export.terminal_hash),
        );
    }
}

fn short(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}
