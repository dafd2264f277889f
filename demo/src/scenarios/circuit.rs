//! Scenario 3: Circuit breaker
//!
//! Sub-case A: repeated backend failures open the circuit, requests are
//!             turned away without contacting the backend, and the circuit
//!             closes again after the recovery period
//! Sub-case B: slow responses open the latency circuit
//! Sub-case C: an operator forces the circuit open

use std::time::Duration;

use serde_json::json;

use portcullis_contracts::{assertion::AssertionNode, error::GatewayResult};
use portcullis_core::ExecutionContext;
use portcullis_resilience::DEFAULT_CLEANUP_INTERVAL;

use super::Gateway;

fn guarded_route(tracker: &str) -> AssertionNode {
    AssertionNode::container(
        "circuit-breaker",
        json!({
            "policy_failure": {
                "tracker_id": tracker,
                "max_failures": 2,
                "sampling_window_ms": 60_000,
                "recovery_period_ms": 30_000,
            },
            "latency": {
                "tracker_id": format!("{}-latency", tracker),
                "max_failures": 1,
                "max_latency_ms": 250,
            },
        }),
        vec![AssertionNode::leaf("failover-route", json!({ "backends": ["inventory-a"] }))],
    )
}

fn report_calls(gateway: &Gateway) {
    let calls = gateway.backends.drain_calls();
    println!("  Backend calls:          {}", if calls.is_empty() { "none".to_string() } else { calls.join(", ") });
}

pub fn run_scenario() -> GatewayResult<()> {
    println!("=== Scenario 3: Circuit Breaker ===");
    println!();

    let gateway = Gateway::new("circuit");
    let maintenance = gateway.services.spawn_maintenance(DEFAULT_CLEANUP_INTERVAL);
    gateway.service.publish("inventory-breaker", &guarded_route("inventory"))?;

    // ── Sub-case A: failure circuit ──────────────────────────────────────────

    {
        println!("  Sub-case A: inventory-a refuses connections (trip after 2 failures)");
        gateway.backends.take_down("inventory-a");
        for n in 1..=4 {
            gateway.request(&format!("request #{}", n), ExecutionContext::new());
        }
        report_calls(&gateway);

        gateway.backends.bring_up("inventory-a");
        gateway.clock.advance(Duration::from_secs(31));
        println!("  -- 31 s later, inventory-a is back --");
        gateway.request("request #5", ExecutionContext::new());
        report_calls(&gateway);
        println!();
    }

    // ── Sub-case B: latency circuit ──────────────────────────────────────────

    {
        println!("  Sub-case B: inventory-a answers in 400 ms (limit 250 ms)");
        gateway.backends.set_latency("inventory-a", Duration::from_millis(400));
        for n in 1..=3 {
            gateway.request(&format!("slow request #{}", n), ExecutionContext::new());
        }
        report_calls(&gateway);
        gateway.backends.set_latency("inventory-a", Duration::ZERO);
        gateway.clock.advance(Duration::from_secs(31));
        println!();
    }

    // ── Sub-case C: forced open ──────────────────────────────────────────────

    {
        println!("  Sub-case C: operator forces 'inventory' open");
        gateway.services.tracker.force_open("inventory");
        gateway.request("forced request", ExecutionContext::new());
        report_calls(&gateway);

        gateway.services.tracker.clear_forced_open("inventory");
        gateway.request("after clearing", ExecutionContext::new());
        report_calls(&gateway);
        println!("  Tracked circuits:       {}", gateway.services.tracker.tracked());
        println!();
    }

    maintenance.shutdown();
    gateway.print_ledger();
    println!("  Scenario 3 complete.");
    println!();
    Ok(())
}
