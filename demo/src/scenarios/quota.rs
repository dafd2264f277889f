//! Scenario 2: Throughput quotas
//!
//! A per-requester quota of 3 per minute. Alice uses hers up, Bob is
//! unaffected, and Alice gets a fresh allowance when the minute rolls over.

use std::time::Duration;

use serde_json::json;

use portcullis_contracts::{assertion::AssertionNode, error::GatewayResult};
use portcullis_core::ExecutionContext;

use super::Gateway;

pub fn run_scenario() -> GatewayResult<()> {
    println!("=== Scenario 2: Throughput Quotas ===");
    println!();

    let gateway = Gateway::new("quota");
    let tree = AssertionNode::leaf(
        "throughput-quota",
        json!({
            "counter_name": "search",
            "max": 3,
            "period": "minute",
            "scope": "per-requester",
        }),
    );
    gateway.service.publish("search-quota", &tree)?;

    println!("  Policy: 3 requests per requester per minute");
    for n in 1..=4 {
        gateway.request(&format!("alice #{}", n), ExecutionContext::new().with_requester("alice"));
    }
    gateway.request("bob #1", ExecutionContext::new().with_requester("bob"));
    gateway.request("anonymous", ExecutionContext::new());

    gateway.clock.advance(Duration::from_secs(60));
    println!("  -- one minute later --");
    gateway.request("alice #5", ExecutionContext::new().with_requester("alice"));

    let swept = gateway.services.quotas.gc();
    println!("  Expired counters swept: {}", swept);
    println!();

    gateway.print_ledger();
    println!("  Scenario 2 complete.");
    println!();
    Ok(())
}
