//! Scenario 4: Failover routing
//!
//! The backend list comes from a request variable. The routing strategy is
//! rebuilt only when that list changes, so sticky and round-robin state
//! carries across requests that share a list.

use serde_json::json;

use portcullis_contracts::{assertion::AssertionNode, error::GatewayResult, value::Value};
use portcullis_core::ExecutionContext;

use super::Gateway;

fn request_for(pool: &[&str]) -> ExecutionContext {
    let mut ctx = ExecutionContext::new();
    ctx.set_variable("pool", pool.to_vec());
    ctx
}

pub fn run_scenario() -> GatewayResult<()> {
    println!("=== Scenario 4: Failover Routing ===");
    println!();

    let gateway = Gateway::new("routing");

    for strategy in ["sticky", "round-robin", "ordered"] {
        println!("  Strategy: {}", strategy);
        let tree = AssertionNode::leaf(
            "failover-route",
            json!({ "backends": ["${pool}"], "strategy": strategy }),
        );
        gateway.service.publish(strategy, &tree)?;

        gateway.backends.take_down("east");
        for n in 1..=2 {
            gateway.request(&format!("east down, request #{}", n), request_for(&["east", "west"]));
        }
        gateway.backends.bring_up("east");
        for n in 3..=4 {
            gateway.request(&format!("east up, request #{}", n), request_for(&["east", "west"]));
        }
        println!("  Backend calls:          {}", gateway.backends.drain_calls().join(", "));
        println!();
    }

    println!("  All backends down");
    gateway.backends.take_down("east");
    gateway.backends.take_down("west");
    gateway.request("request", request_for(&["east", "west"]));
    gateway.request("no pool variable", ExecutionContext::new());

    let mut empty = ExecutionContext::new();
    empty.set_variable("pool", Value::List(Vec::new()));
    gateway.request("empty pool", empty);
    println!();

    gateway.print_ledger();
    println!("  Scenario 4 complete.");
    println!();
    Ok(())
}
