//! Scenario 5: Policy document
//!
//! Loads a TOML policy (the bundled `policies/orders.toml` unless a path is
//! given), publishes it, and runs a handful of requests through it. Then
//! tries to publish a broken revision and shows the live version is kept.

use std::path::Path;

use serde_json::json;

use portcullis_contracts::{assertion::AssertionNode, error::GatewayResult, value::Value};
use portcullis_core::ExecutionContext;
use portcullis_policy::PolicyDocument;

use super::Gateway;

const ORDERS_POLICY: &str = include_str!("../../policies/orders.toml");

fn order(requester: &str, plan: Option<&str>, limit: i64) -> ExecutionContext {
    let mut ctx = ExecutionContext::new().with_requester(requester);
    if let Some(plan) = plan {
        ctx.set_variable("requester.plan", plan);
    }
    ctx.set_variable("plan.limit", Value::Int(limit));
    ctx.set_variable("inventory.pool", vec!["inventory-a", "inventory-b"]);
    ctx
}

pub fn run_scenario(path: Option<&Path>) -> GatewayResult<()> {
    println!("=== Scenario 5: Policy Document ===");
    println!();

    let document = match path {
        Some(path) => {
            println!("  Source: {}", path.display());
            PolicyDocument::from_file(path)?
        }
        None => {
            println!("  Source: bundled policies/orders.toml");
            PolicyDocument::from_toml_str(ORDERS_POLICY)?
        }
    };

    let gateway = Gateway::new(&document.settings.name);
    document.settings.apply(&gateway.services.tracker);
    let maintenance = gateway.services.spawn_maintenance(document.settings.cleanup_interval());

    let version = gateway.service.publish_document(&document)?;
    println!("  Published '{}' as version {}", document.settings.name, version);
    println!();

    gateway.backends.take_down("inventory-a");
    gateway.request("alice (gold, limit 2)", order("alice", Some("gold"), 2));
    gateway.request("alice (gold, limit 2)", order("alice", Some("gold"), 2));
    gateway.request("alice (gold, limit 2)", order("alice", Some("gold"), 2));
    gateway.request("bob (standard, limit 5)", order("bob", Some("standard"), 5));
    gateway.request("carol (platinum)", order("carol", Some("platinum"), 5));
    gateway.request("dave (no plan)", order("dave", None, 5));
    println!("  Backend calls:          {}", gateway.backends.drain_calls().join(", "));
    println!();

    println!("  Publishing a revision that names an unknown step...");
    let broken = AssertionNode::all(vec![
        document.policy.clone(),
        AssertionNode::leaf("geo-fence", json!({ "allow": ["eu"] })),
    ]);
    match gateway.service.publish("orders-api-v2", &broken) {
        Ok(version) => println!("  Unexpectedly published version {}", version),
        Err(e) => println!("  Rejected:               {}", e),
    }
    if let Some(live) = gateway.service.current() {
        println!("  Live version:           {} ('{}')", live.version(), live.name());
    }
    println!();

    maintenance.shutdown();
    gateway.print_ledger();
    println!("  Scenario 5 complete.");
    println!();
    Ok(())
}
