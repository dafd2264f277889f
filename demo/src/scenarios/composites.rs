//! Scenario 1: Composite control flow
//!
//! Sub-case A: OR tries branches until one succeeds
//! Sub-case B: XOR rejects a request that matches two branches
//! Sub-case C: a late AND failure hands back the quota unit taken earlier

use serde_json::json;

use portcullis_contracts::{assertion::AssertionNode, error::GatewayResult, value::Value};
use portcullis_core::ExecutionContext;
use portcullis_resilience::QuotaKey;

use super::Gateway;

fn require(name: &str, equals: &str) -> AssertionNode {
    AssertionNode::leaf("require-variable", json!({ "name": name, "equals": equals }))
}

pub fn run_scenario() -> GatewayResult<()> {
    println!("=== Scenario 1: Composite Control Flow ===");
    println!();

    let gateway = Gateway::new("composites");

    // ── Sub-case A: First-Success-OR ─────────────────────────────────────────

    {
        println!("  Sub-case A: OR(region = eu, region = us, respond falsified)");
        let tree = AssertionNode::one_or_more(vec![
            require("region", "eu"),
            require("region", "us"),
            AssertionNode::leaf("respond", json!({ "status": "falsified", "message": "unsupported region" })),
        ]);
        gateway.service.publish("region-or", &tree)?;

        for region in ["us", "apac"] {
            let mut ctx = ExecutionContext::new();
            ctx.set_variable("region", region);
            gateway.request(&format!("region = {}", region), ctx);
        }
        println!();
    }

    // ── Sub-case B: Exactly-One-XOR ──────────────────────────────────────────

    {
        println!("  Sub-case B: XOR(tier = gold, beta = true)");
        let tree = AssertionNode::exactly_one(vec![
            require("tier", "gold"),
            AssertionNode::leaf("require-variable", json!({ "name": "beta", "equals": true })),
        ]);
        gateway.service.publish("tier-xor", &tree)?;

        for (tier, beta) in [("gold", false), ("gold", true), ("silver", false)] {
            let mut ctx = ExecutionContext::new();
            ctx.set_variable("tier", tier);
            ctx.set_variable("beta", Value::Bool(beta));
            gateway.request(&format!("tier = {}, beta = {}", tier, beta), ctx);
        }
        println!();
    }

    // ── Sub-case C: AND rollback ─────────────────────────────────────────────

    {
        println!("  Sub-case C: AND(quota 'checkout' max 5, tier = gold)");
        let tree = AssertionNode::all(vec![
            AssertionNode::leaf(
                "throughput-quota",
                json!({ "counter_name": "checkout", "max": 5, "period": "hour" }),
            ),
            require("tier", "gold"),
        ]);
        gateway.service.publish("checkout-and", &tree)?;

        for tier in ["gold", "silver", "silver"] {
            let mut ctx = ExecutionContext::new();
            ctx.set_variable("tier", tier);
            gateway.request(&format!("tier = {}", tier), ctx);
        }
        let used = gateway
            .services
            .quotas
            .snapshot(&QuotaKey::global("checkout"))
            .map(|s| s.value)
            .unwrap_or(0);
        println!("  Quota units held:       {} (denied requests gave theirs back)", used);
        println!();
    }

    gateway.print_ledger();
    println!("  Scenario 1 complete.");
    println!();
    Ok(())
}
