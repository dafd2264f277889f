//! # portcullis-contracts
//!
//! Shared types for the Portcullis gateway core: outcomes, variable values,
//! the declarative assertion tree, audit entries and error types.
//!
//! Every crate in the workspace imports from here. No evaluation logic lives
//! in this crate.

pub mod assertion;
pub mod audit;
pub mod error;
pub mod outcome;
pub mod value;

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use assertion::AssertionNode;
    use audit::RequestId;
    use error::GatewayError;
    use outcome::{Outcome, Status};
    use value::Value;

    // ── Outcome ──────────────────────────────────────────────────────────────

    #[test]
    fn only_success_is_success() {
        assert!(Outcome::success().is_success());
        for status in [
            Status::Falsified,
            Status::Failed,
            Status::ServerError,
            Status::NotApplicable,
            Status::BadRequest,
        ] {
            assert!(!Outcome::from(status).is_success(), "{status} must not be success");
        }
    }

    #[test]
    fn outcome_display_includes_message() {
        let outcome = Outcome::falsified("quota exceeded");
        assert_eq!(outcome.to_string(), "falsified: quota exceeded");
        assert_eq!(Outcome::success().to_string(), "success");
    }

    // ── Value ────────────────────────────────────────────────────────────────

    #[test]
    fn value_accessors_are_type_preserving() {
        let v = Value::Int(42);
        assert_eq!(v.as_int(), Some(42));
        assert_eq!(v.as_str(), None);

        let v = Value::from("42");
        assert_eq!(v.as_str(), Some("42"));
        assert_eq!(v.as_int(), None);
    }

    #[test]
    fn list_renders_comma_separated_and_flattens() {
        let v = Value::from(vec!["a", "b"]);
        assert_eq!(v.to_string(), "a,b");
        assert_eq!(v.to_strings(), vec!["a".to_string(), "b".to_string()]);

        let nested = Value::List(vec![Value::Int(1), Value::from(vec![true, false])]);
        assert_eq!(nested.to_strings(), vec!["1", "true", "false"]);
    }

    // ── AssertionNode ────────────────────────────────────────────────────────

    #[test]
    fn assertion_tree_deserializes_from_tagged_json() {
        let doc = json!({
            "kind": "all",
            "children": [
                { "kind": "leaf", "step": "set-variable", "config": { "name": "x" } },
                {
                    "kind": "exactly-one",
                    "children": [
                        { "kind": "leaf", "step": "a" },
                        { "kind": "leaf", "step": "b" }
                    ]
                }
            ]
        });

        let node: AssertionNode = serde_json::from_value(doc).unwrap();
        assert_eq!(node.label(), "all");
        assert_eq!(node.children().len(), 2);
        assert_eq!(node.children()[1].label(), "exactly-one");
        match &node.children()[1].children()[0] {
            AssertionNode::Leaf { step, config } => {
                assert_eq!(step, "a");
                assert!(config.is_null(), "missing config defaults to null");
            }
            other => panic!("expected leaf, got {:?}", other),
        }
    }

    #[test]
    fn container_children_default_to_empty() {
        let node: AssertionNode =
            serde_json::from_value(json!({ "kind": "container", "step": "circuit-breaker" }))
                .unwrap();
        assert!(node.children().is_empty());
    }

    // ── RequestId ────────────────────────────────────────────────────────────

    #[test]
    fn request_ids_are_unique() {
        let ids: std::collections::HashSet<String> =
            (0..100).map(|_| RequestId::new().to_string()).collect();
        assert_eq!(ids.len(), 100);
    }

    // ── GatewayError display messages ────────────────────────────────────────

    #[test]
    fn error_empty_composite_display() {
        let err = GatewayError::EmptyComposite {
            kind: "all".to_string(),
            path: "root/1".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("all"));
        assert!(msg.contains("root/1"));
    }

    #[test]
    fn error_invalid_step_config_display() {
        let err = GatewayError::InvalidStepConfig {
            kind: "throughput-quota".to_string(),
            path: "root/2".to_string(),
            reason: "max must be a non-negative integer".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid configuration for step 'throughput-quota' at 'root/2': max must be a non-negative integer"
        );
    }

    #[test]
    fn error_empty_signature_display() {
        let err = GatewayError::EmptySignature { owner: "route-orders".to_string() };
        assert!(err.to_string().contains("route-orders"));
    }

    #[test]
    fn error_config_error_display() {
        let err = GatewayError::ConfigError { reason: "missing [policy] table".to_string() };
        let msg = err.to_string();
        assert!(msg.contains("configuration error"));
        assert!(msg.contains("missing [policy] table"));
    }
}
