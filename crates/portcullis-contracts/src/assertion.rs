//! The declarative assertion tree.
//!
//! An `AssertionNode` tree is what an administrator publishes. It is parsed
//! elsewhere (the TOML loader in portcullis-policy, or any external format)
//! and handed to the compiler, which never mutates it.

use serde::{Deserialize, Serialize};

/// One node of a policy.
///
/// Composites (`All`, `OneOrMore`, `ExactlyOne`) are compiled by the core
/// engine. `Leaf` and `Container` nodes are resolved by the external step
/// factory using their `step` kind identifier and opaque `config`.
///
/// In TOML the discriminant is the `kind` key:
/// ```toml
/// kind = "all"
///
/// [[children]]
/// kind = "leaf"
/// step = "set-variable"
/// config = { name = "tier", value = "gold" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum AssertionNode {
    /// An opaque processing unit supplied by the step catalog.
    Leaf {
        /// Registry key of the leaf implementation, e.g. "throughput-quota".
        step: String,
        /// Leaf-specific configuration. The core never inspects it.
        #[serde(default)]
        config: serde_json::Value,
    },

    /// Sequential-AND: every child must succeed.
    All { children: Vec<AssertionNode> },

    /// First-Success-OR: at least one child must succeed.
    OneOrMore { children: Vec<AssertionNode> },

    /// Exactly-One-XOR: exactly one child must succeed.
    ExactlyOne { children: Vec<AssertionNode> },

    /// A catalog step that wraps a child policy, such as the circuit breaker.
    ///
    /// The children are compiled as a Sequential-AND body and handed to the
    /// factory. An empty body is allowed.
    Container {
        step: String,
        #[serde(default)]
        config: serde_json::Value,
        #[serde(default)]
        children: Vec<AssertionNode>,
    },
}

impl AssertionNode {
    pub fn leaf(step: impl Into<String>, config: serde_json::Value) -> Self {
        AssertionNode::Leaf { step: step.into(), config }
    }

    pub fn all(children: Vec<AssertionNode>) -> Self {
        AssertionNode::All { children }
    }

    pub fn one_or_more(children: Vec<AssertionNode>) -> Self {
        AssertionNode::OneOrMore { children }
    }

    pub fn exactly_one(children: Vec<AssertionNode>) -> Self {
        AssertionNode::ExactlyOne { children }
    }

    pub fn container(
        step: impl Into<String>,
        config: serde_json::Value,
        children: Vec<AssertionNode>,
    ) -> Self {
        AssertionNode::Container { step: step.into(), config, children }
    }

    /// A short label used in logs and compile error paths.
    pub fn label(&self) -> &str {
        match self {
            AssertionNode::Leaf { step, .. } | AssertionNode::Container { step, .. } => step,
            AssertionNode::All { .. } => "all",
            AssertionNode::OneOrMore { .. } => "one-or-more",
            AssertionNode::ExactlyOne { .. } => "exactly-one",
        }
    }

    /// Child nodes in declaration order. Leaves have none.
    pub fn children(&self) -> &[AssertionNode] {
        match self {
            AssertionNode::Leaf { .. } => &[],
            AssertionNode::All { children }
            | AssertionNode::OneOrMore { children }
            | AssertionNode::ExactlyOne { children }
            | AssertionNode::Container { children, .. } => children,
        }
    }
}
