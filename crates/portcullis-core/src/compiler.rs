//! Turns a declarative `AssertionNode` tree into an executable step tree.
//!
//! The three composites are built here. Every `Leaf` and `Container` node is
//! resolved through the `StepFactory`. Compilation is all-or-nothing: the
//! first error aborts it and no partial tree escapes. Errors carry the path
//! of the offending node, e.g. `root/0/2` for the third child of the first
//! child of the root.

use std::sync::Arc;

use tracing::{debug, info};

use portcullis_contracts::{
    assertion::AssertionNode,
    error::{GatewayError, GatewayResult},
};

use crate::{
    composite::{AllStep, ExactlyOneStep, OneOrMoreStep},
    traits::{Step, StepFactory},
};

/// Path label of the root node in compile errors.
pub const ROOT_PATH: &str = "root";

/// Compiles assertion trees against one step factory.
///
/// The compiler is stateless apart from the factory reference, so a single
/// instance may compile any number of trees.
pub struct PolicyCompiler<'f> {
    factory: &'f dyn StepFactory,
}

impl<'f> PolicyCompiler<'f> {
    pub fn new(factory: &'f dyn StepFactory) -> Self {
        Self { factory }
    }

    /// Compile `root` into a shareable step tree.
    ///
    /// # Errors
    ///
    /// - `EmptyComposite` if an `all`, `one-or-more` or `exactly-one` node
    ///   has no children
    /// - `UnresolvedStep` if the factory does not know a step kind
    /// - any error the factory returns for a rejected configuration
    pub fn compile(&self, root: &AssertionNode) -> GatewayResult<Arc<dyn Step>> {
        let step = self.compile_at(root, ROOT_PATH)?;
        info!(root = root.label(), nodes = count_nodes(root), "policy compiled");
        Ok(step)
    }

    fn compile_at(&self, node: &AssertionNode, path: &str) -> GatewayResult<Arc<dyn Step>> {
        debug!(path, node = node.label(), "compiling node");
        match node {
            AssertionNode::Leaf { step, config } => self
                .factory
                .create_leaf(step, config, path)
                .map_err(|e| at_path(e, path)),

            AssertionNode::All { children } => {
                let children = self.compile_children(children, path)?;
                let step = AllStep::new(children).map_err(|e| at_path(e, path))?;
                Ok(Arc::new(step))
            }

            AssertionNode::OneOrMore { children } => {
                let children = self.compile_children(children, path)?;
                let step = OneOrMoreStep::new(children).map_err(|e| at_path(e, path))?;
                Ok(Arc::new(step))
            }

            AssertionNode::ExactlyOne { children } => {
                let children = self.compile_children(children, path)?;
                let step = ExactlyOneStep::new(children).map_err(|e| at_path(e, path))?;
                Ok(Arc::new(step))
            }

            AssertionNode::Container { step, config, children } => {
                let body: Option<Arc<dyn Step>> = if children.is_empty() {
                    None
                } else {
                    let children = self.compile_children(children, path)?;
                    Some(Arc::new(AllStep::new(children).map_err(|e| at_path(e, path))?))
                };
                self.factory
                    .create_container(step, config, body, path)
                    .map_err(|e| at_path(e, path))
            }
        }
    }

    fn compile_children(&self, children: &[AssertionNode], path: &str) -> GatewayResult<Vec<Arc<dyn Step>>> {
        children
            .iter()
            .enumerate()
            .map(|(index, child)| self.compile_at(child, &format!("{}/{}", path, index)))
            .collect()
    }
}

/// Fill in the node path on errors raised without one.
///
/// Errors from deeper nodes already carry their own path and pass through.
fn at_path(error: GatewayError, path: &str) -> GatewayError {
    match error {
        GatewayError::EmptyComposite { kind, path: p } if p.is_empty() => {
            GatewayError::EmptyComposite { kind, path: path.to_string() }
        }
        GatewayError::UnresolvedStep { kind, path: p } if p.is_empty() => {
            GatewayError::UnresolvedStep { kind, path: path.to_string() }
        }
        GatewayError::InvalidStepConfig { kind, path: p, reason } if p.is_empty() => {
            GatewayError::InvalidStepConfig { kind, path: path.to_string(), reason }
        }
        other => other,
    }
}

fn count_nodes(node: &AssertionNode) -> usize {
    1 + node.children().iter().map(count_nodes).sum::<usize>()
}

// ── Tests ────────────────────────────────────────────────────────────────────
