//! Name-keyed catalog of step constructors.
//!
//! `StepRegistry` is the stock `StepFactory`: resilience steps, transport
//! steps and test doubles are registered by kind and looked up while a
//! policy compiles. Registration happens at startup; lookups never lock.

use std::collections::HashMap;
use std::sync::Arc;

use portcullis_contracts::error::{GatewayError, GatewayResult};

use crate::traits::{Step, StepFactory};

/// Constructors receive the node's configuration and its compile path.
type LeafConstructor = Box<dyn Fn(&serde_json::Value, &str) -> GatewayResult<Arc<dyn Step>> + Send + Sync>;
type ContainerConstructor =
    Box<dyn Fn(&serde_json::Value, Option<Arc<dyn Step>>, &str) -> GatewayResult<Arc<dyn Step>> + Send + Sync>;

#[derive(Default)]
pub struct StepRegistry {
    leaves: HashMap<String, LeafConstructor>,
    containers: HashMap<String, ContainerConstructor>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a leaf kind. A later registration under the same kind
    /// replaces the earlier one.
    pub fn register_leaf<F>(&mut self, kind: impl Into<String>, constructor: F) -> &mut Self
    where
        F: Fn(&serde_json::Value, &str) -> GatewayResult<Arc<dyn Step>> + Send + Sync + 'static,
    {
        self.leaves.insert(kind.into(), Box::new(constructor));
        self
    }

    pub fn register_container<F>(&mut self, kind: impl Into<String>, constructor: F) -> &mut Self
    where
        F: Fn(&serde_json::Value, Option<Arc<dyn Step>>, &str) -> GatewayResult<Arc<dyn Step>> + Send + Sync + 'static,
    {
        self.containers.insert(kind.into(), Box::new(constructor));
        self
    }

    /// Every registered kind, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self
            .leaves
            .keys()
            .chain(self.containers.keys())
            .map(String::as_str)
            .collect();
        kinds.sort_unstable();
        kinds.dedup();
        kinds
    }
}

impl StepFactory for StepRegistry {
    fn create_leaf(&self, kind: &str, config: &serde_json::Value, path: &str) -> GatewayResult<Arc<dyn Step>> {
        let constructor = self.leaves.get(kind).ok_or_else(|| GatewayError::UnresolvedStep {
            kind: kind.to_string(),
            path: String::new(),
        })?;
        constructor(config, path)
    }

    fn create_container(
        &self,
        kind: &str,
        config: &serde_json::Value,
        body: Option<Arc<dyn Step>>,
        path: &str,
    ) -> GatewayResult<Arc<dyn Step>> {
        let constructor = self.containers.get(kind).ok_or_else(|| GatewayError::UnresolvedStep {
            kind: kind.to_string(),
            path: String::new(),
        })?;
        constructor(config, body, path)
    }
}
