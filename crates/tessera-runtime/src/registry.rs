//! Executor registry for subgraph lookup at run time.

use crate::error::{Result, RuntimeError};
use crate::executor::Executor;
use std::collections::HashMap;
use tessera_core::SubgraphIndex;

/// Maps subgraph identifiers to their executors.
///
/// Populated once while a model is loaded and only read afterwards. Control
/// flow kernels are built before their child executors exist, so they keep a
/// `SubgraphIndex` and resolve it here on every run.
pub struct ExecutorRegistry {
    executors: HashMap<SubgraphIndex, Box<dyn Executor>>,
}

impl ExecutorRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            executors: HashMap::new(),
        }
    }

    /// Register the executor for a subgraph, replacing any previous one.
    pub fn insert(&mut self, index: SubgraphIndex, executor: Box<dyn Executor>) {
        self.executors.insert(index, executor);
    }

    /// Look up an executor.
    pub fn get(&self, index: SubgraphIndex) -> Option<&dyn Executor> {
        self.executors.get(&index).map(|e| e.as_ref())
    }

    /// Look up an executor that must exist.
    ///
    /// # Errors
    ///
    /// Returns `ExecutorNotFound` if nothing is registered for `index`.
    pub fn require(&self, index: SubgraphIndex) -> Result<&dyn Executor> {
        self.get(index)
            .ok_or(RuntimeError::ExecutorNotFound(index))
    }

    /// Check if an executor is registered.
    pub fn contains(&self, index: SubgraphIndex) -> bool {
        self.executors.contains_key(&index)
    }

    /// Get the number of registered executors.
    pub fn len(&self) -> usize {
        self.executors.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
