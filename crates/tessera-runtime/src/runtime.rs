//! Runtime configuration and the model-level entry point.

use crate::error::{Result, RuntimeError};
use crate::executor::{Executor, InputSource, SubgraphExecutor};
use crate::kernel::KernelRegistry;
use crate::permute::PermuteLayer;
use crate::registry::ExecutorRegistry;
use crate::tensor::{Tensor, TensorArena};
use std::collections::HashMap;
use tessera_core::{Model, OperandIndex, SubgraphIndex};

/// Runtime configuration.
#[derive(Debug, Clone, Default)]
pub struct RuntimeOptions {
    /// Log the wall time of every kernel at `debug` level.
    pub profile: bool,
}

/// Main entry point: compiles models into runnable sessions.
///
/// # Example
/// ```
/// # use tessera_runtime::{KernelRegistry, Runtime, RuntimeOptions};
/// # use tessera_core::{Model, Subgraph};
/// let runtime = Runtime::new(RuntimeOptions::default());
/// let session = runtime
///     .load(Model::new("empty", Subgraph::new()), &KernelRegistry::with_control_flow())
///     .unwrap();
/// assert!(session.input_names().is_empty());
/// ```
#[derive(Debug, Clone, Default)]
pub struct Runtime {
    options: RuntimeOptions,
}

impl Runtime {
    /// Create a runtime.
    pub fn new(options: RuntimeOptions) -> Self {
        Self { options }
    }

    /// Get the runtime configuration.
    pub fn options(&self) -> &RuntimeOptions {
        &self.options
    }

    /// Build an executor for every subgraph of `model`.
    ///
    /// # Errors
    /// Returns an error if the model is malformed or an operation has no
    /// kernel in `kernels`.
    #[tracing::instrument(skip_all, fields(model = %model.name, subgraphs = model.subgraphs.len()))]
    pub fn load(&self, model: Model, kernels: &KernelRegistry) -> Result<Session> {
        model.validate()?;

        let mut executors = ExecutorRegistry::new();
        for (i, graph) in model.subgraphs.into_iter().enumerate() {
            let index = SubgraphIndex(i);
            let executor = SubgraphExecutor::new(index, graph, kernels, self.options.clone())?;
            executors.insert(index, Box::new(executor));
        }

        Session::new(executors)
    }
}

/// A loaded model ready to run.
pub struct Session {
    executors: ExecutorRegistry,
    input_names: Vec<String>,
    output_names: Vec<String>,
}

impl Session {
    fn new(executors: ExecutorRegistry) -> Result<Self> {
        let primary = executors.require(SubgraphIndex::PRIMARY)?;
        let input_names = operand_names(primary, primary.input_tensors())?;
        let output_names = operand_names(primary, primary.output_tensors())?;

        Ok(Self {
            executors,
            input_names,
            output_names,
        })
    }

    /// Run the primary subgraph.
    ///
    /// Inputs that are not supplied keep the value of the previous run.
    ///
    /// # Errors
    /// Returns `TensorNotFound` for an unknown input name, or any error raised
    /// while executing.
    #[tracing::instrument(skip_all, fields(inputs = inputs.len()))]
    pub fn run(&self, inputs: &[(&str, Tensor)]) -> Result<HashMap<String, Tensor>> {
        let primary = self.executors.require(SubgraphIndex::PRIMARY)?;

        let mut staged = Vec::with_capacity(inputs.len());
        let mut destinations = Vec::with_capacity(inputs.len());
        for (name, tensor) in inputs {
            let position = self
                .input_names
                .iter()
                .position(|n| n == name)
                .ok_or_else(|| {
                    RuntimeError::TensorNotFound(format!("Input '{name}' not found in model"))
                })?;
            staged.push(tensor.clone());
            destinations.push(primary.input_tensors()[position]);
        }

        let sources = (0..staged.len()).map(OperandIndex).collect();
        let mut copy = PermuteLayer::new(sources, destinations, primary.inputs_dyn_alloc_info());
        copy.prepare(primary.graph());

        let staged = TensorArena::from_tensors(staged);
        primary.execute(InputSource::External(&staged), &copy, &self.executors)?;

        let tensors = primary.tensors()?;
        let mut results = HashMap::new();
        for (name, &slot) in self.output_names.iter().zip(primary.output_tensors()) {
            results.insert(name.clone(), tensors.get(slot)?.clone());
        }
        Ok(results)
    }

    /// Get the primary subgraph's input names, in declaration order.
    pub fn input_names(&self) -> Vec<&str> {
        self.input_names.iter().map(|s| s.as_str()).collect()
    }

    /// Get the primary subgraph's output names, in declaration order.
    pub fn output_names(&self) -> Vec<&str> {
        self.output_names.iter().map(|s| s.as_str()).collect()
    }

    /// Get the executors of every subgraph.
    pub fn executors(&self) -> &ExecutorRegistry {
        &self.executors
    }
}

fn operand_names(executor: &dyn Executor, slots: &[OperandIndex]) -> Result<Vec<String>> {
    slots
        .iter()
        .map(|&slot| -> Result<String> { Ok(executor.graph().operand(slot)?.name.clone()) })
        .collect()
}
