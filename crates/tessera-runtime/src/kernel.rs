//! Kernel traits and the kernel registry.
//!
//! Kernels are opaque, already-configured execution units. The runtime never
//! looks inside them: an executor calls `OpKernel::run` for each operation in
//! dependency order and the kernel reads and writes tensors in the arena it is
//! handed.

use crate::error::{Result, RuntimeError};
use crate::registry::ExecutorRegistry;
use crate::runtime::RuntimeOptions;
use crate::tensor::{Tensor, TensorArena};
use std::collections::HashMap;
use tessera_core::{OperandIndex, Operation, Subgraph};

/// Everything a kernel may touch while it runs.
pub struct KernelCtx<'a> {
    /// The subgraph the kernel belongs to.
    pub graph: &'a Subgraph,

    /// The owning executor's tensors.
    pub tensors: &'a mut TensorArena,

    /// Executors of every subgraph in the model, for control flow.
    pub registry: &'a ExecutorRegistry,

    /// Runtime configuration.
    pub options: &'a RuntimeOptions,
}

impl KernelCtx<'_> {
    /// Get a tensor of the owning executor.
    pub fn tensor(&self, index: OperandIndex) -> Result<&Tensor> {
        self.tensors.get(index)
    }

    /// Get a mutable tensor of the owning executor.
    pub fn tensor_mut(&mut self, index: OperandIndex) -> Result<&mut Tensor> {
        self.tensors.get_mut(index)
    }
}

/// A runnable operation.
///
/// # Example
///
/// ```ignore
/// struct IdentityKernel {
///     input: OperandIndex,
///     output: OperandIndex,
/// }
///
/// impl OpKernel for IdentityKernel {
///     fn name(&self) -> &str {
///         "Identity"
///     }
///
///     fn run(&self, ctx: &mut KernelCtx<'_>) -> Result<()> {
///         let value = ctx.tensor(self.input)?.clone();
///         ctx.tensor_mut(self.output)?.write_from(&value)
///     }
/// }
/// ```
pub trait OpKernel: Send + Sync {
    /// Kernel name for logs and profiling.
    fn name(&self) -> &str;

    /// Execute the operation.
    fn run(&self, ctx: &mut KernelCtx<'_>) -> Result<()>;
}

/// Creates the kernel for one operation.
///
/// Implemented for closures, so simple kernels can be registered inline.
pub trait KernelFactory: Send + Sync {
    /// Build a kernel for `op`, which belongs to `graph`.
    fn create(&self, op: &Operation, graph: &Subgraph) -> Result<Box<dyn OpKernel>>;
}

impl<F> KernelFactory for F
where
    F: Fn(&Operation, &Subgraph) -> Result<Box<dyn OpKernel>> + Send + Sync,
{
    fn create(&self, op: &Operation, graph: &Subgraph) -> Result<Box<dyn OpKernel>> {
        self(op, graph)
    }
}

/// Registry of kernel factories.
///
/// Maps operation type names (e.g., "Add", "While") to the factory that
/// builds their kernels when a subgraph is loaded.
///
/// # Example
///
/// ```ignore
/// let mut registry = KernelRegistry::with_control_flow();
/// registry.register("Add", |op: &Operation, _graph: &Subgraph| {
///     Ok(Box::new(AddKernel::new(op)?) as Box<dyn OpKernel>)
/// });
/// ```
pub struct KernelRegistry {
    factories: HashMap<String, Box<dyn KernelFactory>>,
}

impl KernelRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Create a registry with the `If` and `While` kernels registered.
    pub fn with_control_flow() -> Self {
        let mut registry = Self::new();
        crate::control_flow::register(&mut registry);
        registry
    }

    /// Register a factory.
    ///
    /// Returns `self` for method chaining.
    pub fn register<F>(&mut self, op_type: &str, factory: F) -> &mut Self
    where
        F: KernelFactory + 'static,
    {
        self.factories.insert(op_type.to_string(), Box::new(factory));
        self
    }

    /// Look up a factory by operation type.
    pub fn get(&self, op_type: &str) -> Option<&dyn KernelFactory> {
        self.factories.get(op_type).map(|f| f.as_ref())
    }

    /// Build the kernel for `op`.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedOperation` if no factory is registered for the
    /// operation type.
    pub fn create(&self, op: &Operation, graph: &Subgraph) -> Result<Box<dyn OpKernel>> {
        let factory = self.get(&op.op_type).ok_or_else(|| {
            RuntimeError::UnsupportedOperation(format!(
                "No kernel registered for '{}' (operation '{}')",
                op.op_type, op.name
            ))
        })?;
        factory.create(op, graph)
    }

    /// Check if a factory is registered.
    pub fn contains(&self, op_type: &str) -> bool {
        self.factories.contains_key(op_type)
    }

    /// Get the number of registered factories.
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Iterate over all registered operation types.
    pub fn operator_names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(|s| s.as_str())
    }
}

impl Default for KernelRegistry {
    fn default() -> Self {
        Self::new()
    }
}
