//! Error types for the runtime crate.

use tessera_core::{DataType, SubgraphIndex};
use thiserror::Error;

/// Runtime execution errors.
///
/// None of these are retryable: they describe a malformed compiled model or
/// data that a kernel cannot handle, and surface to the caller of
/// `Session::run` unchanged.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// No executor registered for a referenced subgraph.
    #[error("No executor registered for subgraph {}", .0.index())]
    ExecutorNotFound(SubgraphIndex),

    /// Mismatched input/output counts between collaborating units.
    #[error("Arity mismatch: {0}")]
    Arity(String),

    /// Condition subgraph did not produce a single boolean.
    #[error("Invalid condition: {0}")]
    InvalidCondition(String),

    /// A static tensor was asked to take a different shape.
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// Element types of a copy source and destination differ.
    #[error("Data type mismatch: {expected:?} vs {actual:?}")]
    DataTypeMismatch { expected: DataType, actual: DataType },

    /// No kernel registered for an operation type.
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Tensor not found.
    #[error("Tensor not found: {0}")]
    TensorNotFound(String),

    /// An executor was entered while already running.
    #[error("Executor for subgraph {} is already running", .0.index())]
    ReentrantExecution(SubgraphIndex),

    /// Execution failed.
    #[error("Execution failed: {0}")]
    Execution(String),

    /// Error from the IR layer.
    #[error(transparent)]
    Core(#[from] tessera_core::Error),
}

/// Specialized Result type for runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;
