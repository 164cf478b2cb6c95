//! Control-flow kernels.
//!
//! `If` and `While` operations own no tensors of their own beyond their
//! operator inputs and outputs. They move data in and out of child subgraph
//! executors through prepared `PermuteLayer`s and run those executors in the
//! order the construct demands.

mod if_layer;
mod while_layer;

pub use if_layer::IfLayer;
pub use while_layer::WhileLayer;

use crate::error::{Result, RuntimeError};
use crate::kernel::{KernelRegistry, OpKernel};
use crate::tensor::Tensor;
use std::sync::OnceLock;
use tessera_core::{DataType, Operation, Subgraph};

/// Register the `If` and `While` kernels.
pub fn register(registry: &mut KernelRegistry) {
    registry
        .register("If", create_if)
        .register("While", create_while);
}

fn create_if(op: &Operation, _graph: &Subgraph) -> Result<Box<dyn OpKernel>> {
    Ok(Box::new(IfLayer::from_operation(op)?))
}

fn create_while(op: &Operation, _graph: &Subgraph) -> Result<Box<dyn OpKernel>> {
    Ok(Box::new(WhileLayer::from_operation(op)?))
}

/// Return the cached value, building and caching it on first use.
///
/// A failed build leaves the cell empty so a later run retries.
fn get_or_build<T>(cell: &OnceLock<T>, build: impl FnOnce() -> Result<T>) -> Result<&T> {
    if let Some(value) = cell.get() {
        return Ok(value);
    }
    let value = build()?;
    Ok(cell.get_or_init(|| value))
}

/// Read a condition tensor as a boolean.
///
/// # Errors
///
/// Returns `InvalidCondition` unless the tensor is a single-element `Bool`.
fn condition_value(tensor: &Tensor) -> Result<bool> {
    if tensor.dtype() != DataType::Bool || tensor.num_elements() != 1 {
        return Err(RuntimeError::InvalidCondition(format!(
            "expected a single Bool element, got {:?} of shape {:?}",
            tensor.dtype(),
            tensor.shape()
        )));
    }
    Ok(tensor.buffer()[0] != 0)
}

/// Fail with `Arity` unless `actual == expected`.
fn check_arity(what: &str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(RuntimeError::Arity(format!(
            "{what}: expected {expected}, got {actual}"
        )));
    }
    Ok(())
}
