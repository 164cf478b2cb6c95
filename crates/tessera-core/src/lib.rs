//! Core intermediate representation for the tessera runtime.
//!
//! This crate provides the read-only graph structures every other tessera
//! crate depends on:
//! - Element and shape types (`DataType`, `TensorShape`, `Layout`)
//! - Subgraph IR (`Subgraph`, `Operand`, `Operation`) with per-operand use
//!   tracking, so executors can tell which values are statically dead
//! - Multi-subgraph models (`Model`) whose control-flow operations refer to
//!   other subgraphs by `SubgraphIndex`
//!
//! A subgraph is built once by the surrounding compilation pipeline and is
//! never mutated during execution.

pub mod ir;
pub mod model;
pub mod types;

pub use ir::{
    AttributeValue, Operand, OperandData, OperandIndex, Operation, OperationIndex, Subgraph,
};
pub use model::{Model, SubgraphIndex};
pub use types::{DataType, Layout, TensorShape};

/// Result type using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for tessera-core operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid graph structure: {0}")]
    InvalidGraph(String),

    #[error("Attribute error: {0}")]
    Attribute(String),
}
