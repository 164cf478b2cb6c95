//! Subgraph executors and control-flow kernels for tessera models.
//!
//! This crate runs the subgraphs of a `tessera_core::Model`, including
//! subgraphs nested inside `If` and `While` operations.
//!
//! # Architecture
//!
//! - **Tensors** - every executor owns a `TensorArena` holding one tensor per
//!   operand of its subgraph; nothing else owns tensors
//! - **Copy plans** - `PermuteLayer` moves data between arenas, skipping
//!   destinations that are statically dead
//! - **Execution** - `SubgraphExecutor` copies its inputs in and runs its
//!   kernels in dependency order
//! - **Control flow** - `IfLayer` and `WhileLayer` look up child executors in
//!   the `ExecutorRegistry` and wire tensors between parent and children
//!
//! # Example
//!
//! ```no_run
//! use tessera_runtime::{KernelRegistry, Runtime, RuntimeOptions, Tensor};
//! # fn load_model() -> tessera_core::Model { unimplemented!() }
//!
//! fn main() -> anyhow::Result<()> {
//!     let mut kernels = KernelRegistry::with_control_flow();
//!     // Register compute kernels for the model's other operations here
//!
//!     let runtime = Runtime::new(RuntimeOptions { profile: true });
//!     let session = runtime.load(load_model(), &kernels)?;
//!
//!     let outputs = session.run(&[("counter", Tensor::scalar(0.0f32))])?;
//!     println!("Result: {:?}", outputs["result"].to_vec::<f32>()?);
//!
//!     Ok(())
//! }
//! ```

pub mod control_flow;
mod dynamic;
mod error;
mod executor;
mod kernel;
mod permute;
mod registry;
mod runtime;
mod tensor;

pub use control_flow::{IfLayer, WhileLayer};
pub use error::{Result, RuntimeError};
pub use executor::{Executor, InputSource, SubgraphExecutor};
pub use kernel::{KernelCtx, KernelFactory, KernelRegistry, OpKernel};
pub use permute::{DynAllocInfo, DynAllocInfoMap, PermuteLayer, dyn_alloc_info_for};
pub use registry::ExecutorRegistry;
pub use runtime::{Runtime, RuntimeOptions, Session};
pub use tensor::{Element, Tensor, TensorArena};
