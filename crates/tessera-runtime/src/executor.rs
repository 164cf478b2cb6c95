//! Subgraph execution.

use crate::dynamic;
use crate::error::{Result, RuntimeError};
use crate::kernel::{KernelCtx, KernelRegistry, OpKernel};
use crate::permute::{DynAllocInfoMap, PermuteLayer, dyn_alloc_info_for};
use crate::registry::ExecutorRegistry;
use crate::runtime::RuntimeOptions;
use crate::tensor::TensorArena;
use std::cell::{Ref, RefCell, RefMut};
use std::time::Instant;
use tessera_core::{OperandIndex, Subgraph, SubgraphIndex};

/// Where an executor's copy-in step reads from.
#[derive(Clone, Copy)]
pub enum InputSource<'a> {
    /// Tensors owned by someone else (a parent executor or another child).
    External(&'a TensorArena),

    /// This executor's own tensors, i.e. its outputs from the previous run.
    OwnOutputs,
}

/// A runnable compiled subgraph.
///
/// This is the capability control-flow kernels need from a child: its graph
/// for liveness queries, its ordered input and output slots, and an entry
/// point that copies inputs in and runs every operation.
pub trait Executor {
    /// Identifier of the subgraph this executor runs.
    fn subgraph_index(&self) -> SubgraphIndex;

    /// The subgraph IR.
    fn graph(&self) -> &Subgraph;

    /// Input slots, in declaration order.
    fn input_tensors(&self) -> &[OperandIndex];

    /// Output slots, in declaration order.
    fn output_tensors(&self) -> &[OperandIndex];

    /// Dynamic-allocation records for the input slots.
    fn inputs_dyn_alloc_info(&self) -> &DynAllocInfoMap;

    /// Read access to this executor's tensors.
    fn tensors(&self) -> Result<Ref<'_, TensorArena>>;

    /// Write access to this executor's tensors.
    fn tensors_mut(&self) -> Result<RefMut<'_, TensorArena>>;

    /// Populate the inputs through `copy`, then run every operation.
    ///
    /// On success the output tensors hold this run's results.
    fn execute(
        &self,
        source: InputSource<'_>,
        copy: &PermuteLayer,
        registry: &ExecutorRegistry,
    ) -> Result<()>;
}

/// Executes one subgraph's kernels in dependency order.
///
/// The executor exclusively owns one tensor per operand. Kernels, including
/// control-flow kernels reaching into child executors, only ever borrow it.
pub struct SubgraphExecutor {
    index: SubgraphIndex,
    graph: Subgraph,
    /// Kernels in topological order.
    kernels: Vec<Box<dyn OpKernel>>,
    tensors: RefCell<TensorArena>,
    inputs_dyn_alloc_info: DynAllocInfoMap,
    options: RuntimeOptions,
}

impl SubgraphExecutor {
    /// Build kernels for every operation and allocate tensors.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph has a cycle, an operation has no
    /// registered kernel, or a constant is malformed.
    pub fn new(
        index: SubgraphIndex,
        graph: Subgraph,
        kernels: &KernelRegistry,
        options: RuntimeOptions,
    ) -> Result<Self> {
        let order = graph.topological_order()?;
        let kernels = order
            .into_iter()
            .map(|id| kernels.create(graph.operation(id)?, &graph))
            .collect::<Result<Vec<_>>>()?;

        let tensors = TensorArena::for_subgraph(&graph)?;
        let inputs_dyn_alloc_info = dyn_alloc_info_for(graph.inputs());

        tracing::debug!(
            subgraph = index.index(),
            num_kernels = kernels.len(),
            num_tensors = tensors.len(),
            "subgraph executor built"
        );

        Ok(Self {
            index,
            graph,
            kernels,
            tensors: RefCell::new(tensors),
            inputs_dyn_alloc_info,
            options,
        })
    }

    fn run_kernels(&self, tensors: &mut TensorArena, registry: &ExecutorRegistry) -> Result<()> {
        for kernel in &self.kernels {
            let mut ctx = KernelCtx {
                graph: &self.graph,
                tensors: &mut *tensors,
                registry,
                options: &self.options,
            };

            if self.options.profile {
                let start = Instant::now();
                kernel.run(&mut ctx)?;
                tracing::debug!(
                    subgraph = self.index.index(),
                    kernel = kernel.name(),
                    elapsed_us = start.elapsed().as_micros() as u64,
                    "kernel finished"
                );
            } else {
                kernel.run(&mut ctx)?;
            }
        }
        Ok(())
    }
}

impl Executor for SubgraphExecutor {
    fn subgraph_index(&self) -> SubgraphIndex {
        self.index
    }

    fn graph(&self) -> &Subgraph {
        &self.graph
    }

    fn input_tensors(&self) -> &[OperandIndex] {
        self.graph.inputs()
    }

    fn output_tensors(&self) -> &[OperandIndex] {
        self.graph.outputs()
    }

    fn inputs_dyn_alloc_info(&self) -> &DynAllocInfoMap {
        &self.inputs_dyn_alloc_info
    }

    fn tensors(&self) -> Result<Ref<'_, TensorArena>> {
        self.tensors
            .try_borrow()
            .map_err(|_| RuntimeError::ReentrantExecution(self.index))
    }

    fn tensors_mut(&self) -> Result<RefMut<'_, TensorArena>> {
        self.tensors
            .try_borrow_mut()
            .map_err(|_| RuntimeError::ReentrantExecution(self.index))
    }

    fn execute(
        &self,
        source: InputSource<'_>,
        copy: &PermuteLayer,
        registry: &ExecutorRegistry,
    ) -> Result<()> {
        let mut tensors = self.tensors_mut()?;

        // Inputs that receive a new shape become dynamic before the copy
        match source {
            InputSource::External(src) => {
                dynamic::reconcile(
                    copy,
                    src,
                    &mut tensors,
                    &self.inputs_dyn_alloc_info,
                    &self.graph,
                )?;
                copy.run(src, &mut tensors)?;
            }
            InputSource::OwnOutputs => {
                dynamic::reconcile_within(
                    copy,
                    &mut tensors,
                    &self.inputs_dyn_alloc_info,
                    &self.graph,
                )?;
                copy.run_within(&mut tensors)?;
            }
        }

        self.run_kernels(&mut tensors, registry)
    }
}
