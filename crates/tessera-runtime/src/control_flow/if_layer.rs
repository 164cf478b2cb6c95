use super::{check_arity, condition_value, get_or_build};
use crate::dynamic;
use crate::error::{Result, RuntimeError};
use crate::executor::{Executor, InputSource};
use crate::kernel::{KernelCtx, OpKernel};
use crate::permute::{DynAllocInfoMap, PermuteLayer, dyn_alloc_info_for};
use crate::registry::ExecutorRegistry;
use std::sync::OnceLock;
use tessera_core::{OperandIndex, Operation, Subgraph, SubgraphIndex};

/// Copy plans for one branch.
#[derive(Debug)]
struct BranchPlans {
    /// Operator inputs -> branch inputs.
    input: PermuteLayer,
    /// Branch outputs -> operator outputs.
    output: PermuteLayer,
}

#[derive(Debug)]
struct IfPlans {
    then_branch: BranchPlans,
    else_branch: BranchPlans,
}

/// Runs exactly one of two subgraphs depending on a boolean condition.
///
/// The condition is a separate operand; `inputs[i]` feeds input `i` of the
/// chosen branch and its output `i` lands in `outputs[i]`.
pub struct IfLayer {
    cond: OperandIndex,
    inputs: Vec<OperandIndex>,
    outputs: Vec<OperandIndex>,
    then_index: SubgraphIndex,
    else_index: SubgraphIndex,
    outputs_dyn_alloc_info: DynAllocInfoMap,
    plans: OnceLock<IfPlans>,
}

impl IfLayer {
    /// Create the kernel.
    ///
    /// # Errors
    ///
    /// Returns `Arity` if `inputs` and `outputs` differ in length.
    pub fn new(
        cond: OperandIndex,
        inputs: Vec<OperandIndex>,
        outputs: Vec<OperandIndex>,
        then_index: SubgraphIndex,
        else_index: SubgraphIndex,
        outputs_dyn_alloc_info: DynAllocInfoMap,
    ) -> Result<Self> {
        check_arity("If outputs", inputs.len(), outputs.len())?;
        Ok(Self {
            cond,
            inputs,
            outputs,
            then_index,
            else_index,
            outputs_dyn_alloc_info,
            plans: OnceLock::new(),
        })
    }

    /// Create the kernel for an `If` operation.
    ///
    /// The first operation input is the condition, the rest are branch
    /// inputs. Branches come from the `then_branch` and `else_branch`
    /// attributes.
    pub fn from_operation(op: &Operation) -> Result<Self> {
        let Some((&cond, inputs)) = op.inputs.split_first() else {
            return Err(RuntimeError::Arity(format!(
                "If '{}' has no condition input",
                op.name
            )));
        };
        Self::new(
            cond,
            inputs.to_vec(),
            op.outputs.clone(),
            op.subgraph_attr("then_branch")?,
            op.subgraph_attr("else_branch")?,
            dyn_alloc_info_for(&op.outputs),
        )
    }

    fn build_branch(&self, branch: &dyn Executor, graph: &Subgraph) -> Result<BranchPlans> {
        check_arity("If branch inputs", self.inputs.len(), branch.input_tensors().len())?;
        check_arity("If branch outputs", self.outputs.len(), branch.output_tensors().len())?;

        let mut input = PermuteLayer::new(
            self.inputs.clone(),
            branch.input_tensors().to_vec(),
            branch.inputs_dyn_alloc_info(),
        );
        input.prepare(branch.graph());

        let mut output = PermuteLayer::new(
            branch.output_tensors().to_vec(),
            self.outputs.clone(),
            &self.outputs_dyn_alloc_info,
        );
        output.prepare(graph);

        Ok(BranchPlans { input, output })
    }

    fn build_plans(&self, registry: &ExecutorRegistry, graph: &Subgraph) -> Result<IfPlans> {
        let then_exec = registry.require(self.then_index)?;
        let else_exec = registry.require(self.else_index)?;
        Ok(IfPlans {
            then_branch: self.build_branch(then_exec, graph)?,
            else_branch: self.build_branch(else_exec, graph)?,
        })
    }
}

impl OpKernel for IfLayer {
    fn name(&self) -> &str {
        "If"
    }

    fn run(&self, ctx: &mut KernelCtx<'_>) -> Result<()> {
        let plans = get_or_build(&self.plans, || self.build_plans(ctx.registry, ctx.graph))?;

        let taken = condition_value(ctx.tensor(self.cond)?)?;
        let (index, plans) = if taken {
            (self.then_index, &plans.then_branch)
        } else {
            (self.else_index, &plans.else_branch)
        };
        let _span = tracing::debug_span!(
            "if",
            then_branch = self.then_index.index(),
            else_branch = self.else_index.index(),
            taken
        )
        .entered();

        let branch = ctx.registry.require(index)?;
        branch.execute(InputSource::External(&*ctx.tensors), &plans.input, ctx.registry)?;

        let branch_tensors = branch.tensors()?;
        dynamic::reconcile(
            &plans.output,
            &branch_tensors,
            ctx.tensors,
            &self.outputs_dyn_alloc_info,
            ctx.graph,
        )?;
        plans.output.run(&branch_tensors, ctx.tensors)
    }
}
