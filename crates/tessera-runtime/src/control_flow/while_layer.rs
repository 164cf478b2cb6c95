use super::{check_arity, condition_value, get_or_build};
use crate::dynamic;
use crate::error::{Result, RuntimeError};
use crate::executor::{Executor, InputSource};
use crate::kernel::{KernelCtx, OpKernel};
use crate::permute::{DynAllocInfoMap, PermuteLayer, dyn_alloc_info_for};
use crate::registry::ExecutorRegistry;
use std::sync::OnceLock;
use tessera_core::{OperandIndex, Operation, Subgraph, SubgraphIndex};

/// Copy plans of one `While` kernel, built once on the first run.
#[derive(Debug)]
struct WhilePlans {
    op_input_to_cond_input: PermuteLayer,
    /// Used when the body never ran.
    op_input_to_op_output: PermuteLayer,
    op_input_to_body_input: PermuteLayer,
    body_output_to_cond_input: PermuteLayer,
    /// Loop-carried state; skips inputs that are body outputs themselves.
    body_output_to_body_input: PermuteLayer,
    body_output_to_op_output: PermuteLayer,
}

/// Where the body reads its inputs from on the next iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    /// Body has not run yet: feed it the operator inputs.
    FirstIteration,
    /// Body ran at least once: feed it its own outputs.
    SteadyState,
}

/// Runs a body subgraph for as long as a condition subgraph yields `true`.
///
/// Operator input `i` is loop-carried value `i`: it feeds condition input
/// `i`, body input `i`, and ends up in operator output `i`. Body output `i`
/// becomes the next value of loop-carried value `i`.
pub struct WhileLayer {
    inputs: Vec<OperandIndex>,
    outputs: Vec<OperandIndex>,
    cond_index: SubgraphIndex,
    body_index: SubgraphIndex,
    outputs_dyn_alloc_info: DynAllocInfoMap,
    plans: OnceLock<WhilePlans>,
}

impl WhileLayer {
    /// Create the kernel.
    ///
    /// The registry may not hold the condition and body executors yet; they
    /// are resolved on the first run.
    ///
    /// # Errors
    ///
    /// Returns `Arity` if `inputs` and `outputs` differ in length.
    pub fn new(
        inputs: Vec<OperandIndex>,
        outputs: Vec<OperandIndex>,
        cond_index: SubgraphIndex,
        body_index: SubgraphIndex,
        outputs_dyn_alloc_info: DynAllocInfoMap,
    ) -> Result<Self> {
        check_arity("While outputs", inputs.len(), outputs.len())?;
        Ok(Self {
            inputs,
            outputs,
            cond_index,
            body_index,
            outputs_dyn_alloc_info,
            plans: OnceLock::new(),
        })
    }

    /// Create the kernel for a `While` operation with `cond` and `body`
    /// subgraph attributes.
    pub fn from_operation(op: &Operation) -> Result<Self> {
        Self::new(
            op.inputs.clone(),
            op.outputs.clone(),
            op.subgraph_attr("cond")?,
            op.subgraph_attr("body")?,
            dyn_alloc_info_for(&op.outputs),
        )
    }

    fn build_plans(
        &self,
        cond: &dyn Executor,
        body: &dyn Executor,
        graph: &Subgraph,
    ) -> Result<WhilePlans> {
        let cond_inputs = cond.input_tensors();
        let body_inputs = body.input_tensors();
        let body_outputs = body.output_tensors();

        check_arity("While condition inputs", self.inputs.len(), cond_inputs.len())?;
        if cond.output_tensors().len() != 1 {
            return Err(RuntimeError::InvalidCondition(format!(
                "condition subgraph {} has {} outputs, expected 1",
                self.cond_index.index(),
                cond.output_tensors().len()
            )));
        }
        check_arity("While body inputs", self.inputs.len(), body_inputs.len())?;
        check_arity("While body outputs", body_inputs.len(), body_outputs.len())?;

        let plan = |sources: &[OperandIndex],
                    destinations: &[OperandIndex],
                    dyn_alloc_info: &DynAllocInfoMap,
                    dst_graph: &Subgraph| {
            let mut layer =
                PermuteLayer::new(sources.to_vec(), destinations.to_vec(), dyn_alloc_info);
            layer.prepare(dst_graph);
            layer
        };

        // Inputs that are also body outputs already hold the carried value
        let (feedback_src, feedback_dst): (Vec<_>, Vec<_>) = body_outputs
            .iter()
            .zip(body_inputs)
            .filter(|&(_, &input)| !body.graph().is_output(input))
            .map(|(&output, &input)| (output, input))
            .unzip();

        Ok(WhilePlans {
            op_input_to_cond_input: plan(
                &self.inputs,
                cond_inputs,
                cond.inputs_dyn_alloc_info(),
                cond.graph(),
            ),
            op_input_to_op_output: plan(
                &self.inputs,
                &self.outputs,
                &self.outputs_dyn_alloc_info,
                graph,
            ),
            op_input_to_body_input: plan(
                &self.inputs,
                body_inputs,
                body.inputs_dyn_alloc_info(),
                body.graph(),
            ),
            body_output_to_cond_input: plan(
                body_outputs,
                cond_inputs,
                cond.inputs_dyn_alloc_info(),
                cond.graph(),
            ),
            body_output_to_body_input: plan(
                &feedback_src,
                &feedback_dst,
                body.inputs_dyn_alloc_info(),
                body.graph(),
            ),
            body_output_to_op_output: plan(
                body_outputs,
                &self.outputs,
                &self.outputs_dyn_alloc_info,
                graph,
            ),
        })
    }

    fn evaluate(cond: &dyn Executor) -> Result<bool> {
        let Some(&output) = cond.output_tensors().first() else {
            return Err(RuntimeError::InvalidCondition(
                "condition subgraph has no output".to_string(),
            ));
        };
        let tensors = cond.tensors()?;
        condition_value(tensors.get(output)?)
    }
}

impl OpKernel for WhileLayer {
    fn name(&self) -> &str {
        "While"
    }

    fn run(&self, ctx: &mut KernelCtx<'_>) -> Result<()> {
        let registry: &ExecutorRegistry = ctx.registry;
        let cond = registry.require(self.cond_index)?;
        let body = registry.require(self.body_index)?;
        let plans = get_or_build(&self.plans, || self.build_plans(cond, body, ctx.graph))?;

        let _span = tracing::debug_span!(
            "while",
            cond = self.cond_index.index(),
            body = self.body_index.index()
        )
        .entered();

        cond.execute(
            InputSource::External(&*ctx.tensors),
            &plans.op_input_to_cond_input,
            registry,
        )?;

        let mut state = LoopState::FirstIteration;
        let mut iterations = 0usize;
        while Self::evaluate(cond)? {
            match state {
                LoopState::FirstIteration => body.execute(
                    InputSource::External(&*ctx.tensors),
                    &plans.op_input_to_body_input,
                    registry,
                )?,
                LoopState::SteadyState => body.execute(
                    InputSource::OwnOutputs,
                    &plans.body_output_to_body_input,
                    registry,
                )?,
            }

            let body_tensors = body.tensors()?;
            cond.execute(
                InputSource::External(&body_tensors),
                &plans.body_output_to_cond_input,
                registry,
            )?;

            state = LoopState::SteadyState;
            iterations += 1;
            tracing::trace!(iteration = iterations, "while iteration finished");
        }
        tracing::debug!(iterations, "while finished");

        match state {
            LoopState::FirstIteration => {
                let exit = &plans.op_input_to_op_output;
                dynamic::reconcile_within(
                    exit,
                    ctx.tensors,
                    &self.outputs_dyn_alloc_info,
                    ctx.graph,
                )?;
                exit.run_within(ctx.tensors)
            }
            LoopState::SteadyState => {
                let exit = &plans.body_output_to_op_output;
                let body_tensors = body.tensors()?;
                dynamic::reconcile(
                    exit,
                    &body_tensors,
                    ctx.tensors,
                    &self.outputs_dyn_alloc_info,
                    ctx.graph,
                )?;
                exit.run(&body_tensors, ctx.tensors)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::AttributeValue;

    fn while_op() -> Operation {
        Operation::new("While")
            .with_name("loop")
            .with_operands(vec![OperandIndex(0)], vec![OperandIndex(1)])
            .with_attribute("cond", AttributeValue::Subgraph(SubgraphIndex(1)))
            .with_attribute("body", AttributeValue::Subgraph(SubgraphIndex(2)))
    }

    #[test]
    fn test_from_operation() {
        let layer = WhileLayer::from_operation(&while_op()).unwrap();
        assert_eq!(layer.name(), "While");
        assert_eq!(layer.cond_index, SubgraphIndex(1));
        assert_eq!(layer.body_index, SubgraphIndex(2));
        assert_eq!(layer.inputs, vec![OperandIndex(0)]);
        assert_eq!(layer.outputs, vec![OperandIndex(1)]);
    }

    #[test]
    fn test_arity_checked_at_construction() {
        let result = WhileLayer::new(
            vec![OperandIndex(0), OperandIndex(1)],
            vec![OperandIndex(2)],
            SubgraphIndex(1),
            SubgraphIndex(2),
            DynAllocInfoMap::new(),
        );
        assert!(matches!(result, Err(RuntimeError::Arity(_))));
    }

    #[test]
    fn test_missing_body_attribute() {
        let op = Operation::new("While")
            .with_attribute("cond", AttributeValue::Subgraph(SubgraphIndex(1)));
        assert!(matches!(WhileLayer::from_operation(&op), Err(RuntimeError::Core(_))));
    }
}
