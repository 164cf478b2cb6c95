//! Common test utilities for control-flow integration tests.
//!
//! This module provides a handful of reference kernels and graph builders
//! shared by the test files in this directory.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tessera_core::{
    AttributeValue, DataType, Model, Operand, OperandIndex, Operation, Subgraph, SubgraphIndex,
    TensorShape,
};
use tessera_runtime::{KernelCtx, KernelRegistry, OpKernel, Result, RuntimeError, Tensor};

/// Initialize a tracing subscriber once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_test_writer()
        .try_init();
}

/// Values seen by `Record` kernels, grouped by the kernel's `log` attribute.
#[derive(Clone, Default)]
pub struct Logs(Arc<Mutex<HashMap<String, Vec<Vec<f32>>>>>);

impl Logs {
    fn push(&self, log: &str, values: Vec<f32>) {
        self.0
            .lock()
            .unwrap()
            .entry(log.to_string())
            .or_default()
            .push(values);
    }

    /// Every value recorded under `log`, oldest first.
    pub fn entries(&self, log: &str) -> Vec<Vec<f32>> {
        self.0.lock().unwrap().get(log).cloned().unwrap_or_default()
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }
}

// ================================================================================
// Reference kernels
// ================================================================================

/// `out = a + b`, where `b` may be a single element.
struct AddKernel {
    a: OperandIndex,
    b: OperandIndex,
    out: OperandIndex,
}

impl OpKernel for AddKernel {
    fn name(&self) -> &str {
        "Add"
    }

    fn run(&self, ctx: &mut KernelCtx<'_>) -> Result<()> {
        let a = ctx.tensor(self.a)?;
        let shape = a.shape().to_vec();
        let a = a.to_vec::<f32>()?;
        let b = ctx.tensor(self.b)?.to_vec::<f32>()?;

        let sum: Vec<f32> = if b.len() == 1 {
            a.iter().map(|x| x + b[0]).collect()
        } else {
            a.iter().zip(&b).map(|(x, y)| x + y).collect()
        };
        ctx.tensor_mut(self.out)?
            .write_from(&Tensor::from_vec(sum, &shape))
    }
}

/// `out = a[0] < b[0]` as a scalar `Bool`.
struct LessKernel {
    a: OperandIndex,
    b: OperandIndex,
    out: OperandIndex,
}

impl OpKernel for LessKernel {
    fn name(&self) -> &str {
        "Less"
    }

    fn run(&self, ctx: &mut KernelCtx<'_>) -> Result<()> {
        let a = ctx.tensor(self.a)?.to_vec::<f32>()?;
        let b = ctx.tensor(self.b)?.to_vec::<f32>()?;
        ctx.tensor_mut(self.out)?
            .write_from(&Tensor::from_bools(vec![a[0] < b[0]], &[]))
    }
}

struct IdentityKernel {
    input: OperandIndex,
    out: OperandIndex,
}

impl OpKernel for IdentityKernel {
    fn name(&self) -> &str {
        "Identity"
    }

    fn run(&self, ctx: &mut KernelCtx<'_>) -> Result<()> {
        let value = ctx.tensor(self.input)?.clone();
        ctx.tensor_mut(self.out)?.write_from(&value)
    }
}

/// `out = concat(a, b)` over flattened `f32` data; grows every call.
struct AppendKernel {
    a: OperandIndex,
    b: OperandIndex,
    out: OperandIndex,
}

impl OpKernel for AppendKernel {
    fn name(&self) -> &str {
        "Append"
    }

    fn run(&self, ctx: &mut KernelCtx<'_>) -> Result<()> {
        let mut values = ctx.tensor(self.a)?.to_vec::<f32>()?;
        values.extend(ctx.tensor(self.b)?.to_vec::<f32>()?);
        let len = values.len();
        ctx.tensor_mut(self.out)?
            .write_from(&Tensor::from_vec(values, &[len]))
    }
}

/// Records the value of its input every time it runs.
struct RecordKernel {
    input: OperandIndex,
    log: String,
    logs: Logs,
}

impl OpKernel for RecordKernel {
    fn name(&self) -> &str {
        "Record"
    }

    fn run(&self, ctx: &mut KernelCtx<'_>) -> Result<()> {
        let values = ctx.tensor(self.input)?.to_vec::<f32>()?;
        self.logs.push(&self.log, values);
        Ok(())
    }
}

/// Fails once it has run more than `runs` times, so a runaway loop errors
/// out instead of hanging the test.
struct BudgetKernel {
    runs: usize,
    seen: AtomicUsize,
}

impl OpKernel for BudgetKernel {
    fn name(&self) -> &str {
        "Budget"
    }

    fn run(&self, _ctx: &mut KernelCtx<'_>) -> Result<()> {
        let seen = self.seen.fetch_add(1, Ordering::Relaxed) + 1;
        if seen > self.runs {
            return Err(RuntimeError::Execution(format!(
                "run budget of {} exhausted",
                self.runs
            )));
        }
        Ok(())
    }
}

/// Kernel registry with control flow, the reference kernels, and a `Record`
/// kernel writing into the returned `Logs`.
pub fn test_kernels() -> (KernelRegistry, Logs) {
    let logs = Logs::default();
    let mut registry = KernelRegistry::with_control_flow();

    registry
        .register("Add", |op: &Operation, _graph: &Subgraph| {
            Ok(Box::new(AddKernel {
                a: op.inputs[0],
                b: op.inputs[1],
                out: op.outputs[0],
            }) as Box<dyn OpKernel>)
        })
        .register("Less", |op: &Operation, _graph: &Subgraph| {
            Ok(Box::new(LessKernel {
                a: op.inputs[0],
                b: op.inputs[1],
                out: op.outputs[0],
            }) as Box<dyn OpKernel>)
        })
        .register("Identity", |op: &Operation, _graph: &Subgraph| {
            Ok(Box::new(IdentityKernel {
                input: op.inputs[0],
                out: op.outputs[0],
            }) as Box<dyn OpKernel>)
        })
        .register("Append", |op: &Operation, _graph: &Subgraph| {
            Ok(Box::new(AppendKernel {
                a: op.inputs[0],
                b: op.inputs[1],
                out: op.outputs[0],
            }) as Box<dyn OpKernel>)
        });

    registry.register("Budget", |op: &Operation, _graph: &Subgraph| {
        let runs = match op.attribute("runs") {
            Some(AttributeValue::Int(runs)) => *runs as usize,
            _ => 0,
        };
        Ok(Box::new(BudgetKernel {
            runs,
            seen: AtomicUsize::new(0),
        }) as Box<dyn OpKernel>)
    });

    let record_logs = logs.clone();
    registry.register("Record", move |op: &Operation, _graph: &Subgraph| {
        let log = match op.attribute("log") {
            Some(AttributeValue::String(log)) => log.clone(),
            _ => "default".to_string(),
        };
        Ok(Box::new(RecordKernel {
            input: op.inputs[0],
            log,
            logs: record_logs.clone(),
        }) as Box<dyn OpKernel>)
    });

    (registry, logs)
}

// ================================================================================
// Graph builders
// ================================================================================

/// Add a static `f32` scalar operand.
pub fn scalar(graph: &mut Subgraph, name: &str) -> OperandIndex {
    graph.add_operand(Operand::new(name, DataType::F32, TensorShape::Static(vec![])))
}

/// Add a static `f32` operand of the given shape.
pub fn f32_operand(graph: &mut Subgraph, name: &str, shape: &[usize]) -> OperandIndex {
    graph.add_operand(Operand::new(
        name,
        DataType::F32,
        TensorShape::Static(shape.to_vec()),
    ))
}

/// Add a constant `f32` scalar operand.
pub fn constant(graph: &mut Subgraph, name: &str, value: f32) -> OperandIndex {
    graph.add_operand(Operand::with_constant(
        name,
        DataType::F32,
        vec![],
        value.to_le_bytes().to_vec(),
    ))
}

/// Add an operation, panicking on malformed wiring.
pub fn add_op(
    graph: &mut Subgraph,
    op_type: &str,
    inputs: Vec<OperandIndex>,
    outputs: Vec<OperandIndex>,
) {
    let name = format!("{}_{}", op_type.to_lowercase(), graph.operation_count());
    graph
        .add_operation(
            Operation::new(op_type)
                .with_name(name)
                .with_operands(inputs, outputs),
        )
        .unwrap();
}

/// Add a `Record` operation logging `input` under `log`.
pub fn record(graph: &mut Subgraph, input: OperandIndex, log: &str) {
    graph
        .add_operation(
            Operation::new("Record")
                .with_name(format!("record_{log}"))
                .with_operands(vec![input], vec![])
                .with_attribute("log", AttributeValue::String(log.to_string())),
        )
        .unwrap();
}

/// Add a `Budget` operation that fails after `runs` executions.
pub fn budget(graph: &mut Subgraph, runs: i64) {
    graph
        .add_operation(
            Operation::new("Budget")
                .with_name("budget")
                .with_attribute("runs", AttributeValue::Int(runs)),
        )
        .unwrap();
}

/// A `While` operation over `inputs` producing `outputs`.
pub fn while_op(
    inputs: Vec<OperandIndex>,
    outputs: Vec<OperandIndex>,
    cond: SubgraphIndex,
    body: SubgraphIndex,
) -> Operation {
    Operation::new("While")
        .with_name("while")
        .with_operands(inputs, outputs)
        .with_attribute("cond", AttributeValue::Subgraph(cond))
        .with_attribute("body", AttributeValue::Subgraph(body))
}

/// Condition subgraph over `carried` scalars: `v0 < limit`.
///
/// Only `v0` is used. Every evaluation records `v0` under "cond".
pub fn less_than_cond(limit: f32, carried: usize) -> Subgraph {
    let mut graph = Subgraph::new();
    let inputs: Vec<_> = (0..carried)
        .map(|k| scalar(&mut graph, &format!("v{k}")))
        .collect();
    let limit = constant(&mut graph, "limit", limit);
    let keep_going = graph.add_operand(Operand::new(
        "keep_going",
        DataType::Bool,
        TensorShape::Static(vec![]),
    ));

    add_op(&mut graph, "Less", vec![inputs[0], limit], vec![keep_going]);
    record(&mut graph, inputs[0], "cond");

    graph.set_inputs(inputs).unwrap();
    graph.set_outputs(vec![keep_going]).unwrap();
    graph
}

/// Body subgraph over `carried` scalars: every value plus one.
///
/// Every run records `v0` under "body".
pub fn increment_body(carried: usize) -> Subgraph {
    let mut graph = Subgraph::new();
    let inputs: Vec<_> = (0..carried)
        .map(|k| scalar(&mut graph, &format!("v{k}")))
        .collect();
    let one = constant(&mut graph, "one", 1.0);

    let mut outputs = Vec::with_capacity(carried);
    for (k, &input) in inputs.iter().enumerate() {
        let next = scalar(&mut graph, &format!("next{k}"));
        add_op(&mut graph, "Add", vec![input, one], vec![next]);
        outputs.push(next);
    }
    record(&mut graph, inputs[0], "body");

    graph.set_inputs(inputs).unwrap();
    graph.set_outputs(outputs).unwrap();
    graph
}

/// Model with a single `While` over `carried` scalars `x0..` -> `y0..`.
///
/// The loop adds one to every value while `x0 < limit`. Condition is
/// subgraph 1, body is subgraph 2.
pub fn loop_model(limit: f32, carried: usize) -> Model {
    let mut main = Subgraph::new();
    let inputs: Vec<_> = (0..carried)
        .map(|k| scalar(&mut main, &format!("x{k}")))
        .collect();
    let outputs: Vec<_> = (0..carried)
        .map(|k| scalar(&mut main, &format!("y{k}")))
        .collect();
    main.add_operation(while_op(
        inputs.clone(),
        outputs.clone(),
        SubgraphIndex(1),
        SubgraphIndex(2),
    ))
    .unwrap();
    main.set_inputs(inputs).unwrap();
    main.set_outputs(outputs).unwrap();

    let mut model = Model::new("loop", main);
    model.add_subgraph(less_than_cond(limit, carried));
    model.add_subgraph(increment_body(carried));
    model
}

/// Read a scalar `f32` output.
pub fn scalar_value(outputs: &HashMap<String, Tensor>, name: &str) -> f32 {
    outputs[name].to_vec::<f32>().unwrap()[0]
}
