//! Intermediate representation of a single compiled subgraph.
//!
//! A subgraph is a directed graph where:
//! - **Nodes** (`Operation`) are already-lowered operations (e.g., Add, While)
//! - **Operands** (`Operand`) are the value slots flowing between them
//!
//! Every operand records which operations read it. Executors use that to skip
//! copies into slots that nothing downstream will ever look at.

use crate::model::SubgraphIndex;
use crate::types::{DataType, Layout, TensorShape};
use crate::{Error, Result};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};

use std::collections::HashMap;

/// Type alias for operation identifiers (backed by petgraph NodeIndex).
pub type OperationIndex = NodeIndex;

/// Identifier of a value slot in a subgraph.
///
/// This is an index into `Subgraph::operands`. Executors allocate exactly one
/// tensor per operand, so the same index also addresses the tensor in an
/// executor's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperandIndex(pub usize);

impl OperandIndex {
    /// Create a new operand index.
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    /// Get the underlying index.
    pub fn index(&self) -> usize {
        self.0
    }
}

// ──────────────────────────────── Subgraph ───────────────────────────────

/// Immutable compiled graph invoked as a unit.
///
/// Operations live in the petgraph structure (edges exist solely for
/// topological ordering); operands are stored in a side-table.
#[derive(Debug, Clone)]
pub struct Subgraph {
    /// Operation graph, edges point from producer to consumer.
    graph: DiGraph<Operation, ()>,

    /// Operand side-table.
    operands: Vec<Operand>,

    /// Lookup table: operand name -> operand index.
    operand_by_name: HashMap<String, OperandIndex>,

    /// Declared subgraph inputs.
    inputs: Vec<OperandIndex>,

    /// Declared subgraph outputs.
    outputs: Vec<OperandIndex>,
}

impl Subgraph {
    /// Create a new empty subgraph.
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            operands: Vec::new(),
            operand_by_name: HashMap::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    // ── Operands ──

    /// Add an operand and return its index.
    pub fn add_operand(&mut self, operand: Operand) -> OperandIndex {
        let index = OperandIndex::new(self.operands.len());
        self.operand_by_name.insert(operand.name.clone(), index);
        self.operands.push(operand);
        index
    }

    /// Get an operand.
    pub fn operand(&self, index: OperandIndex) -> Result<&Operand> {
        self.operands
            .get(index.index())
            .ok_or_else(|| Error::InvalidGraph(format!("Operand {:?} not found", index)))
    }

    /// All operands, in index order.
    pub fn operands(&self) -> &[Operand] {
        &self.operands
    }

    /// Number of operands.
    pub fn operand_count(&self) -> usize {
        self.operands.len()
    }

    /// Look up an operand by name.
    pub fn operand_by_name(&self, name: &str) -> Option<OperandIndex> {
        self.operand_by_name.get(name).copied()
    }

    // ── Operations ──

    /// Add an operation and return its index.
    ///
    /// Registers the operation as a use of each input operand and as the
    /// definer of each output operand, and adds ordering edges to every
    /// already-registered producer and consumer.
    ///
    /// # Errors
    ///
    /// Returns an error if an operand does not exist or an output operand is
    /// already defined by another operation.
    pub fn add_operation(&mut self, operation: Operation) -> Result<OperationIndex> {
        for &index in operation.inputs.iter().chain(&operation.outputs) {
            self.operand(index)?;
        }
        for &output in &operation.outputs {
            if let Some(def) = self.operands[output.index()].def {
                return Err(Error::InvalidGraph(format!(
                    "Operand '{}' is already defined by operation {:?}",
                    self.operands[output.index()].name,
                    def
                )));
            }
        }

        let inputs = operation.inputs.clone();
        let outputs = operation.outputs.clone();
        let id = self.graph.add_node(operation);

        for input in inputs {
            let operand = &mut self.operands[input.index()];
            operand.uses.push(id);
            if let Some(producer) = operand.def {
                self.graph.add_edge(producer, id, ());
            }
        }

        for output in outputs {
            let operand = &mut self.operands[output.index()];
            operand.def = Some(id);
            // Consumers registered before their producer still need ordering
            for &consumer in &operand.uses {
                self.graph.add_edge(id, consumer, ());
            }
        }

        Ok(id)
    }

    /// Get an operation.
    pub fn operation(&self, id: OperationIndex) -> Result<&Operation> {
        self.graph
            .node_weight(id)
            .ok_or_else(|| Error::InvalidGraph(format!("Operation {:?} not found", id)))
    }

    /// Iterate over all operations in insertion order.
    pub fn operations(&self) -> impl Iterator<Item = (OperationIndex, &Operation)> {
        self.graph
            .node_indices()
            .filter_map(|id| self.graph.node_weight(id).map(|op| (id, op)))
    }

    /// Number of operations.
    pub fn operation_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Operations in dependency order.
    ///
    /// # Errors
    ///
    /// Returns an error if the operations form a cycle.
    pub fn topological_order(&self) -> Result<Vec<OperationIndex>> {
        toposort(&self.graph, None).map_err(|cycle| {
            let name = self
                .graph
                .node_weight(cycle.node_id())
                .map(|op| op.name.as_str())
                .unwrap_or("<unknown>");
            Error::InvalidGraph(format!("Cycle detected at operation '{name}'"))
        })
    }

    // ── Inputs / outputs ──

    /// Declared input operands.
    pub fn inputs(&self) -> &[OperandIndex] {
        &self.inputs
    }

    /// Declared output operands.
    pub fn outputs(&self) -> &[OperandIndex] {
        &self.outputs
    }

    /// Set the declared input operands.
    pub fn set_inputs(&mut self, inputs: Vec<OperandIndex>) -> Result<()> {
        for &index in &inputs {
            self.operand(index)?;
        }
        self.inputs = inputs;
        Ok(())
    }

    /// Set the declared output operands.
    pub fn set_outputs(&mut self, outputs: Vec<OperandIndex>) -> Result<()> {
        for &index in &outputs {
            self.operand(index)?;
        }
        self.outputs = outputs;
        Ok(())
    }

    /// Check if an operand is a declared subgraph output.
    pub fn is_output(&self, index: OperandIndex) -> bool {
        self.outputs.contains(&index)
    }

    /// Check if an operand's value can be observed.
    ///
    /// An operand is live when some operation reads it or it is a declared
    /// output. Copies into non-live operands are never performed.
    pub fn is_live(&self, index: OperandIndex) -> bool {
        self.operands
            .get(index.index())
            .is_some_and(|operand| operand.use_count() > 0)
            || self.is_output(index)
    }
}

impl Default for Subgraph {
    fn default() -> Self {
        Self::new()
    }
}

// ──────────────────────────────── Operation ──────────────────────────────

/// Attribute value attached to an operation.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Int(i64),
    Float(f32),
    Ints(Vec<i64>),
    String(String),
    /// Reference to another subgraph of the same model (If/While bodies).
    Subgraph(SubgraphIndex),
}

/// An operation node in a subgraph.
#[derive(Debug, Clone)]
pub struct Operation {
    /// Operation name, used in logs and error messages.
    pub name: String,

    /// Operation type used to look up a kernel (e.g., "Add", "While").
    pub op_type: String,

    /// Operation attributes.
    pub attributes: HashMap<String, AttributeValue>,

    /// Input operands.
    pub inputs: Vec<OperandIndex>,

    /// Output operands.
    pub outputs: Vec<OperandIndex>,
}

impl Operation {
    /// Create a new operation with no operands.
    pub fn new(op_type: impl Into<String>) -> Self {
        Self {
            name: String::new(),
            op_type: op_type.into(),
            attributes: HashMap::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Set the name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set input and output operands.
    pub fn with_operands(mut self, inputs: Vec<OperandIndex>, outputs: Vec<OperandIndex>) -> Self {
        self.inputs = inputs;
        self.outputs = outputs;
        self
    }

    /// Set an attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: AttributeValue) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Get an attribute.
    pub fn attribute(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }

    /// Read a subgraph-reference attribute.
    ///
    /// # Errors
    ///
    /// Returns an error if the attribute is missing or not a subgraph
    /// reference.
    pub fn subgraph_attr(&self, key: &str) -> Result<SubgraphIndex> {
        match self.attributes.get(key) {
            Some(AttributeValue::Subgraph(index)) => Ok(*index),
            Some(other) => Err(Error::Attribute(format!(
                "Attribute '{key}' of '{}' is not a subgraph: {other:?}",
                self.name
            ))),
            None => Err(Error::Attribute(format!(
                "Operation '{}' ({}) has no '{key}' attribute",
                self.name, self.op_type
            ))),
        }
    }
}

// ──────────────────────────────── Operand ────────────────────────────────

/// What compile-time data an operand carries.
#[derive(Debug, Clone, PartialEq)]
pub enum OperandData {
    /// Value arrives at run time (subgraph input or operation output).
    Runtime,

    /// Constant bytes, copied into the operand's tensor at load time.
    Constant(Vec<u8>),
}

/// A value slot in a subgraph.
#[derive(Debug, Clone)]
pub struct Operand {
    /// Operand name (unique within the subgraph).
    pub name: String,

    /// Element type.
    pub dtype: DataType,

    /// Declared shape.
    pub shape: TensorShape,

    /// Memory layout.
    pub layout: Layout,

    /// Compile-time data.
    pub data: OperandData,

    /// Operations reading this operand.
    uses: Vec<OperationIndex>,

    /// Operation writing this operand, if any.
    def: Option<OperationIndex>,
}

impl Operand {
    /// Create a new runtime operand.
    pub fn new(name: impl Into<String>, dtype: DataType, shape: TensorShape) -> Self {
        Self {
            name: name.into(),
            dtype,
            shape,
            layout: Layout::default(),
            data: OperandData::Runtime,
            uses: Vec::new(),
            def: None,
        }
    }

    /// Create a new operand holding constant bytes.
    pub fn with_constant(
        name: impl Into<String>,
        dtype: DataType,
        shape: Vec<usize>,
        bytes: Vec<u8>,
    ) -> Self {
        let mut operand = Self::new(name, dtype, TensorShape::Static(shape));
        operand.data = OperandData::Constant(bytes);
        operand
    }

    /// Set the memory layout.
    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }

    /// Operations reading this operand.
    pub fn uses(&self) -> &[OperationIndex] {
        &self.uses
    }

    /// Number of operations reading this operand.
    pub fn use_count(&self) -> usize {
        self.uses.len()
    }

    /// Operation writing this operand.
    pub fn def(&self) -> Option<OperationIndex> {
        self.def
    }

    /// Constant bytes, if this operand holds a constant.
    pub fn constant(&self) -> Option<&[u8]> {
        match &self.data {
            OperandData::Constant(bytes) => Some(bytes),
            OperandData::Runtime => None,
        }
    }
}
