//! Multi-subgraph models.

use crate::ir::{AttributeValue, Subgraph};
use crate::{Error, Result};

/// Identifier of a subgraph within a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubgraphIndex(pub usize);

impl SubgraphIndex {
    /// The subgraph a model is entered through.
    pub const PRIMARY: SubgraphIndex = SubgraphIndex(0);

    /// Get the underlying index.
    pub fn index(&self) -> usize {
        self.0
    }
}

/// A compiled model: the primary subgraph plus every subgraph referenced by
/// control-flow operations.
#[derive(Debug, Clone, Default)]
pub struct Model {
    /// Model name.
    pub name: String,

    /// Subgraphs, indexed by `SubgraphIndex`.
    pub subgraphs: Vec<Subgraph>,
}

impl Model {
    /// Create a model from its primary subgraph.
    pub fn new(name: impl Into<String>, primary: Subgraph) -> Self {
        Self {
            name: name.into(),
            subgraphs: vec![primary],
        }
    }

    /// Add a subgraph and return its index.
    pub fn add_subgraph(&mut self, subgraph: Subgraph) -> SubgraphIndex {
        self.subgraphs.push(subgraph);
        SubgraphIndex(self.subgraphs.len() - 1)
    }

    /// Get a subgraph.
    pub fn subgraph(&self, index: SubgraphIndex) -> Option<&Subgraph> {
        self.subgraphs.get(index.index())
    }

    /// Get the primary subgraph.
    pub fn primary(&self) -> Result<&Subgraph> {
        self.subgraph(SubgraphIndex::PRIMARY)
            .ok_or_else(|| Error::InvalidGraph("Model has no subgraphs".to_string()))
    }

    /// Iterate over `(index, subgraph)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (SubgraphIndex, &Subgraph)> {
        self.subgraphs
            .iter()
            .enumerate()
            .map(|(i, subgraph)| (SubgraphIndex(i), subgraph))
    }

    /// Check that every subgraph reference points at an existing subgraph.
    pub fn validate(&self) -> Result<()> {
        self.primary()?;
        for (index, subgraph) in self.iter() {
            for (_, op) in subgraph.operations() {
                for (key, value) in &op.attributes {
                    let AttributeValue::Subgraph(target) = value else {
                        continue;
                    };
                    if self.subgraph(*target).is_none() {
                        return Err(Error::InvalidGraph(format!(
                            "Operation '{}' in subgraph {} refers to missing subgraph {} via '{key}'",
                            op.name,
                            index.index(),
                            target.index()
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}
