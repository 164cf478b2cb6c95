//! Copy/permute plans between tensor arenas.
//!
//! A `PermuteLayer` moves data from a list of source tensors into a list of
//! destination tensors. Pairs whose destination nobody will ever read are
//! dropped once in `prepare()`, so the per-run cost is only the live copies.

use crate::error::{Result, RuntimeError};
use crate::tensor::{Tensor, TensorArena};
use std::collections::HashMap;
use tessera_core::{Layout, OperandIndex, Subgraph};

/// Identifies which declared operand a tensor slot corresponds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DynAllocInfo {
    /// Operand in the graph that owns the tensor.
    pub ind: OperandIndex,
}

/// Dynamic-allocation records keyed by tensor slot.
///
/// Consulted to decide whether a size change must turn a tensor dynamic.
pub type DynAllocInfoMap = HashMap<OperandIndex, DynAllocInfo>;

/// Build records for `slots`, each backed by the operand of the same index.
pub fn dyn_alloc_info_for(slots: &[OperandIndex]) -> DynAllocInfoMap {
    slots
        .iter()
        .map(|&slot| (slot, DynAllocInfo { ind: slot }))
        .collect()
}

/// Reusable plan copying `sources[i]` into `destinations[i]`.
#[derive(Debug, Clone)]
pub struct PermuteLayer {
    sources: Vec<OperandIndex>,
    destinations: Vec<OperandIndex>,
    /// Declared operand of each destination, used for the liveness check.
    dst_operands: Vec<OperandIndex>,
    /// Some retained source is also a retained destination.
    overlapping: bool,
    prepared: bool,
}

impl PermuteLayer {
    /// Create a plan over parallel source and destination lists.
    ///
    /// # Panics
    ///
    /// Panics if the lists differ in length. Upstream arity checks make this
    /// unreachable for well-formed models.
    pub fn new(
        sources: Vec<OperandIndex>,
        destinations: Vec<OperandIndex>,
        dst_dyn_alloc_info: &DynAllocInfoMap,
    ) -> Self {
        assert_eq!(
            sources.len(),
            destinations.len(),
            "PermuteLayer needs as many sources as destinations"
        );
        let dst_operands = destinations
            .iter()
            .map(|slot| dst_dyn_alloc_info.get(slot).map_or(*slot, |info| info.ind))
            .collect();

        Self {
            sources,
            destinations,
            dst_operands,
            overlapping: false,
            prepared: false,
        }
    }

    /// Drop every pair whose destination operand is not live in `dst_graph`.
    ///
    /// Calling this more than once has no further effect.
    pub fn prepare(&mut self, dst_graph: &Subgraph) {
        let keep: Vec<bool> = self
            .dst_operands
            .iter()
            .map(|&operand| dst_graph.is_live(operand))
            .collect();

        let mut flags = keep.iter();
        self.sources.retain(|_| *flags.next().unwrap_or(&false));
        let mut flags = keep.iter();
        self.destinations.retain(|_| *flags.next().unwrap_or(&false));
        let mut flags = keep.iter();
        self.dst_operands.retain(|_| *flags.next().unwrap_or(&false));

        self.overlapping = self
            .sources
            .iter()
            .any(|source| self.destinations.contains(source));
        self.prepared = true;
    }

    /// Number of retained `(source, destination)` pairs.
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Check if the plan copies nothing.
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Iterate over retained `(source, destination)` pairs.
    pub fn pairs(&self) -> impl Iterator<Item = (OperandIndex, OperandIndex)> + '_ {
        self.sources
            .iter()
            .copied()
            .zip(self.destinations.iter().copied())
    }

    /// Copy every retained pair from `src` into `dst`.
    ///
    /// Never changes a tensor's dynamic flag. A destination whose shape
    /// differs from its source is resized only if it is already dynamic.
    ///
    /// # Errors
    ///
    /// Returns `DataTypeMismatch` or `ShapeMismatch` for incompatible pairs.
    pub fn run(&self, src: &TensorArena, dst: &mut TensorArena) -> Result<()> {
        debug_assert!(self.prepared, "PermuteLayer::run before prepare");
        tracing::trace!(pairs = self.len(), "permute");

        for (s, d) in self.pairs() {
            copy_tensor(src.get(s)?, dst.get_mut(d)?)?;
        }
        Ok(())
    }

    /// Copy every retained pair within a single arena.
    ///
    /// Pairs are copied slot to slot. Only a plan whose sources and
    /// destinations overlap reads all sources up front, so that every pair
    /// sees the values from before the run.
    pub fn run_within(&self, arena: &mut TensorArena) -> Result<()> {
        debug_assert!(self.prepared, "PermuteLayer::run_within before prepare");
        tracing::trace!(
            pairs = self.len(),
            overlapping = self.overlapping,
            "permute within arena"
        );

        if !self.overlapping {
            for (s, d) in self.pairs() {
                let (src, dst) = arena.split_pair(s, d)?;
                copy_tensor(src, dst)?;
            }
            return Ok(());
        }

        let snapshot = self
            .sources
            .iter()
            .map(|&s| arena.get(s).cloned())
            .collect::<Result<Vec<_>>>()?;

        for (src, &d) in snapshot.iter().zip(&self.destinations) {
            copy_tensor(src, arena.get_mut(d)?)?;
        }
        Ok(())
    }

    /// Check if `run_within` has to snapshot its sources.
    pub fn is_overlapping(&self) -> bool {
        self.overlapping
    }
}

/// Axis order taking a tensor from layout `from` to layout `to`.
fn layout_permutation(from: Layout, to: Layout) -> Option<[usize; 4]> {
    match (from, to) {
        (Layout::Nhwc, Layout::Nchw) => Some([0, 3, 1, 2]),
        (Layout::Nchw, Layout::Nhwc) => Some([0, 2, 3, 1]),
        _ => None,
    }
}

fn permutation_for(src: &Tensor, dst_layout: Layout) -> Option<[usize; 4]> {
    if src.shape().len() == 4 {
        layout_permutation(src.layout(), dst_layout)
    } else {
        None
    }
}

/// Shape `src` takes on when copied into a tensor with layout `dst_layout`.
fn copied_shape(src: &Tensor, dst_layout: Layout) -> Vec<usize> {
    match permutation_for(src, dst_layout) {
        Some(perm) => perm.iter().map(|&axis| src.shape()[axis]).collect(),
        None => src.shape().to_vec(),
    }
}

/// Check if copying `src` into `dst` changes the shape of `dst`.
pub(crate) fn reshapes(src: &Tensor, dst: &Tensor) -> bool {
    match permutation_for(src, dst.layout()) {
        Some(perm) => !perm
            .iter()
            .map(|&axis| src.shape()[axis])
            .eq(dst.shape().iter().copied()),
        None => src.shape() != dst.shape(),
    }
}

/// Copy `src` into `dst`, transposing 4-D data between layouts if needed.
pub(crate) fn copy_tensor(src: &Tensor, dst: &mut Tensor) -> Result<()> {
    if src.dtype() != dst.dtype() {
        return Err(RuntimeError::DataTypeMismatch {
            expected: dst.dtype(),
            actual: src.dtype(),
        });
    }

    if reshapes(src, dst) {
        dst.apply_shape(&copied_shape(src, dst.layout()))?;
    }
    match permutation_for(src, dst.layout()) {
        None => dst.buffer_mut().copy_from_slice(src.buffer()),
        Some(perm) => {
            let src_shape = src.shape();
            permute_bytes(
                src.buffer(),
                src_shape,
                &perm,
                src.dtype().size(),
                dst.buffer_mut(),
            );
        }
    }
    Ok(())
}

/// Transpose row-major `src` so that output axis `i` is input axis `perm[i]`.
fn permute_bytes(src: &[u8], src_shape: &[usize], perm: &[usize], elem: usize, dst: &mut [u8]) {
    let rank = src_shape.len();
    let dst_shape: Vec<usize> = perm.iter().map(|&axis| src_shape[axis]).collect();

    let mut src_strides = vec![1usize; rank];
    for axis in (0..rank.saturating_sub(1)).rev() {
        src_strides[axis] = src_strides[axis + 1] * src_shape[axis + 1];
    }

    let total: usize = dst_shape.iter().product();
    let mut index = vec![0usize; rank];
    for flat in 0..total {
        let src_offset: usize = (0..rank)
            .map(|axis| index[axis] * src_strides[perm[axis]])
            .sum();
        dst[flat * elem..(flat + 1) * elem]
            .copy_from_slice(&src[src_offset * elem..(src_offset + 1) * elem]);

        // Advance the destination multi-index
        for axis in (0..rank).rev() {
            index[axis] += 1;
            if index[axis] < dst_shape[axis] {
                break;
            }
            index[axis] = 0;
        }
    }
}
