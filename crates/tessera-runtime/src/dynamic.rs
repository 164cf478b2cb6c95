//! Dynamic-shape propagation across copy plans.
//!
//! A copy into a static tensor may not change its shape. Before such a copy
//! runs, destinations that are about to receive a differently shaped value
//! are switched to dynamic mode, provided their dynamic-allocation record
//! says somebody will observe them.

use crate::error::Result;
use crate::permute::{DynAllocInfoMap, PermuteLayer, reshapes};
use crate::tensor::{Tensor, TensorArena};
use tessera_core::{OperandIndex, Subgraph};

/// Whether copying `src` into `dst` must first turn `dst` dynamic.
///
/// True when the shape changes, `dst` is still static, and the
/// dynamic-allocation record of `slot` points at an operand live in `graph`.
fn needs_dynamic(
    slot: OperandIndex,
    src: &Tensor,
    dst: &Tensor,
    dyn_alloc_info: &DynAllocInfoMap,
    graph: &Subgraph,
) -> bool {
    !dst.is_dynamic()
        && reshapes(src, dst)
        && dyn_alloc_info
            .get(&slot)
            .is_some_and(|info| graph.is_live(info.ind))
}

fn mark(slot: OperandIndex, src: &[usize], dst: &mut Tensor) {
    tracing::trace!(
        slot = slot.index(),
        from = ?dst.shape(),
        source = ?src,
        "tensor became dynamic"
    );
    dst.set_dynamic();
}

/// Mark destinations of `plan` dynamic whose shape is about to change.
///
/// `plan` reads from the separate arena `src`. Returns the number of tensors
/// newly marked.
pub(crate) fn reconcile(
    plan: &PermuteLayer,
    src: &TensorArena,
    dst: &mut TensorArena,
    dyn_alloc_info: &DynAllocInfoMap,
    graph: &Subgraph,
) -> Result<usize> {
    let mut marked = 0;
    for (s, d) in plan.pairs() {
        let source = src.get(s)?;
        if needs_dynamic(d, source, dst.get(d)?, dyn_alloc_info, graph) {
            mark(d, source.shape(), dst.get_mut(d)?);
            marked += 1;
        }
    }
    Ok(marked)
}

/// Same as [`reconcile`] for a plan copying within one arena.
///
/// Only dynamic flags change here, so marking a pair never affects the
/// comparison of a later one.
pub(crate) fn reconcile_within(
    plan: &PermuteLayer,
    arena: &mut TensorArena,
    dyn_alloc_info: &DynAllocInfoMap,
    graph: &Subgraph,
) -> Result<usize> {
    let mut marked = 0;
    for (s, d) in plan.pairs() {
        if s == d {
            continue;
        }
        let (source, dst) = arena.split_pair(s, d)?;
        if needs_dynamic(d, source, dst, dyn_alloc_info, graph) {
            mark(d, source.shape(), dst);
            marked += 1;
        }
    }
    Ok(marked)
}
