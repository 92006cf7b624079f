//! Iterates a function's basic blocks in dominator-tree order, then
//! mops up any blocks the dominator-tree walk didn't reach (landing
//! pads reached only via unwind edges) (§9 "Pass Driver").

use crate::ir::dominator::DominatorTree;
use crate::ir::function::Function;
use crate::ir::value::BlockId;

/// Pre-order walk of the dominator tree starting at the entry block.
#[must_use]
pub fn dominator_tree_order(doms: &DominatorTree) -> Vec<BlockId> {
    fn visit(doms: &DominatorTree, block: BlockId, out: &mut Vec<BlockId>) {
        out.push(block);
        for child in doms.children(block) {
            visit(doms, child, out);
        }
    }
    let mut out = Vec::new();
    visit(doms, doms.entry(), &mut out);
    out
}

/// Blocks present in `function` but absent from `visited` — typically
/// landing pads, unreachable only via exception edges the dominator
/// tree doesn't model as ordinary successors.
#[must_use]
pub fn unvisited_blocks(function: &Function, visited: &[BlockId]) -> Vec<BlockId> {
    function
        .blocks
        .iter()
        .map(|b| b.id)
        .filter(|id| !visited.contains(id))
        .collect()
}

/// The full order both passes process a function's blocks in:
/// dominator-tree order, then the mop-up blocks, in their original
/// layout order.
#[must_use]
pub fn full_processing_order(function: &Function, doms: &DominatorTree) -> Vec<BlockId> {
    let mut order = dominator_tree_order(doms);
    order.extend(unvisited_blocks(function, &order));
    order
}
