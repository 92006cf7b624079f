use std::collections::HashMap;

use crate::ir::function::Function;
use crate::ir::value::BlockId;

/// Immediate-dominator tree over a function's basic blocks, computed
/// with the iterative Cooper/Harvey/Kennedy algorithm.
#[derive(Debug, Clone)]
pub struct DominatorTree {
    entry: BlockId,
    idom: HashMap<BlockId, BlockId>,
    rpo: Vec<BlockId>,
}

impl DominatorTree {
    #[must_use]
    pub fn compute(function: &Function) -> Self {
        let entry = function
            .entry_block()
            .map(|b| b.id)
            .unwrap_or(BlockId(0));
        let rpo = reverse_post_order(function, entry);
        let rpo_index: HashMap<BlockId, usize> =
            rpo.iter().enumerate().map(|(i, b)| (*b, i)).collect();

        let mut idom: HashMap<BlockId, BlockId> = HashMap::new();
        idom.insert(entry, entry);

        let mut changed = true;
        while changed {
            changed = false;
            for &block in rpo.iter().skip(1) {
                let preds = function.predecessors(block);
                let mut new_idom: Option<BlockId> = None;
                for pred in preds {
                    if !idom.contains_key(&pred) {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => pred,
                        Some(existing) => intersect(&idom, &rpo_index, existing, pred),
                    });
                }
                if let Some(new_idom) = new_idom {
                    if idom.get(&block) != Some(&new_idom) {
                        idom.insert(block, new_idom);
                        changed = true;
                    }
                }
            }
        }

        Self { entry, idom, rpo }
    }

    #[must_use]
    pub fn immediate_dominator(&self, block: BlockId) -> Option<BlockId> {
        if block == self.entry {
            return None;
        }
        self.idom.get(&block).copied()
    }

    #[must_use]
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        if a == b {
            return true;
        }
        let mut cur = b;
        while let Some(&idom) = self.idom.get(&cur) {
            if idom == cur {
                return a == cur;
            }
            if idom == a {
                return true;
            }
            cur = idom;
        }
        false
    }

    /// Blocks in reverse-post-order, the traversal order used throughout
    /// the drivers (§4.10, §9 "Pass Driver").
    #[must_use]
    pub fn reverse_post_order(&self) -> &[BlockId] {
        &self.rpo
    }

    /// Children of `block` in the dominator tree, in RPO order — this is
    /// the dominator-tree-order DFS the pass driver walks (§9 "Pass
    /// Driver").
    #[must_use]
    pub fn children(&self, block: BlockId) -> Vec<BlockId> {
        self.rpo
            .iter()
            .copied()
            .filter(|&b| b != self.entry && self.idom.get(&b) == Some(&block))
            .collect()
    }

    #[must_use]
    pub fn entry(&self) -> BlockId {
        self.entry
    }
}

fn intersect(
    idom: &HashMap<BlockId, BlockId>,
    rpo_index: &HashMap<BlockId, usize>,
    a: BlockId,
    b: BlockId,
) -> BlockId {
    let mut a = a;
    let mut b = b;
    while a != b {
        while rpo_index[&a] > rpo_index[&b] {
            a = idom[&a];
        }
        while rpo_index[&b] > rpo_index[&a] {
            b = idom[&b];
        }
    }
    a
}

fn reverse_post_order(function: &Function, entry: BlockId) -> Vec<BlockId> {
    let mut visited = std::collections::HashSet::new();
    let mut post_order = Vec::new();
    let mut stack = vec![(entry, false)];
    while let Some((block, processed)) = stack.pop() {
        if processed {
            post_order.push(block);
            continue;
        }
        if !visited.insert(block) {
            continue;
        }
        stack.push((block, true));
        for succ in function.successors(block) {
            if !visited.contains(&succ) {
                stack.push((succ, false));
            }
        }
    }
    post_order.reverse();
    post_order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::block::BasicBlock;
    use crate::ir::instruction::{Instruction, InstructionPayload};
    use crate::ir::opcode::Opcode;
    use crate::ir::types::Type;

    /// entry -> {then, els} -> merge, the textbook diamond.
    fn diamond() -> Function {
        let mut f = Function::new("diamond", Type::Void);
        let entry = f.fresh_block_id();
        f.blocks.push(BasicBlock::new(entry, "entry"));
        let then = f.fresh_block_id();
        f.blocks.push(BasicBlock::new(then, "then"));
        let els = f.fresh_block_id();
        f.blocks.push(BasicBlock::new(els, "else"));
        let merge = f.fresh_block_id();
        f.blocks.push(BasicBlock::new(merge, "merge"));

        f.block_mut(entry).unwrap().push(Instruction {
            opcode: Opcode::Br,
            result: None,
            operands: vec![],
            parent: entry,
            payload: InstructionPayload {
                successors: vec![then, els],
                ..InstructionPayload::default()
            },
        });
        for b in [then, els] {
            f.block_mut(b).unwrap().push(Instruction {
                opcode: Opcode::Br,
                result: None,
                operands: vec![],
                parent: b,
                payload: InstructionPayload {
                    successors: vec![merge],
                    ..InstructionPayload::default()
                },
            });
        }
        f.block_mut(merge).unwrap().push(Instruction {
            opcode: Opcode::Ret,
            result: None,
            operands: vec![],
            parent: merge,
            payload: InstructionPayload::default(),
        });
        f
    }

    #[test]
    fn entry_dominates_everything() {
        let f = diamond();
        let doms = DominatorTree::compute(&f);
        for block in f.blocks.iter().map(|b| b.id) {
            assert!(doms.dominates(doms.entry(), block));
        }
    }

    #[test]
    fn merge_is_not_dominated_by_either_branch() {
        let f = diamond();
        let doms = DominatorTree::compute(&f);
        let then = BlockId(1);
        let els = BlockId(2);
        let merge = BlockId(3);
        assert!(!doms.dominates(then, merge));
        assert!(!doms.dominates(els, merge));
        assert_eq!(doms.immediate_dominator(merge), Some(BlockId(0)));
    }

    #[test]
    fn reverse_post_order_keeps_entry_first() {
        let f = diamond();
        let doms = DominatorTree::compute(&f);
        assert_eq!(doms.reverse_post_order().first(), Some(&doms.entry()));
    }
}
