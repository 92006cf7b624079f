//! §4.10: per-BB forward accumulator used to parametrize `tx_increment`
//! calls.

use std::collections::HashMap;

use crate::ir::block::BasicBlock;
use crate::ir::dominator::DominatorTree;
use crate::ir::function::Function;
use crate::ir::instruction::Instruction;
use crate::ir::opcode::Opcode;
use crate::ir::value::BlockId;

/// Number of opcode-filtered instructions in `block` that count toward
/// the longest-path length: everything except PHIs, unreachables, and
/// no-op pointer-width casts (approximated here as any `BitCast`, which
/// never changes the underlying bit pattern). The walk also stops
/// counting once it reaches an already-inserted `tx_start`,
/// `tx_cond_start`, or `tx_increment` call, since everything before
/// that call was already accounted for by a previous placement.
#[must_use]
pub fn count(block: &BasicBlock) -> u64 {
    let mut total = 0u64;
    for inst in block.instructions.iter().rev() {
        if is_tx_boundary_call(inst) {
            break;
        }
        if inst.opcode == Opcode::PHI || inst.opcode == Opcode::Unreachable || inst.opcode == Opcode::BitCast {
            continue;
        }
        total += 1;
    }
    total
}

fn is_tx_boundary_call(inst: &Instruction) -> bool {
    inst.opcode == Opcode::Call
        && inst.payload.callee.as_deref().is_some_and(|c| {
            c.ends_with("tx_start") || c.ends_with("tx_cond_start") || c.ends_with("tx_increment")
        })
}

/// Tracks each block's longest acyclic path length, mutable because TX
/// resets a block's value to 0 after placing an increment there (§4.9).
#[derive(Debug, Default)]
pub struct LongestPathTracker {
    values: HashMap<BlockId, u64>,
}

impl LongestPathTracker {
    /// Computes the initial longest-path value for every block in
    /// reverse-post-order; predecessors not yet visited (back edges)
    /// contribute 0, so cycles break naturally (§4.10).
    #[must_use]
    pub fn compute(function: &Function, doms: &DominatorTree) -> Self {
        let mut values = HashMap::new();
        for &block_id in doms.reverse_post_order() {
            let preds_max = function
                .predecessors(block_id)
                .iter()
                .map(|p| values.get(p).copied().unwrap_or(0))
                .max()
                .unwrap_or(0);
            let block = function.block(block_id).expect("block exists");
            values.insert(block_id, preds_max + count(block));
        }
        Self { values }
    }

    #[must_use]
    pub fn get(&self, block: BlockId) -> u64 {
        self.values.get(&block).copied().unwrap_or(0)
    }

    pub fn reset(&mut self, block: BlockId) {
        self.values.insert(block, 0);
    }

    pub fn set(&mut self, block: BlockId, value: u64) {
        self.values.insert(block, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::block::BasicBlock;
    use crate::ir::function::Function;
    use crate::ir::instruction::{Instruction, InstructionPayload};
    use crate::ir::types::Type;

    fn br(from: BlockId, successors: Vec<BlockId>) -> Instruction {
        Instruction {
            opcode: Opcode::Br,
            result: None,
            operands: vec![],
            parent: from,
            payload: InstructionPayload {
                successors,
                ..InstructionPayload::default()
            },
        }
    }

    fn filler(block: BlockId, n: usize) -> Vec<Instruction> {
        (0..n)
            .map(|_| Instruction {
                opcode: Opcode::Add,
                result: None,
                operands: vec![],
                parent: block,
                payload: InstructionPayload::default(),
            })
            .collect()
    }

    #[test]
    fn count_skips_phis_and_stops_at_an_earlier_boundary_call() {
        let block_id = BlockId(0);
        let mut block = BasicBlock::new(block_id, "b");
        block.instructions.push(Instruction {
            opcode: Opcode::PHI,
            result: None,
            operands: vec![],
            parent: block_id,
            payload: InstructionPayload::default(),
        });
        block.instructions.extend(filler(block_id, 3));
        block.instructions.push(Instruction {
            opcode: Opcode::Call,
            result: None,
            operands: vec![],
            parent: block_id,
            payload: InstructionPayload {
                callee: Some("SWIFT$tx_start".to_string()),
                ..InstructionPayload::default()
            },
        });
        block.instructions.extend(filler(block_id, 2));

        assert_eq!(count(&block), 2);
    }

    #[test]
    fn diamond_join_takes_the_longer_predecessor_path() {
        let mut f = Function::new("f", Type::Void);
        let entry = f.fresh_block_id();
        f.blocks.push(BasicBlock::new(entry, "entry"));
        let short = f.fresh_block_id();
        f.blocks.push(BasicBlock::new(short, "short"));
        let long = f.fresh_block_id();
        f.blocks.push(BasicBlock::new(long, "long"));
        let merge = f.fresh_block_id();
        f.blocks.push(BasicBlock::new(merge, "merge"));

        f.block_mut(entry).unwrap().push(br(entry, vec![short, long]));
        f.block_mut(short).unwrap().instructions.extend(filler(short, 1));
        f.block_mut(short).unwrap().push(br(short, vec![merge]));
        f.block_mut(long).unwrap().instructions.extend(filler(long, 5));
        f.block_mut(long).unwrap().push(br(long, vec![merge]));
        f.block_mut(merge).unwrap().push(Instruction {
            opcode: Opcode::Ret,
            result: None,
            operands: vec![],
            parent: merge,
            payload: InstructionPayload::default(),
        });

        let doms = crate::ir::dominator::DominatorTree::compute(&f);
        let tracker = LongestPathTracker::compute(&f, &doms);
        // entry: 1 (its own br). long: entry(1) + 5 fillers + 1 br = 7.
        // merge: max(short=1+1+1=3, long=7) + 1 (ret) = 8.
        assert_eq!(tracker.get(long), 7);
        assert_eq!(tracker.get(merge), 8);
    }

    #[test]
    fn reset_zeroes_a_block_after_an_increment_is_placed() {
        let mut f = Function::new("f", Type::Void);
        let entry = f.fresh_block_id();
        f.blocks.push(BasicBlock::new(entry, "entry"));
        f.block_mut(entry).unwrap().push(Instruction {
            opcode: Opcode::Ret,
            result: None,
            operands: vec![],
            parent: entry,
            payload: InstructionPayload::default(),
        });
        let doms = crate::ir::dominator::DominatorTree::compute(&f);
        let mut tracker = LongestPathTracker::compute(&f, &doms);
        assert_eq!(tracker.get(entry), 1);
        tracker.reset(entry);
        assert_eq!(tracker.get(entry), 0);
    }
}
