use std::collections::{HashSet, VecDeque};

use crate::ir::dominator::DominatorTree;
use crate::ir::function::Function;
use crate::ir::value::BlockId;

/// A natural loop: a unique header plus the set of blocks that reach it
/// without leaving the loop (§3).
#[derive(Debug, Clone)]
pub struct Loop {
    pub header: BlockId,
    pub blocks: HashSet<BlockId>,
    pub latches: Vec<BlockId>,
    pub preheader: Option<BlockId>,
    pub subloops: Vec<Loop>,
}

impl Loop {
    #[must_use]
    pub fn contains(&self, block: BlockId) -> bool {
        self.blocks.contains(&block)
    }

    /// Innermost loops first, in header order — the shape both ILR
    /// (§4.7) and TX (§4.9, "outer first" for boundary placement but
    /// innermost-first for header checks) need.
    #[must_use]
    pub fn innermost_first(&self) -> Vec<&Loop> {
        let mut out = Vec::new();
        for sub in &self.subloops {
            out.extend(sub.innermost_first());
        }
        out.push(self);
        out
    }

    #[must_use]
    pub fn outermost_first(&self) -> Vec<&Loop> {
        let mut out = vec![self];
        for sub in &self.subloops {
            out.extend(sub.outermost_first());
        }
        out
    }
}

/// All top-level loops in a function, discovered from back edges found
/// via the dominator tree: an edge `u -> v` is a back edge iff `v`
/// dominates `u`.
#[derive(Debug, Clone, Default)]
pub struct LoopInfo {
    pub top_level: Vec<Loop>,
}

impl LoopInfo {
    #[must_use]
    pub fn compute(function: &Function, doms: &DominatorTree) -> Self {
        let mut headers: Vec<BlockId> = Vec::new();
        let mut back_edges: Vec<(BlockId, BlockId)> = Vec::new();
        for block in function.blocks.iter().map(|b| b.id) {
            for succ in function.successors(block) {
                if doms.dominates(succ, block) {
                    back_edges.push((block, succ));
                    if !headers.contains(&succ) {
                        headers.push(succ);
                    }
                }
            }
        }

        let mut loops: Vec<Loop> = headers
            .into_iter()
            .map(|header| {
                let latches: Vec<BlockId> = back_edges
                    .iter()
                    .filter(|(_, h)| *h == header)
                    .map(|(l, _)| *l)
                    .collect();
                let blocks = natural_loop_blocks(function, header, &latches);
                let preheader = find_preheader(function, header, &blocks);
                Loop {
                    header,
                    blocks,
                    latches,
                    preheader,
                    subloops: Vec::new(),
                }
            })
            .collect();

        nest_loops(&mut loops);

        Self { top_level: loops }
    }

    #[must_use]
    pub fn loop_for(&self, block: BlockId) -> Option<&Loop> {
        fn search(loops: &[Loop], block: BlockId) -> Option<&Loop> {
            for l in loops {
                if let Some(found) = search(&l.subloops, block) {
                    return Some(found);
                }
                if l.contains(block) {
                    return Some(l);
                }
            }
            None
        }
        search(&self.top_level, block)
    }

    #[must_use]
    pub fn all_innermost_first(&self) -> Vec<&Loop> {
        self.top_level
            .iter()
            .flat_map(Loop::innermost_first)
            .collect()
    }

    #[must_use]
    pub fn all_outermost_first(&self) -> Vec<&Loop> {
        self.top_level
            .iter()
            .flat_map(Loop::outermost_first)
            .collect()
    }
}

fn natural_loop_blocks(
    function: &Function,
    header: BlockId,
    latches: &[BlockId],
) -> HashSet<BlockId> {
    let mut blocks = HashSet::new();
    blocks.insert(header);
    let mut worklist: VecDeque<BlockId> = latches.iter().copied().collect();
    for l in latches {
        blocks.insert(*l);
    }
    while let Some(block) = worklist.pop_front() {
        for pred in function.predecessors(block) {
            if blocks.insert(pred) {
                worklist.push_back(pred);
            }
        }
    }
    blocks
}

fn find_preheader(function: &Function, header: BlockId, blocks: &HashSet<BlockId>) -> Option<BlockId> {
    let outside_preds: Vec<BlockId> = function
        .predecessors(header)
        .into_iter()
        .filter(|p| !blocks.contains(p))
        .collect();
    match outside_preds.as_slice() {
        [single] => Some(*single),
        _ => None,
    }
}

/// Groups loops whose block set contains another loop's header into
/// `subloops`, leaving only genuinely top-level loops in the returned
/// vector. Processes largest loops first so each candidate nests under
/// the smallest already-placed enclosing loop.
fn nest_loops(loops: &mut Vec<Loop>) {
    loops.sort_by_key(|l| std::cmp::Reverse(l.blocks.len()));
    let mut result: Vec<Loop> = Vec::new();
    for candidate in loops.drain(..) {
        if !try_insert(&mut result, candidate.clone()) {
            result.push(candidate);
        }
    }
    *loops = result;
}

/// Tries to place `candidate` inside the smallest loop in `loops` (or
/// its subloops, recursively) that strictly encloses it. Returns
/// `true` if placed.
fn try_insert(loops: &mut [Loop], candidate: Loop) -> bool {
    for parent in loops.iter_mut() {
        if parent.blocks.len() > candidate.blocks.len() && parent.blocks.contains(&candidate.header) {
            if !try_insert(&mut parent.subloops, candidate.clone()) {
                parent.subloops.push(candidate);
            }
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::block::BasicBlock;
    use crate::ir::instruction::{Instruction, InstructionPayload};
    use crate::ir::opcode::Opcode;
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

    /// preheader -> header -> body -> header (back edge) / exit.
    fn single_loop() -> (Function, BlockId, BlockId) {
        let mut f = Function::new("loopy", Type::Void);
        let preheader = f.fresh_block_id();
        f.blocks.push(BasicBlock::new(preheader, "preheader"));
        let header = f.fresh_block_id();
        f.blocks.push(BasicBlock::new(header, "header"));
        let body = f.fresh_block_id();
        f.blocks.push(BasicBlock::new(body, "body"));
        let exit = f.fresh_block_id();
        f.blocks.push(BasicBlock::new(exit, "exit"));

        f.block_mut(preheader).unwrap().push(br(preheader, vec![header]));
        f.block_mut(header).unwrap().push(br(header, vec![body, exit]));
        f.block_mut(body).unwrap().push(br(body, vec![header]));
        f.block_mut(exit).unwrap().push(Instruction {
            opcode: Opcode::Ret,
            result: None,
            operands: vec![],
            parent: exit,
            payload: InstructionPayload::default(),
        });
        (f, header, body)
    }

    #[test]
    fn finds_the_back_edge_and_preheader() {
        let (f, header, body) = single_loop();
        let doms = DominatorTree::compute(&f);
        let info = LoopInfo::compute(&f, &doms);
        assert_eq!(info.top_level.len(), 1);
        let lp = &info.top_level[0];
        assert_eq!(lp.header, header);
        assert_eq!(lp.latches, vec![body]);
        assert!(lp.contains(header));
        assert!(lp.contains(body));
        assert_eq!(lp.preheader, Some(BlockId(0)));
    }

    #[test]
    fn nests_an_inner_loop_under_its_outer_loop() {
        // outer header (0) -> inner header (1) -> inner body (2) -> {inner header, outer latch (3)}
        // outer latch (3) -> outer header, or exit (4).
        let mut f = Function::new("nested", Type::Void);
        let outer = f.fresh_block_id();
        f.blocks.push(BasicBlock::new(outer, "outer"));
        let inner = f.fresh_block_id();
        f.blocks.push(BasicBlock::new(inner, "inner"));
        let inner_body = f.fresh_block_id();
        f.blocks.push(BasicBlock::new(inner_body, "inner_body"));
        let outer_latch = f.fresh_block_id();
        f.blocks.push(BasicBlock::new(outer_latch, "outer_latch"));
        let exit = f.fresh_block_id();
        f.blocks.push(BasicBlock::new(exit, "exit"));

        f.block_mut(outer).unwrap().push(br(outer, vec![inner]));
        f.block_mut(inner).unwrap().push(br(inner, vec![inner_body, outer_latch]));
        f.block_mut(inner_body).unwrap().push(br(inner_body, vec![inner]));
        f.block_mut(outer_latch).unwrap().push(br(outer_latch, vec![outer, exit]));
        f.block_mut(exit).unwrap().push(Instruction {
            opcode: Opcode::Ret,
            result: None,
            operands: vec![],
            parent: exit,
            payload: InstructionPayload::default(),
        });

        let doms = DominatorTree::compute(&f);
        let info = LoopInfo::compute(&f, &doms);
        assert_eq!(info.top_level.len(), 1);
        let outer_loop = &info.top_level[0];
        assert_eq!(outer_loop.header, outer);
        assert_eq!(outer_loop.subloops.len(), 1);
        assert_eq!(outer_loop.subloops[0].header, inner);
        assert_eq!(info.loop_for(inner_body).map(|l| l.header), Some(inner));
    }
}
