//! §4.8: control-flow shadow blocks for conditional branches — branch-
//! level redundancy instead of a naive re-check of the branch
//! condition.

use std::collections::HashMap;

use crate::error::{PassError, PassResult};
use crate::ir::block::BasicBlock;
use crate::ir::function::Function;
use crate::ir::instruction::{Instruction, InstructionPayload};
use crate::ir::opcode::Opcode;
use crate::ir::types::Type;
use crate::ir::value::{BlockId, ValueId};
use crate::shadow::ShadowMap;

/// Per-module cache of each function's lazily created `Detected` block
/// (§9 "Global caches"). Keyed by function name since `BlockId`s are
/// only unique within one function.
#[derive(Debug, Default)]
pub struct DetectedBlockCache {
    map: HashMap<String, BlockId>,
}

impl DetectedBlockCache {
    pub fn get_or_create(&mut self, function: &mut Function, detected_helper: &str) -> BlockId {
        if let Some(&id) = self.map.get(&function.name) {
            return id;
        }
        let id = function.fresh_block_id();
        let mut block = BasicBlock::new(id, "Detected");
        let call = Instruction {
            opcode: Opcode::Call,
            result: None,
            operands: vec![],
            parent: id,
            payload: InstructionPayload {
                callee: Some(detected_helper.to_string()),
                ..InstructionPayload::default()
            },
        };
        block.push(call);
        block.push(Instruction::new(Opcode::Unreachable, id, vec![]));
        function.blocks.push(block);
        self.map.insert(function.name.clone(), id);
        id
    }
}

/// Replaces a conditional `Br`'s two successors with fresh shadow
/// blocks, each re-evaluating the shadow comparison (inverted on the
/// true edge) and branching to the shared `Detected` block on mismatch
/// (§4.8).
pub fn harden_conditional_branch(
    function: &mut Function,
    shadow_map: &ShadowMap,
    detected: &mut DetectedBlockCache,
    detected_helper: &str,
    block: BlockId,
) -> PassResult<()> {
    let term = function
        .block(block)
        .and_then(BasicBlock::terminator)
        .cloned()
        .ok_or_else(|| PassError::MalformedIr("harden_conditional_branch: no terminator".into()))?;

    if term.opcode != Opcode::Br || term.payload.successors.len() != 2 {
        return Ok(());
    }
    let condition = term.operands[0];
    let Some(shadow_condition) = shadow_map.get(function, condition)? else {
        return Ok(());
    };
    let shadow_compare = find_instruction_by_result(function, shadow_condition)
        .ok_or_else(|| PassError::MalformedIr("shadow condition has no defining instruction".into()))?;

    let detected_block = detected.get_or_create(function, detected_helper);
    let true_target = term.payload.successors[0];
    let false_target = term.payload.successors[1];

    let true_shadow_bb = build_shadow_bb(
        function,
        &shadow_compare,
        shadow_condition,
        true,
        detected_block,
        true_target,
    )?;
    let false_shadow_bb = build_shadow_bb(
        function,
        &shadow_compare,
        shadow_condition,
        false,
        detected_block,
        false_target,
    )?;

    retarget_phis(function, true_target, block, true_shadow_bb);
    retarget_phis(function, false_target, block, false_shadow_bb);

    let term_mut = function
        .block_mut(block)
        .and_then(|b| b.instructions.last_mut())
        .expect("terminator still present");
    term_mut.payload.successors = vec![true_shadow_bb, false_shadow_bb];

    Ok(())
}

/// Builds one shadow BB for one successor of the original Br: a clone
/// of the shadow compare (inverted when `invert` is true, i.e. on the
/// true edge), branching to `Detected` on mismatch and `target`
/// otherwise.
fn build_shadow_bb(
    function: &mut Function,
    shadow_compare: &Instruction,
    shadow_condition: ValueId,
    invert: bool,
    detected_block: BlockId,
    target: BlockId,
) -> PassResult<BlockId> {
    let id = function.fresh_block_id();
    let mut block = BasicBlock::new(id, format!("ilr.shadow_cf.{}", id.0));

    let compare_result_ty = function
        .value(shadow_condition)
        .map(|v| v.ty.clone())
        .unwrap_or(Type::I1);
    let cloned_result = function.fresh_value_id();
    function.insert_value(crate::ir::value::Value {
        id: cloned_result,
        ty: compare_result_ty,
        kind: crate::ir::value::ValueKind::InstructionResult(cloned_result),
    });
    let mut cloned = shadow_compare.clone();
    cloned.result = Some(cloned_result);
    cloned.parent = id;
    block.push(cloned);

    // The emitted branch always reads `br cond, Detected, target` — on
    // the true edge `cond` must be the inverse of the shadow compare so
    // that a match (shadow also true) yields `cond = false` and falls
    // through to `target`; on the false edge the shadow compare is used
    // directly, since a match there is already `false`.
    let branch_condition = if invert {
        let not_result = function.fresh_value_id();
        function.insert_value(crate::ir::value::Value {
            id: not_result,
            ty: Type::I1,
            kind: crate::ir::value::ValueKind::InstructionResult(not_result),
        });
        let true_const = function.fresh_value_id();
        function.insert_value(crate::ir::value::Value {
            id: true_const,
            ty: Type::I1,
            kind: crate::ir::value::ValueKind::Constant(crate::ir::value::Constant::Int {
                ty: Type::I1,
                value: 1,
            }),
        });
        let not_inst = Instruction {
            opcode: Opcode::Xor,
            result: Some(not_result),
            operands: vec![cloned_result, true_const],
            parent: id,
            payload: InstructionPayload::default(),
        };
        block.push(not_inst);
        not_result
    } else {
        cloned_result
    };

    let branch = Instruction {
        opcode: Opcode::Br,
        result: None,
        operands: vec![branch_condition],
        parent: id,
        payload: InstructionPayload {
            successors: vec![detected_block, target],
            ..InstructionPayload::default()
        },
    };
    block.push(branch);
    function.blocks.push(block);
    Ok(id)
}

fn retarget_phis(function: &mut Function, successor: BlockId, old_pred: BlockId, new_pred: BlockId) {
    if let Some(block) = function.block_mut(successor) {
        for inst in block.instructions.iter_mut() {
            if inst.opcode != Opcode::PHI {
                continue;
            }
            for incoming in inst.payload.incoming_blocks.iter_mut() {
                if *incoming == old_pred {
                    *incoming = new_pred;
                }
            }
        }
    }
}

fn find_instruction_by_result(function: &Function, result: ValueId) -> Option<Instruction> {
    function
        .blocks
        .iter()
        .flat_map(|b| b.instructions.iter())
        .find(|i| i.result == Some(result))
        .cloned()
}
