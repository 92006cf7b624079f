//! §4.7: explicit loop-header checks for PHIs not transitively checked
//! elsewhere inside the loop body.

use std::collections::HashSet;

use crate::error::{PassError, PassResult};
use crate::ilr::check::{self, CheckIdAllocator};
use crate::ir::block::BasicBlock;
use crate::ir::function::Function;
use crate::ir::instruction::{Instruction, InstructionPayload};
use crate::ir::loops::Loop;
use crate::ir::opcode::Opcode;
use crate::ir::types::Type;
use crate::ir::value::{BlockId, Constant, Value, ValueId, ValueKind};
use crate::shadow::ShadowMap;

/// Shared between ILR (which emits the placeholder) and TX (which
/// rewrites it) so the two passes don't have to re-discover the shape
/// by pattern-matching a constant-`false` branch (§9 "Loop-header check
/// interlock").
#[derive(Debug, Clone, Copy)]
pub struct LoopHeaderCheckToken {
    pub header: BlockId,
    /// The split-off block holding the actual checks, reached when the
    /// placeholder condition is (eventually) true.
    pub checks_block: BlockId,
    pub placeholder_branch: ValueId,
}

/// Instructions whose presence means the header PHI reaching them is
/// already checked transitively somewhere in the loop.
fn is_check_inducing(opcode: Opcode) -> bool {
    use Opcode::*;
    matches!(
        opcode,
        Store | Br | AtomicCmpXchg | AtomicRMW | Ret | Switch | Invoke | Call
    )
}

/// For each header PHI, DFS over its uses within the loop; a header PHI
/// (including other loops' header PHIs) reached along the way is
/// treated as a terminal to avoid looping on natural SSA cycles (§4.7,
/// §9).
fn phi_is_transitively_checked(function: &Function, lp: &Loop, phi_result: ValueId) -> bool {
    let mut visited = HashSet::new();
    let mut stack = vec![phi_result];
    visited.insert(phi_result);

    while let Some(value) = stack.pop() {
        for block_id in &lp.blocks {
            let Some(block) = function.block(*block_id) else {
                continue;
            };
            for inst in &block.instructions {
                if !inst.operands.contains(&value) {
                    continue;
                }
                if is_check_inducing(inst.opcode) {
                    return true;
                }
                if let Some(result) = inst.result {
                    if inst.opcode == Opcode::PHI && is_loop_header_phi(lp, result, function) {
                        continue; // terminal: don't walk through header PHIs
                    }
                    if visited.insert(result) {
                        stack.push(result);
                    }
                }
            }
        }
    }
    false
}

fn is_loop_header_phi(lp: &Loop, value: ValueId, function: &Function) -> bool {
    function
        .block(lp.header)
        .is_some_and(|b| b.instructions.iter().any(|i| i.opcode == Opcode::PHI && i.result == Some(value)))
}

/// Emits, for each innermost loop whose header has an untransitively-
/// checked PHI, a placeholder `br i1 false` splitting the header into
/// an entry block and a checks block holding an explicit `check_*`
/// call per such PHI against its shadow (§4.7). Returns one token per
/// loop that needed it.
pub fn insert_loop_header_checks(
    function: &mut Function,
    shadow_map: &ShadowMap,
    ids: &mut CheckIdAllocator,
    lp: &Loop,
) -> PassResult<Vec<LoopHeaderCheckToken>> {
    let header_phis: Vec<ValueId> = function
        .block(lp.header)
        .map(|b| {
            b.instructions
                .iter()
                .filter(|i| i.opcode == Opcode::PHI)
                .filter_map(|i| i.result)
                .collect()
        })
        .unwrap_or_default();

    let unchecked: Vec<ValueId> = header_phis
        .iter()
        .copied()
        .filter(|&phi| !phi_is_transitively_checked(function, lp, phi))
        .collect();

    if unchecked.is_empty() {
        return Ok(Vec::new());
    }

    let token = split_header_with_placeholder(function, shadow_map, ids, lp.header, &unchecked)?;
    Ok(vec![token])
}

/// Splits `header` right after its PHIs into `header` (ending with the
/// placeholder `br i1 false, checks_block, rest_block`) and two new
/// blocks: `checks_block` (an explicit `check_*` call per entry in
/// `unchecked_phis`, each comparing the original PHI value against its
/// shadow, then falling through to `rest_block`) and `rest_block`
/// (receiving the header's original non-PHI instructions).
fn split_header_with_placeholder(
    function: &mut Function,
    shadow_map: &ShadowMap,
    ids: &mut CheckIdAllocator,
    header: BlockId,
    unchecked_phis: &[ValueId],
) -> PassResult<LoopHeaderCheckToken> {
    let split_at = function
        .block(header)
        .map(BasicBlock::first_non_phi)
        .unwrap_or(0);

    let rest_id = function.fresh_block_id();
    let checks_id = function.fresh_block_id();

    let tail: Vec<Instruction> = {
        let block = function.block_mut(header).expect("header exists");
        block.instructions.split_off(split_at)
    };
    let mut rest_block = BasicBlock::new(rest_id, format!("ilr.loop_rest.{}", rest_id.0));
    rest_block.instructions = tail.into_iter().map(|mut i| {
        i.parent = rest_id;
        i
    }).collect();
    function.blocks.push(rest_block);

    let checks_block = BasicBlock::new(checks_id, format!("ilr.loop_checks.{}", checks_id.0));
    function.blocks.push(checks_block);

    let mut cursor = 0;
    for &phi in unchecked_phis {
        let ty = function
            .value(phi)
            .map(|v| v.ty.clone())
            .ok_or_else(|| PassError::MalformedIr("loop header PHI missing type".into()))?;
        let shadow = shadow_map
            .get(function, phi)?
            .ok_or_else(|| PassError::MalformedIr("loop header PHI has no shadow to check against".into()))?;
        cursor += check::emit_check(function, checks_id, cursor, phi, shadow, &ty, ids.next())?;
    }
    function
        .block_mut(checks_id)
        .expect("checks block just pushed")
        .push(Instruction {
            opcode: Opcode::Br,
            result: None,
            operands: vec![],
            parent: checks_id,
            payload: InstructionPayload {
                successors: vec![rest_id],
                ..InstructionPayload::default()
            },
        });

    let false_const = function.fresh_value_id();
    function.insert_value(Value {
        id: false_const,
        ty: Type::I1,
        kind: ValueKind::Constant(Constant::Int {
            ty: Type::I1,
            value: 0,
        }),
    });
    let placeholder = Instruction {
        opcode: Opcode::Br,
        result: None,
        operands: vec![false_const],
        parent: header,
        payload: InstructionPayload {
            successors: vec![checks_id, rest_id],
            ..InstructionPayload::default()
        },
    };
    function
        .block_mut(header)
        .expect("header exists")
        .push(placeholder);

    Ok(LoopHeaderCheckToken {
        header,
        checks_block: checks_id,
        placeholder_branch: false_const,
    })
}
