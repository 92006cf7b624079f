//! §4.9: transaction boundary placement at function entry/exit, calls,
//! and loops, plus the loop-header check rewrite ILR set up in §4.7.

use crate::error::PassResult;
use crate::helpers::{FUNC_EXCEPTIONS, HelperRegistry};
use crate::ilr::loop_checks::LoopHeaderCheckToken;
use crate::ir::dominator::DominatorTree;
use crate::ir::function::Function;
use crate::ir::instruction::{Instruction, InstructionPayload};
use crate::ir::loops::LoopInfo;
use crate::ir::module::Module;
use crate::ir::opcode::Opcode;
use crate::ir::types::Type;
use crate::ir::value::{BlockId, Constant, Value, ValueId, ValueKind};

use super::config::TxConfig;
use super::longest_path::LongestPathTracker;

fn is_internal_callee(name: &str) -> bool {
    HelperRegistry::is_helper_name(name) || name.starts_with("llvm.") || name.starts_with("tx_")
}

fn is_outside_callee(module: &Module, config: &TxConfig, callee: Option<&str>) -> bool {
    match callee {
        None => !config.func_pointers_known, // indirect call, conservative unless known
        Some(name) => {
            if FUNC_EXCEPTIONS.contains(&name) {
                return false;
            }
            match module.function(name) {
                Some(f) => f.is_declaration,
                None => true,
            }
        }
    }
}

fn call_helper(function: &mut Function, block: BlockId, index: usize, name: &str) {
    let inst = Instruction {
        opcode: Opcode::Call,
        result: None,
        operands: vec![],
        parent: block,
        payload: InstructionPayload {
            callee: Some(name.to_string()),
            ..InstructionPayload::default()
        },
    };
    function
        .block_mut(block)
        .expect("block exists")
        .insert_before(index, inst);
}

fn int_const(function: &mut Function, ty: Type, value: u64) -> ValueId {
    let id = function.fresh_value_id();
    function.insert_value(Value {
        id,
        ty: ty.clone(),
        kind: ValueKind::Constant(Constant::Int { ty, value }),
    });
    id
}

fn call_increment(function: &mut Function, helpers: &HelperRegistry, block: BlockId, index: usize, amount: u64) {
    let arg = int_const(function, Type::I64, amount);
    let inst = Instruction {
        opcode: Opcode::Call,
        result: None,
        operands: vec![arg],
        parent: block,
        payload: InstructionPayload {
            callee: Some(helpers.tx("tx_increment").to_string()),
            ..InstructionPayload::default()
        },
    };
    function
        .block_mut(block)
        .expect("block exists")
        .insert_before(index, inst);
}

/// Places entry/exit boundaries, call-site increments and wraps, and
/// loop boundaries for one function (§4.9). Must run after ILR, since
/// it consumes the loop-header-check placeholder tokens ILR produced.
pub fn place_boundaries(
    function: &mut Function,
    module: &Module,
    helpers: &HelperRegistry,
    config: &TxConfig,
    loop_header_tokens: &[LoopHeaderCheckToken],
) -> PassResult<()> {
    let called_from_outside = config.is_called_from_outside(&function.name);

    place_entry_and_exits(function, helpers, called_from_outside)?;
    place_call_site_boundaries(function, module, helpers, config)?;

    let doms = DominatorTree::compute(function);
    let loop_info = LoopInfo::compute(function, &doms);
    let mut tracker = LongestPathTracker::compute(function, &doms);
    for lp in loop_info.all_outermost_first() {
        place_loop_boundary(function, helpers, &mut tracker, lp.header, &lp.latches);
    }

    for token in loop_header_tokens {
        rewrite_loop_header_check(function, helpers, *token)?;
    }

    Ok(())
}

fn place_entry_and_exits(function: &mut Function, helpers: &HelperRegistry, called_from_outside: bool) -> PassResult<()> {
    let entry = function.entry_block().map(|b| b.id);
    if let Some(entry) = entry {
        let entry_helper = if called_from_outside { "tx_start" } else { "tx_cond_start" };
        call_helper(function, entry, 0, helpers.tx(entry_helper));
    }

    let block_ids: Vec<BlockId> = function.blocks.iter().map(|b| b.id).collect();
    for block_id in block_ids {
        let is_exit = function
            .block(block_id)
            .and_then(|b| b.terminator())
            .is_some_and(|t| matches!(t.opcode, Opcode::Ret | Opcode::Resume));
        if !is_exit {
            continue;
        }
        let last_index = function.block(block_id).unwrap().instructions.len() - 1;
        if called_from_outside {
            call_helper(function, block_id, last_index, helpers.tx("tx_end"));
        } else {
            let doms = DominatorTree::compute(function);
            let tracker = LongestPathTracker::compute(function, &doms);
            let amount = tracker.get(block_id).saturating_sub(1);
            call_increment(function, helpers, block_id, last_index, amount);
        }
    }
    Ok(())
}

fn place_call_site_boundaries(
    function: &mut Function,
    module: &Module,
    helpers: &HelperRegistry,
    config: &TxConfig,
) -> PassResult<()> {
    let mut block_ids: Vec<BlockId> = function.blocks.iter().map(|b| b.id).collect();
    block_ids.sort_by_key(|b| b.0);

    let doms = DominatorTree::compute(function);
    let mut tracker = LongestPathTracker::compute(function, &doms);

    for block_id in block_ids {
        let mut i = 0;
        loop {
            let len = function.block(block_id).map(|b| b.instructions.len()).unwrap_or(0);
            if i >= len {
                break;
            }
            let inst = function.block(block_id).unwrap().instructions[i].clone();
            if !matches!(inst.opcode, Opcode::Call | Opcode::Invoke) {
                i += 1;
                continue;
            }
            let callee = inst.payload.callee.as_deref();
            if callee.is_some_and(is_internal_callee) {
                i += 1;
                continue;
            }

            let amount = tracker.get(block_id);
            call_increment(function, helpers, block_id, i, amount);
            tracker.reset(block_id);
            // The increment shifted one slot forward; the call/invoke is
            // now right after it.
            let call_index = i + 1;
            let outside = is_outside_callee(module, config, callee);

            if inst.opcode == Opcode::Invoke {
                // Invoke is a terminator: nothing can be inserted after it
                // in this block. The closing `tx_end` (outside case only)
                // still goes immediately before it, same as a call; the
                // reopening must go into the normal-destination BB instead.
                if outside {
                    call_helper(function, block_id, call_index, helpers.tx("tx_end"));
                }
                place_invoke_normal_dest_boundary(function, helpers, &inst.payload.successors, outside);
                break;
            }

            if outside {
                call_helper(function, block_id, call_index, helpers.tx("tx_end"));
                let after_call = call_index + 2;
                call_helper(function, block_id, after_call, helpers.tx("tx_start"));
                i = after_call + 1;
            } else {
                let after_call = call_index + 1;
                call_helper(function, block_id, after_call, helpers.tx("tx_cond_start"));
                i = after_call + 1;
            }
        }
    }
    Ok(())
}

/// Places the reopening (and, when the normal-destination BB has more
/// than one predecessor, an extra closing) boundary call at the front
/// of an Invoke's normal-destination BB (`successors[0]` by convention,
/// matching the unwind destination at `successors[1]`) (§4.9).
///
/// A normal-destination BB reached only from this Invoke is already
/// fully closed by the `tx_end` placed before the Invoke; one reached
/// from other paths too might still be mid-transaction on those paths,
/// so it needs its own `tx_end` before reopening.
fn place_invoke_normal_dest_boundary(
    function: &mut Function,
    helpers: &HelperRegistry,
    invoke_successors: &[BlockId],
    outside: bool,
) {
    let Some(&normal_dest) = invoke_successors.first() else {
        return;
    };
    let at = function
        .block(normal_dest)
        .map(crate::ir::block::BasicBlock::first_non_phi)
        .unwrap_or(0);

    if !outside {
        call_helper(function, normal_dest, at, helpers.tx("tx_cond_start"));
        return;
    }

    let multiple_preds = function.predecessors(normal_dest).len() > 1;
    if multiple_preds {
        call_helper(function, normal_dest, at, helpers.tx("tx_end"));
        call_helper(function, normal_dest, at + 1, helpers.tx("tx_start"));
    } else {
        call_helper(function, normal_dest, at, helpers.tx("tx_start"));
    }
}

fn place_loop_boundary(
    function: &mut Function,
    helpers: &HelperRegistry,
    tracker: &mut LongestPathTracker,
    header: BlockId,
    latches: &[BlockId],
) {
    let at = function
        .block(header)
        .map(crate::ir::block::BasicBlock::first_non_phi)
        .unwrap_or(0);
    call_helper(function, header, at, helpers.tx("tx_cond_start"));

    for &latch in latches {
        let last_index = function.block(latch).map(|b| b.instructions.len()).unwrap_or(1) - 1;
        let amount = tracker.get(latch);
        call_increment(function, helpers, latch, last_index, amount);
        tracker.reset(latch);
    }
}

/// Finds the placeholder's defining instruction and replaces its
/// condition with `trunc(tx_threshold_exceeded(), i1)`, drops the
/// `tx_cond_start` §4.9 placed at the header (loops always get one,
/// but a header with its own check split doesn't need it — the
/// threshold check subsumes it), and wraps the checks block's
/// terminator with `tx_end; tx_start` (§4.9).
fn rewrite_loop_header_check(
    function: &mut Function,
    helpers: &HelperRegistry,
    token: LoopHeaderCheckToken,
) -> PassResult<()> {
    let call_result = function.fresh_value_id();
    function.insert_value(Value {
        id: call_result,
        ty: Type::I32,
        kind: ValueKind::InstructionResult(call_result),
    });
    let call = Instruction {
        opcode: Opcode::Call,
        result: Some(call_result),
        operands: vec![],
        parent: token.header,
        payload: InstructionPayload {
            callee: Some(helpers.tx("tx_threshold_exceeded").to_string()),
            ..InstructionPayload::default()
        },
    };
    let trunc_result = function.fresh_value_id();
    function.insert_value(Value {
        id: trunc_result,
        ty: Type::I1,
        kind: ValueKind::InstructionResult(trunc_result),
    });
    let trunc = Instruction {
        opcode: Opcode::Trunc,
        result: Some(trunc_result),
        operands: vec![call_result],
        parent: token.header,
        payload: InstructionPayload::default(),
    };

    if let Some(block) = function.block_mut(token.header) {
        let branch_index = block
            .instructions
            .iter()
            .position(|i| i.operands.first() == Some(&token.placeholder_branch))
            .expect("placeholder branch present");
        block.insert_before(branch_index, call);
        block.insert_before(branch_index + 1, trunc);
        block.instructions[branch_index + 2].operands[0] = trunc_result;
    }

    remove_header_cond_start(function, token.header, helpers);

    if let Some(block) = function.block_mut(token.checks_block) {
        let term_index = block.instructions.len().saturating_sub(1);
        let tx_end = Instruction {
            opcode: Opcode::Call,
            result: None,
            operands: vec![],
            parent: token.checks_block,
            payload: InstructionPayload {
                callee: Some(helpers.tx("tx_end").to_string()),
                ..InstructionPayload::default()
            },
        };
        let tx_start = Instruction {
            opcode: Opcode::Call,
            result: None,
            operands: vec![],
            parent: token.checks_block,
            payload: InstructionPayload {
                callee: Some(helpers.tx("tx_start").to_string()),
                ..InstructionPayload::default()
            },
        };
        block.insert_before(term_index, tx_end);
        block.insert_before(term_index + 1, tx_start);
    }

    Ok(())
}

fn remove_header_cond_start(function: &mut Function, header: BlockId, helpers: &HelperRegistry) {
    if let Some(block) = function.block_mut(header) {
        if let Some(pos) = block.instructions.iter().position(|i| {
            i.opcode == Opcode::Call && i.payload.callee.as_deref() == Some(helpers.tx("tx_cond_start"))
        }) {
            block.instructions.remove(pos);
        }
    }
}
