//! §4.11: empty-transaction peephole, tight-loop collapsing, and tiny
//! critical-section rebinding.

use crate::helpers::HelperRegistry;
use crate::ir::function::Function;
use crate::ir::instruction::{Instruction, InstructionPayload};
use crate::ir::loops::{Loop, LoopInfo};
use crate::ir::opcode::Opcode;
use crate::ir::value::BlockId;

const AVERAGE_TRIP_COUNT: u64 = 4;
const TIGHT_LOOP_MAX_INSTRUCTIONS: usize = 20;
const CRITICAL_SECTION_MAX_HOPS: usize = 2;

fn tx_name<'a>(helpers: &'a HelperRegistry, name: &'static str) -> &'a str {
    helpers.tx(name)
}

/// Runs every TX optimization for one function, in the order the
/// reference pass uses: critical sections first (they depend on seeing
/// boundaries exactly as §4.9 placed them), then the empty-Tx
/// peephole twice, then the tight-loop optimization (§4.11).
pub fn optimize_function(function: &mut Function, helpers: &HelperRegistry) {
    optimize_critical_sections(function, helpers);
    optimize_empty_tx(function, helpers);
    optimize_empty_tx(function, helpers);

    let doms = crate::ir::dominator::DominatorTree::compute(function);
    let loop_info = LoopInfo::compute(function, &doms);
    for lp in loop_info.all_innermost_first() {
        optimize_tight_loop(function, helpers, lp);
    }
}

/// Erases adjacent boundary-call pairs that bracket nothing: `tx_start;
/// tx_end`, `tx_cond_start;tx_end` (keep end), `tx_start;tx_increment`
/// (keep start), `tx_cond_start;tx_increment` (keep cond_start),
/// `tx_increment;tx_end` (keep end).
fn optimize_empty_tx(function: &mut Function, helpers: &HelperRegistry) {
    let start = tx_name(helpers, "tx_start").to_string();
    let end = tx_name(helpers, "tx_end").to_string();
    let cond_start = tx_name(helpers, "tx_cond_start").to_string();
    let increment = tx_name(helpers, "tx_increment").to_string();

    for block in &mut function.blocks {
        let mut i = 0;
        while i + 1 < block.instructions.len() {
            let first = callee_of(&block.instructions[i]);
            let second = callee_of(&block.instructions[i + 1]);
            let erase = match (first, second) {
                (Some(a), Some(b)) if a == start && b == end => Some((i, i + 1)),
                (Some(a), Some(b)) if a == cond_start && b == end => Some((i, i)),
                (Some(a), Some(b)) if a == start && b == increment => Some((i + 1, i + 1)),
                (Some(a), Some(b)) if a == cond_start && b == increment => Some((i + 1, i + 1)),
                (Some(a), Some(b)) if a == increment && b == end => Some((i, i)),
                _ => None,
            };
            match erase {
                Some((lo, hi)) => {
                    for idx in (lo..=hi).rev() {
                        block.instructions.remove(idx);
                    }
                }
                None => i += 1,
            }
        }
    }
}

fn callee_of(inst: &Instruction) -> Option<&str> {
    if inst.opcode != Opcode::Call {
        return None;
    }
    inst.payload.callee.as_deref()
}

/// A loop with exactly one BB, ≤20 instructions, no calls to outside
/// functions, no invokes/stores/atomics, whose only internal
/// transaction artifacts are a `tx_cond_start` and a `tx_increment`
/// (§4.11 "Tight loops").
fn optimize_tight_loop(function: &mut Function, helpers: &HelperRegistry, lp: &Loop) {
    if lp.blocks.len() != 1 {
        return;
    }
    let header = lp.header;
    let Some(block) = function.block(header) else {
        return;
    };
    if block.instructions.len() > TIGHT_LOOP_MAX_INSTRUCTIONS {
        return;
    }
    if block
        .instructions
        .iter()
        .any(|i| matches!(i.opcode, Opcode::Invoke | Opcode::Store | Opcode::AtomicCmpXchg | Opcode::AtomicRMW))
    {
        return;
    }

    let cond_start_name = tx_name(helpers, "tx_cond_start").to_string();
    let increment_name = tx_name(helpers, "tx_increment").to_string();

    let has_outside_call = block.instructions.iter().any(|i| {
        i.opcode == Opcode::Call
            && i.payload
                .callee
                .as_deref()
                .is_some_and(|c| c != cond_start_name && c != increment_name && !HelperRegistry::is_helper_name(c) && !c.starts_with("llvm."))
    });
    if has_outside_call {
        return;
    }

    let has_cond_start = block
        .instructions
        .iter()
        .any(|i| i.opcode == Opcode::Call && i.payload.callee.as_deref() == Some(cond_start_name.as_str()));
    let has_increment = block
        .instructions
        .iter()
        .any(|i| i.opcode == Opcode::Call && i.payload.callee.as_deref() == Some(increment_name.as_str()));
    if !has_cond_start || !has_increment {
        return;
    }

    let path_len = crate::tx::longest_path::count(block);

    let header_id = header;
    if let Some(block) = function.block_mut(header_id) {
        block.instructions.retain(|i| {
            !(i.opcode == Opcode::Call
                && i.payload
                    .callee
                    .as_deref()
                    .is_some_and(|c| c == cond_start_name || c == increment_name))
        });
    }

    if let Some(preheader) = lp.preheader {
        let amount = path_len * AVERAGE_TRIP_COUNT;
        insert_increment(function, preheader, amount, helpers);
    }
}

fn insert_increment(function: &mut Function, block: BlockId, amount: u64, helpers: &HelperRegistry) {
    let arg = function.fresh_value_id();
    function.insert_value(crate::ir::value::Value {
        id: arg,
        ty: crate::ir::types::Type::I64,
        kind: crate::ir::value::ValueKind::Constant(crate::ir::value::Constant::Int {
            ty: crate::ir::types::Type::I64,
            value: amount,
        }),
    });
    let Some(b) = function.block_mut(block) else {
        return;
    };
    let index = b.instructions.len().saturating_sub(1);
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
    b.insert_before(index, inst);
}

/// A `pthread_mutex_lock(m)` whose matching `unlock(m)` is reachable
/// within the same BB, an immediate successor, or a successor-of-
/// successor, with no outside-function calls and no invokes between
/// them (§4.11 "Tiny critical sections"). Only optimizes lock/unlock
/// pairs immediately surrounded by the `tx_end`/`tx_start` TX itself
/// placed (§4.9).
fn optimize_critical_sections(function: &mut Function, helpers: &HelperRegistry) {
    let lock_sites = find_calls(function, "pthread_mutex_lock");
    for (block, index, mutex_arg) in lock_sites {
        if let Some(unlock_site) = find_matching_unlock(function, block, index, mutex_arg) {
            try_optimize_pair(function, helpers, (block, index), unlock_site);
        }
    }
}

fn find_calls(function: &Function, name: &str) -> Vec<(BlockId, usize, crate::ir::value::ValueId)> {
    let mut out = Vec::new();
    for block in &function.blocks {
        for (idx, inst) in block.instructions.iter().enumerate() {
            if inst.opcode == Opcode::Call && inst.payload.callee.as_deref() == Some(name) {
                if let Some(&arg) = inst.operands.first() {
                    out.push((block.id, idx, arg));
                }
            }
        }
    }
    out
}

/// Searches same-BB, then each successor, then each successor-of-
/// successor for a matching unlock; bails (returns `None`) the moment
/// it meets a call it cannot classify or an `Invoke`. An `Unreachable`
/// terminator ends a path as a benign dead end, not a failure.
fn find_matching_unlock(
    function: &Function,
    start_block: BlockId,
    start_index: usize,
    mutex_arg: crate::ir::value::ValueId,
) -> Option<(BlockId, usize)> {
    let mut frontier = vec![(start_block, start_index + 1, 0usize)];
    while let Some((block, from, hops)) = frontier.pop() {
        let Some(b) = function.block(block) else { continue };
        for idx in from..b.instructions.len() {
            let inst = &b.instructions[idx];
            if inst.opcode == Opcode::Invoke {
                return None;
            }
            if inst.opcode == Opcode::Call {
                match inst.payload.callee.as_deref() {
                    Some("pthread_mutex_unlock") if inst.operands.first() == Some(&mutex_arg) => {
                        return Some((block, idx));
                    }
                    Some(name) if HelperRegistry::is_helper_name(name) || name.starts_with("llvm.") => {}
                    Some(_) => return None, // unidentified call: bail
                    None => return None,
                }
            }
        }
        if hops >= CRITICAL_SECTION_MAX_HOPS {
            continue;
        }
        if b.terminator().is_some_and(|t| t.opcode == Opcode::Unreachable) {
            continue;
        }
        for succ in function.successors(block) {
            frontier.push((succ, 0, hops + 1));
        }
    }
    None
}

fn try_optimize_pair(
    function: &mut Function,
    helpers: &HelperRegistry,
    lock_site: (BlockId, usize),
    unlock_site: (BlockId, usize),
) {
    let end_name = helpers.tx("tx_end").to_string();
    let start_name = helpers.tx("tx_start").to_string();

    let lock_preceded_by_end = lock_site.1 > 0
        && function
            .block(lock_site.0)
            .is_some_and(|b| callee_of(&b.instructions[lock_site.1 - 1]) == Some(end_name.as_str()));
    let unlock_followed_by_start = function.block(unlock_site.0).is_some_and(|b| {
        b.instructions
            .get(unlock_site.1 + 1)
            .and_then(callee_of)
            == Some(start_name.as_str())
    });

    if !lock_preceded_by_end || !unlock_followed_by_start {
        return;
    }

    if let Some(b) = function.block_mut(lock_site.0) {
        b.instructions.remove(lock_site.1 - 1); // tx_end
        if let Some(call) = b.instructions.get_mut(lock_site.1 - 1) {
            call.payload.callee = Some(helpers.tx("tx_pthread_mutex_lock").to_string());
        }
    }
    // unlock_site indices shift by -1 if it's in the same block after the removal.
    let unlock_index = if unlock_site.0 == lock_site.0 && unlock_site.1 > lock_site.1 {
        unlock_site.1 - 1
    } else {
        unlock_site.1
    };
    if let Some(b) = function.block_mut(unlock_site.0) {
        if let Some(call) = b.instructions.get_mut(unlock_index) {
            call.payload.callee = Some(helpers.tx("tx_pthread_mutex_unlock").to_string());
        }
        b.instructions.remove(unlock_index + 1); // tx_start
    }
}
