//! §4.4: per-instruction shadow production, opcode-dispatched.

use crate::coerce;
use crate::error::{PassError, PassResult};
use crate::helpers::{CalleeClass, HelperRegistry};
use crate::ir::function::Function;
use crate::ir::instruction::{Instruction, InstructionPayload};
use crate::ir::module::Module;
use crate::ir::opcode::Opcode;
use crate::ir::value::{BlockId, ValueId};
use crate::shadow::ShadowMap;

/// What `shadow_instruction` did with one original instruction.
#[derive(Debug, Clone, Copy)]
pub struct ShadowOutcome {
    /// Number of new instructions spliced into the block immediately
    /// after the original (the caller must skip over these).
    pub inserted: usize,
    /// True if the shadow is itself the result of a `move_*` call — the
    /// immediate-check optimization (§4.4c) skips checking such values.
    pub is_mover_shadow: bool,
}

impl ShadowOutcome {
    const NONE: ShadowOutcome = ShadowOutcome {
        inserted: 0,
        is_mover_shadow: false,
    };
}

/// Produces and records the shadow of the instruction at
/// `function[block].instructions[index]`, if any (§4.4a/b).
pub fn shadow_instruction(
    function: &mut Function,
    module: &Module,
    helpers: &HelperRegistry,
    shadow_map: &mut ShadowMap,
    block: BlockId,
    index: usize,
) -> PassResult<ShadowOutcome> {
    let inst = function
        .block(block)
        .and_then(|b| b.instructions.get(index))
        .cloned()
        .ok_or_else(|| PassError::MalformedIr("shadow_instruction: index out of range".into()))?;

    if inst.opcode.is_unshadowed() {
        return Ok(ShadowOutcome::NONE);
    }

    let Some(result) = inst.result else {
        return Ok(ShadowOutcome::NONE);
    };

    if inst.opcode == Opcode::PHI {
        return shadow_phi(function, shadow_map, block, index, &inst, result);
    }

    if inst.opcode == Opcode::Load {
        return shadow_load(function, shadow_map, block, index, &inst, result);
    }

    if inst.opcode.is_pure_clonable() {
        return clone_pure(function, shadow_map, block, index, &inst, result);
    }

    if inst.opcode == Opcode::Call {
        let Some(callee) = inst.payload.callee.clone() else {
            return Ok(ShadowOutcome::NONE);
        };
        return match helpers.classify(module, &callee) {
            CalleeClass::Ignored => Ok(ShadowOutcome::NONE),
            CalleeClass::Duplicated => clone_pure(function, shadow_map, block, index, &inst, result),
            CalleeClass::Local | CalleeClass::Outside => {
                mover_shadow(function, helpers, shadow_map, block, index, &inst, result)
            }
        };
    }

    if inst.opcode.is_move_shadowed() {
        return mover_shadow(function, helpers, shadow_map, block, index, &inst, result);
    }

    Err(PassError::MalformedIr(format!(
        "opcode {:?} has a result but no shadow strategy",
        inst.opcode
    )))
}

fn rebind(shadow_map: &ShadowMap, function: &Function, operand: ValueId) -> PassResult<ValueId> {
    Ok(shadow_map.get(function, operand)?.unwrap_or(operand))
}

fn clone_pure(
    function: &mut Function,
    shadow_map: &mut ShadowMap,
    block: BlockId,
    index: usize,
    inst: &Instruction,
    result: ValueId,
) -> PassResult<ShadowOutcome> {
    let mut operands = Vec::with_capacity(inst.operands.len());
    for operand in &inst.operands {
        operands.push(rebind(shadow_map, function, *operand)?);
    }
    let result_ty = function
        .value(result)
        .map(|v| v.ty.clone())
        .ok_or_else(|| PassError::MalformedIr("missing result type".into()))?;
    let clone = Instruction {
        opcode: inst.opcode,
        result: None,
        operands,
        parent: block,
        payload: InstructionPayload::default(),
    };
    let shadow = coerce::insert(function, block, index + 1, clone, result_ty);
    shadow_map.insert(result, shadow)?;
    Ok(ShadowOutcome {
        inserted: 1,
        is_mover_shadow: false,
    })
}

fn shadow_phi(
    function: &mut Function,
    shadow_map: &mut ShadowMap,
    block: BlockId,
    index: usize,
    inst: &Instruction,
    result: ValueId,
) -> PassResult<ShadowOutcome> {
    let result_ty = function
        .value(result)
        .map(|v| v.ty.clone())
        .ok_or_else(|| PassError::MalformedIr("missing result type".into()))?;
    let mut clone = Instruction {
        opcode: Opcode::PHI,
        result: None,
        operands: inst.operands.clone(),
        parent: block,
        payload: InstructionPayload {
            incoming_blocks: inst.payload.incoming_blocks.clone(),
            ..InstructionPayload::default()
        },
    };
    clone.payload.check_id = None;
    let shadow_id = function.fresh_value_id();
    function.insert_value(crate::ir::value::Value {
        id: shadow_id,
        ty: result_ty,
        kind: crate::ir::value::ValueKind::InstructionResult(shadow_id),
    });
    clone.result = Some(shadow_id);
    function
        .block_mut(block)
        .expect("block exists")
        .insert_after(index, clone);
    // Operand rebinding happens in a later pass (§4.5); record the
    // mapping now so other instructions can find this PHI's shadow.
    shadow_map.insert(result, shadow_id)?;
    Ok(ShadowOutcome {
        inserted: 1,
        is_mover_shadow: false,
    })
}

fn shadow_load(
    function: &mut Function,
    shadow_map: &mut ShadowMap,
    block: BlockId,
    index: usize,
    inst: &Instruction,
    result: ValueId,
) -> PassResult<ShadowOutcome> {
    let atomic_or_global = inst.payload.base_is_global || inst.payload.memory.is_some_and(|m| m.atomic());
    if atomic_or_global {
        return mover_shadow_generic(function, shadow_map, block, index, result);
    }

    let address = rebind(shadow_map, function, inst.operands[0])?;
    let result_ty = function
        .value(result)
        .map(|v| v.ty.clone())
        .ok_or_else(|| PassError::MalformedIr("missing result type".into()))?;
    let mut memory = inst.payload.memory.unwrap_or_default();
    memory.flags.insert(crate::ir::instruction::MemoryFlags::VOLATILE);
    let clone = Instruction {
        opcode: Opcode::Load,
        result: None,
        operands: vec![address],
        parent: block,
        payload: InstructionPayload {
            memory: Some(memory),
            base_is_global: inst.payload.base_is_global,
            ..InstructionPayload::default()
        },
    };
    let shadow = coerce::insert(function, block, index + 1, clone, result_ty);
    shadow_map.insert(result, shadow)?;
    Ok(ShadowOutcome {
        inserted: 1,
        is_mover_shadow: false,
    })
}

/// Calls the canonical mover helper on `result` and records the
/// (type-restored) mover result as its shadow. Used for atomic/global
/// loads and for Call/Alloca/VAArg/AtomicCmpXchg/AtomicRMW (§4.4).
fn mover_shadow(
    function: &mut Function,
    helpers: &HelperRegistry,
    shadow_map: &mut ShadowMap,
    block: BlockId,
    index: usize,
    _inst: &Instruction,
    result: ValueId,
) -> PassResult<ShadowOutcome> {
    let outcome = mover_shadow_generic(function, shadow_map, block, index, result)?;
    let _ = helpers; // mover name resolved inside mover_shadow_generic via coerce plan
    Ok(outcome)
}

fn mover_shadow_generic(
    function: &mut Function,
    shadow_map: &mut ShadowMap,
    block: BlockId,
    index: usize,
    result: ValueId,
) -> PassResult<ShadowOutcome> {
    let inserted = insert_mover_call(function, shadow_map, block, index + 1, result)?;
    Ok(ShadowOutcome {
        inserted,
        is_mover_shadow: true,
    })
}

/// Emits `move_*(value)` (coerced to its canonical type and back) at
/// `block[insert_at]` and records the round-tripped result as `value`'s
/// shadow. Returns the number of instructions inserted, so callers that
/// splice into the middle of a block know how far to skip forward.
fn insert_mover_call(
    function: &mut Function,
    shadow_map: &mut ShadowMap,
    block: BlockId,
    insert_at: usize,
    value: ValueId,
) -> PassResult<usize> {
    let value_ty = function
        .value(value)
        .map(|v| v.ty.clone())
        .ok_or_else(|| PassError::MalformedIr("missing result type".into()))?;

    let (coerced, plan, next_index) = coerce::coerce_scalar(function, block, insert_at, value, &value_ty)?;
    let helper_name = format!("{}{}", crate::helpers::HELPER_PREFIX, {
        let suffix = plan.canonical.helper_suffix();
        format!("move_{suffix}")
    });
    let call = Instruction {
        opcode: Opcode::Call,
        result: None,
        operands: vec![coerced],
        parent: block,
        payload: InstructionPayload {
            callee: Some(helper_name),
            ..InstructionPayload::default()
        },
    };
    let call_result = coerce::insert(function, block, next_index, call, plan.canonical.as_type());
    let (restored, final_index) = coerce::invert_scalar(function, block, next_index + 1, call_result, plan, &value_ty)?;
    shadow_map.insert(value, restored)?;
    Ok(final_index - insert_at)
}

/// Gives every argument of `function` an opaque shadow via `move_*`,
/// inserted at the front of the entry block before any other
/// instruction is processed (§4.4 "shadowArgs"). Returns the number of
/// instructions inserted into the entry block, so the main processing
/// loop can start past them instead of re-shadowing its own output.
pub fn shadow_args(function: &mut Function, shadow_map: &mut ShadowMap) -> PassResult<usize> {
    let Some(entry) = function.blocks.first().map(|b| b.id) else {
        return Ok(0);
    };
    let mut insert_at = 0;
    for arg in function.argument_values() {
        insert_at += insert_mover_call(function, shadow_map, entry, insert_at, arg)?;
    }
    Ok(insert_at)
}
