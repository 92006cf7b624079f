//! §4.6: checker-call insertion around synchronization points.

use std::collections::HashSet;

use crate::coerce;
use crate::error::{PassError, PassResult};
use crate::helpers::{CalleeClass, HelperRegistry};
use crate::ir::function::Function;
use crate::ir::instruction::{Instruction, InstructionPayload, MemoryAttrs};
use crate::ir::module::Module;
use crate::ir::opcode::Opcode;
use crate::ir::value::{BlockId, ValueId};
use crate::shadow::ShadowMap;

/// Allocates the monotonically increasing 32-bit checker-call ids
/// (§4.6, last bullet).
#[derive(Debug, Default)]
pub struct CheckIdAllocator(u32);

impl CheckIdAllocator {
    pub fn next(&mut self) -> u32 {
        let id = self.0;
        self.0 += 1;
        id
    }
}

/// Inserts checks for the instruction at `index`, returning
/// `(checks_before, checks_after)` — the number of instructions
/// spliced in before and after, so the caller can adjust its cursor.
#[allow(clippy::too_many_arguments)]
pub fn check_instruction(
    function: &mut Function,
    module: &Module,
    helpers: &HelperRegistry,
    shadow_map: &ShadowMap,
    ids: &mut CheckIdAllocator,
    mover_shadowed: &HashSet<ValueId>,
    block: BlockId,
    index: usize,
) -> PassResult<(usize, usize)> {
    let inst = function
        .block(block)
        .and_then(|b| b.instructions.get(index))
        .cloned()
        .ok_or_else(|| PassError::MalformedIr("check_instruction: index out of range".into()))?;

    match inst.opcode {
        Opcode::Br => Ok((0, 0)), // conditional branches handled by control_flow.rs
        Opcode::Call | Opcode::Invoke | Opcode::AtomicCmpXchg | Opcode::AtomicRMW => {
            if inst.opcode == Opcode::Call {
                let Some(callee) = &inst.payload.callee else {
                    return Ok((0, 0));
                };
                if matches!(
                    helpers.classify(module, callee),
                    CalleeClass::Ignored | CalleeClass::Duplicated
                ) {
                    return Ok((0, 0));
                }
            }
            let inserted = check_operands_before(
                function, shadow_map, ids, mover_shadowed, block, index, &inst.operands,
            )?;
            Ok((inserted, 0))
        }
        Opcode::Ret | Opcode::Switch => {
            if inst.operands.is_empty() {
                return Ok((0, 0));
            }
            let inserted = check_operands_before(
                function, shadow_map, ids, mover_shadowed, block, index, &inst.operands,
            )?;
            Ok((inserted, 0))
        }
        Opcode::Load => {
            let atomic_or_global =
                inst.payload.base_is_global || inst.payload.memory.is_some_and(|m| m.atomic());
            if !atomic_or_global {
                return Ok((0, 0));
            }
            let inserted = check_operands_before(
                function, shadow_map, ids, mover_shadowed, block, index, &inst.operands[..1],
            )?;
            Ok((inserted, 0))
        }
        Opcode::Store => {
            let atomic_or_global =
                inst.payload.base_is_global || inst.payload.memory.is_some_and(|m| m.atomic());
            if atomic_or_global {
                let inserted = check_operands_before(
                    function, shadow_map, ids, mover_shadowed, block, index, &inst.operands,
                )?;
                Ok((inserted, 0))
            } else {
                let after = check_store_after(function, shadow_map, ids, mover_shadowed, block, index, &inst)?;
                Ok((0, after))
            }
        }
        _ => Ok((0, 0)),
    }
}

fn should_skip(mover_shadowed: &HashSet<ValueId>, value: ValueId) -> bool {
    mover_shadowed.contains(&value)
}

fn check_operands_before(
    function: &mut Function,
    shadow_map: &ShadowMap,
    ids: &mut CheckIdAllocator,
    mover_shadowed: &HashSet<ValueId>,
    block: BlockId,
    index: usize,
    operands: &[ValueId],
) -> PassResult<usize> {
    let mut cursor = index;
    let mut inserted = 0;
    for &operand in operands {
        if should_skip(mover_shadowed, operand) {
            continue;
        }
        let Some(shadow) = shadow_map.get(function, operand)? else {
            continue;
        };
        let ty = function
            .value(operand)
            .map(|v| v.ty.clone())
            .ok_or_else(|| PassError::MalformedIr("missing operand type".into()))?;
        let n = emit_check(function, block, cursor, operand, shadow, &ty, ids.next())?;
        cursor += n;
        inserted += n;
    }
    Ok(inserted)
}

/// Non-atomic, non-global store: reload the stored-to address
/// (volatile, through the shadow pointer) and check the reloaded value
/// against the shadow of the stored value (§4.6).
fn check_store_after(
    function: &mut Function,
    shadow_map: &ShadowMap,
    ids: &mut CheckIdAllocator,
    mover_shadowed: &HashSet<ValueId>,
    block: BlockId,
    index: usize,
    inst: &Instruction,
) -> PassResult<usize> {
    let stored_value = inst.operands[0];
    let address = inst.operands[1];
    if should_skip(mover_shadowed, stored_value) {
        return Ok(0);
    }
    let Some(shadow_value) = shadow_map.get(function, stored_value)? else {
        return Ok(0);
    };
    let shadow_address = shadow_map
        .get(function, address)?
        .unwrap_or(address);
    let value_ty = function
        .value(stored_value)
        .map(|v| v.ty.clone())
        .ok_or_else(|| PassError::MalformedIr("missing stored value type".into()))?;
    let alignment = inst.payload.memory.map(|m| m.alignment).unwrap_or(0);

    let reload = Instruction {
        opcode: Opcode::Load,
        result: None,
        operands: vec![shadow_address],
        parent: block,
        payload: InstructionPayload {
            memory: Some(MemoryAttrs::volatile(alignment)),
            ..InstructionPayload::default()
        },
    };
    let reload_id = coerce::insert(function, block, index + 1, reload, value_ty.clone());
    let n = emit_check(function, block, index + 2, reload_id, shadow_value, &value_ty, ids.next())?;
    Ok(1 + n)
}

/// Coerces `value`/`shadow` to their canonical type if needed and
/// emits `check_<T>(value, shadow, id)`. Returns instructions inserted.
///
/// `pub(crate)` so `loop_checks` can use it directly for the explicit
/// loop-header PHI checks (§4.7), which aren't tied to any particular
/// instruction's operand list the way the rest of this module's checks
/// are.
pub(crate) fn emit_check(
    function: &mut Function,
    block: BlockId,
    index: usize,
    value: ValueId,
    shadow: ValueId,
    ty: &crate::ir::types::Type,
    id: u32,
) -> PassResult<usize> {
    let (coerced_value, plan, next) = coerce::coerce_scalar(function, block, index, value, ty)?;
    let (coerced_shadow, _, next) = coerce::coerce_scalar(function, block, next, shadow, ty)?;
    let id_const = function.fresh_value_id();
    function.insert_value(crate::ir::value::Value {
        id: id_const,
        ty: crate::ir::types::Type::I32,
        kind: crate::ir::value::ValueKind::Constant(crate::ir::value::Constant::Int {
            ty: crate::ir::types::Type::I32,
            value: id as u64,
        }),
    });
    let helper_name = format!(
        "{}check_{}",
        crate::helpers::HELPER_PREFIX,
        plan.canonical.helper_suffix()
    );
    let call = Instruction {
        opcode: Opcode::Call,
        result: None,
        operands: vec![coerced_value, coerced_shadow, id_const],
        parent: block,
        payload: InstructionPayload {
            callee: Some(helper_name),
            ..InstructionPayload::default()
        },
    };
    function
        .block_mut(block)
        .expect("block exists")
        .insert_before(next, call);
    Ok(next + 1 - index)
}
