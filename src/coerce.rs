//! Casts an arbitrary IR value down to one of the ten canonical
//! helper-supported types before a checker/mover call, and inverts the
//! cast afterward so shadowed uses stay type-correct (§4.3).

use crate::error::{PassError, PassResult};
use crate::ir::block::BasicBlock;
use crate::ir::function::Function;
use crate::ir::instruction::Instruction;
use crate::ir::opcode::Opcode;
use crate::ir::types::{CanonicalType, Type};
use crate::ir::value::{BlockId, Value, ValueId, ValueKind};

/// The canonical type a value must be coerced to, and the cast opcode
/// used to get there (and, in reverse, to get back).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoercionStep {
    pub canonical: CanonicalType,
    pub forward_opcode: Opcode,
    pub inverse_opcode: Opcode,
}

/// Picks the canonical type and cast pair for a scalar (non-struct)
/// type. Structs are handled field-wise by the caller (§4.3).
pub fn plan_for(ty: &Type) -> PassResult<CoercionStep> {
    match ty {
        Type::Integer(width) => {
            let canonical = smallest_canonical_integer(*width)?;
            Ok(CoercionStep {
                canonical,
                forward_opcode: Opcode::ZExt,
                inverse_opcode: Opcode::Trunc,
            })
        }
        Type::Pointer => Ok(CoercionStep {
            canonical: CanonicalType::Ptr,
            forward_opcode: Opcode::BitCast,
            inverse_opcode: Opcode::BitCast,
        }),
        Type::Half => Ok(CoercionStep {
            canonical: CanonicalType::Float,
            forward_opcode: Opcode::FPExt,
            inverse_opcode: Opcode::FPTrunc,
        }),
        Type::Float => Ok(CoercionStep {
            canonical: CanonicalType::Float,
            forward_opcode: Opcode::BitCast,
            inverse_opcode: Opcode::BitCast,
        }),
        Type::Double => Ok(CoercionStep {
            canonical: CanonicalType::Double,
            forward_opcode: Opcode::BitCast,
            inverse_opcode: Opcode::BitCast,
        }),
        Type::X86Fp80 => Ok(CoercionStep {
            canonical: CanonicalType::Double,
            forward_opcode: Opcode::FPTrunc,
            inverse_opcode: Opcode::FPExt,
        }),
        Type::Vector { lanes, element } => plan_for_vector(*lanes, element),
        other => Err(PassError::UnhandledType(other.clone())),
    }
}

fn smallest_canonical_integer(width: u32) -> PassResult<CanonicalType> {
    match width {
        w if w <= 8 => Ok(CanonicalType::I8),
        w if w <= 16 => Ok(CanonicalType::I16),
        w if w <= 32 => Ok(CanonicalType::I32),
        w if w <= 64 => Ok(CanonicalType::I64),
        _ => Err(PassError::UnhandledType(Type::Integer(width))),
    }
}

fn plan_for_vector(lanes: u32, element: &Type) -> PassResult<CoercionStep> {
    match (lanes, element) {
        (2 | 4 | 8 | 16, Type::Integer(_)) => Ok(CoercionStep {
            canonical: CanonicalType::Dq,
            forward_opcode: Opcode::ZExt,
            inverse_opcode: Opcode::Trunc,
        }),
        (2, Type::Double) => Ok(CoercionStep {
            canonical: CanonicalType::Pd,
            forward_opcode: Opcode::BitCast,
            inverse_opcode: Opcode::BitCast,
        }),
        (_, Type::Float) => Ok(CoercionStep {
            canonical: CanonicalType::Pd,
            forward_opcode: Opcode::FPExt,
            inverse_opcode: Opcode::FPTrunc,
        }),
        (2, Type::Pointer) => Ok(CoercionStep {
            canonical: CanonicalType::Dq,
            forward_opcode: Opcode::PtrToInt,
            inverse_opcode: Opcode::IntToPtr,
        }),
        _ => Err(PassError::UnhandledType(Type::vector(lanes, element.clone()))),
    }
}

/// Inserts `inst` into `block` at `index`, allocating a fresh result
/// value of type `result_ty`, and returns its id. Used by both the
/// coercer and the ILR/TX transforms that need to splice instructions.
pub fn insert(
    function: &mut Function,
    block: BlockId,
    index: usize,
    mut inst: Instruction,
    result_ty: Type,
) -> ValueId {
    let id = function.fresh_value_id();
    function.insert_value(Value {
        id,
        ty: result_ty,
        kind: ValueKind::InstructionResult(id),
    });
    inst = inst.with_result(id);
    bb_mut(function, block).insert_before(index, inst);
    id
}

fn bb_mut(function: &mut Function, block: BlockId) -> &mut BasicBlock {
    function.block_mut(block).expect("block must exist in its own function")
}

/// Coerces `value` (of type `value_ty`) to its canonical type in-place,
/// inserting the forward cast before `index`. Returns the coerced
/// value id, the plan used (for later inversion), and the index just
/// past the inserted instruction.
pub fn coerce_scalar(
    function: &mut Function,
    block: BlockId,
    index: usize,
    value: ValueId,
    value_ty: &Type,
) -> PassResult<(ValueId, CoercionStep, usize)> {
    let plan = plan_for(value_ty)?;
    if plan.canonical.as_type() == *value_ty {
        return Ok((value, plan, index));
    }
    let inst = Instruction::new(plan.forward_opcode, block, vec![value]);
    let coerced = insert(function, block, index, inst, plan.canonical.as_type());
    Ok((coerced, plan, index + 1))
}

/// Inverts a previous `coerce_scalar`, casting `value` (of the
/// canonical type) back to `original_ty`. Used after a `move_*` call so
/// the shadow keeps the original's type (§4.3 "invert the cast").
pub fn invert_scalar(
    function: &mut Function,
    block: BlockId,
    index: usize,
    value: ValueId,
    plan: CoercionStep,
    original_ty: &Type,
) -> PassResult<(ValueId, usize)> {
    if plan.canonical.as_type() == *original_ty {
        return Ok((value, index));
    }
    let inst = Instruction::new(plan.inverse_opcode, block, vec![value]);
    let back = insert(function, block, index, inst, original_ty.clone());
    Ok((back, index + 1))
}
