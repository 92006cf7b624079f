//! §4.5: deferred shadow-PHI operand rebinding, plus the constant-
//! globalization workaround that defeats induction-variable folding.

use std::collections::HashMap;

use crate::error::{PassError, PassResult};
use crate::ir::function::Function;
use crate::ir::instruction::{Instruction, InstructionPayload, MemoryAttrs};
use crate::ir::module::{GlobalVariable, Module};
use crate::ir::opcode::Opcode;
use crate::ir::types::Type;
use crate::ir::value::{BlockId, Constant, Value, ValueId, ValueKind};
use crate::shadow::ShadowMap;

/// Per-module cache of globalized integer constants, keyed by
/// `(type, value)`, so repeated constants share one global (§9 "Global
/// caches").
#[derive(Debug, Default)]
pub struct GlobalConstCache {
    map: HashMap<(Type, u64), String>,
    next_id: u32,
}

impl GlobalConstCache {
    pub fn get_or_create(&mut self, module: &mut Module, ty: &Type, value: u64) -> String {
        if let Some(name) = self.map.get(&(ty.clone(), value)) {
            return name.clone();
        }
        let name = format!("__ilr_const_{}_{}", self.next_id, value);
        self.next_id += 1;
        module.globals.push(GlobalVariable {
            name: name.clone(),
            ty: ty.clone(),
            is_constant: true,
            internal_linkage: true,
        });
        self.map.insert((ty.clone(), value), name.clone());
        name
    }
}

/// Pairs (original PHI value id, shadow PHI value id, containing block)
/// discovered while shadowing a function, passed to `rewire` once every
/// block has been processed.
#[derive(Debug, Clone, Copy)]
pub struct PendingPhi {
    pub original: ValueId,
    pub shadow: ValueId,
    pub block: BlockId,
}

/// Rebinds every shadow PHI's incoming values to the shadows of the
/// original PHI's incoming values, applying the constant-globalization
/// workaround for integer-constant incoming values (§4.5).
pub fn rewire(
    function: &mut Function,
    module: &mut Module,
    shadow_map: &ShadowMap,
    global_consts: &mut GlobalConstCache,
    pending: &[PendingPhi],
) -> PassResult<()> {
    for phi in pending {
        let original_inst = find_instruction(function, phi.block, phi.original)
            .ok_or_else(|| PassError::MalformedIr("original PHI not found".into()))?;
        let incoming_blocks = original_inst.payload.incoming_blocks.clone();
        let original_operands = original_inst.operands.clone();

        let mut new_operands = Vec::with_capacity(original_operands.len());
        let mut seen_blocks: HashMap<BlockId, ValueId> = HashMap::new();
        for (operand, pred) in original_operands.iter().zip(incoming_blocks.iter()) {
            if let Some(&already) = seen_blocks.get(pred) {
                // Switch fan-in: two incoming edges from the same
                // predecessor must carry the same rebound value.
                new_operands.push(already);
                continue;
            }
            let rebound = rebind_incoming(function, module, shadow_map, global_consts, *operand, *pred)?;
            seen_blocks.insert(*pred, rebound);
            new_operands.push(rebound);
        }

        let shadow_phi = function
            .block_mut(phi.block)
            .and_then(|b| {
                b.instructions
                    .iter_mut()
                    .find(|i| i.result == Some(phi.shadow))
            })
            .ok_or_else(|| PassError::MalformedIr("shadow PHI not found".into()))?;
        shadow_phi.operands = new_operands;
    }
    Ok(())
}

fn rebind_incoming(
    function: &mut Function,
    module: &mut Module,
    shadow_map: &ShadowMap,
    global_consts: &mut GlobalConstCache,
    operand: ValueId,
    pred: BlockId,
) -> PassResult<ValueId> {
    let value = function
        .value(operand)
        .cloned()
        .ok_or_else(|| PassError::MalformedIr("missing incoming value".into()))?;

    if let ValueKind::Constant(Constant::Int { ty, value: v }) = &value.kind {
        if ty.integer_width().is_some_and(|w| w <= 64) {
            return Ok(globalize_constant(function, module, global_consts, ty, *v, pred));
        }
    }

    Ok(shadow_map.get_lenient(function, operand).unwrap_or(operand))
}

/// Replaces an integer-constant PHI incoming value with a volatile
/// load from a per-constant internally linked global, inserted at the
/// end of the incoming predecessor block (before its terminator)
/// (§4.5).
fn globalize_constant(
    function: &mut Function,
    module: &mut Module,
    global_consts: &mut GlobalConstCache,
    ty: &Type,
    value: u64,
    pred: BlockId,
) -> ValueId {
    let name = global_consts.get_or_create(module, ty, value);
    let global_ref = function.fresh_value_id();
    function.insert_value(Value {
        id: global_ref,
        ty: ty.clone(),
        kind: ValueKind::Constant(Constant::Global(name)),
    });
    let load_result = function.fresh_value_id();
    function.insert_value(Value {
        id: load_result,
        ty: ty.clone(),
        kind: ValueKind::InstructionResult(load_result),
    });
    let load = Instruction {
        opcode: Opcode::Load,
        result: Some(load_result),
        operands: vec![global_ref],
        parent: pred,
        payload: InstructionPayload {
            memory: Some(MemoryAttrs::volatile(0)),
            ..InstructionPayload::default()
        },
    };
    if let Some(block) = function.block_mut(pred) {
        let before_terminator = block.instructions.len().saturating_sub(1);
        block.insert_before(before_terminator, load);
    }
    load_result
}

fn find_instruction(function: &Function, block: BlockId, result: ValueId) -> Option<Instruction> {
    function
        .block(block)
        .and_then(|b| b.instructions.iter().find(|i| i.result == Some(result)))
        .cloned()
}
