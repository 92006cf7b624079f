//! A small programmatic IR builder. Parsing of IR from a textual or
//! bitcode form is out of scope; tests and callers construct `Function`s
//! directly through this builder instead.

use crate::ir::block::BasicBlock;
use crate::ir::function::Function;
use crate::ir::instruction::Instruction;
use crate::ir::opcode::Opcode;
use crate::ir::types::Type;
use crate::ir::value::{BlockId, Constant, Value, ValueId, ValueKind};

pub struct FunctionBuilder {
    function: Function,
}

impl FunctionBuilder {
    #[must_use]
    pub fn new(name: impl Into<String>, return_type: Type) -> Self {
        Self {
            function: Function::new(name, return_type),
        }
    }

    #[must_use]
    pub fn argument(mut self, ty: Type) -> (Self, ValueId) {
        let idx = self.function.arguments.len() as u32;
        self.function.arguments.push(ty.clone());
        let id = self.function.fresh_value_id();
        self.function.insert_value(Value {
            id,
            ty,
            kind: ValueKind::Argument(idx),
        });
        (self, id)
    }

    pub fn constant_int(&mut self, ty: Type, value: u64) -> ValueId {
        let id = self.function.fresh_value_id();
        self.function.insert_value(Value {
            id,
            ty: ty.clone(),
            kind: ValueKind::Constant(Constant::Int { ty, value }),
        });
        id
    }

    pub fn global_ref(&mut self, name: impl Into<String>, ty: Type) -> ValueId {
        let id = self.function.fresh_value_id();
        self.function.insert_value(Value {
            id,
            ty,
            kind: ValueKind::Constant(Constant::Global(name.into())),
        });
        id
    }

    pub fn function_ref(&mut self, name: impl Into<String>) -> ValueId {
        let id = self.function.fresh_value_id();
        self.function.insert_value(Value {
            id,
            ty: Type::Function,
            kind: ValueKind::FunctionRef(name.into()),
        });
        id
    }

    pub fn new_block(&mut self, name: impl Into<String>) -> BlockId {
        let id = self.function.fresh_block_id();
        self.function.blocks.push(BasicBlock::new(id, name));
        id
    }

    /// Appends `inst` to `block`, registering its result value (if any)
    /// in the function's value arena with type `result_ty`.
    pub fn append(&mut self, block: BlockId, mut inst: Instruction, result_ty: Option<Type>) -> Option<ValueId> {
        let result = result_ty.map(|ty| {
            let id = self.function.fresh_value_id();
            self.function.insert_value(Value {
                id,
                ty,
                kind: ValueKind::InstructionResult(id),
            });
            id
        });
        if let Some(result) = result {
            inst = inst.with_result(result);
        }
        self.function
            .block_mut(block)
            .expect("block must exist")
            .push(inst);
        result
    }

    #[must_use]
    pub fn finish(self) -> Function {
        self.function
    }

    pub fn function_mut(&mut self) -> &mut Function {
        &mut self.function
    }
}
