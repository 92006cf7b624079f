use crate::ir::instruction::Instruction;
use crate::ir::value::BlockId;

/// An ordered sequence of instructions whose only terminator is the
/// last one (§3). Belongs to exactly one `Function`.
#[derive(Debug, Clone, Default)]
pub struct BasicBlock {
    pub id: BlockId,
    pub name: String,
    pub instructions: Vec<Instruction>,
}

impl BasicBlock {
    #[must_use]
    pub fn new(id: BlockId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            instructions: Vec::new(),
        }
    }

    #[must_use]
    pub fn terminator(&self) -> Option<&Instruction> {
        self.instructions.last()
    }

    #[must_use]
    pub fn first_non_phi(&self) -> usize {
        self.instructions
            .iter()
            .position(|i| i.opcode != crate::ir::opcode::Opcode::PHI)
            .unwrap_or(self.instructions.len())
    }

    pub fn insert_after(&mut self, index: usize, inst: Instruction) {
        self.instructions.insert(index + 1, inst);
    }

    pub fn insert_before(&mut self, index: usize, inst: Instruction) {
        self.instructions.insert(index, inst);
    }

    pub fn push(&mut self, inst: Instruction) {
        self.instructions.push(inst);
    }
}
