use std::collections::HashMap;

use crate::ir::block::BasicBlock;
use crate::ir::types::Type;
use crate::ir::value::{BlockId, Value, ValueId, ValueKind};

/// An ordered sequence of basic blocks, arguments, return type, name,
/// and declaration-vs-definition flag (§3).
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub return_type: Type,
    pub arguments: Vec<Type>,
    pub is_declaration: bool,
    pub blocks: Vec<BasicBlock>,
    /// Every `Value` the function's instructions and arguments can
    /// reference, keyed by `ValueId`. Constants live here too.
    values: HashMap<ValueId, Value>,
    next_value_id: u32,
}

impl Function {
    #[must_use]
    pub fn new(name: impl Into<String>, return_type: Type) -> Self {
        Self {
            name: name.into(),
            return_type,
            arguments: Vec::new(),
            is_declaration: false,
            blocks: Vec::new(),
            values: HashMap::new(),
            next_value_id: 0,
        }
    }

    pub fn fresh_value_id(&mut self) -> ValueId {
        let id = ValueId(self.next_value_id);
        self.next_value_id += 1;
        id
    }

    pub fn fresh_block_id(&self) -> BlockId {
        BlockId(self.blocks.len() as u32)
    }

    pub fn insert_value(&mut self, value: Value) {
        self.values.insert(value.id, value);
    }

    #[must_use]
    pub fn value(&self, id: ValueId) -> Option<&Value> {
        self.values.get(&id)
    }

    #[must_use]
    pub fn block(&self, id: BlockId) -> Option<&BasicBlock> {
        self.blocks.iter().find(|b| b.id == id)
    }

    #[must_use]
    pub fn block_mut(&mut self, id: BlockId) -> Option<&mut BasicBlock> {
        self.blocks.iter_mut().find(|b| b.id == id)
    }

    #[must_use]
    pub fn entry_block(&self) -> Option<&BasicBlock> {
        self.blocks.first()
    }

    /// This function's argument values, in declared parameter order.
    #[must_use]
    pub fn argument_values(&self) -> Vec<ValueId> {
        let mut args: Vec<(u32, ValueId)> = self
            .values
            .values()
            .filter_map(|v| match v.kind {
                ValueKind::Argument(idx) => Some((idx, v.id)),
                _ => None,
            })
            .collect();
        args.sort_by_key(|&(idx, _)| idx);
        args.into_iter().map(|(_, id)| id).collect()
    }

    /// Blocks that branch to `target`, in block order.
    #[must_use]
    pub fn predecessors(&self, target: BlockId) -> Vec<BlockId> {
        self.blocks
            .iter()
            .filter(|b| b.instructions.last().is_some_and(|t| t.payload.successors.contains(&target)))
            .map(|b| b.id)
            .collect()
    }

    #[must_use]
    pub fn successors(&self, block: BlockId) -> Vec<BlockId> {
        self.block(block)
            .and_then(|b| b.terminator())
            .map(|t| t.payload.successors.clone())
            .unwrap_or_default()
    }
}
