use bitflags::bitflags;

use crate::ir::opcode::Opcode;
use crate::ir::value::{BlockId, ValueId};

bitflags! {
    /// Which of the atomic/volatile qualifiers a `Load`/`Store`/
    /// `AtomicCmpXchg`/`AtomicRMW` carries (§3).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MemoryFlags: u8 {
        const ATOMIC = 0b01;
        const VOLATILE = 0b10;
    }
}

/// Memory ordering/atomicity carried by `Load`/`Store`/`AtomicCmpXchg`/
/// `AtomicRMW` (§3: "for Load/Store atomicity and alignment").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryAttrs {
    pub flags: MemoryFlags,
    pub alignment: u32,
}

impl MemoryAttrs {
    #[must_use]
    pub fn plain(alignment: u32) -> Self {
        Self {
            flags: MemoryFlags::empty(),
            alignment,
        }
    }

    #[must_use]
    pub fn volatile(alignment: u32) -> Self {
        Self {
            flags: MemoryFlags::VOLATILE,
            alignment,
        }
    }

    #[must_use]
    pub fn atomic(self) -> bool {
        self.flags.contains(MemoryFlags::ATOMIC)
    }

    #[must_use]
    pub fn is_volatile(self) -> bool {
        self.flags.contains(MemoryFlags::VOLATILE)
    }
}

/// Extra per-opcode payload that doesn't fit the uniform
/// `opcode`/`operands`/`result` shape.
#[derive(Debug, Clone, Default)]
pub struct InstructionPayload {
    pub memory: Option<MemoryAttrs>,
    /// For `Load`/`Store`/`Call`/`Invoke`: true if the pointer/callee
    /// operand resolves to a module-level global variable rather than a
    /// local alloca or argument.
    pub base_is_global: bool,
    /// For `PHI`: the predecessor block each operand (by the same
    /// index) arrives from.
    pub incoming_blocks: Vec<BlockId>,
    /// For `Call`/`Invoke`: the callee, when statically known.
    pub callee: Option<String>,
    /// For `Br`/conditional branches and `Switch`: successor blocks.
    pub successors: Vec<BlockId>,
    /// Monotonic checker-call id assigned during check insertion
    /// (§4.6); `None` until a check has been emitted that references
    /// this instruction's result.
    pub check_id: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct Instruction {
    pub opcode: Opcode,
    /// The value this instruction defines. `None` for void calls and
    /// all terminators.
    pub result: Option<ValueId>,
    pub operands: Vec<ValueId>,
    pub parent: BlockId,
    pub payload: InstructionPayload,
}

impl Instruction {
    #[must_use]
    pub fn new(opcode: Opcode, parent: BlockId, operands: Vec<ValueId>) -> Self {
        Self {
            opcode,
            result: None,
            operands,
            parent,
            payload: InstructionPayload::default(),
        }
    }

    #[must_use]
    pub fn with_result(mut self, result: ValueId) -> Self {
        self.result = Some(result);
        self
    }

    #[must_use]
    pub fn with_memory(mut self, attrs: MemoryAttrs) -> Self {
        self.payload.memory = Some(attrs);
        self
    }

    #[must_use]
    pub fn is_void(&self) -> bool {
        self.result.is_none()
    }
}
