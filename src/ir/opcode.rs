use num_enum::TryFromPrimitive;

/// The closed set of instruction opcodes. Every transformer match on
/// `Opcode` must be exhaustive; adding a variant here is a breaking
/// change to both passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
#[repr(u32)]
pub enum Opcode {
    Add = 0,
    FAdd = 1,
    Sub = 2,
    FSub = 3,
    Mul = 4,
    FMul = 5,
    UDiv = 6,
    SDiv = 7,
    FDiv = 8,
    URem = 9,
    SRem = 10,
    FRem = 11,
    Shl = 12,
    LShr = 13,
    AShr = 14,
    And = 15,
    Or = 16,
    Xor = 17,

    Load = 18,
    Store = 19,
    GetElementPtr = 20,
    Alloca = 21,
    VAArg = 22,

    Trunc = 23,
    ZExt = 24,
    SExt = 25,
    FPTrunc = 26,
    FPExt = 27,
    FPToUI = 28,
    FPToSI = 29,
    UIToFP = 30,
    SIToFP = 31,
    IntToPtr = 32,
    PtrToInt = 33,
    BitCast = 34,

    ICmp = 35,
    FCmp = 36,
    Select = 37,

    ExtractElement = 38,
    InsertElement = 39,
    ShuffleVector = 40,
    ExtractValue = 41,
    InsertValue = 42,

    PHI = 43,
    Call = 44,
    Invoke = 45,
    Ret = 46,
    Br = 47,
    Switch = 48,
    Unreachable = 49,
    Resume = 50,
    LandingPad = 51,

    AtomicCmpXchg = 52,
    AtomicRMW = 53,
}

impl Opcode {
    /// Opcodes whose shadow is produced by cloning the instruction and
    /// rebinding operands to their shadows (§4.4 "pure" row): ordinary
    /// arithmetic, logic, cast, compare, vector, and aggregate ops.
    #[must_use]
    pub fn is_pure_clonable(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            Add | FAdd
                | Sub
                | FSub
                | Mul
                | FMul
                | UDiv
                | SDiv
                | FDiv
                | URem
                | SRem
                | FRem
                | Shl
                | LShr
                | AShr
                | And
                | Or
                | Xor
                | GetElementPtr
                | Trunc
                | ZExt
                | SExt
                | FPTrunc
                | FPExt
                | FPToUI
                | FPToSI
                | UIToFP
                | SIToFP
                | IntToPtr
                | PtrToInt
                | BitCast
                | ICmp
                | FCmp
                | Select
                | ExtractElement
                | InsertElement
                | ShuffleVector
                | ExtractValue
                | InsertValue
        )
    }

    /// Opcodes whose result is duplicated via a `move_*` call rather
    /// than re-executed (§4.4).
    #[must_use]
    pub fn is_move_shadowed(self) -> bool {
        use Opcode::*;
        matches!(self, Call | Invoke | Alloca | VAArg | AtomicCmpXchg | AtomicRMW)
    }

    /// Opcodes that never get a shadow (§4.4 last row).
    #[must_use]
    pub fn is_unshadowed(self) -> bool {
        use Opcode::*;
        matches!(self, Resume | LandingPad | Invoke)
    }

    #[must_use]
    pub fn is_terminator(self) -> bool {
        use Opcode::*;
        matches!(self, Ret | Br | Switch | Unreachable | Resume | Invoke)
    }

    /// Instructions that count toward TX's per-BB longest path (§4.10):
    /// everything except PHIs, unreachables, and no-op pointer-width
    /// casts (the latter filtered by the caller, which knows widths).
    #[must_use]
    pub fn counts_toward_longest_path(self) -> bool {
        !matches!(self, Opcode::PHI | Opcode::Unreachable)
    }
}
