use crate::ir::types::Type;

/// Identifies a `Value` within a single function's arena. Ids are never
/// reused within a function, so equality is stable for the function's
/// lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

/// Identifies a `BasicBlock` within a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

/// A constant value. Constants never get a shadow entry (§3); their
/// shadow is themselves.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Int { ty: Type, value: u64 },
    Float(f32),
    Double(f64),
    Null(Type),
    Undef(Type),
    /// A reference to a global variable, by name.
    Global(String),
}

/// What kind of thing a `Value` denotes, independent of its type.
///
/// `get_shadow` (the shadow map) treats `Constant`, `Label`,
/// `FunctionRef`, `InlineAsm`, and `Metadata` as excluded (§4.2): they
/// are never inserted into the map and `get` returns `None` for them
/// without that being a bug. `Argument` is not excluded — every
/// parameter gets an opaque shadow of its own via `shadow_args`
/// (`move_*`), inserted at function entry before any other shadowing
/// happens.
#[derive(Debug, Clone, PartialEq)]
pub enum ValueKind {
    InstructionResult(ValueId),
    Argument(u32),
    Constant(Constant),
    Label(BlockId),
    FunctionRef(String),
    InlineAsm,
    Metadata,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    pub id: ValueId,
    pub ty: Type,
    pub kind: ValueKind,
}

impl Value {
    #[must_use]
    pub fn is_constant(&self) -> bool {
        matches!(self.kind, ValueKind::Constant(_))
    }

    #[must_use]
    pub fn is_excluded_from_shadowing(&self) -> bool {
        matches!(
            self.kind,
            ValueKind::Constant(_)
                | ValueKind::Label(_)
                | ValueKind::FunctionRef(_)
                | ValueKind::InlineAsm
                | ValueKind::Metadata
        )
    }
}
