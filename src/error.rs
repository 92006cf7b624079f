use crate::ir::types::Type;
use crate::ir::value::ValueId;

/// Every error here is a bug in the transformation, the IR, or a
/// collaborator contract; none are end-user-recoverable.
#[derive(Debug, thiserror::Error)]
pub enum PassError {
    #[error("runtime helper `{0}` is not declared in this module")]
    MissingHelper(&'static str),

    #[error("type coercion has no strategy for {0:?}")]
    UnhandledType(Type),

    #[error("value {0:?} should have a shadow but none was recorded")]
    ShadowLookupMiss(ValueId),

    #[error("shadow map already has an entry for {0:?}")]
    ShadowCollision(ValueId),

    #[error("global-constant cache already has an entry for ({0:?}, {1})")]
    GlobalConstCollision(Type, u64),

    #[error("opcode {0} is not a member of the closed instruction set")]
    UnknownOpcode(u32),

    #[error("post-pass verification failed: {0}")]
    VerifierFailure(String),

    #[error("malformed IR: {0}")]
    MalformedIr(String),
}

pub type PassResult<T> = Result<T, PassError>;
