//! Resolves the runtime helper ABI (§4.1, §6) by name and classifies
//! function references as duplicated, ignored, or outside.

use std::collections::HashMap;

use crate::error::{PassError, PassResult};
use crate::ir::module::Module;
use crate::ir::types::CanonicalType;

/// The module-wide prefix shadow helpers are recognized by (§6). Any
/// equivalent unique marker would do; this is the one the renamer and
/// both passes agree on.
pub const HELPER_PREFIX: &str = "SWIFT$";

const CANONICAL_TYPES: [CanonicalType; 10] = [
    CanonicalType::I8,
    CanonicalType::I16,
    CanonicalType::I32,
    CanonicalType::I64,
    CanonicalType::Ptr,
    CanonicalType::Float,
    CanonicalType::Double,
    CanonicalType::Ps,
    CanonicalType::Pd,
    CanonicalType::Dq,
];

const TX_HELPER_NAMES: [&str; 8] = [
    "tx_start",
    "tx_end",
    "tx_cond_start",
    "tx_abort",
    "tx_threshold_exceeded",
    "tx_increment",
    "tx_pthread_mutex_lock",
    "tx_pthread_mutex_unlock",
];

/// Intrinsic-family prefixes treated as pure/duplicatable instructions
/// rather than opaque calls (§4.1 "Duplicated").
const DUPLICATED_PREFIXES: [&str; 6] = [
    "llvm.sqrt.",
    "llvm.powi.",
    "llvm.pow.",
    "llvm.fmuladd.",
    "llvm.convert.",
    "llvm.smul.with.overflow",
];

/// Exact names also treated as duplicated (overflow-arithmetic family
/// beyond the signed-multiply example named in the spec).
const DUPLICATED_EXACT_PREFIXES: [&str; 5] = [
    "llvm.sadd.with.overflow",
    "llvm.uadd.with.overflow",
    "llvm.ssub.with.overflow",
    "llvm.usub.with.overflow",
    "llvm.umul.with.overflow",
];

/// Intrinsic families skipped entirely (§4.1 "Ignored").
const IGNORED_PREFIXES: [&str; 6] = [
    "llvm.dbg.",
    "llvm.lifetime.",
    "llvm.invariant.",
    "llvm.stacksave",
    "llvm.stackrestore",
    "llvm.assume",
];

const IGNORED_EXACT: [&str; 1] = ["llvm.expect"];

/// A small, fixed set of well-known library functions always treated
/// as local/internal regardless of declaration-only status (§4.9
/// boundary placement exceptions).
pub const FUNC_EXCEPTIONS: [&str; 3] = ["__log_finite", "rand", "lrand48"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalleeClass {
    Duplicated,
    Ignored,
    Outside,
    /// A local, in-module function definition.
    Local,
}

/// Resolved runtime helper function names, one per module.
#[derive(Debug, Clone)]
pub struct HelperRegistry {
    checkers: HashMap<CanonicalType, String>,
    movers: HashMap<CanonicalType, String>,
    detected: String,
    tx: HashMap<&'static str, String>,
}

impl HelperRegistry {
    /// Resolves every required helper against `module`'s declared
    /// functions. Fails fast (§4.1 "Failure") if any is missing.
    pub fn resolve(module: &Module) -> PassResult<Self> {
        let mut checkers = HashMap::new();
        let mut movers = HashMap::new();
        for ty in CANONICAL_TYPES {
            let check_name = format!("{HELPER_PREFIX}check_{}", ty.helper_suffix());
            let move_name = format!("{HELPER_PREFIX}move_{}", ty.helper_suffix());
            require(module, &check_name)?;
            require(module, &move_name)?;
            checkers.insert(ty, check_name);
            movers.insert(ty, move_name);
        }

        let detected = format!("{HELPER_PREFIX}detected");
        require(module, &detected)?;

        let mut tx = HashMap::new();
        for name in TX_HELPER_NAMES {
            let full = format!("{HELPER_PREFIX}{name}");
            require(module, &full)?;
            tx.insert(name, full);
        }

        Ok(Self {
            checkers,
            movers,
            detected,
            tx,
        })
    }

    #[must_use]
    pub fn checker(&self, ty: CanonicalType) -> &str {
        &self.checkers[&ty]
    }

    #[must_use]
    pub fn mover(&self, ty: CanonicalType) -> &str {
        &self.movers[&ty]
    }

    #[must_use]
    pub fn detected(&self) -> &str {
        &self.detected
    }

    #[must_use]
    pub fn tx(&self, name: &'static str) -> &str {
        &self.tx[name]
    }

    /// True if `name` is a shadow-prefixed helper (checker, mover,
    /// `detected`, or any `tx_*`) — these are always ignored when seen
    /// as a call target (§4.1 "Ignored").
    #[must_use]
    pub fn is_helper_name(name: &str) -> bool {
        name.starts_with(HELPER_PREFIX)
    }

    #[must_use]
    pub fn classify(&self, module: &Module, callee: &str) -> CalleeClass {
        if Self::is_helper_name(callee) {
            return CalleeClass::Ignored;
        }
        if IGNORED_EXACT.contains(&callee) || IGNORED_PREFIXES.iter().any(|p| callee.starts_with(p)) {
            return CalleeClass::Ignored;
        }
        if DUPLICATED_EXACT_PREFIXES.contains(&callee)
            || DUPLICATED_PREFIXES.iter().any(|p| callee.starts_with(p))
        {
            return CalleeClass::Duplicated;
        }
        match module.function(callee) {
            Some(f) if !f.is_declaration => CalleeClass::Local,
            _ => CalleeClass::Outside,
        }
    }
}

fn require(module: &Module, name: &str) -> PassResult<()> {
    match module.function(name) {
        Some(_) => Ok(()),
        None => Err(PassError::MissingHelper(leak(name))),
    }
}

/// Helper names are a bounded, small set formatted at startup; leaking
/// them as `&'static str` keeps `PassError` cheap to construct and
/// match without forcing an owned-string variant everywhere.
fn leak(s: &str) -> &'static str {
    Box::leak(s.to_string().into_boxed_str())
}
