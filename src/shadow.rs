//! Write-once original-value → shadow-value map, transient for one
//! function (§3, §4.2).

use std::collections::HashMap;

use crate::error::{PassError, PassResult};
use crate::ir::function::Function;
use crate::ir::value::ValueId;

#[derive(Debug, Clone, Default)]
pub struct ShadowMap {
    map: HashMap<ValueId, ValueId>,
}

impl ShadowMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `original -> shadow`. Fails if `original` already has an
    /// entry (§4.2 "write-once").
    pub fn insert(&mut self, original: ValueId, shadow: ValueId) -> PassResult<()> {
        if self.map.contains_key(&original) {
            return Err(PassError::ShadowCollision(original));
        }
        self.map.insert(original, shadow);
        Ok(())
    }

    /// Non-aborting membership check (§4.2).
    #[must_use]
    pub fn has(&self, original: ValueId) -> bool {
        self.map.contains_key(&original)
    }

    /// Returns the shadow of `original`, or `None` for values excluded
    /// from shadowing by construction (constants, labels, function
    /// refs, inline asm, metadata, invoke/landing-pad results). Aborts
    /// with `ShadowLookupMiss` for anything else with no recorded
    /// shadow — per §4.2 that is a bug, not a normal case.
    pub fn get(&self, function: &Function, original: ValueId) -> PassResult<Option<ValueId>> {
        if let Some(value) = function.value(original) {
            if value.is_excluded_from_shadowing() {
                return Ok(None);
            }
        }
        match self.map.get(&original) {
            Some(shadow) => Ok(Some(*shadow)),
            None => Err(PassError::ShadowLookupMiss(original)),
        }
    }

    /// Like `get`, but returns `Ok(None)` instead of erroring on a
    /// genuine miss. Used by the transitive-use DFS (§4.7, §9) where an
    /// unshadowed value (e.g. the result of an `Invoke`) is an expected
    /// terminal, not a bug.
    #[must_use]
    pub fn get_lenient(&self, function: &Function, original: ValueId) -> Option<ValueId> {
        if let Some(value) = function.value(original) {
            if value.is_excluded_from_shadowing() {
                return None;
            }
        }
        self.map.get(&original).copied()
    }

    #[must_use]
    pub fn is_injective(&self) -> bool {
        let mut seen = std::collections::HashSet::new();
        self.map.values().all(|v| seen.insert(*v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::types::Type;
    use crate::ir::value::{Constant, Value, ValueKind};
    use proptest::prelude::*;

    fn function_with_values(n: u32) -> Function {
        let mut f = Function::new("f", Type::Void);
        for i in 0..n {
            let id = f.fresh_value_id();
            f.insert_value(Value {
                id,
                ty: Type::I32,
                kind: ValueKind::InstructionResult(id),
            });
        }
        f
    }

    #[test]
    fn second_insert_for_the_same_original_collides() {
        let mut map = ShadowMap::new();
        map.insert(ValueId(0), ValueId(1)).unwrap();
        let err = map.insert(ValueId(0), ValueId(2)).unwrap_err();
        assert!(matches!(err, PassError::ShadowCollision(ValueId(0))));
    }

    #[test]
    fn lookup_miss_is_an_error_not_a_none() {
        let f = function_with_values(1);
        let map = ShadowMap::new();
        let err = map.get(&f, ValueId(0)).unwrap_err();
        assert!(matches!(err, PassError::ShadowLookupMiss(ValueId(0))));
    }

    #[test]
    fn excluded_values_never_need_a_shadow() {
        let mut f = Function::new("f", Type::Void);
        let id = f.fresh_value_id();
        f.insert_value(Value {
            id,
            ty: Type::I32,
            kind: ValueKind::Constant(Constant::Int { ty: Type::I32, value: 7 }),
        });
        let map = ShadowMap::new();
        assert_eq!(map.get(&f, id).unwrap(), None);
        assert_eq!(map.get_lenient(&f, id), None);
    }

    proptest! {
        /// Any sequence of distinct (original, shadow) pairs inserted once
        /// each keeps the map injective as long as the shadows were
        /// themselves distinct.
        #[test]
        fn stays_injective_under_distinct_inserts(pairs in prop::collection::vec(0u32..500, 0..64)) {
            let mut map = ShadowMap::new();
            let mut used_shadows = std::collections::HashSet::new();
            for (i, shadow_raw) in pairs.into_iter().enumerate() {
                let original = ValueId(i as u32);
                if !used_shadows.insert(shadow_raw) {
                    continue;
                }
                map.insert(original, ValueId(shadow_raw)).unwrap();
            }
            prop_assert!(map.is_injective());
        }
    }
}
