//! Resolver rules: the library-intrinsics interception point.
//!
//! Standard-library and runtime-implemented methods have no lowerable body;
//! the surrounding toolchain supplies their IR through a [`ResolverRules`]
//! implementation. The closure resolver consults the rules before lowering
//! every method and re-applies the rewrite hook on each method's IR until
//! it stabilizes.

use crate::{
    ir::MethodIr,
    model::{MethodId, ModuleModel},
};

/// Hooks consulted by the closure resolver around per-method lowering.
///
/// Implementations must be [`Sync`]: methods of one worklist generation are
/// lowered in parallel.
pub trait ResolverRules: Sync {
    /// Supplies a pre-built IR for a method, bypassing lowering entirely.
    ///
    /// Consulted first for every dequeued method. Returning `None` lets the
    /// normal lowering pipeline run.
    fn provide_ir(&self, module: &ModuleModel, method: MethodId) -> Option<MethodIr> {
        let _ = (module, method);
        None
    }

    /// Rewrites call sites inside a freshly lowered IR.
    ///
    /// Returns `true` when anything changed; the resolver re-applies the
    /// hook until it returns `false`, bounded by
    /// [`MAX_RESOLVE_PASSES`](crate::resolve::closure::MAX_RESOLVE_PASSES).
    fn rewrite(&self, module: &ModuleModel, ir: &mut MethodIr) -> bool {
        let _ = (module, ir);
        false
    }
}

/// The no-intrinsics default: never supplies IR, never rewrites.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullRules;

impl ResolverRules for NullRules {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_rules_are_inert() {
        let module = ModuleModel::new();
        let rules = NullRules;
        assert!(rules.provide_ir(&module, MethodId::new(0)).is_none());
    }
}
