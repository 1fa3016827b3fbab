//! Whole-program closure resolution.
//!
//! Starting from a set of root methods, the resolver discovers every
//! method, type and field the emitted program needs. The worklist is
//! generational: one generation's methods are lowered in parallel, their
//! scan results are merged sequentially in generation order (so counts and
//! discovery order stay deterministic), and only when a generation comes up
//! empty does the expansion step run. Expansion materializes recorded
//! virtual and interface calls against the concrete types constructed so
//! far; if it enqueues anything the fixpoint is not yet reached.
//!
//! Virtual call sites are never queued directly. A call through an
//! interface-typed receiver records an (interface, method) pair; any other
//! virtual call records a (basemost root, static receiver type) pair. At
//! expansion time each record is resolved against every constructed
//! concrete type assignable to the receiver type, enqueueing the
//! most-derived non-abstract override. A record with no concrete match is
//! silently not materialized.

use std::collections::{HashMap, HashSet};

use dashmap::DashMap;
use rayon::prelude::*;

use crate::{
    ir::{expr::ExprKind, MethodIr},
    lower,
    model::{FieldId, MethodId, ModuleModel, TypeId},
    resolve::rules::ResolverRules,
    Error, Result,
};

/// Bound on the per-method call-rewrite loop.
///
/// Resolver rules are re-applied until the IR stabilizes; exceeding this
/// many passes means the rules are fighting each other and the compilation
/// aborts with [`Error::ResolveLoop`].
pub const MAX_RESOLVE_PASSES: usize = 10;

/// Reference counts and discovery order for everything the program reaches.
///
/// Counts grow monotonically during the worklist loop; the order vectors
/// record first discovery and provide the deterministic tie-break for
/// frequency-ranked naming.
#[derive(Debug, Clone, Default)]
pub struct ReachabilitySet {
    method_counts: HashMap<MethodId, usize>,
    method_order: Vec<MethodId>,
    type_counts: HashMap<TypeId, usize>,
    type_order: Vec<TypeId>,
    field_counts: HashMap<FieldId, usize>,
    field_order: Vec<FieldId>,
}

impl ReachabilitySet {
    /// Records one reference to a method.
    pub fn record_method(&mut self, method: MethodId) {
        let count = self.method_counts.entry(method).or_insert(0);
        if *count == 0 {
            self.method_order.push(method);
        }
        *count += 1;
    }

    /// Records one reference to a type.
    pub fn record_type(&mut self, ty: TypeId) {
        let count = self.type_counts.entry(ty).or_insert(0);
        if *count == 0 {
            self.type_order.push(ty);
        }
        *count += 1;
    }

    /// Records one reference to a field.
    pub fn record_field(&mut self, field: FieldId) {
        let count = self.field_counts.entry(field).or_insert(0);
        if *count == 0 {
            self.field_order.push(field);
        }
        *count += 1;
    }

    /// Returns the reference count of a method.
    #[must_use]
    pub fn method_count(&self, method: MethodId) -> usize {
        self.method_counts.get(&method).copied().unwrap_or(0)
    }

    /// Returns the reference count of a type.
    #[must_use]
    pub fn type_count(&self, ty: TypeId) -> usize {
        self.type_counts.get(&ty).copied().unwrap_or(0)
    }

    /// Returns the reference count of a field.
    #[must_use]
    pub fn field_count(&self, field: FieldId) -> usize {
        self.field_counts.get(&field).copied().unwrap_or(0)
    }

    /// Returns all referenced methods in first-discovery order.
    #[must_use]
    pub fn methods(&self) -> &[MethodId] {
        &self.method_order
    }

    /// Returns all referenced types in first-discovery order.
    #[must_use]
    pub fn types(&self) -> &[TypeId] {
        &self.type_order
    }

    /// Returns all referenced fields in first-discovery order.
    #[must_use]
    pub fn fields(&self) -> &[FieldId] {
        &self.field_order
    }
}

/// The outcome of running the resolver to its fixpoint.
#[derive(Debug)]
pub struct ResolvedProgram {
    /// IR per lowered (or rule-supplied) method.
    pub irs: HashMap<MethodId, MethodIr>,
    /// Reference counts and discovery order.
    pub reachability: ReachabilitySet,
    /// Concrete types constructed somewhere in the program, in discovery
    /// order. Drives virtual/interface expansion and dispatch tables.
    pub constructed: Vec<TypeId>,
    /// Interface call records actually seen, in discovery order.
    pub interface_uses: Vec<(TypeId, MethodId)>,
}

/// Per-method scan output, accumulated partition-style so parallel lowering
/// stays deterministic under the sequential merge.
#[derive(Debug, Default)]
struct ScanResult {
    enqueue: Vec<MethodId>,
    counted: Vec<MethodId>,
    types: Vec<TypeId>,
    constructed: Vec<TypeId>,
    fields: Vec<FieldId>,
    virtuals: Vec<(MethodId, TypeId)>,
    interfaces: Vec<(TypeId, MethodId)>,
}

/// The generational worklist driver.
pub struct ClosureResolver<'a> {
    module: &'a ModuleModel,
    rules: &'a dyn ResolverRules,
    irs: DashMap<MethodId, MethodIr>,
    reach: ReachabilitySet,
    queued: HashSet<MethodId>,
    queue: Vec<MethodId>,
    constructed: Vec<TypeId>,
    constructed_set: HashSet<TypeId>,
    virtual_records: Vec<(MethodId, TypeId)>,
    virtual_set: HashSet<(MethodId, TypeId)>,
    interface_records: Vec<(TypeId, MethodId)>,
    interface_set: HashSet<(TypeId, MethodId)>,
}

impl<'a> ClosureResolver<'a> {
    /// Creates a resolver over one module.
    #[must_use]
    pub fn new(module: &'a ModuleModel, rules: &'a dyn ResolverRules) -> Self {
        Self {
            module,
            rules,
            irs: DashMap::new(),
            reach: ReachabilitySet::default(),
            queued: HashSet::new(),
            queue: Vec::new(),
            constructed: Vec::new(),
            constructed_set: HashSet::new(),
            virtual_records: Vec::new(),
            virtual_set: HashSet::new(),
            interface_records: Vec::new(),
            interface_set: HashSet::new(),
        }
    }

    /// Runs the worklist to its fixpoint.
    ///
    /// # Errors
    ///
    /// Propagates lowering errors, [`Error::UnsupportedMethod`] for
    /// unloadable targets and [`Error::ResolveLoop`] when a rule keeps
    /// rewriting one method's IR.
    pub fn run(mut self, roots: &[MethodId]) -> Result<ResolvedProgram> {
        for &root in roots {
            self.enqueue(root);
        }
        loop {
            let generation = std::mem::take(&mut self.queue);
            if generation.is_empty() {
                if !self.expand()? {
                    break;
                }
                continue;
            }
            let module = self.module;
            let rules = self.rules;
            let irs = &self.irs;
            let scans: Vec<(MethodId, ScanResult)> = generation
                .par_iter()
                .map(|&method| -> Result<(MethodId, ScanResult)> {
                    let ir = Self::lower_one(module, rules, method)?;
                    let scan = Self::scan(module, &ir)?;
                    irs.insert(method, ir);
                    Ok((method, scan))
                })
                .collect::<Result<Vec<_>>>()?;
            for (_, scan) in scans {
                self.merge(scan);
            }
        }

        Ok(ResolvedProgram {
            irs: self.irs.into_iter().collect(),
            reachability: self.reach,
            constructed: self.constructed,
            interface_uses: self.interface_records,
        })
    }

    /// Obtains one method's IR: rules first, lowering otherwise, then the
    /// bounded call-rewrite loop.
    fn lower_one(
        module: &ModuleModel,
        rules: &dyn ResolverRules,
        method: MethodId,
    ) -> Result<MethodIr> {
        let mut ir = match rules.provide_ir(module, method) {
            Some(ir) => ir,
            None => lower::lower_method(module, method)?,
        };
        let mut passes = 0;
        while rules.rewrite(module, &mut ir) {
            passes += 1;
            if passes >= MAX_RESOLVE_PASSES {
                return Err(Error::ResolveLoop { method, passes });
            }
        }
        Ok(ir)
    }

    /// Scans one IR for everything it references.
    fn scan(module: &ModuleModel, ir: &MethodIr) -> Result<ScanResult> {
        let mut scan = ScanResult::default();
        let mut ids = Vec::new();
        ir.for_each_expr(|id| ids.push(id));
        let arena = ir.exprs();
        for id in ids {
            match arena.kind(id) {
                ExprKind::FieldAccess { field, .. } | ExprKind::FieldAddress { field, .. } => {
                    scan.fields.push(*field);
                }
                ExprKind::NewObj { ctor, .. } => {
                    scan.counted.push(*ctor);
                    scan.enqueue.push(*ctor);
                    scan.constructed.push(module.method(*ctor)?.declaring_type);
                }
                ExprKind::NewArray { .. } => scan.types.push(arena.ty(id)),
                ExprKind::Cast { .. } | ExprKind::IsInst { .. } | ExprKind::Unbox { .. } => {
                    scan.types.push(arena.ty(id));
                }
                ExprKind::Box { value_type, .. } => scan.types.push(*value_type),
                ExprKind::Call {
                    method,
                    object,
                    virtual_call,
                    constrained,
                    ..
                } => {
                    scan.counted.push(*method);
                    if !virtual_call {
                        scan.enqueue.push(*method);
                        continue;
                    }
                    let root = module.basemost_virtual(*method);
                    if let Some(constrained) = constrained {
                        // A constrained receiver devirtualizes on the spot.
                        match module.find_override(*constrained, root) {
                            Some(devirt) => scan.enqueue.push(devirt),
                            None => scan.enqueue.push(*method),
                        }
                        continue;
                    }
                    let receiver_ty = match object {
                        Some(object) => arena.ty(*object),
                        None => module.method(*method)?.declaring_type,
                    };
                    if module.type_desc(receiver_ty)?.is_interface() {
                        scan.interfaces.push((receiver_ty, *method));
                    } else {
                        scan.virtuals.push((root, receiver_ty));
                    }
                }
                _ => {}
            }
        }
        Ok(scan)
    }

    /// Folds one scan into the shared state. Sequential, in generation
    /// order.
    fn merge(&mut self, scan: ScanResult) {
        for field in scan.fields {
            self.reach.record_field(field);
        }
        for ty in scan.types {
            self.reach.record_type(ty);
        }
        for ty in scan.constructed {
            self.reach.record_type(ty);
            if self.constructed_set.insert(ty) {
                self.constructed.push(ty);
            }
        }
        for method in scan.counted {
            self.reach.record_method(method);
        }
        for method in scan.enqueue {
            self.enqueue(method);
        }
        for record in scan.virtuals {
            if self.virtual_set.insert(record) {
                self.virtual_records.push(record);
            }
        }
        for record in scan.interfaces {
            if self.interface_set.insert(record) {
                self.interface_records.push(record);
            }
        }
    }

    /// Queues a method if not yet seen.
    ///
    /// Call-site frequencies flow exclusively through the scans' `counted`
    /// lists; discovery here records the method once only when no call site
    /// has counted it, so targets without a static call site (roots,
    /// expansion results, devirtualized callees) still enter the naming
    /// order.
    fn enqueue(&mut self, method: MethodId) {
        if self.reach.method_count(method) == 0 {
            self.reach.record_method(method);
        }
        if self.queued.insert(method) {
            self.queue.push(method);
        }
    }

    /// Materializes recorded virtual and interface calls against the
    /// constructed types. Returns `true` if anything new was enqueued.
    fn expand(&mut self) -> Result<bool> {
        let before = self.queue.len();
        let virtuals = self.virtual_records.clone();
        let constructed = self.constructed.clone();
        for (root, receiver_ty) in virtuals {
            for &ty in &constructed {
                if !self.module.type_desc(ty)?.is_concrete() {
                    continue;
                }
                if !self.module.is_assignable_to(ty, receiver_ty) {
                    continue;
                }
                if let Some(overriding) = self.module.find_override(ty, root) {
                    if !self.module.method(overriding)?.is_abstract() {
                        self.enqueue(overriding);
                    }
                }
            }
        }
        let interfaces = self.interface_records.clone();
        for (iface, iface_method) in interfaces {
            for &ty in &constructed {
                if !self.module.type_desc(ty)?.is_concrete() {
                    continue;
                }
                if !self.module.all_interfaces(ty).contains(&iface) {
                    continue;
                }
                if let Some(implementation) = self.module.find_interface_impl(ty, iface_method) {
                    if !self.module.method(implementation)?.is_abstract() {
                        self.enqueue(implementation);
                    }
                }
            }
        }
        Ok(self.queue.len() > before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ExprArena, Stmt};
    use crate::model::{
        Instruction, MethodBody, MethodFlags, OpCode, Operand, TypeFlags,
    };
    use crate::resolve::rules::NullRules;

    fn body(insts: Vec<(OpCode, Operand)>) -> MethodBody {
        MethodBody {
            instructions: insts
                .into_iter()
                .enumerate()
                .map(|(i, (op, operand))| Instruction::new(i, op, operand))
                .collect(),
            locals: Vec::new(),
            regions: Vec::new(),
        }
    }

    fn ret_void() -> Vec<(OpCode, Operand)> {
        vec![(OpCode::Ret, Operand::None)]
    }

    /// A hierarchy with A declaring virtual M and B, C overriding it.
    struct Hierarchy {
        model: ModuleModel,
        main: MethodId,
        ma: MethodId,
        mb: MethodId,
        mc: MethodId,
        ctor_b: MethodId,
    }

    fn virtual_hierarchy() -> Hierarchy {
        let mut model = ModuleModel::new();
        let p = *model.primitives();
        let a = model.define_type("A", Some(p.object), TypeFlags::empty());
        let b = model.define_type("B", Some(a), TypeFlags::empty());
        let c = model.define_type("C", Some(a), TypeFlags::empty());

        let ma = model.define_method(
            a,
            "M",
            Vec::new(),
            p.void,
            MethodFlags::VIRTUAL | MethodFlags::NEW_SLOT,
        );
        let mb = model.define_method(b, "M", Vec::new(), p.void, MethodFlags::VIRTUAL);
        let mc = model.define_method(c, "M", Vec::new(), p.void, MethodFlags::VIRTUAL);
        let ctor_b = model.define_method(b, ".ctor", Vec::new(), p.void, MethodFlags::CONSTRUCTOR);
        for m in [ma, mb, mc, ctor_b] {
            model.set_body(m, body(ret_void()));
        }

        let host = model.define_type("Program", Some(p.object), TypeFlags::empty());
        let main = model.define_method(host, "Main", Vec::new(), p.void, MethodFlags::STATIC);
        model.set_body(
            main,
            body(vec![
                (OpCode::NewObj, Operand::Method(ctor_b)),
                (OpCode::CallVirt, Operand::Method(ma)),
                (OpCode::Ret, Operand::None),
            ]),
        );
        Hierarchy {
            model,
            main,
            ma,
            mb,
            mc,
            ctor_b,
        }
    }

    #[test]
    fn test_virtual_expansion_reaches_only_constructed_overrides() {
        let h = virtual_hierarchy();
        let program = ClosureResolver::new(&h.model, &NullRules)
            .run(&[h.main])
            .unwrap();

        assert!(program.irs.contains_key(&h.main));
        assert!(program.irs.contains_key(&h.ctor_b));
        assert!(program.irs.contains_key(&h.mb), "B.M must be materialized");
        assert!(
            !program.irs.contains_key(&h.mc),
            "C.M must not be materialized, C is never constructed"
        );
        // The statically named root is counted for naming even though its
        // body is never lowered.
        assert!(program.reachability.method_count(h.ma) > 0);
        assert!(!program.irs.contains_key(&h.ma));
    }

    #[test]
    fn test_interface_expansion_reaches_only_seen_types() {
        let mut model = ModuleModel::new();
        let p = *model.primitives();
        let iface = model.define_type("IRun", None, TypeFlags::INTERFACE | TypeFlags::ABSTRACT);
        let irun = model.define_method(
            iface,
            "Run",
            Vec::new(),
            p.void,
            MethodFlags::VIRTUAL | MethodFlags::ABSTRACT | MethodFlags::NEW_SLOT,
        );
        let r1 = model.define_type("First", Some(p.object), TypeFlags::empty());
        let r2 = model.define_type("Second", Some(p.object), TypeFlags::empty());
        model.add_interface_impl(r1, iface);
        model.add_interface_impl(r2, iface);
        let run1 = model.define_method(r1, "Run", Vec::new(), p.void, MethodFlags::VIRTUAL);
        let run2 = model.define_method(r2, "Run", Vec::new(), p.void, MethodFlags::VIRTUAL);
        let ctor1 = model.define_method(r1, ".ctor", Vec::new(), p.void, MethodFlags::CONSTRUCTOR);
        for m in [run1, run2, ctor1] {
            model.set_body(m, body(ret_void()));
        }

        let host = model.define_type("Program", Some(p.object), TypeFlags::empty());
        let main = model.define_method(host, "Main", vec![iface], p.void, MethodFlags::STATIC);
        model.set_body(
            main,
            body(vec![
                (OpCode::NewObj, Operand::Method(ctor1)),
                (OpCode::Pop, Operand::None),
                (OpCode::LdArg, Operand::Slot(0)),
                (OpCode::CallVirt, Operand::Method(irun)),
                (OpCode::Ret, Operand::None),
            ]),
        );

        let program = ClosureResolver::new(&model, &NullRules).run(&[main]).unwrap();
        assert!(program.irs.contains_key(&run1));
        assert!(!program.irs.contains_key(&run2));
        assert_eq!(program.interface_uses, vec![(iface, irun)]);
    }

    #[test]
    fn test_field_access_counts_accumulate() {
        let mut model = ModuleModel::new();
        let p = *model.primitives();
        let host = model.define_type("Counters", Some(p.object), TypeFlags::empty());
        let f = model.define_field(host, "F", p.int32, crate::model::FieldFlags::STATIC);
        let g = model.define_field(host, "G", p.int32, crate::model::FieldFlags::STATIC);
        let main = model.define_method(host, "Main", Vec::new(), p.int32, MethodFlags::STATIC);
        model.set_body(
            main,
            body(vec![
                (OpCode::LdSFld, Operand::Field(f)),
                (OpCode::LdSFld, Operand::Field(f)),
                (OpCode::Add, Operand::None),
                (OpCode::LdSFld, Operand::Field(g)),
                (OpCode::Add, Operand::None),
                (OpCode::Ret, Operand::None),
            ]),
        );

        let program = ClosureResolver::new(&model, &NullRules).run(&[main]).unwrap();
        assert_eq!(program.reachability.field_count(f), 2);
        assert_eq!(program.reachability.field_count(g), 1);
        assert_eq!(program.reachability.fields(), &[f, g]);
    }

    #[test]
    fn test_direct_call_sites_count_once_each() {
        let mut model = ModuleModel::new();
        let p = *model.primitives();
        let host = model.define_type("Program", Some(p.object), TypeFlags::empty());
        let helper = model.define_method(host, "Helper", Vec::new(), p.void, MethodFlags::STATIC);
        model.set_body(helper, body(ret_void()));
        let main = model.define_method(host, "Main", Vec::new(), p.void, MethodFlags::STATIC);
        model.set_body(
            main,
            body(vec![
                (OpCode::Call, Operand::Method(helper)),
                (OpCode::Call, Operand::Method(helper)),
                (OpCode::Ret, Operand::None),
            ]),
        );

        let program = ClosureResolver::new(&model, &NullRules).run(&[main]).unwrap();
        // Two call sites, two references; queueing adds nothing on top.
        assert_eq!(program.reachability.method_count(helper), 2);
        assert_eq!(program.reachability.method_count(main), 1);
    }

    #[test]
    fn test_resolve_loop_guard() {
        struct Unstable;
        impl ResolverRules for Unstable {
            fn rewrite(&self, _module: &ModuleModel, _ir: &mut MethodIr) -> bool {
                true
            }
        }

        let mut model = ModuleModel::new();
        let p = *model.primitives();
        let host = model.define_type("Program", Some(p.object), TypeFlags::empty());
        let main = model.define_method(host, "Main", Vec::new(), p.void, MethodFlags::STATIC);
        model.set_body(main, body(ret_void()));

        let err = ClosureResolver::new(&model, &Unstable)
            .run(&[main])
            .unwrap_err();
        assert!(matches!(
            err,
            Error::ResolveLoop {
                passes: MAX_RESOLVE_PASSES,
                ..
            }
        ));
    }

    #[test]
    fn test_rules_supply_ir_for_intrinsics() {
        struct Intrinsics {
            target: MethodId,
        }
        impl ResolverRules for Intrinsics {
            fn provide_ir(&self, _module: &ModuleModel, method: MethodId) -> Option<MethodIr> {
                (method == self.target).then(|| {
                    MethodIr::new(
                        method,
                        ExprArena::new(),
                        vec![Stmt::Return(None)],
                        0,
                    )
                })
            }
        }

        let mut model = ModuleModel::new();
        let p = *model.primitives();
        let host = model.define_type("Program", Some(p.object), TypeFlags::empty());
        let native = model.define_method(
            host,
            "Native",
            Vec::new(),
            p.void,
            MethodFlags::STATIC | MethodFlags::INTRINSIC,
        );
        let main = model.define_method(host, "Main", Vec::new(), p.void, MethodFlags::STATIC);
        model.set_body(
            main,
            body(vec![
                (OpCode::Call, Operand::Method(native)),
                (OpCode::Ret, Operand::None),
            ]),
        );

        // Without a rule the intrinsic is fatal.
        let err = ClosureResolver::new(&model, &NullRules)
            .run(&[main])
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedMethod { .. }));

        let rules = Intrinsics { target: native };
        let program = ClosureResolver::new(&model, &rules).run(&[main]).unwrap();
        assert!(program.irs.contains_key(&native));
    }
}
