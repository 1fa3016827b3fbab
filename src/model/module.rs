//! The in-memory metadata model consumed by the compiler.
//!
//! [`ModuleModel`] is the concrete shape of the metadata-reader interface:
//! the external reader (or a test harness) registers every type, field and
//! method up front, attaching bodies where methods are lowerable. The
//! compiler then only ever works with interned handles and the hierarchy
//! queries defined here.
//!
//! # Hierarchy Queries
//!
//! Beyond plain handle lookup, the model answers the questions the closure
//! resolver and dispatch builder need:
//!
//! - assignability between types (base chain and interface implementation)
//! - the basemost declaration of a virtual method ([`basemost_virtual`])
//! - the most-derived override of a virtual root on a given type
//!   ([`find_override`])
//! - the implementing method for an interface method on a given type
//!   ([`find_interface_impl`])
//!
//! [`basemost_virtual`]: ModuleModel::basemost_virtual
//! [`find_override`]: ModuleModel::find_override
//! [`find_interface_impl`]: ModuleModel::find_interface_impl

use crate::{
    model::{
        method::{MethodBody, MethodDesc, MethodFlags},
        token::{FieldId, MethodId, TypeId},
        types::{FieldDesc, FieldFlags, TypeDesc, TypeFlags},
    },
    Error, Result,
};

/// Handles of the built-in primitive types every module model provides.
///
/// Mirrors the distinguished types of the source type system; the lowering
/// machine needs them for literal typing and branch-condition lowering.
#[derive(Debug, Clone, Copy)]
pub struct Primitives {
    /// The `void` pseudo-type (only valid as a return type).
    pub void: TypeId,
    /// Boolean.
    pub boolean: TypeId,
    /// 32-bit signed integer.
    pub int32: TypeId,
    /// 64-bit signed integer.
    pub int64: TypeId,
    /// 64-bit float.
    pub float64: TypeId,
    /// Immutable string reference type.
    pub string: TypeId,
    /// Root of the reference type hierarchy.
    pub object: TypeId,
}

/// Registry of all types, methods and fields visible to one compilation.
///
/// Populated once by the metadata collaborator, then treated as read-only
/// by every compiler pass. All cross-references are interned handles.
#[derive(Debug)]
pub struct ModuleModel {
    types: Vec<TypeDesc>,
    methods: Vec<MethodDesc>,
    fields: Vec<FieldDesc>,
    primitives: Primitives,
}

impl ModuleModel {
    /// Creates an empty module model with the primitive types registered.
    #[must_use]
    pub fn new() -> Self {
        let mut model = Self {
            types: Vec::new(),
            methods: Vec::new(),
            fields: Vec::new(),
            primitives: Primitives {
                void: TypeId::new(0),
                boolean: TypeId::new(0),
                int32: TypeId::new(0),
                int64: TypeId::new(0),
                float64: TypeId::new(0),
                string: TypeId::new(0),
                object: TypeId::new(0),
            },
        };

        let value = TypeFlags::PRIMITIVE | TypeFlags::VALUE_TYPE | TypeFlags::SEALED;
        let object = model.define_type("System.Object", None, TypeFlags::empty());
        model.primitives = Primitives {
            object,
            void: model.define_type("System.Void", None, value),
            boolean: model.define_type("System.Boolean", Some(object), value),
            int32: model.define_type("System.Int32", Some(object), value),
            int64: model.define_type("System.Int64", Some(object), value),
            float64: model.define_type("System.Double", Some(object), value),
            string: model.define_type(
                "System.String",
                Some(object),
                TypeFlags::PRIMITIVE | TypeFlags::SEALED,
            ),
        };
        model
    }

    /// Returns the handles of the built-in primitive types.
    #[must_use]
    pub fn primitives(&self) -> &Primitives {
        &self.primitives
    }

    /// Registers a new type and returns its handle.
    pub fn define_type(&mut self, name: &str, base: Option<TypeId>, flags: TypeFlags) -> TypeId {
        let id = TypeId::new(u32::try_from(self.types.len()).unwrap_or(u32::MAX));
        self.types.push(TypeDesc {
            id,
            name: name.to_string(),
            base,
            fields: Vec::new(),
            methods: Vec::new(),
            interfaces: Vec::new(),
            flags,
        });
        id
    }

    /// Records that `ty` directly implements `iface`.
    pub fn add_interface_impl(&mut self, ty: TypeId, iface: TypeId) {
        if let Some(desc) = self.types.get_mut(ty.index()) {
            if !desc.interfaces.contains(&iface) {
                desc.interfaces.push(iface);
            }
        }
    }

    /// Registers a new field on `declaring_type` and returns its handle.
    pub fn define_field(
        &mut self,
        declaring_type: TypeId,
        name: &str,
        field_type: TypeId,
        flags: FieldFlags,
    ) -> FieldId {
        let id = FieldId::new(u32::try_from(self.fields.len()).unwrap_or(u32::MAX));
        self.fields.push(FieldDesc {
            id,
            name: name.to_string(),
            declaring_type,
            field_type,
            flags,
        });
        if let Some(desc) = self.types.get_mut(declaring_type.index()) {
            desc.fields.push(id);
        }
        id
    }

    /// Registers a new method on `declaring_type` and returns its handle.
    ///
    /// The body can be attached later via [`set_body`](Self::set_body),
    /// which allows instruction streams to reference methods defined after
    /// this one.
    pub fn define_method(
        &mut self,
        declaring_type: TypeId,
        name: &str,
        params: Vec<TypeId>,
        return_type: TypeId,
        flags: MethodFlags,
    ) -> MethodId {
        let id = MethodId::new(u32::try_from(self.methods.len()).unwrap_or(u32::MAX));
        self.methods.push(MethodDesc {
            id,
            name: name.to_string(),
            declaring_type,
            params,
            return_type,
            flags,
            body: None,
        });
        if let Some(desc) = self.types.get_mut(declaring_type.index()) {
            desc.methods.push(id);
        }
        id
    }

    /// Attaches a lowerable body to a previously registered method.
    pub fn set_body(&mut self, method: MethodId, body: MethodBody) {
        if let Some(desc) = self.methods.get_mut(method.index()) {
            desc.body = Some(body);
        }
    }

    /// Looks up a type descriptor.
    pub fn type_desc(&self, ty: TypeId) -> Result<&TypeDesc> {
        self.types.get(ty.index()).ok_or(Error::TypeNotFound(ty))
    }

    /// Looks up a method descriptor.
    pub fn method(&self, method: MethodId) -> Result<&MethodDesc> {
        self.methods
            .get(method.index())
            .ok_or(Error::MethodNotFound(method))
    }

    /// Looks up a field descriptor.
    pub fn field(&self, field: FieldId) -> Result<&FieldDesc> {
        self.fields
            .get(field.index())
            .ok_or(Error::FieldNotFound(field))
    }

    /// Returns all registered types in registration order.
    #[must_use]
    pub fn all_types(&self) -> &[TypeDesc] {
        &self.types
    }

    /// Returns the base chain of `ty`, starting with `ty` itself.
    pub fn base_chain(&self, ty: TypeId) -> impl Iterator<Item = &TypeDesc> {
        let mut current = self.types.get(ty.index());
        std::iter::from_fn(move || {
            let desc = current?;
            current = desc.base.and_then(|b| self.types.get(b.index()));
            Some(desc)
        })
    }

    /// Returns all interfaces implemented by `ty`, directly or through its
    /// base chain and interface inheritance.
    #[must_use]
    pub fn all_interfaces(&self, ty: TypeId) -> Vec<TypeId> {
        let mut result = Vec::new();
        let mut worklist: Vec<TypeId> = self
            .base_chain(ty)
            .flat_map(|d| d.interfaces.iter().copied())
            .collect();
        while let Some(iface) = worklist.pop() {
            if result.contains(&iface) {
                continue;
            }
            result.push(iface);
            if let Some(desc) = self.types.get(iface.index()) {
                worklist.extend(desc.interfaces.iter().copied());
            }
        }
        result
    }

    /// Returns `true` if a value of type `src` is assignable to a slot of
    /// type `dst` without an explicit conversion.
    #[must_use]
    pub fn is_assignable_to(&self, src: TypeId, dst: TypeId) -> bool {
        if src == dst {
            return true;
        }
        if self.base_chain(src).any(|d| d.id == dst) {
            return true;
        }
        self.all_interfaces(src).contains(&dst)
    }

    /// Returns `true` if `ty` is a numeric primitive.
    #[must_use]
    pub fn is_numeric(&self, ty: TypeId) -> bool {
        ty == self.primitives.int32 || ty == self.primitives.int64 || ty == self.primitives.float64
    }

    /// Returns `true` if values of `ty` are references that may be null.
    ///
    /// This drives the explicit null-comparison lowering of branch
    /// conditions: the target language treats an empty string as false, so
    /// reference truthiness must never be left implicit.
    #[must_use]
    pub fn is_reference(&self, ty: TypeId) -> bool {
        self.types
            .get(ty.index())
            .is_some_and(|d| !d.is_value_type() && ty != self.primitives.void)
    }

    /// Returns `true` if `a` and `b` have the same dispatch signature
    /// (name plus parameter types; return types do not participate).
    #[must_use]
    pub fn signature_matches(&self, a: MethodId, b: MethodId) -> bool {
        match (self.methods.get(a.index()), self.methods.get(b.index())) {
            (Some(da), Some(db)) => da.name == db.name && da.params == db.params,
            _ => false,
        }
    }

    /// Returns the basemost (least derived) declaration of a virtual method.
    ///
    /// Walks the declaring type's base chain collecting signature matches
    /// until a new-slot declaration or the hierarchy root terminates the
    /// search. Non-virtual methods are their own basemost declaration.
    #[must_use]
    pub fn basemost_virtual(&self, method: MethodId) -> MethodId {
        let Some(desc) = self.methods.get(method.index()) else {
            return method;
        };
        if !desc.is_virtual() {
            return method;
        }

        let mut basemost = method;
        let mut current = desc;
        loop {
            if current.is_new_slot() {
                break;
            }
            let Some(declaring) = self.types.get(current.declaring_type.index()) else {
                break;
            };
            let Some(base) = declaring.base else {
                break;
            };
            let inherited = self.base_chain(base).find_map(|t| {
                t.methods.iter().copied().find(|&m| {
                    self.signature_matches(m, method)
                        && self.methods[m.index()].is_virtual()
                })
            });
            match inherited {
                Some(m) => {
                    basemost = m;
                    current = &self.methods[m.index()];
                }
                None => break,
            }
        }
        basemost
    }

    /// Returns the most-derived override of virtual root `root` applicable
    /// to `ty`, or `None` if no declaration on the chain maps to that root.
    #[must_use]
    pub fn find_override(&self, ty: TypeId, root: MethodId) -> Option<MethodId> {
        for type_desc in self.base_chain(ty) {
            for &m in &type_desc.methods {
                let desc = &self.methods[m.index()];
                if desc.is_virtual()
                    && self.signature_matches(m, root)
                    && self.basemost_virtual(m) == root
                {
                    return Some(m);
                }
            }
        }
        None
    }

    /// Returns the method on `ty` (or its base chain) implementing the
    /// given interface method, or `None` when the type provides no
    /// implementation.
    #[must_use]
    pub fn find_interface_impl(&self, ty: TypeId, iface_method: MethodId) -> Option<MethodId> {
        for type_desc in self.base_chain(ty) {
            for &m in &type_desc.methods {
                if self.signature_matches(m, iface_method) {
                    return Some(m);
                }
            }
        }
        None
    }

    /// Returns all registered types in base-first topological order.
    ///
    /// Every type appears after its base type; unrelated types keep their
    /// registration order. The dispatch table builder depends on this.
    #[must_use]
    pub fn types_base_first(&self) -> Vec<TypeId> {
        let mut ordered = Vec::with_capacity(self.types.len());
        let mut emitted = vec![false; self.types.len()];
        fn emit(
            model: &ModuleModel,
            ty: usize,
            ordered: &mut Vec<TypeId>,
            emitted: &mut Vec<bool>,
        ) {
            if emitted[ty] {
                return;
            }
            emitted[ty] = true;
            if let Some(base) = model.types[ty].base {
                emit(model, base.index(), ordered, emitted);
            }
            ordered.push(model.types[ty].id);
        }
        for i in 0..self.types.len() {
            emit(self, i, &mut ordered, &mut emitted);
        }
        ordered
    }
}

impl Default for ModuleModel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hierarchy() -> (ModuleModel, TypeId, TypeId, TypeId, MethodId, MethodId, MethodId) {
        let mut model = ModuleModel::new();
        let object = model.primitives().object;
        let a = model.define_type("A", Some(object), TypeFlags::empty());
        let b = model.define_type("B", Some(a), TypeFlags::empty());
        let c = model.define_type("C", Some(b), TypeFlags::empty());
        let void = model.primitives().void;
        let ma = model.define_method(
            a,
            "M",
            Vec::new(),
            void,
            MethodFlags::VIRTUAL | MethodFlags::NEW_SLOT,
        );
        let mb = model.define_method(b, "M", Vec::new(), void, MethodFlags::VIRTUAL);
        let mc = model.define_method(c, "M", Vec::new(), void, MethodFlags::VIRTUAL);
        (model, a, b, c, ma, mb, mc)
    }

    #[test]
    fn test_assignability_follows_base_chain() {
        let (model, a, b, c, _, _, _) = hierarchy();
        assert!(model.is_assignable_to(c, a));
        assert!(model.is_assignable_to(b, a));
        assert!(model.is_assignable_to(c, model.primitives().object));
        assert!(!model.is_assignable_to(a, b));
    }

    #[test]
    fn test_basemost_virtual_walks_to_root_declaration() {
        let (model, _, _, _, ma, mb, mc) = hierarchy();
        assert_eq!(model.basemost_virtual(mc), ma);
        assert_eq!(model.basemost_virtual(mb), ma);
        assert_eq!(model.basemost_virtual(ma), ma);
    }

    #[test]
    fn test_find_override_picks_most_derived() {
        let (model, a, b, c, ma, mb, mc) = hierarchy();
        assert_eq!(model.find_override(c, ma), Some(mc));
        assert_eq!(model.find_override(b, ma), Some(mb));
        assert_eq!(model.find_override(a, ma), Some(ma));
    }

    #[test]
    fn test_interface_lookup() {
        let mut model = ModuleModel::new();
        let object = model.primitives().object;
        let void = model.primitives().void;
        let iface = model.define_type("IRun", None, TypeFlags::INTERFACE | TypeFlags::ABSTRACT);
        let irun = model.define_method(
            iface,
            "Run",
            Vec::new(),
            void,
            MethodFlags::VIRTUAL | MethodFlags::ABSTRACT | MethodFlags::NEW_SLOT,
        );
        let t = model.define_type("Runner", Some(object), TypeFlags::empty());
        let run = model.define_method(t, "Run", Vec::new(), void, MethodFlags::VIRTUAL);
        model.add_interface_impl(t, iface);

        assert!(model.all_interfaces(t).contains(&iface));
        assert!(model.is_assignable_to(t, iface));
        assert_eq!(model.find_interface_impl(t, irun), Some(run));
    }

    #[test]
    fn test_reference_classification() {
        let model = ModuleModel::new();
        let p = model.primitives();
        assert!(model.is_reference(p.object));
        assert!(model.is_reference(p.string));
        assert!(!model.is_reference(p.int32));
        assert!(!model.is_reference(p.boolean));
    }

    #[test]
    fn test_types_base_first() {
        let (model, a, b, c, _, _, _) = hierarchy();
        let order = model.types_base_first();
        let pos = |t: TypeId| order.iter().position(|&x| x == t).unwrap();
        assert!(pos(a) < pos(b));
        assert!(pos(b) < pos(c));
    }
}
