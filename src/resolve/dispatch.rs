//! Virtual and interface dispatch table construction.
//!
//! Tables are built base-first: a type's table starts as a copy of its
//! base's, new-slot virtual methods append, and overrides overwrite the
//! inherited slot whose basemost declaration matches. Inherited slots
//! therefore keep their index down the whole subtype chain, which the
//! emitter relies on for table-literal output.

use std::collections::HashMap;

use crate::{
    model::{MethodId, ModuleModel, TypeId},
    Error, Result,
};

/// Per-type virtual dispatch tables with prefix-stable slot indices.
#[derive(Debug, Clone)]
pub struct DispatchTables {
    tables: HashMap<TypeId, Vec<MethodId>>,
}

impl DispatchTables {
    /// Builds tables for the given types and all of their ancestors.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AmbiguousSlot`] when an override matches more than
    /// one inherited slot.
    pub fn build(module: &ModuleModel, types: &[TypeId]) -> Result<Self> {
        let mut tables = HashMap::new();
        for &ty in types {
            Self::ensure(module, ty, &mut tables)?;
        }
        Ok(Self { tables })
    }

    fn ensure(
        module: &ModuleModel,
        ty: TypeId,
        tables: &mut HashMap<TypeId, Vec<MethodId>>,
    ) -> Result<()> {
        if tables.contains_key(&ty) {
            return Ok(());
        }
        let desc = module.type_desc(ty)?;
        let mut table = match desc.base {
            Some(base) => {
                Self::ensure(module, base, tables)?;
                tables[&base].clone()
            }
            None => Vec::new(),
        };
        for &method in &desc.methods {
            let method_desc = module.method(method)?;
            if !method_desc.is_virtual() {
                continue;
            }
            if method_desc.is_new_slot() {
                table.push(method);
                continue;
            }
            let root = module.basemost_virtual(method);
            let slots: Vec<usize> = table
                .iter()
                .enumerate()
                .filter(|(_, &slot)| module.basemost_virtual(slot) == root)
                .map(|(i, _)| i)
                .collect();
            match slots.as_slice() {
                // No inherited slot; the method starts its own.
                [] => table.push(method),
                [slot] => table[*slot] = method,
                _ => return Err(Error::AmbiguousSlot { method, ty }),
            }
        }
        tables.insert(ty, table);
        Ok(())
    }

    /// Returns the dispatch table of a type, if one was built.
    #[must_use]
    pub fn table(&self, ty: TypeId) -> Option<&[MethodId]> {
        self.tables.get(&ty).map(Vec::as_slice)
    }

    /// Returns the types a table was built for.
    pub fn types(&self) -> impl Iterator<Item = TypeId> + '_ {
        self.tables.keys().copied()
    }
}

/// Per (implementing type, interface) slot rows, indexed by the interface's
/// method declaration order. `None` marks an interface method the type
/// does not implement.
#[derive(Debug, Clone)]
pub struct InterfaceTables {
    tables: HashMap<(TypeId, TypeId), Vec<Option<MethodId>>>,
}

impl InterfaceTables {
    /// Builds rows for every required (implementing type, interface) pair.
    pub fn build(module: &ModuleModel, pairs: &[(TypeId, TypeId)]) -> Result<Self> {
        let mut tables = HashMap::new();
        for &(ty, iface) in pairs {
            let iface_desc = module.type_desc(iface)?;
            let row = iface_desc
                .methods
                .iter()
                .map(|&iface_method| module.find_interface_impl(ty, iface_method))
                .collect();
            tables.insert((ty, iface), row);
        }
        Ok(Self { tables })
    }

    /// Returns the slot row of one (type, interface) pair.
    #[must_use]
    pub fn table(&self, ty: TypeId, iface: TypeId) -> Option<&[Option<MethodId>]> {
        self.tables.get(&(ty, iface)).map(Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MethodFlags, TypeFlags};

    #[test]
    fn test_prefix_stability_under_override_and_extension() {
        let mut model = ModuleModel::new();
        let p = *model.primitives();
        let a = model.define_type("A", Some(p.object), TypeFlags::empty());
        let b = model.define_type("B", Some(a), TypeFlags::empty());
        let root_flags = MethodFlags::VIRTUAL | MethodFlags::NEW_SLOT;
        let ma = model.define_method(a, "M", Vec::new(), p.void, root_flags);
        let na = model.define_method(a, "N", Vec::new(), p.void, root_flags);
        let mb = model.define_method(b, "M", Vec::new(), p.void, MethodFlags::VIRTUAL);
        let pb = model.define_method(b, "P", Vec::new(), p.void, root_flags);

        let tables = DispatchTables::build(&model, &[b]).unwrap();
        assert_eq!(tables.table(a).unwrap(), &[ma, na]);
        // Inherited slot 1 keeps its index; slot 0 is overwritten in place;
        // the new root appends.
        assert_eq!(tables.table(b).unwrap(), &[mb, na, pb]);
    }

    #[test]
    fn test_non_virtual_methods_take_no_slot() {
        let mut model = ModuleModel::new();
        let p = *model.primitives();
        let a = model.define_type("A", Some(p.object), TypeFlags::empty());
        model.define_method(a, "Helper", Vec::new(), p.void, MethodFlags::STATIC);
        let m = model.define_method(
            a,
            "M",
            Vec::new(),
            p.void,
            MethodFlags::VIRTUAL | MethodFlags::NEW_SLOT,
        );

        let tables = DispatchTables::build(&model, &[a]).unwrap();
        assert_eq!(tables.table(a).unwrap(), &[m]);
    }

    #[test]
    fn test_interface_row_marks_missing_implementations() {
        let mut model = ModuleModel::new();
        let p = *model.primitives();
        let iface = model.define_type("IPair", None, TypeFlags::INTERFACE | TypeFlags::ABSTRACT);
        let iface_flags = MethodFlags::VIRTUAL | MethodFlags::ABSTRACT | MethodFlags::NEW_SLOT;
        let first = model.define_method(iface, "First", Vec::new(), p.void, iface_flags);
        model.define_method(iface, "Second", Vec::new(), p.void, iface_flags);

        let base = model.define_type("Base", Some(p.object), TypeFlags::empty());
        let base_first = model.define_method(base, "First", Vec::new(), p.void, MethodFlags::VIRTUAL);
        let derived = model.define_type("Derived", Some(base), TypeFlags::empty());
        model.add_interface_impl(derived, iface);
        let _ = first;

        let tables = InterfaceTables::build(&model, &[(derived, iface)]).unwrap();
        // First is inherited from the base chain, Second is unimplemented.
        assert_eq!(
            tables.table(derived, iface).unwrap(),
            &[Some(base_first), None]
        );
    }
}
