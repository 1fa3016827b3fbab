//! Type and field descriptors.
//!
//! A [`TypeDesc`] is the compiler-facing view of one type: its base type,
//! declared fields and methods, implemented interfaces, and its
//! classification flags. The external metadata reader populates these when
//! registering types with the [`ModuleModel`].
//!
//! [`ModuleModel`]: crate::model::ModuleModel

use bitflags::bitflags;

use crate::model::token::{FieldId, MethodId, TypeId};

bitflags! {
    /// Classification flags for a type.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TypeFlags: u8 {
        /// The type is an interface.
        const INTERFACE = 1 << 0;
        /// The type is abstract and can never be instantiated.
        const ABSTRACT = 1 << 1;
        /// The type is sealed and cannot be subclassed.
        const SEALED = 1 << 2;
        /// The type has value semantics (copied, never null).
        const VALUE_TYPE = 1 << 3;
        /// The type is a built-in primitive.
        const PRIMITIVE = 1 << 4;
    }
}

bitflags! {
    /// Classification flags for a field.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FieldFlags: u8 {
        /// The field is static (per-type rather than per-instance).
        const STATIC = 1 << 0;
    }
}

/// Descriptor for one declared field.
#[derive(Debug, Clone)]
pub struct FieldDesc {
    /// Handle of this field.
    pub id: FieldId,
    /// Field name, used for diagnostics only.
    pub name: String,
    /// The type declaring this field.
    pub declaring_type: TypeId,
    /// The field's value type.
    pub field_type: TypeId,
    /// Static/instance classification.
    pub flags: FieldFlags,
}

impl FieldDesc {
    /// Returns `true` if the field is static.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.flags.contains(FieldFlags::STATIC)
    }
}

/// Descriptor for one type.
///
/// Fields, methods and interfaces are in declaration order; the dispatch
/// table builder relies on this order being stable.
#[derive(Debug, Clone)]
pub struct TypeDesc {
    /// Handle of this type.
    pub id: TypeId,
    /// Type name, used for diagnostics only.
    pub name: String,
    /// Base type, or `None` for the hierarchy root.
    pub base: Option<TypeId>,
    /// Declared fields, in declaration order.
    pub fields: Vec<FieldId>,
    /// Declared methods, in declaration order.
    pub methods: Vec<MethodId>,
    /// Directly implemented interfaces.
    pub interfaces: Vec<TypeId>,
    /// Classification flags.
    pub flags: TypeFlags,
}

impl TypeDesc {
    /// Returns `true` if the type is an interface.
    #[must_use]
    pub fn is_interface(&self) -> bool {
        self.flags.contains(TypeFlags::INTERFACE)
    }

    /// Returns `true` if the type is abstract.
    #[must_use]
    pub fn is_abstract(&self) -> bool {
        self.flags.contains(TypeFlags::ABSTRACT)
    }

    /// Returns `true` if the type is sealed.
    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.flags.contains(TypeFlags::SEALED)
    }

    /// Returns `true` if the type has value semantics.
    #[must_use]
    pub fn is_value_type(&self) -> bool {
        self.flags.contains(TypeFlags::VALUE_TYPE)
    }

    /// Returns `true` if instances of this type can be constructed.
    ///
    /// Interfaces and abstract types are never concrete.
    #[must_use]
    pub fn is_concrete(&self) -> bool {
        !self.is_interface() && !self.is_abstract()
    }
}
