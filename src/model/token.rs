//! Interned identity handles for types, methods and fields.
//!
//! Every distinct type, method and field in a [`ModuleModel`] is assigned a
//! small integer handle when it is registered. All cross-references inside
//! the compiler use these handles: comparison is index equality, hashing is
//! trivial, and structural equality never has to be re-derived.
//!
//! # Design Rationale
//!
//! Handles encode no semantic information - all metadata lives in the
//! [`ModuleModel`] registries. The handles are unique within one module
//! model but not across models.
//!
//! [`ModuleModel`]: crate::model::ModuleModel

use std::fmt;

/// Unique identifier for a type registered in a [`ModuleModel`].
///
/// [`ModuleModel`]: crate::model::ModuleModel
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(u32);

/// Unique identifier for a method registered in a [`ModuleModel`].
///
/// [`ModuleModel`]: crate::model::ModuleModel
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId(u32);

/// Unique identifier for a field registered in a [`ModuleModel`].
///
/// [`ModuleModel`]: crate::model::ModuleModel
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldId(u32);

macro_rules! impl_handle {
    ($name:ident, $prefix:literal) => {
        impl $name {
            /// Creates a new handle from a raw index.
            #[must_use]
            pub const fn new(index: u32) -> Self {
                Self(index)
            }

            /// Returns the underlying index into the owning registry.
            #[must_use]
            pub const fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

impl_handle!(TypeId, "T");
impl_handle!(MethodId, "M");
impl_handle!(FieldId, "F");
