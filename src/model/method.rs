//! Method descriptors, bodies and exception regions.
//!
//! A [`MethodDesc`] carries everything the lowering passes need to know
//! about a method: signature, classification flags and - when the method is
//! lowerable - a [`MethodBody`] with the instruction stream, local slot
//! types and exception handler regions.

use std::ops::Range;

use bitflags::bitflags;

use crate::model::{
    instruction::Instruction,
    token::{MethodId, TypeId},
};

bitflags! {
    /// Classification flags for a method.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MethodFlags: u8 {
        /// The method is static (no implicit receiver).
        const STATIC = 1 << 0;
        /// The method participates in virtual dispatch.
        const VIRTUAL = 1 << 1;
        /// The method has no body and must be overridden.
        const ABSTRACT = 1 << 2;
        /// The method introduces a new dispatch slot rather than
        /// overriding an inherited one.
        const NEW_SLOT = 1 << 3;
        /// The method cannot be overridden further.
        const FINAL = 1 << 4;
        /// The method is an instance constructor.
        const CONSTRUCTOR = 1 << 5;
        /// The method is implemented by the runtime; it has no CIL body
        /// and must be intercepted by a resolver rule.
        const INTRINSIC = 1 << 6;
    }
}

/// One exception handler region of a method body.
///
/// The try range and handler ranges are instruction index ranges. At most
/// one catch clause and at most one finally clause per region; the reader
/// is expected to split multi-catch constructs into nested regions.
#[derive(Debug, Clone)]
pub struct ExceptionRegion {
    /// Instructions protected by this region.
    pub try_range: Range<usize>,
    /// Catch clause: exception type and handler instruction range.
    pub catch: Option<CatchClause>,
    /// Finally clause instruction range.
    pub finally: Option<Range<usize>>,
}

/// The single catch clause of an [`ExceptionRegion`].
#[derive(Debug, Clone)]
pub struct CatchClause {
    /// The exception type this clause handles.
    pub exception_type: TypeId,
    /// Handler instruction range.
    pub range: Range<usize>,
}

/// The lowerable body of a method.
#[derive(Debug, Clone)]
pub struct MethodBody {
    /// The decoded instruction stream, in stream order.
    pub instructions: Vec<Instruction>,
    /// Declared local variable slot types, in slot order.
    pub locals: Vec<TypeId>,
    /// Exception handler regions, outermost first.
    pub regions: Vec<ExceptionRegion>,
}

/// Descriptor for one method.
#[derive(Debug, Clone)]
pub struct MethodDesc {
    /// Handle of this method.
    pub id: MethodId,
    /// Method name; dispatch-slot matching uses name plus parameter types.
    pub name: String,
    /// The type declaring this method.
    pub declaring_type: TypeId,
    /// Parameter types in declaration order, excluding the implicit receiver.
    pub params: Vec<TypeId>,
    /// Return type; `void` for no value.
    pub return_type: TypeId,
    /// Classification flags.
    pub flags: MethodFlags,
    /// The body, if the method is lowerable.
    pub body: Option<MethodBody>,
}

impl MethodDesc {
    /// Returns `true` if the method is static.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.flags.contains(MethodFlags::STATIC)
    }

    /// Returns `true` if the method has an implicit receiver.
    #[must_use]
    pub fn has_this(&self) -> bool {
        !self.is_static()
    }

    /// Returns `true` if the method participates in virtual dispatch.
    #[must_use]
    pub fn is_virtual(&self) -> bool {
        self.flags.contains(MethodFlags::VIRTUAL)
    }

    /// Returns `true` if the method is abstract.
    #[must_use]
    pub fn is_abstract(&self) -> bool {
        self.flags.contains(MethodFlags::ABSTRACT)
    }

    /// Returns `true` if the method introduces a new dispatch slot.
    #[must_use]
    pub fn is_new_slot(&self) -> bool {
        self.flags.contains(MethodFlags::NEW_SLOT)
    }

    /// Returns `true` if the method is an instance constructor.
    #[must_use]
    pub fn is_constructor(&self) -> bool {
        self.flags.contains(MethodFlags::CONSTRUCTOR)
    }

    /// Returns `true` if the method is runtime-implemented.
    #[must_use]
    pub fn is_intrinsic(&self) -> bool {
        self.flags.contains(MethodFlags::INTRINSIC)
    }

    /// Returns `true` if a derived type may override this method.
    ///
    /// Virtual dispatch is only emitted for overridable targets; calls to
    /// final methods devirtualize at the call site.
    #[must_use]
    pub fn is_overridable(&self) -> bool {
        self.is_virtual() && !self.flags.contains(MethodFlags::FINAL)
    }

    /// Returns the number of argument slots including the implicit receiver.
    #[must_use]
    pub fn arg_count(&self) -> usize {
        self.params.len() + usize::from(self.has_this())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(flags: MethodFlags, params: usize) -> MethodDesc {
        MethodDesc {
            id: MethodId::new(0),
            name: "m".into(),
            declaring_type: TypeId::new(0),
            params: (0..params).map(|_| TypeId::new(1)).collect(),
            return_type: TypeId::new(2),
            flags,
            body: None,
        }
    }

    #[test]
    fn test_arg_count_includes_receiver() {
        assert_eq!(desc(MethodFlags::empty(), 2).arg_count(), 3);
        assert_eq!(desc(MethodFlags::STATIC, 2).arg_count(), 2);
    }

    #[test]
    fn test_overridable() {
        assert!(desc(MethodFlags::VIRTUAL, 0).is_overridable());
        assert!(!desc(MethodFlags::VIRTUAL | MethodFlags::FINAL, 0).is_overridable());
        assert!(!desc(MethodFlags::STATIC, 0).is_overridable());
    }
}
