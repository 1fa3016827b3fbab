//! # cilscript Prelude
//!
//! This module provides a convenient prelude for the most commonly used
//! types from the cilscript library. Import this module to get quick access
//! to the essential types for driving a compilation.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all cilscript operations
pub use crate::Error;

/// The result type used throughout cilscript
pub use crate::Result;

// ================================================================================================
// Main Entry Points
// ================================================================================================

/// Whole-program compilation entry point and its output
pub use crate::{compile, Compilation};

/// The library-intrinsics interception point and its inert default
pub use crate::resolve::{NullRules, ResolverRules};

// ================================================================================================
// Metadata Model
// ================================================================================================

/// The module registry and the built-in primitive type handles
pub use crate::model::{ModuleModel, Primitives};

/// Interned identity handles
pub use crate::model::{FieldId, MethodId, TypeId};

/// Per-item descriptors and their flags
pub use crate::model::{
    FieldDesc, FieldFlags, MethodDesc, MethodFlags, TypeDesc, TypeFlags,
};

/// Decoded instruction streams, method bodies and exception regions
pub use crate::model::{
    CatchClause, ExceptionRegion, Instruction, MethodBody, OpCode, Operand,
};

// ================================================================================================
// Intermediate Representation
// ================================================================================================

/// The per-method IR container
pub use crate::ir::MethodIr;

/// The expression arena and its node identity
pub use crate::ir::{ExprArena, ExprId, ExprKind};

/// Statement trees and node-table indices
pub use crate::ir::{NodeId, Stmt};

// ================================================================================================
// Resolution
// ================================================================================================

/// Usage counts and discovery order over the reached program
pub use crate::resolve::ReachabilitySet;

/// Dispatch structure of the constructed types
pub use crate::resolve::{DispatchTables, InterfaceTables};

/// The compact identifier assignment
pub use crate::resolve::NameAssignment;
