//! The metadata model: the interface boundary to the bytecode reader.
//!
//! The compiler core does not parse assemblies. An external metadata reader
//! (out of scope here) decodes types, signatures, instruction streams and
//! exception regions, then registers them in a [`ModuleModel`]. Everything
//! downstream - lowering, closure resolution, dispatch tables, naming -
//! consumes only this model.
//!
//! # Key Types
//! - [`ModuleModel`] - registry of all types, methods, fields + hierarchy queries
//! - [`Instruction`], [`OpCode`], [`Operand`] - the decoded instruction stream
//! - [`TypeDesc`], [`MethodDesc`], [`FieldDesc`] - per-item descriptors
//! - [`TypeId`], [`MethodId`], [`FieldId`] - interned identity handles

pub mod instruction;
pub mod method;
pub mod module;
pub mod token;
pub mod types;

pub use instruction::{FlowKind, Instruction, OpCode, Operand};
pub use method::{CatchClause, ExceptionRegion, MethodBody, MethodDesc, MethodFlags};
pub use module::{ModuleModel, Primitives};
pub use token::{FieldId, MethodId, TypeId};
pub use types::{FieldDesc, FieldFlags, TypeDesc, TypeFlags};
