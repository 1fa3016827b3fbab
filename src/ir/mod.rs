//! Intermediate representation for lowered method bodies.
//!
//! The IR has two layers:
//!
//! - [`expr`] - a typed, arena-allocated expression DAG ([`ExprArena`],
//!   [`ExprId`]); shared sub-expressions are legal and identity is index
//!   equality
//! - [`stmt`] - statement trees connected across basic blocks by
//!   continuation references into the per-method node table
//!
//! [`MethodIr`] ties both together for one method. [`fold`] provides the
//! exhaustively-matched traversals every pass is built from.

pub mod expr;
pub mod fold;
pub mod method;
pub mod stmt;

pub use expr::{BinaryOp, Const, Expr, ExprArena, ExprId, ExprKind, LocalId, UnaryOp};
pub use method::MethodIr;
pub use stmt::{CatchArm, NodeId, Stmt};
