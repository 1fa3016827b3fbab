//! Statement IR.
//!
//! Statements form trees; control flow between basic blocks is expressed as
//! [`Stmt::Continuation`] references into the owning method's node table
//! (see [`MethodIr`]). Before loop recovery the tree produced by the SSA
//! builder contains only blocks, conditionals, continuations and try
//! statements at the control-flow level; loop recovery then rewrites
//! self-referential continuation targets into [`Stmt::DoWhile`].
//!
//! [`MethodIr`]: crate::ir::MethodIr

use crate::ir::expr::ExprId;
use crate::model::TypeId;

/// Index of a statement node in a method's node table.
///
/// Node ids `0..block_count` are basic-block bodies; ids above that are
/// synthetic nodes such as try statements wrapping region entries.
pub type NodeId = usize;

/// The closed set of statement variants.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// Ordered sequence of statements.
    Block(Vec<Stmt>),
    /// Assignment `target <- value`. The target is a variable reference,
    /// field access or element access.
    Assign {
        /// The assignment target.
        target: ExprId,
        /// The assigned value.
        value: ExprId,
    },
    /// An expression evaluated for its side effect (a void call).
    SideEffect(ExprId),
    /// Conditional. Both arms are continuations in pre-recovery IR; after
    /// rule rewriting they may hold arbitrary statements.
    If {
        /// The condition.
        condition: ExprId,
        /// Statement executed when the condition holds.
        then: Box<Stmt>,
        /// Statement executed otherwise, if any.
        els: Option<Box<Stmt>>,
    },
    /// Transfer of control to another node in the method's node table.
    ///
    /// Points forward to a later node or closes a loop. Loop recovery
    /// eliminates the self-referential ones it can prove safe; the rest
    /// are rendered by the emitter as labelled jumps.
    Continuation {
        /// The target node.
        target: NodeId,
    },
    /// Post-condition loop `do { body } while (condition)`.
    DoWhile {
        /// The loop body.
        body: Box<Stmt>,
        /// The continuation condition.
        condition: ExprId,
    },
    /// Protected region with at most one catch clause and at most one
    /// finally clause.
    Try {
        /// The protected body.
        body: Box<Stmt>,
        /// The catch clause, if present.
        catch: Option<CatchArm>,
        /// The finally clause, if present.
        finally: Option<Box<Stmt>>,
    },
    /// Raise the exception value.
    Throw(ExprId),
    /// Return from the method, with a value unless the method is void.
    Return(Option<ExprId>),
}

/// The catch clause of a [`Stmt::Try`].
#[derive(Debug, Clone, PartialEq)]
pub struct CatchArm {
    /// Variable bound to the caught exception object.
    pub exception_var: ExprId,
    /// The exception type this clause handles.
    pub exception_type: TypeId,
    /// The handler body.
    pub body: Box<Stmt>,
}

impl Stmt {
    /// Returns an empty statement block.
    #[must_use]
    pub fn empty() -> Self {
        Stmt::Block(Vec::new())
    }

    /// Returns `true` if this is a block with no statements.
    #[must_use]
    pub fn is_empty_block(&self) -> bool {
        matches!(self, Stmt::Block(stmts) if stmts.is_empty())
    }
}
