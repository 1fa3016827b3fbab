//! Abstract evaluation state carried across basic blocks.
//!
//! Within one block the machine works on an [`EvaluationState`]: the
//! abstract operand stack plus the current SSA value of every local and
//! argument slot. At block boundaries the exit state is folded into the
//! successor's [`BlockEntryInfo`], whose slots are always phi expressions
//! so that later predecessors can contribute additional inputs without
//! re-lowering the successor.

use crate::ir::expr::ExprId;

/// The merged entry state of one basic block.
///
/// Every slot holds a phi expression id. A zero-input phi marks a slot
/// that no predecessor has defined yet (an uninitialized local).
#[derive(Debug, Clone)]
pub struct BlockEntryInfo {
    /// Operand stack at block entry, bottom first.
    pub stack: Vec<ExprId>,
    /// Local slot values at block entry.
    pub locals: Vec<ExprId>,
    /// Argument slot values at block entry (receiver first when present).
    pub args: Vec<ExprId>,
}

/// The mutable state the machine threads through one block's instructions.
#[derive(Debug, Clone)]
pub struct EvaluationState {
    /// Operand stack, bottom first. Holds variable references or bare
    /// address expressions, never raw computations.
    pub stack: Vec<ExprId>,
    /// Current value of each local slot; `None` until first assignment.
    pub locals: Vec<Option<ExprId>>,
    /// Current value of each argument slot.
    pub args: Vec<ExprId>,
}

impl EvaluationState {
    /// Creates the method-entry state: empty stack, undefined locals and
    /// the given initial argument values.
    #[must_use]
    pub fn method_entry(local_count: usize, args: Vec<ExprId>) -> Self {
        Self {
            stack: Vec::new(),
            locals: vec![None; local_count],
            args,
        }
    }

    /// Creates the working state for a block from its merged entry info.
    #[must_use]
    pub fn from_entry(info: &BlockEntryInfo) -> Self {
        Self {
            stack: info.stack.clone(),
            locals: info.locals.iter().copied().map(Some).collect(),
            args: info.args.clone(),
        }
    }

    /// Returns the current stack depth.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.stack.len()
    }
}
