//! Basic-block splitting over a decoded instruction stream.
//!
//! The SSA builder works per straight-line block. This module computes the
//! block boundaries (leaders) of a method body: branch targets, the
//! instructions following any control transfer, and the boundaries of every
//! exception handler region. Each block records the terminator that decides
//! its successors.

use std::collections::{BTreeSet, HashMap};
use std::ops::Range;

use crate::{
    model::{FlowKind, MethodBody, MethodId, TypeId},
    Result,
};

/// Index of a basic block within one method.
pub type BlockId = usize;

/// How a basic block transfers control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminator {
    /// Execution falls through to the next block.
    FallThrough(BlockId),
    /// Unconditional branch.
    Branch(BlockId),
    /// Conditional branch; `inst` is the stream index of the branch
    /// instruction whose condition the conditional statement references.
    CondBranch {
        /// Stream index of the branch instruction.
        inst: usize,
        /// Block taken when the condition holds.
        target: BlockId,
        /// Fallthrough block.
        fall: BlockId,
    },
    /// Method return.
    Return,
    /// Exception raise; the throw statement is emitted by the machine.
    Throw,
    /// Exit of a protected region.
    Leave(BlockId),
    /// End of a finally clause; successors are implicit.
    EndFinally,
}

impl Terminator {
    /// Returns the explicit successors of this terminator.
    #[must_use]
    pub fn successors(&self) -> Vec<BlockId> {
        match *self {
            Terminator::FallThrough(next) | Terminator::Branch(next) | Terminator::Leave(next) => {
                vec![next]
            }
            Terminator::CondBranch { target, fall, .. } => vec![target, fall],
            Terminator::Return | Terminator::Throw | Terminator::EndFinally => Vec::new(),
        }
    }
}

/// One straight-line instruction sequence.
#[derive(Debug, Clone)]
pub struct BasicBlock {
    /// Block index.
    pub id: BlockId,
    /// Instruction stream range, inclusive of the terminating instruction.
    pub range: Range<usize>,
    /// How the block transfers control.
    pub terminator: Terminator,
}

/// Block-level view of one exception handler region.
#[derive(Debug, Clone)]
pub struct RegionInfo {
    /// Entry block of the protected range.
    pub try_entry: BlockId,
    /// Exception type and entry block of the catch clause, if present.
    pub catch: Option<(TypeId, BlockId)>,
    /// Entry block of the finally clause, if present.
    pub finally_entry: Option<BlockId>,
}

/// The block structure of one method body.
#[derive(Debug, Clone)]
pub struct MethodStructure {
    /// All blocks in stream order.
    pub blocks: Vec<BasicBlock>,
    /// Exception regions, outermost first.
    pub regions: Vec<RegionInfo>,
}

impl MethodStructure {
    /// Returns the entry block id.
    #[must_use]
    pub fn entry(&self) -> BlockId {
        0
    }

    /// Returns the regions whose protected range starts at `block`,
    /// outermost first.
    #[must_use]
    pub fn regions_entered_at(&self, block: BlockId) -> Vec<&RegionInfo> {
        self.regions
            .iter()
            .filter(|r| r.try_entry == block)
            .collect()
    }
}

/// Splits a method body into basic blocks.
///
/// # Errors
///
/// Returns [`Error::Invariant`](crate::Error::Invariant) when the stream is
/// malformed: empty body, branch to a non-existent instruction, or control
/// falling off the end of the method.
pub fn split_blocks(method: MethodId, body: &MethodBody) -> Result<MethodStructure> {
    let insts = &body.instructions;
    if insts.is_empty() {
        return Err(invariant_error!("method {} has an empty body", method));
    }

    // Leader scan: block starts are branch targets, instructions following
    // a control transfer, and region boundaries.
    let mut leaders = BTreeSet::new();
    leaders.insert(0usize);
    for inst in insts {
        match inst.flow() {
            FlowKind::Next => {}
            FlowKind::Branch | FlowKind::CondBranch | FlowKind::Leave => {
                let Some(target) = inst.branch_target() else {
                    return Err(invariant_error!(
                        "branch at instruction {} in {} has no target",
                        inst.index,
                        method
                    ));
                };
                if target >= insts.len() {
                    return Err(invariant_error!(
                        "branch target {} out of range in {}",
                        target,
                        method
                    ));
                }
                leaders.insert(target);
                leaders.insert(inst.index + 1);
            }
            FlowKind::Return | FlowKind::Throw | FlowKind::EndFinally => {
                leaders.insert(inst.index + 1);
            }
        }
    }
    for region in &body.regions {
        leaders.insert(region.try_range.start);
        leaders.insert(region.try_range.end);
        if let Some(catch) = &region.catch {
            leaders.insert(catch.range.start);
            leaders.insert(catch.range.end);
        }
        if let Some(finally) = &region.finally {
            leaders.insert(finally.start);
            leaders.insert(finally.end);
        }
    }
    leaders.retain(|&l| l < insts.len());

    let starts: Vec<usize> = leaders.into_iter().collect();
    let mut block_of = HashMap::new();
    for (id, &start) in starts.iter().enumerate() {
        block_of.insert(start, id);
    }

    let lookup = |target: usize| -> Result<BlockId> {
        block_of.get(&target).copied().ok_or_else(|| {
            invariant_error!("branch target {} is not a block leader in {}", target, method)
        })
    };

    let mut blocks = Vec::with_capacity(starts.len());
    for (id, &start) in starts.iter().enumerate() {
        let end = starts.get(id + 1).copied().unwrap_or(insts.len());
        let last = &insts[end - 1];
        let terminator = match last.flow() {
            FlowKind::Branch => Terminator::Branch(lookup(last.branch_target().unwrap_or(0))?),
            FlowKind::Leave => Terminator::Leave(lookup(last.branch_target().unwrap_or(0))?),
            FlowKind::CondBranch => {
                if end >= insts.len() {
                    return Err(invariant_error!(
                        "conditional branch at end of method {}",
                        method
                    ));
                }
                Terminator::CondBranch {
                    inst: last.index,
                    target: lookup(last.branch_target().unwrap_or(0))?,
                    fall: lookup(end)?,
                }
            }
            FlowKind::Return => Terminator::Return,
            FlowKind::Throw => Terminator::Throw,
            FlowKind::EndFinally => Terminator::EndFinally,
            FlowKind::Next => {
                if end >= insts.len() {
                    return Err(invariant_error!(
                        "control falls off the end of method {}",
                        method
                    ));
                }
                Terminator::FallThrough(lookup(end)?)
            }
        };
        blocks.push(BasicBlock {
            id,
            range: start..end,
            terminator,
        });
    }

    let mut regions = Vec::with_capacity(body.regions.len());
    for region in &body.regions {
        let catch = match &region.catch {
            Some(clause) => Some((clause.exception_type, lookup(clause.range.start)?)),
            None => None,
        };
        let finally_entry = match &region.finally {
            Some(range) => Some(lookup(range.start)?),
            None => None,
        };
        regions.push(RegionInfo {
            try_entry: lookup(region.try_range.start)?,
            catch,
            finally_entry,
        });
    }

    Ok(MethodStructure { blocks, regions })
}
