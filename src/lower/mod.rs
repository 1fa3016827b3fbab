//! Lowering: from decoded instruction streams to structured statement IR.
//!
//! The pipeline for one method runs in fixed stages:
//!
//! 1. [`blocks`] - split the instruction stream into basic blocks and map
//!    exception regions onto them
//! 2. [`machine`] + [`state`] - abstract interpretation of each block under
//!    the single-assignment discipline
//! 3. [`ssa`] - drive the machine across the block graph, merging entry
//!    states through phis and assembling the node table
//! 4. [`loops`] - rewrite self-referential conditionals into do-while loops
//!
//! [`clusters`] derives the phi-connected variable partition the namer
//! consumes. [`lower_method`] runs stages 1 through 4.

pub mod blocks;
pub mod clusters;
pub mod loops;
pub mod machine;
pub mod ssa;
pub mod state;

pub use blocks::{split_blocks, BasicBlock, BlockId, MethodStructure, RegionInfo, Terminator};
pub use clusters::PhiClusters;
pub use loops::recover_loops;
pub use machine::StackMachine;
pub use ssa::SsaBuilder;
pub use state::{BlockEntryInfo, EvaluationState};

use crate::{ir::MethodIr, model::MethodId, model::ModuleModel, Error, Result};

/// Lowers one method body to structured statement IR.
///
/// # Errors
///
/// Returns [`Error::UnsupportedMethod`] for abstract or bodyless methods
/// (including intrinsics no resolver rule intercepted), plus any machine or
/// builder error.
pub fn lower_method(module: &ModuleModel, method: MethodId) -> Result<MethodIr> {
    let desc = module.method(method)?;
    if desc.is_abstract() {
        return Err(Error::UnsupportedMethod {
            method,
            reason: "abstract method has no body".to_string(),
        });
    }
    let Some(body) = &desc.body else {
        let reason = if desc.is_intrinsic() {
            "runtime intrinsic without a resolver rule"
        } else {
            "method has no body"
        };
        return Err(Error::UnsupportedMethod {
            method,
            reason: reason.to_string(),
        });
    };
    let structure = blocks::split_blocks(method, body)?;
    let mut ir = ssa::SsaBuilder::new(module, desc, body, &structure).build()?;
    loops::recover_loops(&mut ir);
    Ok(ir)
}
