// Copyright 2025 The cilscript authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]

//! # cilscript
//!
//! An ahead-of-time compiler core that transcodes CIL (Common Intermediate
//! Language) bytecode into structured, JavaScript-shaped programs. Built in
//! pure Rust, `cilscript` lowers stack-based method bodies into an explicit
//! single-assignment statement IR, resolves the whole-program reachability
//! closure over virtual and interface dispatch, and assigns the compact
//! frequency-ranked identifiers the emitted program uses.
//!
//! ## Features
//!
//! - **Stack elimination** - Abstract interpretation turns every stack
//!   operation into an explicit single-assignment variable
//! - **Structured control flow** - Basic blocks reconnect through phi
//!   merges, conditionals recover into do-while loops, exception regions
//!   become try statements
//! - **Whole-program closure** - A generational worklist discovers exactly
//!   the methods the constructed types can dispatch to, in parallel and
//!   deterministically
//! - **Prefix-stable dispatch tables** - Virtual slot indices survive down
//!   the whole subtype chain
//! - **Compact naming** - Hot symbols get the shortest identifiers, with a
//!   shared namespace for methods, types, static fields and local ranks
//!
//! ## Quick Start
//!
//! Add `cilscript` to your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! cilscript = "0.1"
//! ```
//!
//! ### Using the Prelude
//!
//! For convenient access to the most commonly used types, import the
//! prelude. The metadata collaborator registers the decoded module in a
//! [`ModuleModel`](model::ModuleModel), then [`compile`] runs the whole
//! pipeline from the given roots:
//!
//! ```rust
//! use cilscript::prelude::*;
//!
//! let mut module = ModuleModel::new();
//! let p = *module.primitives();
//! let host = module.define_type("Program", Some(p.object), TypeFlags::empty());
//! let main = module.define_method(host, "Main", Vec::new(), p.void, MethodFlags::STATIC);
//! module.set_body(
//!     main,
//!     MethodBody {
//!         instructions: vec![Instruction::new(0, OpCode::Ret, Operand::None)],
//!         locals: Vec::new(),
//!         regions: Vec::new(),
//!     },
//! );
//!
//! let compilation = cilscript::compile(&module, &[main], &NullRules)?;
//! assert!(compilation.irs.contains_key(&main));
//! # Ok::<(), cilscript::Error>(())
//! ```
//!
//! ## Architecture
//!
//! `cilscript` is organized into four key modules:
//!
//! - [`model`] - The metadata interface: types, methods, fields and decoded
//!   instruction streams, registered by an external reader
//! - [`lower`] - Per-method lowering: block splitting, the abstract stack
//!   machine, phi merging and loop recovery
//! - [`resolve`] - Whole-program passes: closure resolution, dispatch
//!   tables and identifier assignment
//! - [`ir`] - The expression arena and statement trees everything above
//!   produces and consumes
//!
//! Rendering the resolved program to output text is the emitter's job and
//! lives outside this crate; [`Compilation`] carries everything it needs.

#[macro_use]
mod error;

pub mod ir;
pub mod lower;
pub mod model;
pub mod prelude;
pub mod resolve;

pub use error::Error;

/// `cilscript` Result type, with [`Error`] as the failure case.
pub type Result<T> = std::result::Result<T, Error>;

use std::collections::{HashMap, HashSet};

use crate::{
    ir::MethodIr,
    model::{MethodId, ModuleModel, TypeId},
    resolve::{
        ClosureResolver, DispatchTables, InterfaceTables, NameAssignment, ReachabilitySet,
        ResolverRules,
    },
};

/// The finished output of a whole-program compilation.
///
/// Everything the emitter needs: the method bodies, the usage statistics
/// they were named from, and the dispatch structure of the constructed
/// types.
#[derive(Debug)]
pub struct Compilation {
    /// Methods with materialized bodies, in discovery order. This is the
    /// emission order.
    pub methods: Vec<MethodId>,
    /// The lowered IR of each materialized method.
    pub irs: HashMap<MethodId, MethodIr>,
    /// Reference counts and discovery order for every reached symbol.
    pub reachability: ReachabilitySet,
    /// Concrete types constructed somewhere in the program, discovery order.
    pub constructed: Vec<TypeId>,
    /// Virtual dispatch tables for the constructed types.
    pub dispatch: DispatchTables,
    /// Interface slot rows for every used (type, interface) pair.
    pub interfaces: InterfaceTables,
    /// The compact identifier assignment.
    pub names: NameAssignment,
}

/// Compiles a module from the given root methods.
///
/// Runs closure resolution to its fixpoint, builds dispatch and interface
/// tables over the constructed types, and assigns identifiers from the
/// final usage counts. The result is deterministic for a given module and
/// root set.
///
/// # Errors
///
/// Propagates every lowering and resolution error; see [`Error`] for the
/// taxonomy. Any failure aborts the whole compilation.
pub fn compile(
    module: &ModuleModel,
    roots: &[MethodId],
    rules: &dyn ResolverRules,
) -> Result<Compilation> {
    let program = ClosureResolver::new(module, rules).run(roots)?;

    // Statically named roots of devirtualized calls never get a body; they
    // are counted for naming but not emitted.
    let methods: Vec<MethodId> = program
        .reachability
        .methods()
        .iter()
        .copied()
        .filter(|method| program.irs.contains_key(method))
        .collect();

    let mut rank_counts: Vec<usize> = Vec::new();
    for &method in &methods {
        let counts = resolve::local_cluster_counts(&program.irs[&method]);
        if counts.len() > rank_counts.len() {
            rank_counts.resize(counts.len(), 0);
        }
        for (rank, count) in counts.into_iter().enumerate() {
            rank_counts[rank] += count;
        }
    }

    let dispatch = DispatchTables::build(module, &program.constructed)?;

    let mut seen: HashSet<(TypeId, TypeId)> = HashSet::new();
    let mut pairs: Vec<(TypeId, TypeId)> = Vec::new();
    for &(iface, _) in &program.interface_uses {
        for &ty in &program.constructed {
            if !module.type_desc(ty)?.is_concrete() {
                continue;
            }
            if module.all_interfaces(ty).contains(&iface) && seen.insert((ty, iface)) {
                pairs.push((ty, iface));
            }
        }
    }
    let interfaces = InterfaceTables::build(module, &pairs)?;

    let names = NameAssignment::build(module, &program.reachability, &rank_counts)?;

    Ok(Compilation {
        methods,
        irs: program.irs,
        reachability: program.reachability,
        constructed: program.constructed,
        dispatch,
        interfaces,
        names,
    })
}
