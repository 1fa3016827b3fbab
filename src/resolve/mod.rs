//! Whole-program resolution: reachability, dispatch and naming.
//!
//! [`closure`] drives the generational worklist fixpoint over the root
//! methods, producing the reachable method set with per-symbol usage
//! counts. [`dispatch`] turns the constructed type set into prefix-stable
//! virtual and interface tables. [`naming`] assigns compact
//! frequency-ranked identifiers. [`rules`] is the interception point for
//! library intrinsics.

pub mod closure;
pub mod dispatch;
pub mod naming;
pub mod rules;

pub use closure::{ClosureResolver, ReachabilitySet, ResolvedProgram, MAX_RESOLVE_PASSES};
pub use dispatch::{DispatchTables, InterfaceTables};
pub use naming::{local_cluster_counts, local_rank_map, NameAssignment, NameGenerator};
pub use rules::{NullRules, ResolverRules};
