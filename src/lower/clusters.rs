//! Phi-connected variable clustering.
//!
//! A phi and all of its inputs must render as the same target-language
//! variable, otherwise values would not flow across block boundaries at
//! runtime. This module unions every phi with its inputs and exposes the
//! resulting partition; the namer assigns one name per cluster.
//!
//! Clustering works on arena ids. Every SSA local is referenced by exactly
//! one arena node (the lowering machine allocates reference and local
//! together), so id-level unions are equivalent to local-level ones.

use crate::ir::expr::{ExprArena, ExprId, ExprKind};

/// Union-find partition of an arena's expressions by phi connectivity.
#[derive(Debug, Clone)]
pub struct PhiClusters {
    parent: Vec<u32>,
}

impl PhiClusters {
    /// Builds the partition for one method's arena.
    #[must_use]
    pub fn build(arena: &ExprArena) -> Self {
        let mut clusters = Self {
            parent: (0..u32::try_from(arena.len()).unwrap_or(u32::MAX)).collect(),
        };
        for id in arena.ids() {
            if let ExprKind::Phi(inputs) = arena.kind(id) {
                for &input in inputs {
                    clusters.union(id, input);
                }
            }
        }
        clusters
    }

    /// Returns the canonical representative of an expression's cluster.
    ///
    /// Representatives are stable across calls: the lowest arena id in the
    /// cluster.
    #[must_use]
    pub fn representative(&self, id: ExprId) -> ExprId {
        ExprId::new(self.root(u32::try_from(id.index()).unwrap_or(u32::MAX)))
    }

    /// Returns `true` if both expressions must share one rendered variable.
    #[must_use]
    pub fn same_cluster(&self, a: ExprId, b: ExprId) -> bool {
        self.representative(a) == self.representative(b)
    }

    fn root(&self, mut i: u32) -> u32 {
        while self.parent[i as usize] != i {
            i = self.parent[i as usize];
        }
        i
    }

    fn union(&mut self, a: ExprId, b: ExprId) {
        let ra = self.root(u32::try_from(a.index()).unwrap_or(u32::MAX));
        let rb = self.root(u32::try_from(b.index()).unwrap_or(u32::MAX));
        if ra == rb {
            return;
        }
        // Lower id wins so representatives are deterministic.
        let (keep, fold) = if ra < rb { (ra, rb) } else { (rb, ra) };
        self.parent[fold as usize] = keep;
    }
}
