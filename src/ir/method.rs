//! Per-method IR container.
//!
//! A [`MethodIr`] owns the expression arena and the statement node table of
//! one lowered method. The node table is indexed by [`NodeId`]: ids below
//! the block count hold basic-block bodies, higher ids hold synthetic
//! nodes (try statements). Continuations reference nodes by id, so
//! rewriting a node (as loop recovery does) substitutes it for every
//! continuation targeting it.

use crate::ir::{
    expr::{ExprArena, ExprId},
    fold,
    stmt::{NodeId, Stmt},
};
use crate::model::MethodId;

/// The complete IR of one lowered method.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodIr {
    method: MethodId,
    exprs: ExprArena,
    nodes: Vec<Stmt>,
    entry: NodeId,
}

impl MethodIr {
    /// Creates a method IR from its parts.
    #[must_use]
    pub fn new(method: MethodId, exprs: ExprArena, nodes: Vec<Stmt>, entry: NodeId) -> Self {
        Self {
            method,
            exprs,
            nodes,
            entry,
        }
    }

    /// Returns the lowered method's handle.
    #[must_use]
    pub fn method(&self) -> MethodId {
        self.method
    }

    /// Returns the expression arena.
    #[must_use]
    pub fn exprs(&self) -> &ExprArena {
        &self.exprs
    }

    /// Returns the expression arena mutably.
    pub fn exprs_mut(&mut self) -> &mut ExprArena {
        &mut self.exprs
    }

    /// Returns the entry node id.
    #[must_use]
    pub fn entry(&self) -> NodeId {
        self.entry
    }

    /// Returns the statement stored at a node.
    #[must_use]
    pub fn node(&self, id: NodeId) -> &Stmt {
        &self.nodes[id]
    }

    /// Returns all nodes in id order.
    #[must_use]
    pub fn nodes(&self) -> &[Stmt] {
        &self.nodes
    }

    /// Replaces the statement stored at a node.
    ///
    /// Every continuation targeting `id` observes the new statement.
    pub fn replace_node(&mut self, id: NodeId, stmt: Stmt) {
        self.nodes[id] = stmt;
    }

    /// Appends a synthetic node and returns its id.
    pub fn push_node(&mut self, stmt: Stmt) -> NodeId {
        self.nodes.push(stmt);
        self.nodes.len() - 1
    }

    /// Invokes `f` on every statement of every node, preorder.
    pub fn for_each_stmt(&self, mut f: impl FnMut(&Stmt)) {
        for node in &self.nodes {
            fold::visit_stmts(node, &mut f);
        }
    }

    /// Invokes `f` on every expression reachable from any node, visiting
    /// each arena node at most once.
    pub fn for_each_expr(&self, mut f: impl FnMut(ExprId)) {
        let mut visited = vec![false; self.exprs.len()];
        for node in &self.nodes {
            fold::visit_stmts(node, &mut |stmt| {
                fold::expr_roots(stmt, &mut |root| {
                    fold::walk_expr(&self.exprs, root, &mut visited, &mut f);
                });
            });
        }
    }
}
