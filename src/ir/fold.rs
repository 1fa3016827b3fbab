//! Exhaustive traversal helpers over the statement and expression IR.
//!
//! The source design used recursive visitor classes; here traversal is a
//! handful of free functions with exhaustive matches, so the compiler
//! flags every traversal site when a new variant is added.

use crate::ir::{
    expr::{ExprArena, ExprId},
    stmt::{NodeId, Stmt},
};

/// Invokes `f` on `stmt` and every nested statement, preorder.
///
/// Continuations are not followed; they reference the node table, which
/// the caller iterates separately.
pub fn visit_stmts(stmt: &Stmt, f: &mut impl FnMut(&Stmt)) {
    f(stmt);
    match stmt {
        Stmt::Block(stmts) => {
            for s in stmts {
                visit_stmts(s, f);
            }
        }
        Stmt::If { then, els, .. } => {
            visit_stmts(then, f);
            if let Some(els) = els {
                visit_stmts(els, f);
            }
        }
        Stmt::DoWhile { body, .. } => visit_stmts(body, f),
        Stmt::Try {
            body,
            catch,
            finally,
        } => {
            visit_stmts(body, f);
            if let Some(arm) = catch {
                visit_stmts(&arm.body, f);
            }
            if let Some(fin) = finally {
                visit_stmts(fin, f);
            }
        }
        Stmt::Assign { .. }
        | Stmt::SideEffect(_)
        | Stmt::Continuation { .. }
        | Stmt::Throw(_)
        | Stmt::Return(_) => {}
    }
}

/// Invokes `f` on every expression root directly held by `stmt`.
///
/// Nested statements are not visited; combine with [`visit_stmts`] to
/// cover a whole tree.
pub fn expr_roots(stmt: &Stmt, f: &mut impl FnMut(ExprId)) {
    match stmt {
        Stmt::Assign { target, value } => {
            f(*target);
            f(*value);
        }
        Stmt::SideEffect(e) | Stmt::Throw(e) => f(*e),
        Stmt::If { condition, .. } => f(*condition),
        Stmt::DoWhile { condition, .. } => f(*condition),
        Stmt::Try { catch, .. } => {
            if let Some(arm) = catch {
                f(arm.exception_var);
            }
        }
        Stmt::Return(value) => {
            if let Some(v) = value {
                f(*v);
            }
        }
        Stmt::Block(_) | Stmt::Continuation { .. } => {}
    }
}

/// Walks the expression DAG from `root`, invoking `f` on each node not yet
/// marked in `visited`. Parents are visited before children.
pub fn walk_expr(
    arena: &ExprArena,
    root: ExprId,
    visited: &mut Vec<bool>,
    f: &mut impl FnMut(ExprId),
) {
    if visited[root.index()] {
        return;
    }
    visited[root.index()] = true;
    f(root);
    let mut children = Vec::new();
    arena.for_each_child(root, |c| children.push(c));
    for child in children {
        walk_expr(arena, child, visited, f);
    }
}

/// Collects the targets of every continuation inside `stmt`.
#[must_use]
pub fn find_continuations(stmt: &Stmt) -> Vec<NodeId> {
    let mut targets = Vec::new();
    visit_stmts(stmt, &mut |s| {
        if let Stmt::Continuation { target } = s {
            targets.push(*target);
        }
    });
    targets
}

/// Returns `true` if `stmt` contains any continuation.
#[must_use]
pub fn contains_continuation(stmt: &Stmt) -> bool {
    !find_continuations(stmt).is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::expr::{Const, ExprKind};
    use crate::model::TypeId;

    #[test]
    fn test_find_continuations() {
        let stmt = Stmt::Block(vec![
            Stmt::Continuation { target: 3 },
            Stmt::If {
                condition: ExprId::new(0),
                then: Box::new(Stmt::Continuation { target: 5 }),
                els: None,
            },
        ]);
        assert_eq!(find_continuations(&stmt), vec![3, 5]);
        assert!(contains_continuation(&stmt));
        assert!(!contains_continuation(&Stmt::empty()));
    }

    #[test]
    fn test_walk_expr_visits_shared_nodes_once() {
        let mut arena = ExprArena::new();
        let ty = TypeId::new(0);
        let shared = arena.alloc(ExprKind::Literal(Const::Int32(1)), ty);
        let phi = arena.alloc(ExprKind::Phi(vec![shared, shared]), ty);

        let mut visited = vec![false; arena.len()];
        let mut seen = Vec::new();
        walk_expr(&arena, phi, &mut visited, &mut |id| seen.push(id));
        assert_eq!(seen, vec![phi, shared]);
    }
}
