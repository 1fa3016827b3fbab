//! Structured loop recovery.
//!
//! The SSA builder leaves a back edge as a conditional whose taken arm is a
//! continuation to the node it lives in. This pass rewrites that shape into
//! a post-condition loop: the statements before the conditional become the
//! loop body, the condition survives as the `while` test and the other arm
//! becomes the continuation after the loop.
//!
//! The rewrite is deliberately conservative. It only fires when the
//! trailing conditional is the node's sole continuation site; if an
//! earlier statement also transfers control the node is left untouched and
//! the emitter renders the remaining continuations as labelled jumps.
//! Applying the pass to already-recovered IR changes nothing.

use crate::ir::{
    expr::{ExprKind, UnaryOp},
    fold,
    method::MethodIr,
    stmt::{NodeId, Stmt},
};

/// Rewrites self-referential conditional continuations into do-while loops.
pub fn recover_loops(ir: &mut MethodIr) {
    for node in 0..ir.nodes().len() {
        recover_node(ir, node);
    }
}

fn recover_node(ir: &mut MethodIr, node: NodeId) {
    let Stmt::Block(stmts) = ir.node(node).clone() else {
        return;
    };
    let Some((last, earlier)) = stmts.split_last() else {
        return;
    };
    let Stmt::If {
        condition,
        then,
        els: Some(els),
    } = last
    else {
        return;
    };

    // The back edge may sit on either arm; looping on the else arm means
    // the loop continues while the condition is false.
    let (negate, after) = match (then.as_ref(), els.as_ref()) {
        (Stmt::Continuation { target }, Stmt::Continuation { target: after })
            if *target == node =>
        {
            (false, *after)
        }
        (Stmt::Continuation { target: after }, Stmt::Continuation { target })
            if *target == node =>
        {
            (true, *after)
        }
        _ => return,
    };
    if after == node {
        return;
    }
    if earlier.iter().any(fold::contains_continuation) {
        return;
    }

    let condition = if negate {
        let ty = ir.exprs().ty(*condition);
        ir.exprs_mut().alloc(
            ExprKind::Unary {
                op: UnaryOp::Not,
                operand: *condition,
            },
            ty,
        )
    } else {
        *condition
    };
    ir.replace_node(
        node,
        Stmt::Block(vec![
            Stmt::DoWhile {
                body: Box::new(Stmt::Block(earlier.to_vec())),
                condition,
            },
            Stmt::Continuation { target: after },
        ]),
    );
}
