//! SSA construction over the block graph.
//!
//! The builder drives the [`StackMachine`] across all reachable blocks in
//! depth-first order. Block entry states are merged through phi expressions
//! allocated in the method's arena: the first edge into a block creates a
//! one-input phi per slot (a zero-input phi for undefined locals), every
//! later edge appends inputs to the same arena nodes in place. Because the
//! lowered code references those phis by id, late-arriving inputs become
//! visible without re-lowering anything.
//!
//! Exception regions are seeded rather than edged: when a try-entry block
//! gets its entry state, the catch handler is seeded with a stack holding
//! only the caught exception variable and the finally handler with an
//! empty stack, both inheriting the try entry's locals and arguments.
//!
//! The finished node table holds one statement per basic block plus one
//! synthetic try node per exception region; continuations into a protected
//! entry are redirected to the region's try node, innermost regions first,
//! so nesting falls out of redirect ordering.

use std::collections::HashMap;

use crate::{
    ir::{
        expr::{ExprArena, ExprId, ExprKind},
        method::MethodIr,
        stmt::{CatchArm, NodeId, Stmt},
    },
    lower::{
        blocks::{BlockId, MethodStructure, Terminator},
        machine::StackMachine,
        state::{BlockEntryInfo, EvaluationState},
    },
    model::{MethodBody, MethodDesc, ModuleModel, OpCode},
    Error, Result,
};

/// Builds the SSA statement IR of one method from its block structure.
pub struct SsaBuilder<'a> {
    module: &'a ModuleModel,
    method: &'a MethodDesc,
    body: &'a MethodBody,
    structure: &'a MethodStructure,
    exprs: ExprArena,
    entry: Vec<Option<BlockEntryInfo>>,
    lowered: Vec<Option<Vec<Stmt>>>,
    conditions: HashMap<usize, ExprId>,
    worklist: Vec<BlockId>,
    region_vars: Vec<Option<ExprId>>,
}

impl<'a> SsaBuilder<'a> {
    /// Creates a builder over one method's blocks.
    #[must_use]
    pub fn new(
        module: &'a ModuleModel,
        method: &'a MethodDesc,
        body: &'a MethodBody,
        structure: &'a MethodStructure,
    ) -> Self {
        let n = structure.blocks.len();
        Self {
            module,
            method,
            body,
            structure,
            exprs: ExprArena::new(),
            entry: vec![None; n],
            lowered: vec![None; n],
            conditions: HashMap::new(),
            worklist: Vec::new(),
            region_vars: vec![None; structure.regions.len()],
        }
    }

    /// Runs the builder to completion.
    ///
    /// # Errors
    ///
    /// Propagates machine errors plus [`Error::MissingEntryState`] for a
    /// queued block without seeded state and [`Error::Invariant`] when
    /// predecessors disagree on stack depth or an address value survives to
    /// a block boundary.
    pub fn build(mut self) -> Result<MethodIr> {
        let mut args = Vec::new();
        if self.method.has_this() {
            args.push(self.exprs.alloc(ExprKind::This, self.method.declaring_type));
        }
        for (i, &ty) in self.method.params.iter().enumerate() {
            let slot = u16::try_from(i).unwrap_or(u16::MAX);
            args.push(self.exprs.alloc(ExprKind::Arg(slot), ty));
        }
        let entry_state = EvaluationState::method_entry(self.body.locals.len(), args);
        self.create_or_merge(self.structure.entry(), &entry_state)?;

        while let Some(block) = self.worklist.pop() {
            if self.lowered[block].is_some() {
                continue;
            }
            self.lower_block(block)?;
        }

        let block_count = self.structure.blocks.len();
        let mut nodes: Vec<Stmt> = (0..block_count)
            .map(|b| match self.lowered[b].take() {
                Some(stmts) => Stmt::Block(stmts),
                None => Stmt::empty(),
            })
            .collect();

        // Innermost regions first, so an outer try body's continuation into
        // a shared entry block resolves to the inner try node.
        let mut order: Vec<usize> = (0..self.structure.regions.len()).collect();
        order.sort_by_key(|&i| {
            let r = &self.body.regions[i].try_range;
            r.end - r.start
        });
        let mut redirect: HashMap<NodeId, NodeId> = HashMap::new();
        for i in order {
            let region = self.structure.regions[i].clone();
            if self.entry[region.try_entry].is_none() {
                continue;
            }
            let target = |map: &HashMap<NodeId, NodeId>, block: BlockId| -> NodeId {
                map.get(&block).copied().unwrap_or(block)
            };
            let catch = match region.catch {
                Some((exception_type, handler)) => {
                    self.region_vars[i].map(|exception_var| CatchArm {
                        exception_var,
                        exception_type,
                        body: Box::new(Stmt::Continuation {
                            target: target(&redirect, handler),
                        }),
                    })
                }
                None => None,
            };
            let finally = region.finally_entry.map(|handler| {
                Box::new(Stmt::Continuation {
                    target: target(&redirect, handler),
                })
            });
            let stmt = Stmt::Try {
                body: Box::new(Stmt::Continuation {
                    target: target(&redirect, region.try_entry),
                }),
                catch,
                finally,
            };
            nodes.push(stmt);
            redirect.insert(region.try_entry, nodes.len() - 1);
        }
        for node in nodes.iter_mut().take(block_count) {
            redirect_continuations(node, &redirect);
        }
        let entry = redirect
            .get(&self.structure.entry())
            .copied()
            .unwrap_or_else(|| self.structure.entry());

        self.substitute_inst_results();

        Ok(MethodIr::new(self.method.id, self.exprs, nodes, entry))
    }

    fn lower_block(&mut self, block: BlockId) -> Result<()> {
        let info = self.entry[block]
            .as_ref()
            .ok_or(Error::MissingEntryState {
                block,
                method: self.method.id,
            })?;
        let mut state = EvaluationState::from_entry(info);
        let range = self.structure.blocks[block].range.clone();
        let terminator = self.structure.blocks[block].terminator;

        let mut stmts = Vec::new();
        {
            let mut machine = StackMachine::new(
                self.module,
                self.method,
                &self.body.locals,
                &mut self.exprs,
                &mut state,
                &mut self.conditions,
            );
            for inst in &self.body.instructions[range] {
                if inst.opcode == OpCode::Ret {
                    break;
                }
                if let Some(stmt) = machine.process(inst)? {
                    stmts.push(stmt);
                }
            }
            if terminator == Terminator::Return {
                stmts.push(machine.finish_return()?);
            }
        }

        match terminator {
            Terminator::FallThrough(next) | Terminator::Branch(next) => {
                self.flow_into(next, &state)?;
                stmts.push(Stmt::Continuation { target: next });
            }
            Terminator::Leave(next) => {
                // leave empties the evaluation stack on exit from a
                // protected region.
                state.stack.clear();
                self.flow_into(next, &state)?;
                stmts.push(Stmt::Continuation { target: next });
            }
            Terminator::CondBranch { inst, target, fall } => {
                let condition = *self.conditions.get(&inst).ok_or_else(|| {
                    invariant_error!(
                        "no condition recorded for branch at instruction {} in {}",
                        inst,
                        self.method.id
                    )
                })?;
                self.flow_into(target, &state)?;
                self.flow_into(fall, &state)?;
                stmts.push(Stmt::If {
                    condition,
                    then: Box::new(Stmt::Continuation { target }),
                    els: Some(Box::new(Stmt::Continuation { target: fall })),
                });
            }
            Terminator::Return | Terminator::Throw | Terminator::EndFinally => {}
        }

        self.lowered[block] = Some(stmts);
        Ok(())
    }

    /// Merges a block's exit state into a successor's entry.
    fn flow_into(&mut self, successor: BlockId, state: &EvaluationState) -> Result<()> {
        for &value in &state.stack {
            if self.exprs.kind(value).is_address() {
                return Err(invariant_error!(
                    "address value crosses a block boundary into block {} in {}",
                    successor,
                    self.method.id
                ));
            }
        }
        self.create_or_merge(successor, state)
    }

    fn create_or_merge(&mut self, block: BlockId, state: &EvaluationState) -> Result<()> {
        if self.entry[block].is_none() {
            let stack = state
                .stack
                .iter()
                .map(|&v| self.wrap_phi(v))
                .collect();
            let locals = state
                .locals
                .iter()
                .enumerate()
                .map(|(slot, v)| match v {
                    Some(v) => self.wrap_phi(*v),
                    None => self
                        .exprs
                        .alloc(ExprKind::Phi(Vec::new()), self.body.locals[slot]),
                })
                .collect();
            let args = state.args.iter().map(|&v| self.wrap_phi(v)).collect();
            self.entry[block] = Some(BlockEntryInfo {
                stack,
                locals,
                args,
            });
            self.worklist.push(block);
            self.seed_regions(block)?;
            return Ok(());
        }

        let info = self.entry[block].clone().unwrap_or_else(|| unreachable!());
        if info.stack.len() != state.stack.len() {
            return Err(invariant_error!(
                "predecessors disagree on stack depth ({} vs {}) at block {} in {}",
                info.stack.len(),
                state.stack.len(),
                block,
                self.method.id
            ));
        }
        for (&phi, &incoming) in info.stack.iter().zip(&state.stack) {
            self.add_phi_input(phi, incoming)?;
        }
        for (&phi, incoming) in info.locals.iter().zip(&state.locals) {
            if let Some(incoming) = incoming {
                self.add_phi_input(phi, *incoming)?;
            }
        }
        for (&phi, &incoming) in info.args.iter().zip(&state.args) {
            self.add_phi_input(phi, incoming)?;
        }
        Ok(())
    }

    fn wrap_phi(&mut self, value: ExprId) -> ExprId {
        let ty = self.exprs.ty(value);
        self.exprs.alloc(ExprKind::Phi(vec![value]), ty)
    }

    /// Appends an input to an existing phi, flattening nested phis,
    /// deduplicating and excluding self-references.
    fn add_phi_input(&mut self, phi: ExprId, incoming: ExprId) -> Result<()> {
        let additions = match self.exprs.kind(incoming) {
            ExprKind::Phi(inputs) => inputs.clone(),
            _ => vec![incoming],
        };
        let ExprKind::Phi(inputs) = self.exprs.kind_mut(phi) else {
            return Err(invariant_error!(
                "entry slot of a block in {} is not a phi",
                self.method.id
            ));
        };
        for addition in additions {
            if addition != phi && !inputs.contains(&addition) {
                inputs.push(addition);
            }
        }
        Ok(())
    }

    /// Seeds the handler entries of every region whose protected range
    /// starts at `block`.
    fn seed_regions(&mut self, block: BlockId) -> Result<()> {
        let region_indices: Vec<usize> = self
            .structure
            .regions
            .iter()
            .enumerate()
            .filter(|(_, r)| r.try_entry == block)
            .map(|(i, _)| i)
            .collect();
        for i in region_indices {
            let region = self.structure.regions[i].clone();
            let Some(base) = self.entry[block].clone() else {
                continue;
            };
            if let Some((exception_type, handler)) = region.catch {
                if self.entry[handler].is_none() {
                    let exception_var = self.exprs.new_local_ref(exception_type);
                    self.region_vars[i] = Some(exception_var);
                    let state = EvaluationState {
                        stack: vec![exception_var],
                        locals: base.locals.iter().copied().map(Some).collect(),
                        args: base.args.clone(),
                    };
                    self.create_or_merge(handler, &state)?;
                }
            }
            if let Some(handler) = region.finally_entry {
                if self.entry[handler].is_none() {
                    let state = EvaluationState {
                        stack: Vec::new(),
                        locals: base.locals.iter().copied().map(Some).collect(),
                        args: base.args.clone(),
                    };
                    self.create_or_merge(handler, &state)?;
                }
            }
        }
        Ok(())
    }

    /// Rewrites every remaining branch-condition placeholder into an
    /// ordinary SSA local. The assignment emitted by the machine and the
    /// conditional referencing the placeholder share the arena node, so
    /// both observe the rewrite.
    fn substitute_inst_results(&mut self) {
        let boolean = self.module.primitives().boolean;
        let ids: Vec<ExprId> = self.exprs.ids().collect();
        for id in ids {
            if matches!(self.exprs.kind(id), ExprKind::InstResult { .. }) {
                let local = self.exprs.new_local(boolean);
                self.exprs.replace(id, ExprKind::Local(local), boolean);
            }
        }
    }
}

/// Rewrites continuation targets per the try-node redirect map.
fn redirect_continuations(stmt: &mut Stmt, map: &HashMap<NodeId, NodeId>) {
    match stmt {
        Stmt::Continuation { target } => {
            if let Some(&redirected) = map.get(target) {
                *target = redirected;
            }
        }
        Stmt::Block(stmts) => {
            for s in stmts {
                redirect_continuations(s, map);
            }
        }
        Stmt::If { then, els, .. } => {
            redirect_continuations(then, map);
            if let Some(els) = els {
                redirect_continuations(els, map);
            }
        }
        Stmt::DoWhile { body, .. } => redirect_continuations(body, map),
        Stmt::Try {
            body,
            catch,
            finally,
        } => {
            redirect_continuations(body, map);
            if let Some(arm) = catch {
                redirect_continuations(&mut arm.body, map);
            }
            if let Some(fin) = finally {
                redirect_continuations(fin, map);
            }
        }
        Stmt::Assign { .. }
        | Stmt::SideEffect(_)
        | Stmt::Throw(_)
        | Stmt::Return(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lower::blocks::split_blocks;
    use crate::model::{
        CatchClause, ExceptionRegion, Instruction, MethodFlags, ModuleModel, Operand, TypeFlags,
        TypeId,
    };

    fn build(
        model: &ModuleModel,
        method: crate::model::MethodId,
        locals: Vec<TypeId>,
        insts: Vec<(OpCode, Operand)>,
        regions: Vec<ExceptionRegion>,
    ) -> MethodIr {
        let body = MethodBody {
            instructions: insts
                .into_iter()
                .enumerate()
                .map(|(i, (op, operand))| Instruction::new(i, op, operand))
                .collect(),
            locals,
            regions,
        };
        let desc = model.method(method).unwrap().clone();
        let structure = split_blocks(method, &body).unwrap();
        SsaBuilder::new(model, &desc, &body, &structure)
            .build()
            .unwrap()
    }

    fn int_method(model: &mut ModuleModel) -> crate::model::MethodId {
        let p = *model.primitives();
        let host = model.define_type("Host", Some(p.object), TypeFlags::empty());
        model.define_method(host, "Run", vec![p.int32], p.int32, MethodFlags::STATIC)
    }

    #[test]
    fn test_diamond_merge_creates_single_phi() {
        let mut model = ModuleModel::new();
        let m = int_method(&mut model);
        let int32 = model.primitives().int32;
        // if (arg0) local0 = 1 else local0 = 2; return local0
        let ir = build(
            &model,
            m,
            vec![int32],
            vec![
                (OpCode::LdArg, Operand::Slot(0)),
                (OpCode::BrFalse, Operand::Target(5)),
                (OpCode::LdcI4, Operand::Int32(1)),
                (OpCode::StLoc, Operand::Slot(0)),
                (OpCode::Br, Operand::Target(7)),
                (OpCode::LdcI4, Operand::Int32(2)),
                (OpCode::StLoc, Operand::Slot(0)),
                (OpCode::LdLoc, Operand::Slot(0)),
                (OpCode::Ret, Operand::None),
            ],
            Vec::new(),
        );
        // The merge block reads local 0 through a two-input phi.
        let Stmt::Block(stmts) = ir.node(3) else {
            panic!("expected block");
        };
        let Stmt::Assign { value, .. } = &stmts[0] else {
            panic!("expected ldloc assignment");
        };
        let ExprKind::Phi(inputs) = ir.exprs().kind(*value) else {
            panic!("expected phi, got {:?}", ir.exprs().kind(*value));
        };
        assert_eq!(inputs.len(), 2);
    }

    #[test]
    fn test_loop_back_edge_grows_phi_in_place() {
        let mut model = ModuleModel::new();
        let m = int_method(&mut model);
        let int32 = model.primitives().int32;
        // local0 = 0; do { local0 = local0 + 1 } while (local0 < 10); ret
        let ir = build(
            &model,
            m,
            vec![int32],
            vec![
                (OpCode::LdcI4, Operand::Int32(0)),
                (OpCode::StLoc, Operand::Slot(0)),
                (OpCode::LdLoc, Operand::Slot(0)),
                (OpCode::LdcI4, Operand::Int32(1)),
                (OpCode::Add, Operand::None),
                (OpCode::StLoc, Operand::Slot(0)),
                (OpCode::LdLoc, Operand::Slot(0)),
                (OpCode::LdcI4, Operand::Int32(10)),
                (OpCode::Blt, Operand::Target(2)),
                (OpCode::LdLoc, Operand::Slot(0)),
                (OpCode::Ret, Operand::None),
            ],
            Vec::new(),
        );
        // The loop head's first ldloc reads a phi that gained the back-edge
        // input after the block was lowered.
        let Stmt::Block(stmts) = ir.node(1) else {
            panic!("expected block");
        };
        let Stmt::Assign { value, .. } = &stmts[0] else {
            panic!("expected ldloc assignment");
        };
        let ExprKind::Phi(inputs) = ir.exprs().kind(*value) else {
            panic!("expected phi");
        };
        assert_eq!(inputs.len(), 2);
    }

    #[test]
    fn test_no_placeholders_survive() {
        let mut model = ModuleModel::new();
        let m = int_method(&mut model);
        let ir = build(
            &model,
            m,
            Vec::new(),
            vec![
                (OpCode::LdArg, Operand::Slot(0)),
                (OpCode::BrTrue, Operand::Target(4)),
                (OpCode::LdArg, Operand::Slot(0)),
                (OpCode::Ret, Operand::None),
                (OpCode::LdArg, Operand::Slot(0)),
                (OpCode::Ret, Operand::None),
            ],
            Vec::new(),
        );
        for id in ir.exprs().ids() {
            assert!(
                !matches!(ir.exprs().kind(id), ExprKind::InstResult { .. }),
                "placeholder survived at {id:?}"
            );
        }
    }

    #[test]
    fn test_try_catch_seeds_handler_with_exception_var() {
        let mut model = ModuleModel::new();
        let p = *model.primitives();
        let host = model.define_type("Host", Some(p.object), TypeFlags::empty());
        let m = model.define_method(host, "Guarded", Vec::new(), p.void, MethodFlags::STATIC);
        let ir = build(
            &model,
            m,
            Vec::new(),
            vec![
                (OpCode::Nop, Operand::None),
                (OpCode::Nop, Operand::None),
                (OpCode::Leave, Operand::Target(5)),
                (OpCode::Pop, Operand::None),
                (OpCode::Leave, Operand::Target(5)),
                (OpCode::Ret, Operand::None),
            ],
            vec![ExceptionRegion {
                try_range: 1..3,
                catch: Some(CatchClause {
                    exception_type: p.object,
                    range: 3..5,
                }),
                finally: None,
            }],
        );
        // Four block nodes plus the synthetic try node.
        assert_eq!(ir.nodes().len(), 5);
        let Stmt::Try { body, catch, finally } = ir.node(4) else {
            panic!("expected try node, got {:?}", ir.node(4));
        };
        assert_eq!(**body, Stmt::Continuation { target: 1 });
        assert!(finally.is_none());
        let arm = catch.as_ref().expect("catch arm");
        assert_eq!(arm.exception_type, p.object);
        assert_eq!(*arm.body, Stmt::Continuation { target: 2 });
        // The entry block's continuation into the protected range was
        // redirected to the try node.
        let Stmt::Block(stmts) = ir.node(0) else {
            panic!("expected block");
        };
        assert_eq!(*stmts.last().unwrap(), Stmt::Continuation { target: 4 });
    }

    #[test]
    fn test_try_finally_seeds_handler_with_ambient_locals() {
        let mut model = ModuleModel::new();
        let p = *model.primitives();
        let host = model.define_type("Host", Some(p.object), TypeFlags::empty());
        let m = model.define_method(host, "Guarded", Vec::new(), p.void, MethodFlags::STATIC);
        let ir = build(
            &model,
            m,
            vec![p.int32],
            vec![
                (OpCode::LdcI4, Operand::Int32(3)),
                (OpCode::StLoc, Operand::Slot(0)),
                (OpCode::Nop, Operand::None),
                (OpCode::Leave, Operand::Target(7)),
                (OpCode::LdLoc, Operand::Slot(0)),
                (OpCode::Pop, Operand::None),
                (OpCode::EndFinally, Operand::None),
                (OpCode::Ret, Operand::None),
            ],
            vec![ExceptionRegion {
                try_range: 2..4,
                catch: None,
                finally: Some(4..7),
            }],
        );
        // Four block nodes plus the synthetic try node.
        assert_eq!(ir.nodes().len(), 5);
        let Stmt::Try { body, catch, finally } = ir.node(4) else {
            panic!("expected try node, got {:?}", ir.node(4));
        };
        assert_eq!(**body, Stmt::Continuation { target: 1 });
        assert!(catch.is_none());
        assert_eq!(
            finally.as_deref(),
            Some(&Stmt::Continuation { target: 2 })
        );
        // The handler reads the local defined before the region through
        // the inherited phi snapshot.
        let Stmt::Block(stmts) = ir.node(2) else {
            panic!("expected finally block");
        };
        let Stmt::Assign { value, .. } = &stmts[0] else {
            panic!("expected ldloc assignment");
        };
        let ExprKind::Phi(inputs) = ir.exprs().kind(*value) else {
            panic!("expected phi");
        };
        assert_eq!(inputs.len(), 1);
    }

    #[test]
    fn test_finally_entry_stack_is_empty() {
        let mut model = ModuleModel::new();
        let p = *model.primitives();
        let host = model.define_type("Host", Some(p.object), TypeFlags::empty());
        let m = model.define_method(host, "Guarded", Vec::new(), p.void, MethodFlags::STATIC);
        let body = MethodBody {
            instructions: vec![
                (OpCode::LdcI4, Operand::Int32(9)),
                (OpCode::Nop, Operand::None),
                (OpCode::Leave, Operand::Target(5)),
                (OpCode::Pop, Operand::None),
                (OpCode::EndFinally, Operand::None),
                (OpCode::Ret, Operand::None),
            ]
            .into_iter()
            .enumerate()
            .map(|(i, (op, operand))| Instruction::new(i, op, operand))
            .collect(),
            locals: Vec::new(),
            regions: vec![ExceptionRegion {
                try_range: 1..3,
                catch: None,
                finally: Some(3..5),
            }],
        };
        let desc = model.method(m).unwrap().clone();
        let structure = split_blocks(m, &body).unwrap();
        // The value live at the region entry is not inherited by the
        // handler, so its leading pop underflows.
        let err = SsaBuilder::new(&model, &desc, &body, &structure)
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::StackUnderflow { .. }), "got {err}");
    }

    #[test]
    fn test_leave_discards_evaluation_stack() {
        let mut model = ModuleModel::new();
        let p = *model.primitives();
        let host = model.define_type("Host", Some(p.object), TypeFlags::empty());
        let m = model.define_method(host, "Exit", Vec::new(), p.void, MethodFlags::STATIC);
        let ir = build(
            &model,
            m,
            Vec::new(),
            vec![
                (OpCode::LdcI4, Operand::Int32(1)),
                (OpCode::Leave, Operand::Target(2)),
                (OpCode::Ret, Operand::None),
            ],
            Vec::new(),
        );
        // The target block starts with an empty stack and returns cleanly.
        let Stmt::Block(stmts) = ir.node(1) else {
            panic!("expected block");
        };
        assert_eq!(stmts.as_slice(), &[Stmt::Return(None)]);
    }

    #[test]
    fn test_conditional_block_ends_in_two_way_continuation() {
        let mut model = ModuleModel::new();
        let m = int_method(&mut model);
        let ir = build(
            &model,
            m,
            Vec::new(),
            vec![
                (OpCode::LdArg, Operand::Slot(0)),
                (OpCode::BrTrue, Operand::Target(4)),
                (OpCode::LdArg, Operand::Slot(0)),
                (OpCode::Ret, Operand::None),
                (OpCode::LdArg, Operand::Slot(0)),
                (OpCode::Ret, Operand::None),
            ],
            Vec::new(),
        );
        let Stmt::Block(stmts) = ir.node(0) else {
            panic!("expected block");
        };
        let Stmt::If { then, els, .. } = stmts.last().unwrap() else {
            panic!("expected conditional terminator");
        };
        assert_eq!(**then, Stmt::Continuation { target: 2 });
        assert_eq!(*els.as_ref().unwrap().as_ref(), Stmt::Continuation { target: 1 });
    }
}
