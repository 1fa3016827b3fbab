//! The abstract stack machine: per-instruction lowering to statement IR.
//!
//! The machine interprets one basic block's instructions against an
//! [`EvaluationState`]. Every value-producing instruction allocates a fresh
//! SSA local, emits an assignment of the computed expression into it and
//! pushes a reference to that local; the abstract stack therefore only
//! ever holds variable references and bare address expressions. This
//! single-assignment discipline is what lets the merge machinery union
//! block entry states with plain phi nodes.
//!
//! Conditional branches do not pop into a statement of their own at the
//! call site of the block terminator. Instead the machine assigns the
//! condition into an [`ExprKind::InstResult`] placeholder keyed by the
//! branch instruction's stream index; the SSA builder references the same
//! placeholder from the block's conditional statement and a method-wide
//! pass later rewrites every placeholder into an ordinary SSA local.
//!
//! # Key Types
//! - [`StackMachine`] - One block's instruction interpreter
//! - [`EvaluationState`] - The threaded stack/local/argument state

use std::collections::HashMap;

use crate::{
    ir::expr::{BinaryOp, Const, ExprArena, ExprId, ExprKind, UnaryOp},
    ir::stmt::Stmt,
    lower::state::EvaluationState,
    model::{
        FieldId, Instruction, MethodDesc, MethodId, ModuleModel, OpCode, Operand, TypeId,
    },
    Error, Result,
};

/// Interprets the instructions of one basic block.
///
/// Borrows the method-wide expression arena and the block's evaluation
/// state; the owning SSA builder decides what to do with the statements
/// each instruction produces.
pub struct StackMachine<'a> {
    module: &'a ModuleModel,
    method: &'a MethodDesc,
    local_types: &'a [TypeId],
    exprs: &'a mut ExprArena,
    state: &'a mut EvaluationState,
    conditions: &'a mut HashMap<usize, ExprId>,
    constrained: Option<TypeId>,
    current: usize,
}

impl<'a> StackMachine<'a> {
    /// Creates a machine over one block.
    ///
    /// `conditions` collects the placeholder assigned for each conditional
    /// branch instruction, keyed by stream index; it is shared across the
    /// method so the builder can look placeholders up when assembling
    /// terminators.
    pub fn new(
        module: &'a ModuleModel,
        method: &'a MethodDesc,
        local_types: &'a [TypeId],
        exprs: &'a mut ExprArena,
        state: &'a mut EvaluationState,
        conditions: &'a mut HashMap<usize, ExprId>,
    ) -> Self {
        Self {
            module,
            method,
            local_types,
            exprs,
            state,
            conditions,
            constrained: None,
            current: 0,
        }
    }

    /// Lowers one instruction, returning the statement it produces, if any.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedOpcode`] for opcodes without a lowering
    /// rule, [`Error::StackUnderflow`] when the instruction pops an empty
    /// stack, and [`Error::Invariant`] for operand/opcode mismatches.
    pub fn process(&mut self, inst: &Instruction) -> Result<Option<Stmt>> {
        self.current = inst.index;
        match inst.opcode {
            OpCode::Nop | OpCode::Br | OpCode::Leave | OpCode::EndFinally => Ok(None),

            OpCode::LdcI4 => {
                let Operand::Int32(v) = inst.operand else {
                    return Err(self.operand_mismatch(inst));
                };
                let ty = self.module.primitives().int32;
                let value = self.exprs.alloc(ExprKind::Literal(Const::Int32(v)), ty);
                Ok(Some(self.ssa_assign(value)))
            }
            OpCode::LdcI8 => {
                let Operand::Int64(v) = inst.operand else {
                    return Err(self.operand_mismatch(inst));
                };
                let ty = self.module.primitives().int64;
                let value = self.exprs.alloc(ExprKind::Literal(Const::Int64(v)), ty);
                Ok(Some(self.ssa_assign(value)))
            }
            OpCode::LdcR8 => {
                let Operand::Float64(v) = inst.operand else {
                    return Err(self.operand_mismatch(inst));
                };
                let ty = self.module.primitives().float64;
                let value = self.exprs.alloc(ExprKind::Literal(Const::Float64(v)), ty);
                Ok(Some(self.ssa_assign(value)))
            }
            OpCode::LdStr => {
                let Operand::Str(ref s) = inst.operand else {
                    return Err(self.operand_mismatch(inst));
                };
                let ty = self.module.primitives().string;
                let value = self
                    .exprs
                    .alloc(ExprKind::Literal(Const::Str(s.clone())), ty);
                Ok(Some(self.ssa_assign(value)))
            }
            OpCode::LdNull => {
                let ty = self.module.primitives().object;
                let value = self.exprs.alloc(ExprKind::Literal(Const::Null), ty);
                Ok(Some(self.ssa_assign(value)))
            }

            OpCode::LdArg => {
                let slot = self.slot_operand(inst)?;
                let Some(&value) = self.state.args.get(usize::from(slot)) else {
                    return Err(invariant_error!(
                        "argument slot {} out of range in {}",
                        slot,
                        self.method.id
                    ));
                };
                Ok(Some(self.ssa_assign(value)))
            }
            OpCode::StArg => {
                let slot = self.slot_operand(inst)?;
                let value = self.pop()?;
                let (target, stmt) = self.fresh_assign(value);
                let Some(arg) = self.state.args.get_mut(usize::from(slot)) else {
                    return Err(invariant_error!(
                        "argument slot {} out of range in {}",
                        slot,
                        self.method.id
                    ));
                };
                *arg = target;
                Ok(Some(stmt))
            }
            OpCode::LdArga => {
                let slot = self.slot_operand(inst)?;
                let ty = self.arg_slot_type(slot)?;
                let addr = self.exprs.alloc(ExprKind::ArgAddress { slot }, ty);
                self.state.stack.push(addr);
                Ok(None)
            }

            OpCode::LdLoc => {
                let slot = self.slot_operand(inst)?;
                let value = match self.state.locals.get(usize::from(slot)) {
                    Some(Some(value)) => *value,
                    // Reading a slot before any store yields the declared
                    // type's default, matching zero-initialized locals.
                    Some(None) => {
                        let ty = self.local_slot_type(slot)?;
                        self.exprs.alloc(ExprKind::DefaultValue, ty)
                    }
                    None => {
                        return Err(invariant_error!(
                            "local slot {} out of range in {}",
                            slot,
                            self.method.id
                        ))
                    }
                };
                Ok(Some(self.ssa_assign(value)))
            }
            OpCode::StLoc => {
                let slot = self.slot_operand(inst)?;
                let value = self.pop()?;
                let (target, stmt) = self.fresh_assign(value);
                let Some(local) = self.state.locals.get_mut(usize::from(slot)) else {
                    return Err(invariant_error!(
                        "local slot {} out of range in {}",
                        slot,
                        self.method.id
                    ));
                };
                *local = Some(target);
                Ok(Some(stmt))
            }
            OpCode::LdLoca => {
                let slot = self.slot_operand(inst)?;
                let ty = self.local_slot_type(slot)?;
                let addr = self.exprs.alloc(ExprKind::LocalAddress { slot }, ty);
                self.state.stack.push(addr);
                Ok(None)
            }

            OpCode::Dup => {
                let Some(&top) = self.state.stack.last() else {
                    return Err(self.underflow());
                };
                self.state.stack.push(top);
                Ok(None)
            }
            OpCode::Pop => {
                self.pop()?;
                Ok(None)
            }

            OpCode::Add => self.binary(BinaryOp::Add, None),
            OpCode::Sub => self.binary(BinaryOp::Sub, None),
            OpCode::Mul => self.binary(BinaryOp::Mul, None),
            OpCode::Div => self.binary(BinaryOp::Div, None),
            OpCode::Rem => self.binary(BinaryOp::Rem, None),
            OpCode::And => self.binary(BinaryOp::BitAnd, None),
            OpCode::Or => self.binary(BinaryOp::BitOr, None),
            OpCode::Xor => self.binary(BinaryOp::BitXor, None),
            OpCode::Shl => self.binary(BinaryOp::Shl, None),
            OpCode::Shr => self.binary(BinaryOp::Shr, None),
            OpCode::Ceq => {
                let boolean = self.module.primitives().boolean;
                self.binary(BinaryOp::Eq, Some(boolean))
            }
            OpCode::Clt => {
                let boolean = self.module.primitives().boolean;
                self.binary(BinaryOp::Lt, Some(boolean))
            }
            OpCode::Cgt => {
                let boolean = self.module.primitives().boolean;
                self.binary(BinaryOp::Gt, Some(boolean))
            }
            OpCode::Neg => self.unary(UnaryOp::Neg),
            OpCode::Not => self.unary(UnaryOp::BitNot),

            OpCode::BrTrue => {
                let value = self.pop()?;
                let condition = self.truthiness(value, false);
                Ok(Some(self.set_condition(inst.index, condition)))
            }
            OpCode::BrFalse => {
                let value = self.pop()?;
                let condition = self.truthiness(value, true);
                Ok(Some(self.set_condition(inst.index, condition)))
            }
            OpCode::Beq => self.compare_branch(inst, BinaryOp::Eq),
            OpCode::Bne => self.compare_branch(inst, BinaryOp::Ne),
            OpCode::Blt => self.compare_branch(inst, BinaryOp::Lt),
            OpCode::Ble => self.compare_branch(inst, BinaryOp::Le),
            OpCode::Bgt => self.compare_branch(inst, BinaryOp::Gt),
            OpCode::Bge => self.compare_branch(inst, BinaryOp::Ge),

            OpCode::Call | OpCode::CallVirt => {
                let target_id = self.method_operand(inst)?;
                self.lower_call(target_id, inst.opcode == OpCode::CallVirt)
            }
            OpCode::Constrained => {
                let ty = self.type_operand(inst)?;
                self.constrained = Some(ty);
                Ok(None)
            }
            OpCode::NewObj => {
                let ctor_id = self.method_operand(inst)?;
                let ctor = self.module.method(ctor_id)?;
                let declaring = ctor.declaring_type;
                let params = ctor.params.clone();
                let args = self.pop_args(&params)?;
                let value = self
                    .exprs
                    .alloc(ExprKind::NewObj { ctor: ctor_id, args }, declaring);
                Ok(Some(self.ssa_assign(value)))
            }
            OpCode::NewArr => {
                let elem = self.type_operand(inst)?;
                let length = self.pop()?;
                let value = self.exprs.alloc(ExprKind::NewArray { length }, elem);
                Ok(Some(self.ssa_assign(value)))
            }
            OpCode::LdLen => {
                let array = self.pop()?;
                let ty = self.module.primitives().int32;
                let value = self.exprs.alloc(ExprKind::ArrayLength(array), ty);
                Ok(Some(self.ssa_assign(value)))
            }

            OpCode::LdFld => {
                let field = self.field_operand(inst)?;
                let field_type = self.module.field(field)?.field_type;
                let object = self.pop()?;
                let value = self.exprs.alloc(
                    ExprKind::FieldAccess {
                        object: Some(object),
                        field,
                    },
                    field_type,
                );
                Ok(Some(self.ssa_assign(value)))
            }
            OpCode::StFld => {
                let field = self.field_operand(inst)?;
                let field_type = self.module.field(field)?.field_type;
                let value = self.pop()?;
                let object = self.pop()?;
                let value = self.convert_if_required(value, field_type);
                let target = self.exprs.alloc(
                    ExprKind::FieldAccess {
                        object: Some(object),
                        field,
                    },
                    field_type,
                );
                Ok(Some(Stmt::Assign { target, value }))
            }
            OpCode::LdSFld => {
                let field = self.field_operand(inst)?;
                let field_type = self.module.field(field)?.field_type;
                let value = self.exprs.alloc(
                    ExprKind::FieldAccess {
                        object: None,
                        field,
                    },
                    field_type,
                );
                Ok(Some(self.ssa_assign(value)))
            }
            OpCode::StSFld => {
                let field = self.field_operand(inst)?;
                let field_type = self.module.field(field)?.field_type;
                let value = self.pop()?;
                let value = self.convert_if_required(value, field_type);
                let target = self.exprs.alloc(
                    ExprKind::FieldAccess {
                        object: None,
                        field,
                    },
                    field_type,
                );
                Ok(Some(Stmt::Assign { target, value }))
            }
            OpCode::LdFlda => {
                let field = self.field_operand(inst)?;
                let field_type = self.module.field(field)?.field_type;
                let object = self.pop()?;
                let addr = self.exprs.alloc(
                    ExprKind::FieldAddress {
                        object: Some(object),
                        field,
                    },
                    field_type,
                );
                self.state.stack.push(addr);
                Ok(None)
            }
            OpCode::LdSFlda => {
                let field = self.field_operand(inst)?;
                let field_type = self.module.field(field)?.field_type;
                let addr = self.exprs.alloc(
                    ExprKind::FieldAddress {
                        object: None,
                        field,
                    },
                    field_type,
                );
                self.state.stack.push(addr);
                Ok(None)
            }

            OpCode::LdElem => {
                let index = self.pop()?;
                let array = self.pop()?;
                let ty = self.exprs.ty(array);
                let value = self
                    .exprs
                    .alloc(ExprKind::ElementAccess { array, index }, ty);
                Ok(Some(self.ssa_assign(value)))
            }
            OpCode::StElem => {
                let value = self.pop()?;
                let index = self.pop()?;
                let array = self.pop()?;
                let ty = self.exprs.ty(array);
                let value = self.convert_if_required(value, ty);
                let target = self
                    .exprs
                    .alloc(ExprKind::ElementAccess { array, index }, ty);
                Ok(Some(Stmt::Assign { target, value }))
            }
            OpCode::LdElema => {
                let index = self.pop()?;
                let array = self.pop()?;
                let ty = self.exprs.ty(array);
                let addr = self
                    .exprs
                    .alloc(ExprKind::ElementAddress { array, index }, ty);
                self.state.stack.push(addr);
                Ok(None)
            }

            OpCode::Conv => {
                let ty = self.type_operand(inst)?;
                let value = self.pop()?;
                if self.exprs.ty(value) == ty {
                    self.state.stack.push(value);
                    return Ok(None);
                }
                let converted = self.exprs.alloc(ExprKind::Convert { value }, ty);
                Ok(Some(self.ssa_assign(converted)))
            }
            OpCode::CastClass => {
                let ty = self.type_operand(inst)?;
                let value = self.pop()?;
                let cast = self.exprs.alloc(ExprKind::Cast { value }, ty);
                Ok(Some(self.ssa_assign(cast)))
            }
            OpCode::IsInst => {
                let ty = self.type_operand(inst)?;
                let value = self.pop()?;
                let test = self.exprs.alloc(ExprKind::IsInst { value }, ty);
                Ok(Some(self.ssa_assign(test)))
            }
            OpCode::Box => {
                let value_type = self.type_operand(inst)?;
                let value = self.pop()?;
                let object = self.module.primitives().object;
                let boxed = self
                    .exprs
                    .alloc(ExprKind::Box { value, value_type }, object);
                Ok(Some(self.ssa_assign(boxed)))
            }
            OpCode::Unbox => {
                let ty = self.type_operand(inst)?;
                let value = self.pop()?;
                let unboxed = self.exprs.alloc(ExprKind::Unbox { value }, ty);
                Ok(Some(self.ssa_assign(unboxed)))
            }

            OpCode::Throw => {
                let value = self.pop()?;
                Ok(Some(Stmt::Throw(value)))
            }
            OpCode::Ret => Err(invariant_error!(
                "return instruction reached the machine in {}",
                self.method.id
            )),

            OpCode::Rethrow | OpCode::Switch => Err(Error::UnsupportedOpcode {
                opcode: inst.opcode.to_string(),
                index: inst.index,
                method: self.method.id,
            }),
        }
    }

    /// Produces the method-exit statement from the remaining stack.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Invariant`] when the stack depth does not match the
    /// method's return arity.
    pub fn finish_return(&mut self) -> Result<Stmt> {
        let void = self.module.primitives().void;
        match self.state.depth() {
            0 => {
                if self.method.return_type != void {
                    return Err(invariant_error!(
                        "empty stack at return of non-void method {}",
                        self.method.id
                    ));
                }
                Ok(Stmt::Return(None))
            }
            1 => {
                if self.method.return_type == void {
                    return Err(invariant_error!(
                        "value left on stack at return of void method {}",
                        self.method.id
                    ));
                }
                let value = self.pop()?;
                let ret = self.method.return_type;
                let value = self.convert_if_required(value, ret);
                Ok(Stmt::Return(Some(value)))
            }
            depth => Err(invariant_error!(
                "stack depth {} at return of {}",
                depth,
                self.method.id
            )),
        }
    }

    fn pop(&mut self) -> Result<ExprId> {
        self.state.stack.pop().ok_or(Error::StackUnderflow {
            index: self.current,
            method: self.method.id,
        })
    }

    /// Assigns `value` into a fresh SSA local without pushing it.
    fn fresh_assign(&mut self, value: ExprId) -> (ExprId, Stmt) {
        let ty = self.exprs.ty(value);
        let target = self.exprs.new_local_ref(ty);
        (target, Stmt::Assign { target, value })
    }

    /// Assigns `value` into a fresh SSA local and pushes the reference.
    fn ssa_assign(&mut self, value: ExprId) -> Stmt {
        let (target, stmt) = self.fresh_assign(value);
        self.state.stack.push(target);
        stmt
    }

    fn binary(&mut self, op: BinaryOp, result_type: Option<TypeId>) -> Result<Option<Stmt>> {
        let right = self.pop()?;
        let left = self.pop()?;
        let ty = result_type.unwrap_or_else(|| self.exprs.ty(left));
        let value = self.exprs.alloc(ExprKind::Binary { op, left, right }, ty);
        Ok(Some(self.ssa_assign(value)))
    }

    fn unary(&mut self, op: UnaryOp) -> Result<Option<Stmt>> {
        let operand = self.pop()?;
        let ty = self.exprs.ty(operand);
        let value = self.exprs.alloc(ExprKind::Unary { op, operand }, ty);
        Ok(Some(self.ssa_assign(value)))
    }

    fn compare_branch(&mut self, inst: &Instruction, op: BinaryOp) -> Result<Option<Stmt>> {
        let right = self.pop()?;
        let left = self.pop()?;
        let boolean = self.module.primitives().boolean;
        let condition = self
            .exprs
            .alloc(ExprKind::Binary { op, left, right }, boolean);
        Ok(Some(self.set_condition(inst.index, condition)))
    }

    /// Lowers a truthiness test on `value`.
    ///
    /// Reference-typed operands compare explicitly against null; the target
    /// language treats an empty string as false, so implicit truthiness
    /// would change behavior.
    fn truthiness(&mut self, value: ExprId, negate: bool) -> ExprId {
        let boolean = self.module.primitives().boolean;
        if self.module.is_reference(self.exprs.ty(value)) {
            let object = self.module.primitives().object;
            let null = self.exprs.alloc(ExprKind::Literal(Const::Null), object);
            let op = if negate { BinaryOp::Eq } else { BinaryOp::Ne };
            return self.exprs.alloc(
                ExprKind::Binary {
                    op,
                    left: value,
                    right: null,
                },
                boolean,
            );
        }
        if negate {
            self.exprs.alloc(
                ExprKind::Unary {
                    op: UnaryOp::Not,
                    operand: value,
                },
                boolean,
            )
        } else {
            value
        }
    }

    /// Assigns a branch condition into its placeholder.
    fn set_condition(&mut self, inst: usize, condition: ExprId) -> Stmt {
        let boolean = self.module.primitives().boolean;
        let target = self.exprs.alloc(ExprKind::InstResult { inst }, boolean);
        self.conditions.insert(inst, target);
        Stmt::Assign {
            target,
            value: condition,
        }
    }

    fn lower_call(&mut self, target_id: MethodId, virtual_site: bool) -> Result<Option<Stmt>> {
        let target = self.module.method(target_id)?;
        let params = target.params.clone();
        let declaring = target.declaring_type;
        let return_type = target.return_type;
        let has_this = target.has_this();
        let overridable = target.is_overridable();

        let args = self.pop_args(&params)?;
        let object = if has_this {
            let receiver = self.pop()?;
            Some(self.convert_if_required(receiver, declaring))
        } else {
            None
        };
        let call = self.exprs.alloc(
            ExprKind::Call {
                method: target_id,
                object,
                args,
                virtual_call: virtual_site && overridable,
                constrained: self.constrained.take(),
            },
            return_type,
        );
        if return_type == self.module.primitives().void {
            Ok(Some(Stmt::SideEffect(call)))
        } else {
            Ok(Some(self.ssa_assign(call)))
        }
    }

    /// Pops call arguments in reverse declaration order, inserting implicit
    /// conversions where the stack value's type does not match the
    /// parameter type.
    fn pop_args(&mut self, params: &[TypeId]) -> Result<Vec<ExprId>> {
        let mut args = Vec::with_capacity(params.len());
        for &want in params.iter().rev() {
            let value = self.pop()?;
            args.push(self.convert_if_required(value, want));
        }
        args.reverse();
        Ok(args)
    }

    fn convert_if_required(&mut self, value: ExprId, want: TypeId) -> ExprId {
        let have = self.exprs.ty(value);
        if have == want || self.module.is_assignable_to(have, want) {
            return value;
        }
        if self.module.is_numeric(have) && self.module.is_numeric(want) {
            self.exprs.alloc(ExprKind::Convert { value }, want)
        } else {
            self.exprs.alloc(ExprKind::Cast { value }, want)
        }
    }

    fn slot_operand(&self, inst: &Instruction) -> Result<u16> {
        match inst.operand {
            Operand::Slot(slot) => Ok(slot),
            _ => Err(self.operand_mismatch(inst)),
        }
    }

    fn type_operand(&self, inst: &Instruction) -> Result<TypeId> {
        match inst.operand {
            Operand::Type(ty) => Ok(ty),
            _ => Err(self.operand_mismatch(inst)),
        }
    }

    fn method_operand(&self, inst: &Instruction) -> Result<MethodId> {
        match inst.operand {
            Operand::Method(m) => Ok(m),
            _ => Err(self.operand_mismatch(inst)),
        }
    }

    fn field_operand(&self, inst: &Instruction) -> Result<FieldId> {
        match inst.operand {
            Operand::Field(f) => Ok(f),
            _ => Err(self.operand_mismatch(inst)),
        }
    }

    fn local_slot_type(&self, slot: u16) -> Result<TypeId> {
        self.local_types.get(usize::from(slot)).copied().ok_or_else(|| {
            invariant_error!("local slot {} out of range in {}", slot, self.method.id)
        })
    }

    fn arg_slot_type(&self, slot: u16) -> Result<TypeId> {
        let slot = usize::from(slot);
        if self.method.has_this() {
            if slot == 0 {
                return Ok(self.method.declaring_type);
            }
            return self.method.params.get(slot - 1).copied().ok_or_else(|| {
                invariant_error!("argument slot {} out of range in {}", slot, self.method.id)
            });
        }
        self.method.params.get(slot).copied().ok_or_else(|| {
            invariant_error!("argument slot {} out of range in {}", slot, self.method.id)
        })
    }

    fn operand_mismatch(&self, inst: &Instruction) -> Error {
        invariant_error!(
            "operand {:?} does not fit opcode {} at instruction {} in {}",
            inst.operand,
            inst.opcode,
            inst.index,
            self.method.id
        )
    }

    fn underflow(&self) -> Error {
        Error::StackUnderflow {
            index: self.current,
            method: self.method.id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MethodFlags, OpCode, Operand};

    fn setup() -> (ModuleModel, MethodId) {
        let mut model = ModuleModel::new();
        let p = *model.primitives();
        let host = model.define_type("Host", Some(p.object), crate::model::TypeFlags::empty());
        let m = model.define_method(host, "Run", vec![p.int32], p.int32, MethodFlags::STATIC);
        (model, m)
    }

    fn run_block(
        model: &ModuleModel,
        method: MethodId,
        local_types: &[TypeId],
        insts: &[(OpCode, Operand)],
    ) -> (ExprArena, EvaluationState, Vec<Stmt>) {
        let desc = model.method(method).unwrap().clone();
        let mut exprs = ExprArena::new();
        let mut args = Vec::new();
        for (i, &ty) in desc.params.iter().enumerate() {
            let slot = u16::try_from(i).unwrap();
            args.push(exprs.alloc(ExprKind::Arg(slot), ty));
        }
        let mut state = EvaluationState::method_entry(local_types.len(), args);
        let mut conditions = HashMap::new();
        let mut machine = StackMachine::new(
            model,
            &desc,
            local_types,
            &mut exprs,
            &mut state,
            &mut conditions,
        );
        let mut stmts = Vec::new();
        for (i, (op, operand)) in insts.iter().enumerate() {
            let inst = Instruction::new(i, *op, operand.clone());
            if let Some(stmt) = machine.process(&inst).unwrap() {
                stmts.push(stmt);
            }
        }
        (exprs, state, stmts)
    }

    #[test]
    fn test_constant_add_assigns_fresh_locals() {
        let (model, m) = setup();
        let (exprs, state, stmts) = run_block(
            &model,
            m,
            &[],
            &[
                (OpCode::LdcI4, Operand::Int32(2)),
                (OpCode::LdcI4, Operand::Int32(3)),
                (OpCode::Add, Operand::None),
            ],
        );
        // Three assignments, each into a distinct SSA local.
        assert_eq!(stmts.len(), 3);
        assert_eq!(exprs.local_count(), 3);
        assert_eq!(state.depth(), 1);

        let Stmt::Assign { value, .. } = &stmts[2] else {
            panic!("expected assignment");
        };
        let ExprKind::Binary { op, left, right } = exprs.kind(*value) else {
            panic!("expected binary add");
        };
        assert_eq!(*op, BinaryOp::Add);
        // Operands are references to the constants' SSA locals.
        assert!(exprs.kind(*left).is_variable());
        assert!(exprs.kind(*right).is_variable());
    }

    #[test]
    fn test_stack_only_holds_variables_and_addresses() {
        let (model, m) = setup();
        let (exprs, state, _) = run_block(
            &model,
            m,
            &[model.primitives().int32],
            &[
                (OpCode::LdArg, Operand::Slot(0)),
                (OpCode::LdcI4, Operand::Int32(1)),
                (OpCode::Add, Operand::None),
                (OpCode::LdLoca, Operand::Slot(0)),
            ],
        );
        assert_eq!(state.depth(), 2);
        let kinds: Vec<bool> = state
            .stack
            .iter()
            .map(|&e| exprs.kind(e).is_variable() || exprs.kind(e).is_address())
            .collect();
        assert_eq!(kinds, vec![true, true]);
    }

    #[test]
    fn test_dup_duplicates_the_reference() {
        let (model, m) = setup();
        let (_, state, _) = run_block(
            &model,
            m,
            &[],
            &[
                (OpCode::LdcI4, Operand::Int32(5)),
                (OpCode::Dup, Operand::None),
            ],
        );
        assert_eq!(state.depth(), 2);
        assert_eq!(state.stack[0], state.stack[1]);
    }

    #[test]
    fn test_undefined_local_reads_default_value() {
        let (model, m) = setup();
        let int32 = model.primitives().int32;
        let (exprs, _, stmts) = run_block(&model, m, &[int32], &[(OpCode::LdLoc, Operand::Slot(0))]);
        let Stmt::Assign { value, .. } = &stmts[0] else {
            panic!("expected assignment");
        };
        assert!(matches!(exprs.kind(*value), ExprKind::DefaultValue));
        assert_eq!(exprs.ty(*value), int32);
    }

    #[test]
    fn test_reference_brtrue_lowers_to_null_comparison() {
        let mut model = ModuleModel::new();
        let p = *model.primitives();
        let host = model.define_type("Host", Some(p.object), crate::model::TypeFlags::empty());
        let m = model.define_method(host, "Check", vec![p.string], p.void, MethodFlags::STATIC);

        let (exprs, _, stmts) = run_block(
            &model,
            m,
            &[],
            &[
                (OpCode::LdArg, Operand::Slot(0)),
                (OpCode::BrTrue, Operand::Target(0)),
            ],
        );
        let Stmt::Assign { target, value } = stmts.last().unwrap() else {
            panic!("expected condition assignment");
        };
        assert!(matches!(exprs.kind(*target), ExprKind::InstResult { inst: 1 }));
        let ExprKind::Binary { op, right, .. } = exprs.kind(*value) else {
            panic!("expected null comparison");
        };
        assert_eq!(*op, BinaryOp::Ne);
        assert!(matches!(exprs.kind(*right), ExprKind::Literal(Const::Null)));
    }

    #[test]
    fn test_integer_brfalse_negates() {
        let (model, m) = setup();
        let (exprs, _, stmts) = run_block(
            &model,
            m,
            &[],
            &[
                (OpCode::LdArg, Operand::Slot(0)),
                (OpCode::BrFalse, Operand::Target(0)),
            ],
        );
        let Stmt::Assign { value, .. } = stmts.last().unwrap() else {
            panic!("expected condition assignment");
        };
        assert!(matches!(
            exprs.kind(*value),
            ExprKind::Unary {
                op: UnaryOp::Not,
                ..
            }
        ));
    }

    #[test]
    fn test_void_call_is_side_effect() {
        let mut model = ModuleModel::new();
        let p = *model.primitives();
        let host = model.define_type("Host", Some(p.object), crate::model::TypeFlags::empty());
        let callee = model.define_method(host, "Log", vec![p.int32], p.void, MethodFlags::STATIC);
        let m = model.define_method(host, "Run", vec![p.int32], p.void, MethodFlags::STATIC);

        let (exprs, state, stmts) = run_block(
            &model,
            m,
            &[],
            &[
                (OpCode::LdArg, Operand::Slot(0)),
                (OpCode::Call, Operand::Method(callee)),
            ],
        );
        assert_eq!(state.depth(), 0);
        let Stmt::SideEffect(call) = stmts.last().unwrap() else {
            panic!("expected side-effect call");
        };
        let ExprKind::Call {
            method,
            object,
            args,
            virtual_call,
            ..
        } = exprs.kind(*call)
        else {
            panic!("expected call");
        };
        assert_eq!(*method, callee);
        assert!(object.is_none());
        assert_eq!(args.len(), 1);
        assert!(!virtual_call);
    }

    #[test]
    fn test_constrained_prefix_attaches_to_next_call() {
        let mut model = ModuleModel::new();
        let p = *model.primitives();
        let host = model.define_type("Host", Some(p.object), crate::model::TypeFlags::empty());
        let callee = model.define_method(
            host,
            "ToText",
            Vec::new(),
            p.string,
            MethodFlags::VIRTUAL | MethodFlags::NEW_SLOT,
        );
        let m = model.define_method(host, "Run", vec![host], p.string, MethodFlags::STATIC);

        let (exprs, _, stmts) = run_block(
            &model,
            m,
            &[],
            &[
                (OpCode::LdArg, Operand::Slot(0)),
                (OpCode::Constrained, Operand::Type(p.int32)),
                (OpCode::CallVirt, Operand::Method(callee)),
            ],
        );
        let Stmt::Assign { value, .. } = stmts.last().unwrap() else {
            panic!("expected call assignment");
        };
        let ExprKind::Call {
            constrained,
            virtual_call,
            ..
        } = exprs.kind(*value)
        else {
            panic!("expected call");
        };
        assert_eq!(*constrained, Some(p.int32));
        assert!(*virtual_call);
    }

    #[test]
    fn test_underflow_reports_instruction() {
        let (model, m) = setup();
        let desc = model.method(m).unwrap().clone();
        let mut exprs = ExprArena::new();
        let mut state = EvaluationState::method_entry(0, Vec::new());
        let mut conditions = HashMap::new();
        let mut machine =
            StackMachine::new(&model, &desc, &[], &mut exprs, &mut state, &mut conditions);
        let err = machine
            .process(&Instruction::new(4, OpCode::Add, Operand::None))
            .unwrap_err();
        assert!(matches!(err, Error::StackUnderflow { index: 4, .. }));
    }

    #[test]
    fn test_unsupported_opcode() {
        let (model, m) = setup();
        let desc = model.method(m).unwrap().clone();
        let mut exprs = ExprArena::new();
        let mut state = EvaluationState::method_entry(0, Vec::new());
        let mut conditions = HashMap::new();
        let mut machine =
            StackMachine::new(&model, &desc, &[], &mut exprs, &mut state, &mut conditions);
        let err = machine
            .process(&Instruction::new(0, OpCode::Switch, Operand::None))
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedOpcode { .. }));
    }

    #[test]
    fn test_return_conversion_and_balance() {
        let (model, m) = setup();
        let desc = model.method(m).unwrap().clone();
        let mut exprs = ExprArena::new();
        let mut state = EvaluationState::method_entry(0, Vec::new());
        let mut conditions = HashMap::new();
        {
            let mut machine =
                StackMachine::new(&model, &desc, &[], &mut exprs, &mut state, &mut conditions);
            machine
                .process(&Instruction::new(0, OpCode::LdcI4, Operand::Int32(1)))
                .unwrap();
            let ret = machine.finish_return().unwrap();
            assert!(matches!(ret, Stmt::Return(Some(_))));
        }
        // A second return on the now-empty stack of a non-void method is an
        // invariant violation.
        let mut machine =
            StackMachine::new(&model, &desc, &[], &mut exprs, &mut state, &mut conditions);
        assert!(machine.finish_return().is_err());
    }
}
