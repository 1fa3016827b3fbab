//! CIL instruction representation supplied by the metadata collaborator.
//!
//! The compiler never decodes raw bytecode itself; the external reader hands
//! it a fully decoded, immutable instruction stream per method. Branch
//! targets are expressed as instruction stream indices rather than byte
//! offsets, so the block splitter never has to map offsets back to
//! instructions.
//!
//! # Key Types
//! - [`Instruction`] - One decoded instruction: opcode, optional operand, stream index
//! - [`OpCode`] - The supported opcode set
//! - [`Operand`] - Constants, slot indices, handles and branch targets
//! - [`FlowKind`] - How an opcode affects control flow (drives block splitting)

use strum::Display;

use crate::model::token::{FieldId, MethodId, TypeId};

/// The opcodes the lowering machine understands.
///
/// This is deliberately the *normalized* instruction set: the reader is
/// expected to fold short/macro encodings (`ldc.i4.3`, `ldarg.0`, `br.s`)
/// into their canonical form with an explicit operand. An opcode outside
/// this set reaching the lowering machine is a fatal
/// [`UnsupportedOpcode`](crate::Error::UnsupportedOpcode) error.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
#[strum(serialize_all = "lowercase")]
pub enum OpCode {
    /// No operation.
    Nop,
    /// Push a 32-bit integer constant.
    LdcI4,
    /// Push a 64-bit integer constant.
    LdcI8,
    /// Push a 64-bit float constant.
    LdcR8,
    /// Push a string literal.
    LdStr,
    /// Push a null reference.
    LdNull,
    /// Push the value of an argument slot.
    LdArg,
    /// Pop into an argument slot.
    StArg,
    /// Push the address of an argument slot.
    LdArga,
    /// Push the value of a local slot.
    LdLoc,
    /// Pop into a local slot.
    StLoc,
    /// Push the address of a local slot.
    LdLoca,
    /// Duplicate the top of stack.
    Dup,
    /// Discard the top of stack.
    Pop,
    /// Binary add.
    Add,
    /// Binary subtract.
    Sub,
    /// Binary multiply.
    Mul,
    /// Binary divide.
    Div,
    /// Binary remainder.
    Rem,
    /// Bitwise and.
    And,
    /// Bitwise or.
    Or,
    /// Bitwise xor.
    Xor,
    /// Left shift.
    Shl,
    /// Arithmetic right shift.
    Shr,
    /// Arithmetic negation.
    Neg,
    /// Bitwise complement.
    Not,
    /// Compare equal, push boolean.
    Ceq,
    /// Compare less-than, push boolean.
    Clt,
    /// Compare greater-than, push boolean.
    Cgt,
    /// Unconditional branch.
    Br,
    /// Branch if top of stack is true (non-null for references).
    BrTrue,
    /// Branch if top of stack is false (null for references).
    BrFalse,
    /// Branch if equal.
    Beq,
    /// Branch if not equal.
    Bne,
    /// Branch if less-than.
    Blt,
    /// Branch if less-than-or-equal.
    Ble,
    /// Branch if greater-than.
    Bgt,
    /// Branch if greater-than-or-equal.
    Bge,
    /// Non-virtual call.
    Call,
    /// Potentially virtual call.
    CallVirt,
    /// Attach a constraining type to the next call.
    Constrained,
    /// Allocate and construct an object.
    NewObj,
    /// Allocate a one-dimensional array.
    NewArr,
    /// Push the length of an array.
    LdLen,
    /// Push an instance field value.
    LdFld,
    /// Pop into an instance field.
    StFld,
    /// Push the address of an instance field.
    LdFlda,
    /// Push a static field value.
    LdSFld,
    /// Pop into a static field.
    StSFld,
    /// Push the address of a static field.
    LdSFlda,
    /// Push an array element.
    LdElem,
    /// Pop into an array element.
    StElem,
    /// Push the address of an array element.
    LdElema,
    /// Numeric conversion to the operand type.
    Conv,
    /// Checked reference cast.
    CastClass,
    /// Type test, pushing the reference or null.
    IsInst,
    /// Box a value type.
    Box,
    /// Unbox to a value type.
    Unbox,
    /// Throw the exception on top of the stack.
    Throw,
    /// Re-throw the in-flight exception. Decoded but not yet lowered.
    Rethrow,
    /// Multi-way branch. Decoded but not yet lowered.
    Switch,
    /// Return from the method.
    Ret,
    /// Exit a protected region, branching to the target.
    Leave,
    /// Terminate a finally clause.
    EndFinally,
}

/// The operand attached to an instruction, if any.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// No operand.
    None,
    /// 32-bit integer constant.
    Int32(i32),
    /// 64-bit integer constant.
    Int64(i64),
    /// 64-bit float constant.
    Float64(f64),
    /// String literal.
    Str(String),
    /// Argument or local slot index.
    Slot(u16),
    /// Branch target as an instruction stream index.
    Target(usize),
    /// Type handle (newarr, castclass, box, conv, ...).
    Type(TypeId),
    /// Method handle (call, callvirt, newobj).
    Method(MethodId),
    /// Field handle (ldfld, stsfld, ...).
    Field(FieldId),
}

/// How an opcode affects control flow. Drives basic-block splitting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowKind {
    /// Execution continues with the next instruction.
    Next,
    /// Unconditional transfer to the operand target.
    Branch,
    /// Two-way transfer: operand target or fallthrough.
    CondBranch,
    /// Method exit.
    Return,
    /// Exception raise; no fallthrough.
    Throw,
    /// Exit of a protected region to the operand target.
    Leave,
    /// End of a finally clause; no explicit successor.
    EndFinally,
}

/// One decoded CIL instruction.
///
/// Immutable and externally supplied; the core never mutates instructions.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Position of this instruction in its owning method's stream.
    pub index: usize,
    /// The opcode.
    pub opcode: OpCode,
    /// The operand, or [`Operand::None`].
    pub operand: Operand,
}

impl Instruction {
    /// Creates a new instruction.
    #[must_use]
    pub fn new(index: usize, opcode: OpCode, operand: Operand) -> Self {
        Self {
            index,
            opcode,
            operand,
        }
    }

    /// Returns how this instruction affects control flow.
    #[must_use]
    pub fn flow(&self) -> FlowKind {
        match self.opcode {
            OpCode::Br => FlowKind::Branch,
            OpCode::BrTrue
            | OpCode::BrFalse
            | OpCode::Beq
            | OpCode::Bne
            | OpCode::Blt
            | OpCode::Ble
            | OpCode::Bgt
            | OpCode::Bge => FlowKind::CondBranch,
            OpCode::Ret => FlowKind::Return,
            OpCode::Throw => FlowKind::Throw,
            OpCode::Leave => FlowKind::Leave,
            OpCode::EndFinally => FlowKind::EndFinally,
            _ => FlowKind::Next,
        }
    }

    /// Returns the branch target if this instruction carries one.
    #[must_use]
    pub fn branch_target(&self) -> Option<usize> {
        match self.operand {
            Operand::Target(t) => Some(t),
            _ => None,
        }
    }

    /// Returns `true` if this instruction is a conditional branch.
    #[must_use]
    pub fn is_conditional_branch(&self) -> bool {
        self.flow() == FlowKind::CondBranch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flow_classification() {
        let br = Instruction::new(0, OpCode::Br, Operand::Target(3));
        assert_eq!(br.flow(), FlowKind::Branch);
        assert_eq!(br.branch_target(), Some(3));

        let beq = Instruction::new(1, OpCode::Beq, Operand::Target(5));
        assert_eq!(beq.flow(), FlowKind::CondBranch);
        assert!(beq.is_conditional_branch());

        let add = Instruction::new(2, OpCode::Add, Operand::None);
        assert_eq!(add.flow(), FlowKind::Next);
        assert_eq!(add.branch_target(), None);

        let ret = Instruction::new(3, OpCode::Ret, Operand::None);
        assert_eq!(ret.flow(), FlowKind::Return);
    }

    #[test]
    fn test_opcode_mnemonic() {
        assert_eq!(OpCode::CallVirt.to_string(), "callvirt");
        assert_eq!(OpCode::LdcI4.to_string(), "ldci4");
    }
}
