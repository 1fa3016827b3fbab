//! Expression IR: an arena-allocated DAG of typed abstract values.
//!
//! Expressions are allocated in an [`ExprArena`] and referenced by stable
//! [`ExprId`] indices. Shared sub-expressions are legal (the DAG shape);
//! identity comparison is index equality, which the phi-merge machinery
//! relies on when deduplicating inputs and excluding self-references.
//! Nodes carry no back-references to parents; the owning [`MethodIr`]
//! exclusively owns the arena.
//!
//! # Design Rationale
//!
//! The source design used mutable shared objects with referential identity.
//! Arena indices give the same aliasing semantics without pointer hazards:
//! rewriting a node in place (see [`ExprArena::replace`]) substitutes it at
//! every use site at once, which is exactly what inst-result substitution
//! and the call-rewrite pass need.
//!
//! [`MethodIr`]: crate::ir::MethodIr

use std::fmt;

use crate::model::{FieldId, MethodId, TypeId};

/// Stable index of an expression inside its [`ExprArena`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExprId(u32);

impl ExprId {
    /// Creates an id from a raw index.
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Returns the underlying arena index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for ExprId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// Identifier of an SSA local variable within one method.
///
/// Every value-producing instruction allocates a fresh SSA local; the
/// abstract stack only ever holds references to these (or to phis).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalId(u32);

impl LocalId {
    /// Creates an id from a raw index.
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Returns the underlying index into the method's local table.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// A literal constant value.
#[derive(Debug, Clone, PartialEq)]
pub enum Const {
    /// The null reference.
    Null,
    /// Boolean literal.
    Bool(bool),
    /// 32-bit integer literal.
    Int32(i32),
    /// 64-bit integer literal.
    Int64(i64),
    /// 64-bit float literal.
    Float64(f64),
    /// String literal.
    Str(String),
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// Logical negation.
    Not,
    /// Arithmetic negation.
    Neg,
    /// Bitwise complement.
    BitNot,
}

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// Addition.
    Add,
    /// Subtraction.
    Sub,
    /// Multiplication.
    Mul,
    /// Division.
    Div,
    /// Remainder.
    Rem,
    /// Bitwise and.
    BitAnd,
    /// Bitwise or.
    BitOr,
    /// Bitwise xor.
    BitXor,
    /// Left shift.
    Shl,
    /// Arithmetic right shift.
    Shr,
    /// Equality.
    Eq,
    /// Inequality.
    Ne,
    /// Less-than.
    Lt,
    /// Less-than-or-equal.
    Le,
    /// Greater-than.
    Gt,
    /// Greater-than-or-equal.
    Ge,
}

/// The closed set of expression variants.
///
/// Traversals match exhaustively on this enum so that adding a variant is a
/// compile error at every traversal site.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// A literal constant.
    Literal(Const),
    /// The implicit receiver of an instance method.
    This,
    /// A method argument, by declaration index (excluding the receiver).
    Arg(u16),
    /// An SSA local variable reference.
    Local(LocalId),
    /// A control-flow merge of the input values.
    ///
    /// Inputs are deduplicated by id and never contain the phi itself. A
    /// zero-input phi marks a slot that is undefined on every incoming
    /// path (e.g. an uninitialized local).
    Phi(Vec<ExprId>),
    /// Placeholder for the condition produced by a branch instruction.
    ///
    /// Exists only between lowering and the method-wide substitution pass;
    /// finished IR never contains one.
    InstResult {
        /// Stream index of the branch instruction.
        inst: usize,
    },
    /// Instance (`object = Some`) or static (`object = None`) field read.
    FieldAccess {
        /// The receiver, or `None` for a static field.
        object: Option<ExprId>,
        /// The accessed field.
        field: FieldId,
    },
    /// Address of an instance or static field.
    FieldAddress {
        /// The receiver, or `None` for a static field.
        object: Option<ExprId>,
        /// The addressed field.
        field: FieldId,
    },
    /// Array element read (or assignment target).
    ElementAccess {
        /// The array reference.
        array: ExprId,
        /// The element index.
        index: ExprId,
    },
    /// Address of an array element.
    ElementAddress {
        /// The array reference.
        array: ExprId,
        /// The element index.
        index: ExprId,
    },
    /// Address of a local variable slot.
    LocalAddress {
        /// The local slot index.
        slot: u16,
    },
    /// Address of an argument slot.
    ArgAddress {
        /// The argument slot index.
        slot: u16,
    },
    /// Length of an array.
    ArrayLength(ExprId),
    /// Unary operation.
    Unary {
        /// The operator.
        op: UnaryOp,
        /// The operand.
        operand: ExprId,
    },
    /// Binary operation.
    Binary {
        /// The operator.
        op: BinaryOp,
        /// Left operand.
        left: ExprId,
        /// Right operand.
        right: ExprId,
    },
    /// Method call.
    Call {
        /// The statically named target.
        method: MethodId,
        /// The receiver, or `None` for static targets.
        object: Option<ExprId>,
        /// Arguments in declaration order.
        args: Vec<ExprId>,
        /// `true` only when the call site requested virtual dispatch *and*
        /// the target is actually overridable.
        virtual_call: bool,
        /// Constraining type from a preceding `constrained.` prefix.
        constrained: Option<TypeId>,
    },
    /// Object construction.
    NewObj {
        /// The constructor.
        ctor: MethodId,
        /// Arguments in declaration order.
        args: Vec<ExprId>,
    },
    /// One-dimensional array allocation. The node type is the element type.
    NewArray {
        /// Number of elements.
        length: ExprId,
    },
    /// Checked cast to the node type.
    Cast {
        /// The value being cast.
        value: ExprId,
    },
    /// Type test yielding the reference or null. The node type is the
    /// tested type.
    IsInst {
        /// The value being tested.
        value: ExprId,
    },
    /// Boxing of a value type. The node type is `object`.
    Box {
        /// The boxed value.
        value: ExprId,
        /// The value type being boxed.
        value_type: TypeId,
    },
    /// Unboxing to the node type.
    Unbox {
        /// The boxed reference.
        value: ExprId,
    },
    /// Implicit numeric conversion to the node type.
    Convert {
        /// The converted value.
        value: ExprId,
    },
    /// The default value of the node type (zero / null / false).
    DefaultValue,
}

impl ExprKind {
    /// Returns `true` for address-like values.
    ///
    /// Addresses are pushed onto the abstract stack without an SSA wrapper
    /// and must never survive to a block boundary.
    #[must_use]
    pub fn is_address(&self) -> bool {
        matches!(
            self,
            Self::FieldAddress { .. }
                | Self::ElementAddress { .. }
                | Self::LocalAddress { .. }
                | Self::ArgAddress { .. }
        )
    }

    /// Returns `true` for bare variable references (locals, args, phis).
    #[must_use]
    pub fn is_variable(&self) -> bool {
        matches!(
            self,
            Self::Local(_) | Self::Arg(_) | Self::This | Self::Phi(_) | Self::InstResult { .. }
        )
    }
}

/// One typed expression node.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    /// The variant payload.
    pub kind: ExprKind,
    /// The resolved type of the value.
    pub ty: TypeId,
}

/// Arena owning every expression of one method, plus the SSA local table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExprArena {
    nodes: Vec<Expr>,
    locals: Vec<TypeId>,
}

impl ExprArena {
    /// Creates an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a new expression and returns its id.
    pub fn alloc(&mut self, kind: ExprKind, ty: TypeId) -> ExprId {
        let id = ExprId::new(u32::try_from(self.nodes.len()).unwrap_or(u32::MAX));
        self.nodes.push(Expr { kind, ty });
        id
    }

    /// Returns the expression behind an id.
    #[must_use]
    pub fn get(&self, id: ExprId) -> &Expr {
        &self.nodes[id.index()]
    }

    /// Returns the variant of an expression.
    #[must_use]
    pub fn kind(&self, id: ExprId) -> &ExprKind {
        &self.nodes[id.index()].kind
    }

    /// Returns a mutable reference to the variant of an expression.
    pub fn kind_mut(&mut self, id: ExprId) -> &mut ExprKind {
        &mut self.nodes[id.index()].kind
    }

    /// Returns the type of an expression.
    #[must_use]
    pub fn ty(&self, id: ExprId) -> TypeId {
        self.nodes[id.index()].ty
    }

    /// Rewrites a node in place, substituting it at every use site.
    pub fn replace(&mut self, id: ExprId, kind: ExprKind, ty: TypeId) {
        self.nodes[id.index()] = Expr { kind, ty };
    }

    /// Updates only the type of a node.
    pub fn set_ty(&mut self, id: ExprId, ty: TypeId) {
        self.nodes[id.index()].ty = ty;
    }

    /// Allocates a fresh SSA local of the given type.
    pub fn new_local(&mut self, ty: TypeId) -> LocalId {
        let id = LocalId::new(u32::try_from(self.locals.len()).unwrap_or(u32::MAX));
        self.locals.push(ty);
        id
    }

    /// Allocates a fresh SSA local and an expression referencing it.
    pub fn new_local_ref(&mut self, ty: TypeId) -> ExprId {
        let local = self.new_local(ty);
        self.alloc(ExprKind::Local(local), ty)
    }

    /// Returns the type of an SSA local.
    #[must_use]
    pub fn local_type(&self, local: LocalId) -> TypeId {
        self.locals[local.index()]
    }

    /// Returns the number of allocated expressions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns `true` if no expressions are allocated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns the number of SSA locals.
    #[must_use]
    pub fn local_count(&self) -> usize {
        self.locals.len()
    }

    /// Iterates over all expression ids in allocation order.
    pub fn ids(&self) -> impl Iterator<Item = ExprId> {
        (0..self.nodes.len()).map(|i| ExprId::new(u32::try_from(i).unwrap_or(u32::MAX)))
    }

    /// Invokes `f` for every direct child of `id`.
    ///
    /// The match is exhaustive; a new variant with children will not
    /// compile until it is handled here.
    pub fn for_each_child(&self, id: ExprId, mut f: impl FnMut(ExprId)) {
        match &self.nodes[id.index()].kind {
            ExprKind::Literal(_)
            | ExprKind::This
            | ExprKind::Arg(_)
            | ExprKind::Local(_)
            | ExprKind::InstResult { .. }
            | ExprKind::LocalAddress { .. }
            | ExprKind::ArgAddress { .. }
            | ExprKind::DefaultValue => {}
            ExprKind::Phi(inputs) => {
                for &input in inputs {
                    f(input);
                }
            }
            ExprKind::FieldAccess { object, .. } | ExprKind::FieldAddress { object, .. } => {
                if let Some(obj) = object {
                    f(*obj);
                }
            }
            ExprKind::ElementAccess { array, index } | ExprKind::ElementAddress { array, index } => {
                f(*array);
                f(*index);
            }
            ExprKind::ArrayLength(array) => f(*array),
            ExprKind::Unary { operand, .. } => f(*operand),
            ExprKind::Binary { left, right, .. } => {
                f(*left);
                f(*right);
            }
            ExprKind::Call { object, args, .. } => {
                if let Some(obj) = object {
                    f(*obj);
                }
                for &arg in args {
                    f(arg);
                }
            }
            ExprKind::NewObj { args, .. } => {
                for &arg in args {
                    f(arg);
                }
            }
            ExprKind::NewArray { length } => f(*length),
            ExprKind::Cast { value }
            | ExprKind::IsInst { value }
            | ExprKind::Box { value, .. }
            | ExprKind::Unbox { value }
            | ExprKind::Convert { value } => f(*value),
        }
    }
}
