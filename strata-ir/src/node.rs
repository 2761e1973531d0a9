use smallvec::SmallVec;
use strata_utils::{GetName, Id};

use crate::types::{Type, Value};
use crate::impl_index;

/// Typed index of a node within its enclosing [`FunctionBase`]
/// (crate::FunctionBase). Ids are stable for the node's lifetime and are
/// never reused.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct NodeId(u32);
impl_index!(NodeId);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "n{}", self.0)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    And,
    Or,
    Xor,
    Shll,
    Shrl,
    Shra,
    Eq,
    Ne,
    ULt,
    ULe,
    UGt,
    UGe,
}

impl BinaryOp {
    pub fn mnemonic(&self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Xor => "xor",
            BinaryOp::Shll => "shll",
            BinaryOp::Shrl => "shrl",
            BinaryOp::Shra => "shra",
            BinaryOp::Eq => "eq",
            BinaryOp::Ne => "ne",
            BinaryOp::ULt => "ult",
            BinaryOp::ULe => "ule",
            BinaryOp::UGt => "ugt",
            BinaryOp::UGe => "uge",
        }
    }

    /// Comparisons produce a single bit; everything else preserves the
    /// operand type.
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::Ne
                | BinaryOp::ULt
                | BinaryOp::ULe
                | BinaryOp::UGt
                | BinaryOp::UGe
        )
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum UnaryOp {
    Not,
    Neg,
    AndReduce,
    OrReduce,
    XorReduce,
}

impl UnaryOp {
    pub fn mnemonic(&self) -> &'static str {
        match self {
            UnaryOp::Not => "not",
            UnaryOp::Neg => "neg",
            UnaryOp::AndReduce => "and_reduce",
            UnaryOp::OrReduce => "or_reduce",
            UnaryOp::XorReduce => "xor_reduce",
        }
    }

    pub fn is_reduction(&self) -> bool {
        matches!(
            self,
            UnaryOp::AndReduce | UnaryOp::OrReduce | UnaryOp::XorReduce
        )
    }
}

/// The operation a node performs. Operand conventions are documented per
/// variant; the factory methods on `FunctionBase` enforce them.
#[derive(Clone, Debug)]
pub enum Op {
    /// Function parameter, proc token/state parameter. No operands.
    Param,
    /// Constant. No operands.
    Literal(Value),
    /// Two bits-typed operands.
    Binary(BinaryOp),
    /// One bits-typed operand.
    Unary(UnaryOp),
    /// `[selector, case0, case1, ..., default?]`. When `has_default` is
    /// false the cases must cover the full selector range.
    Select { has_default: bool },
    /// Bits operands, operand 0 in the most significant position.
    Concat,
    /// One bits operand; a static slice of it.
    BitSlice { start: u64, width: u64 },
    /// Tuple construction from its operands.
    Tuple,
    /// One tuple operand.
    TupleIndex(u64),
    /// Array construction from its operands.
    Array,
    /// `[array, index]` with a bits-typed index.
    ArrayIndex,
    /// `[array, index, value]`.
    ArrayUpdate,
    /// Call of another function; operands are the arguments.
    Invoke { callee: Id },
    /// `[token, data]` or `[token, data, predicate]`.
    Send { channel: Id },
    /// `[token]` or `[token, predicate]`. Produces `(token, data)`.
    Receive { channel: Id },
    /// `[token, condition]`.
    Assert { message: String },
    /// `[token, condition]`.
    Cover { label: String },
    /// Token join over any number of token operands.
    AfterAll,

    // Operations that only appear in blocks.
    /// External input. No operands.
    InputPort,
    /// `[value]`; drives the named external output.
    OutputPort,
    /// Current value of a register. No operands.
    RegisterRead { register: Id },
    /// `[data]` or `[data, load_enable]`.
    RegisterWrite { register: Id },
    /// `[value]`; drives an input port of an instantiated block.
    InstantiationInput { instantiation: Id, port: Id },
    /// Value of an output port of an instantiated block. No operands.
    InstantiationOutput { instantiation: Id, port: Id },
}

impl Op {
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Op::Param => "param",
            Op::Literal(_) => "literal",
            Op::Binary(op) => op.mnemonic(),
            Op::Unary(op) => op.mnemonic(),
            Op::Select { .. } => "sel",
            Op::Concat => "concat",
            Op::BitSlice { .. } => "bit_slice",
            Op::Tuple => "tuple",
            Op::TupleIndex(_) => "tuple_index",
            Op::Array => "array",
            Op::ArrayIndex => "array_index",
            Op::ArrayUpdate => "array_update",
            Op::Invoke { .. } => "invoke",
            Op::Send { .. } => "send",
            Op::Receive { .. } => "receive",
            Op::Assert { .. } => "assert",
            Op::Cover { .. } => "cover",
            Op::AfterAll => "after_all",
            Op::InputPort => "input_port",
            Op::OutputPort => "output_port",
            Op::RegisterRead { .. } => "register_read",
            Op::RegisterWrite { .. } => "register_write",
            Op::InstantiationInput { .. } => "instantiation_input",
            Op::InstantiationOutput { .. } => "instantiation_output",
        }
    }

    /// Whether executing this operation has an externally visible effect.
    /// Parameters count as side-effecting (they cannot be removed by dead
    /// code elimination); analyses that care about "real" effects exclude
    /// them explicitly.
    pub fn is_side_effecting(&self) -> bool {
        matches!(
            self,
            Op::Param
                | Op::Send { .. }
                | Op::Receive { .. }
                | Op::Assert { .. }
                | Op::Cover { .. }
                | Op::InputPort
                | Op::OutputPort
                | Op::RegisterRead { .. }
                | Op::RegisterWrite { .. }
                | Op::InstantiationInput { .. }
                | Op::InstantiationOutput { .. }
        )
    }

    /// The channel a send/receive operates on.
    pub fn channel(&self) -> Option<Id> {
        match self {
            Op::Send { channel } | Op::Receive { channel } => Some(*channel),
            _ => None,
        }
    }
}

/// Position in the original source program, when known.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct SourceLocation {
    pub fileno: u32,
    pub lineno: u32,
    pub colno: u32,
}

/// A single-assignment operation in a function, proc, or block.
#[derive(Clone, Debug)]
pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) name: Id,
    pub(crate) op: Op,
    pub(crate) operands: SmallVec<[NodeId; 4]>,
    pub(crate) ty: Type,
    pub(crate) loc: Option<SourceLocation>,
}

impl Node {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn op(&self) -> &Op {
        &self.op
    }

    pub fn operands(&self) -> &[NodeId] {
        &self.operands
    }

    pub fn operand(&self, i: usize) -> NodeId {
        self.operands[i]
    }

    pub fn operand_count(&self) -> usize {
        self.operands.len()
    }

    pub fn ty(&self) -> &Type {
        &self.ty
    }

    pub fn loc(&self) -> Option<SourceLocation> {
        self.loc
    }

    pub fn is_param(&self) -> bool {
        matches!(self.op, Op::Param)
    }

    pub fn is_literal(&self) -> bool {
        matches!(self.op, Op::Literal(_))
    }
}

impl GetName for Node {
    fn name(&self) -> Id {
        self.name
    }
}
