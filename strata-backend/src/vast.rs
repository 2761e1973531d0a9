//! Verilog AST (VAST): a structured, composable model of a
//! Verilog/SystemVerilog source file and a deterministic text emitter.
//!
//! Construction produces a tree of typed nodes; emission walks the tree
//! and renders text, optionally recording a [`LineInfo`] mapping each node
//! to the line spans it occupies in the output. Every newline the emitter
//! writes is matched by a counter increment, so spans never drift.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU32, Ordering};

use baa::{BitVecOps, BitVecValue};
use itertools::Itertools;
use linked_hash_map::LinkedHashMap;
use strata_utils::{Error, Id, StrataResult};

/// Alias for a RefCell contained in an Rc reference. Signal definitions
/// are shared between the member lists that declare them and the
/// references that read them.
#[allow(clippy::upper_case_acronyms)]
pub type RRC<T> = Rc<RefCell<T>>;

fn rrc<T>(t: T) -> RRC<T> {
    Rc::new(RefCell::new(t))
}

/// Identity of a VAST node, used as the key of the line map. Fresh ids
/// come from a process-wide counter so cloned subtrees stay
/// distinguishable.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct VastNodeId(u32);

static NEXT_VAST_NODE_ID: AtomicU32 = AtomicU32::new(0);

impl VastNodeId {
    fn next() -> Self {
        VastNodeId(NEXT_VAST_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/* ========================= Line tracking ========================= */

/// An inclusive span of 0-based line numbers.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct LineSpan {
    pub start_line: i64,
    pub end_line: i64,
}

/// Spans recorded for one node: the completed spans plus, mid-emission, a
/// started-but-unfinished one.
#[derive(Clone, Default, Debug)]
pub struct PartialLineSpans {
    pub completed_spans: Vec<LineSpan>,
    pub hanging_start_line: Option<i64>,
}

/// Tracks which lines each AST node occupies in the emitted text. Nodes
/// bracket their emission with [`start`](LineInfo::start)/
/// [`end`](LineInfo::end); the emitter advances the counter whenever it
/// writes a newline.
#[derive(Default)]
pub struct LineInfo {
    spans: LinkedHashMap<VastNodeId, PartialLineSpans>,
    current_line_number: i64,
}

impl LineInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, node: VastNodeId) {
        let entry = self.spans.entry(node).or_insert_with(Default::default);
        assert!(
            entry.hanging_start_line.is_none(),
            "start() called twice in a row on the same node"
        );
        entry.hanging_start_line = Some(self.current_line_number);
    }

    pub fn end(&mut self, node: VastNodeId) {
        let entry = self
            .spans
            .get_mut(&node)
            .expect("end() called without a corresponding start()");
        let start_line = entry
            .hanging_start_line
            .take()
            .expect("end() called twice in a row on the same node");
        entry.completed_spans.push(LineSpan {
            start_line,
            end_line: self.current_line_number,
        });
    }

    pub fn increase(&mut self, delta: i64) {
        self.current_line_number += delta;
    }

    /// The completed spans of `node`. A node with a hanging start reports
    /// no span at all.
    pub fn lookup(&self, node: VastNodeId) -> Option<Vec<LineSpan>> {
        let entry = self.spans.get(&node)?;
        if entry.hanging_start_line.is_some() {
            return None;
        }
        Some(entry.completed_spans.clone())
    }
}

/// Emission context: target dialect plus the optional line tracker.
pub(crate) struct Emitter<'a> {
    use_system_verilog: bool,
    line_info: Option<&'a mut LineInfo>,
}

impl<'a> Emitter<'a> {
    fn sv(&self) -> bool {
        self.use_system_verilog
    }

    fn start(&mut self, node: VastNodeId) {
        if let Some(li) = self.line_info.as_deref_mut() {
            li.start(node);
        }
    }

    fn end(&mut self, node: VastNodeId) {
        if let Some(li) = self.line_info.as_deref_mut() {
            li.end(node);
        }
    }

    fn increase(&mut self, delta: i64) {
        if let Some(li) = self.line_info.as_deref_mut() {
            li.increase(delta);
        }
    }
}

fn number_of_newlines(s: &str) -> i64 {
    s.bytes().filter(|&b| b == b'\n').count() as i64
}

/// Prefix every line of `s` with two spaces.
fn indent(s: &str) -> String {
    s.lines().map(|line| format!("  {}", line)).join("\n")
}

/// Maps a name to a valid Verilog identifier: empty becomes `_`, a
/// leading digit gets an underscore prefix, and any other rune outside
/// `[A-Za-z0-9_]` becomes `_`.
pub fn sanitize_identifier(name: &str) -> String {
    if name.is_empty() {
        return "_".to_string();
    }
    let mut sanitized = String::with_capacity(name.len() + 1);
    if name.chars().next().unwrap().is_ascii_digit() {
        sanitized.push('_');
    }
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            sanitized.push(c);
        } else {
            sanitized.push('_');
        }
    }
    sanitized
}

/* ========================= Expressions ========================= */

/// Highest precedence level: literals, references, and other primaries.
pub const MAX_PRECEDENCE: i32 = 13;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FormatPreference {
    /// Unsigned decimal without a width prefix; only for widths <= 32.
    Default,
    UnsignedDecimal,
    Binary,
    Hex,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FourValueBit {
    Zero,
    One,
    Unknown,
    HighZ,
}

#[derive(Clone, Debug)]
pub struct Expression {
    id: VastNodeId,
    kind: ExprKind,
}

#[derive(Clone, Debug)]
enum ExprKind {
    Literal {
        bits: BitVecValue,
        format: FormatPreference,
        emit_bit_count: bool,
    },
    FourValueLiteral(Vec<FourValueBit>),
    XSentinel(u64),
    QuotedString(String),
    MacroRef(String),
    Ref(RRC<Def>),
    ParamRef(Id),
    Unary {
        op: &'static str,
        precedence: i32,
        reduction: bool,
        arg: Box<Expression>,
    },
    Binary {
        op: &'static str,
        precedence: i32,
        lhs: Box<Expression>,
        rhs: Box<Expression>,
    },
    Ternary {
        test: Box<Expression>,
        consequent: Box<Expression>,
        alternate: Box<Expression>,
    },
    Concat {
        replication: Option<Box<Expression>>,
        args: Vec<Expression>,
    },
    ArrayAssignmentPattern(Vec<Expression>),
    Index {
        subject: Box<Expression>,
        index: Box<Expression>,
    },
    Slice {
        subject: Box<Expression>,
        hi: Box<Expression>,
        lo: Box<Expression>,
    },
    PartSelect {
        subject: Box<Expression>,
        start: Box<Expression>,
        width: Box<Expression>,
    },
    SystemFunctionCall {
        name: String,
        args: Option<Vec<Expression>>,
    },
}

macro_rules! binary_ctor {
    ($fname:ident, $op:literal, $prec:literal) => {
        pub fn $fname(lhs: Expression, rhs: Expression) -> Expression {
            Expression::binary_infix($op, $prec, lhs, rhs)
        }
    };
}

macro_rules! unary_ctor {
    ($fname:ident, $op:literal, $reduction:literal) => {
        pub fn $fname(arg: Expression) -> Expression {
            Expression::unary_op($op, $reduction, arg)
        }
    };
}

impl Expression {
    fn new(kind: ExprKind) -> Expression {
        Expression {
            id: VastNodeId::next(),
            kind,
        }
    }

    pub fn id(&self) -> VastNodeId {
        self.id
    }

    /// A literal with an explicit bit count, e.g. `8'hff`.
    pub fn literal(bits: BitVecValue, format: FormatPreference) -> Expression {
        Expression::new(ExprKind::Literal {
            bits,
            format,
            emit_bit_count: true,
        })
    }

    pub fn literal_u64(
        value: u64,
        width: u64,
        format: FormatPreference,
    ) -> Expression {
        Expression::literal(
            BitVecValue::from_u64(value, width as baa::WidthInt),
            format,
        )
    }

    /// A bare decimal literal, e.g. an index or width constant.
    pub fn plain_literal(value: u64) -> Expression {
        Expression::new(ExprKind::Literal {
            bits: BitVecValue::from_u64(value, 32),
            format: FormatPreference::Default,
            emit_bit_count: false,
        })
    }

    /// Renders each bit of `{0,1,X,?}` explicitly, e.g. `4'b01X?`.
    pub fn four_value_literal(bits: Vec<FourValueBit>) -> Expression {
        Expression::new(ExprKind::FourValueLiteral(bits))
    }

    /// `W'dx`: a width-only unknown.
    pub fn x_sentinel(width: u64) -> Expression {
        Expression::new(ExprKind::XSentinel(width))
    }

    pub fn quoted_string(s: &str) -> Expression {
        Expression::new(ExprKind::QuotedString(s.to_string()))
    }

    pub fn macro_ref(name: &str) -> Expression {
        Expression::new(ExprKind::MacroRef(name.to_string()))
    }

    /// A reference to a declared signal.
    pub fn reference(def: &RRC<Def>) -> Expression {
        Expression::new(ExprKind::Ref(Rc::clone(def)))
    }

    pub fn param_ref(name: Id) -> Expression {
        Expression::new(ExprKind::ParamRef(name))
    }

    fn binary_infix(
        op: &'static str,
        precedence: i32,
        lhs: Expression,
        rhs: Expression,
    ) -> Expression {
        Expression::new(ExprKind::Binary {
            op,
            precedence,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    fn unary_op(
        op: &'static str,
        reduction: bool,
        arg: Expression,
    ) -> Expression {
        Expression::new(ExprKind::Unary {
            op,
            precedence: 11,
            reduction,
            arg: Box::new(arg),
        })
    }

    binary_ctor!(mul, "*", 10);
    binary_ctor!(div, "/", 10);
    binary_ctor!(rem, "%", 10);
    binary_ctor!(add, "+", 9);
    binary_ctor!(sub, "-", 9);
    binary_ctor!(shll, "<<", 8);
    binary_ctor!(shrl, ">>", 8);
    binary_ctor!(shra, ">>>", 8);
    binary_ctor!(lt, "<", 7);
    binary_ctor!(le, "<=", 7);
    binary_ctor!(gt, ">", 7);
    binary_ctor!(ge, ">=", 7);
    binary_ctor!(eq, "==", 6);
    binary_ctor!(ne, "!=", 6);
    binary_ctor!(bitand, "&", 5);
    binary_ctor!(bitxor, "^", 4);
    binary_ctor!(bitor, "|", 3);
    binary_ctor!(logical_and, "&&", 2);
    binary_ctor!(logical_or, "||", 1);

    unary_ctor!(negate, "-", false);
    unary_ctor!(bitwise_not, "~", false);
    unary_ctor!(logical_not, "!", false);
    unary_ctor!(and_reduce, "&", true);
    unary_ctor!(or_reduce, "|", true);
    unary_ctor!(xor_reduce, "^", true);

    pub fn ternary(
        test: Expression,
        consequent: Expression,
        alternate: Expression,
    ) -> Expression {
        Expression::new(ExprKind::Ternary {
            test: Box::new(test),
            consequent: Box::new(consequent),
            alternate: Box::new(alternate),
        })
    }

    pub fn concat(args: Vec<Expression>) -> Expression {
        Expression::new(ExprKind::Concat {
            replication: None,
            args,
        })
    }

    pub fn replicated_concat(
        replication: Expression,
        args: Vec<Expression>,
    ) -> Expression {
        Expression::new(ExprKind::Concat {
            replication: Some(Box::new(replication)),
            args,
        })
    }

    /// SystemVerilog `'{...}` pattern.
    pub fn array_assignment_pattern(args: Vec<Expression>) -> Expression {
        Expression::new(ExprKind::ArrayAssignmentPattern(args))
    }

    pub fn index(subject: Expression, index: Expression) -> Expression {
        debug_assert!(subject.is_indexable());
        Expression::new(ExprKind::Index {
            subject: Box::new(subject),
            index: Box::new(index),
        })
    }

    pub fn slice(
        subject: Expression,
        hi: Expression,
        lo: Expression,
    ) -> Expression {
        debug_assert!(subject.is_indexable());
        Expression::new(ExprKind::Slice {
            subject: Box::new(subject),
            hi: Box::new(hi),
            lo: Box::new(lo),
        })
    }

    /// `subject[start +: width]`.
    pub fn part_select(
        subject: Expression,
        start: Expression,
        width: Expression,
    ) -> Expression {
        debug_assert!(subject.is_indexable());
        Expression::new(ExprKind::PartSelect {
            subject: Box::new(subject),
            start: Box::new(start),
            width: Box::new(width),
        })
    }

    pub fn system_function_call(
        name: &str,
        args: Option<Vec<Expression>>,
    ) -> Expression {
        Expression::new(ExprKind::SystemFunctionCall {
            name: name.to_string(),
            args,
        })
    }

    pub fn precedence(&self) -> i32 {
        match &self.kind {
            ExprKind::Unary { precedence, .. }
            | ExprKind::Binary { precedence, .. } => *precedence,
            ExprKind::Ternary { .. } => 0,
            _ => MAX_PRECEDENCE,
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(self.kind, ExprKind::Literal { .. })
    }

    /// The literal's value when it fits a u64.
    pub fn literal_value(&self) -> Option<u64> {
        match &self.kind {
            ExprKind::Literal { bits, .. } => bits.to_u64(),
            _ => None,
        }
    }

    pub fn is_literal_with_value(&self, target: u64) -> bool {
        self.literal_value() == Some(target)
    }

    fn is_unary(&self) -> bool {
        matches!(self.kind, ExprKind::Unary { .. })
    }

    fn is_unary_reduction(&self) -> bool {
        matches!(self.kind, ExprKind::Unary { reduction: true, .. })
    }

    fn is_indexable(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::Ref(_)
                | ExprKind::Index { .. }
                | ExprKind::Slice { .. }
                | ExprKind::PartSelect { .. }
        )
    }

    /// Whether this is a reference to a signal declared scalar (no width,
    /// no packed dims) and hence not indexable in Verilog.
    fn is_scalar_ref(&self) -> bool {
        match &self.kind {
            ExprKind::Ref(def) => def.borrow().data_type.is_scalar(),
            _ => false,
        }
    }

    pub(crate) fn emit(&self, e: &mut Emitter) -> StrataResult<String> {
        match &self.kind {
            ExprKind::Literal {
                bits,
                format,
                emit_bit_count,
            } => {
                e.start(self.id);
                e.end(self.id);
                emit_literal(bits, *format, *emit_bit_count)
            }
            ExprKind::FourValueLiteral(bits) => {
                e.start(self.id);
                e.end(self.id);
                let digits: String = bits
                    .iter()
                    .map(|b| match b {
                        FourValueBit::Zero => '0',
                        FourValueBit::One => '1',
                        FourValueBit::Unknown => 'X',
                        FourValueBit::HighZ => '?',
                    })
                    .collect();
                Ok(format!("{}'b{}", bits.len(), digits))
            }
            ExprKind::XSentinel(width) => {
                e.start(self.id);
                e.end(self.id);
                Ok(format!("{}'dx", width))
            }
            ExprKind::QuotedString(s) => {
                e.start(self.id);
                e.increase(number_of_newlines(s));
                e.end(self.id);
                Ok(format!("\"{}\"", s))
            }
            ExprKind::MacroRef(name) => {
                e.start(self.id);
                e.end(self.id);
                Ok(format!("`{}", name))
            }
            ExprKind::Ref(def) => {
                e.start(self.id);
                e.end(self.id);
                Ok(def.borrow().name.to_string())
            }
            ExprKind::ParamRef(name) => {
                e.start(self.id);
                e.end(self.id);
                Ok(name.to_string())
            }
            ExprKind::Unary { op, arg, .. } => {
                e.start(self.id);
                // Nested unary ops are parenthesized unconditionally; some
                // consumers reject `~~x`.
                let wrap =
                    arg.precedence() < self.precedence() || arg.is_unary();
                let arg_str = if wrap {
                    paren_wrap(&arg.emit(e)?)
                } else {
                    arg.emit(e)?
                };
                e.end(self.id);
                Ok(format!("{}{}", op, arg_str))
            }
            ExprKind::Binary { op, lhs, rhs, .. } => {
                e.start(self.id);
                // Equal-precedence operators evaluate left-to-right, so
                // the lhs needs parentheses only below this precedence
                // while the rhs needs them at or below it. Reductions are
                // always wrapped; `|x || |y` draws warnings.
                let lhs_str = if lhs.precedence() < self.precedence()
                    || lhs.is_unary_reduction()
                {
                    paren_wrap(&lhs.emit(e)?)
                } else {
                    lhs.emit(e)?
                };
                let rhs_str = if rhs.precedence() <= self.precedence()
                    || rhs.is_unary_reduction()
                {
                    paren_wrap(&rhs.emit(e)?)
                } else {
                    rhs.emit(e)?
                };
                e.end(self.id);
                Ok(format!("{} {} {}", lhs_str, op, rhs_str))
            }
            ExprKind::Ternary {
                test,
                consequent,
                alternate,
            } => {
                e.start(self.id);
                let wrapped = |expr: &Expression,
                               e: &mut Emitter|
                 -> StrataResult<String> {
                    if expr.precedence() <= self.precedence() {
                        Ok(paren_wrap(&expr.emit(e)?))
                    } else {
                        expr.emit(e)
                    }
                };
                let result = format!(
                    "{} ? {} : {}",
                    wrapped(test, e)?,
                    wrapped(consequent, e)?,
                    wrapped(alternate, e)?
                );
                e.end(self.id);
                Ok(result)
            }
            ExprKind::Concat { replication, args } => {
                e.start(self.id);
                let mut result = String::new();
                if let Some(repl) = replication {
                    result.push('{');
                    result.push_str(&repl.emit(e)?);
                }
                let args_str: Vec<String> =
                    args.iter().map(|a| a.emit(e)).try_collect()?;
                result.push_str(&format!("{{{}}}", args_str.join(", ")));
                if replication.is_some() {
                    result.push('}');
                }
                e.end(self.id);
                Ok(result)
            }
            ExprKind::ArrayAssignmentPattern(args) => {
                if !e.sv() {
                    return Err(Error::unsupported(
                        "assignment patterns require SystemVerilog",
                    ));
                }
                e.start(self.id);
                let args_str: Vec<String> =
                    args.iter().map(|a| a.emit(e)).try_collect()?;
                e.end(self.id);
                Ok(format!("'{{{}}}", args_str.join(", ")))
            }
            ExprKind::Index { subject, index } => {
                e.start(self.id);
                if subject.is_scalar_ref() {
                    // Indexing a scalar is invalid Verilog; elide a zero
                    // index and report anything else.
                    if !index.is_literal_with_value(0) {
                        return Err(Error::unsupported(format!(
                            "cannot index a scalar with `{}'",
                            index.emit(&mut Emitter {
                                use_system_verilog: e.sv(),
                                line_info: None
                            })?
                        )));
                    }
                    let result = subject.emit(e)?;
                    e.end(self.id);
                    return Ok(result);
                }
                let subject_str = subject.emit(e)?;
                let index_str = index.emit(e)?;
                e.end(self.id);
                Ok(format!("{}[{}]", subject_str, index_str))
            }
            ExprKind::Slice { subject, hi, lo } => {
                e.start(self.id);
                if subject.is_scalar_ref() {
                    // The only valid hi/lo values for a scalar are zero.
                    if !hi.is_literal_with_value(0)
                        || !lo.is_literal_with_value(0)
                    {
                        return Err(Error::unsupported(
                            "cannot slice a scalar except as [0:0]",
                        ));
                    }
                    let result = subject.emit(e)?;
                    e.end(self.id);
                    return Ok(result);
                }
                let subject_str = subject.emit(e)?;
                let hi_str = hi.emit(e)?;
                let lo_str = lo.emit(e)?;
                e.end(self.id);
                Ok(format!("{}[{}:{}]", subject_str, hi_str, lo_str))
            }
            ExprKind::PartSelect {
                subject,
                start,
                width,
            } => {
                e.start(self.id);
                let subject_str = subject.emit(e)?;
                let start_str = start.emit(e)?;
                let width_str = width.emit(e)?;
                e.end(self.id);
                Ok(format!("{}[{} +: {}]", subject_str, start_str, width_str))
            }
            ExprKind::SystemFunctionCall { name, args } => {
                e.start(self.id);
                let result = match args {
                    Some(args) => {
                        let args_str: Vec<String> =
                            args.iter().map(|a| a.emit(e)).try_collect()?;
                        format!("${}({})", name, args_str.join(", "))
                    }
                    None => format!("${}", name),
                };
                e.end(self.id);
                Ok(result)
            }
        }
    }
}

fn paren_wrap(s: &str) -> String {
    format!("({})", s)
}

fn emit_literal(
    bits: &BitVecValue,
    format: FormatPreference,
    emit_bit_count: bool,
) -> StrataResult<String> {
    let width = bits.width() as u64;
    match format {
        FormatPreference::Default => {
            if width > 32 {
                return Err(Error::unsupported(format!(
                    "cannot emit a {}-bit literal without a width prefix",
                    width
                )));
            }
            decimal_string(bits)
        }
        FormatPreference::UnsignedDecimal => {
            let prefix = if emit_bit_count {
                format!("{}'d", width)
            } else {
                String::new()
            };
            Ok(format!("{}{}", prefix, decimal_string(bits)?))
        }
        FormatPreference::Binary => {
            Ok(format!("{}'b{}", width, bits.to_bit_str()))
        }
        FormatPreference::Hex => {
            Ok(format!("{}'h{}", width, hex_digits(bits)))
        }
    }
}

fn decimal_string(bits: &BitVecValue) -> StrataResult<String> {
    bits.to_u64().map(|v| v.to_string()).ok_or_else(|| {
        Error::unsupported(format!(
            "decimal emission of a {}-bit literal",
            bits.width()
        ))
    })
}

/// Hex digits with leading zeros: one digit per started nibble.
fn hex_digits(bits: &BitVecValue) -> String {
    let bin = bits.to_bit_str();
    let padding = (4 - bin.len() % 4) % 4;
    let padded: String =
        "0".repeat(padding).chars().chain(bin.chars()).collect();
    padded
        .as_bytes()
        .chunks(4)
        .map(|nibble| {
            let value = nibble
                .iter()
                .fold(0u32, |acc, &b| (acc << 1) | (b - b'0') as u32);
            char::from_digit(value, 16).unwrap()
        })
        .collect()
}

/* ========================= Types and defs ========================= */

/// A Verilog data type: signedness, an optional scalar width, packed and
/// unpacked array dimensions.
#[derive(Clone, Debug)]
pub struct DataType {
    id: VastNodeId,
    is_signed: bool,
    width: Option<Box<Expression>>,
    packed_dims: Vec<Expression>,
    unpacked_dims: Vec<Expression>,
}

impl DataType {
    /// A one-bit signal without a width: `wire x;`. Not indexable.
    pub fn scalar() -> DataType {
        DataType {
            id: VastNodeId::next(),
            is_signed: false,
            width: None,
            packed_dims: Vec::new(),
            unpacked_dims: Vec::new(),
        }
    }

    fn with_width(width: Expression, is_signed: bool) -> DataType {
        DataType {
            id: VastNodeId::next(),
            is_signed,
            width: Some(Box::new(width)),
            packed_dims: Vec::new(),
            unpacked_dims: Vec::new(),
        }
    }

    /// `bit_count == 1` yields a scalar unless signed.
    pub fn bit_vector(bit_count: u64, is_signed: bool) -> DataType {
        assert!(bit_count > 0, "zero-width signals cannot be declared");
        if bit_count == 1 && !is_signed {
            DataType::scalar()
        } else {
            DataType::bit_vector_no_scalar(bit_count, is_signed)
        }
    }

    pub fn bit_vector_no_scalar(bit_count: u64, is_signed: bool) -> DataType {
        DataType::with_width(Expression::plain_literal(bit_count), is_signed)
    }

    /// A packed array. The element type is always emitted as a bitvector
    /// (`[0:0]` for one-bit elements) so elements stay indexable.
    pub fn packed_array(
        element_bit_count: u64,
        dims: &[u64],
        is_signed: bool,
    ) -> DataType {
        assert!(element_bit_count > 0);
        let mut ty = DataType::with_width(
            Expression::plain_literal(element_bit_count),
            is_signed,
        );
        ty.packed_dims = dims
            .iter()
            .map(|&d| Expression::plain_literal(d))
            .collect();
        ty
    }

    pub fn unpacked_array(element_bit_count: u64, dims: &[u64]) -> DataType {
        assert!(element_bit_count > 0);
        let mut ty = if element_bit_count == 1 {
            DataType::scalar()
        } else {
            DataType::with_width(
                Expression::plain_literal(element_bit_count),
                false,
            )
        };
        ty.unpacked_dims = dims
            .iter()
            .map(|&d| Expression::plain_literal(d))
            .collect();
        ty
    }

    /// Scalar means no width expression and no packed dimensions; such a
    /// signal cannot be indexed or sliced.
    pub fn is_scalar(&self) -> bool {
        self.width.is_none() && self.packed_dims.is_empty()
    }

    pub fn width_as_u64(&self) -> StrataResult<u64> {
        match &self.width {
            // No width expression means a single-bit signal.
            None => Ok(1),
            Some(width) => width.literal_value().ok_or_else(|| {
                Error::precondition("width is not a literal")
            }),
        }
    }

    pub fn flat_bit_count_as_u64(&self) -> StrataResult<u64> {
        let mut bit_count = self.width_as_u64()?;
        for dim in self.packed_dims.iter().chain(self.unpacked_dims.iter()) {
            let size = dim.literal_value().ok_or_else(|| {
                Error::precondition("array dimension is not a literal")
            })?;
            bit_count *= size;
        }
        Ok(bit_count)
    }

    /// Renders `[signed] [W-1:0][packed...] identifier [unpacked...]`.
    pub(crate) fn emit_with_identifier(
        &self,
        e: &mut Emitter,
        identifier: &str,
    ) -> StrataResult<String> {
        e.start(self.id);
        let mut result = if self.is_signed {
            " signed".to_string()
        } else {
            String::new()
        };
        if let Some(width) = &self.width {
            result.push_str(&format!(" [{}:0]", width_to_limit(e, width)?));
        }
        for dim in &self.packed_dims {
            result.push_str(&format!("[{}:0]", width_to_limit(e, dim)?));
        }
        result.push_str(&format!(" {}", identifier));
        for dim in &self.unpacked_dims {
            // SystemVerilog allows size-only unpacked dimensions.
            if e.sv() {
                result.push_str(&format!("[{}]", dim.emit(e)?));
            } else {
                result.push_str(&format!("[0:{}]", width_to_limit(e, dim)?));
            }
        }
        e.end(self.id);
        Ok(result)
    }
}

/// Renders `expr - 1`, folding when the expression is a literal.
fn width_to_limit(e: &mut Emitter, expr: &Expression) -> StrataResult<String> {
    if let Some(value) = expr.literal_value() {
        return Ok(format!("{}", value - 1));
    }
    Expression::sub(expr.clone(), Expression::plain_literal(1)).emit(e)
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DataKind {
    Reg,
    Wire,
    Logic,
}

/// A signal definition: `wire [7:0] foo;`, `reg x = 1'b0;`, ...
#[derive(Clone, Debug)]
pub struct Def {
    id: VastNodeId,
    pub name: Id,
    pub data_kind: DataKind,
    pub data_type: DataType,
    pub init: Option<Expression>,
}

impl Def {
    pub fn new(name: Id, data_kind: DataKind, data_type: DataType) -> Def {
        Def {
            id: VastNodeId::next(),
            name,
            data_kind,
            data_type,
            init: None,
        }
    }

    pub(crate) fn emit(&self, e: &mut Emitter) -> StrataResult<String> {
        let mut result = self.emit_no_semi(e)?;
        if let Some(init) = &self.init {
            result.push_str(&format!(" = {}", init.emit(e)?));
        }
        result.push(';');
        Ok(result)
    }

    pub(crate) fn emit_no_semi(&self, e: &mut Emitter) -> StrataResult<String> {
        e.start(self.id);
        let kind_str = match self.data_kind {
            DataKind::Reg => "reg",
            DataKind::Wire => "wire",
            DataKind::Logic => {
                if !e.sv() {
                    return Err(Error::unsupported(
                        "`logic' requires SystemVerilog",
                    ));
                }
                "logic"
            }
        };
        let result = format!(
            "{}{}",
            kind_str,
            self.data_type.emit_with_identifier(e, self.name.as_ref())?
        );
        e.end(self.id);
        Ok(result)
    }
}

/* ========================= Statements ========================= */

#[derive(Clone, Debug)]
pub struct StatementBlock {
    id: VastNodeId,
    statements: Vec<Statement>,
}

impl Default for StatementBlock {
    fn default() -> Self {
        Self::new()
    }
}

impl StatementBlock {
    pub fn new() -> StatementBlock {
        StatementBlock {
            id: VastNodeId::next(),
            statements: Vec::new(),
        }
    }

    pub fn add(&mut self, statement: Statement) {
        self.statements.push(statement);
    }

    pub fn add_blocking(&mut self, lhs: Expression, rhs: Expression) {
        self.add(Statement::blocking_assignment(lhs, rhs));
    }

    pub fn add_nonblocking(&mut self, lhs: Expression, rhs: Expression) {
        self.add(Statement::nonblocking_assignment(lhs, rhs));
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub(crate) fn emit(&self, e: &mut Emitter) -> StrataResult<String> {
        e.start(self.id);
        if self.statements.is_empty() {
            e.end(self.id);
            return Ok("begin end".to_string());
        }
        let mut result = "begin\n".to_string();
        e.increase(1);
        let mut lines = Vec::with_capacity(self.statements.len());
        for statement in &self.statements {
            lines.push(statement.emit(e)?);
            e.increase(1);
        }
        result.push_str(&indent(&lines.join("\n")));
        result.push_str("\nend");
        e.end(self.id);
        Ok(result)
    }
}

#[derive(Clone, Debug)]
pub enum Statement {
    Conditional(Conditional),
    Case(Case),
    Blocking {
        id: VastNodeId,
        lhs: Expression,
        rhs: Expression,
    },
    Nonblocking {
        id: VastNodeId,
        lhs: Expression,
        rhs: Expression,
    },
    Delay {
        id: VastNodeId,
        amount: Expression,
        statement: Option<Box<Statement>>,
    },
    Wait {
        id: VastNodeId,
        event: Expression,
    },
    While {
        id: VastNodeId,
        condition: Expression,
        body: StatementBlock,
    },
    Repeat {
        id: VastNodeId,
        count: Expression,
        statement: Box<Statement>,
    },
    Forever {
        id: VastNodeId,
        statement: Box<Statement>,
    },
    EventControl {
        id: VastNodeId,
        event: Expression,
    },
    SystemTask {
        id: VastNodeId,
        name: String,
        args: Option<Vec<Expression>>,
    },
    Block(StatementBlock),
    Comment(Comment),
}

impl Statement {
    pub fn blocking_assignment(lhs: Expression, rhs: Expression) -> Statement {
        Statement::Blocking {
            id: VastNodeId::next(),
            lhs,
            rhs,
        }
    }

    pub fn nonblocking_assignment(
        lhs: Expression,
        rhs: Expression,
    ) -> Statement {
        Statement::Nonblocking {
            id: VastNodeId::next(),
            lhs,
            rhs,
        }
    }

    pub fn delay(amount: Expression, statement: Option<Statement>) -> Statement {
        Statement::Delay {
            id: VastNodeId::next(),
            amount,
            statement: statement.map(Box::new),
        }
    }

    pub fn wait(event: Expression) -> Statement {
        Statement::Wait {
            id: VastNodeId::next(),
            event,
        }
    }

    pub fn while_loop(condition: Expression, body: StatementBlock) -> Statement {
        Statement::While {
            id: VastNodeId::next(),
            condition,
            body,
        }
    }

    pub fn repeat(count: Expression, statement: Statement) -> Statement {
        Statement::Repeat {
            id: VastNodeId::next(),
            count,
            statement: Box::new(statement),
        }
    }

    pub fn forever(statement: Statement) -> Statement {
        Statement::Forever {
            id: VastNodeId::next(),
            statement: Box::new(statement),
        }
    }

    pub fn event_control(event: Expression) -> Statement {
        Statement::EventControl {
            id: VastNodeId::next(),
            event,
        }
    }

    pub fn system_task(name: &str, args: Option<Vec<Expression>>) -> Statement {
        Statement::SystemTask {
            id: VastNodeId::next(),
            name: name.to_string(),
            args,
        }
    }

    pub(crate) fn emit(&self, e: &mut Emitter) -> StrataResult<String> {
        match self {
            Statement::Conditional(c) => c.emit(e),
            Statement::Case(c) => c.emit(e),
            Statement::Blocking { id, lhs, rhs } => {
                e.start(*id);
                let lhs_str = lhs.emit(e)?;
                let rhs_str = rhs.emit(e)?;
                e.end(*id);
                Ok(format!("{} = {};", lhs_str, rhs_str))
            }
            Statement::Nonblocking { id, lhs, rhs } => {
                e.start(*id);
                let lhs_str = lhs.emit(e)?;
                let rhs_str = rhs.emit(e)?;
                e.end(*id);
                Ok(format!("{} <= {};", lhs_str, rhs_str))
            }
            Statement::Delay {
                id,
                amount,
                statement,
            } => {
                e.start(*id);
                let delay_str = if amount.precedence() < MAX_PRECEDENCE {
                    paren_wrap(&amount.emit(e)?)
                } else {
                    amount.emit(e)?
                };
                let result = match statement {
                    Some(statement) => {
                        format!("#{} {}", delay_str, statement.emit(e)?)
                    }
                    None => format!("#{};", delay_str),
                };
                e.end(*id);
                Ok(result)
            }
            Statement::Wait { id, event } => {
                e.start(*id);
                let result = format!("wait({});", event.emit(e)?);
                e.end(*id);
                Ok(result)
            }
            Statement::While {
                id,
                condition,
                body,
            } => {
                e.start(*id);
                let cond_str = condition.emit(e)?;
                let body_str = body.emit(e)?;
                e.end(*id);
                Ok(format!("while ({}) {}", cond_str, body_str))
            }
            Statement::Repeat {
                id,
                count,
                statement,
            } => {
                e.start(*id);
                let count_str = count.emit(e)?;
                let stmt_str = statement.emit(e)?;
                e.end(*id);
                Ok(format!("repeat ({}) {};", count_str, stmt_str))
            }
            Statement::Forever { id, statement } => {
                e.start(*id);
                let result = format!("forever {}", statement.emit(e)?);
                e.end(*id);
                Ok(result)
            }
            Statement::EventControl { id, event } => {
                e.start(*id);
                let result = format!("@({});", event.emit(e)?);
                e.end(*id);
                Ok(result)
            }
            Statement::SystemTask { id, name, args } => {
                e.start(*id);
                let result = match args {
                    Some(args) => {
                        let args_str: Vec<String> =
                            args.iter().map(|a| a.emit(e)).try_collect()?;
                        format!("${}({});", name, args_str.join(", "))
                    }
                    None => format!("${};", name),
                };
                e.end(*id);
                Ok(result)
            }
            Statement::Block(block) => block.emit(e),
            Statement::Comment(comment) => comment.emit(e),
        }
    }
}

/// `if`/`else if`/`else` chain. An alternate without a condition is the
/// final `else` and must come last.
#[derive(Clone, Debug)]
pub struct Conditional {
    id: VastNodeId,
    condition: Expression,
    consequent: StatementBlock,
    alternates: Vec<(Option<Expression>, StatementBlock)>,
}

impl Conditional {
    pub fn new(condition: Expression) -> Conditional {
        Conditional {
            id: VastNodeId::next(),
            condition,
            consequent: StatementBlock::new(),
            alternates: Vec::new(),
        }
    }

    pub fn consequent(&mut self) -> &mut StatementBlock {
        &mut self.consequent
    }

    /// Adds an `else if (condition)` arm, or the final `else` when
    /// `condition` is None.
    pub fn add_alternate(
        &mut self,
        condition: Option<Expression>,
    ) -> &mut StatementBlock {
        assert!(
            self.alternates.last().map_or(true, |(c, _)| c.is_some()),
            "the conditional was already closed with an `else'"
        );
        self.alternates.push((condition, StatementBlock::new()));
        &mut self.alternates.last_mut().unwrap().1
    }

    pub(crate) fn emit(&self, e: &mut Emitter) -> StrataResult<String> {
        e.start(self.id);
        let mut result = format!(
            "if ({}) {}",
            self.condition.emit(e)?,
            self.consequent.emit(e)?
        );
        for (condition, block) in &self.alternates {
            result.push_str(" else ");
            if let Some(condition) = condition {
                result.push_str(&format!("if ({}) ", condition.emit(e)?));
            }
            result.push_str(&block.emit(e)?);
        }
        e.end(self.id);
        Ok(result)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CaseKeyword {
    Case,
    Casez,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum CaseModifier {
    Unique,
}

#[derive(Clone, Debug)]
pub enum CaseLabel {
    Expr(Expression),
    Default,
}

#[derive(Clone, Debug)]
pub struct CaseArm {
    id: VastNodeId,
    label: CaseLabel,
    statements: StatementBlock,
}

#[derive(Clone, Debug)]
pub struct Case {
    id: VastNodeId,
    keyword: CaseKeyword,
    modifier: Option<CaseModifier>,
    subject: Expression,
    arms: Vec<CaseArm>,
}

impl Case {
    pub fn new(subject: Expression) -> Case {
        Case {
            id: VastNodeId::next(),
            keyword: CaseKeyword::Case,
            modifier: None,
            subject,
            arms: Vec::new(),
        }
    }

    pub fn new_casez(subject: Expression) -> Case {
        Case {
            keyword: CaseKeyword::Casez,
            ..Case::new(subject)
        }
    }

    pub fn with_modifier(mut self, modifier: CaseModifier) -> Case {
        self.modifier = Some(modifier);
        self
    }

    pub fn add_arm(&mut self, label: CaseLabel) -> &mut StatementBlock {
        self.arms.push(CaseArm {
            id: VastNodeId::next(),
            label,
            statements: StatementBlock::new(),
        });
        &mut self.arms.last_mut().unwrap().statements
    }

    pub(crate) fn emit(&self, e: &mut Emitter) -> StrataResult<String> {
        e.start(self.id);
        let keyword = match self.keyword {
            CaseKeyword::Case => "case",
            CaseKeyword::Casez => "casez",
        };
        let keyword = match self.modifier {
            Some(CaseModifier::Unique) => {
                if !e.sv() {
                    return Err(Error::unsupported(
                        "`unique case' requires SystemVerilog",
                    ));
                }
                format!("unique {}", keyword)
            }
            None => keyword.to_string(),
        };
        let mut result =
            format!("{} ({})\n", keyword, self.subject.emit(e)?);
        e.increase(1);
        for arm in &self.arms {
            e.start(arm.id);
            let label_str = match &arm.label {
                CaseLabel::Expr(expr) => expr.emit(e)?,
                CaseLabel::Default => "default".to_string(),
            };
            e.end(arm.id);
            let stmts_str = arm.statements.emit(e)?;
            result.push_str(&indent(&format!("{}: {}", label_str, stmts_str)));
            result.push('\n');
            e.increase(1);
        }
        result.push_str("endcase");
        e.end(self.id);
        Ok(result)
    }
}

/* ========================= Procedural blocks ========================= */

#[derive(Clone, Debug)]
pub enum SensitivityListElement {
    Implicit,
    PosEdge(Expression),
    NegEdge(Expression),
}

fn emit_sensitivity_list(
    e: &mut Emitter,
    elements: &[SensitivityListElement],
) -> StrataResult<String> {
    let mut parts = Vec::with_capacity(elements.len());
    for element in elements {
        parts.push(match element {
            SensitivityListElement::Implicit => "*".to_string(),
            SensitivityListElement::PosEdge(expr) => {
                format!("posedge {}", expr.emit(e)?)
            }
            SensitivityListElement::NegEdge(expr) => {
                format!("negedge {}", expr.emit(e)?)
            }
        });
    }
    Ok(parts.join(" or "))
}

/// Plain `always @ (...)`.
#[derive(Clone, Debug)]
pub struct Always {
    id: VastNodeId,
    sensitivity: Vec<SensitivityListElement>,
    pub statements: StatementBlock,
}

impl Always {
    pub fn new(sensitivity: Vec<SensitivityListElement>) -> Always {
        Always {
            id: VastNodeId::next(),
            sensitivity,
            statements: StatementBlock::new(),
        }
    }

    pub(crate) fn emit(&self, e: &mut Emitter) -> StrataResult<String> {
        e.start(self.id);
        let sensitivity = emit_sensitivity_list(e, &self.sensitivity)?;
        let statements = self.statements.emit(e)?;
        e.end(self.id);
        Ok(format!("always @ ({}) {}", sensitivity, statements))
    }
}

/// SystemVerilog `always_comb`.
#[derive(Clone, Debug)]
pub struct AlwaysComb {
    id: VastNodeId,
    pub statements: StatementBlock,
}

impl Default for AlwaysComb {
    fn default() -> Self {
        Self::new()
    }
}

impl AlwaysComb {
    pub fn new() -> AlwaysComb {
        AlwaysComb {
            id: VastNodeId::next(),
            statements: StatementBlock::new(),
        }
    }

    pub(crate) fn emit(&self, e: &mut Emitter) -> StrataResult<String> {
        if !e.sv() {
            return Err(Error::unsupported(
                "`always_comb' requires SystemVerilog",
            ));
        }
        e.start(self.id);
        let result = format!("always_comb {}", self.statements.emit(e)?);
        e.end(self.id);
        Ok(result)
    }
}

/// SystemVerilog `always_ff @ (...)`.
#[derive(Clone, Debug)]
pub struct AlwaysFf {
    id: VastNodeId,
    sensitivity: Vec<SensitivityListElement>,
    pub statements: StatementBlock,
}

impl AlwaysFf {
    pub fn new(sensitivity: Vec<SensitivityListElement>) -> AlwaysFf {
        AlwaysFf {
            id: VastNodeId::next(),
            sensitivity,
            statements: StatementBlock::new(),
        }
    }

    pub(crate) fn emit(&self, e: &mut Emitter) -> StrataResult<String> {
        if !e.sv() {
            return Err(Error::unsupported(
                "`always_ff' requires SystemVerilog",
            ));
        }
        e.start(self.id);
        let sensitivity = emit_sensitivity_list(e, &self.sensitivity)?;
        let statements = self.statements.emit(e)?;
        e.end(self.id);
        Ok(format!("always_ff @ ({}) {}", sensitivity, statements))
    }
}

/// `initial` block.
#[derive(Clone, Debug)]
pub struct Initial {
    id: VastNodeId,
    pub statements: StatementBlock,
}

impl Default for Initial {
    fn default() -> Self {
        Self::new()
    }
}

impl Initial {
    pub fn new() -> Initial {
        Initial {
            id: VastNodeId::next(),
            statements: StatementBlock::new(),
        }
    }

    pub(crate) fn emit(&self, e: &mut Emitter) -> StrataResult<String> {
        e.start(self.id);
        let result = format!("initial {}", self.statements.emit(e)?);
        e.end(self.id);
        Ok(result)
    }
}

/// Reset configuration for [`AlwaysFlop`].
#[derive(Clone, Debug)]
pub struct Reset {
    pub signal: Expression,
    pub asynchronous: bool,
    pub active_low: bool,
}

#[derive(Clone, Debug)]
struct FlopRegister {
    reg: Expression,
    next: Expression,
    reset_value: Option<Expression>,
}

/// A clocked register bank: `always @ (posedge clk ...)` with an
/// automatically constructed reset conditional. With a reset, the body is
/// `if (<reset>) <reset assignments> else <next assignments>`; an
/// asynchronous reset also appears in the sensitivity list.
#[derive(Clone, Debug)]
pub struct AlwaysFlop {
    id: VastNodeId,
    clk: Expression,
    reset: Option<Reset>,
    registers: Vec<FlopRegister>,
}

impl AlwaysFlop {
    pub fn new(clk: Expression) -> AlwaysFlop {
        AlwaysFlop {
            id: VastNodeId::next(),
            clk,
            reset: None,
            registers: Vec::new(),
        }
    }

    pub fn new_with_reset(clk: Expression, reset: Reset) -> AlwaysFlop {
        AlwaysFlop {
            reset: Some(reset),
            ..AlwaysFlop::new(clk)
        }
    }

    /// Registers `reg <= next` each cycle; when a reset is configured and
    /// `reset_value` is given, the reset branch loads it instead.
    pub fn add_register(
        &mut self,
        reg: Expression,
        next: Expression,
        reset_value: Option<Expression>,
    ) {
        assert!(
            reset_value.is_none() || self.reset.is_some(),
            "reset value given to a flop without a reset signal"
        );
        self.registers.push(FlopRegister {
            reg,
            next,
            reset_value,
        });
    }

    pub(crate) fn emit(&self, e: &mut Emitter) -> StrataResult<String> {
        e.start(self.id);
        let mut sensitivity =
            format!("posedge {}", self.clk.emit(e)?);
        if let Some(reset) = &self.reset {
            if reset.asynchronous {
                sensitivity.push_str(&format!(
                    " or {} {}",
                    if reset.active_low { "negedge" } else { "posedge" },
                    reset.signal.emit(e)?
                ));
            }
        }
        // Build the body as a statement block so the emission (and the
        // line accounting) matches any other procedural block.
        let mut top = StatementBlock::new();
        match &self.reset {
            Some(reset) => {
                let condition = if reset.active_low {
                    Expression::logical_not(reset.signal.clone())
                } else {
                    reset.signal.clone()
                };
                let mut conditional = Conditional::new(condition);
                for register in &self.registers {
                    if let Some(reset_value) = &register.reset_value {
                        conditional.consequent().add_nonblocking(
                            register.reg.clone(),
                            reset_value.clone(),
                        );
                    }
                }
                let assignment_block = conditional.add_alternate(None);
                for register in &self.registers {
                    assignment_block.add_nonblocking(
                        register.reg.clone(),
                        register.next.clone(),
                    );
                }
                top.add(Statement::Conditional(conditional));
            }
            None => {
                for register in &self.registers {
                    top.add_nonblocking(
                        register.reg.clone(),
                        register.next.clone(),
                    );
                }
            }
        }
        let result = format!(
            "always @ ({}) {}",
            sensitivity,
            top.emit(e)?
        );
        e.end(self.id);
        Ok(result)
    }
}

/* ========================= Module members ========================= */

#[derive(Clone, Debug)]
pub struct Comment {
    id: VastNodeId,
    text: String,
}

impl Comment {
    pub fn new(text: &str) -> Comment {
        Comment {
            id: VastNodeId::next(),
            text: text.to_string(),
        }
    }

    pub(crate) fn emit(&self, e: &mut Emitter) -> StrataResult<String> {
        e.start(self.id);
        e.increase(number_of_newlines(&self.text));
        e.end(self.id);
        Ok(format!("// {}", self.text.replace('\n', "\n// ")))
    }
}

#[derive(Clone, Debug)]
pub struct BlankLine {
    id: VastNodeId,
}

impl Default for BlankLine {
    fn default() -> Self {
        Self::new()
    }
}

impl BlankLine {
    pub fn new() -> BlankLine {
        BlankLine {
            id: VastNodeId::next(),
        }
    }

    pub(crate) fn emit(&self, e: &mut Emitter) -> StrataResult<String> {
        e.start(self.id);
        e.end(self.id);
        Ok(String::new())
    }
}

/// Raw text escape hatch for constructs the AST does not model.
#[derive(Clone, Debug)]
pub struct InlineVerilogStatement {
    id: VastNodeId,
    text: String,
}

impl InlineVerilogStatement {
    pub fn new(text: &str) -> InlineVerilogStatement {
        InlineVerilogStatement {
            id: VastNodeId::next(),
            text: text.to_string(),
        }
    }

    pub(crate) fn emit(&self, e: &mut Emitter) -> StrataResult<String> {
        e.start(self.id);
        e.increase(number_of_newlines(&self.text));
        e.end(self.id);
        Ok(self.text.clone())
    }
}

/// Deferred immediate assertion: `assert #0 (cond) else $fatal(0, "...");`
#[derive(Clone, Debug)]
pub struct Assert {
    id: VastNodeId,
    condition: Expression,
    error_message: String,
}

impl Assert {
    pub fn new(condition: Expression, error_message: &str) -> Assert {
        Assert {
            id: VastNodeId::next(),
            condition,
            error_message: error_message.to_string(),
        }
    }

    pub(crate) fn emit(&self, e: &mut Emitter) -> StrataResult<String> {
        if !e.sv() {
            return Err(Error::unsupported(
                "immediate assertions require SystemVerilog",
            ));
        }
        e.start(self.id);
        // $fatal's first argument is the finish number {0,1,2}, which sets
        // the diagnostic verbosity (IEEE 1800-2017).
        let finish_number = 0;
        let message = if self.error_message.is_empty() {
            String::new()
        } else {
            format!(", \"{}\"", self.error_message)
        };
        let result = format!(
            "assert #0 ({}) else $fatal({}{});",
            self.condition.emit(e)?,
            finish_number,
            message
        );
        e.end(self.id);
        Ok(result)
    }
}

/// Clocked cover property: `label: cover property (@(posedge clk) cond);`
#[derive(Clone, Debug)]
pub struct Cover {
    id: VastNodeId,
    clk: Expression,
    condition: Expression,
    label: String,
}

impl Cover {
    pub fn new(clk: Expression, condition: Expression, label: &str) -> Cover {
        Cover {
            id: VastNodeId::next(),
            clk,
            condition,
            label: label.to_string(),
        }
    }

    pub(crate) fn emit(&self, e: &mut Emitter) -> StrataResult<String> {
        if !e.sv() {
            return Err(Error::unsupported(
                "cover properties require SystemVerilog",
            ));
        }
        e.start(self.id);
        let clock = self.clk.emit(e)?;
        let condition = self.condition.emit(e)?;
        e.end(self.id);
        Ok(format!(
            "{}: cover property (@(posedge {}) {});",
            self.label, clock, condition
        ))
    }
}

/// `module_name #(.P(v), ...) inst_name (.p(expr), ...);`
#[derive(Clone, Debug)]
pub struct Instantiation {
    id: VastNodeId,
    module_name: Id,
    instance_name: Id,
    parameters: Vec<Connection>,
    connections: Vec<Connection>,
}

#[derive(Clone, Debug)]
pub struct Connection {
    pub port_name: Id,
    pub expression: Expression,
}

impl Instantiation {
    pub fn new(
        module_name: Id,
        instance_name: Id,
        parameters: Vec<Connection>,
        connections: Vec<Connection>,
    ) -> Instantiation {
        Instantiation {
            id: VastNodeId::next(),
            module_name,
            instance_name,
            parameters,
            connections,
        }
    }

    pub(crate) fn emit(&self, e: &mut Emitter) -> StrataResult<String> {
        e.start(self.id);
        let mut result = format!("{} ", self.module_name);
        let mut append_connections =
            |out: &mut String,
             connections: &[Connection],
             e: &mut Emitter|
             -> StrataResult<()> {
                let mut parts = Vec::with_capacity(connections.len());
                for connection in connections {
                    parts.push(format!(
                        ".{}({})",
                        connection.port_name,
                        connection.expression.emit(e)?
                    ));
                    e.increase(1);
                }
                out.push_str(&parts.join(",\n  "));
                Ok(())
            };
        if !self.parameters.is_empty() {
            result.push_str("#(\n  ");
            e.increase(1);
            append_connections(&mut result, &self.parameters, e)?;
            result.push_str("\n) ");
        }
        result.push_str(&format!("{} (\n  ", self.instance_name));
        e.increase(1);
        append_connections(&mut result, &self.connections, e)?;
        result.push_str("\n)");
        result.push(';');
        e.end(self.id);
        Ok(result)
    }
}

/// `parameter NAME = value;`
#[derive(Clone, Debug)]
pub struct Parameter {
    id: VastNodeId,
    pub name: Id,
    pub rhs: Expression,
}

impl Parameter {
    pub fn new(name: Id, rhs: Expression) -> Parameter {
        Parameter {
            id: VastNodeId::next(),
            name,
            rhs,
        }
    }

    pub(crate) fn emit(&self, e: &mut Emitter) -> StrataResult<String> {
        e.start(self.id);
        let result =
            format!("parameter {} = {};", self.name, self.rhs.emit(e)?);
        e.end(self.id);
        Ok(result)
    }
}

/// `localparam A = 1, B = 2;`
#[derive(Clone, Debug)]
pub struct LocalParam {
    id: VastNodeId,
    items: Vec<(Id, Expression)>,
}

impl Default for LocalParam {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalParam {
    pub fn new() -> LocalParam {
        LocalParam {
            id: VastNodeId::next(),
            items: Vec::new(),
        }
    }

    /// Adds an item and returns a reference expression to it.
    pub fn add_item(&mut self, name: Id, value: Expression) -> Expression {
        self.items.push((name, value));
        Expression::param_ref(name)
    }

    pub(crate) fn emit(&self, e: &mut Emitter) -> StrataResult<String> {
        e.start(self.id);
        let mut result = "localparam".to_string();
        if self.items.len() == 1 {
            let (name, value) = &self.items[0];
            result.push_str(&format!(" {} = {};", name, value.emit(e)?));
            e.end(self.id);
            return Ok(result);
        }
        result.push_str("\n  ");
        e.increase(1);
        let mut parts = Vec::with_capacity(self.items.len());
        for (name, value) in &self.items {
            parts.push(format!("{} = {}", name, value.emit(e)?));
            e.increase(1);
        }
        result.push_str(&parts.join(",\n  "));
        result.push(';');
        if self.items.len() > 1 {
            // The join emits a fencepost fewer newlines than items.
            e.increase(-1);
        }
        e.end(self.id);
        Ok(result)
    }
}

/// `assign lhs = rhs;`
#[derive(Clone, Debug)]
pub struct ContinuousAssignment {
    id: VastNodeId,
    pub lhs: Expression,
    pub rhs: Expression,
}

impl ContinuousAssignment {
    pub fn new(lhs: Expression, rhs: Expression) -> ContinuousAssignment {
        ContinuousAssignment {
            id: VastNodeId::next(),
            lhs,
            rhs,
        }
    }

    pub(crate) fn emit(&self, e: &mut Emitter) -> StrataResult<String> {
        e.start(self.id);
        let lhs = self.lhs.emit(e)?;
        let rhs = self.rhs.emit(e)?;
        e.end(self.id);
        Ok(format!("assign {} = {};", lhs, rhs))
    }
}

/// `function automatic [W-1:0] name (input ...); ... endfunction`
#[derive(Clone, Debug)]
pub struct VerilogFunction {
    id: VastNodeId,
    name: Id,
    return_value_def: RRC<Def>,
    argument_defs: Vec<RRC<Def>>,
    pub statements: StatementBlock,
}

impl VerilogFunction {
    pub fn new(name: Id, result_type: DataType) -> VerilogFunction {
        VerilogFunction {
            id: VastNodeId::next(),
            name,
            return_value_def: rrc(Def::new(name, DataKind::Reg, result_type)),
            argument_defs: Vec::new(),
            statements: StatementBlock::new(),
        }
    }

    pub fn name(&self) -> Id {
        self.name
    }

    pub fn add_argument(&mut self, name: Id, ty: DataType) -> Expression {
        self.argument_defs.push(rrc(Def::new(name, DataKind::Reg, ty)));
        Expression::reference(self.argument_defs.last().unwrap())
    }

    /// Reference to the function's return variable (assign it to return).
    pub fn return_value_ref(&self) -> Expression {
        Expression::reference(&self.return_value_def)
    }

    pub(crate) fn emit(&self, e: &mut Emitter) -> StrataResult<String> {
        e.start(self.id);
        let return_type = self
            .return_value_def
            .borrow()
            .data_type
            .emit_with_identifier(e, self.name.as_ref())?;
        let mut parameters = Vec::with_capacity(self.argument_defs.len());
        for def in &self.argument_defs {
            parameters.push(format!("input {}", def.borrow().emit_no_semi(e)?));
        }
        e.increase(1);
        let body = self.statements.emit(e)?;
        e.increase(1);
        e.end(self.id);
        Ok(format!(
            "function automatic{} ({});\n{}\nendfunction",
            return_type,
            parameters.join(", "),
            indent(&body)
        ))
    }
}

#[derive(Clone, Debug)]
pub enum ModuleMember {
    Def(RRC<Def>),
    Parameter(Parameter),
    LocalParam(LocalParam),
    ContinuousAssignment(ContinuousAssignment),
    Instantiation(Instantiation),
    Always(Always),
    AlwaysComb(AlwaysComb),
    AlwaysFf(AlwaysFf),
    AlwaysFlop(AlwaysFlop),
    Initial(Initial),
    VerilogFunction(VerilogFunction),
    Assert(Assert),
    Cover(Cover),
    Comment(Comment),
    BlankLine(BlankLine),
    InlineStatement(InlineVerilogStatement),
    Section(ModuleSection),
}

impl ModuleMember {
    fn emit(&self, e: &mut Emitter) -> StrataResult<String> {
        match self {
            ModuleMember::Def(def) => def.borrow().emit(e),
            ModuleMember::Parameter(p) => p.emit(e),
            ModuleMember::LocalParam(p) => p.emit(e),
            ModuleMember::ContinuousAssignment(a) => a.emit(e),
            ModuleMember::Instantiation(i) => i.emit(e),
            ModuleMember::Always(a) => a.emit(e),
            ModuleMember::AlwaysComb(a) => a.emit(e),
            ModuleMember::AlwaysFf(a) => a.emit(e),
            ModuleMember::AlwaysFlop(a) => a.emit(e),
            ModuleMember::Initial(i) => i.emit(e),
            ModuleMember::VerilogFunction(f) => f.emit(e),
            ModuleMember::Assert(a) => a.emit(e),
            ModuleMember::Cover(c) => c.emit(e),
            ModuleMember::Comment(c) => c.emit(e),
            ModuleMember::BlankLine(b) => b.emit(e),
            ModuleMember::InlineStatement(s) => s.emit(e),
            ModuleMember::Section(s) => s.emit(e),
        }
    }
}

/// A recursive, ordered container of module members. Sections exist so
/// builders can append related declarations together (e.g. all pipeline
/// registers of one stage) regardless of construction order.
#[derive(Clone, Debug)]
pub struct ModuleSection {
    id: VastNodeId,
    members: Vec<ModuleMember>,
}

impl Default for ModuleSection {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleSection {
    pub fn new() -> ModuleSection {
        ModuleSection {
            id: VastNodeId::next(),
            members: Vec::new(),
        }
    }

    pub fn add(&mut self, member: ModuleMember) {
        self.members.push(member);
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub(crate) fn emit(&self, e: &mut Emitter) -> StrataResult<String> {
        e.start(self.id);
        let mut elements = Vec::new();
        for member in &self.members {
            if let ModuleMember::Section(section) = member {
                if section.is_empty() {
                    continue;
                }
            }
            elements.push(member.emit(e)?);
            e.increase(1);
        }
        if !elements.is_empty() {
            e.increase(-1);
        }
        e.end(self.id);
        Ok(elements.join("\n"))
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Direction {
    Input,
    Output,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Input => write!(f, "input"),
            Direction::Output => write!(f, "output"),
        }
    }
}

/// A module port: direction plus the wire definition it declares.
#[derive(Clone, Debug)]
pub struct Port {
    pub direction: Direction,
    pub def: RRC<Def>,
}

#[derive(Clone, Debug)]
pub struct Module {
    id: VastNodeId,
    name: Id,
    attributes: Vec<String>,
    ports: Vec<Port>,
    top: ModuleSection,
}

impl Module {
    pub fn new<S: Into<Id>>(name: S) -> Module {
        Module {
            id: VastNodeId::next(),
            name: name.into(),
            attributes: Vec::new(),
            ports: Vec::new(),
            top: ModuleSection::new(),
        }
    }

    pub fn name(&self) -> Id {
        self.name
    }

    pub fn add_attribute(&mut self, attribute: &str) {
        self.attributes.push(attribute.to_string());
    }

    fn add_port_def(&mut self, direction: Direction, def: Def) -> Expression {
        self.ports.push(Port {
            direction,
            def: rrc(def),
        });
        Expression::reference(&self.ports.last().unwrap().def)
    }

    pub fn add_input(&mut self, name: Id, ty: DataType) -> Expression {
        self.add_port_def(Direction::Input, Def::new(name, DataKind::Wire, ty))
    }

    pub fn add_output(&mut self, name: Id, ty: DataType) -> Expression {
        self.add_port_def(Direction::Output, Def::new(name, DataKind::Wire, ty))
    }

    pub fn ports(&self) -> &[Port] {
        &self.ports
    }

    /// Declares a wire in the module body and returns a reference to it.
    pub fn add_wire(&mut self, name: Id, ty: DataType) -> Expression {
        let def = rrc(Def::new(name, DataKind::Wire, ty));
        let reference = Expression::reference(&def);
        self.top.add(ModuleMember::Def(def));
        reference
    }

    pub fn add_reg(
        &mut self,
        name: Id,
        ty: DataType,
        init: Option<Expression>,
    ) -> Expression {
        let mut def = Def::new(name, DataKind::Reg, ty);
        def.init = init;
        let def = rrc(def);
        let reference = Expression::reference(&def);
        self.top.add(ModuleMember::Def(def));
        reference
    }

    pub fn add_parameter(&mut self, name: Id, rhs: Expression) -> Expression {
        self.top.add(ModuleMember::Parameter(Parameter::new(name, rhs)));
        Expression::param_ref(name)
    }

    pub fn add_member(&mut self, member: ModuleMember) {
        self.top.add(member);
    }

    pub(crate) fn emit(&self, e: &mut Emitter) -> StrataResult<String> {
        e.start(self.id);
        let mut result = String::new();
        if !self.attributes.is_empty() {
            result.push_str(&format!("(* {} *)\n", self.attributes.join(", ")));
            e.increase(1);
        }
        result.push_str(&format!("module {}", self.name));
        if self.ports.is_empty() {
            result.push_str(";\n");
            e.increase(1);
        } else {
            result.push_str("(\n  ");
            e.increase(1);
            let mut port_strs = Vec::with_capacity(self.ports.len());
            for port in &self.ports {
                port_strs.push(format!(
                    "{} {}",
                    port.direction,
                    port.def.borrow().emit_no_semi(e)?
                ));
                e.increase(1);
            }
            result.push_str(&port_strs.join(",\n  "));
            result.push_str("\n);\n");
            e.increase(1);
        }
        result.push_str(&indent(&self.top.emit(e)?));
        result.push('\n');
        e.increase(1);
        result.push_str("endmodule");
        e.end(self.id);
        Ok(result)
    }
}

/* ========================= Files ========================= */

#[derive(Clone, Debug)]
pub struct Include {
    id: VastNodeId,
    path: String,
}

impl Include {
    pub fn new(path: &str) -> Include {
        Include {
            id: VastNodeId::next(),
            path: path.to_string(),
        }
    }

    pub(crate) fn emit(&self, e: &mut Emitter) -> StrataResult<String> {
        e.start(self.id);
        e.end(self.id);
        Ok(format!("`include \"{}\"", self.path))
    }
}

#[derive(Clone, Debug)]
pub enum FileMember {
    Module(Module),
    Include(Include),
    BlankLine(BlankLine),
    Comment(Comment),
}

impl FileMember {
    /// The line-map identity of this member.
    pub fn id(&self) -> VastNodeId {
        match self {
            FileMember::Module(m) => m.id,
            FileMember::Include(i) => i.id,
            FileMember::BlankLine(b) => b.id,
            FileMember::Comment(c) => c.id,
        }
    }

    fn emit(&self, e: &mut Emitter) -> StrataResult<String> {
        match self {
            FileMember::Module(m) => m.emit(e),
            FileMember::Include(i) => i.emit(e),
            FileMember::BlankLine(b) => b.emit(e),
            FileMember::Comment(c) => c.emit(e),
        }
    }
}

/// An entire Verilog source file: includes, comments, blank lines, and
/// modules, emitted in order.
#[derive(Clone, Debug, Default)]
pub struct VerilogFile {
    use_system_verilog: bool,
    members: Vec<FileMember>,
}

impl VerilogFile {
    /// A Verilog-2005 file.
    pub fn new() -> VerilogFile {
        VerilogFile::default()
    }

    /// A SystemVerilog file: enables `always_comb`/`always_ff`, size-only
    /// unpacked dims, and assignment patterns.
    pub fn system_verilog() -> VerilogFile {
        VerilogFile {
            use_system_verilog: true,
            members: Vec::new(),
        }
    }

    pub fn use_system_verilog(&self) -> bool {
        self.use_system_verilog
    }

    pub fn add_member(&mut self, member: FileMember) -> &mut FileMember {
        self.members.push(member);
        self.members.last_mut().unwrap()
    }

    pub fn add_module(&mut self, module: Module) -> &Module {
        self.members.push(FileMember::Module(module));
        let Some(FileMember::Module(module)) = self.members.last() else {
            unreachable!()
        };
        module
    }

    pub fn members(&self) -> &[FileMember] {
        &self.members
    }

    /// Render the file. Pass a [`LineInfo`] to also receive the node →
    /// line-span map.
    pub fn emit(
        &self,
        line_info: Option<&mut LineInfo>,
    ) -> StrataResult<String> {
        let mut e = Emitter {
            use_system_verilog: self.use_system_verilog,
            line_info,
        };
        let mut out = String::new();
        for member in &self.members {
            out.push_str(&member.emit(&mut e)?);
            out.push('\n');
            e.increase(1);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emit_expr(expr: &Expression) -> String {
        let mut e = Emitter {
            use_system_verilog: false,
            line_info: None,
        };
        expr.emit(&mut e).unwrap()
    }

    fn wire(name: &str, bit_count: u64) -> RRC<Def> {
        rrc(Def::new(
            Id::new(name),
            DataKind::Wire,
            DataType::bit_vector(bit_count, false),
        ))
    }

    #[test]
    fn literal_formats() {
        assert_eq!(
            emit_expr(&Expression::literal_u64(
                0xa5,
                12,
                FormatPreference::Hex
            )),
            "12'h0a5"
        );
        assert_eq!(
            emit_expr(&Expression::literal_u64(
                0xa5,
                12,
                FormatPreference::Binary
            )),
            "12'b000010100101"
        );
        assert_eq!(
            emit_expr(&Expression::literal_u64(
                165,
                8,
                FormatPreference::UnsignedDecimal
            )),
            "8'd165"
        );
        assert_eq!(emit_expr(&Expression::plain_literal(42)), "42");
        assert_eq!(emit_expr(&Expression::x_sentinel(16)), "16'dx");
        assert_eq!(
            emit_expr(&Expression::four_value_literal(vec![
                FourValueBit::Zero,
                FourValueBit::One,
                FourValueBit::Unknown,
                FourValueBit::HighZ,
            ])),
            "4'b01X?"
        );
    }

    #[test]
    fn identifier_sanitization() {
        assert_eq!(sanitize_identifier(""), "_");
        assert_eq!(sanitize_identifier("9lives"), "_9lives");
        assert_eq!(sanitize_identifier("foo bar!"), "foo_bar_");
        assert_eq!(sanitize_identifier("ok_name3"), "ok_name3");
        // Deterministic: same input, same output.
        assert_eq!(
            sanitize_identifier("a.b.c"),
            sanitize_identifier("a.b.c")
        );
    }

    #[test]
    fn binary_precedence_and_associativity() {
        let a = wire("a", 8);
        let b = wire("b", 8);
        let c = wire("c", 8);
        let r = |d: &RRC<Def>| Expression::reference(d);

        // Higher precedence on the rhs needs no parens.
        assert_eq!(
            emit_expr(&Expression::add(
                r(&a),
                Expression::mul(r(&b), r(&c))
            )),
            "a + b * c"
        );
        // Lower precedence on the lhs is wrapped.
        assert_eq!(
            emit_expr(&Expression::mul(
                Expression::add(r(&a), r(&b)),
                r(&c)
            )),
            "(a + b) * c"
        );
        // Left-to-right associativity: equal precedence on the rhs wraps.
        assert_eq!(
            emit_expr(&Expression::sub(
                r(&a),
                Expression::sub(r(&b), r(&c))
            )),
            "a - (b - c)"
        );
        assert_eq!(
            emit_expr(&Expression::sub(
                Expression::sub(r(&a), r(&b)),
                r(&c)
            )),
            "a - b - c"
        );
    }

    #[test]
    fn reductions_and_nested_unaries_are_wrapped() {
        let a = wire("a", 8);
        let b = wire("b", 8);
        let r = |d: &RRC<Def>| Expression::reference(d);

        assert_eq!(
            emit_expr(&Expression::logical_or(
                Expression::or_reduce(r(&a)),
                Expression::or_reduce(r(&b))
            )),
            "(|a) || (|b)"
        );
        assert_eq!(
            emit_expr(&Expression::bitwise_not(Expression::bitwise_not(
                r(&a)
            ))),
            "~(~a)"
        );
    }

    #[test]
    fn ternary_children_are_wrapped_at_equal_precedence() {
        let a = wire("a", 1);
        let b = wire("b", 8);
        let c = wire("c", 8);
        let d = wire("d", 8);
        let r = |x: &RRC<Def>| Expression::reference(x);
        let inner = Expression::ternary(r(&a), r(&c), r(&d));
        assert_eq!(
            emit_expr(&Expression::ternary(r(&a), r(&b), inner)),
            "a ? b : (a ? c : d)"
        );
    }

    #[test]
    fn scalar_index_and_slice_are_elided() {
        let scalar = rrc(Def::new(
            Id::new("r"),
            DataKind::Wire,
            DataType::scalar(),
        ));
        let zero = Expression::plain_literal(0);
        assert_eq!(
            emit_expr(&Expression::index(
                Expression::reference(&scalar),
                zero.clone()
            )),
            "r"
        );
        assert_eq!(
            emit_expr(&Expression::slice(
                Expression::reference(&scalar),
                zero.clone(),
                zero
            )),
            "r"
        );
        let mut e = Emitter {
            use_system_verilog: false,
            line_info: None,
        };
        let err = Expression::index(
            Expression::reference(&scalar),
            Expression::plain_literal(1),
        )
        .emit(&mut e)
        .unwrap_err();
        assert!(err.is_unsupported());
    }

    #[test]
    fn slice_and_part_select_of_vectors() {
        let v = wire("v", 16);
        assert_eq!(
            emit_expr(&Expression::slice(
                Expression::reference(&v),
                Expression::plain_literal(7),
                Expression::plain_literal(4)
            )),
            "v[7:4]"
        );
        assert_eq!(
            emit_expr(&Expression::part_select(
                Expression::reference(&v),
                Expression::plain_literal(8),
                Expression::plain_literal(4)
            )),
            "v[8 +: 4]"
        );
    }

    #[test]
    fn data_type_emission() {
        let mut e = Emitter {
            use_system_verilog: false,
            line_info: None,
        };
        assert_eq!(
            DataType::bit_vector(8, false)
                .emit_with_identifier(&mut e, "foo")
                .unwrap(),
            " [7:0] foo"
        );
        assert_eq!(
            DataType::scalar().emit_with_identifier(&mut e, "foo").unwrap(),
            " foo"
        );
        assert_eq!(
            DataType::bit_vector(8, true)
                .emit_with_identifier(&mut e, "foo")
                .unwrap(),
            " signed [7:0] foo"
        );
        // One-bit packed array elements are forced to a bitvector type so
        // indexing stays legal.
        assert_eq!(
            DataType::packed_array(1, &[42], false)
                .emit_with_identifier(&mut e, "foo")
                .unwrap(),
            " [0:0][41:0] foo"
        );
        assert_eq!(
            DataType::unpacked_array(8, &[42])
                .emit_with_identifier(&mut e, "foo")
                .unwrap(),
            " [7:0] foo[0:41]"
        );
        let mut sv = Emitter {
            use_system_verilog: true,
            line_info: None,
        };
        assert_eq!(
            DataType::unpacked_array(8, &[42])
                .emit_with_identifier(&mut sv, "foo")
                .unwrap(),
            " [7:0] foo[42]"
        );
        assert_eq!(
            DataType::packed_array(4, &[3, 2], false)
                .flat_bit_count_as_u64()
                .unwrap(),
            24
        );
    }

    #[test]
    fn module_emission() {
        let mut file = VerilogFile::new();
        let mut module = Module::new("top");
        module.add_input(Id::new("clk"), DataType::scalar());
        let a = module.add_input(Id::new("a"), DataType::bit_vector(8, false));
        let out =
            module.add_output(Id::new("out"), DataType::bit_vector(8, false));
        let sum =
            module.add_wire(Id::new("sum"), DataType::bit_vector(8, false));
        module.add_member(ModuleMember::ContinuousAssignment(
            ContinuousAssignment::new(sum.clone(), a),
        ));
        module.add_member(ModuleMember::ContinuousAssignment(
            ContinuousAssignment::new(out, sum),
        ));
        file.add_module(module);

        let text = file.emit(None).unwrap();
        assert_eq!(
            text,
            "module top(\n  \
               input wire clk,\n  \
               input wire [7:0] a,\n  \
               output wire [7:0] out\n\
             );\n  \
               wire [7:0] sum;\n  \
               assign sum = a;\n  \
               assign out = sum;\n\
             endmodule\n"
        );
    }

    #[test]
    fn always_flop_with_async_active_low_reset() {
        let clk = wire("clk", 1);
        let rst_n = wire("rst_n", 1);
        let acc = wire("acc", 8);
        let acc_next = wire("acc_next", 8);
        let mut flop = AlwaysFlop::new_with_reset(
            Expression::reference(&clk),
            Reset {
                signal: Expression::reference(&rst_n),
                asynchronous: true,
                active_low: true,
            },
        );
        flop.add_register(
            Expression::reference(&acc),
            Expression::reference(&acc_next),
            Some(Expression::literal_u64(0, 8, FormatPreference::Hex)),
        );
        let mut e = Emitter {
            use_system_verilog: false,
            line_info: None,
        };
        assert_eq!(
            flop.emit(&mut e).unwrap(),
            "always @ (posedge clk or negedge rst_n) begin\n  \
               if (!rst_n) begin\n    \
                 acc <= 8'h00;\n  \
               end else begin\n    \
                 acc <= acc_next;\n  \
               end\n\
             end"
        );
    }

    #[test]
    fn always_flop_without_reset() {
        let clk = wire("clk", 1);
        let q = wire("q", 4);
        let d = wire("d", 4);
        let mut flop = AlwaysFlop::new(Expression::reference(&clk));
        flop.add_register(
            Expression::reference(&q),
            Expression::reference(&d),
            None,
        );
        let mut e = Emitter {
            use_system_verilog: false,
            line_info: None,
        };
        assert_eq!(
            flop.emit(&mut e).unwrap(),
            "always @ (posedge clk) begin\n  q <= d;\nend"
        );
    }

    #[test]
    fn instantiation_emission() {
        let x = wire("x", 8);
        let y = wire("y", 8);
        let inst = Instantiation::new(
            Id::new("adder"),
            Id::new("adder_inst"),
            vec![Connection {
                port_name: Id::new("W"),
                expression: Expression::plain_literal(8),
            }],
            vec![
                Connection {
                    port_name: Id::new("lhs"),
                    expression: Expression::reference(&x),
                },
                Connection {
                    port_name: Id::new("out"),
                    expression: Expression::reference(&y),
                },
            ],
        );
        let mut e = Emitter {
            use_system_verilog: false,
            line_info: None,
        };
        assert_eq!(
            inst.emit(&mut e).unwrap(),
            "adder #(\n  \
               .W(8)\n\
             ) adder_inst (\n  \
               .lhs(x),\n  \
               .out(y)\n\
             );"
        );
    }

    #[test]
    fn sv_only_constructs_rejected_in_verilog_2005() {
        let mut file = VerilogFile::new();
        let mut module = Module::new("m");
        module.add_member(ModuleMember::AlwaysComb(AlwaysComb::new()));
        file.add_module(module);
        assert!(file.emit(None).unwrap_err().is_unsupported());

        let mut sv_file = VerilogFile::system_verilog();
        let mut module = Module::new("m");
        module.add_member(ModuleMember::AlwaysComb(AlwaysComb::new()));
        sv_file.add_module(module);
        assert!(sv_file.emit(None).unwrap().contains("always_comb"));
    }

    #[test]
    fn line_map_partitions_the_file() {
        let mut file = VerilogFile::new();
        file.add_member(FileMember::Comment(Comment::new("generated")));
        file.add_member(FileMember::BlankLine(BlankLine::new()));
        let mut module = Module::new("top");
        module.add_input(Id::new("clk"), DataType::scalar());
        let a = module.add_input(Id::new("a"), DataType::bit_vector(8, false));
        let out =
            module.add_output(Id::new("out"), DataType::bit_vector(8, false));
        let sum =
            module.add_wire(Id::new("sum"), DataType::bit_vector(8, false));
        module.add_member(ModuleMember::ContinuousAssignment(
            ContinuousAssignment::new(sum.clone(), a),
        ));
        module.add_member(ModuleMember::ContinuousAssignment(
            ContinuousAssignment::new(out, sum),
        ));
        file.add_module(module);

        let mut line_info = LineInfo::new();
        let text = file.emit(Some(&mut line_info)).unwrap();
        let total_lines = text.matches('\n').count() as i64;

        let mut next_expected = 0;
        for member in file.members() {
            let spans = line_info.lookup(member.id()).unwrap();
            assert_eq!(spans.len(), 1);
            assert_eq!(spans[0].start_line, next_expected);
            assert!(spans[0].end_line >= spans[0].start_line);
            next_expected = spans[0].end_line + 1;
        }
        assert_eq!(next_expected, total_lines);
    }

    #[test]
    fn case_statement_emission() {
        let sel = wire("sel", 2);
        let out = wire("out", 8);
        let a = wire("a", 8);
        let mut case = Case::new(Expression::reference(&sel));
        case.add_arm(CaseLabel::Expr(Expression::literal_u64(
            0,
            2,
            FormatPreference::Binary,
        )))
        .add_blocking(
            Expression::reference(&out),
            Expression::reference(&a),
        );
        case.add_arm(CaseLabel::Default).add_blocking(
            Expression::reference(&out),
            Expression::x_sentinel(8),
        );
        let mut e = Emitter {
            use_system_verilog: false,
            line_info: None,
        };
        assert_eq!(
            case.emit(&mut e).unwrap(),
            "case (sel)\n  \
               2'b00: begin\n    \
                 out = a;\n  \
               end\n  \
               default: begin\n    \
                 out = 8'dx;\n  \
               end\n\
             endcase"
        );
    }
}
