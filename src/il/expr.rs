//! IL expressions and l-values.
//!
//! The IL is the already-lowered form of the analyzed function: a small
//! expression language with explicit l-values. Lowering from source ASTs
//! happens upstream and is out of scope here; tests construct IL by hand.
//!
//! # L-values
//!
//! An l-value is an addressable storage path `base.off₁.off₂…`. The base is
//! a local variable, `this`, or a global; offsets are field accesses and
//! index accesses. Each offset carries the *cumulative* source range of the
//! l-value up to and including that offset, so every prefix of an l-value
//! is itself a rangeable node that sources/sinks/sanitizers can match.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::instr::Instr;
use super::location::Range;

// =============================================================================
// Names and l-value bases
// =============================================================================

/// A resolved identifier.
///
/// `sid` is a per-function unique id distinguishing shadowed bindings of the
/// same identifier; lowering assigns it.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Name {
    pub ident: String,
    pub sid: u32,
}

impl Name {
    /// Create a new name.
    #[inline]
    pub fn new(ident: impl Into<String>, sid: u32) -> Self {
        Self {
            ident: ident.into(),
            sid,
        }
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ident)
    }
}

/// Root of an l-value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Base {
    /// Local variable (or parameter).
    Var(Name),
    /// The receiver object of the enclosing method.
    This,
    /// A global (or module-level) variable.
    Global(Name),
}

impl Base {
    /// The name under which this base is tracked in the environment.
    pub fn tracked_name(&self) -> Name {
        match self {
            Base::Var(n) => n.clone(),
            // `this` is a reserved name; sid 0 cannot collide with locals
            // because lowering starts local sids at 1.
            Base::This => Name::new("this", 0),
            Base::Global(n) => n.clone(),
        }
    }
}

// =============================================================================
// Offsets
// =============================================================================

/// One step of an l-value path, IL side (ranges and index expressions kept).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Offset {
    /// Field access `x.fld`.
    Dot(Name),
    /// Constant string key `x["key"]`.
    StrKey(String),
    /// Constant integer key `x[3]`.
    IntKey(i64),
    /// Computed index `x[i]`; the index expression is analyzed for taint,
    /// the store location degrades to the whole container.
    Idx(Box<Expr>),
}

/// An offset plus the cumulative range of the l-value ending at it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OffsetItem {
    pub off: Offset,
    /// Range of `base.off₁…offᵢ` (not of the offset alone).
    pub range: Range,
}

// =============================================================================
// L-values
// =============================================================================

/// An addressable storage path `base.off₁.off₂…`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lval {
    pub base: Base,
    pub offsets: Vec<OffsetItem>,
    /// Range of the base alone.
    pub base_range: Range,
}

impl Lval {
    /// A bare variable l-value.
    #[inline]
    pub fn var(name: Name, range: Range) -> Self {
        Self {
            base: Base::Var(name),
            offsets: Vec::new(),
            base_range: range,
        }
    }

    /// Extend with a field offset.
    pub fn dot(mut self, name: Name, range: Range) -> Self {
        self.offsets.push(OffsetItem {
            off: Offset::Dot(name),
            range,
        });
        self
    }

    /// Range of the whole l-value.
    #[inline]
    pub fn range(&self) -> Range {
        self.offsets.last().map_or(self.base_range, |o| o.range)
    }

    /// The l-value truncated to its first `n` offsets.
    pub fn prefix(&self, n: usize) -> Lval {
        Lval {
            base: self.base.clone(),
            offsets: self.offsets[..n].to_vec(),
            base_range: self.base_range,
        }
    }

    /// The receiver of a method-style l-value (`obj.m` → `obj`), if any.
    pub fn receiver(&self) -> Option<Lval> {
        if self.offsets.is_empty() {
            None
        } else {
            Some(self.prefix(self.offsets.len() - 1))
        }
    }

    /// Name of the final `Dot` offset, if the l-value ends in one.
    pub fn last_dot_name(&self) -> Option<&Name> {
        match self.offsets.last().map(|o| &o.off) {
            Some(Offset::Dot(n)) => Some(n),
            _ => None,
        }
    }
}

// =============================================================================
// Expressions
// =============================================================================

/// Literal values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Literal {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Null,
}

/// Operators. Only the distinction the engine cares about is encoded:
/// comparison operators may be assumed taint-free via options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Concat,
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    And,
    Or,
    Not,
    BitAnd,
    BitOr,
    BitXor,
    Neg,
}

impl Op {
    /// Comparison operators yield booleans about their operands.
    #[inline]
    pub fn is_comparison(self) -> bool {
        matches!(self, Op::Eq | Op::NotEq | Op::Lt | Op::LtE | Op::Gt | Op::GtE)
    }
}

/// Static type of an expression, where lowering could determine one.
///
/// Feeds the `assume_safe_booleans`/`assume_safe_numbers` taint drops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Bool,
    Int,
    Float,
    Str,
    Other,
}

impl ValueType {
    #[inline]
    pub fn is_numeric(self) -> bool {
        matches!(self, ValueType::Int | ValueType::Float)
    }
}

/// Expression node kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExprKind {
    Lval(Lval),
    Literal(Literal),
    /// N-ary operator application; operands evaluate left to right.
    Operator(Op, Vec<Expr>),
    /// Record/object literal `{ f: e, … }`.
    Record(Vec<(String, Expr)>),
    /// Tuple/array literal `(e₀, e₁, …)`.
    Tuple(Vec<Expr>),
    /// Lowering placeholder for constructs the frontend could not express.
    Fixme,
}

/// An IL expression with range and optional static type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    pub kind: ExprKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ty: Option<ValueType>,
    pub range: Range,
}

impl Expr {
    /// Create an untyped expression.
    #[inline]
    pub fn new(kind: ExprKind, range: Range) -> Self {
        Self {
            kind,
            ty: None,
            range,
        }
    }

    /// Create a typed expression.
    #[inline]
    pub fn typed(kind: ExprKind, ty: ValueType, range: Range) -> Self {
        Self {
            kind,
            ty: Some(ty),
            range,
        }
    }

    /// Wrap an l-value as an expression (range taken from the l-value).
    #[inline]
    pub fn of_lval(lval: Lval) -> Self {
        let range = lval.range();
        Self::new(ExprKind::Lval(lval), range)
    }

    /// The l-value form of this expression, if it is one.
    #[inline]
    pub fn as_lval(&self) -> Option<&Lval> {
        match &self.kind {
            ExprKind::Lval(lv) => Some(lv),
            _ => None,
        }
    }
}

// =============================================================================
// AnyNode: the view handed to classification predicates
// =============================================================================

/// Borrowed view of an IL fragment, consumed by the source/sink/sanitizer/
/// propagator predicates. The engine never interprets pattern syntax; it
/// only asks "what matches here" and gets back match records.
#[derive(Debug, Clone, Copy)]
pub enum AnyNode<'a> {
    Lval(&'a Lval),
    Expr(&'a Expr),
    Instr(&'a Instr),
    Name(&'a Name, Range),
}

impl AnyNode<'_> {
    /// Source range of the viewed fragment.
    pub fn range(&self) -> Range {
        match self {
            AnyNode::Lval(lv) => lv.range(),
            AnyNode::Expr(e) => e.range,
            AnyNode::Instr(i) => i.range,
            AnyNode::Name(_, r) => *r,
        }
    }
}
