//! IL instructions.
//!
//! Instructions are the statement-level atoms CFG nodes carry. The set is
//! deliberately small: lowering has already flattened nested calls into
//! temporaries, so every call site is its own instruction.

use serde::{Deserialize, Serialize};

use super::expr::{Expr, Lval};
use super::location::Range;

/// Instruction kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrKind {
    /// `lval = rhs`
    Assign { lval: Lval, rhs: Expr },
    /// `lval = <function literal>`; closures are opaque to the engine.
    AssignAnon { lval: Lval },
    /// `ret = func(args…)`; `func` may be a plain name or a method-style
    /// l-value (`obj.m`).
    Call {
        ret: Option<Lval>,
        func: Expr,
        args: Vec<Expr>,
    },
    /// `ret = new T(args…)`; `ctor` is the constructor callee when resolved.
    New {
        ret: Lval,
        ctor: Option<Expr>,
        args: Vec<Expr>,
    },
    /// Language-special call (yield, spread, await, …): conservative
    /// argument-taint union, no callee to resolve.
    CallSpecial { ret: Option<Lval>, args: Vec<Expr> },
    /// Lowering placeholder.
    Fixme,
}

/// An instruction with its source range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instr {
    pub kind: InstrKind,
    pub range: Range,
}

impl Instr {
    /// Create a new instruction.
    #[inline]
    pub fn new(kind: InstrKind, range: Range) -> Self {
        Self { kind, range }
    }

    /// The l-value this instruction writes, if any.
    pub fn written_lval(&self) -> Option<&Lval> {
        match &self.kind {
            InstrKind::Assign { lval, .. } | InstrKind::AssignAnon { lval } => Some(lval),
            InstrKind::Call { ret, .. } | InstrKind::CallSpecial { ret, .. } => ret.as_ref(),
            InstrKind::New { ret, .. } => Some(ret),
            InstrKind::Fixme => None,
        }
    }
}
