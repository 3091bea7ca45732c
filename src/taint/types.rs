//! Core taint value types: origins, traces, taint sets, and label formulas.
//!
//! A *taint* is a token recording that a value derives from somewhere
//! interesting. Its origin is one of:
//!
//! - a **source** pattern match, carrying the user-defined label, the call
//!   trace through which the match was imported, and an optional lazy
//!   precondition over labels;
//! - a **polymorphic variable** (`Var`), standing for "whatever the caller
//!   passes through this l-value", the building block of function
//!   summaries;
//! - **control**, for taint that flowed through a control dependency rather
//!   than data.
//!
//! # Set identity
//!
//! Taint sets are keyed by *origin identity*: token trails and call-trace
//! token lists are excluded from equality. This is what makes the fixpoint
//! terminate: trails grow along loops, origins do not.
//!
//! # Token trails
//!
//! `rev_tokens` accumulates the program locations a taint traversed, in
//! reverse. The list is reversed exactly once, at result emission, so the
//! consumer sees chronological order.

use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::il::Range;
use crate::taint::matching::SourceMatch;
use crate::taint::shape::Offset;

/// Maximum offset-path length of a polymorphic taint.
///
/// Bounds the growth of `Var` origins under recursive field chains
/// (`x = x.getX()` loops) and thereby the height of the taint lattice.
pub const MAX_POLY_OFFSET: usize = 2;

/// Label given to sources whose rule does not declare one.
pub const DEFAULT_LABEL: &str = "__default__";

// =============================================================================
// Label formulas
// =============================================================================

/// Boolean formula over taint labels.
///
/// Sinks (and label-transition sources and propagators) constrain the
/// labels of incoming taint with these; resolution is lazy and
/// three-valued, see [`solve_precondition`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelReq {
    Label(String),
    And(Vec<LabelReq>),
    Or(Vec<LabelReq>),
    Not(Box<LabelReq>),
    Bool(bool),
}

impl LabelReq {
    /// Require a single label.
    #[inline]
    pub fn label(name: impl Into<String>) -> Self {
        LabelReq::Label(name.into())
    }

    /// Conjunction.
    #[inline]
    pub fn and(reqs: Vec<LabelReq>) -> Self {
        LabelReq::And(reqs)
    }

    /// Disjunction.
    #[inline]
    pub fn or(reqs: Vec<LabelReq>) -> Self {
        LabelReq::Or(reqs)
    }

    /// Negation.
    #[inline]
    pub fn not(req: LabelReq) -> Self {
        LabelReq::Not(Box::new(req))
    }
}

// =============================================================================
// Call traces
// =============================================================================

/// Linear history of traversed call sites.
///
/// `Direct` wraps the pattern match itself; every interprocedural hop wraps
/// the trace in a `Call` frame recording the call site and the token trail
/// accumulated inside the callee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallTrace<T> {
    Direct(T),
    Call {
        call_site: Range,
        tokens: Vec<Range>,
        inner: Box<CallTrace<T>>,
    },
}

impl<T> CallTrace<T> {
    /// The innermost pattern match.
    pub fn pm(&self) -> &T {
        match self {
            CallTrace::Direct(pm) => pm,
            CallTrace::Call { inner, .. } => inner.pm(),
        }
    }

    /// Number of `Call` frames.
    pub fn depth(&self) -> usize {
        match self {
            CallTrace::Direct(_) => 0,
            CallTrace::Call { inner, .. } => 1 + inner.depth(),
        }
    }
}

// =============================================================================
// Origins and taints
// =============================================================================

/// Lazily-resolved requirement attached to a source taint: the taints that
/// were present when the source matched, and the formula they must satisfy
/// for the source's label to be active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Precondition {
    pub taints: Vec<Taint>,
    pub req: LabelReq,
}

/// A taint traced back to a user-specified source pattern.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceOrigin {
    pub call_trace: CallTrace<SourceMatch>,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub precondition: Option<Box<Precondition>>,
}

impl SourceOrigin {
    /// Range of the underlying pattern match.
    #[inline]
    pub fn pm_range(&self) -> Range {
        self.call_trace.pm().range
    }
}

/// Polymorphic l-value a `Var` taint stands for: a function input reachable
/// from an argument position, the receiver, or a global, plus a bounded
/// offset path.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct SigLval {
    pub base: SigBase,
    pub offsets: Vec<Offset>,
}

impl SigLval {
    /// Polymorphic argument at `index`.
    #[inline]
    pub fn arg(index: usize) -> Self {
        Self {
            base: SigBase::Arg { index, name: None },
            offsets: Vec::new(),
        }
    }

    /// Extend with an offset.
    pub fn with_offset(mut self, off: Offset) -> Self {
        self.offsets.push(off);
        self
    }
}

impl fmt::Display for SigLval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.base {
            SigBase::Arg { index, name: Some(n) } => write!(f, "arg({n}@{index})")?,
            SigBase::Arg { index, name: None } => write!(f, "arg({index})")?,
            SigBase::This => write!(f, "this")?,
            SigBase::Global(n) => write!(f, "global({n})")?,
        }
        for off in &self.offsets {
            write!(f, ".{off}")?;
        }
        Ok(())
    }
}

/// Base of a polymorphic l-value.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SigBase {
    Arg { index: usize, name: Option<String> },
    This,
    Global(String),
}

/// Origin of a taint token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Source(SourceOrigin),
    Var(SigLval),
    Control,
}

impl Origin {
    /// Identity comparison for set membership: ignores token trails and
    /// call-trace depth, so trail growth along loops cannot prevent the
    /// fixpoint from converging.
    pub fn same_origin(&self, other: &Origin) -> bool {
        match (self, other) {
            (Origin::Source(a), Origin::Source(b)) => {
                a.pm_range() == b.pm_range()
                    && a.label == b.label
                    && preconditions_equivalent(a.precondition.as_deref(), b.precondition.as_deref())
            }
            (Origin::Var(a), Origin::Var(b)) => a == b,
            (Origin::Control, Origin::Control) => true,
            _ => false,
        }
    }
}

fn preconditions_equivalent(a: Option<&Precondition>, b: Option<&Precondition>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => {
            a.req == b.req
                && a.taints.len() == b.taints.len()
                && a.taints
                    .iter()
                    .all(|ta| b.taints.iter().any(|tb| ta.same_origin(tb)))
        }
        _ => false,
    }
}

/// A single taint token: origin plus the (reversed) trail of program
/// locations it passed through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Taint {
    pub orig: Origin,
    pub rev_tokens: Vec<Range>,
}

impl Taint {
    /// Taint from a direct source match.
    pub fn src(pm: SourceMatch, precondition: Option<Precondition>) -> Self {
        let label = pm.spec.label.clone();
        Self {
            orig: Origin::Source(SourceOrigin {
                call_trace: CallTrace::Direct(pm),
                label,
                precondition: precondition.map(Box::new),
            }),
            rev_tokens: Vec::new(),
        }
    }

    /// Polymorphic taint for a function input.
    pub fn poly(lval: SigLval) -> Self {
        Self {
            orig: Origin::Var(lval),
            rev_tokens: Vec::new(),
        }
    }

    /// Control-dependency taint.
    pub fn control() -> Self {
        Self {
            orig: Origin::Control,
            rev_tokens: Vec::new(),
        }
    }

    /// Identity comparison; see [`Origin::same_origin`].
    #[inline]
    pub fn same_origin(&self, other: &Taint) -> bool {
        self.orig.same_origin(&other.orig)
    }

    /// Record one more traversed location (prepended; trails are reversed
    /// once at emission).
    pub fn with_token(mut self, tok: Range) -> Self {
        self.rev_tokens.push(tok);
        self
    }

    /// Label of a source taint, if any.
    pub fn label(&self) -> Option<&str> {
        match &self.orig {
            Origin::Source(s) => Some(&s.label),
            _ => None,
        }
    }

    /// Is this a polymorphic (`Var`) or control taint?
    #[inline]
    pub fn is_polymorphic(&self) -> bool {
        matches!(self.orig, Origin::Var(_) | Origin::Control)
    }
}

// =============================================================================
// Taint sets
// =============================================================================

/// A set of taints keyed by origin identity.
///
/// Insertion keeps the *existing* token on an identity collision, which
/// preserves the shortest trail seen and keeps trails stable across
/// fixpoint iterations. Equality is extensional (subset both ways).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaintSet {
    taints: Vec<Taint>,
}

impl TaintSet {
    /// The empty set.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Singleton set.
    pub fn singleton(taint: Taint) -> Self {
        Self {
            taints: vec![taint],
        }
    }

    /// Insert a taint; returns false if an identical origin was present.
    pub fn insert(&mut self, taint: Taint) -> bool {
        if self.taints.iter().any(|t| t.same_origin(&taint)) {
            false
        } else {
            self.taints.push(taint);
            true
        }
    }

    /// In-place union.
    pub fn union_with(&mut self, other: &TaintSet) {
        for t in &other.taints {
            self.insert(t.clone());
        }
    }

    /// Owned union.
    #[must_use]
    pub fn union(mut self, other: &TaintSet) -> TaintSet {
        self.union_with(other);
        self
    }

    /// Set intersection (by origin identity; keeps `self`'s tokens).
    #[must_use]
    pub fn intersection(&self, other: &TaintSet) -> TaintSet {
        TaintSet {
            taints: self
                .taints
                .iter()
                .filter(|t| other.taints.iter().any(|o| o.same_origin(t)))
                .cloned()
                .collect(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.taints.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.taints.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Taint> {
        self.taints.iter()
    }

    #[inline]
    pub fn as_slice(&self) -> &[Taint] {
        &self.taints
    }

    pub fn to_vec(&self) -> Vec<Taint> {
        self.taints.clone()
    }

    /// Map-and-filter over taints, rebuilding the set (drops `None`s and
    /// re-deduplicates).
    #[must_use]
    pub fn filter_map_taints(&self, mut f: impl FnMut(&Taint) -> Option<Taint>) -> TaintSet {
        let mut out = TaintSet::new();
        for t in &self.taints {
            if let Some(t2) = f(t) {
                out.insert(t2);
            }
        }
        out
    }

    /// Does any member have a polymorphic origin?
    pub fn has_polymorphic(&self) -> bool {
        self.taints.iter().any(Taint::is_polymorphic)
    }
}

impl PartialEq for TaintSet {
    fn eq(&self, other: &Self) -> bool {
        self.taints.len() == other.taints.len()
            && self
                .taints
                .iter()
                .all(|t| other.taints.iter().any(|o| o.same_origin(t)))
    }
}

impl Eq for TaintSet {}

impl FromIterator<Taint> for TaintSet {
    fn from_iter<I: IntoIterator<Item = Taint>>(iter: I) -> Self {
        let mut set = TaintSet::new();
        for t in iter {
            set.insert(t);
        }
        set
    }
}

// =============================================================================
// Precondition solving
// =============================================================================

/// Evaluate a label formula against the labels carried by `taints`.
///
/// Three-valued: `Some(true)`/`Some(false)` when the taints decide the
/// formula, `None` when polymorphic taints (or sources with unresolved
/// preconditions of their own) make it undecidable at this program point,
/// and the caller defers resolution to a later substitution.
pub fn solve_precondition(taints: &[Taint], req: &LabelReq) -> Option<bool> {
    let mut definite: FxHashSet<&str> = FxHashSet::default();
    let mut maybe: FxHashSet<&str> = FxHashSet::default();
    let mut has_poly = false;
    for t in taints {
        match &t.orig {
            Origin::Source(s) => match &s.precondition {
                None => {
                    definite.insert(s.label.as_str());
                }
                Some(pre) => match solve_precondition(&pre.taints, &pre.req) {
                    Some(true) => {
                        definite.insert(s.label.as_str());
                    }
                    Some(false) => {}
                    None => {
                        maybe.insert(s.label.as_str());
                    }
                },
            },
            Origin::Var(_) | Origin::Control => has_poly = true,
        }
    }
    eval_req(req, &definite, &maybe, has_poly)
}

fn eval_req(
    req: &LabelReq,
    definite: &FxHashSet<&str>,
    maybe: &FxHashSet<&str>,
    has_poly: bool,
) -> Option<bool> {
    match req {
        LabelReq::Bool(b) => Some(*b),
        LabelReq::Label(l) => {
            if definite.contains(l.as_str()) {
                Some(true)
            } else if maybe.contains(l.as_str()) || has_poly {
                None
            } else {
                Some(false)
            }
        }
        LabelReq::And(reqs) => {
            let mut unknown = false;
            for r in reqs {
                match eval_req(r, definite, maybe, has_poly) {
                    Some(false) => return Some(false),
                    None => unknown = true,
                    Some(true) => {}
                }
            }
            if unknown {
                None
            } else {
                Some(true)
            }
        }
        LabelReq::Or(reqs) => {
            let mut unknown = false;
            for r in reqs {
                match eval_req(r, definite, maybe, has_poly) {
                    Some(true) => return Some(true),
                    None => unknown = true,
                    Some(false) => {}
                }
            }
            if unknown {
                None
            } else {
                Some(false)
            }
        }
        LabelReq::Not(r) => eval_req(r, definite, maybe, has_poly).map(|b| !b),
    }
}

/// Apply a taint substitution to the precondition of `taint`.
///
/// Returns `None` when the substituted precondition resolves to `false`,
/// dropping the taint from that specific result. A precondition that
/// resolves to `true` is discharged entirely.
pub fn map_preconditions(
    taint: &Taint,
    subst: &dyn Fn(&[Taint]) -> Vec<Taint>,
) -> Option<Taint> {
    match &taint.orig {
        Origin::Source(s) => match &s.precondition {
            None => Some(taint.clone()),
            Some(pre) => {
                let new_taints = subst(&pre.taints);
                match solve_precondition(&new_taints, &pre.req) {
                    Some(false) => None,
                    Some(true) => {
                        let mut t = taint.clone();
                        if let Origin::Source(s) = &mut t.orig {
                            s.precondition = None;
                        }
                        Some(t)
                    }
                    None => {
                        let mut t = taint.clone();
                        if let Origin::Source(s) = &mut t.orig {
                            s.precondition = Some(Box::new(Precondition {
                                taints: new_taints,
                                req: pre.req.clone(),
                            }));
                        }
                        Some(t)
                    }
                }
            }
        },
        _ => Some(taint.clone()),
    }
}

/// Construct `Source`-origin taints from a list of source matches.
///
/// A source with a `requires` formula creates an initial precondition over
/// the taints present at the match site; matches whose requirement is
/// already known false produce nothing.
pub fn taints_of_matches(matches: &[SourceMatch], incoming: &TaintSet) -> TaintSet {
    let mut out = TaintSet::new();
    for m in matches {
        let precondition = match &m.spec.requires {
            None => None,
            Some(req) => match solve_precondition(incoming.as_slice(), req) {
                Some(false) => continue,
                Some(true) => None,
                None => Some(Precondition {
                    taints: incoming.to_vec(),
                    req: req.clone(),
                }),
            },
        };
        out.insert(Taint::src(m.clone(), precondition));
    }
    out
}
