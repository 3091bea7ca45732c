//! Taint-match oracle interface: specs, matches, best-match
//! canonicalization, options, and the engine configuration.
//!
//! The engine never interprets pattern syntax. The rule system hands it
//! four opaque predicates (source / sink / sanitizer / propagator); each
//! returns, for an IL fragment, the list of matches at that fragment. A
//! match carries its source range, the captured metavariable bindings, and
//! the per-kind *spec* with the policy knobs the engine honors.
//!
//! # Best matches
//!
//! The same spec often matches at several nested positions (`sink(x.a)`
//! matches at `x.a` and at the whole call). To avoid duplicate findings,
//! the engine precomputes per CFG the *best* matches of each spec (those
//! not strictly contained in another match of the same spec), and specs
//! that demand exactness only fire on them.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::cfg::{Cfg, Node, NodeKind};
use crate::il::{AnyNode, Expr, ExprKind, Lval, Name, Offset, Range};
use crate::taint::env::LvalEnv;
use crate::taint::results::TaintResult;
use crate::taint::sig::Signature;
use crate::taint::types::{LabelReq, TaintSet, DEFAULT_LABEL};

/// Default wall-clock budget of one fixpoint invocation.
pub const FIXPOINT_TIMEOUT: Duration = Duration::from_millis(200);

// =============================================================================
// Metavariable bindings
// =============================================================================

/// Captured metavariable bindings of a pattern match, keyed by
/// metavariable name. Values compare textually for unification purposes.
pub type Bindings = BTreeMap<String, String>;

/// Strict unification: every shared metavariable must agree; returns the
/// union on success.
pub fn unify_bindings(a: &Bindings, b: &Bindings) -> Option<Bindings> {
    let mut out = a.clone();
    for (k, v) in b {
        match out.get(k) {
            Some(existing) if existing != v => return None,
            _ => {
                out.insert(k.clone(), v.clone());
            }
        }
    }
    Some(out)
}

/// Merge bindings from several sources, dropping metavariables whose
/// values conflict across sources but keeping the rest.
pub fn merge_bindings(sources: &[&Bindings]) -> Bindings {
    let mut out = Bindings::new();
    let mut conflicted: Vec<String> = Vec::new();
    for bindings in sources {
        for (k, v) in *bindings {
            match out.get(k) {
                Some(existing) if existing != v => conflicted.push(k.clone()),
                _ => {
                    out.insert(k.clone(), v.clone());
                }
            }
        }
    }
    for k in conflicted {
        out.remove(&k);
    }
    out
}

// =============================================================================
// Per-kind specs
// =============================================================================

/// How a source (or propagator) writes taint into the matched l-value.
///
/// `Yes` and `Only` both demand an exact match before tainting by side
/// effect; `Yes` additionally lets the source contribute to the value of
/// the matched expression and is kept for backwards compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BySideEffect {
    Yes,
    Only,
    #[default]
    No,
}

/// Source spec: introduces taint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSpec {
    /// Label attached to the taints this source produces.
    pub label: String,
    /// Requirement over the taints already present at the match site; a
    /// source with `requires` performs label transitions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requires: Option<LabelReq>,
    pub by_side_effect: BySideEffect,
    /// Fire only on best matches with this exact range.
    pub exact: bool,
    /// Taint the control flow instead of the matched value.
    pub control: bool,
}

impl Default for SourceSpec {
    fn default() -> Self {
        Self {
            label: DEFAULT_LABEL.to_string(),
            requires: None,
            by_side_effect: BySideEffect::No,
            exact: false,
            control: false,
        }
    }
}

/// Sanitizer spec: removes taint.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SanitizerSpec {
    /// Also mark the matched l-value `Clean` in the environment.
    pub by_side_effect: bool,
    pub exact: bool,
}

/// Sink spec: consumes taint, producing findings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SinkSpec {
    /// Label formula incoming taints must satisfy; `None` accepts any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requires: Option<LabelReq>,
    /// Evaluated by the at-exit hook (end-of-scope sinks), not inline.
    pub at_exit: bool,
    /// The rule focuses a metavariable within the sink match.
    pub has_focus: bool,
    pub exact: bool,
}

impl Default for SinkSpec {
    fn default() -> Self {
        Self {
            requires: None,
            at_exit: false,
            has_focus: false,
            exact: true,
        }
    }
}

/// Direction of a propagator endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropKind {
    From,
    To,
}

/// Propagator spec: relays taint between two matched positions sharing a
/// propagator variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropagatorSpec {
    /// The propagator variable connecting `from` and `to` endpoints.
    pub var: String,
    pub kind: PropKind,
    /// Write relayed taints into the destination l-value.
    pub by_side_effect: bool,
    /// Requirement on the taints entering the `from` endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requires: Option<LabelReq>,
    /// Relabel relayed taints to this label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Restrict relabeling to these labels; `None` relabels all.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replace_labels: Option<Vec<String>>,
}

impl PropagatorSpec {
    /// A plain `from` endpoint on variable `var`.
    pub fn from_var(var: impl Into<String>) -> Self {
        Self {
            var: var.into(),
            kind: PropKind::From,
            by_side_effect: true,
            requires: None,
            label: None,
            replace_labels: None,
        }
    }

    /// A plain `to` endpoint on variable `var`.
    pub fn to_var(var: impl Into<String>) -> Self {
        Self {
            var: var.into(),
            kind: PropKind::To,
            by_side_effect: true,
            requires: None,
            label: None,
            replace_labels: None,
        }
    }
}

// =============================================================================
// Matches
// =============================================================================

/// A concrete match of a spec at an IL fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaintMatch<S> {
    /// Identifies the spec across positions; matches with equal `spec_id`
    /// compete in best-match canonicalization.
    pub spec_id: String,
    pub range: Range,
    pub bindings: Bindings,
    pub spec: Arc<S>,
}

pub type SourceMatch = TaintMatch<SourceSpec>;
pub type SinkMatch = TaintMatch<SinkSpec>;
pub type SanitizerMatch = TaintMatch<SanitizerSpec>;
pub type PropagatorMatch = TaintMatch<PropagatorSpec>;

impl<S> TaintMatch<S> {
    /// Construct a match.
    pub fn new(spec_id: impl Into<String>, range: Range, spec: S) -> Self {
        Self {
            spec_id: spec_id.into(),
            range,
            bindings: Bindings::new(),
            spec: Arc::new(spec),
        }
    }
}

// =============================================================================
// Best-match canonicalization
// =============================================================================

/// Per-CFG canonicalization of overlapping matches: for each spec, the
/// matches not strictly contained in another match of the same spec.
/// Read-only after precomputation.
#[derive(Debug, Default)]
pub struct BestMatches {
    by_spec: FxHashMap<String, Vec<Range>>,
}

impl BestMatches {
    /// Collect all matches over the CFG and keep the maximal ones.
    pub fn compute(cfg: &Cfg, config: &TaintConfig) -> Self {
        let mut all: FxHashMap<String, Vec<Range>> = FxHashMap::default();
        for node in &cfg.nodes {
            visit_node(node, &mut |any| {
                for m in (config.is_source)(any) {
                    all.entry(m.spec_id).or_default().push(m.range);
                }
                for m in (config.is_sink)(any) {
                    all.entry(m.spec_id).or_default().push(m.range);
                }
                for m in (config.is_sanitizer)(any) {
                    all.entry(m.spec_id).or_default().push(m.range);
                }
                for m in (config.is_propagator)(any) {
                    all.entry(m.spec_id).or_default().push(m.range);
                }
            });
        }
        let by_spec = all
            .into_iter()
            .map(|(spec_id, ranges)| {
                let best: Vec<Range> = ranges
                    .iter()
                    .filter(|r| !ranges.iter().any(|other| other.strictly_contains(r)))
                    .copied()
                    .collect();
                (spec_id, best)
            })
            .collect();
        Self { by_spec }
    }

    /// Is `range` a best match of `spec_id`?
    pub fn is_best(&self, spec_id: &str, range: Range) -> bool {
        self.by_spec
            .get(spec_id)
            .is_some_and(|ranges| ranges.contains(&range))
    }
}

/// Visit every oracle-consultable fragment of a CFG node.
fn visit_node(node: &Node, f: &mut dyn FnMut(AnyNode<'_>)) {
    match &node.kind {
        NodeKind::Instr(instr) => {
            f(AnyNode::Instr(instr));
            use crate::il::InstrKind;
            match &instr.kind {
                InstrKind::Assign { lval, rhs } => {
                    visit_lval(lval, f);
                    visit_expr(rhs, f);
                }
                InstrKind::AssignAnon { lval } => visit_lval(lval, f),
                InstrKind::Call { ret, func, args } => {
                    if let Some(ret) = ret {
                        visit_lval(ret, f);
                    }
                    visit_expr(func, f);
                    for arg in args {
                        visit_expr(arg, f);
                    }
                }
                InstrKind::New { ret, ctor, args } => {
                    visit_lval(ret, f);
                    if let Some(ctor) = ctor {
                        visit_expr(ctor, f);
                    }
                    for arg in args {
                        visit_expr(arg, f);
                    }
                }
                InstrKind::CallSpecial { ret, args } => {
                    if let Some(ret) = ret {
                        visit_lval(ret, f);
                    }
                    for arg in args {
                        visit_expr(arg, f);
                    }
                }
                InstrKind::Fixme => {}
            }
        }
        NodeKind::Cond(e) | NodeKind::Throw(e) | NodeKind::Return(_, e) => visit_expr(e, f),
        NodeKind::Lambda { params } => {
            for p in params {
                f(AnyNode::Name(p, Range::UNKNOWN));
            }
        }
        NodeKind::Enter
        | NodeKind::Exit
        | NodeKind::Join
        | NodeKind::Goto
        | NodeKind::Other => {}
    }
}

fn visit_expr(expr: &Expr, f: &mut dyn FnMut(AnyNode<'_>)) {
    f(AnyNode::Expr(expr));
    match &expr.kind {
        ExprKind::Lval(lv) => visit_lval(lv, f),
        ExprKind::Operator(_, args) => {
            for a in args {
                visit_expr(a, f);
            }
        }
        ExprKind::Record(fields) => {
            for (_, e) in fields {
                visit_expr(e, f);
            }
        }
        ExprKind::Tuple(items) => {
            for e in items {
                visit_expr(e, f);
            }
        }
        ExprKind::Literal(_) | ExprKind::Fixme => {}
    }
}

fn visit_lval(lval: &Lval, f: &mut dyn FnMut(AnyNode<'_>)) {
    // Every prefix of an l-value is a consultable node of its own.
    for n in 0..=lval.offsets.len() {
        let prefix = lval.prefix(n);
        f(AnyNode::Lval(&prefix));
    }
    for item in &lval.offsets {
        if let Offset::Idx(idx) = &item.off {
            visit_expr(idx, f);
        }
    }
}

// =============================================================================
// Options
// =============================================================================

/// Policy knobs recognized by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaintOptions {
    /// Unknown callees return untainted regardless of argument taints.
    #[serde(rename = "taint_assume_safe_functions")]
    pub assume_safe_functions: bool,
    /// Indexed reads `a[i]` do not inherit `i`'s taint.
    #[serde(rename = "taint_assume_safe_indexes")]
    pub assume_safe_indexes: bool,
    /// Comparison operators yield no taint.
    #[serde(rename = "taint_assume_safe_comparisons")]
    pub assume_safe_comparisons: bool,
    /// Values typed as boolean have data taints dropped.
    #[serde(rename = "taint_assume_safe_booleans")]
    pub assume_safe_booleans: bool,
    /// Values typed as integer/float have data taints dropped.
    #[serde(rename = "taint_assume_safe_numbers")]
    pub assume_safe_numbers: bool,
    /// Only direct assignments propagate taint; no sub-expression or
    /// call-return flow.
    #[serde(rename = "taint_only_propagate_through_assignments")]
    pub only_propagate_through_assignments: bool,
    /// Wall-clock budget of one fixpoint invocation.
    pub fixpoint_timeout: Duration,
}

impl Default for TaintOptions {
    fn default() -> Self {
        Self {
            assume_safe_functions: false,
            assume_safe_indexes: false,
            assume_safe_comparisons: false,
            assume_safe_booleans: false,
            assume_safe_numbers: false,
            only_propagate_through_assignments: false,
            fixpoint_timeout: FIXPOINT_TIMEOUT,
        }
    }
}

impl TaintOptions {
    /// Do unknown call results carry their argument taints?
    #[inline]
    pub fn propagate_through_functions(&self) -> bool {
        !self.assume_safe_functions && !self.only_propagate_through_assignments
    }
}

// =============================================================================
// Engine configuration
// =============================================================================

/// Classification predicate types. Each returns every match of its kind at
/// the given fragment; the engine applies exactness/best-match policy.
pub type SourceOracle = Box<dyn Fn(AnyNode<'_>) -> Vec<SourceMatch>>;
pub type SinkOracle = Box<dyn Fn(AnyNode<'_>) -> Vec<SinkMatch>>;
pub type SanitizerOracle = Box<dyn Fn(AnyNode<'_>) -> Vec<SanitizerMatch>>;
pub type PropagatorOracle = Box<dyn Fn(AnyNode<'_>) -> Vec<PropagatorMatch>>;

/// Streaming consumer of analysis results. Receives the function name, a
/// batch of results, and the environment at the emission point; it must
/// not (and cannot) mutate the environment.
pub type ResultHandler = Box<dyn Fn(&str, Vec<TaintResult>, &LvalEnv)>;

/// Interprocedural hook: precomputed taint signature of a callee, plus its
/// formal parameters.
pub type SignatureHook = Box<dyn Fn(&Expr) -> Option<(Vec<Name>, Signature)>>;

/// Class-attribute resolution for the bean getter/setter heuristic.
pub type AttributeHook = Box<dyn Fn(&str, &str) -> Option<Name>>;

/// End-of-scope sinks: taints plus sink matches considered "at exit" for
/// this node.
pub type AtExitHook = Box<dyn Fn(&LvalEnv, &Node) -> Option<(TaintSet, Vec<SinkMatch>)>>;

/// Optional hooks, passed explicitly so the engine stays re-entrant.
#[derive(Default)]
pub struct TaintHooks {
    pub function_taint_signature: Option<SignatureHook>,
    pub find_attribute_in_class: Option<AttributeHook>,
    pub check_tainted_at_exit_sinks: Option<AtExitHook>,
}

/// Per-rule engine configuration: identification, policy flags, the four
/// classification predicates, the result handler, and the hooks.
pub struct TaintConfig {
    pub filepath: String,
    pub rule_id: String,
    pub track_control: bool,
    pub unify_mvars: bool,
    pub is_source: SourceOracle,
    pub is_sink: SinkOracle,
    pub is_sanitizer: SanitizerOracle,
    pub is_propagator: PropagatorOracle,
    pub handle_results: ResultHandler,
    pub hooks: TaintHooks,
}

impl TaintConfig {
    /// A configuration with no matches and a discarding handler; tests and
    /// drivers overwrite the fields they need.
    pub fn new(filepath: impl Into<String>, rule_id: impl Into<String>) -> Self {
        Self {
            filepath: filepath.into(),
            rule_id: rule_id.into(),
            track_control: false,
            unify_mvars: false,
            is_source: Box::new(|_| Vec::new()),
            is_sink: Box::new(|_| Vec::new()),
            is_sanitizer: Box::new(|_| Vec::new()),
            is_propagator: Box::new(|_| Vec::new()),
            handle_results: Box::new(|_, _, _| {}),
            hooks: TaintHooks::default(),
        }
    }
}

impl fmt::Debug for TaintConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaintConfig")
            .field("filepath", &self.filepath)
            .field("rule_id", &self.rule_id)
            .field("track_control", &self.track_control)
            .field("unify_mvars", &self.unify_mvars)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Java property cache
// =============================================================================

/// Synthesized property names for the bean getter/setter heuristic.
///
/// Owned by one analysis invocation; `getFoo`/`setFoo` callees without a
/// definition resolve to the same synthesized `foo` field name so reads
/// and writes meet.
#[derive(Debug, Default)]
pub struct JavaPropsCache {
    props: FxHashMap<String, Name>,
    next_sid: u32,
}

/// Synthesized property sids live far above anything lowering assigns.
const JAVA_PROP_SID_BASE: u32 = 0x4000_0000;

impl JavaPropsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The synthesized field name of a property, stable per cache.
    pub fn prop_name(&mut self, prop: &str) -> Name {
        if let Some(name) = self.props.get(prop) {
            return name.clone();
        }
        self.next_sid += 1;
        let name = Name::new(prop, JAVA_PROP_SID_BASE + self.next_sid);
        self.props.insert(prop.to_string(), name.clone());
        name
    }
}
