//! The expression/l-value checker and instruction handler.
//!
//! This is where taint actually moves. The checker is a set of mutually
//! recursive traversals over IL expressions and l-values that thread the
//! environment left to right (`foo(y, z)` sees `y`'s side effects while
//! checking `z`) and consult the match oracles at every fragment.
//!
//! # Per-expression pipeline (order matters)
//!
//! 1. sanitizers (short-circuit; `by_side_effect` also cleans the l-value);
//! 2. taints of sub-expressions;
//! 3. sources (side-effect sources update the environment);
//! 4. propagators (`from` deposits, then `to` absorbs);
//! 5. sinks (seeing data ∪ shape-reachable ∪ control taints);
//! 6. type-based drops (`assume_safe_booleans`/`…_numbers`).
//!
//! # L-values
//!
//! L-values check bottom-up over the offset path; every prefix may be a
//! source/sink/sanitizer in its own right. A sanitized prefix makes all
//! extensions safe *at this evaluation site*. Exact environment misses
//! fall back to polymorphic inheritance: `Var` taints on the prefix extend
//! with the current offset, under the field-sensitivity, offset-kind,
//! length-bound, and no-repeat guards that keep summaries finite.

use tracing::{debug, warn};

use crate::il::{self, AnyNode, Expr, ExprKind, Instr, InstrKind, Lval, Name, Range};
use crate::lang::Language;
use crate::taint::env::{plain_offset, LvalEnv, Place};
use crate::taint::matching::{
    merge_bindings, unify_bindings, BestMatches, Bindings, BySideEffect, JavaPropsCache,
    PropKind, PropagatorSpec, SanitizerMatch, SinkMatch, TaintConfig, TaintOptions,
};
use crate::taint::results::{same_result, ResultToSink, TaintResult};
use crate::taint::shape::{
    gather_all_taints_in_shape, taints_and_shape_are_relevant, Cell, Offset, Shape, Xtaint,
};
use crate::taint::sig::{instantiate_taints, place_of_sig_lval, CallInfo, Signature};
use crate::taint::types::{
    solve_precondition, taints_of_matches, CallTrace, LabelReq, Origin, Taint, TaintSet,
    MAX_POLY_OFFSET,
};

/// Taints and shape produced by evaluating an expression.
#[derive(Debug, Clone, Default)]
pub(crate) struct ExprCheck {
    pub taints: TaintSet,
    pub shape: Shape,
}

/// Checker-transient l-value status: a sanitizer applying at this
/// evaluation site suppresses new matches on every extension, without
/// touching the stored environment.
#[derive(Debug, Clone)]
pub(crate) enum LvalStatus {
    Sanitized,
    Taints(TaintSet),
}

impl LvalStatus {
    fn into_taints(self) -> TaintSet {
        match self {
            LvalStatus::Sanitized => TaintSet::new(),
            LvalStatus::Taints(t) => t,
        }
    }
}

/// Per-fixpoint checker state. Owns the result accumulator; the fixpoint
/// drains batches after each transfer.
pub(crate) struct Checker<'a> {
    pub lang: Language,
    pub options: &'a TaintOptions,
    pub config: &'a TaintConfig,
    pub best: &'a BestMatches,
    pub java_props: &'a mut JavaPropsCache,
    /// Everything emitted so far (dedup store; origin-identity based).
    seen: Vec<TaintResult>,
    /// Results discovered since the last drain.
    batch: Vec<TaintResult>,
}

impl<'a> Checker<'a> {
    pub fn new(
        lang: Language,
        options: &'a TaintOptions,
        config: &'a TaintConfig,
        best: &'a BestMatches,
        java_props: &'a mut JavaPropsCache,
    ) -> Self {
        Self {
            lang,
            options,
            config,
            best,
            java_props,
            seen: Vec::new(),
            batch: Vec::new(),
        }
    }

    // =========================================================================
    // Result emission
    // =========================================================================

    pub(crate) fn emit(&mut self, result: TaintResult) {
        if !self.seen.iter().any(|r| same_result(r, &result)) {
            self.seen.push(result.clone());
            self.batch.push(result);
        }
    }

    pub(crate) fn take_batch(&mut self) -> Vec<TaintResult> {
        std::mem::take(&mut self.batch)
    }

    /// Emit a sink hit, applying the metavariable policy, the sink's label
    /// requirement, and control-taint propagation.
    pub(crate) fn emit_sink_trace(
        &mut self,
        env: &LvalEnv,
        mut taints: TaintSet,
        sink: CallTrace<SinkMatch>,
    ) {
        taints.union_with(env.get_control_taints());
        if taints.is_empty() {
            return;
        }
        let pm = sink.pm();
        let sink_bindings = pm.bindings.clone();
        let spec = pm.spec.clone();
        let (kept, merged_bindings) = if self.config.unify_mvars {
            // Strict inner join: a source that cannot unify with the sink
            // drops out of this result; the rest still report.
            let mut merged = sink_bindings;
            let mut kept = TaintSet::new();
            for t in taints.iter() {
                match source_bindings(t) {
                    Some(b) => match unify_bindings(&merged, b) {
                        Some(u) => {
                            merged = u;
                            kept.insert(t.clone());
                        }
                        None => {}
                    },
                    None => {
                        kept.insert(t.clone());
                    }
                }
            }
            (kept, merged)
        } else {
            // Sink-biased union: sources merge (conflicts dropped), then
            // the sink's bindings win any remaining collision.
            let sources: Vec<&Bindings> = taints.iter().filter_map(source_bindings).collect();
            let mut merged = merge_bindings(&sources);
            for (k, v) in &sink_bindings {
                merged.insert(k.clone(), v.clone());
            }
            (taints, merged)
        };
        if kept.is_empty() {
            return;
        }
        let requires = spec.requires.clone().unwrap_or(LabelReq::Bool(true));
        if solve_precondition(kept.as_slice(), &requires) == Some(false) {
            return;
        }
        let mut kept = kept;
        if self.config.track_control {
            // Summary marker: substitutes to the caller's control taints at
            // instantiation time; never reportable by itself.
            kept.insert(Taint::control());
        }
        self.emit(TaintResult::ToSink(ResultToSink {
            taints: kept.to_vec(),
            requires,
            sink,
            merged_bindings,
        }));
    }

    /// At-exit hook entry point: the sink was already selected by the hook,
    /// no range policy applies.
    pub(crate) fn emit_sink_match(&mut self, env: &LvalEnv, taints: TaintSet, m: SinkMatch) {
        self.emit_sink_trace(env, taints, CallTrace::Direct(m));
    }

    // =========================================================================
    // Oracle consultation policy
    // =========================================================================

    fn sanitizer_matches(&self, any: AnyNode<'_>) -> Vec<SanitizerMatch> {
        let node_range = any.range();
        (self.config.is_sanitizer)(any)
            .into_iter()
            .filter(|m| {
                if m.spec.exact {
                    m.range == node_range && self.best.is_best(&m.spec_id, m.range)
                } else {
                    m.range.contains(&node_range)
                }
            })
            .collect()
    }

    fn sink_applies(&self, m: &SinkMatch, node_range: Range, require_exact: bool) -> bool {
        if m.spec.exact || require_exact {
            m.range == node_range && (!m.spec.exact || self.best.is_best(&m.spec_id, m.range))
        } else {
            m.range.contains(&node_range)
        }
    }

    /// Consult sinks at a fragment. `exclude_focus_exact` is set on call
    /// instructions, whose focused-and-exact sinks fire on the focused
    /// sub-expression instead; `require_exact` is set on strict l-value
    /// prefixes ("`x` is tainted, `sink(x.a)`" must not flag `x`).
    fn check_sinks_at(
        &mut self,
        env: &LvalEnv,
        any: AnyNode<'_>,
        taints: &TaintSet,
        shape: &Shape,
        exclude_focus_exact: bool,
        require_exact: bool,
    ) {
        let node_range = any.range();
        for m in (self.config.is_sink)(any) {
            if m.spec.at_exit {
                continue;
            }
            if exclude_focus_exact && m.spec.has_focus && m.spec.exact {
                continue;
            }
            if !self.sink_applies(&m, node_range, require_exact) {
                continue;
            }
            // A sink consuming a composite value sees every taint
            // reachable within it.
            let sink_taints = taints.clone().union(&gather_all_taints_in_shape(shape));
            self.emit_sink_trace(env, sink_taints, CallTrace::Direct(m));
        }
    }

    /// Consult sources at a fragment, returning the taints flowing into
    /// the evaluated value. Side-effect sources update the environment at
    /// `as_lval`; control sources feed the control set instead.
    fn check_sources_at(
        &mut self,
        env: &mut LvalEnv,
        any: AnyNode<'_>,
        as_lval: Option<&Lval>,
        incoming: &TaintSet,
    ) -> TaintSet {
        let node_range = any.range();
        let mut out = TaintSet::new();
        for m in (self.config.is_source)(any) {
            let exact_here =
                m.range == node_range && (!m.spec.exact || self.best.is_best(&m.spec_id, m.range));
            let applies = if m.spec.exact {
                exact_here
            } else {
                m.range.contains(&node_range)
            };
            if !applies {
                continue;
            }
            let ts = taints_of_matches(std::slice::from_ref(&m), incoming);
            if ts.is_empty() {
                continue;
            }
            if m.spec.control {
                if self.config.track_control {
                    env.add_control_taints(&ts);
                }
                continue;
            }
            match m.spec.by_side_effect {
                BySideEffect::No => out.union_with(&ts),
                BySideEffect::Yes => {
                    out.union_with(&ts);
                    if exact_here {
                        if let Some(lv) = as_lval {
                            env.add(&Place::of_lval(lv), &ts);
                        }
                    }
                }
                BySideEffect::Only => {
                    if exact_here {
                        if let Some(lv) = as_lval {
                            env.add(&Place::of_lval(lv), &ts);
                        }
                    }
                }
            }
        }
        out
    }

    /// Two-pass propagator protocol at one fragment: every matching `from`
    /// endpoint deposits the current taints (optionally relabeled), every
    /// matching `to` endpoint absorbs deposited taints or, failing that,
    /// registers the destination as pending.
    fn apply_propagators(
        &mut self,
        env: &mut LvalEnv,
        any: AnyNode<'_>,
        cur_taints: &TaintSet,
        as_lval: Option<&Lval>,
    ) -> TaintSet {
        // Propagator endpoints are exact positions: only matches at this
        // very fragment participate.
        let node_range = any.range();
        let matches: Vec<_> = (self.config.is_propagator)(any)
            .into_iter()
            .filter(|m| m.range == node_range)
            .collect();
        if matches.is_empty() {
            return TaintSet::new();
        }
        let mut out = TaintSet::new();
        for m in matches.iter().filter(|m| m.spec.kind == PropKind::From) {
            if cur_taints.is_empty() {
                continue;
            }
            if let Some(req) = &m.spec.requires {
                if solve_precondition(cur_taints.as_slice(), req) == Some(false) {
                    continue;
                }
            }
            let relayed = relabel(cur_taints, &m.spec)
                .filter_map_taints(|t| Some(t.clone().with_token(m.range)));
            env.propagate_to(&m.spec.var, relayed);
        }
        for m in matches.iter().filter(|m| m.spec.kind == PropKind::To) {
            match env.propagate_from(&m.spec.var) {
                Some(ts) => {
                    out.union_with(&ts);
                    if m.spec.by_side_effect {
                        if let Some(lv) = as_lval {
                            env.add(&Place::of_lval(lv), &ts);
                        }
                    }
                }
                None => {
                    if m.spec.by_side_effect {
                        if let Some(lv) = as_lval {
                            env.pending_propagation(&m.spec.var, Place::of_lval(lv));
                        }
                    }
                }
            }
        }
        out
    }

    fn type_based_drop(&self, expr: &Expr, taints: TaintSet) -> TaintSet {
        match expr.ty {
            Some(il::ValueType::Bool) if self.options.assume_safe_booleans => TaintSet::new(),
            Some(t) if t.is_numeric() && self.options.assume_safe_numbers => TaintSet::new(),
            _ => taints,
        }
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    pub(crate) fn check_expr(&mut self, env: &mut LvalEnv, expr: &Expr) -> ExprCheck {
        // L-value expressions run the per-level pipeline in check_lval;
        // their range coincides with the full-lval level, so nothing is
        // consulted twice.
        if let ExprKind::Lval(lv) = &expr.kind {
            let (status, shape) = self.check_lval(env, lv);
            let taints = self.type_based_drop(expr, status.into_taints());
            return ExprCheck { taints, shape };
        }
        if !self.sanitizer_matches(AnyNode::Expr(expr)).is_empty() {
            return ExprCheck::default();
        }
        let ExprCheck { mut taints, shape } = self.check_expr_sub(env, expr);
        let incoming = taints.clone();
        let src = self.check_sources_at(env, AnyNode::Expr(expr), None, &incoming);
        taints.union_with(&src);
        let prop = self.apply_propagators(env, AnyNode::Expr(expr), &taints, None);
        taints.union_with(&prop);
        self.check_sinks_at(env, AnyNode::Expr(expr), &taints, &shape, false, false);
        let taints = self.type_based_drop(expr, taints);
        ExprCheck { taints, shape }
    }

    fn check_expr_sub(&mut self, env: &mut LvalEnv, expr: &Expr) -> ExprCheck {
        match &expr.kind {
            ExprKind::Literal(_) | ExprKind::Fixme => ExprCheck::default(),
            ExprKind::Operator(op, operands) => {
                let mut taints = TaintSet::new();
                for operand in operands {
                    let r = self.check_expr(env, operand);
                    taints.union_with(&r.taints);
                }
                if self.options.assume_safe_comparisons && op.is_comparison() {
                    taints = TaintSet::new();
                }
                if self.options.only_propagate_through_assignments {
                    taints = TaintSet::new();
                }
                ExprCheck {
                    taints,
                    shape: Shape::Bot,
                }
            }
            ExprKind::Record(fields) => {
                let mut items = Vec::with_capacity(fields.len());
                for (name, e) in fields {
                    let r = self.check_expr(env, e);
                    items.push((name.clone(), r.taints, r.shape));
                }
                ExprCheck {
                    taints: TaintSet::new(),
                    shape: Shape::record_like_obj(items),
                }
            }
            ExprKind::Tuple(elems) => {
                let mut items = Vec::with_capacity(elems.len());
                for e in elems {
                    let r = self.check_expr(env, e);
                    items.push((r.taints, r.shape));
                }
                ExprCheck {
                    taints: TaintSet::new(),
                    shape: Shape::tuple_like_obj(items),
                }
            }
            // Handled in check_expr.
            ExprKind::Lval(_) => unreachable!("lval expressions route through check_lval"),
        }
    }

    // =========================================================================
    // L-values
    // =========================================================================

    pub(crate) fn check_lval(&mut self, env: &mut LvalEnv, lval: &Lval) -> (LvalStatus, Shape) {
        self.check_lval_level(env, lval, lval.offsets.len())
    }

    /// Check the prefix of `lval` with `level` offsets. Bottom-up: the
    /// prefix below is checked first and its result feeds this level.
    fn check_lval_level(
        &mut self,
        env: &mut LvalEnv,
        lval: &Lval,
        level: usize,
    ) -> (LvalStatus, Shape) {
        let prefix = lval.prefix(level);
        let is_full = level == lval.offsets.len();

        let sans = self.sanitizer_matches(AnyNode::Lval(&prefix));
        if !sans.is_empty() {
            if sans.iter().any(|m| m.spec.by_side_effect) {
                env.clean(&Place::of_lval(&prefix));
            }
            return (LvalStatus::Sanitized, Shape::Bot);
        }

        let (mut taints, shape) = if level == 0 {
            match env.find_var(&prefix.base.tracked_name()) {
                Some(cell) => (cell.xtaint.taints(), cell.shape.clone()),
                None => (TaintSet::new(), Shape::Bot),
            }
        } else {
            let (prev_status, _) = self.check_lval_level(env, lval, level - 1);
            let prev_taints = match prev_status {
                LvalStatus::Sanitized => return (LvalStatus::Sanitized, Shape::Bot),
                LvalStatus::Taints(t) => t,
            };
            let off_item = &lval.offsets[level - 1];
            let mut idx_taints = TaintSet::new();
            if let il::Offset::Idx(ix) = &off_item.off {
                let r = self.check_expr(env, ix);
                if !self.options.assume_safe_indexes {
                    idx_taints = r.taints;
                }
            }
            let place = Place::of_lval(&prefix);
            let (cell_taints, cell_shape, cell_clean) = match env.find_lval(&place) {
                Some(Cell {
                    xtaint: Xtaint::Clean,
                    ..
                }) => (TaintSet::new(), Shape::Bot, true),
                Some(cell) => (cell.xtaint.taints(), cell.shape.clone(), false),
                None => (TaintSet::new(), Shape::Bot, false),
            };
            // An explicit Clean overrides both deep taint and polymorphic
            // inheritance from the prefix.
            let inherited = if cell_clean {
                TaintSet::new()
            } else {
                self.inherit_taints(&prev_taints, &off_item.off)
            };
            (
                cell_taints.union(&inherited).union(&idx_taints),
                cell_shape,
            )
        };

        let incoming = taints.clone();
        let src = self.check_sources_at(env, AnyNode::Lval(&prefix), Some(&prefix), &incoming);
        taints.union_with(&src);
        let prop = self.apply_propagators(env, AnyNode::Lval(&prefix), &taints, Some(&prefix));
        taints.union_with(&prop);
        self.check_sinks_at(env, AnyNode::Lval(&prefix), &taints, &shape, false, !is_full);
        (LvalStatus::Taints(taints), shape)
    }

    /// Extend the prefix's taints over one more offset: `Var` taints grow
    /// their offset path under the termination guards, everything else is
    /// inherited unchanged (deep MAY taint).
    fn inherit_taints(&self, prev: &TaintSet, off: &il::Offset) -> TaintSet {
        let off_plain = plain_offset(off);
        prev.filter_map_taints(|t| match &t.orig {
            Origin::Var(sig)
                if self.lang.supports_field_sensitivity()
                    && off_plain.is_field_like()
                    && sig.offsets.len() < MAX_POLY_OFFSET
                    && !sig.offsets.contains(&off_plain) =>
            {
                let mut extended = sig.clone();
                extended.offsets.push(off_plain.clone());
                Some(Taint {
                    orig: Origin::Var(extended),
                    rev_tokens: t.rev_tokens.clone(),
                })
            }
            _ => Some(t.clone()),
        })
    }

    // =========================================================================
    // Instructions
    // =========================================================================

    pub(crate) fn flow_instr(&mut self, env: &mut LvalEnv, instr: &Instr) {
        match &instr.kind {
            InstrKind::Assign { lval, rhs } => {
                let place = Place::of_lval(lval);
                let before = env.find_lval(&place).cloned();
                let ExprCheck { mut taints, shape } = self.check_expr(env, rhs);
                let src = self.check_sources_at(env, AnyNode::Instr(instr), Some(lval), &taints);
                taints.union_with(&src);
                let prop = self.apply_propagators(env, AnyNode::Instr(instr), &taints, Some(lval));
                taints.union_with(&prop);
                self.assign_result(env, place, before, taints, shape);
            }
            InstrKind::AssignAnon { lval } => {
                let place = Place::of_lval(lval);
                let before = env.find_lval(&place).cloned();
                self.assign_result(env, place, before, TaintSet::new(), Shape::Bot);
            }
            InstrKind::Call { ret, func, args } => {
                let before = ret.as_ref().map(|lv| {
                    let place = Place::of_lval(lv);
                    (place.clone(), env.find_lval(&place).cloned())
                });
                let ExprCheck { mut taints, shape } = self.check_call(env, instr, func, args);
                let prop =
                    self.apply_propagators(env, AnyNode::Instr(instr), &taints, ret.as_ref());
                taints.union_with(&prop);
                if let Some((place, before)) = before {
                    self.assign_result(env, place, before, taints, shape);
                }
            }
            InstrKind::New { ret, ctor, args } => {
                let place = Place::of_lval(ret);
                let before = env.find_lval(&place).cloned();
                let ExprCheck { mut taints, shape } = match ctor {
                    Some(ctor) => self.check_call(env, instr, ctor, args),
                    None => {
                        // No constructor to resolve: the object aggregates
                        // its arguments, no sink fires on the instruction.
                        let (all, _) = self.check_args(env, args);
                        let taints = if self.options.only_propagate_through_assignments {
                            TaintSet::new()
                        } else {
                            all
                        };
                        ExprCheck {
                            taints,
                            shape: Shape::Bot,
                        }
                    }
                };
                let prop =
                    self.apply_propagators(env, AnyNode::Instr(instr), &taints, Some(ret));
                taints.union_with(&prop);
                self.assign_result(env, place, before, taints, shape);
            }
            InstrKind::CallSpecial { ret, args } => {
                let before = ret.as_ref().map(|lv| {
                    let place = Place::of_lval(lv);
                    (place.clone(), env.find_lval(&place).cloned())
                });
                let (all, _) = self.check_args(env, args);
                self.check_sinks_at(env, AnyNode::Instr(instr), &all, &Shape::Bot, true, false);
                let mut taints = all;
                let prop =
                    self.apply_propagators(env, AnyNode::Instr(instr), &taints, ret.as_ref());
                taints.union_with(&prop);
                if let Some((place, before)) = before {
                    self.assign_result(env, place, before, taints, Shape::Bot);
                }
            }
            InstrKind::Fixme => {}
        }
    }

    /// Write an evaluated result into the destination. Assignment of a
    /// safe RHS sanitizes the destination; unless the destination's cell
    /// changed by side effect while the RHS was evaluated.
    fn assign_result(
        &mut self,
        env: &mut LvalEnv,
        place: Place,
        before: Option<Cell>,
        taints: TaintSet,
        shape: Shape,
    ) {
        if taints_and_shape_are_relevant(&taints, &shape) {
            env.add_shape(&place, &taints, &shape);
        } else {
            let after = env.find_lval(&place).cloned();
            if before == after {
                env.clean(&place);
            }
        }
    }

    fn check_args(&mut self, env: &mut LvalEnv, args: &[Expr]) -> (TaintSet, Vec<(TaintSet, Shape)>) {
        let mut arg_eval = Vec::with_capacity(args.len());
        let mut all = TaintSet::new();
        for arg in args {
            let r = self.check_expr(env, arg);
            all.union_with(&r.taints);
            all.union_with(&gather_all_taints_in_shape(&r.shape));
            arg_eval.push((r.taints, r.shape));
        }
        (all, arg_eval)
    }

    // =========================================================================
    // Calls
    // =========================================================================

    fn check_call(
        &mut self,
        env: &mut LvalEnv,
        instr: &Instr,
        func: &Expr,
        args: &[Expr],
    ) -> ExprCheck {
        // A sanitizer matching the whole call makes its result safe before
        // anything else is considered; a subsequent assignment of that safe
        // result cleans the destination.
        if !self.sanitizer_matches(AnyNode::Instr(instr)).is_empty() {
            return ExprCheck::default();
        }
        // Method calls check the receiver, not the full callee l-value:
        // the method-name offset never participates in field inheritance.
        let (obj_taints, receiver_place) = match func.as_lval() {
            Some(lv) if !lv.offsets.is_empty() => {
                let recv = lv.receiver().expect("non-empty offsets have a receiver");
                let (status, _) = self.check_lval(env, &recv);
                (status.into_taints(), Some(Place::of_lval(&recv)))
            }
            _ => {
                let r = self.check_expr(env, func);
                (r.taints, None)
            }
        };

        let (all_args_taints, arg_eval) = self.check_args(env, args);

        // The call instruction itself as a sink, over everything the
        // arguments carry. At-exit sinks wait for the hook; focused exact
        // sinks fire on the focused sub-expression instead.
        self.check_sinks_at(
            env,
            AnyNode::Instr(instr),
            &all_args_taints,
            &Shape::Bot,
            true,
            false,
        );

        let config = self.config;
        if let Some(hook) = config.hooks.function_taint_signature.as_ref() {
            if let Some((fparams, signature)) = hook(func) {
                let taints = self.instantiate_signature(
                    env,
                    instr.range,
                    &fparams,
                    &signature,
                    args,
                    &arg_eval,
                    receiver_place.as_ref(),
                );
                let taints = self.call_result_sources(env, instr, taints);
                return ExprCheck {
                    taints,
                    shape: Shape::Bot,
                };
            }
        }

        if self.lang.has_bean_accessors() {
            if let Some(result) = self.bean_accessor(env, func, args, &arg_eval) {
                let taints = self.call_result_sources(env, instr, result.taints);
                return ExprCheck {
                    taints,
                    shape: result.shape,
                };
            }
        }

        let base = if self.options.propagate_through_functions() {
            all_args_taints.union(&obj_taints)
        } else {
            TaintSet::new()
        };
        let taints = self.call_result_sources(env, instr, base);
        ExprCheck {
            taints,
            shape: Shape::Bot,
        }
    }

    /// Sources matching the call instruction taint its result (`x =
    /// source()` arrives here).
    fn call_result_sources(
        &mut self,
        env: &mut LvalEnv,
        instr: &Instr,
        mut taints: TaintSet,
    ) -> TaintSet {
        let incoming = taints.clone();
        let src = self.check_sources_at(env, AnyNode::Instr(instr), None, &incoming);
        taints.union_with(&src);
        taints
    }

    // =========================================================================
    // Signature instantiation
    // =========================================================================

    #[allow(clippy::too_many_arguments)]
    fn instantiate_signature(
        &mut self,
        env: &mut LvalEnv,
        call_range: Range,
        fparams: &[Name],
        signature: &Signature,
        args: &[Expr],
        arg_eval: &[(TaintSet, Shape)],
        receiver_place: Option<&Place>,
    ) -> TaintSet {
        if args.len() > fparams.len() {
            warn!(
                actuals = args.len(),
                formals = fparams.len(),
                "call has more arguments than the callee declares; excess ignored"
            );
        }
        let info = CallInfo {
            call_range,
            args,
            arg_eval,
            receiver_place,
            fparams,
        };
        let mut ret = TaintSet::new();
        for entry in signature {
            match entry {
                TaintResult::ToReturn(r) => {
                    ret.union_with(&instantiate_taints(env, &info, &r.data_taints));
                    if self.config.track_control {
                        let ctrl = instantiate_taints(env, &info, &r.control_taints);
                        env.add_control_taints(&ctrl);
                    }
                }
                TaintResult::ToSink(s) => {
                    let taints = instantiate_taints(env, &info, &s.taints);
                    if taints.is_empty() {
                        continue;
                    }
                    let sink = CallTrace::Call {
                        call_site: call_range,
                        tokens: Vec::new(),
                        inner: Box::new(s.sink.clone()),
                    };
                    self.emit_sink_trace(env, taints, sink);
                }
                TaintResult::ToLval { taints, lval } => {
                    let inst = instantiate_taints(env, &info, taints);
                    if inst.is_empty() {
                        continue;
                    }
                    match place_of_sig_lval(lval, &info, env) {
                        Some(place) => env.add(&place, &inst),
                        None => {
                            debug!(%lval, "side-effect target unresolvable; signature entry skipped");
                        }
                    }
                }
            }
        }
        ret
    }

    // =========================================================================
    // Bean accessors
    // =========================================================================

    /// `obj.getFoo()` / `obj.setFoo(v)` without a definition behave as
    /// reads/writes of the synthesized property field `obj.foo`.
    fn bean_accessor(
        &mut self,
        env: &mut LvalEnv,
        func: &Expr,
        args: &[Expr],
        arg_eval: &[(TaintSet, Shape)],
    ) -> Option<ExprCheck> {
        let lv = func.as_lval()?;
        let method = lv.last_dot_name()?;
        let recv = lv.receiver()?;
        let (is_getter, prop) = bean_property(&method.ident, args.len())?;
        let prop_name = match self.config.hooks.find_attribute_in_class.as_ref() {
            Some(hook) => hook(&recv.base.tracked_name().ident, &prop)
                .unwrap_or_else(|| self.java_props.prop_name(&prop)),
            None => self.java_props.prop_name(&prop),
        };
        let place = Place::of_lval(&recv).with_offset(Offset::Fld(prop_name.ident.clone()));
        if is_getter {
            let taints = match env.find_lval(&place) {
                Some(Cell {
                    xtaint: Xtaint::Clean,
                    ..
                }) => TaintSet::new(),
                Some(cell) => cell.xtaint.taints(),
                None => {
                    let recv_taints = env
                        .find_lval(&Place::of_lval(&recv))
                        .map(|c| c.xtaint.taints())
                        .unwrap_or_default();
                    self.inherit_taints(&recv_taints, &il::Offset::Dot(prop_name))
                }
            };
            Some(ExprCheck {
                taints,
                shape: Shape::Bot,
            })
        } else {
            let (t, s) = arg_eval.first()?;
            let mut ts = t.clone();
            ts.union_with(&gather_all_taints_in_shape(s));
            env.add(&place, &ts);
            Some(ExprCheck::default())
        }
    }
}

/// Split a bean accessor name: `getFoo`/0 args reads, `setFoo`/1 arg
/// writes; anything else is not an accessor.
fn bean_property(method: &str, argc: usize) -> Option<(bool, String)> {
    let (is_getter, rest) = if let Some(rest) = method.strip_prefix("get") {
        if argc != 0 {
            return None;
        }
        (true, rest)
    } else if let Some(rest) = method.strip_prefix("set") {
        if argc != 1 {
            return None;
        }
        (false, rest)
    } else {
        return None;
    };
    let mut chars = rest.chars();
    let first = chars.next()?;
    if !first.is_uppercase() {
        return None;
    }
    let prop: String = first.to_lowercase().chain(chars).collect();
    Some((is_getter, prop))
}

fn source_bindings(taint: &Taint) -> Option<&Bindings> {
    match &taint.orig {
        Origin::Source(s) => Some(&s.call_trace.pm().bindings),
        _ => None,
    }
}

fn relabel(taints: &TaintSet, spec: &PropagatorSpec) -> TaintSet {
    let Some(new_label) = &spec.label else {
        return taints.clone();
    };
    taints.filter_map_taints(|t| {
        let mut t = t.clone();
        if let Origin::Source(s) = &mut t.orig {
            let applies = spec
                .replace_labels
                .as_ref()
                .map_or(true, |labels| labels.contains(&s.label));
            if applies {
                s.label = new_label.clone();
            }
        }
        Some(t)
    })
}
