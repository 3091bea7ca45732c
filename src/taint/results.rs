//! Analysis results: sink findings, return summaries, side-effect
//! summaries.
//!
//! Results stream out through the configured handler as they are
//! discovered. Whether a `ToSink`'s taints actually satisfy the sink's
//! `requires` formula may still be open here (polymorphic preconditions are
//! resolved at instantiation time); the formula travels with the result.
//!
//! Token trails are kept reversed while taints propagate and re-reversed
//! exactly once, in [`finalize_results`], so consumers always see
//! chronological order.

use serde::{Deserialize, Serialize};

use crate::il::Range;
use crate::taint::matching::{Bindings, SinkMatch};
use crate::taint::types::{CallTrace, LabelReq, SigLval, Taint};

/// Taints reached a sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultToSink {
    /// The taints seen at the sink (data ∪ shape-reachable ∪ control).
    pub taints: Vec<Taint>,
    /// The sink's label requirement; `Bool(true)` when unconstrained.
    /// Resolution may have been deferred; the handler re-solves after any
    /// remaining substitution.
    pub requires: LabelReq,
    /// The sink match, wrapped in the call trace through which it was
    /// reached.
    pub sink: CallTrace<SinkMatch>,
    /// Metavariable bindings merged across sources and sink.
    pub merged_bindings: Bindings,
}

/// Taints flow out through the function's return value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultToReturn {
    pub data_taints: Vec<Taint>,
    /// Control taints live at the return node; callers merge these into
    /// their own control environment when tracking control.
    pub control_taints: Vec<Taint>,
    /// Range of the `return` token.
    pub return_range: Range,
}

/// One analysis result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaintResult {
    ToSink(ResultToSink),
    ToReturn(ResultToReturn),
    /// Taints flow into a function input (argument, receiver field, or
    /// global) by side effect: the function's side-effect summary.
    ToLval { taints: Vec<Taint>, lval: SigLval },
}

/// Result identity for deduplication across fixpoint iterations: taints
/// compare by origin (token trails grow along loops and must not make a
/// result look new).
pub fn same_result(a: &TaintResult, b: &TaintResult) -> bool {
    match (a, b) {
        (TaintResult::ToSink(a), TaintResult::ToSink(b)) => {
            a.sink.pm().spec_id == b.sink.pm().spec_id
                && a.sink.pm().range == b.sink.pm().range
                && a.sink.depth() == b.sink.depth()
                && a.requires == b.requires
                && a.merged_bindings == b.merged_bindings
                && same_taints(&a.taints, &b.taints)
        }
        (TaintResult::ToReturn(a), TaintResult::ToReturn(b)) => {
            a.return_range == b.return_range
                && same_taints(&a.data_taints, &b.data_taints)
                && same_taints(&a.control_taints, &b.control_taints)
        }
        (
            TaintResult::ToLval { taints: ta, lval: la },
            TaintResult::ToLval { taints: tb, lval: lb },
        ) => la == lb && same_taints(ta, tb),
        _ => false,
    }
}

fn same_taints(a: &[Taint], b: &[Taint]) -> bool {
    a.len() == b.len() && a.iter().all(|t| b.iter().any(|o| o.same_origin(t)))
}

/// Reverse every token trail into chronological order. Called once per
/// batch, right before the batch is handed to the result handler.
pub fn finalize_results(results: &mut [TaintResult]) {
    for result in results {
        match result {
            TaintResult::ToSink(r) => finalize_taints(&mut r.taints),
            TaintResult::ToReturn(r) => {
                finalize_taints(&mut r.data_taints);
                finalize_taints(&mut r.control_taints);
            }
            TaintResult::ToLval { taints, .. } => finalize_taints(taints),
        }
    }
}

fn finalize_taints(taints: &mut [Taint]) {
    for t in taints {
        t.rev_tokens.reverse();
    }
}
