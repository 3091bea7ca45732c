//! Transfer function and forward fixpoint.
//!
//! A single-threaded, worklist-free iterative forward dataflow: every pass
//! visits the nodes in id order, computes each node's IN as the join of its
//! predecessors' OUT (the entry node's IN is the supplied initial
//! environment), and applies the transfer function. Iteration stops when no
//! OUT changed between passes, or when the wall-clock timeout expires, in
//! which case the last mapping is accepted as a sound over-approximation
//! and no error surfaces.
//!
//! After convergence, the entry environment is compared against the final
//! environment: polymorphic inputs whose cells gained taints produce the
//! function's side-effect summary (`ToLval` results).

use std::time::Instant;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cfg::{Cfg, Node, NodeId, NodeKind};
use crate::il::{AnyNode, Range};
use crate::lang::Language;
use crate::taint::check::Checker;
use crate::taint::env::{LvalEnv, Place};
use crate::taint::matching::{BestMatches, JavaPropsCache, TaintConfig, TaintOptions};
use crate::taint::results::{finalize_results, ResultToReturn, TaintResult};
use crate::taint::shape::{
    enum_in_cell, find_in_cell, gather_all_taints_in_shape, taints_and_shape_are_relevant,
};
use crate::taint::types::{taints_of_matches, Origin, Taint, TaintSet};

/// Backstop on pass count; the lattice bounds iteration long before this.
const MAX_FIXPOINT_PASSES: usize = 1000;

/// Environments computed for one CFG node.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeEnvs {
    pub in_env: LvalEnv,
    pub out_env: LvalEnv,
}

/// The fixpoint's output: per-node IN/OUT environments.
pub type Mapping = FxHashMap<NodeId, NodeEnvs>;

/// Run the taint analysis over one function's CFG.
///
/// `in_env` seeds the entry node (non-empty for interprocedural re-entry:
/// parameters carrying polymorphic taint); `name` is used in results and
/// logs. Findings stream through `config.handle_results` as they are
/// discovered; the final call delivers the side-effect summaries.
pub fn fixpoint(
    lang: Language,
    options: &TaintOptions,
    config: &TaintConfig,
    java_props: &mut JavaPropsCache,
    cfg: &Cfg,
    in_env: Option<LvalEnv>,
    name: Option<&str>,
) -> Mapping {
    let fun_name = name.unwrap_or("<anonymous>");
    let best = BestMatches::compute(cfg, config);
    let mut checker = Checker::new(lang, options, config, &best, java_props);
    let enter_env = in_env.unwrap_or_default();
    let mut mapping: Mapping = cfg
        .nodes
        .iter()
        .map(|n| (n.id, NodeEnvs::default()))
        .collect();

    let deadline = Instant::now() + options.fixpoint_timeout;
    let mut passes = 0usize;
    loop {
        passes += 1;
        let mut changed = false;
        for node in &cfg.nodes {
            let in_env = if node.id == cfg.entry {
                enter_env.clone()
            } else {
                join_predecessors(cfg, &mapping, node.id)
            };
            let out_env = transfer(&mut checker, config, node, in_env.clone());
            let entry = mapping.get_mut(&node.id).expect("node ids are mapped");
            if entry.out_env != out_env {
                changed = true;
            }
            entry.in_env = in_env;
            entry.out_env = out_env;
            let mut batch = checker.take_batch();
            if !batch.is_empty() {
                finalize_results(&mut batch);
                (config.handle_results)(fun_name, batch, &mapping[&node.id].out_env);
            }
        }
        if !changed {
            debug!(
                rule = %config.rule_id,
                function = fun_name,
                passes,
                "taint fixpoint converged"
            );
            break;
        }
        if passes >= MAX_FIXPOINT_PASSES {
            warn!(
                rule = %config.rule_id,
                function = fun_name,
                passes,
                "taint fixpoint pass limit reached; accepting current mapping"
            );
            break;
        }
        if Instant::now() >= deadline {
            warn!(
                rule = %config.rule_id,
                file = %config.filepath,
                function = fun_name,
                passes,
                "taint fixpoint timed out; accepting current mapping"
            );
            break;
        }
    }

    // Side-effect summary: inputs whose cells gained taints between entry
    // and exit flowed taint out of the function by mutation.
    let final_env = final_env_of(cfg, &mapping);
    for summary in side_effect_summaries(&enter_env, &final_env) {
        checker.emit(summary);
    }
    let mut batch = checker.take_batch();
    if !batch.is_empty() {
        finalize_results(&mut batch);
        (config.handle_results)(fun_name, batch, &final_env);
    }

    mapping
}

fn join_predecessors(cfg: &Cfg, mapping: &Mapping, id: NodeId) -> LvalEnv {
    let mut acc: Option<LvalEnv> = None;
    for pred in cfg.predecessors(id) {
        let out = &mapping[pred].out_env;
        acc = Some(match acc {
            None => out.clone(),
            Some(prev) => prev.union(out),
        });
    }
    acc.unwrap_or_default()
}

fn final_env_of(cfg: &Cfg, mapping: &Mapping) -> LvalEnv {
    let mut acc: Option<LvalEnv> = None;
    for exit in &cfg.exits {
        if let Some(envs) = mapping.get(exit) {
            acc = Some(match acc {
                None => envs.out_env.clone(),
                Some(prev) => prev.union(&envs.out_env),
            });
        }
    }
    acc.unwrap_or_default()
}

/// Per-node transfer. The environment is threaded through the checker; the
/// at-exit hook is consulted at every node.
fn transfer(
    checker: &mut Checker<'_>,
    config: &TaintConfig,
    node: &Node,
    mut env: LvalEnv,
) -> LvalEnv {
    match &node.kind {
        NodeKind::Enter
        | NodeKind::Exit
        | NodeKind::Join
        | NodeKind::Goto
        | NodeKind::Other => {}
        NodeKind::Instr(instr) => checker.flow_instr(&mut env, instr),
        NodeKind::Cond(e) | NodeKind::Throw(e) => {
            let r = checker.check_expr(&mut env, e);
            if config.track_control {
                let mut taints = r.taints;
                taints.union_with(&gather_all_taints_in_shape(&r.shape));
                env.add_control_taints(&taints);
            }
        }
        NodeKind::Return(tok, e) => {
            let r = checker.check_expr(&mut env, e);
            if taints_and_shape_are_relevant(&r.taints, &r.shape) {
                let data = r.taints.clone().union(&gather_all_taints_in_shape(&r.shape));
                checker.emit(TaintResult::ToReturn(ResultToReturn {
                    data_taints: data.to_vec(),
                    control_taints: env.get_control_taints().to_vec(),
                    return_range: *tok,
                }));
            }
        }
        NodeKind::Lambda { params } => {
            for p in params {
                // Shadow stale taint from a prior loop iteration, then let
                // the parameter match as a source in its own right.
                env.clean(&Place::var(p.clone()));
                let matches = (config.is_source)(AnyNode::Name(p, Range::UNKNOWN));
                let taints = taints_of_matches(&matches, &TaintSet::new());
                env.add(&Place::var(p.clone()), &taints);
            }
        }
    }
    if let Some(hook) = config.hooks.check_tainted_at_exit_sinks.as_ref() {
        if let Some((taints, sinks)) = hook(&env, node) {
            for m in sinks {
                checker.emit_sink_match(&env, taints.clone(), m);
            }
        }
    }
    env
}

/// Diff the entry environment against the final one: for every polymorphic
/// input, any cell that gained taints yields a `ToLval` entry of the
/// function's summary.
fn side_effect_summaries(enter_env: &LvalEnv, exit_env: &LvalEnv) -> Vec<TaintResult> {
    let mut out = Vec::new();
    for (var, enter_cell) in enter_env.seq_of_tainted() {
        let root_sig = enter_cell.xtaint.taints().iter().find_map(|t| match &t.orig {
            Origin::Var(sig) => Some(sig.clone()),
            _ => None,
        });
        let Some(root_sig) = root_sig else { continue };
        let Some(exit_cell) = exit_env.find_var(var) else {
            continue;
        };
        for (path, exit_taints) in enum_in_cell(exit_cell) {
            let enter_at = find_in_cell(enter_cell, &path)
                .map(|c| c.xtaint.taints())
                .unwrap_or_default();
            let new: Vec<Taint> = exit_taints
                .iter()
                .filter(|t| !enter_at.iter().any(|e| e.same_origin(t)))
                .cloned()
                .collect();
            if new.is_empty() {
                continue;
            }
            let mut lval = root_sig.clone();
            lval.offsets.extend(path);
            out.push(TaintResult::ToLval { taints: new, lval });
        }
    }
    out
}
