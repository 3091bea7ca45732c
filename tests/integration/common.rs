//! Shared pseudo-IL builders and a table-driven oracle for the
//! integration tests.
//!
//! Tests hand-build tiny programs the way the dataflow analyses' unit
//! tests hand-build CFGs: one IL instruction per node, distinct source
//! lines per node so ranges never collide by accident.

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use taintflow::cfg::{Cfg, Edge, Node, NodeId, NodeKind};
use taintflow::il::{Expr, Instr, InstrKind, Lval, Name, Range};
use taintflow::taint::{
    fixpoint, JavaPropsCache, LvalEnv, Mapping, PropagatorMatch, ResultToSink, SanitizerMatch,
    SinkMatch, SourceMatch, TaintConfig, TaintOptions, TaintResult,
};
use taintflow::Language;

pub fn nm(ident: &str) -> Name {
    Name::new(ident, 1)
}

pub fn var_lval(ident: &str, line: u32) -> Lval {
    Lval::var(nm(ident), Range::line(line, 1, 3))
}

pub fn var_expr(ident: &str, line: u32, col: u32) -> Expr {
    Expr::of_lval(Lval::var(nm(ident), Range::line(line, col, col + 2)))
}

/// Range of a whole instruction on `line`.
pub fn instr_range(line: u32) -> Range {
    Range::line(line, 1, 40)
}

/// `ret = callee(args…)` (or a bare call when `ret` is `None`).
pub fn call_instr(line: u32, ret: Option<Lval>, callee: &str, args: Vec<Expr>) -> NodeKind {
    let func = Expr::of_lval(Lval::var(Name::new(callee, 0), Range::line(line, 20, 28)));
    NodeKind::Instr(Instr::new(
        InstrKind::Call { ret, func, args },
        instr_range(line),
    ))
}

/// `ret = recv.method(args…)`.
pub fn method_call_instr(
    line: u32,
    ret: Option<Lval>,
    recv: &str,
    method: &str,
    args: Vec<Expr>,
) -> NodeKind {
    let func = Expr::of_lval(
        Lval::var(nm(recv), Range::line(line, 20, 23))
            .dot(Name::new(method, 0), Range::line(line, 20, 30)),
    );
    NodeKind::Instr(Instr::new(
        InstrKind::Call { ret, func, args },
        instr_range(line),
    ))
}

/// `target = rhs`.
pub fn assign_instr(line: u32, target: &str, rhs: Expr) -> NodeKind {
    NodeKind::Instr(Instr::new(
        InstrKind::Assign {
            lval: var_lval(target, line),
            rhs,
        },
        instr_range(line),
    ))
}

/// Straight-line CFG: Enter, the given nodes in order, Exit.
pub fn linear_cfg(kinds: Vec<NodeKind>) -> Cfg {
    let mut nodes = vec![Node {
        id: NodeId(0),
        kind: NodeKind::Enter,
    }];
    for (i, kind) in kinds.into_iter().enumerate() {
        nodes.push(Node {
            id: NodeId(i + 1),
            kind,
        });
    }
    let exit = NodeId(nodes.len());
    nodes.push(Node {
        id: exit,
        kind: NodeKind::Exit,
    });
    let edges = (0..nodes.len() - 1)
        .map(|i| Edge::new(NodeId(i), NodeId(i + 1)))
        .collect();
    Cfg::new(nodes, edges, NodeId(0), vec![exit])
}

/// The rule side of a test: plain lists of matches, served by a
/// range-filtering oracle.
#[derive(Default)]
pub struct RuleTable {
    pub sources: Vec<SourceMatch>,
    pub sinks: Vec<SinkMatch>,
    pub sanitizers: Vec<SanitizerMatch>,
    pub propagators: Vec<PropagatorMatch>,
}

fn relevant(m_range: Range, node_range: Range) -> bool {
    m_range == node_range || m_range.contains(&node_range) || node_range.contains(&m_range)
}

/// Build a config serving `table` through the four predicates and
/// collecting every result batch.
pub fn config_with(table: RuleTable) -> (TaintConfig, Rc<RefCell<Vec<TaintResult>>>) {
    let results = Rc::new(RefCell::new(Vec::new()));
    let collected = results.clone();
    let mut config = TaintConfig::new("test.src", "rule-1");
    let RuleTable {
        sources,
        sinks,
        sanitizers,
        propagators,
    } = table;
    config.is_source = Box::new(move |node| {
        sources
            .iter()
            .filter(|m| relevant(m.range, node.range()))
            .cloned()
            .collect()
    });
    config.is_sink = Box::new(move |node| {
        sinks
            .iter()
            .filter(|m| relevant(m.range, node.range()))
            .cloned()
            .collect()
    });
    config.is_sanitizer = Box::new(move |node| {
        sanitizers
            .iter()
            .filter(|m| relevant(m.range, node.range()))
            .cloned()
            .collect()
    });
    config.is_propagator = Box::new(move |node| {
        propagators
            .iter()
            .filter(|m| relevant(m.range, node.range()))
            .cloned()
            .collect()
    });
    config.handle_results = Box::new(move |_, batch, _| collected.borrow_mut().extend(batch));
    (config, results)
}

pub fn run(config: &TaintConfig, cfg: &Cfg) -> Mapping {
    run_with(Language::Python, &TaintOptions::default(), config, cfg)
}

pub fn run_with(
    lang: Language,
    options: &TaintOptions,
    config: &TaintConfig,
    cfg: &Cfg,
) -> Mapping {
    let mut cache = JavaPropsCache::new();
    fixpoint(lang, options, config, &mut cache, cfg, None, Some("test_fn"))
}

pub fn run_seeded(
    lang: Language,
    options: &TaintOptions,
    config: &TaintConfig,
    cfg: &Cfg,
    in_env: LvalEnv,
) -> Mapping {
    let mut cache = JavaPropsCache::new();
    fixpoint(
        lang,
        options,
        config,
        &mut cache,
        cfg,
        Some(in_env),
        Some("test_fn"),
    )
}

pub fn to_sinks(results: &[TaintResult]) -> Vec<ResultToSink> {
    results
        .iter()
        .filter_map(|r| match r {
            TaintResult::ToSink(s) => Some(s.clone()),
            _ => None,
        })
        .collect()
}
