//! Interprocedural behavior: signature instantiation and summaries.

use taintflow::cfg::NodeKind;
use taintflow::il::Range;
use taintflow::taint::{
    CallTrace, LabelReq, Offset, Origin, ResultToSink, SigBase, SigLval, SinkSpec, SourceSpec,
    Taint, TaintMatch, TaintOptions, TaintResult,
};
use taintflow::{Language, LvalEnv};

use crate::common::*;

fn callee_sink_entry(taints: Vec<Taint>, requires: LabelReq) -> TaintResult {
    TaintResult::ToSink(ResultToSink {
        taints,
        requires,
        sink: CallTrace::Direct(TaintMatch::new(
            "snk-callee",
            Range::line(100, 1, 10),
            SinkSpec::default(),
        )),
        merged_bindings: Default::default(),
    })
}

/// Install a signature for every callee whose call instruction sits on
/// `line`.
fn with_signature(
    config: &mut taintflow::TaintConfig,
    line: u32,
    fparams: Vec<taintflow::il::Name>,
    signature: Vec<TaintResult>,
) {
    let func_range_line = line;
    config.hooks.function_taint_signature = Some(Box::new(move |func| {
        if func.range.start.line == func_range_line {
            Some((fparams.clone(), signature.clone()))
        } else {
            None
        }
    }));
}

#[test]
fn test_s5_polymorphic_field_taint_across_call() {
    // obj.x = source()
    // foo(obj)           signature: Arg(0).x reaches a sink inside foo
    let target = taintflow::il::Lval::var(nm("obj"), Range::line(1, 1, 4))
        .dot(nm("x"), Range::line(1, 1, 6));
    let cfg = linear_cfg(vec![
        NodeKind::Instr(taintflow::il::Instr::new(
            taintflow::il::InstrKind::Call {
                ret: Some(target),
                func: taintflow::il::Expr::of_lval(taintflow::il::Lval::var(
                    taintflow::il::Name::new("source", 0),
                    Range::line(1, 20, 26),
                )),
                args: vec![],
            },
            instr_range(1),
        )),
        call_instr(2, None, "foo", vec![var_expr("obj", 2, 30)]),
    ]);
    let (mut config, results) = config_with(RuleTable {
        sources: vec![TaintMatch::new(
            "src-1",
            instr_range(1),
            SourceSpec::default(),
        )],
        ..RuleTable::default()
    });
    let poly = Taint::poly(SigLval::arg(0).with_offset(Offset::Fld("x".to_string())));
    with_signature(
        &mut config,
        2,
        vec![nm("p")],
        vec![callee_sink_entry(vec![poly], LabelReq::Bool(true))],
    );
    run(&config, &cfg);
    let sinks = to_sinks(&results.borrow());
    assert_eq!(sinks.len(), 1);
    let finding = &sinks[0];
    // The sink is the callee's, reached through this call site.
    assert_eq!(finding.sink.depth(), 1);
    assert_eq!(finding.sink.pm().range, Range::line(100, 1, 10));
    assert!(finding.taints.iter().any(|t| matches!(
        &t.orig,
        Origin::Source(s) if s.pm_range() == instr_range(1)
    )));
}

#[test]
fn test_to_return_instantiation_taints_call_result() {
    // x = source()
    // y = f(x)         signature: returns Arg(0)'s taint
    // sink(y)
    let cfg = linear_cfg(vec![
        call_instr(1, Some(var_lval("x", 1)), "source", vec![]),
        call_instr(2, Some(var_lval("y", 2)), "f", vec![var_expr("x", 2, 30)]),
        call_instr(3, None, "sink", vec![var_expr("y", 3, 10)]),
    ]);
    let (mut config, results) = config_with(RuleTable {
        sources: vec![TaintMatch::new(
            "src-1",
            instr_range(1),
            SourceSpec::default(),
        )],
        sinks: vec![TaintMatch::new(
            "snk-1",
            instr_range(3),
            SinkSpec::default(),
        )],
        ..RuleTable::default()
    });
    with_signature(
        &mut config,
        2,
        vec![nm("p")],
        vec![TaintResult::ToReturn(taintflow::taint::ResultToReturn {
            data_taints: vec![Taint::poly(SigLval::arg(0))],
            control_taints: vec![],
            return_range: Range::line(100, 1, 7),
        })],
    );
    run(&config, &cfg);
    let sinks = to_sinks(&results.borrow());
    assert_eq!(sinks.len(), 1);
    // The trail passes through the call site, in chronological order.
    let taint = sinks[0]
        .taints
        .iter()
        .find(|t| matches!(t.orig, Origin::Source(_)))
        .expect("source taint expected");
    assert!(taint.rev_tokens.contains(&instr_range(2)));
}

#[test]
fn test_to_lval_entry_writes_caller_env() {
    // x = source()
    // g(obj, x)        signature: Arg(1) flows into Arg(0).f by side effect
    // sink(obj)
    let cfg = linear_cfg(vec![
        call_instr(1, Some(var_lval("x", 1)), "source", vec![]),
        call_instr(
            2,
            None,
            "g",
            vec![var_expr("obj", 2, 30), var_expr("x", 2, 35)],
        ),
        call_instr(3, None, "sink", vec![var_expr("obj", 3, 10)]),
    ]);
    let (mut config, results) = config_with(RuleTable {
        sources: vec![TaintMatch::new(
            "src-1",
            instr_range(1),
            SourceSpec::default(),
        )],
        sinks: vec![TaintMatch::new(
            "snk-1",
            instr_range(3),
            SinkSpec::default(),
        )],
        ..RuleTable::default()
    });
    with_signature(
        &mut config,
        2,
        vec![nm("a"), nm("b")],
        vec![TaintResult::ToLval {
            taints: vec![Taint::poly(SigLval::arg(1))],
            lval: SigLval::arg(0).with_offset(Offset::Fld("f".to_string())),
        }],
    );
    run(&config, &cfg);
    assert_eq!(to_sinks(&results.borrow()).len(), 1);
}

#[test]
fn test_side_effect_summary_emitted() {
    // Analyzing `fn test_fn(p)` with p seeded polymorphic:
    //   p.x = source()
    // must summarize as ToLval(source, Arg(0).x).
    let target = taintflow::il::Lval::var(nm("p"), Range::line(1, 1, 2))
        .dot(nm("x"), Range::line(1, 1, 4));
    let cfg = linear_cfg(vec![NodeKind::Instr(taintflow::il::Instr::new(
        taintflow::il::InstrKind::Call {
            ret: Some(target),
            func: taintflow::il::Expr::of_lval(taintflow::il::Lval::var(
                taintflow::il::Name::new("source", 0),
                Range::line(1, 20, 26),
            )),
            args: vec![],
        },
        instr_range(1),
    ))]);
    let (config, results) = config_with(RuleTable {
        sources: vec![TaintMatch::new(
            "src-1",
            instr_range(1),
            SourceSpec::default(),
        )],
        ..RuleTable::default()
    });
    let mut in_env = LvalEnv::empty();
    in_env.add(
        &taintflow::taint::Place::var(nm("p")),
        &taintflow::taint::TaintSet::singleton(Taint::poly(SigLval::arg(0))),
    );
    run_seeded(
        Language::Python,
        &TaintOptions::default(),
        &config,
        &cfg,
        in_env,
    );
    let results = results.borrow();
    let summary = results
        .iter()
        .find_map(|r| match r {
            TaintResult::ToLval { taints, lval } => Some((taints.clone(), lval.clone())),
            _ => None,
        })
        .expect("a side-effect summary must be emitted");
    assert_eq!(
        summary.1,
        SigLval {
            base: SigBase::Arg { index: 0, name: None },
            offsets: vec![Offset::Fld("x".to_string())],
        }
    );
    assert!(summary
        .0
        .iter()
        .any(|t| matches!(t.orig, Origin::Source(_))));
}

#[test]
fn test_sink_requires_filters_instantiated_taints() {
    // a = source_A()
    // f(a)             callee sink requires label B: no finding
    let cfg = linear_cfg(vec![
        call_instr(1, Some(var_lval("a", 1)), "source_a", vec![]),
        call_instr(2, None, "f", vec![var_expr("a", 2, 30)]),
    ]);
    let (mut config, results) = config_with(RuleTable {
        sources: vec![TaintMatch::new(
            "src-a",
            instr_range(1),
            SourceSpec {
                label: "A".to_string(),
                ..SourceSpec::default()
            },
        )],
        ..RuleTable::default()
    });
    with_signature(
        &mut config,
        2,
        vec![nm("p")],
        vec![TaintResult::ToSink(ResultToSink {
            taints: vec![Taint::poly(SigLval::arg(0))],
            requires: LabelReq::label("B"),
            sink: CallTrace::Direct(TaintMatch::new(
                "snk-callee",
                Range::line(100, 1, 10),
                SinkSpec {
                    requires: Some(LabelReq::label("B")),
                    ..SinkSpec::default()
                },
            )),
            merged_bindings: Default::default(),
        })],
    );
    run(&config, &cfg);
    assert!(to_sinks(&results.borrow()).is_empty());
}

#[test]
fn test_excess_arguments_are_soft() {
    // f declares one parameter but is called with three; the signature
    // over Arg(0) still instantiates, nothing panics.
    let cfg = linear_cfg(vec![
        call_instr(1, Some(var_lval("x", 1)), "source", vec![]),
        call_instr(
            2,
            None,
            "f",
            vec![
                var_expr("x", 2, 30),
                var_expr("y", 2, 34),
                var_expr("z", 2, 38),
            ],
        ),
    ]);
    let (mut config, results) = config_with(RuleTable {
        sources: vec![TaintMatch::new(
            "src-1",
            instr_range(1),
            SourceSpec::default(),
        )],
        ..RuleTable::default()
    });
    with_signature(
        &mut config,
        2,
        vec![nm("p")],
        vec![callee_sink_entry(
            vec![Taint::poly(SigLval::arg(0))],
            LabelReq::Bool(true),
        )],
    );
    run(&config, &cfg);
    assert_eq!(to_sinks(&results.borrow()).len(), 1);
}
