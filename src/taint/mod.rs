//! The interprocedural taint dataflow engine.
//!
//! A per-function MAY-analysis: given a CFG over the IL, classification
//! predicates for sources/sinks/sanitizers/propagators, and (optionally)
//! precomputed signatures of callees, it computes the taints held by every
//! tracked storage location at every program point and streams out the
//! results: sink findings, return-taint summaries, and by-side-effect
//! input-taint summaries.
//!
//! # Architecture
//!
//! Leaves first:
//!
//! 1. **Values** ([`types`]): taint tokens and their origins (source
//!    match, polymorphic variable, control), call traces, token trails,
//!    taint sets, label formulas with lazy three-valued resolution.
//! 2. **Shapes** ([`shape`]): structural taint layout of compound values;
//!    cells pairing an extended taint status with a nested shape.
//! 3. **Environment** ([`env`]): l-value → cell trees, control taints, the
//!    propagator deposit/pending queues, and the MAY join.
//! 4. **Matching** ([`matching`]): per-kind match specs, best-match
//!    canonicalization, options, and the engine configuration (predicates,
//!    result handler, hooks).
//! 5. **Checker** ([`check`]): recursive expression/l-value traversal
//!    applying sources, sanitizers, propagators, and sinks in pipeline
//!    order; instruction and call handling including signature
//!    instantiation and the bean accessor heuristic.
//! 6. **Signatures** ([`sig`]): polymorphic summaries and their
//!    substitution at call sites.
//! 7. **Fixpoint** ([`fixpoint`]): per-node transfer, monotone join,
//!    iterate-to-fixpoint with a wall-clock timeout.
//! 8. **Results** ([`results`]): the result stream and trail finalization.
//!
//! # Entry point
//!
//! ```ignore
//! use taintflow::taint::{fixpoint, JavaPropsCache, TaintConfig, TaintOptions};
//!
//! let mapping = fixpoint(
//!     lang,
//!     &TaintOptions::default(),
//!     &config,          // predicates, handler, hooks
//!     &mut JavaPropsCache::new(),
//!     &cfg,
//!     None,             // initial environment (interprocedural re-entry)
//!     Some("handler"),  // function name for results and logs
//! );
//! ```

pub mod check;
pub mod env;
pub mod fixpoint;
pub mod matching;
pub mod results;
pub mod shape;
pub mod sig;
pub mod types;

pub use env::{LvalEnv, Place};
pub use fixpoint::{fixpoint, Mapping, NodeEnvs};
pub use matching::{
    BestMatches, Bindings, BySideEffect, JavaPropsCache, PropKind, PropagatorMatch,
    PropagatorSpec, SanitizerMatch, SanitizerSpec, SinkMatch, SinkSpec, SourceMatch, SourceSpec,
    TaintConfig, TaintHooks, TaintMatch, TaintOptions, FIXPOINT_TIMEOUT,
};
pub use results::{ResultToReturn, ResultToSink, TaintResult};
pub use shape::{gather_all_taints_in_shape, Cell, Offset, Shape, Xtaint};
pub use sig::{CallInfo, Signature};
pub use types::{
    solve_precondition, taints_of_matches, CallTrace, LabelReq, Origin, Precondition, SigBase,
    SigLval, SourceOrigin, Taint, TaintSet, DEFAULT_LABEL, MAX_POLY_OFFSET,
};
