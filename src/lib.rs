//! taintflow: a per-function interprocedural taint dataflow engine.
//!
//! The crate implements the fixpoint analysis at the heart of a
//! source-to-sink security scanner: a monotone forward dataflow over the
//! CFG of one function in a small IL, with field-sensitive l-value
//! tracking, user-defined taint labels with lazily-resolved boolean
//! preconditions, user-wired taint propagators, and polymorphic argument
//! taint for interprocedural summaries.
//!
//! Parsing, IL lowering, CFG construction, rule loading, and the pattern
//! matcher are collaborator concerns: the engine consumes a finished
//! [`cfg::Cfg`] and opaque classification predicates through
//! [`taint::TaintConfig`], and streams results back through the handler in
//! that config.
//!
//! # Quick tour
//!
//! - [`il`]: the intermediate language (expressions, l-values,
//!   instructions, ranges).
//! - [`cfg`]: control-flow graphs over IL nodes.
//! - [`taint`]: the engine itself; [`taint::fixpoint`] is the entry
//!   point.
//! - [`lang`]: the few language-dependent policy knobs.
//!
//! The analysis is strictly single-threaded per invocation and best-effort
//! throughout: malformed input degrades to empty taint, unresolvable
//! signature entries are skipped, and a fixpoint timeout accepts the last
//! mapping rather than failing.

pub mod cfg;
pub mod error;
pub mod il;
pub mod lang;
pub mod taint;

pub use error::{Result, TaintflowError};
pub use lang::Language;
pub use taint::{fixpoint, JavaPropsCache, LvalEnv, Mapping, TaintConfig, TaintOptions};
