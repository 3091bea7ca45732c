//! Function taint signatures and their instantiation at call sites.
//!
//! A *signature* is the set of results a callee's own analysis produced,
//! phrased over polymorphic [`Var`](crate::taint::types::Origin::Var)
//! taints whose bases are the callee's inputs (`Arg(i)`, `this`, globals).
//! Instantiating a signature at a call site substitutes those placeholders
//! with whatever the caller actually passes.
//!
//! Every instantiation step fails *soft*: an entry whose l-value cannot be
//! resolved is skipped, a taint whose substituted precondition resolves
//! false is dropped, and the remaining entries still apply.

use tracing::debug;

use crate::il::{Expr, Name, Range};
use crate::taint::env::{LvalEnv, Place};
use crate::taint::results::TaintResult;
use crate::taint::shape::{find_in_shape, Shape, Xtaint};
use crate::taint::types::{
    map_preconditions, CallTrace, Origin, SigBase, SigLval, SourceOrigin, Taint, TaintSet,
};

/// A function's taint signature: results over polymorphic taints.
pub type Signature = Vec<TaintResult>;

/// Everything the substitution needs to know about one call site.
pub struct CallInfo<'a> {
    /// Range of the call instruction (becomes the `Call` frame site).
    pub call_range: Range,
    /// Actual argument expressions, in order.
    pub args: &'a [Expr],
    /// Taints and shape of each argument, as evaluated left-to-right.
    pub arg_eval: &'a [(TaintSet, Shape)],
    /// The receiver's environment place, for method calls.
    pub receiver_place: Option<&'a Place>,
    /// The callee's formal parameters.
    pub fparams: &'a [Name],
}

/// Resolve a signature l-value to a caller-side place, for `ToLval`
/// side-effect entries. `None` when the actual argument is not an l-value
/// (e.g. a literal); the entry is skipped.
pub fn place_of_sig_lval(sig_lval: &SigLval, info: &CallInfo<'_>, env: &LvalEnv) -> Option<Place> {
    let mut place = match &sig_lval.base {
        SigBase::Arg { index, .. } => {
            let arg = info.args.get(*index)?;
            Place::of_lval(arg.as_lval()?)
        }
        SigBase::This => info.receiver_place?.clone(),
        SigBase::Global(ident) => Place::var(resolve_global(env, ident)),
    };
    place.offsets.extend(sig_lval.offsets.iter().cloned());
    Some(place)
}

/// Globals are matched by identifier: the signature cannot know the
/// caller's sid for the global, and global identifiers are unique.
fn resolve_global(env: &LvalEnv, ident: &str) -> Name {
    env.seq_of_tainted()
        .map(|(name, _)| name)
        .find(|name| name.ident == ident)
        .cloned()
        .unwrap_or_else(|| Name::new(ident, 0))
}

/// The caller-side taints standing behind a polymorphic l-value.
///
/// For globals and fields of `this` that the caller never touched, a fresh
/// `Var` taint over the same l-value is synthesized: such summaries must
/// transit callers that do not write them locally.
pub fn taints_of_sig_lval(env: &LvalEnv, info: &CallInfo<'_>, sig_lval: &SigLval) -> TaintSet {
    match &sig_lval.base {
        SigBase::Arg { index, .. } => {
            let Some((arg_taints, arg_shape)) = info.arg_eval.get(*index) else {
                debug!(index, "signature references a missing argument; entry inert");
                return TaintSet::new();
            };
            if sig_lval.offsets.is_empty() {
                return arg_taints.clone();
            }
            // Field of an argument: the evaluated shape knows best (this
            // covers record literals passed directly), the environment is
            // the fallback for plain l-value arguments.
            if let Some(cell) = find_in_shape(arg_shape, &sig_lval.offsets) {
                if let Xtaint::Tainted(ts) = &cell.xtaint {
                    return ts.clone();
                }
            }
            if let Some(arg_lval) = info.args.get(*index).and_then(Expr::as_lval) {
                let mut place = Place::of_lval(arg_lval);
                place.offsets.extend(sig_lval.offsets.iter().cloned());
                if let Some(cell) = env.find_lval(&place) {
                    return cell.xtaint.taints();
                }
            }
            TaintSet::new()
        }
        SigBase::This | SigBase::Global(_) => {
            let found = place_of_sig_lval(sig_lval, info, env)
                .and_then(|place| env.find_lval(&place).map(|c| c.xtaint.taints()))
                .unwrap_or_default();
            if found.is_empty() {
                // Implicit input: pass the obligation up to our own caller.
                TaintSet::singleton(Taint::poly(sig_lval.clone()))
            } else {
                found
            }
        }
    }
}

/// Substitute one signature taint with its caller-side counterparts.
///
/// - `Source` origins gain a `Call` frame on their trace (and have their
///   preconditions substituted; an unsatisfiable precondition drops the
///   taint).
/// - `Var` origins resolve through [`taints_of_sig_lval`]; the signature
///   taint's trail is appended to each concrete taint.
/// - `Control` stands for the caller's control taints at the call site.
pub fn instantiate_taint(env: &LvalEnv, info: &CallInfo<'_>, taint: &Taint) -> Vec<Taint> {
    match &taint.orig {
        Origin::Source(source) => {
            let subst = |pre: &[Taint]| -> Vec<Taint> {
                pre.iter()
                    .flat_map(|t| instantiate_taint(env, info, t))
                    .collect()
            };
            let Some(mapped) = map_preconditions(taint, &subst) else {
                return Vec::new();
            };
            let mapped_source = match &mapped.orig {
                Origin::Source(s) => s,
                _ => source,
            };
            let mut callee_tokens = mapped.rev_tokens.clone();
            callee_tokens.reverse();
            vec![Taint {
                orig: Origin::Source(SourceOrigin {
                    call_trace: CallTrace::Call {
                        call_site: info.call_range,
                        tokens: callee_tokens,
                        inner: Box::new(mapped_source.call_trace.clone()),
                    },
                    label: mapped_source.label.clone(),
                    precondition: mapped_source.precondition.clone(),
                }),
                rev_tokens: Vec::new(),
            }]
        }
        Origin::Var(sig_lval) => taints_of_sig_lval(env, info, sig_lval)
            .iter()
            .map(|concrete| {
                let mut t = concrete.clone();
                t.rev_tokens.extend(taint.rev_tokens.iter().copied());
                t.rev_tokens.push(info.call_range);
                t
            })
            .collect(),
        Origin::Control => env.get_control_taints().to_vec(),
    }
}

/// Substitute a set of signature taints, deduplicating by origin and
/// applying precondition substitution to every member.
pub fn instantiate_taints(env: &LvalEnv, info: &CallInfo<'_>, taints: &[Taint]) -> TaintSet {
    let mut out = TaintSet::new();
    for t in taints {
        for inst in instantiate_taint(env, info, t) {
            let subst = |pre: &[Taint]| -> Vec<Taint> {
                pre.iter()
                    .flat_map(|p| instantiate_taint(env, info, p))
                    .collect()
            };
            if let Some(mapped) = map_preconditions(&inst, &subst) {
                out.insert(mapped);
            }
        }
    }
    out
}
