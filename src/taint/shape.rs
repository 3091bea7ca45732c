//! Shape model: structural taint layout of compound values.
//!
//! A *shape* describes where taint sits inside a record/tuple/object value.
//! `Bot` is "no structure known" (scalars, opaque values); `Obj` maps
//! offsets to cells. A *cell* pairs an extended taint status with a nested
//! shape, so arbitrary `x.a[0]."k"` layouts nest naturally.
//!
//! The central consumer-facing operation is [`gather_all_taints_in_shape`]:
//! whenever a compound value is consumed opaquely (passed to an unknown
//! function, used as a sink argument), the consumer must see every taint
//! reachable inside it; `sink(["ok", tainted])` is still a finding.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::taint::types::TaintSet;

// =============================================================================
// Offsets (plain form)
// =============================================================================

/// One step of a storage path, stripped of IL ranges and index expressions.
///
/// Used as shape keys, environment paths, and polymorphic-lval offsets.
/// Computed indexes degrade to `Any`: index-stores taint the whole
/// container (array-index sensitivity is a non-goal).
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Offset {
    /// Field name.
    Fld(String),
    /// Constant string key.
    Str(String),
    /// Constant integer key.
    Int(i64),
    /// Computed ("any") index.
    Any,
}

impl Offset {
    /// Field-style offsets are the ones polymorphic taint may extend over.
    #[inline]
    pub fn is_field_like(&self) -> bool {
        !matches!(self, Offset::Any)
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Offset::Fld(n) => write!(f, "{n}"),
            Offset::Str(s) => write!(f, "[\"{s}\"]"),
            Offset::Int(i) => write!(f, "[{i}]"),
            Offset::Any => write!(f, "[*]"),
        }
    }
}

// =============================================================================
// Xtaint, cells, shapes
// =============================================================================

/// Extended taint status of a cell.
///
/// `Clean` records an explicit sanitization: unlike `None` (never seen), it
/// suppresses inheritance of polymorphic taint from shorter offset paths.
/// The checker-transient "sanitized at this evaluation site" status is a
/// separate type ([`crate::taint::check`]), never stored in cells.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Xtaint {
    #[default]
    None,
    Clean,
    Tainted(TaintSet),
}

impl Xtaint {
    /// The taints held, if any.
    pub fn taints(&self) -> TaintSet {
        match self {
            Xtaint::Tainted(ts) => ts.clone(),
            _ => TaintSet::new(),
        }
    }

    /// MAY-analysis join: `Clean` is not dominant across branches.
    #[must_use]
    pub fn join(&self, other: &Xtaint) -> Xtaint {
        match (self, other) {
            (Xtaint::Tainted(a), Xtaint::Tainted(b)) => Xtaint::Tainted(a.clone().union(b)),
            (Xtaint::Tainted(t), _) | (_, Xtaint::Tainted(t)) => Xtaint::Tainted(t.clone()),
            (Xtaint::Clean, _) | (_, Xtaint::Clean) => Xtaint::Clean,
            (Xtaint::None, Xtaint::None) => Xtaint::None,
        }
    }
}

/// A cell: extended taint status plus the shape of the value beneath it.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Cell {
    pub xtaint: Xtaint,
    pub shape: Shape,
}

impl Cell {
    /// A cell holding taints with no known structure.
    pub fn tainted(taints: TaintSet) -> Self {
        Self {
            xtaint: Xtaint::Tainted(taints),
            shape: Shape::Bot,
        }
    }

    /// An explicitly sanitized cell (subtree dropped).
    pub fn clean() -> Self {
        Self {
            xtaint: Xtaint::Clean,
            shape: Shape::Bot,
        }
    }

    /// Pointwise join of two cells.
    #[must_use]
    pub fn join(&self, other: &Cell) -> Cell {
        Cell {
            xtaint: self.xtaint.join(&other.xtaint),
            shape: self.shape.join(&other.shape),
        }
    }
}

/// Structural description of a compound value.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Shape {
    /// No structure known.
    #[default]
    Bot,
    /// Offset-addressed fields.
    Obj(BTreeMap<Offset, Cell>),
}

impl Shape {
    /// Shape of a tuple value: integer offsets `0..n`.
    pub fn tuple_like_obj(items: Vec<(TaintSet, Shape)>) -> Shape {
        let fields = items
            .into_iter()
            .enumerate()
            .map(|(i, (taints, shape))| {
                let xtaint = if taints.is_empty() {
                    Xtaint::None
                } else {
                    Xtaint::Tainted(taints)
                };
                (Offset::Int(i as i64), Cell { xtaint, shape })
            })
            .collect();
        Shape::Obj(fields)
    }

    /// Shape of a record value: named offsets.
    pub fn record_like_obj(items: Vec<(String, TaintSet, Shape)>) -> Shape {
        let fields = items
            .into_iter()
            .map(|(name, taints, shape)| {
                let xtaint = if taints.is_empty() {
                    Xtaint::None
                } else {
                    Xtaint::Tainted(taints)
                };
                (Offset::Fld(name), Cell { xtaint, shape })
            })
            .collect();
        Shape::Obj(fields)
    }

    /// Structural join: offsets union, cells join pointwise.
    #[must_use]
    pub fn join(&self, other: &Shape) -> Shape {
        match (self, other) {
            (Shape::Bot, s) | (s, Shape::Bot) => s.clone(),
            (Shape::Obj(a), Shape::Obj(b)) => {
                let mut out = a.clone();
                for (off, cell) in b {
                    out.entry(off.clone())
                        .and_modify(|c| *c = c.join(cell))
                        .or_insert_with(|| cell.clone());
                }
                Shape::Obj(out)
            }
        }
    }

    /// Does the shape contain any tainted cell?
    pub fn has_taints(&self) -> bool {
        match self {
            Shape::Bot => false,
            Shape::Obj(fields) => fields
                .values()
                .any(|c| matches!(c.xtaint, Xtaint::Tainted(_)) || c.shape.has_taints()),
        }
    }
}

// =============================================================================
// Queries
// =============================================================================

/// Deep union of every taint reachable in a shape.
pub fn gather_all_taints_in_shape(shape: &Shape) -> TaintSet {
    let mut out = TaintSet::new();
    gather_into(shape, &mut out);
    out
}

fn gather_into(shape: &Shape, out: &mut TaintSet) {
    if let Shape::Obj(fields) = shape {
        for cell in fields.values() {
            if let Xtaint::Tainted(ts) = &cell.xtaint {
                out.union_with(ts);
            }
            gather_into(&cell.shape, out);
        }
    }
}

/// Exact lookup of a cell at an offset path within a shape.
pub fn find_in_shape<'s>(shape: &'s Shape, offsets: &[Offset]) -> Option<&'s Cell> {
    let (first, rest) = offsets.split_first()?;
    match shape {
        Shape::Bot => None,
        Shape::Obj(fields) => {
            let cell = fields.get(first)?;
            if rest.is_empty() {
                Some(cell)
            } else {
                find_in_shape(&cell.shape, rest)
            }
        }
    }
}

/// Exact lookup of a cell at an offset path under a cell.
pub fn find_in_cell<'c>(cell: &'c Cell, offsets: &[Offset]) -> Option<&'c Cell> {
    if offsets.is_empty() {
        Some(cell)
    } else {
        find_in_shape(&cell.shape, offsets)
    }
}

/// Enumerate every tainted location under a cell as `(offset path, taints)`
/// pairs, the root included (with an empty path).
pub fn enum_in_cell(cell: &Cell) -> Vec<(Vec<Offset>, TaintSet)> {
    let mut out = Vec::new();
    enum_into(cell, &mut Vec::new(), &mut out);
    out
}

fn enum_into(cell: &Cell, path: &mut Vec<Offset>, out: &mut Vec<(Vec<Offset>, TaintSet)>) {
    if let Xtaint::Tainted(ts) = &cell.xtaint {
        out.push((path.clone(), ts.clone()));
    }
    if let Shape::Obj(fields) = &cell.shape {
        for (off, sub) in fields {
            path.push(off.clone());
            enum_into(sub, path, out);
            path.pop();
        }
    }
}

/// Union taints into the cell at `offsets`, creating intermediate `Obj`
/// cells along missing path segments.
pub fn add_in_cell(cell: &mut Cell, offsets: &[Offset], taints: &TaintSet) {
    match offsets.split_first() {
        None => {
            cell.xtaint = match std::mem::take(&mut cell.xtaint) {
                Xtaint::Tainted(ts) => Xtaint::Tainted(ts.union(taints)),
                // Writing taint over Clean/None re-taints the cell.
                Xtaint::None | Xtaint::Clean => Xtaint::Tainted(taints.clone()),
            };
        }
        Some((first, rest)) => {
            let fields = match &mut cell.shape {
                Shape::Obj(fields) => fields,
                Shape::Bot => {
                    cell.shape = Shape::Obj(BTreeMap::new());
                    match &mut cell.shape {
                        Shape::Obj(fields) => fields,
                        Shape::Bot => unreachable!(),
                    }
                }
            };
            let sub = fields.entry(first.clone()).or_default();
            add_in_cell(sub, rest, taints);
        }
    }
}

/// Install a shape (joined with whatever is there) at `offsets`, in
/// addition to unioning `taints` at the same cell.
pub fn add_shape_in_cell(cell: &mut Cell, offsets: &[Offset], taints: &TaintSet, shape: &Shape) {
    match offsets.split_first() {
        None => {
            if !taints.is_empty() {
                add_in_cell(cell, &[], taints);
            }
            cell.shape = cell.shape.join(shape);
        }
        Some((first, rest)) => {
            let fields = match &mut cell.shape {
                Shape::Obj(fields) => fields,
                Shape::Bot => {
                    cell.shape = Shape::Obj(BTreeMap::new());
                    match &mut cell.shape {
                        Shape::Obj(fields) => fields,
                        Shape::Bot => unreachable!(),
                    }
                }
            };
            let sub = fields.entry(first.clone()).or_default();
            add_shape_in_cell(sub, rest, taints, shape);
        }
    }
}

/// Mark the cell at `offsets` as explicitly sanitized; the subtree below it
/// is dropped. Missing path segments are created so the sanitization is
/// recorded even for never-written locations (it must suppress later
/// polymorphic inheritance).
pub fn clean_in_cell(cell: &mut Cell, offsets: &[Offset]) {
    match offsets.split_first() {
        None => *cell = Cell::clean(),
        Some((first, rest)) => {
            let fields = match &mut cell.shape {
                Shape::Obj(fields) => fields,
                Shape::Bot => {
                    cell.shape = Shape::Obj(BTreeMap::new());
                    match &mut cell.shape {
                        Shape::Obj(fields) => fields,
                        Shape::Bot => unreachable!(),
                    }
                }
            };
            let sub = fields.entry(first.clone()).or_default();
            clean_in_cell(sub, rest);
        }
    }
}

/// True iff there is anything worth recording: non-empty taints or a shape
/// with a tainted cell.
pub fn taints_and_shape_are_relevant(taints: &TaintSet, shape: &Shape) -> bool {
    !taints.is_empty() || shape.has_taints()
}
