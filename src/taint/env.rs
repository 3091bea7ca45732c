//! The l-value environment: what the dataflow tracks per program point.
//!
//! An environment maps root variables to cell trees (field-sensitive taint),
//! carries the control-dependency taints currently guarding execution, and
//! holds the two halves of the propagator protocol: taints *deposited* by a
//! `from` propagator awaiting a matching destination, and destinations
//! *pending* a deposit that has not happened yet.
//!
//! Environments form a lattice under the MAY-analysis join: cells join
//! pointwise, structural offsets union, and `Clean` joined with `Tainted`
//! yields `Tainted`; a sanitization on one branch does not erase taint
//! flowing around it.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::il::{self, Name};
use crate::taint::shape::{
    add_in_cell, add_shape_in_cell, clean_in_cell, find_in_cell, Cell, Offset, Shape,
};
use crate::taint::types::TaintSet;

// =============================================================================
// Places
// =============================================================================

/// Environment-side l-value: a tracked root plus a plain offset path.
///
/// IL l-values convert via [`Place::of_lval`], which degrades computed
/// indexes to the container itself (index-stores taint the whole container;
/// array-index sensitivity is a non-goal).
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Place {
    pub var: Name,
    pub offsets: Vec<Offset>,
}

impl Place {
    /// A bare-variable place.
    #[inline]
    pub fn var(name: Name) -> Self {
        Self {
            var: name,
            offsets: Vec::new(),
        }
    }

    /// Extend with an offset.
    pub fn with_offset(mut self, off: Offset) -> Self {
        self.offsets.push(off);
        self
    }

    /// Convert an IL l-value. The path is truncated at the first computed
    /// index, addressing the whole container instead.
    pub fn of_lval(lval: &il::Lval) -> Place {
        let mut offsets = Vec::with_capacity(lval.offsets.len());
        for item in &lval.offsets {
            match plain_offset(&item.off) {
                Offset::Any => break,
                off => offsets.push(off),
            }
        }
        Place {
            var: lval.base.tracked_name(),
            offsets,
        }
    }
}

impl fmt::Display for Place {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.var)?;
        for off in &self.offsets {
            write!(f, ".{off}")?;
        }
        Ok(())
    }
}

/// Strip an IL offset down to its plain form; computed indexes become
/// `Any`.
pub fn plain_offset(off: &il::Offset) -> Offset {
    match off {
        il::Offset::Dot(n) => Offset::Fld(n.ident.clone()),
        il::Offset::StrKey(s) => Offset::Str(s.clone()),
        il::Offset::IntKey(i) => Offset::Int(*i),
        il::Offset::Idx(_) => Offset::Any,
    }
}

// =============================================================================
// Environment
// =============================================================================

/// Per-program-point taint environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LvalEnv {
    tainted: BTreeMap<Name, Cell>,
    control: TaintSet,
    pending: BTreeMap<String, BTreeSet<Place>>,
    propagated: BTreeMap<String, TaintSet>,
}

impl LvalEnv {
    /// The empty environment.
    #[inline]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Lattice join of two environments (pointwise union everywhere).
    #[must_use]
    pub fn union(&self, other: &LvalEnv) -> LvalEnv {
        let mut tainted = self.tainted.clone();
        for (var, cell) in &other.tainted {
            tainted
                .entry(var.clone())
                .and_modify(|c| *c = c.join(cell))
                .or_insert_with(|| cell.clone());
        }
        let mut pending = self.pending.clone();
        for (prop, places) in &other.pending {
            pending
                .entry(prop.clone())
                .or_default()
                .extend(places.iter().cloned());
        }
        let mut propagated = self.propagated.clone();
        for (prop, taints) in &other.propagated {
            propagated
                .entry(prop.clone())
                .and_modify(|t| t.union_with(taints))
                .or_insert_with(|| taints.clone());
        }
        LvalEnv {
            tainted,
            control: self.control.clone().union(&other.control),
            pending,
            propagated,
        }
    }

    /// Exact lookup: no polymorphic fallback, no prefix inheritance. A
    /// `Clean` cell is returned as such so callers can distinguish
    /// "sanitized here" from "never seen".
    pub fn find_lval(&self, place: &Place) -> Option<&Cell> {
        let root = self.tainted.get(&place.var)?;
        find_in_cell(root, &place.offsets)
    }

    /// Root cell of a variable.
    #[inline]
    pub fn find_var(&self, var: &Name) -> Option<&Cell> {
        self.tainted.get(var)
    }

    /// Union taints into the cell at `place`, creating intermediate cells.
    /// A no-op for empty taint sets.
    pub fn add(&mut self, place: &Place, taints: &TaintSet) {
        if taints.is_empty() {
            return;
        }
        let root = self.tainted.entry(place.var.clone()).or_default();
        add_in_cell(root, &place.offsets, taints);
    }

    /// As [`add`](Self::add), but also installs (joins) a shape at the cell.
    pub fn add_shape(&mut self, place: &Place, taints: &TaintSet, shape: &Shape) {
        if taints.is_empty() && !shape.has_taints() {
            return;
        }
        let root = self.tainted.entry(place.var.clone()).or_default();
        add_shape_in_cell(root, &place.offsets, taints, shape);
    }

    /// Mark `place` explicitly sanitized; its subtree is dropped.
    pub fn clean(&mut self, place: &Place) {
        let root = self.tainted.entry(place.var.clone()).or_default();
        clean_in_cell(root, &place.offsets);
    }

    /// Taints currently guarding control flow.
    #[inline]
    pub fn get_control_taints(&self) -> &TaintSet {
        &self.control
    }

    /// Union taints into the control set.
    pub fn add_control_taints(&mut self, taints: &TaintSet) {
        self.control.union_with(taints);
    }

    /// Deposit taints under a propagator variable. Destinations already
    /// pending on that variable are satisfied immediately (and cleared).
    pub fn propagate_to(&mut self, prop_var: &str, taints: TaintSet) {
        if taints.is_empty() {
            return;
        }
        if let Some(places) = self.pending.remove(prop_var) {
            for place in places {
                self.add(&place, &taints);
            }
        }
        self.propagated
            .entry(prop_var.to_string())
            .and_modify(|t| t.union_with(&taints))
            .or_insert(taints);
    }

    /// Retrieve (and consume) taints deposited under a propagator variable.
    pub fn propagate_from(&mut self, prop_var: &str) -> Option<TaintSet> {
        self.propagated.remove(prop_var)
    }

    /// Record a destination awaiting a later deposit on `prop_var`.
    pub fn pending_propagation(&mut self, prop_var: &str, place: Place) {
        self.pending
            .entry(prop_var.to_string())
            .or_default()
            .insert(place);
    }

    /// Enumerate all `(root, cell)` pairs.
    pub fn seq_of_tainted(&self) -> impl Iterator<Item = (&Name, &Cell)> {
        self.tainted.iter()
    }

    /// Environment equality restricted to one l-value: did the cell at
    /// `place` change between `self` and `other`?
    pub fn equal_by_lval(&self, other: &LvalEnv, place: &Place) -> bool {
        self.find_lval(place) == other.find_lval(place)
    }
}
