//! The intermediate language consumed by the taint engine.
//!
//! The IL is a collaborator input: parsing source code and lowering it to
//! this form happens upstream. The types live here so the engine is
//! self-contained and testable; analyses and tests construct IL values
//! directly.
//!
//! Structure:
//! - [`location`]: positions and ranges attached to every node.
//! - [`expr`]: expressions, l-values, offsets, names, and the [`AnyNode`]
//!   view handed to the classification predicates.
//! - [`instr`]: statement-level instructions carried by CFG nodes.

pub mod expr;
pub mod instr;
pub mod location;

pub use expr::{AnyNode, Base, Expr, ExprKind, Literal, Lval, Name, Offset, OffsetItem, Op, ValueType};
pub use instr::{Instr, InstrKind};
pub use location::{Pos, Range};
