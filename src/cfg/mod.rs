//! Control-flow graphs over the IL.
//!
//! CFG construction is a collaborator concern; the engine consumes a
//! finished graph. Nodes are instruction-granular and the node list order
//! is the deterministic pass order of the fixpoint.

pub mod types;

pub use types::{Cfg, Edge, Node, NodeId, NodeKind};
