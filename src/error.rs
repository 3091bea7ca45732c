//! Error types for taintflow.
//!
//! The taint engine itself is a best-effort over-approximation: analysis
//! failures are soft (a taint is dropped, a signature entry is skipped, a
//! fixpoint times out) and never surface as errors. The error type below
//! exists for the API boundary only: structurally invalid inputs that the
//! driver handed us, which we can detect up front.

use thiserror::Error;

use crate::cfg::NodeId;

/// Result type alias for taintflow operations.
pub type Result<T> = std::result::Result<T, TaintflowError>;

/// Top-level error type.
#[derive(Debug, Error)]
pub enum TaintflowError {
    /// The CFG's entry node id does not exist.
    #[error("CFG entry node {0:?} not found")]
    InvalidEntry(NodeId),

    /// A CFG exit node id does not exist.
    #[error("CFG exit node {0:?} not found")]
    InvalidExit(NodeId),

    /// An edge references a node that does not exist.
    #[error("CFG edge references non-existent node {0:?}")]
    InvalidEdgeNode(NodeId),

    /// Duplicate node id in the CFG node list.
    #[error("Duplicate CFG node id {0:?}")]
    DuplicateNodeId(NodeId),
}
