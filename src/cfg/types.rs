//! CFG type definitions.

use once_cell::sync::OnceCell;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TaintflowError};
use crate::il::{Expr, Instr, Name, Range};

/// Unique identifier for a CFG node.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct NodeId(pub usize);

/// Kind of a CFG node.
///
/// Nodes are instruction-granular (one IL instruction per node), not basic
/// blocks: the checker threads the environment left-to-right *within* an
/// instruction, and the fixpoint joins *between* nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Function entry; receives the initial environment.
    Enter,
    /// Function exit.
    Exit,
    /// An IL instruction.
    Instr(Instr),
    /// Branch condition evaluation.
    Cond(Expr),
    /// Throw/raise of an expression.
    Throw(Expr),
    /// `return e`; the range is the `return` token, for trace reporting.
    Return(Range, Expr),
    /// Entry of a lambda body analyzed inline: parameters shadow whatever
    /// the enclosing environment held for them.
    Lambda { params: Vec<Name> },
    /// Control-flow merge point.
    Join,
    /// Unconditional jump.
    Goto,
    /// Anything else (no taint effect).
    Other,
}

/// A CFG node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
}

/// A directed CFG edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub from: NodeId,
    pub to: NodeId,
}

impl Edge {
    #[inline]
    pub const fn new(from: NodeId, to: NodeId) -> Self {
        Self { from, to }
    }
}

/// Cached adjacency lists for O(1) successor/predecessor lookups.
///
/// Built lazily on first access to avoid overhead when not needed.
#[derive(Debug, Default)]
struct AdjacencyCache {
    successors: FxHashMap<NodeId, Vec<NodeId>>,
    predecessors: FxHashMap<NodeId, Vec<NodeId>>,
}

/// Control-flow graph of one function, over IL nodes.
#[derive(Debug, Serialize, Deserialize)]
pub struct Cfg {
    /// Nodes, indexed by `NodeId.0`; iteration order is fixpoint pass order.
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    pub entry: NodeId,
    pub exits: Vec<NodeId>,
    #[serde(skip)]
    adjacency: OnceCell<AdjacencyCache>,
}

impl Clone for Cfg {
    fn clone(&self) -> Self {
        // The adjacency cache is rebuilt on demand in the clone.
        Self {
            nodes: self.nodes.clone(),
            edges: self.edges.clone(),
            entry: self.entry,
            exits: self.exits.clone(),
            adjacency: OnceCell::new(),
        }
    }
}

impl Cfg {
    /// Build a CFG from parts.
    pub fn new(nodes: Vec<Node>, edges: Vec<Edge>, entry: NodeId, exits: Vec<NodeId>) -> Self {
        Self {
            nodes,
            edges,
            entry,
            exits,
            adjacency: OnceCell::new(),
        }
    }

    /// Structural validation: every referenced node id must exist and node
    /// ids must be unique.
    pub fn validate(&self) -> Result<()> {
        let mut seen = FxHashMap::default();
        for node in &self.nodes {
            if seen.insert(node.id, ()).is_some() {
                return Err(TaintflowError::DuplicateNodeId(node.id));
            }
        }
        if !seen.contains_key(&self.entry) {
            return Err(TaintflowError::InvalidEntry(self.entry));
        }
        for exit in &self.exits {
            if !seen.contains_key(exit) {
                return Err(TaintflowError::InvalidExit(*exit));
            }
        }
        for edge in &self.edges {
            for id in [edge.from, edge.to] {
                if !seen.contains_key(&id) {
                    return Err(TaintflowError::InvalidEdgeNode(id));
                }
            }
        }
        Ok(())
    }

    fn adjacency(&self) -> &AdjacencyCache {
        self.adjacency.get_or_init(|| {
            let mut cache = AdjacencyCache::default();
            for edge in &self.edges {
                cache.successors.entry(edge.from).or_default().push(edge.to);
                cache
                    .predecessors
                    .entry(edge.to)
                    .or_default()
                    .push(edge.from);
            }
            cache
        })
    }

    /// Successors of a node.
    pub fn successors(&self, id: NodeId) -> &[NodeId] {
        self.adjacency()
            .successors
            .get(&id)
            .map_or(&[], Vec::as_slice)
    }

    /// Predecessors of a node.
    pub fn predecessors(&self, id: NodeId) -> &[NodeId] {
        self.adjacency()
            .predecessors
            .get(&id)
            .map_or(&[], Vec::as_slice)
    }

    /// Node count.
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Is the graph empty?
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
