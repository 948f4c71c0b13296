//! Vertices and edges of an execution-path graph.

use std::fmt;

use serde::{Deserialize, Serialize};

use markovdb_core::catalog::QueryType;
use markovdb_core::id::{PartitionId, PartitionSet, StmtId};

use crate::probabilities::ProbabilityTable;

/// Index of a vertex in its graph's arena. Stable for the graph's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VertexId(u32);

impl VertexId {
    pub(crate) fn from_index(i: usize) -> Self {
        Self(i as u32)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for VertexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EdgeId(u32);

impl EdgeId {
    pub(crate) fn from_index(i: usize) -> Self {
        Self(i as u32)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum VertexKind {
    Start,
    Commit,
    Abort,
    Query {
        stmt: StmtId,
        /// Occurrence of `stmt` within the transaction, starting at 0.
        instance: u32,
        partitions: PartitionSet,
        query_type: QueryType,
    },
}

impl VertexKind {
    pub fn is_terminal(&self) -> bool {
        matches!(self, VertexKind::Commit | VertexKind::Abort)
    }
}

impl fmt::Display for VertexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VertexKind::Start => write!(f, "START"),
            VertexKind::Commit => write!(f, "COMMIT"),
            VertexKind::Abort => write!(f, "ABORT"),
            VertexKind::Query {
                stmt,
                instance,
                partitions,
                ..
            } => {
                let ps: Vec<u32> = partitions.iter().map(|p| p.get()).collect();
                write!(f, "{}#{instance}{ps:?}", stmt.get())
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Vertex {
    pub(crate) kind: VertexKind,
    pub(crate) total_hits: u64,
    pub(crate) instance_hits: u64,
    pub(crate) exec_time_ns: u64,
    pub(crate) exec_samples: u64,
    pub(crate) probs: ProbabilityTable,
}

impl Vertex {
    pub(crate) fn new(kind: VertexKind, num_partitions: u32) -> Self {
        Self {
            kind,
            total_hits: 0,
            instance_hits: 0,
            exec_time_ns: 0,
            exec_samples: 0,
            probs: ProbabilityTable::new(num_partitions),
        }
    }

    pub fn kind(&self) -> &VertexKind {
        &self.kind
    }

    pub fn is_start(&self) -> bool {
        matches!(self.kind, VertexKind::Start)
    }

    pub fn is_commit(&self) -> bool {
        matches!(self.kind, VertexKind::Commit)
    }

    pub fn is_abort(&self) -> bool {
        matches!(self.kind, VertexKind::Abort)
    }

    pub fn is_query(&self) -> bool {
        matches!(self.kind, VertexKind::Query { .. })
    }

    pub fn statement(&self) -> Option<StmtId> {
        match &self.kind {
            VertexKind::Query { stmt, .. } => Some(*stmt),
            _ => None,
        }
    }

    pub fn instance(&self) -> Option<u32> {
        match &self.kind {
            VertexKind::Query { instance, .. } => Some(*instance),
            _ => None,
        }
    }

    pub fn query_type(&self) -> Option<QueryType> {
        match &self.kind {
            VertexKind::Query { query_type, .. } => Some(*query_type),
            _ => None,
        }
    }

    /// Partitions touched by this vertex's statement; `None` for sentinels.
    pub fn partitions(&self) -> Option<&PartitionSet> {
        match &self.kind {
            VertexKind::Query { partitions, .. } => Some(partitions),
            _ => None,
        }
    }

    pub fn touches(&self, partition: PartitionId) -> bool {
        self.partitions().is_some_and(|ps| ps.contains(&partition))
    }

    pub fn total_hits(&self) -> u64 {
        self.total_hits
    }

    pub fn instance_hits(&self) -> u64 {
        self.instance_hits
    }

    pub fn probabilities(&self) -> &ProbabilityTable {
        &self.probs
    }

    pub(crate) fn add_execution_time(&mut self, ns: u64) {
        self.exec_time_ns = self.exec_time_ns.saturating_add(ns);
        self.exec_samples += 1;
    }

    pub fn avg_execution_time_ns(&self) -> Option<u64> {
        (self.exec_samples > 0).then(|| self.exec_time_ns / self.exec_samples)
    }

    /// Whether this vertex's recent hit rate has drifted from its cumulative rate.
    ///
    /// `instance_txns` transactions make up the current window and
    /// `folded_txns` are already reflected in `total_hits`.
    pub fn should_recompute(&self, instance_txns: u64, tolerance: f64, folded_txns: u64) -> bool {
        if instance_txns == 0 {
            return false;
        }
        if self.total_hits == 0 || folded_txns == 0 {
            return self.instance_hits > 0;
        }
        let recent = self.instance_hits as f64 / instance_txns as f64;
        let cumulative = self.total_hits as f64 / folded_txns as f64;
        (recent - cumulative).abs() > tolerance
    }
}

#[derive(Debug, Clone)]
pub struct Edge {
    pub(crate) src: VertexId,
    pub(crate) dst: VertexId,
    pub(crate) total_hits: u64,
    pub(crate) instance_hits: u64,
    pub(crate) probability: f64,
}

impl Edge {
    pub(crate) fn new(src: VertexId, dst: VertexId) -> Self {
        Self {
            src,
            dst,
            total_hits: 0,
            instance_hits: 0,
            probability: 0.0,
        }
    }

    pub fn src(&self) -> VertexId {
        self.src
    }

    pub fn dst(&self) -> VertexId {
        self.dst
    }

    pub fn total_hits(&self) -> u64 {
        self.total_hits
    }

    pub fn instance_hits(&self) -> u64 {
        self.instance_hits
    }

    pub fn probability(&self) -> f64 {
        self.probability
    }
}
