//! JSON documents for trained graphs.
//!
//! Only cumulative counters are stored. Probabilities are derived data and
//! are recalculated whenever a document is loaded.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use markovdb_core::catalog::Catalog;
use markovdb_core::error::{Error, Result};
use markovdb_core::hash::Digest;
use markovdb_core::id::{PartitionId, ProcId};

use crate::graph::MarkovGraph;
use crate::vertex::{VertexId, VertexKind};

pub const DOCUMENT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VertexRecord {
    pub kind: VertexKind,
    pub total_hits: u64,
    #[serde(default)]
    pub exec_time_ns: u64,
    #[serde(default)]
    pub exec_samples: u64,
}

/// Edge between two vertex records, addressed by their position in the
/// document's vertex list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub src: usize,
    pub dst: usize,
    pub total_hits: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDocument {
    pub procedure: String,
    pub proc_id: ProcId,
    pub base_partition: PartitionId,
    pub num_partitions: u32,
    pub txn_count: u64,
    pub vertices: Vec<VertexRecord>,
    pub edges: Vec<EdgeRecord>,
}

impl GraphDocument {
    /// Snapshot of the graph's cumulative counters. Instance-window counts
    /// that were never folded in are not saved.
    pub fn from_graph(graph: &MarkovGraph, catalog: &Catalog) -> Result<Self> {
        let proc = catalog.procedure(graph.proc())?;
        let vertices = graph
            .vertex_ids()
            .map(|v| {
                let vertex = graph.vertex(v);
                VertexRecord {
                    kind: vertex.kind().clone(),
                    total_hits: vertex.total_hits,
                    exec_time_ns: vertex.exec_time_ns,
                    exec_samples: vertex.exec_samples,
                }
            })
            .collect();
        let edges = graph
            .edge_ids()
            .map(|e| {
                let edge = graph.edge(e);
                EdgeRecord {
                    src: edge.src().index(),
                    dst: edge.dst().index(),
                    total_hits: edge.total_hits(),
                }
            })
            .collect();
        Ok(Self {
            procedure: proc.name.clone(),
            proc_id: proc.id,
            base_partition: graph.base_partition(),
            num_partitions: graph.num_partitions(),
            txn_count: graph.txn_count() - graph.instance_txn_count(),
            vertices,
            edges,
        })
    }

    /// Rebuild the graph and recalculate its probabilities.
    pub fn to_graph(&self, catalog: &Catalog) -> Result<MarkovGraph> {
        let proc = catalog.procedure_by_name(&self.procedure)?;
        if self.num_partitions != catalog.num_partitions {
            return Err(Error::Persist(format!(
                "graph for '{}' has {} partitions, catalog has {}",
                self.procedure, self.num_partitions, catalog.num_partitions
            )));
        }

        let mut graph = MarkovGraph::new(proc.id, self.base_partition, self.num_partitions);
        let (mut start, mut commit, mut abort) = (None, None, None);
        for (i, record) in self.vertices.iter().enumerate() {
            let slot = match &record.kind {
                VertexKind::Start => Some(&mut start),
                VertexKind::Commit => Some(&mut commit),
                VertexKind::Abort => Some(&mut abort),
                VertexKind::Query {
                    stmt,
                    instance,
                    partitions,
                    ..
                } => {
                    if proc.statement(*stmt).is_none() {
                        return Err(Error::Persist(format!(
                            "vertex {i} references unknown statement {stmt} of '{}'",
                            self.procedure
                        )));
                    }
                    if graph.find_vertex(*stmt, *instance, partitions).is_some() {
                        return Err(Error::Persist(format!(
                            "vertex {i} duplicates {}",
                            record.kind
                        )));
                    }
                    None
                }
            };
            let v = graph.insert_loaded_vertex(record.kind.clone());
            graph.set_totals(v, record.total_hits, record.exec_time_ns, record.exec_samples);
            if let Some(slot) = slot {
                if slot.replace(v).is_some() {
                    return Err(Error::Persist(format!(
                        "graph for '{}' has more than one {} vertex",
                        self.procedure, record.kind
                    )));
                }
            }
        }
        let (Some(start), Some(commit), Some(abort)) = (start, commit, abort) else {
            return Err(Error::Persist(format!(
                "graph for '{}' at partition {} is missing a sentinel vertex",
                self.procedure, self.base_partition
            )));
        };
        graph.set_loaded_sentinels(start, commit, abort);

        for edge in &self.edges {
            if edge.src >= self.vertices.len() || edge.dst >= self.vertices.len() {
                return Err(Error::Persist(format!(
                    "edge {} -> {} out of range",
                    edge.src, edge.dst
                )));
            }
            graph.insert_loaded_edge(
                VertexId::from_index(edge.src),
                VertexId::from_index(edge.dst),
                edge.total_hits,
            )?;
        }
        graph.set_txn_count(self.txn_count);
        graph.calculate_probabilities();
        Ok(graph)
    }
}

/// Every graph of a site, with a digest over the graph list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphsDocument {
    pub version: u32,
    pub graphs: Vec<GraphDocument>,
    pub digest: String,
}

impl GraphsDocument {
    pub fn from_graphs<'a>(
        catalog: &Catalog,
        graphs: impl IntoIterator<Item = &'a MarkovGraph>,
    ) -> Result<Self> {
        let graphs = graphs
            .into_iter()
            .map(|g| GraphDocument::from_graph(g, catalog))
            .collect::<Result<Vec<_>>>()?;
        let digest = Digest::of_json(&graphs)?.to_hex();
        Ok(Self {
            version: DOCUMENT_VERSION,
            graphs,
            digest,
        })
    }

    pub fn verify(&self) -> Result<()> {
        if self.version != DOCUMENT_VERSION {
            return Err(Error::Persist(format!(
                "unsupported graphs document version {}",
                self.version
            )));
        }
        let found = Digest::of_json(&self.graphs)?.to_hex();
        if found != self.digest {
            return Err(Error::ChecksumMismatch {
                expected: self.digest.clone(),
                found,
            });
        }
        Ok(())
    }

    pub fn to_graphs(&self, catalog: &Catalog) -> Result<Vec<MarkovGraph>> {
        self.verify()?;
        self.graphs.iter().map(|g| g.to_graph(catalog)).collect()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json(&fs::read_to_string(path)?)
    }
}
