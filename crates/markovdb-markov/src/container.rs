//! Graphs for every (base partition, procedure) pair seen by a site.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;

use markovdb_core::catalog::Catalog;
use markovdb_core::error::Result;
use markovdb_core::estimator::PartitionEstimator;
use markovdb_core::id::{PartitionId, ProcId};
use markovdb_core::trace::TransactionTrace;

use crate::graph::MarkovGraph;
use crate::persist::GraphsDocument;

/// A graph shared between estimators. Recomputation holds the write lock for
/// its whole duration, so readers only ever see complete probability tables.
pub type SharedGraph = Arc<RwLock<MarkovGraph>>;

type GraphKey = (PartitionId, ProcId);

#[derive(Debug, Default)]
pub struct MarkovGraphsContainer {
    graphs: RwLock<BTreeMap<GraphKey, SharedGraph>>,
}

impl MarkovGraphsContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, base: PartitionId, proc: ProcId) -> Option<SharedGraph> {
        self.graphs.read().get(&(base, proc)).cloned()
    }

    /// The graph for (base, proc), initialized on first use.
    pub fn get_or_create(&self, base: PartitionId, proc: ProcId, num_partitions: u32) -> SharedGraph {
        if let Some(g) = self.get(base, proc) {
            return g;
        }
        let mut graphs = self.graphs.write();
        let graph = graphs.entry((base, proc)).or_insert_with(|| {
            #[cfg(feature = "tracing")]
            tracing::debug!(%proc, %base, "creating execution-path graph");
            Arc::new(RwLock::new(MarkovGraph::initialized(proc, base, num_partitions)))
        });
        Arc::clone(graph)
    }

    /// Replace whatever graph is registered for the graph's own key.
    pub fn insert(&self, graph: MarkovGraph) -> SharedGraph {
        let key = (graph.base_partition(), graph.proc());
        let shared = Arc::new(RwLock::new(graph));
        self.graphs.write().insert(key, Arc::clone(&shared));
        shared
    }

    pub fn len(&self) -> usize {
        self.graphs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.graphs.read().is_empty()
    }

    /// Snapshot of every registered graph in key order.
    pub fn graphs(&self) -> Vec<SharedGraph> {
        self.graphs.read().values().cloned().collect()
    }

    /// Replay every trace into its graph, then recompute each graph that
    /// received at least one trace. Returns the number of traces replayed.
    pub fn train(
        &self,
        catalog: &Catalog,
        pest: &dyn PartitionEstimator,
        traces: &[TransactionTrace],
    ) -> Result<usize> {
        let mut touched = BTreeSet::new();
        for trace in traces {
            let proc = catalog.procedure(trace.proc)?;
            let base = pest.base_partition(proc, &trace.params)?;
            let graph = self.get_or_create(base, proc.id, catalog.num_partitions);
            graph.write().process_transaction(trace, proc, pest)?;
            touched.insert((base, proc.id));
        }
        for (base, proc) in &touched {
            if let Some(g) = self.get(*base, *proc) {
                g.write().recompute_graph();
            }
        }
        #[cfg(feature = "tracing")]
        tracing::info!(traces = traces.len(), graphs = touched.len(), "trained execution-path graphs");
        Ok(traces.len())
    }

    pub fn recompute_all(&self) {
        for g in self.graphs() {
            g.write().recompute_graph();
        }
    }

    pub fn to_document(&self, catalog: &Catalog) -> Result<GraphsDocument> {
        let graphs = self.graphs();
        let guards: Vec<_> = graphs.iter().map(|g| g.read()).collect();
        GraphsDocument::from_graphs(catalog, guards.iter().map(|g| &**g))
    }

    pub fn from_document(doc: &GraphsDocument, catalog: &Catalog) -> Result<Self> {
        let container = Self::new();
        for graph in doc.to_graphs(catalog)? {
            container.insert(graph);
        }
        Ok(container)
    }

    pub fn save(&self, catalog: &Catalog, path: impl AsRef<Path>) -> Result<()> {
        self.to_document(catalog)?.save(path)
    }

    pub fn load(path: impl AsRef<Path>, catalog: &Catalog) -> Result<Self> {
        let doc = GraphsDocument::load(path)?;
        Self::from_document(&doc, catalog)
    }
}
