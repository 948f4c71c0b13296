//! Per-transaction estimation on top of the graph container.
//!
//! `start_transaction` walks the graph for the invocation's base partition
//! and returns an [`EstimatorState`] holding the initial estimate. Each
//! executed batch is then folded into the graph online and appends one
//! estimate; `commit`/`abort` close the path and may trigger a recompute.

use std::collections::HashMap;
use std::sync::Arc;

use markovdb_core::catalog::{Catalog, Procedure};
use markovdb_core::config::{EstimationThresholds, SiteConfig};
use markovdb_core::error::{Error, Result};
use markovdb_core::estimator::PartitionEstimator;
use markovdb_core::id::{PartitionId, ProcId, StmtId, TxnId};
use markovdb_core::mappings::{MappingPolicy, ParameterMappingsSet};
use markovdb_core::params::ParamValue;
use markovdb_core::trace::{QueryTrace, TransactionTrace};
use markovdb_pool::{ObjectPool, PoolStats, Pooled};
use markovdb_stats::{FastIntHistogram, ValueHistogram};

use crate::container::{MarkovGraphsContainer, SharedGraph};
use crate::estimate::{Estimate, EstimateBatch};
use crate::path::{MarkovPathEstimator, PathContext};
use crate::vertex::VertexId;

/// The knobs of [`SiteConfig`] the estimator reads.
#[derive(Debug, Clone, Copy)]
pub struct EstimatorConfig {
    pub force_traversal: bool,
    pub min_hits_for_abort: u64,
    pub recompute_tolerance: f64,
    pub recompute_vertex_proportion: f64,
    pub recompute_min_txns: u64,
    pub mapping_policy: MappingPolicy,
    pub thresholds: EstimationThresholds,
    pub pool_idle: usize,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self::from(&SiteConfig::default())
    }
}

impl From<&SiteConfig> for EstimatorConfig {
    fn from(cfg: &SiteConfig) -> Self {
        Self {
            force_traversal: cfg.force_traversal,
            min_hits_for_abort: cfg.min_hits_for_abort,
            recompute_tolerance: cfg.recompute_tolerance,
            recompute_vertex_proportion: cfg.recompute_vertex_proportion,
            recompute_min_txns: cfg.recompute_min_txns,
            mapping_policy: cfg.mapping_policy,
            thresholds: cfg.thresholds,
            pool_idle: cfg.pool_idle,
        }
    }
}

/// Estimation state of one running transaction.
pub struct EstimatorState {
    txn_id: TxnId,
    proc: ProcId,
    base_partition: PartitionId,
    graph: SharedGraph,
    args: Vec<ParamValue>,
    initial_path: Vec<VertexId>,
    initial_estimate: Pooled<Estimate>,
    estimates: Vec<Pooled<Estimate>>,
    actual_path: Vec<VertexId>,
    stmt_counters: HashMap<StmtId, u32>,
    touched: FastIntHistogram,
}

impl EstimatorState {
    pub fn txn_id(&self) -> TxnId {
        self.txn_id
    }

    pub fn proc(&self) -> ProcId {
        self.proc
    }

    pub fn base_partition(&self) -> PartitionId {
        self.base_partition
    }

    pub fn graph(&self) -> &SharedGraph {
        &self.graph
    }

    /// Path predicted at transaction start.
    pub fn initial_path(&self) -> &[VertexId] {
        &self.initial_path
    }

    pub fn initial_estimate(&self) -> &Estimate {
        &self.initial_estimate
    }

    /// One estimate per executed batch, in batch order.
    pub fn estimates(&self) -> impl ExactSizeIterator<Item = &Estimate> + '_ {
        self.estimates.iter().map(|e| &**e)
    }

    pub fn estimate_count(&self) -> usize {
        self.estimates.len()
    }

    /// Most recent estimate, falling back to the initial one.
    pub fn last_estimate(&self) -> &Estimate {
        self.estimates.last().map_or(&*self.initial_estimate, |e| &**e)
    }

    /// Vertices actually executed so far, START first.
    pub fn actual_path(&self) -> &[VertexId] {
        &self.actual_path
    }

    /// Executions per partition so far.
    pub fn touched_counts(&self) -> &FastIntHistogram {
        &self.touched
    }

    /// The transaction's path already ended at ABORT.
    pub fn is_aborted(&self) -> bool {
        self.graph.read().vertex(self.current()).is_abort()
    }

    fn current(&self) -> VertexId {
        // actual_path always starts with START
        self.actual_path[self.actual_path.len() - 1]
    }
}

impl std::fmt::Debug for EstimatorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EstimatorState")
            .field("txn_id", &self.txn_id)
            .field("proc", &self.proc)
            .field("base_partition", &self.base_partition)
            .field("estimates", &self.estimates.len())
            .field("actual_path", &self.actual_path)
            .finish()
    }
}

pub struct TransactionEstimator {
    catalog: Arc<Catalog>,
    pest: Arc<dyn PartitionEstimator>,
    mappings: Arc<ParameterMappingsSet>,
    graphs: Arc<MarkovGraphsContainer>,
    config: EstimatorConfig,
    paths: ObjectPool<MarkovPathEstimator>,
    estimates: ObjectPool<Estimate>,
}

impl TransactionEstimator {
    pub fn new(
        catalog: Arc<Catalog>,
        pest: Arc<dyn PartitionEstimator>,
        mappings: Arc<ParameterMappingsSet>,
        graphs: Arc<MarkovGraphsContainer>,
        config: EstimatorConfig,
    ) -> Self {
        Self {
            catalog,
            pest,
            mappings,
            graphs,
            paths: ObjectPool::new("path-estimators", config.pool_idle, MarkovPathEstimator::new),
            estimates: ObjectPool::new("estimates", config.pool_idle, Estimate::new),
            config,
        }
    }

    pub fn graphs(&self) -> &Arc<MarkovGraphsContainer> {
        &self.graphs
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    pub fn thresholds(&self) -> &EstimationThresholds {
        &self.config.thresholds
    }

    pub fn pool_stats(&self) -> [PoolStats; 2] {
        [self.paths.stats(), self.estimates.stats()]
    }

    /// Walk the graph for this invocation and return its initial estimate.
    pub fn start_transaction(
        &self,
        txn_id: TxnId,
        proc: ProcId,
        args: &[ParamValue],
    ) -> Result<EstimatorState> {
        let procedure = self.catalog.procedure(proc)?;
        let base = self.pest.base_partition(procedure, args)?;
        let n = self.catalog.num_partitions;
        let graph = self.graphs.get_or_create(base, proc, n);

        let mut path = self.paths.borrow();
        let mut initial_estimate = self.estimates.borrow();
        let start = {
            let g = graph.read();
            let ctx = self.path_context(&g, procedure, args);
            path.traverse(&ctx, g.start())?;
            initial_estimate.copy_from(path.estimate());
            g.start()
        };
        #[cfg(feature = "tracing")]
        tracing::debug!(
            txn = %txn_id,
            proc = %procedure.name,
            base = %base,
            confidence = path.confidence(),
            path_len = path.visited_path().len(),
            "initial estimate"
        );

        Ok(EstimatorState {
            txn_id,
            proc,
            base_partition: base,
            graph,
            args: args.to_vec(),
            initial_path: path.visited_path().to_vec(),
            initial_estimate,
            estimates: Vec::new(),
            actual_path: vec![start],
            stmt_counters: HashMap::new(),
            touched: FastIntHistogram::new(n as usize),
        })
    }

    fn path_context<'a>(
        &'a self,
        graph: &'a crate::graph::MarkovGraph,
        proc: &'a Procedure,
        args: &'a [ParamValue],
    ) -> PathContext<'a> {
        PathContext {
            graph,
            proc,
            mappings: &self.mappings,
            pest: self.pest.as_ref(),
            args,
            policy: self.config.mapping_policy,
            force_traversal: self.config.force_traversal,
            min_hits_for_abort: self.config.min_hits_for_abort,
        }
    }

    /// Fold one executed batch into the graph, then walk on from the vertex
    /// the batch ended on and append that walk's estimate.
    pub fn execute_queries<'s>(
        &self,
        state: &'s mut EstimatorState,
        queries: &[QueryTrace],
    ) -> Result<&'s Estimate> {
        let procedure = self.catalog.procedure(state.proc)?;
        let batch = state.estimates.len();
        let mut path = self.paths.borrow();
        let mut estimate = self.estimates.borrow();
        {
            let mut g = state.graph.write();
            let mut current = state.current();
            if g.vertex(current).kind().is_terminal() && !queries.is_empty() {
                return Err(Error::Estimation(format!(
                    "transaction {} already ended its path",
                    state.txn_id
                )));
            }
            for q in queries {
                let step = g.process_query(
                    current,
                    q,
                    procedure,
                    self.pest.as_ref(),
                    &mut state.stmt_counters,
                )?;
                for p in g.vertex(step.vertex).partitions().into_iter().flatten() {
                    state.touched.put(p.index());
                }
                state.actual_path.push(step.vertex);
                state.actual_path.extend(step.abort);
                current = step.last();
                if step.abort.is_some() {
                    break;
                }
            }

            let ctx = self.path_context(&g, procedure, &state.args);
            path.traverse(&ctx, current)?;
            estimate.copy_from(path.estimate());
        }
        estimate.set_batch(EstimateBatch::Batch(batch));
        estimate.set_touched_counter(&state.touched);

        #[cfg(feature = "tracing")]
        tracing::trace!(
            txn = %state.txn_id,
            batch,
            queries = queries.len(),
            confidence = path.confidence(),
            "batch estimate"
        );
        state.estimates.push(estimate);
        Ok(state.last_estimate())
    }

    /// Close the transaction's path at COMMIT. Returns whether the graph
    /// was recomputed.
    pub fn commit(&self, state: EstimatorState) -> bool {
        self.finish(state, true)
    }

    /// Close the transaction's path at ABORT. Returns whether the graph was
    /// recomputed.
    pub fn abort(&self, state: EstimatorState) -> bool {
        self.finish(state, false)
    }

    fn finish(&self, state: EstimatorState, committed: bool) -> bool {
        let mut g = state.graph.write();
        let terminal = if committed { g.commit() } else { g.abort() };
        let current = state.current();
        // a query that aborted already linked the path to ABORT
        if !g.vertex(current).kind().is_terminal() {
            g.add_to_edge(current, terminal);
        }
        g.record_txn();

        let cfg = &self.config;
        if g.instance_txn_count() >= cfg.recompute_min_txns
            && g.should_recompute(cfg.recompute_tolerance, cfg.recompute_vertex_proportion)
        {
            g.recompute_graph();
            #[cfg(feature = "tracing")]
            tracing::debug!(
                proc = %g.proc(),
                base = %g.base_partition(),
                txns = g.txn_count(),
                "recomputed stale graph"
            );
            return true;
        }
        false
    }

    /// Replay a recorded trace through `start_transaction` and
    /// `execute_queries`, one estimate per batch up to the first aborting
    /// query. The state is left open.
    pub fn process_transaction_trace(&self, trace: &TransactionTrace) -> Result<EstimatorState> {
        let mut state = self.start_transaction(trace.txn_id, trace.proc, &trace.params)?;
        for batch in trace.batches() {
            self.execute_queries(&mut state, batch)?;
            if state.is_aborted() {
                break;
            }
        }
        Ok(state)
    }
}
