//! Execution-path graph for one (procedure, base partition) pair.
//!
//! Vertices and edges live in arenas addressed by `VertexId`/`EdgeId`;
//! adjacency is kept as index lists in both directions. Vertices are created
//! lazily by training and never deleted.

use std::collections::HashMap;

use markovdb_core::catalog::{Procedure, QueryType};
use markovdb_core::error::{Error, Result};
use markovdb_core::estimator::PartitionEstimator;
use markovdb_core::id::{PartitionId, PartitionSet, ProcId, StmtId};
use markovdb_core::trace::{QueryTrace, TransactionTrace};

use crate::probabilities::{PartitionField, ProbabilityTable};
use crate::vertex::{Edge, EdgeId, Vertex, VertexId, VertexKind};
use crate::walker::ReverseOrder;

type QueryKey = (StmtId, u32, PartitionSet);

#[derive(Debug, Clone, Copy)]
struct Sentinels {
    start: VertexId,
    commit: VertexId,
    abort: VertexId,
}

/// Vertices one executed query reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryStep {
    pub vertex: VertexId,
    /// ABORT, when the query aborted the transaction.
    pub abort: Option<VertexId>,
}

impl QueryStep {
    /// Where the transaction's path stands after this query.
    pub fn last(&self) -> VertexId {
        self.abort.unwrap_or(self.vertex)
    }
}

#[derive(Debug, Clone)]
pub struct MarkovGraph {
    proc: ProcId,
    base_partition: PartitionId,
    num_partitions: u32,
    vertices: Vec<Vertex>,
    edges: Vec<Edge>,
    out_edges: Vec<Vec<EdgeId>>,
    in_edges: Vec<Vec<EdgeId>>,
    query_index: HashMap<QueryKey, VertexId>,
    edge_index: HashMap<(VertexId, VertexId), EdgeId>,
    sentinels: Option<Sentinels>,
    txn_count: u64,
    instance_txn_count: u64,
}

impl MarkovGraph {
    /// Empty graph. Call [`MarkovGraph::initialize`] before use.
    pub fn new(proc: ProcId, base_partition: PartitionId, num_partitions: u32) -> Self {
        Self {
            proc,
            base_partition,
            num_partitions,
            vertices: Vec::new(),
            edges: Vec::new(),
            out_edges: Vec::new(),
            in_edges: Vec::new(),
            query_index: HashMap::new(),
            edge_index: HashMap::new(),
            sentinels: None,
            txn_count: 0,
            instance_txn_count: 0,
        }
    }

    /// Insert the START, COMMIT and ABORT vertices. Must run exactly once.
    pub fn initialize(&mut self) -> &mut Self {
        assert!(
            self.sentinels.is_none(),
            "graph for {} at partition {} initialized twice",
            self.proc,
            self.base_partition
        );
        let start = self.push_vertex(VertexKind::Start);
        let commit = self.push_vertex(VertexKind::Commit);
        let abort = self.push_vertex(VertexKind::Abort);
        self.sentinels = Some(Sentinels {
            start,
            commit,
            abort,
        });
        self
    }

    /// Shorthand for `new` followed by `initialize`.
    pub fn initialized(proc: ProcId, base_partition: PartitionId, num_partitions: u32) -> Self {
        let mut g = Self::new(proc, base_partition, num_partitions);
        g.initialize();
        g
    }

    fn sentinels(&self) -> Sentinels {
        match self.sentinels {
            Some(s) => s,
            None => panic!(
                "graph for {} at partition {} used before initialize()",
                self.proc, self.base_partition
            ),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.sentinels.is_some()
    }

    pub fn proc(&self) -> ProcId {
        self.proc
    }

    pub fn base_partition(&self) -> PartitionId {
        self.base_partition
    }

    pub fn num_partitions(&self) -> u32 {
        self.num_partitions
    }

    pub fn start(&self) -> VertexId {
        self.sentinels().start
    }

    pub fn commit(&self) -> VertexId {
        self.sentinels().commit
    }

    pub fn abort(&self) -> VertexId {
        self.sentinels().abort
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn vertex(&self, id: VertexId) -> &Vertex {
        &self.vertices[id.index()]
    }

    pub fn edge(&self, id: EdgeId) -> &Edge {
        &self.edges[id.index()]
    }

    pub fn vertex_ids(&self) -> impl Iterator<Item = VertexId> + '_ {
        (0..self.vertices.len()).map(VertexId::from_index)
    }

    pub fn edge_ids(&self) -> impl Iterator<Item = EdgeId> + '_ {
        (0..self.edges.len()).map(EdgeId::from_index)
    }

    pub fn out_edges(&self, v: VertexId) -> &[EdgeId] {
        &self.out_edges[v.index()]
    }

    pub fn in_edges(&self, v: VertexId) -> &[EdgeId] {
        &self.in_edges[v.index()]
    }

    pub fn successors(&self, v: VertexId) -> impl Iterator<Item = VertexId> + '_ {
        self.out_edges(v).iter().map(move |e| self.edges[e.index()].dst)
    }

    pub fn find_edge(&self, src: VertexId, dst: VertexId) -> Option<EdgeId> {
        self.edge_index.get(&(src, dst)).copied()
    }

    pub fn find_vertex(&self, stmt: StmtId, instance: u32, partitions: &PartitionSet) -> Option<VertexId> {
        self.query_index
            .get(&(stmt, instance, partitions.clone()))
            .copied()
    }

    /// Transactions replayed into this graph over its lifetime.
    pub fn txn_count(&self) -> u64 {
        self.txn_count
    }

    /// Transactions replayed since the last recompute.
    pub fn instance_txn_count(&self) -> u64 {
        self.instance_txn_count
    }

    fn push_vertex(&mut self, kind: VertexKind) -> VertexId {
        let id = VertexId::from_index(self.vertices.len());
        if let VertexKind::Query {
            stmt,
            instance,
            partitions,
            ..
        } = &kind
        {
            self.query_index
                .insert((*stmt, *instance, partitions.clone()), id);
        }
        self.vertices.push(Vertex::new(kind, self.num_partitions));
        self.out_edges.push(Vec::new());
        self.in_edges.push(Vec::new());
        id
    }

    /// The vertex for (stmt, instance, partitions), created on first use.
    pub fn get_or_create_query(
        &mut self,
        stmt: StmtId,
        instance: u32,
        partitions: PartitionSet,
        query_type: QueryType,
    ) -> VertexId {
        if let Some(id) = self.find_vertex(stmt, instance, &partitions) {
            return id;
        }
        self.push_vertex(VertexKind::Query {
            stmt,
            instance,
            partitions,
            query_type,
        })
    }

    fn get_or_create_edge(&mut self, src: VertexId, dst: VertexId) -> EdgeId {
        if let Some(e) = self.find_edge(src, dst) {
            return e;
        }
        let id = EdgeId::from_index(self.edges.len());
        self.edges.push(Edge::new(src, dst));
        self.out_edges[src.index()].push(id);
        self.in_edges[dst.index()].push(id);
        self.edge_index.insert((src, dst), id);
        id
    }

    /// Record one traversal of `src -> dst` in the instance window.
    pub fn add_to_edge(&mut self, src: VertexId, dst: VertexId) -> EdgeId {
        let e = self.get_or_create_edge(src, dst);
        self.edges[e.index()].instance_hits += 1;
        self.vertices[src.index()].instance_hits += 1;
        if self.vertices[dst.index()].kind.is_terminal() {
            // sinks have no out edges to count them
            self.vertices[dst.index()].instance_hits += 1;
        }
        e
    }

    pub(crate) fn add_execution_time(&mut self, v: VertexId, ns: u64) {
        self.vertices[v.index()].add_execution_time(ns);
    }

    /// Count one more finished transaction in the instance window.
    pub fn record_txn(&mut self) {
        self.txn_count += 1;
        self.instance_txn_count += 1;
    }

    /// Fold one executed query into the graph after `prev`. `counters`
    /// numbers repeated statements within the transaction. A query that
    /// aborted the transaction is also linked to ABORT.
    pub fn process_query(
        &mut self,
        prev: VertexId,
        query: &QueryTrace,
        proc: &Procedure,
        pest: &dyn PartitionEstimator,
        counters: &mut HashMap<StmtId, u32>,
    ) -> Result<QueryStep> {
        let stmt = proc.statement(query.stmt).ok_or_else(|| {
            Error::Catalog(format!("procedure '{}' has no statement {}", proc.name, query.stmt))
        })?;
        let partitions = pest.statement_partitions(proc, stmt, &query.params, self.base_partition)?;
        if partitions.is_empty() {
            return Err(Error::Estimation(format!(
                "statement '{}.{}' touches no partitions",
                proc.name, stmt.name
            )));
        }
        let counter = counters.entry(stmt.id).or_insert(0);
        let instance = *counter;
        *counter += 1;

        let v = self.get_or_create_query(stmt.id, instance, partitions, stmt.query_type);
        if let Some(ns) = query.elapsed_ns {
            self.add_execution_time(v, ns);
        }
        self.add_to_edge(prev, v);

        let abort = query.aborted.then(|| {
            let abort = self.abort();
            self.add_to_edge(v, abort);
            abort
        });
        Ok(QueryStep { vertex: v, abort })
    }

    /// Replay a completed trace. Returns the visited path, START first and
    /// COMMIT or ABORT last.
    pub fn process_transaction(
        &mut self,
        trace: &TransactionTrace,
        proc: &Procedure,
        pest: &dyn PartitionEstimator,
    ) -> Result<Vec<VertexId>> {
        let start = self.start();
        let mut path = vec![start];
        let mut prev = start;
        let mut counters: HashMap<StmtId, u32> = HashMap::new();

        let mut aborted = false;
        for q in &trace.queries {
            let step = self.process_query(prev, q, proc, pest, &mut counters)?;
            path.push(step.vertex);
            prev = step.last();
            if let Some(abort) = step.abort {
                path.push(abort);
                aborted = true;
                break;
            }
        }

        if !aborted {
            let last = if trace.aborted { self.abort() } else { self.commit() };
            self.add_to_edge(prev, last);
            path.push(last);
        }
        self.record_txn();
        Ok(path)
    }

    /// Zero the instance-window counters without folding them.
    pub fn reset_counters(&mut self) {
        for v in &mut self.vertices {
            v.instance_hits = 0;
        }
        for e in &mut self.edges {
            e.instance_hits = 0;
        }
        self.instance_txn_count = 0;
    }

    /// Fold instance-window counters into the totals, then recalculate.
    pub fn recompute_graph(&mut self) {
        for v in &mut self.vertices {
            v.total_hits += v.instance_hits;
            v.instance_hits = 0;
        }
        for e in &mut self.edges {
            e.total_hits += e.instance_hits;
            e.instance_hits = 0;
        }
        self.instance_txn_count = 0;
        self.calculate_probabilities();
    }

    /// Whether at least `proportion` of the vertices consider themselves stale.
    pub fn should_recompute(&self, tolerance: f64, proportion: f64) -> bool {
        if self.instance_txn_count == 0 || self.vertices.is_empty() {
            return false;
        }
        let folded = self.txn_count - self.instance_txn_count;
        let stale = self
            .vertices
            .iter()
            .filter(|v| v.should_recompute(self.instance_txn_count, tolerance, folded))
            .count();
        stale as f64 / self.vertices.len() as f64 >= proportion
    }

    /// Recalculate edge and vertex probabilities from the cumulative counters.
    pub fn calculate_probabilities(&mut self) {
        let n = self.num_partitions;
        for v in &mut self.vertices {
            v.probs.reset(n);
        }
        for i in 0..self.edges.len() {
            let src_hits = self.vertices[self.edges[i].src.index()].total_hits;
            let e = &mut self.edges[i];
            e.probability = if src_hits > 0 {
                e.total_hits as f64 / src_hits as f64
            } else {
                0.0
            };
        }

        let order = ReverseOrder::compute(self);
        let mut finalized = vec![false; self.vertices.len()];
        for &v in order.order() {
            let probs = self.vertex_probabilities(v, &order, &finalized);
            self.vertices[v.index()].probs = probs;
            finalized[v.index()] = true;
        }
        #[cfg(feature = "tracing")]
        tracing::debug!(
            proc = %self.proc,
            base = %self.base_partition,
            vertices = self.vertices.len(),
            edges = self.edges.len(),
            skipped = order.skipped_count(),
            "calculated graph probabilities"
        );
    }

    fn vertex_probabilities(
        &self,
        v: VertexId,
        order: &ReverseOrder,
        finalized: &[bool],
    ) -> ProbabilityTable {
        let n = self.num_partitions;
        let vertex = &self.vertices[v.index()];
        let mut probs = ProbabilityTable::new(n);

        if vertex.kind.is_terminal() {
            probs.set_single_partition(1.0);
            probs.set_abort(if vertex.is_abort() { 1.0 } else { 0.0 });
            for p in (0..n).map(PartitionId::new) {
                probs.set_done(p, 1.0);
                probs.set_read_only(p, 0.0);
                probs.set_write(p, 0.0);
            }
            return probs;
        }

        let base = self.base_partition;
        let remote = vertex
            .partitions()
            .is_some_and(|ps| ps.iter().any(|p| *p != base));
        let read_only = vertex.query_type().map_or(true, QueryType::is_read_only);

        let mut single = 0.0;
        let mut abort = 0.0;
        let mut done = vec![0.0; n as usize];
        let mut read = vec![0.0; n as usize];
        let mut write = vec![0.0; n as usize];

        for &e in self.out_edges(v) {
            if order.is_skipped(e) {
                continue;
            }
            let edge = &self.edges[e.index()];
            let succ = &self.vertices[edge.dst.index()];
            assert!(
                finalized[edge.dst.index()],
                "vertex {} ({}) finalized before its successor {} ({})",
                v,
                vertex.kind,
                edge.dst,
                succ.kind
            );
            let sp = &succ.probs;
            let w = edge.probability;
            single += w * required(sp.single_partition(), "single-partition", edge.dst);
            abort += w * required(sp.abort(), "abort", edge.dst);
            for p in (0..n).map(PartitionId::new) {
                let i = p.index();
                let succ_read = required(sp.get(PartitionField::ReadOnly, p), "read-only", edge.dst);
                let succ_write = required(sp.get(PartitionField::Write, p), "write", edge.dst);
                let succ_done = required(sp.get(PartitionField::Done, p), "done", edge.dst);
                if vertex.touches(p) {
                    if read_only {
                        read[i] += w * succ_read;
                        write[i] += w * succ_write;
                    }
                } else {
                    done[i] += w * succ_done;
                    read[i] += w * succ_read;
                    write[i] += w * succ_write;
                }
            }
        }

        for p in (0..n).map(PartitionId::new) {
            let i = p.index();
            if vertex.touches(p) {
                done[i] = 0.0;
                if !read_only {
                    write[i] = 1.0;
                    read[i] = 0.0;
                }
            }
            probs.set_done(p, done[i]);
            probs.set_read_only(p, read[i]);
            probs.set_write(p, write[i]);
        }
        probs.set_single_partition(if remote { 0.0 } else { single });
        probs.set_abort(abort);
        probs
    }

    pub(crate) fn set_totals(&mut self, v: VertexId, total_hits: u64, exec_time_ns: u64, exec_samples: u64) {
        let vertex = &mut self.vertices[v.index()];
        vertex.total_hits = total_hits;
        vertex.exec_time_ns = exec_time_ns;
        vertex.exec_samples = exec_samples;
    }

    pub(crate) fn insert_loaded_vertex(&mut self, kind: VertexKind) -> VertexId {
        self.push_vertex(kind)
    }

    pub(crate) fn set_loaded_sentinels(&mut self, start: VertexId, commit: VertexId, abort: VertexId) {
        self.sentinels = Some(Sentinels {
            start,
            commit,
            abort,
        });
    }

    pub(crate) fn insert_loaded_edge(&mut self, src: VertexId, dst: VertexId, total_hits: u64) -> Result<()> {
        if self.find_edge(src, dst).is_some() {
            return Err(Error::Persist(format!("duplicate edge {src} -> {dst}")));
        }
        let e = self.get_or_create_edge(src, dst);
        self.edges[e.index()].total_hits = total_hits;
        Ok(())
    }

    pub(crate) fn set_txn_count(&mut self, txn_count: u64) {
        self.txn_count = txn_count;
        self.instance_txn_count = 0;
    }
}

fn required(value: Option<f64>, field: &str, succ: VertexId) -> f64 {
    match value {
        Some(v) => v,
        None => panic!("successor {succ} has no {field} probability"),
    }
}
