//! Greedy forward walk over an execution-path graph.
//!
//! Starting from a vertex (normally START), the walk picks at every step the
//! most probable successor that agrees with the invocation's parameters,
//! discounting a running confidence at every ambiguous branch and filling an
//! [`Estimate`] as partitions are touched.

use markovdb_core::catalog::{Procedure, Statement};
use markovdb_core::error::Result;
use markovdb_core::estimator::PartitionEstimator;
use markovdb_core::id::{PartitionId, PartitionSet, StmtId};
use markovdb_core::mappings::{MappingPolicy, ParameterMappingsSet};
use markovdb_core::params::ParamValue;
use markovdb_pool::Poolable;

use crate::estimate::{Estimate, EstimateBatch};
use crate::graph::MarkovGraph;
use crate::vertex::{EdgeId, VertexId, VertexKind};

/// Everything one walk reads. Borrowed for the duration of the walk only.
pub struct PathContext<'a> {
    pub graph: &'a MarkovGraph,
    pub proc: &'a Procedure,
    pub mappings: &'a ParameterMappingsSet,
    pub pest: &'a dyn PartitionEstimator,
    /// Procedure input parameters.
    pub args: &'a [ParamValue],
    pub policy: MappingPolicy,
    pub force_traversal: bool,
    /// START hits before the walk trusts the graph's abort probabilities.
    pub min_hits_for_abort: u64,
}

#[derive(Debug, Default)]
pub struct MarkovPathEstimator {
    initialized: bool,
    confidence: f64,
    greatest_abort: Option<f64>,
    touched: PartitionSet,
    read: PartitionSet,
    write: PartitionSet,
    visited: Vec<VertexId>,
    forced: Vec<VertexId>,
    estimate: Estimate,
}

impl MarkovPathEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Walk `ctx.graph` from `from` until a terminal vertex or a dead end,
    /// then finalize the estimate.
    pub fn traverse(&mut self, ctx: &PathContext<'_>, from: VertexId) -> Result<()> {
        assert!(!self.initialized, "path estimator reused without finish()");
        self.initialized = true;
        self.confidence = 1.0;
        self.estimate
            .init(from, EstimateBatch::Initial, ctx.graph.num_partitions());

        let graph = ctx.graph;
        let mut current = from;
        self.visit(ctx, current);
        loop {
            if graph.vertex(current).kind().is_terminal() {
                break;
            }
            let (candidates, forced) = self.candidates(ctx, current);
            let Some(&chosen) = candidates.first() else {
                break;
            };
            let total: f64 = candidates
                .iter()
                .map(|e| graph.edge(*e).probability())
                .sum();
            let p = graph.edge(chosen).probability();
            self.confidence *= if total > 0.0 {
                p / total
            } else {
                1.0 / candidates.len() as f64
            };

            current = graph.edge(chosen).dst();
            if forced {
                self.forced.push(current);
            }
            self.visit(ctx, current);
        }

        self.finalize(ctx);
        #[cfg(feature = "tracing")]
        tracing::trace!(
            proc = %ctx.proc.name,
            steps = self.visited.len(),
            forced = self.forced.len(),
            confidence = self.confidence,
            "path estimate finished"
        );
        Ok(())
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn estimate(&self) -> &Estimate {
        &self.estimate
    }

    /// Vertices visited by the walk, in order.
    pub fn visited_path(&self) -> &[VertexId] {
        &self.visited
    }

    /// Vertices reached only through the force-traversal fallback.
    pub fn forced_vertices(&self) -> &[VertexId] {
        &self.forced
    }

    pub fn touched_partitions(&self) -> &PartitionSet {
        &self.touched
    }

    /// Outgoing edges worth taking from `current`, most probable first. The
    /// flag reports that they came from the force-traversal fallback.
    fn candidates(&self, ctx: &PathContext<'_>, current: VertexId) -> (Vec<EdgeId>, bool) {
        let graph = ctx.graph;
        let out: Vec<EdgeId> = graph
            .out_edges(current)
            .iter()
            .copied()
            // never revisit: keeps the walk finite on cyclic graphs
            .filter(|e| !self.visited.contains(&graph.edge(*e).dst()))
            .collect();

        let mut candidates = Vec::new();
        let mut pairs: Vec<(StmtId, u32)> = Vec::new();
        for &e in &out {
            match graph.vertex(graph.edge(e).dst()).kind() {
                VertexKind::Commit | VertexKind::Abort => candidates.push(e),
                VertexKind::Query { stmt, instance, .. } => {
                    if !pairs.contains(&(*stmt, *instance)) {
                        pairs.push((*stmt, *instance));
                    }
                }
                VertexKind::Start => {}
            }
        }

        for (stmt_id, instance) in pairs {
            let Some(stmt) = ctx.proc.statement(stmt_id) else {
                continue;
            };
            let Some(stmt_args) = self.map_statement_args(ctx, stmt, instance) else {
                continue;
            };
            let partitions = match ctx.pest.statement_partitions(
                ctx.proc,
                stmt,
                &stmt_args,
                graph.base_partition(),
            ) {
                Ok(ps) => ps,
                Err(_e) => {
                    #[cfg(feature = "tracing")]
                    tracing::trace!(stmt = %stmt.name, error = %_e, "skipping candidate");
                    continue;
                }
            };
            for &e in &out {
                if let VertexKind::Query {
                    stmt: s,
                    instance: i,
                    partitions: ps,
                    ..
                } = graph.vertex(graph.edge(e).dst()).kind()
                {
                    if *s == stmt_id && *i == instance && *ps == partitions {
                        candidates.push(e);
                    }
                }
            }
        }

        let mut forced = false;
        if candidates.is_empty() && ctx.force_traversal {
            candidates = out;
            forced = !candidates.is_empty();
        }

        candidates.sort_by_key(|e| e.index());
        candidates.dedup();
        // stable: equal probabilities keep edge creation order
        candidates.sort_by(|a, b| {
            graph
                .edge(*b)
                .probability()
                .partial_cmp(&graph.edge(*a).probability())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        (candidates, forced)
    }

    /// Bind-parameter values for `stmt` derived from the procedure arguments
    /// through the correlation table. `None` when nothing could be mapped.
    fn map_statement_args(
        &self,
        ctx: &PathContext<'_>,
        stmt: &Statement,
        instance: u32,
    ) -> Option<Vec<ParamValue>> {
        let by_param = ctx
            .mappings
            .statement_mappings(ctx.proc.id, stmt.id, instance)?;
        let mut args = vec![ParamValue::Null; stmt.params.len()];
        let mut mapped = false;
        for (i, slot) in args.iter_mut().enumerate() {
            let Some(candidates) = by_param.get(&i) else {
                continue;
            };
            for m in ctx.policy.ordered(candidates) {
                let Some(value) = ctx.args.get(m.proc_param) else {
                    continue;
                };
                let resolved = match m.proc_param_index {
                    Some(idx) => match value.as_array().and_then(|a| a.get(idx)) {
                        Some(v) => v.clone(),
                        None => continue,
                    },
                    None => value.clone(),
                };
                *slot = resolved;
                mapped = true;
                break;
            }
        }
        mapped.then_some(args)
    }

    fn visit(&mut self, ctx: &PathContext<'_>, v: VertexId) {
        self.visited.push(v);
        let vertex = ctx.graph.vertex(v);
        let VertexKind::Query {
            partitions,
            query_type,
            ..
        } = vertex.kind()
        else {
            return;
        };

        let confidence = self.confidence;
        let inverse = 1.0 - confidence;
        let probs = self.estimate.probabilities_mut();
        if query_type.is_read_only() {
            for p in partitions {
                if !self.read.contains(p) {
                    probs.set_read_only(*p, confidence);
                    if !self.touched.contains(p) {
                        probs.set_done(*p, inverse);
                    }
                    self.read.insert(*p);
                }
            }
        } else {
            for p in partitions {
                if !self.write.contains(p) {
                    probs.set_read_only(*p, 0.0);
                    probs.set_write(*p, confidence);
                    if !self.touched.contains(p) {
                        probs.set_done(*p, inverse);
                    }
                    self.write.insert(*p);
                }
            }
        }
        for p in partitions {
            self.touched.insert(*p);
            self.estimate.increment_touched(*p);
        }

        if self.touched.len() > 1 && self.estimate.single_partition_probability().is_none() {
            self.estimate
                .probabilities_mut()
                .set_single_partition(inverse);
        }
        if let Some(a) = vertex.probabilities().abort() {
            self.greatest_abort = Some(self.greatest_abort.map_or(a, |g| g.max(a)));
        }
    }

    fn finalize(&mut self, ctx: &PathContext<'_>) {
        let graph = ctx.graph;
        let start = graph.vertex(graph.start());
        let sp = start.probabilities();
        let inverse = 1.0 - self.confidence;
        let single_touched = self.touched.len() == 1;
        let mut untouched_finish = 1.0f64;

        let probs = self.estimate.probabilities_mut();
        for p in (0..graph.num_partitions()).map(PartitionId::new) {
            if !self.touched.contains(&p) {
                let done = sp.done(p).unwrap_or(0.0);
                probs.set_done(p, done);
                probs.set_read_only(p, sp.read_only(p).unwrap_or(0.0));
                probs.set_write(p, sp.write(p).unwrap_or(0.0));
                if single_touched {
                    untouched_finish = untouched_finish.min(done);
                }
            } else {
                if probs.write(p).is_none() {
                    probs.set_write(p, inverse);
                }
                if probs.read_only(p).is_none() {
                    probs.set_read_only(p, 0.0);
                }
            }
        }

        if single_touched {
            probs.set_single_partition(untouched_finish);
        } else if probs.single_partition().is_none() {
            probs.set_single_partition(0.0);
        }

        let abort = if start.total_hits() >= ctx.min_hits_for_abort {
            self.greatest_abort.unwrap_or(0.0)
        } else {
            1.0
        };
        probs.set_abort(abort);
        self.estimate.set_confidence(self.confidence);
    }
}

impl Poolable for MarkovPathEstimator {
    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn finish(&mut self) {
        self.initialized = false;
        self.confidence = 1.0;
        self.greatest_abort = None;
        self.touched.clear();
        self.read.clear();
        self.write.clear();
        self.visited.clear();
        self.forced.clear();
        self.estimate.finish();
    }
}
