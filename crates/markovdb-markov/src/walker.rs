//! Reverse traversal order for probability computation.
//!
//! A vertex may only be finalized once every successor is. Edges that close
//! a cycle (found by a DFS from START) are dropped; the rest form a DAG that
//! is peeled from the sinks backwards, Kahn style, so each remaining edge is
//! processed exactly once.

use std::collections::{HashSet, VecDeque};

use crate::graph::MarkovGraph;
use crate::vertex::{EdgeId, VertexId};

#[derive(Debug, Clone)]
pub struct ReverseOrder {
    order: Vec<VertexId>,
    skipped: HashSet<EdgeId>,
}

impl ReverseOrder {
    pub fn compute(graph: &MarkovGraph) -> Self {
        let skipped = back_edges(graph);
        let mut frontier = ReverseFrontier::new(graph, &skipped);
        let mut order = Vec::with_capacity(graph.vertex_count());
        while let Some(v) = frontier.step(graph, &skipped) {
            order.push(v);
        }
        Self { order, skipped }
    }

    /// Vertices, every one after all of its (non-skipped) successors.
    pub fn order(&self) -> &[VertexId] {
        &self.order
    }

    pub fn is_skipped(&self, e: EdgeId) -> bool {
        self.skipped.contains(&e)
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }
}

/// Sink-first frontier over the reversed graph.
struct ReverseFrontier {
    pending_out: Vec<usize>,
    ready: VecDeque<VertexId>,
}

impl ReverseFrontier {
    fn new(graph: &MarkovGraph, skipped: &HashSet<EdgeId>) -> Self {
        let pending_out: Vec<usize> = graph
            .vertex_ids()
            .map(|v| {
                graph
                    .out_edges(v)
                    .iter()
                    .filter(|e| !skipped.contains(e))
                    .count()
            })
            .collect();

        let mut ready = VecDeque::new();
        if graph.is_initialized() {
            ready.push_back(graph.commit());
            ready.push_back(graph.abort());
        }
        for v in graph.vertex_ids() {
            if pending_out[v.index()] == 0 && !ready.contains(&v) {
                ready.push_back(v);
            }
        }
        Self { pending_out, ready }
    }

    fn step(&mut self, graph: &MarkovGraph, skipped: &HashSet<EdgeId>) -> Option<VertexId> {
        let v = self.ready.pop_front()?;
        for &e in graph.in_edges(v) {
            if skipped.contains(&e) {
                continue;
            }
            let src = graph.edge(e).src();
            let deg = &mut self.pending_out[src.index()];
            *deg -= 1;
            if *deg == 0 {
                self.ready.push_back(src);
            }
        }
        Some(v)
    }
}

/// Edges pointing back onto the DFS stack.
fn back_edges(graph: &MarkovGraph) -> HashSet<EdgeId> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        New,
        Open,
        Done,
    }

    let mut marks = vec![Mark::New; graph.vertex_count()];
    let mut skipped = HashSet::new();
    let roots = graph
        .is_initialized()
        .then(|| graph.start())
        .into_iter()
        .chain(graph.vertex_ids());

    for root in roots {
        if marks[root.index()] != Mark::New {
            continue;
        }
        let mut stack: Vec<(VertexId, usize)> = vec![(root, 0)];
        marks[root.index()] = Mark::Open;
        while let Some((v, next)) = stack.last_mut() {
            let out = graph.out_edges(*v);
            if *next == out.len() {
                marks[v.index()] = Mark::Done;
                stack.pop();
                continue;
            }
            let e = out[*next];
            *next += 1;
            let dst = graph.edge(e).dst();
            match marks[dst.index()] {
                Mark::New => {
                    marks[dst.index()] = Mark::Open;
                    stack.push((dst, 0));
                }
                Mark::Open => {
                    skipped.insert(e);
                }
                Mark::Done => {}
            }
        }
    }
    skipped
}
