//! Bookkeeping for one (statement index, dependency id) of a round.

use markovdb_core::engine::ResultTable;
use markovdb_core::id::{DependencyId, PartitionId};
use markovdb_pool::Poolable;

#[derive(Debug, Default)]
pub struct DependencyInfo {
    stmt_index: usize,
    dependency_id: Option<DependencyId>,
    /// Partitions expected to produce a result, in registration order.
    partitions: Vec<PartitionId>,
    results: Vec<(PartitionId, ResultTable)>,
    /// Task ids waiting on this dependency as input.
    blocked_tasks: Vec<u64>,
    released: bool,
}

impl DependencyInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn init(&mut self, stmt_index: usize, dependency_id: DependencyId) {
        assert!(
            self.dependency_id.is_none(),
            "dependency info reused without finish()"
        );
        self.stmt_index = stmt_index;
        self.dependency_id = Some(dependency_id);
    }

    pub fn stmt_index(&self) -> usize {
        self.stmt_index
    }

    pub fn dependency_id(&self) -> Option<DependencyId> {
        self.dependency_id
    }

    pub fn add_partition(&mut self, partition: PartitionId) {
        self.partitions.push(partition);
    }

    pub fn partitions(&self) -> &[PartitionId] {
        &self.partitions
    }

    pub fn add_result(&mut self, partition: PartitionId, table: ResultTable) {
        assert!(
            self.partitions.contains(&partition),
            "unexpected result from partition {partition} for dependency {:?}",
            self.dependency_id
        );
        self.results.push((partition, table));
    }

    pub fn result_count(&self) -> usize {
        self.results.len()
    }

    /// Every expected partition delivered.
    pub fn is_complete(&self) -> bool {
        !self.partitions.is_empty() && self.results.len() == self.partitions.len()
    }

    /// First result that arrived.
    pub fn result(&self) -> Option<&ResultTable> {
        self.results.first().map(|(_, t)| t)
    }

    /// Move every result out, `base`'s first.
    pub fn take_results(&mut self, base: PartitionId) -> Vec<ResultTable> {
        self.results.sort_by_key(|(p, _)| *p != base);
        self.results.drain(..).map(|(_, t)| t).collect()
    }

    pub fn add_blocked_task(&mut self, task_id: u64) {
        if !self.blocked_tasks.contains(&task_id) {
            self.blocked_tasks.push(task_id);
        }
    }

    pub fn has_tasks_ready(&self) -> bool {
        !self.released && !self.blocked_tasks.is_empty() && self.is_complete()
    }

    /// Blocked task ids, handed out once.
    pub fn release_blocked_tasks(&mut self) -> Option<Vec<u64>> {
        if !self.has_tasks_ready() {
            return None;
        }
        self.released = true;
        Some(std::mem::take(&mut self.blocked_tasks))
    }
}

impl Poolable for DependencyInfo {
    fn is_initialized(&self) -> bool {
        self.dependency_id.is_some()
    }

    fn finish(&mut self) {
        self.stmt_index = 0;
        self.dependency_id = None;
        self.partitions.clear();
        self.results.clear();
        self.blocked_tasks.clear();
        self.released = false;
    }
}
