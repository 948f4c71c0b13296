//! Probability table shared by graph vertices and estimates.
//!
//! Every field starts unset. Vertices have theirs filled in bulk by
//! `MarkovGraph::calculate_probabilities`; estimates have theirs filled
//! incrementally by the path estimator.

use markovdb_core::id::PartitionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionField {
    Done,
    ReadOnly,
    Write,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbabilityTable {
    single_partition: Option<f64>,
    abort: Option<f64>,
    done: Vec<Option<f64>>,
    read_only: Vec<Option<f64>>,
    write: Vec<Option<f64>>,
}

impl ProbabilityTable {
    pub fn new(num_partitions: u32) -> Self {
        let mut t = Self::default();
        t.reset(num_partitions);
        t
    }

    /// Unset every field and size the per-partition columns.
    pub fn reset(&mut self, num_partitions: u32) {
        let n = num_partitions as usize;
        self.single_partition = None;
        self.abort = None;
        for col in [&mut self.done, &mut self.read_only, &mut self.write] {
            col.clear();
            col.resize(n, None);
        }
    }

    pub fn num_partitions(&self) -> usize {
        self.done.len()
    }

    pub fn single_partition(&self) -> Option<f64> {
        self.single_partition
    }

    pub fn set_single_partition(&mut self, p: f64) {
        self.single_partition = Some(p);
    }

    pub fn abort(&self) -> Option<f64> {
        self.abort
    }

    pub fn set_abort(&mut self, p: f64) {
        self.abort = Some(p);
    }

    fn column(&self, field: PartitionField) -> &Vec<Option<f64>> {
        match field {
            PartitionField::Done => &self.done,
            PartitionField::ReadOnly => &self.read_only,
            PartitionField::Write => &self.write,
        }
    }

    fn column_mut(&mut self, field: PartitionField) -> &mut Vec<Option<f64>> {
        match field {
            PartitionField::Done => &mut self.done,
            PartitionField::ReadOnly => &mut self.read_only,
            PartitionField::Write => &mut self.write,
        }
    }

    pub fn get(&self, field: PartitionField, partition: PartitionId) -> Option<f64> {
        self.column(field).get(partition.index()).copied().flatten()
    }

    pub fn set(&mut self, field: PartitionField, partition: PartitionId, p: f64) {
        self.column_mut(field)[partition.index()] = Some(p);
    }

    pub fn done(&self, partition: PartitionId) -> Option<f64> {
        self.get(PartitionField::Done, partition)
    }

    pub fn read_only(&self, partition: PartitionId) -> Option<f64> {
        self.get(PartitionField::ReadOnly, partition)
    }

    pub fn write(&self, partition: PartitionId) -> Option<f64> {
        self.get(PartitionField::Write, partition)
    }

    pub fn set_done(&mut self, partition: PartitionId, p: f64) {
        self.set(PartitionField::Done, partition, p);
    }

    pub fn set_read_only(&mut self, partition: PartitionId, p: f64) {
        self.set(PartitionField::ReadOnly, partition, p);
    }

    pub fn set_write(&mut self, partition: PartitionId, p: f64) {
        self.set(PartitionField::Write, partition, p);
    }

    /// True once every field has a value.
    pub fn is_complete(&self) -> bool {
        self.single_partition.is_some()
            && self.abort.is_some()
            && [&self.done, &self.read_only, &self.write]
                .iter()
                .all(|col| col.iter().all(Option::is_some))
    }

    pub fn copy_from(&mut self, other: &ProbabilityTable) {
        self.single_partition = other.single_partition;
        self.abort = other.abort;
        self.done.clone_from(&other.done);
        self.read_only.clone_from(&other.read_only);
        self.write.clone_from(&other.write);
    }
}
