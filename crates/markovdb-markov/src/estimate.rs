//! Per-transaction (or per-batch) prediction snapshot.

use markovdb_core::config::EstimationThresholds;
use markovdb_core::id::{PartitionId, PartitionSet};
use markovdb_pool::Poolable;
use markovdb_stats::{FastIntHistogram, ValueHistogram};

use crate::probabilities::ProbabilityTable;
use crate::vertex::VertexId;

/// Which point of the transaction an estimate describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstimateBatch {
    /// Made at transaction start, before any query ran.
    Initial,
    /// Made after the given batch (0-based) executed.
    Batch(usize),
}

#[derive(Debug, Clone, Default)]
pub struct Estimate {
    batch: Option<EstimateBatch>,
    vertex: Option<VertexId>,
    probs: ProbabilityTable,
    confidence: Option<f64>,
    touched: FastIntHistogram,
}

impl Estimate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn init(&mut self, vertex: VertexId, batch: EstimateBatch, num_partitions: u32) {
        self.vertex = Some(vertex);
        self.batch = Some(batch);
        self.probs.reset(num_partitions);
        self.confidence = None;
        self.touched = FastIntHistogram::new(num_partitions as usize);
    }

    /// Overwrite this estimate with `other`.
    pub fn copy_from(&mut self, other: &Estimate) {
        self.batch = other.batch;
        self.vertex = other.vertex;
        self.probs.copy_from(&other.probs);
        self.confidence = other.confidence;
        self.touched.clone_from(&other.touched);
    }

    pub fn vertex(&self) -> Option<VertexId> {
        self.vertex
    }

    pub fn batch(&self) -> Option<EstimateBatch> {
        self.batch
    }

    pub fn set_batch(&mut self, batch: EstimateBatch) {
        self.batch = Some(batch);
    }

    pub fn probabilities(&self) -> &ProbabilityTable {
        &self.probs
    }

    pub fn probabilities_mut(&mut self) -> &mut ProbabilityTable {
        &mut self.probs
    }

    pub fn confidence(&self) -> Option<f64> {
        self.confidence
    }

    pub fn set_confidence(&mut self, c: f64) {
        self.confidence = Some(c);
    }

    pub fn increment_touched(&mut self, partition: PartitionId) {
        self.touched.put(partition.index());
    }

    /// Replace the per-partition touch counts.
    pub fn set_touched_counter(&mut self, counts: &FastIntHistogram) {
        self.touched.clone_from(counts);
    }

    /// How often each partition was touched by the queries this estimate absorbed.
    pub fn touched_counter(&self) -> &FastIntHistogram {
        &self.touched
    }

    pub fn single_partition_probability(&self) -> Option<f64> {
        self.probs.single_partition()
    }

    pub fn abort_probability(&self) -> Option<f64> {
        self.probs.abort()
    }

    /// Every field has been computed.
    pub fn is_valid(&self) -> bool {
        self.vertex.is_some() && self.probs.is_complete()
    }

    fn partitions(&self) -> impl Iterator<Item = PartitionId> {
        (0..self.probs.num_partitions() as u32).map(PartitionId::new)
    }

    // Unset fields read pessimistically: not single-partition, abortable,
    // not finished anywhere.

    pub fn is_single_partition(&self, t: &EstimationThresholds) -> bool {
        self.probs.single_partition().unwrap_or(0.0) >= t.single_partition
    }

    pub fn is_abortable(&self, t: &EstimationThresholds) -> bool {
        self.probs.abort().unwrap_or(1.0) >= t.abort
    }

    pub fn is_read_only_partition(&self, t: &EstimationThresholds, p: PartitionId) -> bool {
        self.probs.read_only(p).unwrap_or(0.0) >= t.read
    }

    pub fn is_write_partition(&self, t: &EstimationThresholds, p: PartitionId) -> bool {
        self.probs.write(p).unwrap_or(1.0) >= t.write
    }

    pub fn is_finished_partition(&self, t: &EstimationThresholds, p: PartitionId) -> bool {
        self.probs.done(p).unwrap_or(0.0) >= t.done
    }

    /// The transaction is expected to still need `p`.
    pub fn is_target_partition(&self, t: &EstimationThresholds, p: PartitionId) -> bool {
        1.0 - self.probs.done(p).unwrap_or(0.0) >= t.done
    }

    pub fn touched_partitions(&self, t: &EstimationThresholds) -> PartitionSet {
        self.partitions()
            .filter(|p| self.is_target_partition(t, *p))
            .collect()
    }

    pub fn read_only_partitions(&self, t: &EstimationThresholds) -> PartitionSet {
        self.partitions()
            .filter(|p| self.is_read_only_partition(t, *p))
            .collect()
    }

    pub fn write_partitions(&self, t: &EstimationThresholds) -> PartitionSet {
        self.partitions()
            .filter(|p| self.is_write_partition(t, *p))
            .collect()
    }

    pub fn finished_partitions(&self, t: &EstimationThresholds) -> PartitionSet {
        self.partitions()
            .filter(|p| self.is_finished_partition(t, *p))
            .collect()
    }

    /// No partition the transaction still targets is expected to be written.
    pub fn is_read_only(&self, t: &EstimationThresholds) -> bool {
        self.touched_partitions(t)
            .iter()
            .all(|p| !self.is_write_partition(t, *p))
    }
}

impl Poolable for Estimate {
    fn is_initialized(&self) -> bool {
        self.vertex.is_some()
    }

    fn finish(&mut self) {
        self.vertex = None;
        self.batch = None;
        self.confidence = None;
        self.touched.clear_values();
    }
}
