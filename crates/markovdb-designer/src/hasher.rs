//! Maps partitioning-column values to partitions.

use markovdb_core::hash::Digest;
use markovdb_core::id::PartitionId;
use markovdb_core::params::ParamValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefaultHasher {
    num_partitions: u32,
}

impl DefaultHasher {
    pub fn new(num_partitions: u32) -> Self {
        assert!(num_partitions > 0, "hasher needs at least one partition");
        Self { num_partitions }
    }

    pub fn num_partitions(&self) -> u32 {
        self.num_partitions
    }

    /// Partition for a scalar value. Null and arrays have none.
    pub fn hash(&self, value: &ParamValue) -> Option<PartitionId> {
        let n = self.num_partitions;
        let bucket = match value {
            ParamValue::Int(i) => i.rem_euclid(i64::from(n)) as u32,
            ParamValue::Str(s) => Digest::of(s.as_bytes()).bucket(n),
            ParamValue::Float(f) => Digest::of(&f.to_bits().to_le_bytes()).bucket(n),
            ParamValue::Null | ParamValue::Array(_) => return None,
        };
        Some(PartitionId::new(bucket))
    }
}
