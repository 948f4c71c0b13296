//! Strongly-typed identifiers used across the engine.
//!
//! Downstream crates (markov, txn, designer) should *not* use raw integers for IDs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

macro_rules! new_id {
    ($name:ident, $repr:ty) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd,
        )]
        #[serde(transparent)]
        pub struct $name($repr);

        impl $name {
            pub const fn new(v: $repr) -> Self {
                Self(v)
            }
            pub const fn get(self) -> $repr {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

new_id!(TxnId, u64);
new_id!(ClientHandle, u64);
new_id!(ProcId, u32);
new_id!(StmtId, u32);
new_id!(DependencyId, u32);
new_id!(PartitionId, u32);

impl PartitionId {
    /// Dense index for array-backed per-partition tables.
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl StmtId {
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Ordered set of partitions. Ordering keeps vertex identity and JSON output stable.
pub type PartitionSet = BTreeSet<PartitionId>;

/// Every partition id in `0..num_partitions`.
pub fn all_partitions(num_partitions: u32) -> PartitionSet {
    (0..num_partitions).map(PartitionId::new).collect()
}
