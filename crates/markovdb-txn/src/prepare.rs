//! PREPARE acknowledgements of a multi-partition transaction.

use markovdb_core::id::{PartitionSet, TxnId};
use markovdb_pool::Poolable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepareOutcome {
    /// Some participants have not acknowledged yet.
    Waiting,
    /// Every participant acknowledged; the transaction may commit.
    Ready,
    /// A participant refused.
    Abort,
}

#[derive(Debug, Default)]
pub struct PrepareCallback {
    txn_id: Option<TxnId>,
    expected: PartitionSet,
    acked: PartitionSet,
    aborted: bool,
}

impl PrepareCallback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn init(&mut self, txn_id: TxnId, partitions: PartitionSet) {
        assert!(self.txn_id.is_none(), "prepare callback reused without finish()");
        self.txn_id = Some(txn_id);
        self.expected = partitions;
    }

    pub fn txn_id(&self) -> Option<TxnId> {
        self.txn_id
    }

    pub fn expected(&self) -> &PartitionSet {
        &self.expected
    }

    pub fn acknowledged(&self) -> &PartitionSet {
        &self.acked
    }

    /// Widen the participant set, e.g. after execution reached a partition
    /// the estimate did not predict.
    pub fn expect(&mut self, partitions: &PartitionSet) {
        self.expected.extend(partitions.iter().copied());
    }

    /// Record a PREPARE response covering `updated`.
    pub fn ack(&mut self, updated: &PartitionSet) -> PrepareOutcome {
        assert!(
            !updated.is_empty(),
            "empty PREPARE response for txn {:?}",
            self.txn_id
        );
        self.acked.extend(updated.iter().copied());
        self.outcome()
    }

    pub fn abort(&mut self) -> PrepareOutcome {
        self.aborted = true;
        self.outcome()
    }

    pub fn outcome(&self) -> PrepareOutcome {
        if self.aborted {
            PrepareOutcome::Abort
        } else if self.expected.is_subset(&self.acked) {
            PrepareOutcome::Ready
        } else {
            PrepareOutcome::Waiting
        }
    }
}

impl Poolable for PrepareCallback {
    fn is_initialized(&self) -> bool {
        self.txn_id.is_some()
    }

    fn finish(&mut self) {
        self.txn_id = None;
        self.expected.clear();
        self.acked.clear();
        self.aborted = false;
    }
}
