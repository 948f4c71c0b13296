//! Execution state of a transaction admitted at its base partition's site.
//!
//! Rounds move through [`RoundState`] per hosted partition. Within a round
//! the base partition collects work units, counts the output dependencies
//! they will produce, and blocks units whose input dependencies have not
//! arrived. Results delivered by other workers are matched back to their
//! statement FIFO per (partition, dependency) and count down the round's
//! latch, which is the only place the controlling thread blocks.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use markovdb_core::engine::ResultTable;
use markovdb_core::id::{ClientHandle, DependencyId, PartitionId, PartitionSet, ProcId, TxnId};
use markovdb_markov::EstimatorState;
use markovdb_pool::{ObjectPool, Pooled};
use markovdb_stats::{FastIntHistogram, ValueHistogram};

use crate::dependency::DependencyInfo;
use crate::error::{Result, TxnError};
use crate::fragment::FragmentTaskMessage;
use crate::latch::CountDownLatch;
use crate::prepare::PrepareCallback;
use crate::round::RoundState;

type DepKey = (PartitionId, DependencyId);

/// What the estimate said about the transaction when it was admitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prediction {
    pub touched: PartitionSet,
    pub read_only: bool,
    pub abortable: bool,
}

impl Prediction {
    pub fn single(partition: PartitionId) -> Self {
        Self {
            touched: PartitionSet::from([partition]),
            read_only: false,
            abortable: true,
        }
    }

    pub fn is_single_partition(&self) -> bool {
        self.touched.len() == 1
    }
}

/// Fixed facts about a new transaction.
#[derive(Debug, Clone)]
pub struct TxnInit {
    pub txn_id: TxnId,
    pub client_handle: ClientHandle,
    pub proc: ProcId,
    pub sysproc: bool,
    pub base_partition: PartitionId,
    /// Partitions hosted by this site; one round slot each.
    pub local_partitions: Vec<PartitionId>,
    pub num_partitions: u32,
    pub prediction: Prediction,
}

#[derive(Default)]
struct ExecutionState {
    round: Vec<RoundState>,
    batch_size: usize,
    last_undo_token: Option<u64>,
    /// Per statement index, keyed by dependency id.
    dependencies: Vec<BTreeMap<DependencyId, Pooled<DependencyInfo>>>,
    output_order: Vec<DependencyId>,
    internal_dependencies: HashSet<DependencyId>,
    /// Statement indexes still waiting for a result per key, oldest first.
    stmt_queues: HashMap<DepKey, VecDeque<usize>>,
    /// Results that arrived before the round started, in arrival order.
    queued_results: Vec<(DepKey, ResultTable)>,
    dependency_ctr: usize,
    received_ctr: usize,
    latch: Option<Arc<CountDownLatch>>,
    blocked: BTreeMap<u64, FragmentTaskMessage>,
    unblocked: VecDeque<FragmentTaskMessage>,
    exec_touched: FastIntHistogram,
    done_partitions: PartitionSet,
    pending_error: Option<TxnError>,
    abort_reason: Option<String>,
    prepare: Option<Pooled<PrepareCallback>>,
    estimator_state: Option<EstimatorState>,
    last_results: Vec<ResultTable>,
    finished: bool,
}

impl ExecutionState {
    fn clear_round(&mut self) {
        self.batch_size = 0;
        self.dependencies.clear();
        self.output_order.clear();
        self.internal_dependencies.clear();
        self.stmt_queues.clear();
        self.queued_results.clear();
        self.dependency_ctr = 0;
        self.received_ctr = 0;
        self.latch = None;
        self.blocked.clear();
        self.unblocked.clear();
    }

    fn dependency_mut(
        &mut self,
        pool: &ObjectPool<DependencyInfo>,
        stmt_index: usize,
        dep: DependencyId,
    ) -> &mut DependencyInfo {
        if self.dependencies.len() <= stmt_index {
            self.dependencies.resize_with(stmt_index + 1, BTreeMap::new);
        }
        self.dependencies[stmt_index].entry(dep).or_insert_with(|| {
            let mut info = pool.borrow();
            info.init(stmt_index, dep);
            info
        })
    }

    fn dependency(&self, stmt_index: usize, dep: DependencyId) -> Option<&DependencyInfo> {
        self.dependencies
            .get(stmt_index)
            .and_then(|m| m.get(&dep))
            .map(|d| &**d)
    }

    fn inputs_ready(&self, task: &FragmentTaskMessage) -> bool {
        task.fragments.iter().all(|f| match f.input_dep {
            Some(dep) => self
                .dependency(f.stmt_index, dep)
                .is_some_and(DependencyInfo::is_complete),
            None => true,
        })
    }

    fn process_result(&mut self, txn: TxnId, key: DepKey, table: ResultTable) {
        let (partition, dep) = key;
        let stmt_index = match self.stmt_queues.get_mut(&key).and_then(VecDeque::pop_front) {
            Some(i) => i,
            None => panic!(
                "txn {txn}: unexpected result for partition {partition}, dependency {dep}"
            ),
        };
        let Some(info) = self
            .dependencies
            .get_mut(stmt_index)
            .and_then(|m| m.get_mut(&dep))
        else {
            panic!("txn {txn}: no dependency {dep} registered for statement #{stmt_index}");
        };
        info.add_result(partition, table);
        let released = if self.blocked.is_empty() {
            None
        } else {
            info.release_blocked_tasks()
        };
        self.received_ctr += 1;
        if let Some(latch) = &self.latch {
            latch.count_down();
        }

        for task_id in released.into_iter().flatten() {
            let ready = self
                .blocked
                .get(&task_id)
                .is_some_and(|t| self.inputs_ready(t));
            if ready {
                if let Some(task) = self.blocked.remove(&task_id) {
                    self.unblocked.push_back(task);
                }
            }
        }
    }
}

pub struct LocalTransaction {
    txn_id: TxnId,
    client_handle: ClientHandle,
    proc: ProcId,
    sysproc: bool,
    base_partition: PartitionId,
    local_partitions: Vec<PartitionId>,
    prediction: Prediction,
    dependency_pool: ObjectPool<DependencyInfo>,
    state: Mutex<ExecutionState>,
}

impl LocalTransaction {
    /// A multi-partition prediction borrows a PREPARE callback for the
    /// predicted partitions.
    pub fn new(
        init: TxnInit,
        dependency_pool: ObjectPool<DependencyInfo>,
        prepare_pool: &ObjectPool<PrepareCallback>,
    ) -> Self {
        assert!(
            !init.prediction.touched.is_empty(),
            "txn {} predicted to touch no partitions",
            init.txn_id
        );
        assert!(
            init.local_partitions.contains(&init.base_partition),
            "txn {} base partition {} is not local",
            init.txn_id,
            init.base_partition
        );
        let prepare = (!init.prediction.is_single_partition()).then(|| {
            let mut cb = prepare_pool.borrow();
            cb.init(init.txn_id, init.prediction.touched.clone());
            cb
        });
        let state = ExecutionState {
            round: vec![RoundState::Uninitialized; init.local_partitions.len()],
            exec_touched: FastIntHistogram::new(init.num_partitions as usize),
            prepare,
            ..ExecutionState::default()
        };
        Self {
            txn_id: init.txn_id,
            client_handle: init.client_handle,
            proc: init.proc,
            sysproc: init.sysproc,
            base_partition: init.base_partition,
            local_partitions: init.local_partitions,
            prediction: init.prediction,
            dependency_pool,
            state: Mutex::new(state),
        }
    }

    pub fn txn_id(&self) -> TxnId {
        self.txn_id
    }

    pub fn client_handle(&self) -> ClientHandle {
        self.client_handle
    }

    pub fn proc(&self) -> ProcId {
        self.proc
    }

    pub fn is_sysproc(&self) -> bool {
        self.sysproc
    }

    pub fn base_partition(&self) -> PartitionId {
        self.base_partition
    }

    pub fn prediction(&self) -> &Prediction {
        &self.prediction
    }

    pub fn is_predict_single_partition(&self) -> bool {
        self.prediction.is_single_partition()
    }

    pub fn is_local(&self, partition: PartitionId) -> bool {
        self.local_partitions.contains(&partition)
    }

    fn offset(&self, partition: PartitionId) -> usize {
        match self.local_partitions.iter().position(|p| *p == partition) {
            Some(i) => i,
            None => panic!(
                "txn {}: partition {partition} is not hosted here",
                self.txn_id
            ),
        }
    }

    pub fn round_state(&self, partition: PartitionId) -> RoundState {
        let off = self.offset(partition);
        self.state.lock().round[off]
    }

    // ---------------------------------------------------------------------
    // Rounds
    // ---------------------------------------------------------------------

    pub fn init_round(&self, partition: PartitionId, undo_token: u64) {
        let off = self.offset(partition);
        let mut st = self.state.lock();
        assert!(
            st.queued_results.is_empty(),
            "txn {}: initializing a round with {} queued results",
            self.txn_id,
            st.queued_results.len()
        );
        assert!(
            st.round[off].can_init(),
            "txn {}: cannot init round at partition {partition} from {}",
            self.txn_id,
            st.round[off]
        );
        if partition == self.base_partition {
            st.clear_round();
        }
        st.round[off] = RoundState::Initialized;
        st.last_undo_token = Some(undo_token);
    }

    /// Round start for work that runs entirely at one local partition. Skips
    /// the dependency bookkeeping.
    pub fn fast_init_round(&self, partition: PartitionId, undo_token: u64) {
        let off = self.offset(partition);
        let mut st = self.state.lock();
        st.round[off] = RoundState::Initialized;
        st.last_undo_token = Some(undo_token);
    }

    pub fn set_batch_size(&self, batch_size: usize) {
        self.state.lock().batch_size = batch_size;
    }

    pub fn start_round(&self, partition: PartitionId) {
        let off = self.offset(partition);
        let mut st = self.state.lock();
        assert_eq!(
            st.round[off],
            RoundState::Initialized,
            "txn {}: starting round at partition {partition}",
            self.txn_id
        );
        st.round[off] = RoundState::Started;
        if partition != self.base_partition {
            return;
        }

        assert!(st.output_order.is_empty(), "txn {}: output order already set", self.txn_id);
        assert!(st.batch_size > 0, "txn {}: starting round with an empty batch", self.txn_id);
        let mut order = Vec::with_capacity(st.batch_size);
        for stmt_index in 0..st.batch_size {
            if let Some(deps) = st.dependencies.get(stmt_index) {
                order.extend(
                    deps.keys()
                        .filter(|d| !st.internal_dependencies.contains(*d))
                        .copied(),
                );
            }
        }
        assert_eq!(
            st.batch_size,
            order.len(),
            "txn {}: expected one output dependency per statement",
            self.txn_id
        );
        st.output_order = order;

        for (key, table) in std::mem::take(&mut st.queued_results) {
            st.process_result(self.txn_id, key, table);
        }

        let count = match st.dependency_ctr.checked_sub(st.received_ctr) {
            Some(c) => c,
            None => panic!(
                "txn {}: received {} results for {} dependencies",
                self.txn_id, st.received_ctr, st.dependency_ctr
            ),
        };
        assert!(st.latch.is_none(), "txn {}: dependency latch already armed", self.txn_id);
        let count = if st.pending_error.is_some() { 0 } else { count };
        st.latch = Some(Arc::new(CountDownLatch::new(count)));
    }

    pub fn finish_round(&self, partition: PartitionId) {
        let off = self.offset(partition);
        let mut st = self.state.lock();
        assert_eq!(
            st.dependency_ctr, st.received_ctr,
            "txn {}: finishing round with outstanding dependencies",
            self.txn_id
        );
        assert!(
            st.queued_results.is_empty(),
            "txn {}: finishing round with queued results",
            self.txn_id
        );
        assert_eq!(
            st.round[off],
            RoundState::Started,
            "txn {}: finishing round at partition {partition}",
            self.txn_id
        );
        st.round[off] = RoundState::Finished;
        if partition == self.base_partition {
            if let Some(latch) = st.latch.take() {
                assert_eq!(latch.count(), 0, "txn {}: latch not drained", self.txn_id);
            }
        }
    }

    /// Finish a round started with [`fast_init_round`](Self::fast_init_round).
    pub fn fast_finish_round(&self, partition: PartitionId) {
        let off = self.offset(partition);
        self.state.lock().round[off] = RoundState::Finished;
    }

    // ---------------------------------------------------------------------
    // Work units and dependencies
    // ---------------------------------------------------------------------

    /// Register a work unit for the current round. Returns true if it waits
    /// on input dependencies and must not run yet.
    pub fn add_fragment_task_message(&self, task: FragmentTaskMessage) -> bool {
        let off = self.offset(self.base_partition);
        let mut st = self.state.lock();
        assert_eq!(
            st.round[off],
            RoundState::Initialized,
            "txn {}: adding work outside an initialized round",
            self.txn_id
        );
        let dest = task.destination;
        st.exec_touched
            .put_count(dest.index(), task.fragment_count() as u64);

        for f in &task.fragments {
            if let Some(dep) = f.output_dep {
                st.dependency_mut(&self.dependency_pool, f.stmt_index, dep)
                    .add_partition(dest);
                st.dependency_ctr += 1;
                st.stmt_queues
                    .entry((dest, dep))
                    .or_default()
                    .push_back(f.stmt_index);
            }
        }

        if !task.has_input_dependencies() {
            return false;
        }
        for f in &task.fragments {
            if let Some(dep) = f.input_dep {
                st.dependency_mut(&self.dependency_pool, f.stmt_index, dep)
                    .add_blocked_task(task.task_id);
                st.internal_dependencies.insert(dep);
            }
        }
        #[cfg(feature = "tracing")]
        tracing::trace!(txn = %self.txn_id, task = task.task_id, "blocked on input dependencies");
        let task_id = task.task_id;
        assert!(
            st.blocked.insert(task_id, task).is_none(),
            "txn {}: duplicate task {task_id}",
            self.txn_id
        );
        true
    }

    /// Deliver the result of `dependency` produced at `partition`. Results
    /// that arrive after the transaction failed or finished are dropped.
    pub fn add_result(&self, partition: PartitionId, dependency: DependencyId, table: ResultTable) {
        let off = self.offset(self.base_partition);
        let mut st = self.state.lock();
        if st.finished || st.abort_reason.is_some() {
            #[cfg(feature = "tracing")]
            tracing::debug!(
                txn = %self.txn_id,
                %partition,
                %dependency,
                finished = st.finished,
                "dropping late result"
            );
            return;
        }
        let key = (partition, dependency);
        match st.round[off] {
            RoundState::Initialized => {
                assert!(
                    !st.queued_results.iter().any(|(k, _)| *k == key),
                    "txn {}: duplicate result for partition {partition}, dependency {dependency}",
                    self.txn_id
                );
                st.queued_results.push((key, table));
            }
            RoundState::Started => st.process_result(self.txn_id, key, table),
            other => panic!(
                "txn {}: result for dependency {dependency} in round state {other}",
                self.txn_id
            ),
        }
    }

    /// Work units whose inputs have all arrived since the last call.
    pub fn take_unblocked(&self) -> Vec<FragmentTaskMessage> {
        self.state.lock().unblocked.drain(..).collect()
    }

    pub fn is_blocked(&self, task_id: u64) -> bool {
        self.state.lock().blocked.contains_key(&task_id)
    }

    pub fn blocked_count(&self) -> usize {
        self.state.lock().blocked.len()
    }

    pub fn dependency_count(&self) -> usize {
        self.state.lock().dependency_ctr
    }

    pub fn received_count(&self) -> usize {
        self.state.lock().received_ctr
    }

    pub fn output_order(&self) -> Vec<DependencyId> {
        self.state.lock().output_order.clone()
    }

    pub fn internal_dependency_ids(&self) -> HashSet<DependencyId> {
        self.state.lock().internal_dependencies.clone()
    }

    /// Remaining count of the current round's latch.
    pub fn latch_count(&self) -> Option<usize> {
        self.state.lock().latch.as_ref().map(|l| l.count())
    }

    /// Take the input tables `task` consumes, base partition's first.
    pub fn remove_internal_dependencies(
        &self,
        task: &FragmentTaskMessage,
    ) -> HashMap<DependencyId, Vec<ResultTable>> {
        let mut st = self.state.lock();
        let mut out = HashMap::new();
        for f in &task.fragments {
            let Some(dep) = f.input_dep else {
                continue;
            };
            if out.contains_key(&dep) {
                continue;
            }
            let Some(info) = st
                .dependencies
                .get_mut(f.stmt_index)
                .and_then(|m| m.get_mut(&dep))
            else {
                panic!(
                    "txn {}: task {} consumes unknown dependency {dep}",
                    self.txn_id, task.task_id
                );
            };
            assert_eq!(
                info.partitions().len(),
                info.result_count(),
                "txn {}: dependency {dep} of statement #{} is incomplete",
                self.txn_id,
                f.stmt_index
            );
            out.insert(dep, info.take_results(self.base_partition));
        }
        out
    }

    /// Block until every expected dependency arrived, or a pending error
    /// drained the latch.
    pub fn wait_for_dependencies(&self, timeout: Option<Duration>) -> Result<()> {
        let latch = {
            let mut st = self.state.lock();
            if let Some(e) = st.pending_error.take() {
                return Err(e);
            }
            st.latch.clone()
        };
        let mut timed_out = None;
        if let Some(latch) = latch {
            match timeout {
                Some(t) => {
                    if !latch.wait_timeout(t) {
                        let reason = format!("timed out after {t:?} waiting for dependencies");
                        // results still in flight are dropped from here on
                        self.set_pending_error(TxnError::Aborted {
                            txn: self.txn_id,
                            reason: reason.clone(),
                        });
                        timed_out = Some(reason);
                    }
                }
                None => latch.wait(),
            }
        }
        match (self.state.lock().pending_error.take(), timed_out) {
            (Some(e), _) => Err(e),
            (None, Some(reason)) => Err(TxnError::Aborted {
                txn: self.txn_id,
                reason,
            }),
            (None, None) => Ok(()),
        }
    }

    /// One result table per statement, in output-dependency order.
    pub fn get_results(&self) -> Vec<ResultTable> {
        let st = self.state.lock();
        st.output_order
            .iter()
            .enumerate()
            .map(|(stmt_index, dep)| {
                let Some(info) = st.dependency(stmt_index, *dep) else {
                    panic!(
                        "txn {}: missing dependency {dep} for statement #{stmt_index}",
                        self.txn_id
                    );
                };
                match info.result() {
                    Some(t) => t.clone(),
                    None => panic!(
                        "txn {}: no result for statement #{stmt_index} (dependency {dep})",
                        self.txn_id
                    ),
                }
            })
            .collect()
    }

    // ---------------------------------------------------------------------
    // Errors
    // ---------------------------------------------------------------------

    /// Record `error` and wake any thread waiting on dependencies. Only the
    /// first error is kept.
    pub fn set_pending_error(&self, error: TxnError) {
        let mut st = self.state.lock();
        if st.abort_reason.is_some() {
            return;
        }
        st.abort_reason = Some(error.to_string());
        st.pending_error = Some(error);
        if let Some(latch) = &st.latch {
            latch.release_all();
        }
    }

    pub fn has_pending_error(&self) -> bool {
        self.state.lock().abort_reason.is_some()
    }

    /// Message of the first error recorded against this transaction.
    pub fn pending_error(&self) -> Option<String> {
        self.state.lock().abort_reason.clone()
    }

    // ---------------------------------------------------------------------
    // Partitions, estimation, PREPARE
    // ---------------------------------------------------------------------

    /// Fragments executed per partition so far.
    pub fn touched_partitions(&self) -> FastIntHistogram {
        self.state.lock().exec_touched.clone()
    }

    pub fn touched_partition_set(&self) -> PartitionSet {
        self.state
            .lock()
            .exec_touched
            .values()
            .into_iter()
            .map(|i| PartitionId::new(i as u32))
            .collect()
    }

    pub fn is_exec_single_partition(&self) -> bool {
        self.state.lock().exec_touched.value_count() <= 1
    }

    pub fn mark_done(&self, partition: PartitionId) {
        self.state.lock().done_partitions.insert(partition);
    }

    pub fn done_partitions(&self) -> PartitionSet {
        self.state.lock().done_partitions.clone()
    }

    pub fn last_undo_token(&self) -> Option<u64> {
        self.state.lock().last_undo_token
    }

    pub fn set_estimator_state(&self, state: EstimatorState) {
        let mut st = self.state.lock();
        assert!(
            st.estimator_state.is_none(),
            "txn {}: estimator state already set",
            self.txn_id
        );
        st.estimator_state = Some(state);
    }

    pub fn has_estimator_state(&self) -> bool {
        self.state.lock().estimator_state.is_some()
    }

    pub fn with_estimator_state<R>(&self, f: impl FnOnce(&mut EstimatorState) -> R) -> Option<R> {
        self.state.lock().estimator_state.as_mut().map(f)
    }

    pub fn take_estimator_state(&self) -> Option<EstimatorState> {
        self.state.lock().estimator_state.take()
    }

    /// Runs `f` on the PREPARE callback; `None` for single-partition transactions.
    pub fn with_prepare<R>(&self, f: impl FnOnce(&mut PrepareCallback) -> R) -> Option<R> {
        self.state.lock().prepare.as_mut().map(|cb| f(&mut **cb))
    }

    pub fn set_last_results(&self, results: Vec<ResultTable>) {
        self.state.lock().last_results = results;
    }

    pub fn take_last_results(&self) -> Vec<ResultTable> {
        std::mem::take(&mut self.state.lock().last_results)
    }

    /// Release pooled resources. Hands back the estimator state, if any, so
    /// the caller can close it at COMMIT or ABORT.
    pub fn finish(&self) -> Option<EstimatorState> {
        let mut st = self.state.lock();
        st.clear_round();
        st.prepare = None;
        st.pending_error = None;
        st.finished = true;
        for r in &mut st.round {
            *r = RoundState::Uninitialized;
        }
        st.estimator_state.take()
    }

    pub fn is_finished(&self) -> bool {
        self.state.lock().finished
    }
}

impl fmt::Debug for LocalTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.state.lock();
        f.debug_struct("LocalTransaction")
            .field("txn_id", &self.txn_id)
            .field("proc", &self.proc)
            .field("base_partition", &self.base_partition)
            .field("predicted", &self.prediction.touched)
            .field("rounds", &st.round)
            .field("dependencies", &st.dependency_ctr)
            .field("received", &st.received_ctr)
            .field("blocked", &st.blocked.len())
            .finish()
    }
}
