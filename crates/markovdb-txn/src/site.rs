//! The per-site coordinator, passed explicitly to whoever needs it.
//!
//! Admits invocations (routing them single- or multi-partition from the
//! initial estimate), drives execution rounds through the executor, runs
//! PREPARE, and finishes transactions at COMMIT or ABORT.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use markovdb_core::catalog::Catalog;
use markovdb_core::config::SiteConfig;
use markovdb_core::engine::{ExecutionEngine, ResultTable};
use markovdb_core::estimator::PartitionEstimator;
use markovdb_core::id::{ClientHandle, PartitionId, PartitionSet, TxnId};
use markovdb_core::mappings::ParameterMappingsSet;
use markovdb_core::params::ParamValue;
use markovdb_core::trace::QueryTrace;
use markovdb_markov::{EstimatorConfig, MarkovGraphsContainer, TransactionEstimator};
use markovdb_pool::ObjectPool;

use crate::dependency::DependencyInfo;
use crate::error::{Result, TxnError};
use crate::fail_point;
use crate::fragment::FragmentTaskMessage;
use crate::local::{LocalTransaction, Prediction, TxnInit};
use crate::metrics::emit_span;
use crate::prepare::{PrepareCallback, PrepareOutcome};

/// Final answer sent back to the client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientResponse {
    Committed {
        txn_id: TxnId,
        client_handle: ClientHandle,
        results: Vec<ResultTable>,
    },
    Aborted {
        txn_id: TxnId,
        client_handle: ClientHandle,
        reason: String,
    },
}

impl ClientResponse {
    pub fn txn_id(&self) -> TxnId {
        match self {
            ClientResponse::Committed { txn_id, .. } | ClientResponse::Aborted { txn_id, .. } => {
                *txn_id
            }
        }
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, ClientResponse::Committed { .. })
    }
}

pub struct SiteContext {
    config: SiteConfig,
    catalog: Arc<Catalog>,
    pest: Arc<dyn PartitionEstimator>,
    engine: Arc<dyn ExecutionEngine>,
    estimator: Option<TransactionEstimator>,
    local_partitions: Vec<PartitionId>,
    next_txn_id: AtomicU64,
    next_undo_token: AtomicU64,
    /// Zero until the first commit.
    last_committed: AtomicU64,
    dependency_pool: ObjectPool<DependencyInfo>,
    prepare_pool: ObjectPool<PrepareCallback>,
}

impl SiteContext {
    /// Build the site. Graphs come from `graphs`, else from
    /// `config.markov_path`, else start empty.
    pub fn new(
        config: SiteConfig,
        catalog: Arc<Catalog>,
        pest: Arc<dyn PartitionEstimator>,
        engine: Arc<dyn ExecutionEngine>,
        mappings: Option<ParameterMappingsSet>,
        graphs: Option<Arc<MarkovGraphsContainer>>,
    ) -> Result<Self> {
        config.validate()?;
        catalog.validate()?;

        let local_partitions: Vec<PartitionId> = if config.local_partitions.is_empty() {
            catalog.all_partitions().into_iter().collect()
        } else {
            config
                .local_partitions
                .iter()
                .copied()
                .map(PartitionId::new)
                .collect()
        };
        if let Some(p) = local_partitions
            .iter()
            .find(|p| p.get() >= catalog.num_partitions)
        {
            return Err(TxnError::NotLocal(*p));
        }

        let estimator = if config.markov_enable {
            let graphs = match (graphs, &config.markov_path) {
                (Some(g), _) => g,
                (None, Some(path)) => Arc::new(MarkovGraphsContainer::load(path, &catalog)?),
                (None, None) => Arc::new(MarkovGraphsContainer::new()),
            };
            Some(TransactionEstimator::new(
                Arc::clone(&catalog),
                Arc::clone(&pest),
                Arc::new(mappings.unwrap_or_default()),
                graphs,
                EstimatorConfig::from(&config),
            ))
        } else {
            None
        };

        #[cfg(feature = "tracing")]
        tracing::info!(
            partitions = local_partitions.len(),
            markov = estimator.is_some(),
            "site context ready"
        );

        let idle = config.pool_idle;
        Ok(Self {
            config,
            catalog,
            pest,
            engine,
            estimator,
            local_partitions,
            next_txn_id: AtomicU64::new(1),
            next_undo_token: AtomicU64::new(1),
            last_committed: AtomicU64::new(0),
            dependency_pool: ObjectPool::new("dependency-infos", idle, DependencyInfo::new),
            prepare_pool: ObjectPool::new("prepare-callbacks", idle, PrepareCallback::new),
        })
    }

    pub fn config(&self) -> &SiteConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn estimator(&self) -> Option<&TransactionEstimator> {
        self.estimator.as_ref()
    }

    pub fn local_partitions(&self) -> &[PartitionId] {
        &self.local_partitions
    }

    pub fn last_committed_txn_id(&self) -> Option<TxnId> {
        match self.last_committed.load(Ordering::Acquire) {
            0 => None,
            id => Some(TxnId::new(id)),
        }
    }

    fn latch_timeout(&self) -> Option<Duration> {
        self.config.latch_timeout_ms.map(Duration::from_millis)
    }

    /// Admit an invocation at its base partition.
    pub fn begin(
        &self,
        proc_name: &str,
        params: Vec<ParamValue>,
        client_handle: ClientHandle,
    ) -> Result<LocalTransaction> {
        let proc = self
            .catalog
            .procedure_by_name(proc_name)
            .map_err(|_| TxnError::UnknownProcedure(proc_name.to_string()))?;
        let base = self.pest.base_partition(proc, &params)?;
        if !self.local_partitions.contains(&base) {
            return Err(TxnError::NotLocal(base));
        }
        let txn_id = TxnId::new(self.next_txn_id.fetch_add(1, Ordering::AcqRel));

        let (prediction, estimator_state) = match &self.estimator {
            Some(estimator) if !proc.sysproc => {
                let state = estimator.start_transaction(txn_id, proc.id, &params)?;
                let t = estimator.thresholds();
                let est = state.initial_estimate();
                let mut touched = est.touched_partitions(t);
                touched.insert(base);
                let prediction = Prediction {
                    touched,
                    read_only: est.is_read_only(t),
                    abortable: est.is_abortable(t),
                };
                (prediction, Some(state))
            }
            _ => {
                let touched = if proc.single_partition {
                    PartitionSet::from([base])
                } else {
                    self.catalog.all_partitions()
                };
                let prediction = Prediction {
                    touched,
                    read_only: proc.is_read_only(),
                    abortable: true,
                };
                (prediction, None)
            }
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(
            txn = %txn_id,
            proc = %proc.name,
            base = %base,
            predicted = ?prediction.touched,
            "admitted transaction"
        );
        emit_span(
            "txn_begin",
            &[
                ("txn", txn_id.to_string()),
                ("proc", proc.name.clone()),
                ("single_partition", prediction.is_single_partition().to_string()),
            ],
        );

        let txn = LocalTransaction::new(
            TxnInit {
                txn_id,
                client_handle,
                proc: proc.id,
                sysproc: proc.sysproc,
                base_partition: base,
                local_partitions: self.local_partitions.clone(),
                num_partitions: self.catalog.num_partitions,
                prediction,
            },
            self.dependency_pool.clone(),
            &self.prepare_pool,
        );
        if let Some(state) = estimator_state {
            txn.set_estimator_state(state);
        }
        Ok(txn)
    }

    /// Run one batch of statements to completion and return one result
    /// table per statement. An executor failure becomes the transaction's
    /// pending error and is returned; the caller should then finish the
    /// transaction, which answers the client with an abort.
    pub fn execute_batch(
        &self,
        txn: &LocalTransaction,
        tasks: Vec<FragmentTaskMessage>,
    ) -> Result<Vec<ResultTable>> {
        if let Some(reason) = txn.pending_error() {
            return Err(TxnError::Aborted {
                txn: txn.txn_id(),
                reason,
            });
        }
        for task in &tasks {
            if !txn.is_local(task.destination) {
                return Err(TxnError::NotLocal(task.destination));
            }
        }

        let base = txn.base_partition();
        let undo_token = self.next_undo_token.fetch_add(1, Ordering::AcqRel);
        let mut partitions: BTreeSet<PartitionId> = tasks.iter().map(|t| t.destination).collect();
        partitions.insert(base);
        let queries = batch_queries(&tasks);

        for p in &partitions {
            txn.init_round(*p, undo_token);
        }
        txn.set_batch_size(queries.len());
        let mut ready = Vec::new();
        for task in tasks {
            if !txn.add_fragment_task_message(task.clone()) {
                ready.push(task);
            }
        }
        for p in &partitions {
            txn.start_round(*p);
        }

        while !ready.is_empty() {
            for task in ready.drain(..) {
                self.dispatch(txn, &task, undo_token)?;
            }
            ready = txn.take_unblocked();
        }
        txn.wait_for_dependencies(self.latch_timeout())?;

        let results = txn.get_results();
        for p in &partitions {
            txn.finish_round(*p);
        }

        if let Some(estimator) = &self.estimator {
            txn.with_estimator_state(|state| estimator.execute_queries(state, &queries).map(|_| ()))
                .transpose()?;
        }
        txn.set_last_results(results.clone());
        Ok(results)
    }

    fn dispatch(&self, txn: &LocalTransaction, task: &FragmentTaskMessage, undo_token: u64) -> Result<()> {
        let inputs = txn.remove_internal_dependencies(task);
        let batch = task.to_batch(inputs, self.last_committed_txn_id(), undo_token);
        fail_point!("engine_dispatch");
        match self.engine.execute_fragments(task.destination, &batch) {
            Ok(deps) => {
                for (dep, table) in deps.dependencies {
                    txn.add_result(task.destination, dep, table);
                }
                Ok(())
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    txn = %txn.txn_id(),
                    partition = %task.destination,
                    code = e.code,
                    "fragment execution failed"
                );
                txn.set_pending_error(TxnError::Engine(e.clone()));
                Err(TxnError::Engine(e))
            }
        }
    }

    /// PREPARE every partition the transaction executed on. Single-partition
    /// transactions have nothing to prepare.
    pub fn prepare(&self, txn: &LocalTransaction) -> Result<PrepareOutcome> {
        fail_point!("prepare");
        let mut executed = txn.touched_partition_set();
        executed.insert(txn.base_partition());
        let expected = txn.with_prepare(|cb| {
            cb.expect(&executed);
            cb.expected().clone()
        });
        let Some(expected) = expected else {
            return Ok(PrepareOutcome::Ready);
        };
        let mut updated = PartitionSet::new();
        for p in expected.into_iter().filter(|p| txn.is_local(*p)) {
            txn.mark_done(p);
            updated.insert(p);
        }
        let outcome = txn
            .with_prepare(|cb| cb.ack(&updated))
            .unwrap_or(PrepareOutcome::Ready);
        if outcome != PrepareOutcome::Ready {
            return Err(TxnError::Prepare {
                txn: txn.txn_id(),
                reason: format!("{outcome:?}"),
            });
        }
        Ok(outcome)
    }

    /// Commit (or roll back) the transaction at every partition it executed
    /// on, close its estimate, and answer the client.
    pub fn finish(&self, txn: &LocalTransaction, commit: bool) -> ClientResponse {
        let mut reason = txn.pending_error();
        if commit && reason.is_none() && !txn.is_predict_single_partition() {
            if let Err(e) = self.prepare(txn) {
                reason = Some(e.to_string());
            }
        }
        let committed = commit && reason.is_none();

        let mut partitions = txn.touched_partition_set();
        partitions.insert(txn.base_partition());
        if let Some(token) = txn.last_undo_token() {
            for p in partitions.iter().filter(|p| txn.is_local(**p)) {
                if committed {
                    self.engine.release_undo_token(*p, token);
                } else {
                    self.engine.undo_undo_token(*p, token);
                }
            }
        }
        if committed {
            self.last_committed
                .fetch_max(txn.txn_id().get(), Ordering::AcqRel);
        }

        let results = txn.take_last_results();
        if let (Some(estimator), Some(state)) = (&self.estimator, txn.finish()) {
            if committed {
                estimator.commit(state);
            } else {
                estimator.abort(state);
            }
        }

        emit_span(
            "txn_finish",
            &[
                ("txn", txn.txn_id().to_string()),
                ("committed", committed.to_string()),
            ],
        );
        if committed {
            ClientResponse::Committed {
                txn_id: txn.txn_id(),
                client_handle: txn.client_handle(),
                results,
            }
        } else {
            ClientResponse::Aborted {
                txn_id: txn.txn_id(),
                client_handle: txn.client_handle(),
                reason: reason.unwrap_or_else(|| "aborted by procedure".to_string()),
            }
        }
    }
}

/// One query per statement of the batch, for the estimator.
fn batch_queries(tasks: &[FragmentTaskMessage]) -> Vec<QueryTrace> {
    let mut by_index = std::collections::BTreeMap::new();
    for f in tasks.iter().flat_map(|t| t.fragments.iter()) {
        by_index.entry(f.stmt_index).or_insert_with(|| QueryTrace {
            stmt: f.stmt,
            params: f.params.clone(),
            batch: 0,
            aborted: false,
            elapsed_ns: None,
        });
    }
    by_index.into_values().collect()
}
