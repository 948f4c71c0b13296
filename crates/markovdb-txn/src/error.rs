use thiserror::Error;

use markovdb_core::engine::EngineError;
use markovdb_core::id::{PartitionId, TxnId};

pub type Result<T> = std::result::Result<T, TxnError>;

#[derive(Debug, Error)]
pub enum TxnError {
    #[error("fragment execution failed: {0}")]
    Engine(#[from] EngineError),

    #[error("txn {txn} aborted: {reason}")]
    Aborted { txn: TxnId, reason: String },

    #[error("unknown procedure '{0}'")]
    UnknownProcedure(String),

    #[error("partition {0} is not hosted by this site")]
    NotLocal(PartitionId),

    #[error(transparent)]
    Core(#[from] markovdb_core::Error),

    #[error("prepare failed for txn {txn}: {reason}")]
    Prepare { txn: TxnId, reason: String },
}
