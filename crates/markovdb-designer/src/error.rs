use thiserror::Error;

pub type Result<T> = std::result::Result<T, DesignError>;

#[derive(Debug, Error)]
pub enum DesignError {
    #[error("catalog: {0}")]
    Catalog(String),

    #[error("missing or invalid statistics: {0}")]
    Stats(String),

    #[error(transparent)]
    Core(#[from] markovdb_core::Error),
}
