use thiserror::Error;

/// Canonical result for core.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Partition estimation error: {0}")]
    Estimation(String),

    #[error("Graph error: {0}")]
    Graph(String),

    #[error("Persistence error: {0}")]
    Persist(String),

    // The core crate does not do I/O, but higher layers may map their I/O
    // errors into this variant for convenience.
    #[error("I/O-like error (mapped into core): {0}")]
    IoLike(String),

    #[error("Internal invariant failed: {0}")]
    Invariant(String),

    #[error("checksum mismatch: expected {expected}, found {found}")]
    ChecksumMismatch { expected: String, found: String },
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Persist(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::IoLike(e.to_string())
    }
}
