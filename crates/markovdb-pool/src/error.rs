use thiserror::Error;

/// Result type local to markovdb-pool.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("pool '{pool}' exhausted: {active} objects active, limit {limit}")]
    Exhausted {
        pool: &'static str,
        active: usize,
        limit: usize,
    },
}
