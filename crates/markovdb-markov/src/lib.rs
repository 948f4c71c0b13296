#![forbid(unsafe_code)]
//! markovdb-markov: execution-path graphs and transaction estimation.
//!
//! A [`MarkovGraph`] per (procedure, base partition) records which statement
//! invocations followed which in past transactions. Probabilities are derived
//! backwards from COMMIT/ABORT. [`MarkovPathEstimator`] walks a graph forward
//! for a new invocation, and [`TransactionEstimator`] ties the walk, pooled
//! estimates, and online graph updates together per transaction.

pub mod container;
pub mod estimate;
pub mod estimator;
pub mod graph;
pub mod path;
pub mod persist;
pub mod probabilities;
pub mod verify;
pub mod vertex;
pub mod walker;

pub use container::{MarkovGraphsContainer, SharedGraph};
pub use estimate::{Estimate, EstimateBatch};
pub use estimator::{EstimatorConfig, EstimatorState, TransactionEstimator};
pub use graph::{MarkovGraph, QueryStep};
pub use path::{MarkovPathEstimator, PathContext};
pub use persist::{EdgeRecord, GraphDocument, GraphsDocument, VertexRecord};
pub use probabilities::{PartitionField, ProbabilityTable};
pub use verify::{assert_sane, is_sane, SanityViolation, PROBABILITY_EPSILON};
pub use vertex::{Edge, EdgeId, Vertex, VertexId, VertexKind};
pub use walker::ReverseOrder;
