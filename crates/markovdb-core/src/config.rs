//! Site configuration that downstream crates can serialize/deserialize.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::mappings::MappingPolicy;

/// Probability cut-offs that turn an estimate into routing decisions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EstimationThresholds {
    pub single_partition: f64,
    pub read: f64,
    pub write: f64,
    pub done: f64,
    pub abort: f64,
}

impl Default for EstimationThresholds {
    fn default() -> Self {
        Self {
            single_partition: 0.9,
            read: 0.9,
            write: 0.5,
            done: 0.9,
            abort: 0.0001,
        }
    }
}

impl EstimationThresholds {
    /// Same cut-off for every predicate.
    pub fn uniform(t: f64) -> Self {
        Self {
            single_partition: t,
            read: t,
            write: t,
            done: t,
            abort: t,
        }
    }

    fn check(&self) -> Result<()> {
        for (name, v) in [
            ("single_partition", self.single_partition),
            ("read", self.read),
            ("write", self.write),
            ("done", self.done),
            ("abort", self.abort),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(Error::Config(format!("threshold {name}={v} outside [0, 1]")));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Partitions hosted by this site. Empty means every catalog partition.
    pub local_partitions: Vec<u32>,

    /// Route transactions with execution-path estimates. When off, the
    /// catalog's single-partition flags decide.
    pub markov_enable: bool,

    /// Graphs document loaded at startup.
    pub markov_path: Option<String>,

    /// Fall back to every outgoing edge when no correlation matches.
    pub force_traversal: bool,

    /// START hits required before a graph's abort estimate is trusted.
    pub min_hits_for_abort: u64,

    /// Allowed drift between a vertex's instance-window and cumulative hit rates.
    pub recompute_tolerance: f64,

    /// Share of stale vertices that triggers a recompute.
    pub recompute_vertex_proportion: f64,

    /// Transactions folded into the instance window before staleness is checked.
    pub recompute_min_txns: u64,

    pub mapping_policy: MappingPolicy,

    /// Idle objects each pool keeps for reuse.
    pub pool_idle: usize,

    pub thresholds: EstimationThresholds,

    /// Upper bound on a dependency wait. `None` waits until released.
    pub latch_timeout_ms: Option<u64>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            local_partitions: Vec::new(),
            markov_enable: true,
            markov_path: None,
            force_traversal: false,
            min_hits_for_abort: 20,
            recompute_tolerance: 0.05,
            recompute_vertex_proportion: 0.5,
            recompute_min_txns: 10,
            mapping_policy: MappingPolicy::FirstFound,
            pool_idle: 64,
            thresholds: EstimationThresholds::default(),
            latch_timeout_ms: None,
        }
    }
}

impl SiteConfig {
    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `MARKOVDB_LOCAL_PARTITIONS`: comma-separated partition ids
    /// - `MARKOVDB_MARKOV_ENABLE`: `true`/`false`
    /// - `MARKOVDB_MARKOV_PATH`: graphs document to load
    /// - `MARKOVDB_FORCE_TRAVERSAL`: `true`/`false`
    /// - `MARKOVDB_MIN_HITS_FOR_ABORT`: START hits before abort estimates are trusted
    /// - `MARKOVDB_RECOMPUTE_TOLERANCE`: staleness tolerance
    /// - `MARKOVDB_RECOMPUTE_MIN_TXNS`: instance window size
    /// - `MARKOVDB_POOL_IDLE`: idle objects per pool
    /// - `MARKOVDB_LATCH_TIMEOUT_MS`: dependency wait bound
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(s) = std::env::var("MARKOVDB_LOCAL_PARTITIONS") {
            let parsed: std::result::Result<Vec<u32>, _> = s
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::parse)
                .collect();
            if let Ok(v) = parsed {
                cfg.local_partitions = v;
            }
        }

        if let Ok(s) = std::env::var("MARKOVDB_MARKOV_ENABLE") {
            if let Ok(v) = s.parse::<bool>() {
                cfg.markov_enable = v;
            }
        }

        if let Ok(s) = std::env::var("MARKOVDB_MARKOV_PATH") {
            cfg.markov_path = Some(s);
        }

        if let Ok(s) = std::env::var("MARKOVDB_FORCE_TRAVERSAL") {
            if let Ok(v) = s.parse::<bool>() {
                cfg.force_traversal = v;
            }
        }

        if let Ok(s) = std::env::var("MARKOVDB_MIN_HITS_FOR_ABORT") {
            if let Ok(v) = s.parse::<u64>() {
                cfg.min_hits_for_abort = v;
            }
        }

        if let Ok(s) = std::env::var("MARKOVDB_RECOMPUTE_TOLERANCE") {
            if let Ok(v) = s.parse::<f64>() {
                cfg.recompute_tolerance = v;
            }
        }

        if let Ok(s) = std::env::var("MARKOVDB_RECOMPUTE_MIN_TXNS") {
            if let Ok(v) = s.parse::<u64>() {
                cfg.recompute_min_txns = v;
            }
        }

        if let Ok(s) = std::env::var("MARKOVDB_POOL_IDLE") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.pool_idle = v;
            }
        }

        if let Ok(s) = std::env::var("MARKOVDB_LATCH_TIMEOUT_MS") {
            if let Ok(v) = s.parse::<u64>() {
                cfg.latch_timeout_ms = Some(v);
            }
        }

        cfg
    }

    pub fn validate(&self) -> Result<()> {
        self.thresholds.check()?;
        if !(self.recompute_vertex_proportion > 0.0 && self.recompute_vertex_proportion <= 1.0) {
            return Err(Error::Config(format!(
                "recompute_vertex_proportion={} outside (0, 1]",
                self.recompute_vertex_proportion
            )));
        }
        if self.recompute_tolerance < 0.0 {
            return Err(Error::Config("recompute_tolerance must be non-negative".into()));
        }
        Ok(())
    }
}
