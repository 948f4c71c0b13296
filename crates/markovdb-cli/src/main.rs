//! markovdb CLI: train, inspect, and apply execution-path models offline.

use clap::{Parser, Subcommand};
use markovdb_core::catalog::Catalog;
use markovdb_core::config::SiteConfig;
use markovdb_core::estimator::PartitionEstimator;
use markovdb_core::id::TxnId;
use markovdb_core::mappings::ParameterMappingsSet;
use markovdb_core::params::ParamValue;
use markovdb_core::trace::TransactionTrace;
use markovdb_designer::{
    CatalogPartitionEstimator, DesignerHints, PrimaryKeyPartitioner, WorkloadStatistics,
};
use markovdb_markov::{
    is_sane, EstimatorConfig, GraphsDocument, MarkovGraphsContainer, TransactionEstimator,
};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "markovdb")]
#[command(about = "Execution-path models and partitioning for a partitioned transaction engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build execution-path graphs from a workload of transaction traces
    Train {
        /// Catalog JSON
        #[arg(short, long)]
        catalog: PathBuf,

        /// Workload JSON (array of transaction traces)
        #[arg(short, long)]
        workload: PathBuf,

        /// Parameter correlations JSON
        #[arg(short, long)]
        mappings: Option<PathBuf>,

        /// Where to write the graphs document
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Print the initial estimate for one procedure invocation
    Estimate {
        #[arg(short, long)]
        catalog: PathBuf,

        /// Graphs document written by `train`
        #[arg(short, long)]
        graphs: PathBuf,

        #[arg(short, long)]
        mappings: Option<PathBuf>,

        /// Procedure name
        #[arg(short, long)]
        procedure: String,

        /// Procedure arguments as a JSON array
        #[arg(long, default_value = "[]")]
        params: String,
    },

    /// Generate a primary-key partition plan
    Partition {
        #[arg(short, long)]
        catalog: PathBuf,

        /// Table sizes JSON (table name to total tuple bytes)
        #[arg(short, long)]
        stats: Option<PathBuf>,

        /// Designer hints JSON
        #[arg(long)]
        hints: Option<PathBuf>,

        #[arg(short, long)]
        workload: Option<PathBuf>,

        #[arg(short, long)]
        mappings: Option<PathBuf>,

        /// Write the updated catalog here instead of printing the plan
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check a graphs document's digest (and graph sanity, given a catalog)
    Validate {
        #[arg(short, long)]
        graphs: PathBuf,

        #[arg(short, long)]
        catalog: Option<PathBuf>,
    },
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    let outcome = match cli.command {
        Commands::Train {
            catalog,
            workload,
            mappings,
            output,
        } => train(&catalog, &workload, mappings.as_deref(), &output),
        Commands::Estimate {
            catalog,
            graphs,
            mappings,
            procedure,
            params,
        } => estimate(&catalog, &graphs, mappings.as_deref(), &procedure, &params),
        Commands::Partition {
            catalog,
            stats,
            hints,
            workload,
            mappings,
            output,
        } => partition(
            &catalog,
            stats.as_deref(),
            hints.as_deref(),
            workload.as_deref(),
            mappings.as_deref(),
            output.as_deref(),
        ),
        Commands::Validate { graphs, catalog } => validate(&graphs, catalog.as_deref()),
    };
    if let Err(e) = outcome {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> CliResult<T> {
    let text = fs::read_to_string(path)
        .map_err(|e| format!("reading {}: {}", path.display(), e))?;
    Ok(serde_json::from_str(&text).map_err(|e| format!("parsing {}: {}", path.display(), e))?)
}

fn read_catalog(path: &Path) -> CliResult<Catalog> {
    let catalog: Catalog = read_json(path)?;
    catalog.validate()?;
    Ok(catalog)
}

fn read_mappings(path: Option<&Path>) -> CliResult<ParameterMappingsSet> {
    match path {
        Some(p) => read_json(p),
        None => Ok(ParameterMappingsSet::new()),
    }
}

fn train(
    catalog_path: &Path,
    workload_path: &Path,
    mappings_path: Option<&Path>,
    output: &Path,
) -> CliResult<()> {
    let catalog = read_catalog(catalog_path)?;
    let traces: Vec<TransactionTrace> = read_json(workload_path)?;
    // Mappings only steer estimation; training replays the recorded paths.
    let _ = read_mappings(mappings_path)?;
    let catalog = Arc::new(catalog);
    let pest = CatalogPartitionEstimator::new(Arc::clone(&catalog));

    let graphs = MarkovGraphsContainer::new();
    let replayed = graphs.train(&catalog, &pest, &traces)?;
    graphs.save(&catalog, output)?;
    tracing::info!(traces = replayed, graphs = graphs.len(), output = %output.display(), "saved graphs");

    println!("✓ Trained {} graphs from {} traces", graphs.len(), replayed);
    Ok(())
}

fn estimate(
    catalog_path: &Path,
    graphs_path: &Path,
    mappings_path: Option<&Path>,
    procedure: &str,
    params: &str,
) -> CliResult<()> {
    let catalog = Arc::new(read_catalog(catalog_path)?);
    let mappings = Arc::new(read_mappings(mappings_path)?);
    let args: Vec<ParamValue> =
        serde_json::from_str(params).map_err(|e| format!("parsing --params: {}", e))?;
    let graphs = Arc::new(MarkovGraphsContainer::load(graphs_path, &catalog)?);
    let pest: Arc<dyn PartitionEstimator> =
        Arc::new(CatalogPartitionEstimator::new(Arc::clone(&catalog)));

    let config = EstimatorConfig::from(&SiteConfig::from_env());
    let proc_id = catalog.procedure_by_name(procedure)?.id;
    let estimator = TransactionEstimator::new(Arc::clone(&catalog), pest, mappings, graphs, config);
    let state = estimator.start_transaction(TxnId::new(1), proc_id, &args)?;

    let t = estimator.thresholds();
    let est = state.initial_estimate();
    let partitions = |set: markovdb_core::id::PartitionSet| -> Vec<u32> {
        set.into_iter().map(|p| p.get()).collect()
    };
    let report = serde_json::json!({
        "procedure": procedure,
        "base_partition": state.base_partition().get(),
        "confidence": est.confidence(),
        "single_partition": est.is_single_partition(t),
        "abortable": est.is_abortable(t),
        "touched_partitions": partitions(est.touched_partitions(t)),
        "read_only_partitions": partitions(est.read_only_partitions(t)),
        "write_partitions": partitions(est.write_partitions(t)),
        "path_length": state.initial_path().len(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn partition(
    catalog_path: &Path,
    stats_path: Option<&Path>,
    hints_path: Option<&Path>,
    workload_path: Option<&Path>,
    mappings_path: Option<&Path>,
    output: Option<&Path>,
) -> CliResult<()> {
    let mut catalog = read_catalog(catalog_path)?;
    let sizes: BTreeMap<String, u64> = match stats_path {
        Some(p) => read_json(p)?,
        None => BTreeMap::new(),
    };
    let hints: DesignerHints = match hints_path {
        Some(p) => read_json(p)?,
        None => DesignerHints::default(),
    };
    let traces: Vec<TransactionTrace> = match workload_path {
        Some(p) => read_json(p)?,
        None => Vec::new(),
    };
    let mappings = read_mappings(mappings_path)?;

    let stats = WorkloadStatistics::from_workload(&catalog, &traces, &sizes)?;
    let plan = PrimaryKeyPartitioner::new(&catalog, &stats, &mappings).generate(&hints)?;
    tracing::info!(
        tables = plan.tables.len(),
        memory = plan.memory_per_partition,
        "generated partition plan"
    );

    match output {
        Some(out) => {
            plan.apply(&mut catalog)?;
            fs::write(out, serde_json::to_string_pretty(&catalog)?)?;
            println!("✓ Wrote partitioned catalog to {}", out.display());
        }
        None => println!("{}", plan.to_json()?),
    }
    Ok(())
}

fn validate(graphs_path: &Path, catalog_path: Option<&Path>) -> CliResult<()> {
    let doc = GraphsDocument::load(graphs_path)?;
    doc.verify()?;
    println!("✓ Digest matches ({} graphs)", doc.graphs.len());

    if let Some(path) = catalog_path {
        let catalog = read_catalog(path)?;
        let mut insane = 0;
        for graph in doc.to_graphs(&catalog)? {
            if !is_sane(&graph) {
                insane += 1;
                eprintln!(
                    "graph for {} at {} has unbalanced edge probabilities",
                    graph.proc(),
                    graph.base_partition()
                );
            }
        }
        if insane > 0 {
            return Err(format!("{} graphs failed the sanity check", insane).into());
        }
        println!("✓ All graphs are sane");
    }
    Ok(())
}
