use anyhow::{Context, Result};
use clap::Parser;
use revindex::{Change, IndexConfig, PartitionedIndex, Predicate, SearchOptions};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "revindex")]
#[command(about = "Index code-review changes and query them", long_about = None)]
struct Args {
    /// JSON lines file with one change per line
    #[arg(long, env = "REVINDEX_ENTITIES")]
    entities: Option<PathBuf>,

    /// JSON predicate to run after loading
    #[arg(long)]
    query: Option<String>,

    /// Maximum number of results
    #[arg(long, default_value = "25")]
    limit: usize,

    /// Number of results to skip
    #[arg(long, default_value = "0")]
    start: usize,

    /// JSON index configuration
    #[arg(long, env = "REVINDEX_CONFIG")]
    config: Option<PathBuf>,

    /// Directory for the ready-state file
    #[arg(long, env = "REVINDEX_STATE_DIR")]
    state_dir: Option<PathBuf>,

    /// Print Prometheus metrics to stderr on exit
    #[arg(long)]
    metrics: bool,
}

fn main() -> Result<()> {
    // Results go to stdout, logs to stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();
    info!("Starting revindex v{}", revindex::VERSION);

    let mut config = match &args.config {
        Some(path) => IndexConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => IndexConfig::new("changes"),
    };
    if let Some(dir) = &args.state_dir {
        config = config.with_state_dir(dir);
    }

    let index: PartitionedIndex<Change> = PartitionedIndex::open(
        &config,
        Change::schema()?,
        Change::partitioner(),
        Change::default_sort(),
    )?;

    if let Some(path) = &args.entities {
        let reader = BufReader::new(
            File::open(path).with_context(|| format!("opening {}", path.display()))?,
        );
        let mut receipts = Vec::new();
        for (n, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let change: Change = serde_json::from_str(&line)
                .with_context(|| format!("{}:{}: invalid change", path.display(), n + 1))?;
            receipts.push(index.replace(&change)?);
        }
        for receipt in &receipts {
            if !receipt.wait_visible(Duration::from_secs(30))? {
                warn!("Timed out waiting for writes to become visible");
                break;
            }
        }
        info!(changes = receipts.len(), "Loaded changes");
        index.mark_ready(true)?;
    }

    if let Some(query) = &args.query {
        let predicate: Predicate =
            serde_json::from_str(query).context("parsing query predicate")?;
        let options = SearchOptions::default()
            .with_limit(args.limit)
            .with_start(args.start);
        let results = index.search_raw(&predicate, &options)?;
        for bundle in &results.hits {
            println!("{}", bundle.to_json());
        }
        info!(
            returned = results.hits.len(),
            total = results.total_hits,
            "Query complete"
        );
    }

    if args.metrics {
        eprintln!("{}", index.metrics().render());
    }
    index.close();
    Ok(())
}
