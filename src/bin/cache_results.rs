//! Cached results builder.
//!
//! Runs a list of queries against the passage index and stores each rendered
//! HTML response, together with the sort, filter and size options it was
//! built with, in a JSON file. The search binary (and any other caller of
//! `PassageSearchEngine::with_cache`) answers the same queries with the same
//! options from the file without embedding or scanning.
//!
//! # Examples
//!
//! ```bash
//! cache_results --data-dir data/ --queries questions.txt
//! cache_results --config engine.json --queries questions.txt --output precomputed.json --merge
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use paper_passage_search::{
    embedding::EmbeddingProvider,
    query::{PassageSearchEngine, SearchEngine, SearchQuery},
    storage::cache::CachedResults,
    EngineConfig, SearchContext, DATA_DIR_ENV,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Precompute HTML responses for a fixed list of queries
#[derive(Parser, Debug)]
#[command(
    name = "cache_results",
    version,
    about = "Precompute rendered search results for a list of queries",
    long_about = "Run every query in a text file (one per line, '#' starts a comment) and store \
                  the rendered HTML in the cached results file of the data directory.

EXAMPLES:
  Build the cache next to the data:
    cache_results --data-dir data/ --queries questions.txt

  Add to an existing cache, ranking by date:
    cache_results --data-dir data/ --queries more.txt --merge --sort-by-date"
)]
struct CacheArgs {
    /// JSON engine configuration file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Data directory (overrides the config file)
    #[arg(long, value_name = "DIR", env = DATA_DIR_ENV)]
    data_dir: Option<PathBuf>,

    /// Text file with one query per line
    #[arg(short, long, value_name = "FILE")]
    queries: PathBuf,

    /// Output file (defaults to the cached results file of the data directory)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Keep entries already present in the output file
    #[arg(long)]
    merge: bool,

    /// Rank papers by publication date instead of similarity
    #[arg(long)]
    sort_by_date: bool,

    /// Keep only papers flagged as on-topic
    #[arg(long)]
    topic_only: bool,

    /// Logging verbosity level
    #[arg(long, default_value = "info", value_name = "LEVEL")]
    log_level: String,
}

/// Initialize logging with the specified level
fn init_logging(log_level: &str) {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .init();
}

/// Read queries, skipping blank lines, comments and repeats
fn read_queries(path: &Path) -> Result<Vec<String>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("Failed to read queries from {}", path.display()))?;
    let mut queries: Vec<String> = Vec::new();
    for line in raw.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if queries.iter().any(|q| q == line) {
            debug!("Skipping repeated query '{}'", line);
            continue;
        }
        queries.push(line.to_string());
    }
    Ok(queries)
}

/// Create a progress bar for tracking cached queries
fn create_progress_bar(total: usize) -> Result<ProgressBar> {
    let pb = ProgressBar::new(total as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} queries | Failed: {msg}")
            .context("Invalid progress bar template")?
            .progress_chars("##-"),
    );
    Ok(pb)
}

/// Run every query, returning how many failed
async fn fill_cache<E: EmbeddingProvider>(
    engine: &PassageSearchEngine<E>,
    queries: &[String],
    template: &SearchQuery,
    cache: &mut CachedResults,
) -> Result<usize> {
    let progress = create_progress_bar(queries.len())?;
    progress.set_message("0");
    let mut failed = 0;

    for query in queries {
        let request = SearchQuery {
            query: query.clone(),
            ..template.clone()
        };
        match engine.search_html(&request).await {
            Ok(html) => cache.insert(query.as_str(), request.options(), html),
            Err(e) => {
                failed += 1;
                progress.set_message(failed.to_string());
                warn!("Query '{}' failed: {}", query, e);
            }
        }
        progress.inc(1);
    }

    progress.finish_with_message(failed.to_string());
    Ok(failed)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CacheArgs::parse();
    init_logging(&args.log_level);

    let start_time = Instant::now();

    let mut config = match &args.config {
        Some(path) => EngineConfig::from_json_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(data_dir) = &args.data_dir {
        config.data_dir = data_dir.clone();
    }

    let queries = read_queries(&args.queries)?;
    if queries.is_empty() {
        warn!("No queries found in {}", args.queries.display());
        return Ok(());
    }
    info!("Loaded {} queries from {}", queries.len(), args.queries.display());

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| config.path_for(&config.files.cached_results));
    let mut cache = if args.merge && output.exists() {
        CachedResults::load(&output).with_context(|| format!("Failed to load existing cache {}", output.display()))?
    } else {
        CachedResults::new()
    };

    let context = SearchContext::load(&config).context("Failed to load search data")?;
    let embedding_provider = config
        .embedding
        .build_provider(config.dimension)
        .context("Failed to create embedding provider")?;
    if embedding_provider.dimension() != context.index().dimension() {
        anyhow::bail!(
            "Dimension mismatch: the index holds {}-dimensional vectors, but model '{}' produces {}",
            context.index().dimension(),
            embedding_provider.model_name(),
            embedding_provider.dimension()
        );
    }

    // Every query is answered live
    let engine = PassageSearchEngine::new(embedding_provider, Arc::new(context))
        .with_batch_size(config.batch_size)
        .with_timeout(config.search_timeout());

    let template = SearchQuery::new(String::new())
        .neighbors(config.neighbors)
        .top_documents(config.top_documents)
        .sort_by_date(args.sort_by_date)
        .topic_only(args.topic_only);

    let failed = fill_cache(&engine, &queries, &template, &mut cache).await?;

    cache
        .save(&output)
        .with_context(|| format!("Failed to write cached results to {}", output.display()))?;

    let elapsed = start_time.elapsed();
    println!("\n╔════════════════════════════════════════╗");
    println!("║      Cache Build Completed             ║");
    println!("╠════════════════════════════════════════╣");
    println!("║ Queries:              {:>16} ║", queries.len());
    println!("║ Failed:               {:>16} ║", failed);
    println!("║ Cached entries:       {:>16} ║", cache.len());
    println!("║ Elapsed time:         {:>13.2?} ║", elapsed);
    println!("╚════════════════════════════════════════╝");
    info!("Wrote {}", output.display());

    Ok(())
}
