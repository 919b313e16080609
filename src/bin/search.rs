//! Search binary entry point.
//!
//! This binary loads a prepared data directory (sentence index, paper
//! metadata, section text and entity links) and answers passage queries
//! against it. It supports both single-query and interactive REPL modes,
//! with table, JSON or highlighted HTML output.
//!
//! # Examples
//!
//! Single query with default settings:
//! ```bash
//! search --data-dir data/ --query "incubation period"
//! ```
//!
//! Newest on-topic papers, rendered as HTML:
//! ```bash
//! search --data-dir data/ --query "ACE2 expression" --sort-by-date --topic-only --format html
//! ```
//!
//! Interactive mode:
//! ```bash
//! search --config engine.json --interactive
//! ```

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use comfy_table::{presets::UTF8_FULL, Attribute, Cell, Color, ContentArrangement, Table};
use paper_passage_search::{
    embedding::EmbeddingProvider,
    models::AggregatedResult,
    query::{PassageSearchEngine, SearchEngine, SearchQuery},
    render::format_authors,
    storage::cache::CachedResults,
    EngineConfig, SearchContext, DATA_DIR_ENV,
};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Output format for search results
#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-friendly table
    Table,
    /// Machine-readable JSON format
    Json,
    /// Rendered HTML fragment with highlighted passages
    Html,
}

/// Search binary CLI for querying the passage index
#[derive(Parser, Debug)]
#[command(
    name = "search",
    version,
    about = "Search paper passages using sentence-level semantic similarity",
    long_about = "Query the sentence index of a paper corpus. Matching sentences are grouped \
                  by paper, ranked, and shown as a table, JSON, or highlighted HTML.

EXAMPLES:
  Single query:
    search --data-dir data/ --query \"incubation period\"

  Newest on-topic papers as HTML:
    search --data-dir data/ --query \"ACE2 expression\" --sort-by-date --topic-only --format html

  Interactive mode:
    search --config engine.json --interactive

  Wider candidate pool, fewer papers:
    search --data-dir data/ --query \"viral shedding\" --neighbors 500 --top-docs 5"
)]
struct Args {
    /// JSON engine configuration file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Data directory (overrides the config file)
    #[arg(long, value_name = "DIR", env = DATA_DIR_ENV)]
    data_dir: Option<PathBuf>,

    /// Search query (required for single-query mode, omitted in interactive mode)
    #[arg(long, value_name = "TEXT", conflicts_with = "interactive")]
    query: Option<String>,

    /// Nearest sentences to retrieve per query
    #[arg(long, value_name = "K")]
    neighbors: Option<usize>,

    /// Maximum number of papers to return
    #[arg(long, value_name = "N")]
    top_docs: Option<usize>,

    /// Rank papers by publication date instead of similarity
    #[arg(long)]
    sort_by_date: bool,

    /// Keep only papers flagged as on-topic
    #[arg(long)]
    topic_only: bool,

    /// Output format
    #[arg(long, value_enum, default_value = "table")]
    format: OutputFormat,

    /// Answer HTML queries from the cached results file when it exists
    #[arg(long)]
    use_cache: bool,

    /// Enable interactive REPL mode
    #[arg(long, short = 'i')]
    interactive: bool,

    /// Logging verbosity level
    #[arg(long, default_value = "warn", value_name = "LEVEL")]
    log_level: String,
}

/// Setup logging with the specified level
fn setup_logging(log_level: &str) {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .init();
}

/// Load the config file (or defaults) and apply command-line overrides
fn load_config(args: &Args) -> Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::from_json_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => EngineConfig::default(),
    };

    if let Some(data_dir) = &args.data_dir {
        config.data_dir = data_dir.clone();
    }
    if let Some(neighbors) = args.neighbors {
        config.neighbors = neighbors;
    }
    if let Some(top_docs) = args.top_docs {
        config.top_documents = top_docs;
    }
    config.use_cached_results |= args.use_cache;

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Load the cached results file if caching is enabled and the file exists
fn load_cache(config: &EngineConfig) -> Result<Option<CachedResults>> {
    if !config.use_cached_results {
        return Ok(None);
    }
    let path = config.path_for(&config.files.cached_results);
    if !path.exists() {
        warn!("Cached results file {} not found, answering every query live", path.display());
        return Ok(None);
    }
    let cache = CachedResults::load(&path)
        .with_context(|| format!("Failed to load cached results from {}", path.display()))?;
    Ok(Some(cache))
}

/// Execute a search query and return results
async fn execute_search<E: EmbeddingProvider>(
    engine: &PassageSearchEngine<E>,
    query: &SearchQuery,
) -> Result<Vec<AggregatedResult>> {
    debug!("Executing search for query: {}", query.query);
    engine
        .search(query)
        .await
        .with_context(|| format!("Failed to execute search for query: '{}'", query.query))
}

/// Truncate to at most `max` characters, marking the cut with "..."
fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        let kept: String = text.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", kept)
    } else {
        text.to_string()
    }
}

/// Format results as a pretty table
fn format_results_table(results: &[AggregatedResult]) -> String {
    if results.is_empty() {
        return "No results found.".to_string();
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("Rank").add_attribute(Attribute::Bold),
        Cell::new("Title").add_attribute(Attribute::Bold),
        Cell::new("Venue").add_attribute(Attribute::Bold),
        Cell::new("Published").add_attribute(Attribute::Bold),
        Cell::new("Sentences").add_attribute(Attribute::Bold),
        Cell::new("Score").add_attribute(Attribute::Bold),
    ]);

    for (idx, result) in results.iter().enumerate() {
        // On-topic papers stand out
        let title_color = if result.paper.topic_flag { Color::Green } else { Color::White };

        table.add_row(vec![
            Cell::new(format!("{}", idx + 1)),
            Cell::new(truncate(&result.paper.title, 60)).fg(title_color),
            Cell::new(truncate(&result.paper.venue, 30)),
            Cell::new(result.paper.publish_date),
            Cell::new(result.hits.len()),
            Cell::new(format!("{:.4}", result.score)),
        ]);
    }

    table.to_string()
}

/// Format results as JSON
fn format_results_json(results: &[AggregatedResult]) -> Result<String> {
    serde_json::to_string_pretty(results).with_context(|| "Failed to serialize results to JSON")
}

/// Display detailed view of a single result
fn display_result_detail(result: &AggregatedResult, rank: usize) {
    println!("\n{}", "═".repeat(80));
    println!("Rank: {}", rank);
    println!("Title: {}", result.paper.title);
    println!("Authors: {}", format_authors(&result.paper.authors));
    println!("Venue: {}", result.paper.venue);
    println!("Published: {} ({})", result.paper.publish_time, result.paper.publish_date);
    println!("Link: {}", result.paper.doi_link());
    println!("On topic: {}", if result.paper.topic_flag { "yes" } else { "no" });
    println!("Score: {:.4}", result.score);
    for (section_id, hits) in result.sections() {
        println!("\nSection {}:", section_id);
        for hit in hits {
            println!("  [{:.4}] {}", hit.similarity, hit.sentence_text);
        }
    }
    println!("{}", "═".repeat(80));
}

/// Run one query and print it in the requested format
async fn run_query<E: EmbeddingProvider>(
    engine: &PassageSearchEngine<E>,
    query: &SearchQuery,
    format: OutputFormat,
) -> Result<Vec<AggregatedResult>> {
    let start = Instant::now();

    if let OutputFormat::Html = format {
        let rendered = engine
            .search_rendered(query)
            .await
            .with_context(|| format!("Failed to render results for query: '{}'", query.query))?;
        println!("{}", rendered.html);
        if rendered.from_cache {
            info!("Served '{}' from cached results; /detail needs a live search", query.query);
        }
        return Ok(rendered.results);
    }

    let results = execute_search(engine, query).await?;
    let elapsed = start.elapsed();

    match format {
        OutputFormat::Table => {
            println!("{}", format_results_table(&results));
            println!("\nFound {} papers in {:.2}s", results.len(), elapsed.as_secs_f64());
        }
        OutputFormat::Json => println!("{}", format_results_json(&results)?),
        OutputFormat::Html => {}
    }

    Ok(results)
}

fn print_help() {
    println!("Commands:");
    println!("  <query>           - Search for passages");
    println!("  /k N              - Retrieve N nearest sentences per query");
    println!("  /top N            - Show at most N papers");
    println!("  /sort date|score  - Rank by publication date or similarity");
    println!("  /topic on|off     - Keep only on-topic papers");
    println!("  /format table     - Use table output format");
    println!("  /format json      - Use JSON output format");
    println!("  /format html      - Print highlighted HTML");
    println!("  /detail N         - Show matched sentences for result rank N");
    println!("  /help             - Show this help");
    println!("  Ctrl+D or Ctrl+C  - Exit");
}

/// Parse a positive integer command argument
fn parse_positive(parts: &[&str], usage: &str) -> Option<usize> {
    if parts.len() != 2 {
        eprintln!("Usage: {}", usage);
        return None;
    }
    match parts[1].parse::<usize>() {
        Ok(n) if n > 0 => Some(n),
        _ => {
            eprintln!("Invalid number: must be a positive integer");
            None
        }
    }
}

/// Run interactive REPL mode
async fn run_interactive<E: EmbeddingProvider>(
    engine: PassageSearchEngine<E>,
    mut settings: SearchQuery,
    mut format: OutputFormat,
) -> Result<()> {
    println!("Interactive Passage Search");
    print_help();
    println!();

    let mut rl = DefaultEditor::new().with_context(|| "Failed to create readline editor")?;
    let mut last_results: Vec<AggregatedResult> = Vec::new();

    loop {
        match rl.readline("Search> ") {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                rl.add_history_entry(line).ok();

                if line.starts_with('/') {
                    let parts: Vec<&str> = line.split_whitespace().collect();
                    match parts[0] {
                        "/help" => print_help(),
                        "/k" => {
                            if let Some(n) = parse_positive(&parts, "/k N") {
                                settings.neighbors = n;
                                println!("Set neighbors to {}", n);
                            }
                        }
                        "/top" => {
                            if let Some(n) = parse_positive(&parts, "/top N") {
                                settings.top_documents = n;
                                println!("Set top papers to {}", n);
                            }
                        }
                        "/sort" => match parts.get(1).copied() {
                            Some("date") => {
                                settings.sort_by_date = true;
                                println!("Ranking by publication date");
                            }
                            Some("score") => {
                                settings.sort_by_date = false;
                                println!("Ranking by similarity");
                            }
                            _ => eprintln!("Usage: /sort date|score"),
                        },
                        "/topic" => match parts.get(1).copied() {
                            Some("on") => {
                                settings.topic_only = true;
                                println!("Showing on-topic papers only");
                            }
                            Some("off") => {
                                settings.topic_only = false;
                                println!("Showing all papers");
                            }
                            _ => eprintln!("Usage: /topic on|off"),
                        },
                        "/format" => match parts.get(1).copied() {
                            Some("table") => {
                                format = OutputFormat::Table;
                                println!("Set output format to table");
                            }
                            Some("json") => {
                                format = OutputFormat::Json;
                                println!("Set output format to JSON");
                            }
                            Some("html") => {
                                format = OutputFormat::Html;
                                println!("Set output format to HTML");
                            }
                            _ => eprintln!("Usage: /format [table|json|html]"),
                        },
                        "/detail" => {
                            if parts.len() != 2 {
                                eprintln!("Usage: /detail N");
                                continue;
                            }
                            match parts[1].parse::<usize>() {
                                Ok(rank) if rank > 0 && rank <= last_results.len() => {
                                    display_result_detail(&last_results[rank - 1], rank);
                                }
                                Ok(rank) if rank > last_results.len() => {
                                    eprintln!(
                                        "Rank {} out of range (last search had {} results)",
                                        rank,
                                        last_results.len()
                                    );
                                }
                                _ => eprintln!("Invalid rank: must be a positive integer"),
                            }
                        }
                        _ => eprintln!("Unknown command: {}. Type /help for available commands.", parts[0]),
                    }
                } else {
                    let query = SearchQuery {
                        query: line.to_string(),
                        ..settings.clone()
                    };
                    match run_query(&engine, &query, format).await {
                        Ok(results) => last_results = results,
                        Err(e) => eprintln!("Search failed: {:#}", e),
                    }
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                error!("Error reading input: {}", err);
                break;
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    setup_logging(&args.log_level);

    if !args.interactive && args.query.is_none() {
        anyhow::bail!(
            "Either --query or --interactive must be specified.\n\
             Use --help for usage information."
        );
    }

    let config = load_config(&args)?;
    if !config.data_dir.is_dir() {
        anyhow::bail!(
            "Data directory not found: {}\n\
             Pass --data-dir or set {}.",
            config.data_dir.display(),
            DATA_DIR_ENV
        );
    }

    info!("Loading search data from: {}", config.data_dir.display());
    let context = SearchContext::load(&config).context("Failed to load search data")?;

    let embedding_provider = config
        .embedding
        .build_provider(config.dimension)
        .context("Failed to create embedding provider")?;
    if embedding_provider.dimension() != context.index().dimension() {
        anyhow::bail!(
            "Dimension mismatch: the index holds {}-dimensional vectors, but model '{}' produces {}.\n\
             Set \"dimension\" in the config to match the model the index was built with.",
            context.index().dimension(),
            embedding_provider.model_name(),
            embedding_provider.dimension()
        );
    }
    info!(
        "Embedding provider initialized: {} ({} dimensions)",
        embedding_provider.model_name(),
        embedding_provider.dimension()
    );

    let mut engine = PassageSearchEngine::new(embedding_provider, Arc::new(context))
        .with_batch_size(config.batch_size)
        .with_timeout(config.search_timeout());
    if let Some(cache) = load_cache(&config)? {
        engine = engine.with_cache(cache);
    }

    let settings = SearchQuery::new(String::new())
        .neighbors(config.neighbors)
        .top_documents(config.top_documents)
        .sort_by_date(args.sort_by_date)
        .topic_only(args.topic_only);

    match args.query {
        Some(query) if !args.interactive => {
            let query = SearchQuery { query, ..settings };
            run_query(&engine, &query, args.format).await?;
        }
        _ => run_interactive(engine, settings, args.format).await?,
    }

    Ok(())
}
