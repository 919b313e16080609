//! Paper Passage Search - semantic sentence search over a scientific paper corpus.
//!
//! Every sentence of every paper is embedded ahead of time into a
//! [`VectorIndex`]. A query is embedded the same way, scored against all
//! sentences by cosine similarity, and the nearest sentences are folded into
//! per-paper results that render as HTML with the matched sentences and any
//! linked biomedical entities highlighted in context.
//!
//! # Architecture
//!
//! - **models**: Core data structures (sentence records, hits, metadata, spans)
//! - **index**: The in-memory sentence index and its on-disk format
//! - **embedding**: Query preprocessing and embedding providers
//! - **storage**: Metadata table, section text, entity links, cached responses
//! - **aggregate**: Folding sentence hits into ranked per-document results
//! - **render**: Span highlighting and per-document HTML
//! - **config**: Engine configuration
//! - **context**: The read-only state shared by all queries
//! - **query**: The end-to-end search engine
//!
//! # Workflow
//!
//! 1. Load the index, metadata, section text and entity links once
//! 2. Preprocess and embed the query text
//! 3. Find the K most similar sentences
//! 4. Group them by paper, rank, filter and truncate
//! 5. Render each paper's matched sections with highlights
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use paper_passage_search::{EngineConfig, PassageSearchEngine, SearchContext, SearchEngine, SearchQuery};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = EngineConfig::from_json_file("engine.json".as_ref())?;
//!     let context = Arc::new(SearchContext::load(&config)?);
//!     let provider = config.embedding.build_provider(config.dimension)?;
//!     let engine = PassageSearchEngine::new(provider, context);
//!
//!     let results = engine.search(&SearchQuery::new("viral shedding duration")).await?;
//!     for result in results {
//!         println!("{:.3} {}", result.score, result.paper.title);
//!     }
//!     Ok(())
//! }
//! ```

pub mod aggregate;
pub mod config;
pub mod context;
pub mod embedding;
pub mod index;
pub mod models;
pub mod query;
pub mod render;
pub mod storage;

pub use aggregate::{aggregate, AggregateOptions};
pub use config::EngineConfig;
pub use context::SearchContext;
pub use embedding::{preprocess_sentence, EmbeddingProvider};
pub use index::VectorIndex;
pub use models::{
    AggregatedResult, EntitySpan, MatchSpan, NeighborHit, PaperMetadata, QueryOptions, SentenceRecord, SortMode,
};
pub use query::{PassageSearchEngine, SearchEngine, SearchQuery};
pub use render::{highlight, ColorTable, ResultRenderer};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default number of query rows scored per similarity batch
pub use query::knn::DEFAULT_BATCH_SIZE;

/// Default number of nearest sentences retrieved per query (K)
pub const DEFAULT_NEIGHBORS: usize = 100;

/// Default number of documents returned per query
pub const DEFAULT_TOP_DOCUMENTS: usize = 20;

/// Default deadline for the similarity scan, in seconds
pub const DEFAULT_SEARCH_TIMEOUT_SECS: u64 = 30;

/// Environment variable naming the data directory
pub const DATA_DIR_ENV: &str = "PAPER_SEARCH_DATA_DIR";
