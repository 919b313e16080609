//! Query processing and ranking module.
//!
//! This module turns a natural-language query into ranked, rendered passages.
//! It coordinates the embedding provider, the similarity search over the
//! sentence index, per-document aggregation and HTML rendering.
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use paper_passage_search::{EngineConfig, SearchContext};
//! use paper_passage_search::query::{PassageSearchEngine, SearchEngine, SearchQuery};
//!
//! let config = EngineConfig::default();
//! let context = Arc::new(SearchContext::load(&config)?);
//! let provider = config.embedding.build_provider(config.dimension)?;
//! let engine = PassageSearchEngine::new(provider, context);
//!
//! let query = SearchQuery::new("incubation period of the virus").sort_by_date(true);
//! let html = engine.search_html(&query).await?;
//! ```
//!
//! Query text is preprocessed (separators padded, stop-words dropped) before
//! it is embedded.

pub mod knn;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::aggregate::{aggregate, AggregateOptions};
use crate::context::SearchContext;
use crate::embedding::{preprocess_sentence, EmbeddingError, EmbeddingProvider};
use crate::index::{normalize_in_place, IndexError};
use crate::models::{AggregatedResult, QueryOptions, SortMode};
use crate::render::RenderError;
use crate::storage::cache::CachedResults;
use knn::SimilaritySearch;

/// Errors that can occur during query processing.
#[derive(Debug, Error)]
pub enum QueryError {
    /// Embedding generation failed
    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    /// Similarity search failed (e.g. dimension mismatch)
    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    /// Rendering failed (e.g. unknown entity type)
    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    /// The similarity scan did not finish in time
    #[error("Similarity search exceeded its deadline of {0:?}")]
    DeadlineExceeded(Duration),

    /// Invalid query parameters
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// The blocking search task panicked or was cancelled
    #[error("Search worker failed: {0}")]
    Worker(String),
}

/// Result type for query operations.
pub type QueryResult<T> = Result<T, QueryError>;

/// Search query parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    /// The search query text (will be preprocessed and embedded)
    pub query: String,

    /// Rank documents by publication date instead of similarity
    pub sort_by_date: bool,

    /// Keep only on-topic papers
    pub topic_only: bool,

    /// Nearest sentences to retrieve (K)
    pub neighbors: usize,

    /// Maximum number of documents to return
    pub top_documents: usize,
}

impl SearchQuery {
    /// Create a query with default K and document count.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            sort_by_date: false,
            topic_only: false,
            neighbors: crate::DEFAULT_NEIGHBORS,
            top_documents: crate::DEFAULT_TOP_DOCUMENTS,
        }
    }

    /// Set the date ordering switch.
    pub fn sort_by_date(mut self, sort_by_date: bool) -> Self {
        self.sort_by_date = sort_by_date;
        self
    }

    /// Set the on-topic filter.
    pub fn topic_only(mut self, topic_only: bool) -> Self {
        self.topic_only = topic_only;
        self
    }

    /// Set K.
    pub fn neighbors(mut self, neighbors: usize) -> Self {
        self.neighbors = neighbors;
        self
    }

    /// Set the maximum number of documents.
    pub fn top_documents(mut self, top_documents: usize) -> Self {
        self.top_documents = top_documents;
        self
    }

    /// Everything but the query text.
    pub fn options(&self) -> QueryOptions {
        QueryOptions {
            sort_by_date: self.sort_by_date,
            topic_only: self.topic_only,
            neighbors: self.neighbors,
            top_documents: self.top_documents,
        }
    }

    /// Aggregation settings for this query.
    pub fn aggregate_options(&self) -> AggregateOptions {
        AggregateOptions {
            topic_only: self.topic_only,
            sort_mode: SortMode::from_sort_by_date(self.sort_by_date),
            top_n: self.top_documents,
        }
    }
}

/// An HTML response together with the results it was rendered from.
#[derive(Debug, Clone)]
pub struct RenderedSearch {
    /// Rendered fragment
    pub html: String,

    /// Ranked results behind `html`; empty when served from the cache
    pub results: Vec<AggregatedResult>,

    /// Whether `html` came from precomputed responses
    pub from_cache: bool,
}

/// Trait for search engines.
#[async_trait]
pub trait SearchEngine: Send + Sync {
    /// Execute a query and return ranked per-document results.
    ///
    /// # Errors
    /// Returns `QueryError` if embedding, search or validation fails
    async fn search(&self, query: &SearchQuery) -> QueryResult<Vec<AggregatedResult>>;

    /// Execute a query and return the rendered HTML fragment.
    ///
    /// # Errors
    /// Returns `QueryError` if the search or rendering fails
    async fn search_html(&self, query: &SearchQuery) -> QueryResult<String>;
}

/// Brute-force passage search over a shared [`SearchContext`].
///
/// The similarity scan runs on tokio's blocking pool under a deadline; a
/// scan that outlives the deadline fails the query but is left to finish in
/// the background.
pub struct PassageSearchEngine<E>
where
    E: EmbeddingProvider,
{
    /// Embedding provider for query embedding
    embedding_provider: E,

    /// Shared read-only state
    context: Arc<SearchContext>,

    /// Batched similarity search settings
    similarity: SimilaritySearch,

    /// Deadline for the similarity scan
    timeout: Duration,

    /// Precomputed responses, checked before running a live search
    cache: Option<CachedResults>,
}

impl<E> PassageSearchEngine<E>
where
    E: EmbeddingProvider,
{
    /// Create an engine with default batch size and deadline.
    pub fn new(embedding_provider: E, context: Arc<SearchContext>) -> Self {
        Self {
            embedding_provider,
            context,
            similarity: SimilaritySearch::default(),
            timeout: Duration::from_secs(crate::DEFAULT_SEARCH_TIMEOUT_SECS),
            cache: None,
        }
    }

    /// Set the number of query rows scored per batch.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.similarity = SimilaritySearch::new(batch_size);
        self
    }

    /// Set the similarity scan deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Answer queries from precomputed responses built with the same options.
    pub fn with_cache(mut self, cache: CachedResults) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Shared search state.
    pub fn context(&self) -> &Arc<SearchContext> {
        &self.context
    }

    /// The embedding provider.
    pub fn embedding_provider(&self) -> &E {
        &self.embedding_provider
    }

    /// Precomputed fragment for this query text and options, if any.
    pub fn cached_html(&self, query: &SearchQuery) -> Option<&str> {
        self.cache.as_ref()?.get(&query.query, &query.options())
    }

    /// Render a query, keeping the ranked results of a live search.
    ///
    /// # Errors
    /// Returns `QueryError` if the search or rendering fails
    pub async fn search_rendered(&self, query: &SearchQuery) -> QueryResult<RenderedSearch> {
        if let Some(html) = self.cached_html(query) {
            debug!("Serving cached results for '{}'", query.query);
            return Ok(RenderedSearch {
                html: html.to_string(),
                results: Vec::new(),
                from_cache: true,
            });
        }

        let results = self.search(query).await?;
        let html = self.context.renderer().render_results(&results)?;
        Ok(RenderedSearch {
            html,
            results,
            from_cache: false,
        })
    }
}

#[async_trait]
impl<E> SearchEngine for PassageSearchEngine<E>
where
    E: EmbeddingProvider,
{
    async fn search(&self, query: &SearchQuery) -> QueryResult<Vec<AggregatedResult>> {
        let started = Instant::now();

        // 1. Preprocess and embed the query text
        let text = preprocess_sentence(&query.query);
        if text.is_empty() {
            return Err(QueryError::InvalidQuery(format!(
                "'{}' has no searchable terms",
                query.query
            )));
        }
        debug!("Embedding preprocessed query '{}'", text);
        let mut vector = self.embedding_provider.embed(&text).await?;
        normalize_in_place(&mut vector);
        self.context.index().check_query(&vector)?;

        // 2. Scan the index on the blocking pool, under the deadline
        let context = Arc::clone(&self.context);
        let similarity = self.similarity;
        let k = query.neighbors;
        let task = tokio::task::spawn_blocking(move || similarity.search(context.index(), &[vector], k));
        let hits = match tokio::time::timeout(self.timeout, task).await {
            Err(_) => return Err(QueryError::DeadlineExceeded(self.timeout)),
            Ok(Err(join_error)) => return Err(QueryError::Worker(join_error.to_string())),
            Ok(Ok(result)) => result?.into_iter().next().unwrap_or_default(),
        };
        debug!("Found {} nearest sentences", hits.len());

        // 3. Fold hits into ranked documents
        let results = aggregate(hits, self.context.metadata(), &query.aggregate_options());
        info!(
            "Query '{}' returned {} documents in {:.3}s",
            query.query,
            results.len(),
            started.elapsed().as_secs_f64()
        );
        Ok(results)
    }

    async fn search_html(&self, query: &SearchQuery) -> QueryResult<String> {
        Ok(self.search_rendered(query).await?.html)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::NaiveDate;

    use super::*;
    use crate::index::VectorIndex;
    use crate::models::{EntitySpan, PaperMetadata, SentenceRecord};
    use crate::render::ColorTable;
    use crate::storage::metadata::MetadataTable;
    use crate::storage::{EntityLinks, SectionCorpus};

    // Mock EmbeddingProvider returning fixed vectors per preprocessed text
    struct MockEmbeddingProvider {
        vectors: HashMap<String, Vec<f32>>,
        fallback: Vec<f32>,
        should_fail: bool,
    }

    impl MockEmbeddingProvider {
        fn new(fallback: Vec<f32>) -> Self {
            Self {
                vectors: HashMap::new(),
                fallback,
                should_fail: false,
            }
        }

        fn with_vector(mut self, text: &str, vector: Vec<f32>) -> Self {
            self.vectors.insert(text.to_string(), vector);
            self
        }

        fn with_failure() -> Self {
            Self {
                should_fail: true,
                ..Self::new(vec![1.0, 0.0])
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for MockEmbeddingProvider {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            if self.should_fail {
                return Err(EmbeddingError::ApiError("Mock embedding failure".to_string()));
            }
            Ok(self.vectors.get(text).cloned().unwrap_or_else(|| self.fallback.clone()))
        }

        async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            let mut results = Vec::new();
            for text in texts {
                results.push(self.embed(text).await?);
            }
            Ok(results)
        }

        fn dimension(&self) -> usize {
            self.fallback.len()
        }

        fn model_name(&self) -> &str {
            "mock-model"
        }
    }

    const SENTENCES: [&str; 3] = [
        "Spike proteins bind the ACE2 receptor tightly.",
        "Face masks lower household transmission rates.",
        "Spike binding affinity predicts ACE2 usage well.",
    ];

    fn paper(id: &str, title: &str, year: i32, topic: bool) -> PaperMetadata {
        PaperMetadata {
            id: id.to_string(),
            title: title.to_string(),
            authors: "['Li, Q.', 'Guan, X.']".to_string(),
            venue: "Journal".to_string(),
            publish_time: year.to_string(),
            publish_date: NaiveDate::from_ymd_opt(year, 1, 1).unwrap(),
            doi: format!("10.1/{}", id),
            topic_flag: topic,
        }
    }

    fn context(first_title: &str) -> Arc<SearchContext> {
        let index = VectorIndex::from_rows(
            vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![0.7, 0.7]],
            SENTENCES
                .iter()
                .enumerate()
                .map(|(i, s)| SentenceRecord::new(format!("d{}.json", i), 0, 0, *s))
                .collect(),
        )
        .unwrap();

        let metadata: MetadataTable = [
            paper("d0", first_title, 2019, true),
            paper("d1", "Household transmission of respiratory viruses", 2020, false),
            paper("d2", "Receptor usage across coronaviruses", 2021, false),
        ]
        .into_iter()
        .collect();

        let mut corpus = SectionCorpus::new();
        for (i, sentence) in SENTENCES.iter().enumerate() {
            corpus.insert(format!("d{}", i), 0, format!("Preamble text. {}", sentence));
        }

        let mut links = EntityLinks::new();
        links.insert("d0", 0, EntitySpan::new(39, 43, "gene", "https://ace2"));

        Arc::new(SearchContext::new(
            index,
            metadata,
            Arc::new(corpus),
            Arc::new(links),
            ColorTable::default(),
        ))
    }

    fn engine(provider: MockEmbeddingProvider, first_title: &str) -> PassageSearchEngine<MockEmbeddingProvider> {
        PassageSearchEngine::new(provider, context(first_title)).with_timeout(Duration::from_secs(10))
    }

    #[tokio::test]
    async fn test_three_sentence_scenario() {
        let engine = engine(MockEmbeddingProvider::new(vec![2.0, 0.0]), "Spike protein structure");
        let results = engine.search(&SearchQuery::new("spike receptor").neighbors(2)).await.unwrap();

        let ids: Vec<&str> = results.iter().map(|r| r.document_id.as_str()).collect();
        assert_eq!(ids, vec!["d0", "d2"]);
        assert!((results[0].score - 1.0).abs() < 1e-6);
        assert!((results[1].score - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_preprocessed_text_is_embedded() {
        let provider = MockEmbeddingProvider::new(vec![1.0, 0.0]).with_vector("household masks", vec![0.0, 1.0]);
        let engine = engine(provider, "Spike protein structure");

        let results = engine
            .search(&SearchQuery::new("The household masks?").neighbors(1))
            .await
            .unwrap();
        assert_eq!(results[0].document_id, "d1");
    }

    #[tokio::test]
    async fn test_short_title_excluded_from_html() {
        let engine = engine(MockEmbeddingProvider::new(vec![1.0, 0.0]), "AB");
        let html = engine.search_html(&SearchQuery::new("spike receptor").neighbors(2)).await.unwrap();

        assert!(!html.contains(SENTENCES[0]));
        assert!(html.contains("Receptor usage across coronaviruses"));
        assert_eq!(html.matches(r#"<div class="wrap">"#).count(), 1);
    }

    #[tokio::test]
    async fn test_html_highlights_matches_and_entities() {
        let engine = engine(MockEmbeddingProvider::new(vec![1.0, 0.0]), "Spike protein structure");
        let html = engine.search_html(&SearchQuery::new("spike receptor").neighbors(1)).await.unwrap();

        assert!(html.contains("Spike protein structure"));
        assert!(html.contains(r#"href="https://ace2""#));
        assert!(html.contains(">Highlight</span>"));
        assert!(html.contains("<i>Li, Q.; Guan, X.</i>"));
    }

    #[tokio::test]
    async fn test_sort_by_date() {
        let engine = engine(MockEmbeddingProvider::new(vec![1.0, 0.0]), "Spike protein structure");
        let results = engine
            .search(&SearchQuery::new("spike receptor").neighbors(3).sort_by_date(true))
            .await
            .unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.document_id.as_str()).collect();
        assert_eq!(ids, vec!["d2", "d1", "d0"]);
    }

    #[tokio::test]
    async fn test_topic_only() {
        let engine = engine(MockEmbeddingProvider::new(vec![1.0, 0.0]), "Spike protein structure");
        let results = engine
            .search(&SearchQuery::new("spike receptor").neighbors(3).topic_only(true))
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].document_id, "d0");
    }

    #[tokio::test]
    async fn test_dimension_mismatch() {
        let engine = engine(MockEmbeddingProvider::new(vec![1.0, 0.0, 0.0]), "Spike protein structure");
        let result = engine.search(&SearchQuery::new("spike receptor")).await;
        assert!(matches!(
            result,
            Err(QueryError::Index(IndexError::DimensionMismatch { expected: 2, actual: 3 }))
        ));
    }

    #[tokio::test]
    async fn test_embedding_error_propagates() {
        let engine = engine(MockEmbeddingProvider::with_failure(), "Spike protein structure");
        let result = engine.search(&SearchQuery::new("spike receptor")).await;
        assert!(matches!(result, Err(QueryError::Embedding(EmbeddingError::ApiError(_)))));
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let engine = engine(MockEmbeddingProvider::new(vec![1.0, 0.0]), "Spike protein structure");
        let result = engine.search(&SearchQuery::new("what is the")).await;
        assert!(matches!(result, Err(QueryError::InvalidQuery(_))));
    }

    #[tokio::test]
    async fn test_cached_results_short_circuit() {
        let query = SearchQuery::new("spike receptor");
        let mut cache = CachedResults::new();
        cache.insert("spike receptor", query.options(), "<div>cached</div>");
        let engine = engine(MockEmbeddingProvider::with_failure(), "Spike protein structure").with_cache(cache);

        let html = engine.search_html(&query).await.unwrap();
        assert_eq!(html, "<div>cached</div>");

        // A cache miss falls through to a live search.
        let result = engine.search_html(&SearchQuery::new("masks")).await;
        assert!(matches!(result, Err(QueryError::Embedding(_))));
    }

    #[tokio::test]
    async fn test_cached_results_require_same_options() {
        let mut cache = CachedResults::new();
        cache.insert(
            "spike receptor",
            SearchQuery::new("spike receptor").options(),
            "<div>relevance-ranked, all papers</div>",
        );
        let engine = engine(MockEmbeddingProvider::new(vec![1.0, 0.0]), "Spike protein structure").with_cache(cache);

        let query = SearchQuery::new("spike receptor")
            .sort_by_date(true)
            .topic_only(true)
            .top_documents(1);
        let html = engine.search_html(&query).await.unwrap();

        assert!(!html.contains("relevance-ranked"));
        assert!(html.contains("Spike protein structure"));
        assert_eq!(html.matches(r#"<div class="wrap">"#).count(), 1);
    }

    #[tokio::test]
    async fn test_search_rendered_keeps_live_results() {
        let query = SearchQuery::new("spike receptor").neighbors(2);
        let engine = engine(MockEmbeddingProvider::new(vec![1.0, 0.0]), "Spike protein structure");

        let rendered = engine.search_rendered(&query).await.unwrap();
        assert!(!rendered.from_cache);
        assert_eq!(rendered.results.len(), 2);
        assert_eq!(rendered.results[0].document_id, "d0");
        assert_eq!(rendered.html, engine.search_html(&query).await.unwrap());

        let mut cache = CachedResults::new();
        cache.insert("spike receptor", query.options(), "<div>cached</div>");
        let engine = engine.with_cache(cache);
        assert_eq!(engine.cached_html(&query), Some("<div>cached</div>"));

        let rendered = engine.search_rendered(&query).await.unwrap();
        assert!(rendered.from_cache);
        assert!(rendered.results.is_empty());
        assert_eq!(rendered.html, "<div>cached</div>");
    }

    #[tokio::test]
    async fn test_concurrent_queries_share_context() {
        let engine = Arc::new(engine(MockEmbeddingProvider::new(vec![1.0, 0.0]), "Spike protein structure"));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let engine = Arc::clone(&engine);
            handles.push(tokio::spawn(async move {
                engine.search(&SearchQuery::new("spike receptor").neighbors(2)).await
            }));
        }
        for handle in handles {
            let results = handle.await.unwrap().unwrap();
            assert_eq!(results.len(), 2);
        }
    }

    #[test]
    fn test_search_query_defaults() {
        let query = SearchQuery::new("test query");
        assert_eq!(query.neighbors, 100);
        assert_eq!(query.top_documents, 20);
        let options = query.sort_by_date(true).aggregate_options();
        assert_eq!(options.sort_mode, SortMode::PublishDate);
        assert_eq!(options.top_n, 20);
    }
}
