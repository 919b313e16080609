//! Embedding provider abstraction and implementations.
//!
//! This module defines the interface for text embedding generation, the query
//! preprocessing applied before embedding, and implementations for an
//! OpenAI-compatible HTTP service and (with the `fastembed` feature) local
//! ONNX models.
//!
//! The abstraction allows the engine to swap between embedding models
//! without changing the search logic, as long as the model matches the one
//! the sentence index was built with.

#[cfg(feature = "fastembed")]
pub mod fastembed;
pub mod openai;

use std::collections::HashSet;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use thiserror::Error;

/// Errors raised while embedding query text.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// The embedding service failed or rejected the request
    #[error("API request failed: {0}")]
    ApiError(String),

    /// Invalid input text (e.g., empty after preprocessing)
    #[error("Invalid input text: {0}")]
    InvalidInput(String),

    /// Configuration error (e.g., missing API key)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Backend failure not covered above
    #[error("Unexpected error: {0}")]
    Other(String),
}

/// Result type for embedding operations.
pub type EmbeddingResult<T> = Result<T, EmbeddingError>;

/// Trait for text embedding providers.
///
/// Queries must be embedded with the same model that produced the sentence
/// index. Methods are async so HTTP backends can be awaited.
///
/// # Example Usage
/// ```ignore
/// let provider = config.embedding.build_provider(config.dimension)?;
/// let text = preprocess_sentence("What is the incubation period?");
/// let embedding = provider.embed(&text).await?;
/// ```
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding vector for the given text.
    ///
    /// # Arguments
    /// * `text` - The input text to embed (should be preprocessed)
    ///
    /// # Returns
    /// A vector of f32 values representing the embedding
    ///
    /// # Errors
    /// Returns `EmbeddingError` if the embedding generation fails
    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>>;

    /// Generate embeddings for multiple texts in a single batch.
    ///
    /// # Returns
    /// A vector of embedding vectors, in the same order as the input texts
    ///
    /// # Errors
    /// Returns `EmbeddingError` if any embedding generation fails
    async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>>;

    /// Length of the vectors this provider returns.
    fn dimension(&self) -> usize;

    /// Model identifier, for logs and error messages.
    fn model_name(&self) -> &str;
}

/// Wrapper enum over the concrete providers, for runtime selection.
pub enum DynamicEmbeddingProvider {
    /// OpenAI-compatible HTTP service
    OpenAI(openai::OpenAIEmbedding),

    /// Local ONNX model
    #[cfg(feature = "fastembed")]
    FastEmbed(fastembed::FastEmbedProvider),
}

#[async_trait]
impl EmbeddingProvider for DynamicEmbeddingProvider {
    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        match self {
            DynamicEmbeddingProvider::OpenAI(p) => p.embed(text).await,
            #[cfg(feature = "fastembed")]
            DynamicEmbeddingProvider::FastEmbed(p) => p.embed(text).await,
        }
    }

    async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        match self {
            DynamicEmbeddingProvider::OpenAI(p) => p.embed_batch(texts).await,
            #[cfg(feature = "fastembed")]
            DynamicEmbeddingProvider::FastEmbed(p) => p.embed_batch(texts).await,
        }
    }

    fn dimension(&self) -> usize {
        match self {
            DynamicEmbeddingProvider::OpenAI(p) => p.dimension(),
            #[cfg(feature = "fastembed")]
            DynamicEmbeddingProvider::FastEmbed(p) => p.dimension(),
        }
    }

    fn model_name(&self) -> &str {
        match self {
            DynamicEmbeddingProvider::OpenAI(p) => p.model_name(),
            #[cfg(feature = "fastembed")]
            DynamicEmbeddingProvider::FastEmbed(p) => p.model_name(),
        }
    }
}

/// English stop-words removed from queries before embedding.
pub static STOP_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "i", "me", "my", "myself", "we", "our", "ours", "ourselves", "you", "you're", "you've", "you'll", "you'd",
        "your", "yours", "yourself", "yourselves", "he", "him", "his", "himself", "she", "she's", "her", "hers",
        "herself", "it", "it's", "its", "itself", "they", "them", "their", "theirs", "themselves", "what", "which",
        "who", "whom", "this", "that", "that'll", "these", "those", "am", "is", "are", "was", "were", "be", "been",
        "being", "have", "has", "had", "having", "do", "does", "did", "doing", "a", "an", "the", "and", "but", "if",
        "or", "because", "as", "until", "while", "of", "at", "by", "for", "with", "about", "against", "between",
        "into", "through", "during", "before", "after", "above", "below", "to", "from", "up", "down", "in", "out",
        "on", "off", "over", "under", "again", "further", "then", "once", "here", "there", "when", "where", "why",
        "how", "all", "any", "both", "each", "few", "more", "most", "other", "some", "such", "no", "nor", "not",
        "only", "own", "same", "so", "than", "too", "very", "s", "t", "can", "will", "just", "don", "don't",
        "should", "should've", "now", "d", "ll", "m", "o", "re", "ve", "y", "ain", "aren", "aren't", "couldn",
        "couldn't", "didn", "didn't", "doesn", "doesn't", "hadn", "hadn't", "hasn", "hasn't", "haven", "haven't",
        "isn", "isn't", "ma", "mightn", "mightn't", "mustn", "mustn't", "needn", "needn't", "shan", "shan't",
        "shouldn", "shouldn't", "wasn", "wasn't", "weren", "weren't", "won", "won't", "wouldn", "wouldn't",
    ]
    .into_iter()
    .collect()
});

/// Characters split off the edges of a token as separate punctuation.
const EDGE_PUNCTUATION: &[char] = &[',', ';', ':', '!', '?', '(', ')', '[', ']', '{', '}', '"', '`'];

/// Prepare query text for the sentence embedding model.
///
/// Pads `/`, `.-`, `.` and `'` with spaces (in that order), lowercases,
/// tokenizes on whitespace with edge punctuation split off, and drops
/// punctuation-only tokens and English stop-words. Tokens are rejoined with
/// single spaces.
///
/// # Example
/// ```ignore
/// assert_eq!(preprocess_sentence("What is the R0 of COVID-19?"), "r0 covid-19");
/// ```
pub fn preprocess_sentence(text: &str) -> String {
    let padded = text
        .replace('/', " / ")
        .replace(".-", " .- ")
        .replace('.', " . ")
        .replace('\'', " ' ")
        .to_lowercase();

    padded
        .split_whitespace()
        .map(|token| token.trim_matches(EDGE_PUNCTUATION))
        .filter(|token| !token.is_empty())
        .filter(|token| !token.chars().all(|c| c.is_ascii_punctuation()))
        .filter(|token| !STOP_WORDS.contains(*token))
        .collect::<Vec<_>>()
        .join(" ")
}
