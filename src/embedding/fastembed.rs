//! Local query embeddings through fastembed.
//!
//! Runs ONNX sentence-embedding models locally through the fastembed library,
//! so queries can be embedded without a network service. Only available with
//! the `fastembed` cargo feature.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use tokio::sync::Mutex;
use tracing::info;

use super::{EmbeddingError, EmbeddingProvider, EmbeddingResult};

/// Local embedding provider backed by fastembed.
#[derive(Clone)]
pub struct FastEmbedProvider {
    /// Loaded ONNX session; inference needs exclusive access
    model: Arc<Mutex<TextEmbedding>>,

    /// Name the model was configured with
    model_name: String,

    /// Dimension of the embedding vectors
    embedding_dimension: usize,
}

/// Map a configured model name to a fastembed model and its dimension.
///
/// # Errors
/// Returns `EmbeddingError::ConfigError` for names fastembed does not ship
pub fn resolve_model(name: &str) -> EmbeddingResult<(EmbeddingModel, usize)> {
    let resolved = match name.to_ascii_lowercase().as_str() {
        "all-minilm-l6-v2" | "allminilml6v2" => (EmbeddingModel::AllMiniLML6V2, 384),
        "bge-small-en-v1.5" | "bgesmallenv15" => (EmbeddingModel::BGESmallENV15, 384),
        "bge-base-en-v1.5" | "bgebaseenv15" => (EmbeddingModel::BGEBaseENV15, 768),
        "bge-large-en-v1.5" | "bgelargeenv15" => (EmbeddingModel::BGELargeENV15, 1024),
        "nomic-embed-text-v1.5" | "nomicembedtextv15" => (EmbeddingModel::NomicEmbedTextV15, 768),
        other => {
            return Err(EmbeddingError::ConfigError(format!(
                "unsupported fastembed model '{}'",
                other
            )))
        }
    };
    Ok(resolved)
}

impl FastEmbedProvider {
    /// Load a local model, downloading it into `cache_dir` on first use.
    ///
    /// # Errors
    /// Returns `EmbeddingError::ConfigError` if the name is unknown or the
    /// model fails to initialize
    pub fn new(model_name: &str, cache_dir: Option<PathBuf>) -> EmbeddingResult<Self> {
        let (model_type, embedding_dimension) = resolve_model(model_name)?;

        let mut init_options = InitOptions::new(model_type);
        if let Some(dir) = cache_dir {
            init_options = init_options.with_cache_dir(dir);
        }

        let text_embedding = TextEmbedding::try_new(init_options)
            .map_err(|e| EmbeddingError::ConfigError(format!("Failed to initialize FastEmbed model: {}", e)))?;
        info!("Loaded local embedding model {} ({} dimensions)", model_name, embedding_dimension);

        Ok(Self {
            model: Arc::new(Mutex::new(text_embedding)),
            model_name: model_name.to_string(),
            embedding_dimension,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn embed(&self, text: &str) -> EmbeddingResult<Vec<f32>> {
        self.embed_batch(&[text])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::Other("fastembed returned no vector".to_string()))
    }

    async fn embed_batch(&self, texts: &[&str]) -> EmbeddingResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if texts.iter().any(|t| t.trim().is_empty()) {
            return Err(EmbeddingError::InvalidInput("All texts must be non-empty".to_string()));
        }

        let mut model = self.model.lock().await;
        let inputs: Vec<String> = texts.iter().map(|s| s.to_string()).collect();
        model
            .embed(inputs, None)
            .map_err(|e| EmbeddingError::Other(format!("Embedding generation failed: {}", e)))
    }

    fn dimension(&self) -> usize {
        self.embedding_dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

impl std::fmt::Debug for FastEmbedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedProvider")
            .field("model_name", &self.model_name)
            .field("embedding_dimension", &self.embedding_dimension)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_model() {
        assert_eq!(resolve_model("BGE-base-en-v1.5").unwrap().1, 768);
        assert_eq!(resolve_model("all-MiniLM-L6-v2").unwrap().1, 384);
        assert!(matches!(resolve_model("biosentvec"), Err(EmbeddingError::ConfigError(_))));
    }

    #[tokio::test]
    #[ignore = "downloads model files"]
    async fn test_embed_matches_dimension() {
        let provider = FastEmbedProvider::new("all-minilm-l6-v2", None).unwrap();
        let embedding = provider.embed("viral shedding duration").await.unwrap();
        assert_eq!(embedding.len(), provider.dimension());
        assert!(embedding.iter().all(|x| x.is_finite()));
    }

    #[tokio::test]
    #[ignore = "downloads model files"]
    async fn test_batch_consistent_with_single() {
        let provider = FastEmbedProvider::new("all-minilm-l6-v2", None).unwrap();
        let single = provider.embed("incubation period").await.unwrap();
        let batch = provider.embed_batch(&["incubation period", "mask efficacy"]).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(single, batch[0]);
        assert!(matches!(provider.embed("").await, Err(EmbeddingError::InvalidInput(_))));
    }
}
