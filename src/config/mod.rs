//! Engine configuration.
//!
//! Every field has a default, so a JSON config file only needs to name the
//! values it changes. The binaries layer their command-line flags on top of
//! whatever was loaded.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::embedding::openai::{OpenAIEmbedding, DEFAULT_BASE_URL, DEFAULT_MODEL};
use crate::embedding::{DynamicEmbeddingProvider, EmbeddingError, EmbeddingResult};
use crate::render::ColorTable;
use crate::storage::metadata::DEFAULT_PAPER_ID_FIELD;

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the config file
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// The config file is not valid JSON for this schema
    #[error("Parse error: {0}")]
    ParseError(String),

    /// A value is out of range
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// File names of the data set, relative to the data directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataLayout {
    /// Flat little-endian f32 sentence vectors
    pub vectors: String,

    /// Bincode sentence records, parallel to `vectors`
    pub sentences: String,

    /// Paper metadata CSV
    pub metadata: String,

    /// `document -> section -> text` JSON map
    pub sections: String,

    /// `document -> section -> [entity span]` JSON map
    pub entity_links: String,

    /// Precomputed responses (query text, options, html) as JSON
    pub cached_results: String,
}

impl Default for DataLayout {
    fn default() -> Self {
        Self {
            vectors: "vectors.f32".to_string(),
            sentences: "sentences.bin".to_string(),
            metadata: "metadata.csv".to_string(),
            sections: "sections.json".to_string(),
            entity_links: "entity_links.json".to_string(),
            cached_results: "cached_results.json".to_string(),
        }
    }
}

/// Which embedding backend to use for queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// OpenAI-compatible HTTP service
    #[default]
    OpenAi,

    /// Local ONNX model (requires the `fastembed` feature)
    FastEmbed,
}

/// Query embedding settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    /// Backend kind
    pub provider: ProviderKind,

    /// Model name passed to the backend
    pub model: String,

    /// API root for the HTTP backend
    pub base_url: String,

    /// Environment variable holding the API key
    pub api_key_env: String,

    /// Per-request timeout for the HTTP backend
    pub timeout_secs: u64,

    /// Attempts per request for the HTTP backend
    pub max_retries: usize,

    /// Model cache directory for the local backend
    pub cache_dir: Option<PathBuf>,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: ProviderKind::OpenAi,
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: 30,
            max_retries: 3,
            cache_dir: None,
        }
    }
}

impl EmbeddingSettings {
    /// Build the configured provider.
    ///
    /// `dimension` is forwarded to the HTTP backend so it can be checked
    /// against the index.
    ///
    /// # Errors
    /// Returns `EmbeddingError::ConfigError` if the backend cannot be set up,
    /// or if the local backend was requested without the `fastembed` feature
    pub fn build_provider(&self, dimension: Option<usize>) -> EmbeddingResult<DynamicEmbeddingProvider> {
        match self.provider {
            ProviderKind::OpenAi => {
                let api_key = std::env::var(&self.api_key_env).unwrap_or_default();
                let provider = OpenAIEmbedding::new(
                    &api_key,
                    &self.base_url,
                    &self.model,
                    dimension,
                    Duration::from_secs(self.timeout_secs),
                    self.max_retries,
                )?;
                Ok(DynamicEmbeddingProvider::OpenAI(provider))
            }
            #[cfg(feature = "fastembed")]
            ProviderKind::FastEmbed => {
                let provider = crate::embedding::fastembed::FastEmbedProvider::new(&self.model, self.cache_dir.clone())?;
                Ok(DynamicEmbeddingProvider::FastEmbed(provider))
            }
            #[cfg(not(feature = "fastembed"))]
            ProviderKind::FastEmbed => Err(EmbeddingError::ConfigError(
                "the fastembed provider requires building with the `fastembed` feature".to_string(),
            )),
        }
    }
}

/// Settings for loading data and answering queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Directory holding the data set files
    pub data_dir: PathBuf,

    /// Metadata column used as the paper id
    pub paper_id_field: String,

    /// Expected vector dimension, checked against the index when set
    pub dimension: Option<usize>,

    /// Query rows scored per similarity batch
    pub batch_size: usize,

    /// Nearest sentences retrieved per query (K)
    pub neighbors: usize,

    /// Documents kept per query
    pub top_documents: usize,

    /// Deadline for the similarity scan
    pub search_timeout_secs: u64,

    /// Answer from the cached results file when it exists
    pub use_cached_results: bool,

    /// Data file names
    pub files: DataLayout,

    /// Query embedding backend
    pub embedding: EmbeddingSettings,

    /// Mark colors
    pub colors: ColorTable,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            paper_id_field: DEFAULT_PAPER_ID_FIELD.to_string(),
            dimension: None,
            batch_size: crate::DEFAULT_BATCH_SIZE,
            neighbors: crate::DEFAULT_NEIGHBORS,
            top_documents: crate::DEFAULT_TOP_DOCUMENTS,
            search_timeout_secs: crate::DEFAULT_SEARCH_TIMEOUT_SECS,
            use_cached_results: false,
            files: DataLayout::default(),
            embedding: EmbeddingSettings::default(),
            colors: ColorTable::default(),
        }
    }
}

impl EngineConfig {
    /// Load a config file, filling unspecified fields with defaults.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated
    pub fn from_json_file(path: &Path) -> ConfigResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self =
            serde_json::from_str(&raw).map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check that counts and timeouts are usable.
    ///
    /// # Errors
    /// Returns `ConfigError::Invalid` naming the first bad field
    pub fn validate(&self) -> ConfigResult<()> {
        let positive = [
            ("batch_size", self.batch_size as u64),
            ("neighbors", self.neighbors as u64),
            ("top_documents", self.top_documents as u64),
            ("search_timeout_secs", self.search_timeout_secs),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be greater than zero", name)));
            }
        }
        if self.dimension == Some(0) {
            return Err(ConfigError::Invalid("dimension must be greater than zero".to_string()));
        }
        if self.paper_id_field.trim().is_empty() {
            return Err(ConfigError::Invalid("paper_id_field must not be empty".to_string()));
        }
        Ok(())
    }

    /// Absolute or data-dir-relative path of a data file.
    pub fn path_for(&self, file_name: &str) -> PathBuf {
        self.data_dir.join(file_name)
    }

    /// Similarity scan deadline.
    pub fn search_timeout(&self) -> Duration {
        Duration::from_secs(self.search_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.paper_id_field, "cord_uid");
        assert_eq!(config.batch_size, 1000);
        assert_eq!(config.neighbors, 100);
        assert_eq!(config.top_documents, 20);
        assert_eq!(config.files.vectors, "vectors.f32");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(
            &path,
            r#"{"data_dir": "/data/cord19", "neighbors": 50, "files": {"metadata": "meta.csv"},
                "embedding": {"base_url": "http://localhost:9000/v1"}}"#,
        )
        .unwrap();

        let config = EngineConfig::from_json_file(&path).unwrap();
        assert_eq!(config.neighbors, 50);
        assert_eq!(config.top_documents, 20);
        assert_eq!(config.files.metadata, "meta.csv");
        assert_eq!(config.files.sections, "sections.json");
        assert_eq!(config.embedding.base_url, "http://localhost:9000/v1");
        assert_eq!(config.embedding.provider, ProviderKind::OpenAi);
        assert_eq!(config.path_for(&config.files.metadata), PathBuf::from("/data/cord19/meta.csv"));
        assert_eq!(config.colors, ColorTable::default());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let config = EngineConfig {
            top_documents: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(msg)) if msg.contains("top_documents")));

        let config = EngineConfig {
            dimension: Some(0),
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_json_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, r#"{"neighbors": "many"}"#).unwrap();
        assert!(matches!(EngineConfig::from_json_file(&path), Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_provider_kind_names() {
        let kind: ProviderKind = serde_json::from_str(r#""fast_embed""#).unwrap();
        assert_eq!(kind, ProviderKind::FastEmbed);
        let kind: ProviderKind = serde_json::from_str(r#""open_ai""#).unwrap();
        assert_eq!(kind, ProviderKind::OpenAi);
    }

    #[cfg(not(feature = "fastembed"))]
    #[test]
    fn test_fastembed_requires_feature() {
        let settings = EmbeddingSettings {
            provider: ProviderKind::FastEmbed,
            ..EmbeddingSettings::default()
        };
        assert!(matches!(settings.build_provider(None), Err(EmbeddingError::ConfigError(_))));
    }
}
