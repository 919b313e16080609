//! Process-wide, read-only search state.
//!
//! A [`SearchContext`] bundles everything a query reads: the sentence index,
//! paper metadata, section text, entity links and the color table. It is
//! built once at startup and shared between concurrent queries behind an
//! `Arc`; nothing in it is mutated afterwards.

use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::info;

use crate::config::{ConfigError, EngineConfig};
use crate::index::persist::load_index;
use crate::index::{IndexError, VectorIndex};
use crate::render::{ColorTable, ResultRenderer};
use crate::storage::metadata::MetadataTable;
use crate::storage::{CorpusStore, EntityLinkStore, EntityLinks, SectionCorpus, StorageError};

/// Errors that can occur while loading the search context.
#[derive(Debug, Error)]
pub enum ContextError {
    /// Configuration is invalid
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Sentence index could not be loaded
    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    /// A document store could not be loaded
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Result type for context loading.
pub type ContextResult<T> = Result<T, ContextError>;

/// Immutable state shared by all queries.
pub struct SearchContext {
    index: VectorIndex,
    metadata: MetadataTable,
    corpus: Arc<dyn CorpusStore>,
    links: Arc<dyn EntityLinkStore>,
    colors: ColorTable,
}

impl SearchContext {
    /// Assemble a context from already loaded parts.
    pub fn new(
        index: VectorIndex,
        metadata: MetadataTable,
        corpus: Arc<dyn CorpusStore>,
        links: Arc<dyn EntityLinkStore>,
        colors: ColorTable,
    ) -> Self {
        Self {
            index,
            metadata,
            corpus,
            links,
            colors,
        }
    }

    /// Load every data file named by the configuration.
    ///
    /// # Errors
    /// Returns `ContextError` if the config is invalid or any file fails to
    /// load, including a dimension that differs from `config.dimension`
    pub fn load(config: &EngineConfig) -> ContextResult<Self> {
        config.validate()?;
        let started = Instant::now();
        let files = &config.files;

        let index = load_index(
            &config.path_for(&files.vectors),
            &config.path_for(&files.sentences),
            config.dimension,
        )?;

        let metadata = MetadataTable::from_csv_path(&config.path_for(&files.metadata), &config.paper_id_field)?;

        let section_path = config.path_for(&files.sections);
        info!("Loading section text from {}", section_path.display());
        let corpus = SectionCorpus::from_json_path(&section_path)?;

        let links_path = config.path_for(&files.entity_links);
        info!("Loading entity links from {}", links_path.display());
        let links = EntityLinks::from_json_path(&links_path)?;

        info!(
            "Search context ready: {} sentences, {} papers, {} documents with text, {} with entity links ({:.2}s)",
            index.len(),
            metadata.len(),
            corpus.len(),
            links.len(),
            started.elapsed().as_secs_f64()
        );

        Ok(Self::new(
            index,
            metadata,
            Arc::new(corpus),
            Arc::new(links),
            config.colors.clone(),
        ))
    }

    /// Sentence index.
    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    /// Paper metadata table.
    pub fn metadata(&self) -> &MetadataTable {
        &self.metadata
    }

    /// Section text store.
    pub fn corpus(&self) -> &dyn CorpusStore {
        self.corpus.as_ref()
    }

    /// Entity link store.
    pub fn links(&self) -> &dyn EntityLinkStore {
        self.links.as_ref()
    }

    /// Mark colors.
    pub fn colors(&self) -> &ColorTable {
        &self.colors
    }

    /// Renderer over this context's stores.
    pub fn renderer(&self) -> ResultRenderer<'_> {
        ResultRenderer::new(self.corpus(), self.links(), &self.colors)
    }
}
