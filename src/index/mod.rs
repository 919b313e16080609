//! In-memory sentence vector index.
//!
//! The index owns the full corpus of sentence embeddings as one flat,
//! row-major `f32` buffer plus the parallel [`SentenceRecord`] list. Row `i` of
//! the buffer always belongs to record `i`; nothing in this module reorders one
//! without the other.
//!
//! Base vectors are unit-normalized once at construction so that a plain dot
//! product is the cosine similarity.

pub mod persist;

use thiserror::Error;

use crate::models::{NeighborHit, SentenceRecord};
use crate::query::knn::SimilaritySearch;

/// Norms below this value are treated as 1 during normalization.
pub const NORM_EPSILON: f32 = 1e-12;

/// Errors that can occur while building, loading, or querying the index.
#[derive(Debug, Error)]
pub enum IndexError {
    /// A query vector does not have the index dimension
    #[error("Dimension mismatch: index has dimension {expected}, query vector has {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The vector buffer does not line up with the record list
    #[error("Vector buffer holds {floats} floats, which is not {records} records of dimension {dimension}")]
    ShapeMismatch {
        floats: usize,
        records: usize,
        dimension: usize,
    },

    /// Dimension of zero is never valid
    #[error("Index dimension must be greater than zero")]
    ZeroDimension,

    /// Failed to read or write index files
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to encode or decode the sentence metadata
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Result type for index operations.
pub type IndexResult<T> = Result<T, IndexError>;

/// Normalize a vector to unit L2 norm in place.
///
/// A vector whose norm is below [`NORM_EPSILON`] is divided by 1, i.e. left
/// unchanged; its dot product with anything stays at (or near) zero.
pub fn normalize_in_place(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm = if norm < NORM_EPSILON { 1.0 } else { norm };
    for x in vector.iter_mut() {
        *x /= norm;
    }
}

/// Read-only sentence embedding index.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    /// Length of every vector
    dimension: usize,

    /// Row-major `records.len() x dimension` buffer of unit vectors
    vectors: Vec<f32>,

    /// Sentence metadata, parallel to the rows of `vectors`
    records: Vec<SentenceRecord>,
}

impl VectorIndex {
    /// Build an index from a flat row-major buffer and its parallel records.
    ///
    /// Every row is normalized in place.
    ///
    /// # Errors
    /// Returns `IndexError::ZeroDimension` for a zero dimension and
    /// `IndexError::ShapeMismatch` when `vectors.len() != dimension * records.len()`.
    pub fn new(dimension: usize, mut vectors: Vec<f32>, records: Vec<SentenceRecord>) -> IndexResult<Self> {
        if dimension == 0 {
            return Err(IndexError::ZeroDimension);
        }
        if vectors.len() != dimension * records.len() {
            return Err(IndexError::ShapeMismatch {
                floats: vectors.len(),
                records: records.len(),
                dimension,
            });
        }

        for row in vectors.chunks_exact_mut(dimension) {
            normalize_in_place(row);
        }

        Ok(Self {
            dimension,
            vectors,
            records,
        })
    }

    /// Build an index from one vector per record.
    ///
    /// # Errors
    /// Returns `IndexError::DimensionMismatch` if the rows disagree on length,
    /// or the errors of [`VectorIndex::new`].
    pub fn from_rows(rows: Vec<Vec<f32>>, records: Vec<SentenceRecord>) -> IndexResult<Self> {
        let dimension = rows.first().map(Vec::len).unwrap_or(0);
        let mut flat = Vec::with_capacity(dimension * rows.len());
        for row in rows {
            if row.len() != dimension {
                return Err(IndexError::DimensionMismatch {
                    expected: dimension,
                    actual: row.len(),
                });
            }
            flat.extend(row);
        }
        Self::new(dimension, flat, records)
    }

    /// Length of every vector in the index.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of sentences in the index.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the index holds no sentences.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Unit vector for row `i`.
    pub fn vector(&self, i: usize) -> Option<&[f32]> {
        let start = i.checked_mul(self.dimension)?;
        self.vectors.get(start..start + self.dimension)
    }

    /// Sentence record for row `i`.
    pub fn record(&self, i: usize) -> Option<&SentenceRecord> {
        self.records.get(i)
    }

    /// All sentence records, in row order.
    pub fn records(&self) -> &[SentenceRecord] {
        &self.records
    }

    /// The flat row-major vector buffer.
    pub fn as_flat(&self) -> &[f32] {
        &self.vectors
    }

    /// Iterate over rows as `(vector, record)` pairs.
    pub fn rows(&self) -> impl Iterator<Item = (&[f32], &SentenceRecord)> {
        self.vectors.chunks_exact(self.dimension).zip(self.records.iter())
    }

    /// Find the `k` nearest sentences for every query vector, using the
    /// default batch size.
    ///
    /// See [`SimilaritySearch::search`] for ordering guarantees.
    pub fn search(&self, queries: &[Vec<f32>], k: usize) -> IndexResult<Vec<Vec<NeighborHit>>> {
        SimilaritySearch::default().search(self, queries, k)
    }

    /// Check that a query vector can be compared against this index.
    ///
    /// # Errors
    /// Returns `IndexError::DimensionMismatch` when the lengths differ.
    pub fn check_query(&self, query: &[f32]) -> IndexResult<()> {
        if query.len() != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        Ok(())
    }
}
