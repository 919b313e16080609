//! Batched brute-force top-K similarity search.
//!
//! Every query is compared against every base vector: for each batch of query
//! rows a dense `batch x corpus` similarity matrix is computed, then the K
//! largest entries of each row are selected with a bounded min-heap. There is
//! no approximate index; batching only caps peak memory.
//!
//! Exact score ties are resolved towards the lower corpus row, but callers
//! should treat tie order as unspecified.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::Instant;

use ordered_float::OrderedFloat;
use tracing::debug;

use crate::index::{IndexResult, VectorIndex};
use crate::models::NeighborHit;

/// Default number of query rows scored per batch.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Dot product of two equal-length vectors.
///
/// For unit vectors this is the cosine similarity.
#[inline]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Brute-force similarity search over a [`VectorIndex`].
#[derive(Debug, Clone, Copy)]
pub struct SimilaritySearch {
    batch_size: usize,
}

impl Default for SimilaritySearch {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE)
    }
}

impl SimilaritySearch {
    /// Create a search with the given query batch size (at least 1).
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    /// Number of query rows scored per batch.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Find the `k` nearest sentences for every query vector.
    ///
    /// Query vectors are expected to be unit-normalized already. The result
    /// holds one list per query, in query order; each list has exactly
    /// `min(k, index.len())` hits ordered by non-increasing similarity.
    ///
    /// # Errors
    /// Returns `IndexError::DimensionMismatch` before any scoring if a query
    /// vector's length differs from the index dimension.
    pub fn search(&self, index: &VectorIndex, queries: &[Vec<f32>], k: usize) -> IndexResult<Vec<Vec<NeighborHit>>> {
        for query in queries {
            index.check_query(query)?;
        }

        let k = k.min(index.len());
        if k == 0 {
            return Ok(vec![Vec::new(); queries.len()]);
        }

        let started = Instant::now();
        let corpus_size = index.len();
        let mut results = Vec::with_capacity(queries.len());

        for (batch_no, batch) in queries.chunks(self.batch_size).enumerate() {
            let scores = similarity_matrix(index, batch);
            for row in scores.chunks_exact(corpus_size) {
                let hits = top_k(row, k)
                    .into_iter()
                    .filter_map(|(i, score)| index.record(i).map(|r| NeighborHit::from_record(r, score)))
                    .collect();
                results.push(hits);
            }
            debug!(
                "Scored batch {} ({} queries, {} done of {}) in {:.3}s",
                batch_no,
                batch.len(),
                results.len(),
                queries.len(),
                started.elapsed().as_secs_f64()
            );
        }

        Ok(results)
    }
}

/// Dense `batch.len() x index.len()` similarity matrix, row-major.
fn similarity_matrix(index: &VectorIndex, batch: &[Vec<f32>]) -> Vec<f32> {
    let mut scores = Vec::with_capacity(batch.len() * index.len());
    for query in batch {
        scores.extend(index.rows().map(|(base, _)| dot(query, base)));
    }
    scores
}

/// Indices and scores of the `k` largest entries of `row`, best first.
fn top_k(row: &[f32], k: usize) -> Vec<(usize, f32)> {
    // Key orders by score, then prefers the lower row on exact ties.
    let mut heap: BinaryHeap<Reverse<(OrderedFloat<f32>, Reverse<usize>)>> = BinaryHeap::with_capacity(k + 1);
    for (i, &score) in row.iter().enumerate() {
        heap.push(Reverse((OrderedFloat(score), Reverse(i))));
        if heap.len() > k {
            heap.pop();
        }
    }

    let mut best: Vec<(OrderedFloat<f32>, Reverse<usize>)> = heap.into_iter().map(|Reverse(key)| key).collect();
    best.sort_unstable_by(|a, b| b.cmp(a));
    best.into_iter().map(|(score, Reverse(i))| (i, score.0)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexError;
    use crate::models::SentenceRecord;

    fn index_from(rows: Vec<Vec<f32>>) -> VectorIndex {
        let records = (0..rows.len())
            .map(|i| SentenceRecord::new(format!("doc{}.json", i), 0, i as u32, format!("sentence {}", i)))
            .collect();
        VectorIndex::from_rows(rows, records).unwrap()
    }

    /// Deterministic pseudo-random vectors without pulling in an RNG.
    fn lcg_rows(n: usize, dim: usize, seed: u64) -> Vec<Vec<f32>> {
        let mut state = seed;
        (0..n)
            .map(|_| {
                (0..dim)
                    .map(|_| {
                        state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                        ((state >> 33) as f32 / (1u64 << 31) as f32) - 0.5
                    })
                    .collect()
            })
            .collect()
    }

    #[test]
    fn test_three_sentence_scenario() {
        let index = index_from(vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![0.7, 0.7]]);
        let results = SimilaritySearch::default()
            .search(&index, &[vec![1.0, 0.0]], 2)
            .unwrap();

        assert_eq!(results.len(), 1);
        let hits = &results[0];
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].sentence_index, 0);
        assert!((hits[0].similarity - 1.0).abs() < 1e-6);
        assert_eq!(hits[1].sentence_index, 2);
        assert!((hits[1].similarity - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-4);
        assert_eq!(hits[0].document_id, "doc0");
    }

    #[test]
    fn test_returns_min_k_and_sorted() {
        let index = index_from(lcg_rows(50, 8, 7));
        let queries = lcg_rows(5, 8, 99);
        let search = SimilaritySearch::new(2);

        for k in [1, 10, 50, 80] {
            let results = search.search(&index, &queries, k).unwrap();
            assert_eq!(results.len(), queries.len());
            for hits in &results {
                assert_eq!(hits.len(), k.min(50));
                for pair in hits.windows(2) {
                    assert!(pair[0].similarity >= pair[1].similarity);
                }
            }
        }
    }

    #[test]
    fn test_top_k_matches_full_sort() {
        let index = index_from(lcg_rows(40, 6, 3));
        let query = lcg_rows(1, 6, 11).remove(0);
        let mut normalized = query.clone();
        crate::index::normalize_in_place(&mut normalized);

        let hits = SimilaritySearch::default()
            .search(&index, &[normalized.clone()], 5)
            .unwrap()
            .remove(0);

        let mut all: Vec<(usize, f32)> = (0..index.len())
            .map(|i| (i, dot(&normalized, index.vector(i).unwrap())))
            .collect();
        all.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());

        let expected: Vec<u32> = all.iter().take(5).map(|(i, _)| *i as u32).collect();
        let actual: Vec<u32> = hits.iter().map(|h| h.sentence_index).collect();
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_batch_size_invariance() {
        let index = index_from(lcg_rows(30, 4, 5));
        let queries = lcg_rows(7, 4, 13);

        let reference = SimilaritySearch::new(1000).search(&index, &queries, 6).unwrap();
        for batch_size in [1, 2, 3, 7] {
            let results = SimilaritySearch::new(batch_size).search(&index, &queries, 6).unwrap();
            assert_eq!(results, reference, "batch size {} changed results", batch_size);
        }
    }

    #[test]
    fn test_dimension_mismatch() {
        let index = index_from(vec![vec![1.0, 0.0, 0.0]]);
        let result = SimilaritySearch::default().search(&index, &[vec![1.0, 0.0, 0.0], vec![1.0, 0.0]], 1);
        assert!(matches!(
            result,
            Err(IndexError::DimensionMismatch { expected: 3, actual: 2 })
        ));
    }

    #[test]
    fn test_k_zero_and_no_queries() {
        let index = index_from(vec![vec![1.0, 0.0]]);
        let search = SimilaritySearch::default();

        assert_eq!(search.search(&index, &[vec![1.0, 0.0]], 0).unwrap(), vec![Vec::new()]);
        assert!(search.search(&index, &[], 3).unwrap().is_empty());
    }

    #[test]
    fn test_ties_prefer_lower_row() {
        let index = index_from(vec![vec![0.0, 1.0], vec![1.0, 0.0], vec![1.0, 0.0], vec![1.0, 0.0]]);
        let hits = SimilaritySearch::default()
            .search(&index, &[vec![1.0, 0.0]], 2)
            .unwrap()
            .remove(0);
        let rows: Vec<u32> = hits.iter().map(|h| h.sentence_index).collect();
        assert_eq!(rows, vec![1, 2]);
    }

    #[test]
    fn test_zero_base_vector_scores_zero() {
        let index = index_from(vec![vec![0.0, 0.0], vec![-1.0, 0.0]]);
        let hits = SimilaritySearch::default()
            .search(&index, &[vec![1.0, 0.0]], 2)
            .unwrap()
            .remove(0);
        assert_eq!(hits[0].sentence_index, 0);
        assert_eq!(hits[0].similarity, 0.0);
        assert_eq!(hits[1].similarity, -1.0);
    }
}
