//! On-disk layout of the sentence index.
//!
//! Two files, written side by side:
//! - a flat array of little-endian `f32` values, `records x dimension` long;
//! - a bincode-encoded list of `(document_id, section_id, sentence_index,
//!   sentence_text)` records in the same order.
//!
//! The dimension is not stored; it is recovered from the float count and the
//! record count, and can be cross-checked against configuration. Writes go
//! through a temp file and a rename so a crash never leaves a torn file.

use std::fs;
use std::path::Path;
use std::time::Instant;

use tracing::info;

use super::{IndexError, IndexResult, VectorIndex};
use crate::models::SentenceRecord;

const F32_BYTES: usize = std::mem::size_of::<f32>();

/// Write the index vectors and records to `vectors_path` and `records_path`.
///
/// The normalized vectors are written, so a reload is a no-op normalization.
pub fn save_index(index: &VectorIndex, vectors_path: &Path, records_path: &Path) -> IndexResult<()> {
    let mut bytes = Vec::with_capacity(index.as_flat().len() * F32_BYTES);
    for value in index.as_flat() {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    write_atomic(vectors_path, &bytes)?;

    let encoded = bincode::serialize(index.records())
        .map_err(|e| IndexError::SerializationError(e.to_string()))?;
    write_atomic(records_path, &encoded)?;

    info!(
        "Saved index with {} sentences (dimension {}) to {}",
        index.len(),
        index.dimension(),
        vectors_path.display()
    );
    Ok(())
}

/// Load an index written by [`save_index`].
///
/// # Arguments
/// * `vectors_path` - Flat little-endian `f32` file
/// * `records_path` - Bincode-encoded sentence records
/// * `expected_dimension` - Optional dimension to verify against
///
/// # Errors
/// Returns `IndexError::ShapeMismatch` when the float count is not a multiple
/// of the record count, and `IndexError::DimensionMismatch` when the recovered
/// dimension differs from `expected_dimension`.
pub fn load_index(
    vectors_path: &Path,
    records_path: &Path,
    expected_dimension: Option<usize>,
) -> IndexResult<VectorIndex> {
    let started = Instant::now();
    info!("Loading sentence vectors from {}", vectors_path.display());

    let raw = fs::read(vectors_path)?;
    if raw.len() % F32_BYTES != 0 {
        return Err(IndexError::SerializationError(format!(
            "vector file {} is {} bytes, not a whole number of f32 values",
            vectors_path.display(),
            raw.len()
        )));
    }
    let vectors: Vec<f32> = raw
        .chunks_exact(F32_BYTES)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();

    let encoded = fs::read(records_path)?;
    let records: Vec<SentenceRecord> = bincode::deserialize(&encoded)
        .map_err(|e| IndexError::SerializationError(e.to_string()))?;

    if records.is_empty() || vectors.len() % records.len() != 0 {
        return Err(IndexError::ShapeMismatch {
            floats: vectors.len(),
            records: records.len(),
            dimension: expected_dimension.unwrap_or(0),
        });
    }
    let dimension = vectors.len() / records.len();
    if let Some(expected) = expected_dimension {
        if expected != dimension {
            return Err(IndexError::DimensionMismatch {
                expected,
                actual: dimension,
            });
        }
    }

    let index = VectorIndex::new(dimension, vectors, records)?;
    info!(
        "Loaded {} sentence vectors (dimension {}) in {:.2}s",
        index.len(),
        index.dimension(),
        started.elapsed().as_secs_f64()
    );
    Ok(index)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> IndexResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = Path::new(&tmp_name);
    fs::write(tmp_path, bytes)?;
    fs::rename(tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_index() -> VectorIndex {
        VectorIndex::from_rows(
            vec![vec![1.0, 0.0, 0.0], vec![0.0, 3.0, 4.0]],
            vec![
                SentenceRecord::new("a.json", 0, 0, "first sentence"),
                SentenceRecord::new("b.json", 2, 5, "second sentence"),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let vectors = dir.path().join("vectors.f32");
        let records = dir.path().join("sentences.bin");

        let index = sample_index();
        save_index(&index, &vectors, &records).unwrap();

        assert_eq!(fs::metadata(&vectors).unwrap().len(), 6 * 4);

        let loaded = load_index(&vectors, &records, Some(3)).unwrap();
        assert_eq!(loaded.dimension(), 3);
        assert_eq!(loaded.records(), index.records());
        assert_eq!(loaded.as_flat(), index.as_flat());
    }

    #[test]
    fn test_load_detects_dimension_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let vectors = dir.path().join("vectors.f32");
        let records = dir.path().join("sentences.bin");
        save_index(&sample_index(), &vectors, &records).unwrap();

        let result = load_index(&vectors, &records, Some(700));
        assert!(matches!(
            result,
            Err(IndexError::DimensionMismatch { expected: 700, actual: 3 })
        ));
    }

    #[test]
    fn test_load_detects_ragged_vector_file() {
        let dir = tempfile::tempdir().unwrap();
        let vectors = dir.path().join("vectors.f32");
        let records = dir.path().join("sentences.bin");
        save_index(&sample_index(), &vectors, &records).unwrap();

        // Drop one float so 5 values no longer split across 2 records.
        let raw = fs::read(&vectors).unwrap();
        fs::write(&vectors, &raw[..raw.len() - 4]).unwrap();

        assert!(matches!(
            load_index(&vectors, &records, None),
            Err(IndexError::ShapeMismatch { floats: 5, records: 2, .. })
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_index(&dir.path().join("nope.f32"), &dir.path().join("nope.bin"), None);
        assert!(matches!(result, Err(IndexError::IoError(_))));
    }
}
