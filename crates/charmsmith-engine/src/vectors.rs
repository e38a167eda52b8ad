//! Persisted embedding store with exact nearest-neighbour search.
//!
//! Vectors live in memory for ranking and on disk as one `<id>.vec` file per
//! reference:
//!
//! ```text
//! magic "CHV1" | u64 LE insertion sequence | u32 LE dim | dim x f32 LE
//! ```
//!
//! The sequence number restores insertion order on reopen, which keeps tie
//! ordering stable across restarts.

use std::fs;
use std::path::PathBuf;

use indexmap::IndexMap;
use serde::Serialize;
use tracing::{debug, warn};

use crate::atomic::{remove_if_exists, write_atomic};
use crate::error::{GalleryError, GalleryResult};

const MAGIC: &[u8; 4] = b"CHV1";
const HEADER_LEN: usize = 4 + 8 + 4;
const VECTOR_EXT: &str = "vec";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredId {
    pub id: String,
    pub score: f32,
}

#[derive(Debug, Clone)]
struct StoredVector {
    seq: u64,
    values: Vec<f32>,
}

#[derive(Debug)]
pub struct VectorStore {
    dir: PathBuf,
    vectors: IndexMap<String, StoredVector>,
    next_seq: u64,
}

impl VectorStore {
    /// Loads every decodable vector under `dir`. Unreadable or corrupt files
    /// are skipped with a warning.
    pub fn open(dir: impl Into<PathBuf>) -> GalleryResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|err| GalleryError::at("create", &dir, err))?;

        let mut loaded = Vec::new();
        let entries = fs::read_dir(&dir).map_err(|err| GalleryError::at("list", &dir, err))?;
        for entry in entries {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(err) => {
                    warn!(dir = %dir.display(), error = %err, "skipping unreadable vector entry");
                    continue;
                }
            };
            if path.extension().and_then(|ext| ext.to_str()) != Some(VECTOR_EXT) {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            let decoded = fs::read(&path)
                .map_err(|err| err.to_string())
                .and_then(|bytes| decode_vector_file(&bytes));
            match decoded {
                Ok((seq, values)) => loaded.push((id.to_string(), StoredVector { seq, values })),
                Err(err) => warn!(path = %path.display(), error = %err, "skipping corrupt vector file"),
            }
        }
        loaded.sort_by(|a, b| a.1.seq.cmp(&b.1.seq).then_with(|| a.0.cmp(&b.0)));

        let next_seq = loaded.iter().map(|(_, row)| row.seq + 1).max().unwrap_or(0);
        let vectors: IndexMap<String, StoredVector> = loaded.into_iter().collect();
        debug!(dir = %dir.display(), count = vectors.len(), "opened vector store");
        Ok(Self {
            dir,
            vectors,
            next_seq,
        })
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.vectors.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&[f32]> {
        self.vectors.get(id).map(|row| row.values.as_slice())
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.vectors.keys().map(String::as_str)
    }

    /// Normalizes and persists `vector` for `id`. Overwriting keeps the
    /// original insertion position.
    pub fn put(&mut self, id: &str, vector: &[f32]) -> GalleryResult<()> {
        let values = normalized(vector)?;
        let seq = match self.vectors.get(id) {
            Some(existing) => existing.seq,
            None => self.next_seq,
        };
        write_atomic(&self.path_for(id), &encode_vector_file(seq, &values))?;

        if seq == self.next_seq {
            self.next_seq += 1;
        }
        match self.vectors.get_mut(id) {
            Some(existing) => existing.values = values,
            None => {
                self.vectors
                    .insert(id.to_string(), StoredVector { seq, values });
            }
        }
        Ok(())
    }

    /// Removes the vector for `id`. Absent ids are not an error.
    pub fn delete(&mut self, id: &str) -> GalleryResult<bool> {
        remove_if_exists(&self.path_for(id))?;
        Ok(self.vectors.shift_remove(id).is_some())
    }

    /// Exact top-k search by cosine similarity, clamped to `[0, 1]`.
    ///
    /// Results are sorted by descending score with ties in insertion order,
    /// filtered to `score >= threshold` and truncated to `k`.
    pub fn search(&self, query: &[f32], k: usize, threshold: f32) -> Vec<ScoredId> {
        self.search_filtered(query, k, threshold, |_| true)
    }

    pub fn search_filtered(
        &self,
        query: &[f32],
        k: usize,
        threshold: f32,
        keep: impl Fn(&str) -> bool,
    ) -> Vec<ScoredId> {
        if k == 0 || self.vectors.is_empty() {
            return Vec::new();
        }
        let query = match normalized(query) {
            Ok(query) => query,
            Err(err) => {
                warn!(error = %err, "ignoring unusable similarity query");
                return Vec::new();
            }
        };

        let mut skipped = 0usize;
        let mut scored: Vec<ScoredId> = Vec::new();
        for (id, row) in &self.vectors {
            if !keep(id.as_str()) {
                continue;
            }
            if row.values.len() != query.len() {
                skipped += 1;
                continue;
            }
            let score = dot(&query, &row.values).clamp(0.0, 1.0);
            if score >= threshold {
                scored.push(ScoredId {
                    id: id.clone(),
                    score,
                });
            }
        }
        if skipped > 0 {
            warn!(
                skipped,
                query_dim = query.len(),
                "skipped stored vectors with a different dimension"
            );
        }

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(k);
        scored
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.{VECTOR_EXT}"))
    }
}

/// Normalize a vector in-place and return whether the norm was non-zero.
pub fn normalize_l2_in_place(values: &mut [f32]) -> bool {
    let mut sum = 0.0_f32;
    for value in values.iter() {
        sum += value * value;
    }
    if !sum.is_finite() || sum <= 0.0 {
        return false;
    }
    let norm = sum.sqrt();
    for value in values {
        *value /= norm;
    }
    true
}

/// Unit-length copy of `vector`, or `InvalidVector` when it is empty,
/// non-finite or zero.
pub(crate) fn normalized(vector: &[f32]) -> GalleryResult<Vec<f32>> {
    if vector.is_empty() {
        return Err(GalleryError::InvalidVector("vector is empty".to_string()));
    }
    if vector.iter().any(|value| !value.is_finite()) {
        return Err(GalleryError::InvalidVector(
            "vector contains non-finite values".to_string(),
        ));
    }
    let mut values = vector.to_vec();
    if !normalize_l2_in_place(&mut values) {
        return Err(GalleryError::InvalidVector("vector has zero norm".to_string()));
    }
    Ok(values)
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn encode_vector_file(seq: u64, values: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + values.len().saturating_mul(4));
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&seq.to_le_bytes());
    out.extend_from_slice(&(values.len() as u32).to_le_bytes());
    for &value in values {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

fn decode_vector_file(bytes: &[u8]) -> Result<(u64, Vec<f32>), String> {
    if bytes.len() < HEADER_LEN {
        return Err(format!("vector file too short ({} bytes)", bytes.len()));
    }
    let (header, body) = bytes.split_at(HEADER_LEN);
    if &header[..4] != MAGIC {
        return Err("bad vector file magic".to_string());
    }
    let seq = u64::from_le_bytes(read_array(&header[4..12])?);
    let dim = u32::from_le_bytes(read_array(&header[12..16])?) as usize;
    if dim == 0 || body.len() != dim.saturating_mul(4) {
        return Err(format!(
            "vector body length {} does not match dimension {dim}",
            body.len()
        ));
    }
    let mut values = Vec::with_capacity(dim);
    for chunk in body.chunks_exact(4) {
        values.push(f32::from_le_bytes(read_array(chunk)?));
    }
    if values.iter().any(|value| !value.is_finite()) {
        return Err("vector contains non-finite values".to_string());
    }
    Ok((seq, values))
}

fn read_array<const N: usize>(bytes: &[u8]) -> Result<[u8; N], String> {
    bytes
        .try_into()
        .map_err(|_| format!("expected {N} bytes, got {}", bytes.len()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_unit(values: &[f32]) {
        let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5, "norm was {norm}");
    }

    #[test]
    fn put_normalizes_and_persists() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut store = VectorStore::open(temp.path())?;
        store.put("a", &[3.0, 4.0])?;
        assert_unit(store.get("a").unwrap_or(&[]));
        assert!(temp.path().join("a.vec").exists());

        let reopened = VectorStore::open(temp.path())?;
        assert_eq!(reopened.get("a"), store.get("a"));
        Ok(())
    }

    #[test]
    fn put_rejects_unusable_vectors() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut store = VectorStore::open(temp.path())?;
        for bad in [vec![], vec![0.0, 0.0], vec![1.0, f32::NAN]] {
            assert!(matches!(
                store.put("bad", &bad),
                Err(GalleryError::InvalidVector(_))
            ));
        }
        assert!(store.is_empty());
        assert!(!temp.path().join("bad.vec").exists());
        Ok(())
    }

    #[test]
    fn search_orders_filters_and_truncates() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut store = VectorStore::open(temp.path())?;
        store.put("exact", &[1.0, 0.0])?;
        store.put("near", &[0.9, 0.1])?;
        store.put("far", &[0.0, 1.0])?;
        store.put("opposite", &[-1.0, 0.0])?;

        let hits = store.search(&[2.0, 0.0], 10, 0.0);
        let ids: Vec<&str> = hits.iter().map(|hit| hit.id.as_str()).collect();
        assert_eq!(ids, vec!["exact", "near", "far", "opposite"]);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert_eq!(hits[3].score, 0.0);
        assert!(hits.windows(2).all(|pair| pair[0].score >= pair[1].score));

        let filtered = store.search(&[1.0, 0.0], 10, 0.5);
        assert_eq!(filtered.len(), 2);
        assert!(filtered.iter().all(|hit| hit.score >= 0.5));

        assert_eq!(store.search(&[1.0, 0.0], 1, 0.0).len(), 1);
        assert!(store.search(&[1.0, 0.0], 0, 0.0).is_empty());
        assert!(store.search(&[0.0, 0.0], 5, 0.0).is_empty());
        Ok(())
    }

    #[test]
    fn ties_keep_insertion_order_across_reopen() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        {
            let mut store = VectorStore::open(temp.path())?;
            for id in ["zeta", "alpha", "mid"] {
                store.put(id, &[1.0, 1.0])?;
            }
            // Overwrite keeps the slot of the first insertion.
            store.put("zeta", &[2.0, 2.0])?;
        }
        let store = VectorStore::open(temp.path())?;
        let ids: Vec<String> = store
            .search(&[1.0, 1.0], 3, 0.0)
            .into_iter()
            .map(|hit| hit.id)
            .collect();
        assert_eq!(ids, vec!["zeta", "alpha", "mid"]);
        Ok(())
    }

    #[test]
    fn mismatched_dimensions_are_skipped() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut store = VectorStore::open(temp.path())?;
        store.put("two", &[1.0, 0.0])?;
        store.put("three", &[1.0, 0.0, 0.0])?;
        let hits = store.search(&[1.0, 0.0, 0.0], 5, 0.0);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "three");
        Ok(())
    }

    #[test]
    fn delete_is_idempotent() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut store = VectorStore::open(temp.path())?;
        store.put("a", &[1.0])?;
        assert!(store.delete("a")?);
        assert!(!store.delete("a")?);
        assert!(!store.delete("never-existed")?);
        assert!(store.search(&[1.0], 5, 0.0).is_empty());
        assert!(!temp.path().join("a.vec").exists());
        Ok(())
    }

    #[test]
    fn corrupt_files_are_skipped_on_open() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        {
            let mut store = VectorStore::open(temp.path())?;
            store.put("good", &[0.0, 1.0])?;
        }
        fs::write(temp.path().join("short.vec"), b"CHV1")?;
        fs::write(temp.path().join("magic.vec"), b"XXXX00000000\x01\x00\x00\x00abcd")?;
        fs::write(temp.path().join("notes.txt"), b"ignored")?;

        let store = VectorStore::open(temp.path())?;
        assert_eq!(store.len(), 1);
        assert!(store.contains("good"));
        Ok(())
    }

    #[test]
    fn filtered_search_excludes_ids() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut store = VectorStore::open(temp.path())?;
        store.put("self", &[1.0, 0.0])?;
        store.put("other", &[0.8, 0.2])?;
        let hits = store.search_filtered(&[1.0, 0.0], 5, 0.0, |id| id != "self");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "other");
        Ok(())
    }
}
