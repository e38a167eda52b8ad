//! Reference gallery: image files, analysis metadata and embeddings kept in
//! step under one root directory.
//!
//! ```text
//! <root>/images/<id>.<ext>
//! <root>/embeddings/<id>.vec
//! <root>/metadata.json
//! <root>/events.jsonl
//! ```
//!
//! Metadata and vectors share one `RwLock`. Mutations hold the write lock
//! for the whole read-modify-write cycle; embedding calls happen before it
//! is taken.

mod images;
mod metadata;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use charmsmith_contracts::analysis::ImageAnalysis;
use charmsmith_contracts::describe::search_description;
use charmsmith_contracts::events::{now_utc_iso, EventPayload, EventWriter, GalleryEvent};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::embedding::{EmbeddingOutcome, EmbeddingProvider, EmbeddingRequest};
use crate::error::{GalleryError, GalleryResult};
use crate::vectors::{normalized, VectorStore};

pub use images::{image_extension, FsImageStore, ImageStore};
pub use metadata::{load_metadata, save_metadata, ReferenceItem, SalesTier};

pub const IMAGES_DIR: &str = "images";
pub const EMBEDDINGS_DIR: &str = "embeddings";
pub const METADATA_FILE: &str = "metadata.json";
pub const EVENTS_FILE: &str = "events.jsonl";
pub const IMAGE_URL_PREFIX: &str = "/gallery/images/";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GalleryEntry {
    #[serde(flatten)]
    pub item: ReferenceItem,
    #[serde(rename = "imageUrl")]
    pub image_url: String,
    #[serde(rename = "hasEmbedding")]
    pub has_embedding: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarReference {
    #[serde(flatten)]
    pub item: ReferenceItem,
    #[serde(rename = "imageUrl")]
    pub image_url: String,
    pub similarity: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReembedSummary {
    pub embedded: usize,
    pub unavailable: usize,
    pub failed: usize,
    pub skipped: usize,
}

struct GalleryState {
    items: Vec<ReferenceItem>,
    vectors: VectorStore,
}

impl GalleryState {
    fn position(&self, id: &str) -> Option<usize> {
        self.items.iter().position(|item| item.id == id)
    }

    fn entry(&self, item: &ReferenceItem) -> GalleryEntry {
        GalleryEntry {
            item: item.clone(),
            image_url: image_url(&item.filename),
            has_embedding: self.vectors.contains(&item.id),
        }
    }

    fn similar(&self, query: &[f32], k: usize, threshold: f32, exclude: Option<&str>) -> Vec<SimilarReference> {
        let known: HashSet<&str> = self.items.iter().map(|item| item.id.as_str()).collect();
        let hits = self
            .vectors
            .search_filtered(query, k, threshold, |id| {
                known.contains(id) && Some(id) != exclude
            });
        hits.into_iter()
            .filter_map(|hit| {
                let item = self.items.iter().find(|item| item.id == hit.id)?;
                Some(SimilarReference {
                    item: item.clone(),
                    image_url: image_url(&item.filename),
                    similarity: hit.score,
                })
            })
            .collect()
    }
}

pub struct Gallery {
    metadata_path: PathBuf,
    images: Box<dyn ImageStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    embed_timeout: Duration,
    events: EventWriter,
    state: RwLock<GalleryState>,
}

impl Gallery {
    /// Opens (or initializes) a gallery rooted at `root` with filesystem
    /// image storage.
    pub fn open(
        root: impl Into<PathBuf>,
        embedder: Arc<dyn EmbeddingProvider>,
        embed_timeout: Duration,
    ) -> GalleryResult<Self> {
        let root = root.into();
        let images = FsImageStore::new(root.join(IMAGES_DIR))?;
        Self::open_with_store(root, Box::new(images), embedder, embed_timeout)
    }

    pub fn open_with_store(
        root: impl Into<PathBuf>,
        images: Box<dyn ImageStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        embed_timeout: Duration,
    ) -> GalleryResult<Self> {
        let root = root.into();
        let metadata_path = root.join(METADATA_FILE);
        let items = load_metadata(&metadata_path)?;
        let vectors = VectorStore::open(root.join(EMBEDDINGS_DIR))?;

        let orphans = vectors
            .ids()
            .filter(|id| !items.iter().any(|item| item.id == *id))
            .count();
        if orphans > 0 {
            warn!(orphans, "embeddings without metadata are ignored");
        }

        let label = root
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "gallery".to_string());
        info!(
            root = %root.display(),
            items = items.len(),
            vectors = vectors.len(),
            provider = embedder.name(),
            "opened gallery"
        );
        Ok(Self {
            events: EventWriter::new(root.join(EVENTS_FILE), label),
            metadata_path,
            images,
            embedder,
            embed_timeout,
            state: RwLock::new(GalleryState { items, vectors }),
        })
    }

    pub fn events_path(&self) -> &Path {
        self.events.path()
    }

    pub fn len(&self) -> GalleryResult<usize> {
        Ok(self.read()?.items.len())
    }

    pub fn is_empty(&self) -> GalleryResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Rewrites `metadata.json` from the in-memory records.
    pub fn flush(&self) -> GalleryResult<()> {
        let state = self.read()?;
        save_metadata(&self.metadata_path, &state.items)
    }

    /// Stores a new reference. Embedding unavailability is tolerated; a
    /// persistence failure removes every artifact written for the new id
    /// before the error is returned.
    pub fn add_reference(
        &self,
        image: &[u8],
        analysis: ImageAnalysis,
        tier: SalesTier,
    ) -> GalleryResult<ReferenceItem> {
        let id = Uuid::new_v4().to_string();
        let description = search_description(&analysis);
        let vector = self.embed(&description, Some(image), Some(&id));
        let digest = hex::encode(Sha256::digest(image));

        let mut state = self.write()?;
        let filename = self.images.put(&id, image)?;

        if let Some(vector) = &vector {
            if let Err(err) = state.vectors.put(&id, vector) {
                self.rollback_add(&mut state, &id, &filename);
                return Err(err);
            }
        }

        let item = ReferenceItem {
            id: id.clone(),
            filename: filename.clone(),
            created_at: now_utc_iso(),
            analysis,
            sales_tier: tier,
            image_sha256: Some(digest),
        };
        state.items.push(item.clone());
        if let Err(err) = save_metadata(&self.metadata_path, &state.items) {
            state.items.pop();
            self.rollback_add(&mut state, &id, &filename);
            return Err(err);
        }
        drop(state);

        info!(id = %id, has_embedding = vector.is_some(), "added reference");
        self.events.record_quietly(
            GalleryEvent::ReferenceAdded,
            payload(json!({
                "id": id,
                "filename": filename,
                "sales_tier": tier.as_str(),
                "has_embedding": vector.is_some(),
            })),
        );
        Ok(item)
    }

    fn rollback_add(&self, state: &mut GalleryState, id: &str, filename: &str) {
        if let Err(err) = state.vectors.delete(id) {
            warn!(id, error = %err, "rollback could not remove vector");
        }
        if let Err(err) = self.images.delete(filename) {
            warn!(id, error = %err, "rollback could not remove image");
        }
        debug!(id, "rolled back partial reference");
    }

    /// Lists references in insertion order. `style` matches case-insensitively
    /// against the space-joined style tags.
    pub fn list_references(
        &self,
        style: Option<&str>,
        tier: Option<SalesTier>,
        limit: usize,
    ) -> GalleryResult<Vec<GalleryEntry>> {
        let needle = style
            .map(|text| text.trim().to_lowercase())
            .filter(|text| !text.is_empty());
        let state = self.read()?;
        Ok(state
            .items
            .iter()
            .filter(|item| tier.map_or(true, |tier| item.sales_tier == tier))
            .filter(|item| {
                needle.as_deref().map_or(true, |needle| {
                    item.analysis.joined_tags().to_lowercase().contains(needle)
                })
            })
            .take(limit)
            .map(|item| state.entry(item))
            .collect())
    }

    pub fn get_reference(&self, id: &str) -> GalleryResult<Option<GalleryEntry>> {
        let state = self.read()?;
        Ok(state
            .position(id)
            .map(|index| state.entry(&state.items[index])))
    }

    /// Removes the record, its vector and its image. Unknown ids return
    /// `Ok(false)`.
    pub fn delete_reference(&self, id: &str) -> GalleryResult<bool> {
        let mut state = self.write()?;
        let Some(index) = state.position(id) else {
            return Ok(false);
        };
        let removed = state.items.remove(index);
        if let Err(err) = save_metadata(&self.metadata_path, &state.items) {
            state.items.insert(index, removed);
            return Err(err);
        }
        if let Err(err) = state.vectors.delete(id) {
            warn!(id, error = %err, "vector left behind after delete");
        }
        drop(state);

        if let Err(err) = self.images.delete(&removed.filename) {
            warn!(id, error = %err, "image left behind after delete");
        }
        info!(id, "deleted reference");
        self.events.record_quietly(
            GalleryEvent::ReferenceDeleted,
            payload(json!({ "id": id, "filename": removed.filename })),
        );
        Ok(true)
    }

    /// Ranks stored references against `query`. Hits are joined with their
    /// metadata; vectors without a record never surface.
    pub fn find_similar(
        &self,
        query: &[f32],
        k: usize,
        threshold: f32,
    ) -> GalleryResult<Vec<SimilarReference>> {
        Ok(self.read()?.similar(query, k, threshold, None))
    }

    /// Embeds `text` and searches. An unavailable embedding yields no hits.
    pub fn find_similar_to_text(
        &self,
        text: &str,
        k: usize,
        threshold: f32,
    ) -> GalleryResult<Vec<SimilarReference>> {
        match self.embed(text, None, None) {
            Some(query) => self.find_similar(&query, k, threshold),
            None => Ok(Vec::new()),
        }
    }

    /// Uses the stored vector of `id` as the query, excluding `id` itself.
    pub fn find_similar_to_reference(
        &self,
        id: &str,
        k: usize,
        threshold: f32,
    ) -> GalleryResult<Vec<SimilarReference>> {
        let state = self.read()?;
        let Some(query) = state.vectors.get(id) else {
            return Ok(Vec::new());
        };
        let query = query.to_vec();
        Ok(state.similar(&query, k, threshold, Some(id)))
    }

    /// Replaces the analysis of `id` wholesale and re-embeds it. When the
    /// new embedding is unavailable the previous vector is kept.
    pub fn replace_analysis(&self, id: &str, analysis: ImageAnalysis) -> GalleryResult<bool> {
        if self.read()?.position(id).is_none() {
            return Ok(false);
        }
        let vector = self.embed(&search_description(&analysis), None, Some(id));

        let mut state = self.write()?;
        let Some(index) = state.position(id) else {
            return Ok(false);
        };
        let previous_vector = state.vectors.get(id).map(<[f32]>::to_vec);
        if let Some(vector) = &vector {
            state.vectors.put(id, vector)?;
        }
        let previous = std::mem::replace(&mut state.items[index].analysis, analysis);
        if let Err(err) = save_metadata(&self.metadata_path, &state.items) {
            state.items[index].analysis = previous;
            if vector.is_some() {
                let restored = match &previous_vector {
                    Some(old) => state.vectors.put(id, old),
                    None => state.vectors.delete(id).map(|_| ()),
                };
                if let Err(restore_err) = restored {
                    warn!(id, error = %restore_err, "could not restore previous vector");
                }
            }
            return Err(err);
        }
        drop(state);

        info!(id, reembedded = vector.is_some(), "replaced analysis");
        self.events.record_quietly(
            GalleryEvent::AnalysisReplaced,
            payload(json!({ "id": id, "reembedded": vector.is_some() })),
        );
        Ok(true)
    }

    /// Backfills embeddings for references that lack one, or for every
    /// reference when `force` is set.
    pub fn regenerate_embeddings(&self, force: bool) -> GalleryResult<ReembedSummary> {
        let mut summary = ReembedSummary::default();
        let pending: Vec<(String, String)> = {
            let state = self.read()?;
            state
                .items
                .iter()
                .filter(|item| {
                    let wanted = force || !state.vectors.contains(&item.id);
                    if !wanted {
                        summary.skipped += 1;
                    }
                    wanted
                })
                .map(|item| (item.id.clone(), search_description(&item.analysis)))
                .collect()
        };

        for (id, description) in pending {
            let Some(vector) = self.embed(&description, None, Some(&id)) else {
                summary.unavailable += 1;
                continue;
            };
            let mut state = self.write()?;
            if state.position(&id).is_none() {
                summary.skipped += 1;
                continue;
            }
            match state.vectors.put(&id, &vector) {
                Ok(()) => summary.embedded += 1,
                Err(err) => {
                    warn!(id = %id, error = %err, "failed to store regenerated embedding");
                    summary.failed += 1;
                }
            }
        }

        info!(
            embedded = summary.embedded,
            unavailable = summary.unavailable,
            failed = summary.failed,
            skipped = summary.skipped,
            "regenerated embeddings"
        );
        self.events.record_quietly(
            GalleryEvent::EmbeddingsRegenerated,
            payload(json!({
                "force": force,
                "embedded": summary.embedded,
                "unavailable": summary.unavailable,
                "failed": summary.failed,
                "skipped": summary.skipped,
            })),
        );
        Ok(summary)
    }

    /// Groups of reference ids whose stored images have identical bytes,
    /// in insertion order. Records written before digests were kept are
    /// hashed from their image file.
    pub fn duplicate_groups(&self) -> GalleryResult<Vec<Vec<String>>> {
        let state = self.read()?;
        let mut groups: IndexMap<String, Vec<String>> = IndexMap::new();
        for item in &state.items {
            let digest = match &item.image_sha256 {
                Some(digest) => digest.clone(),
                None => match self.images.read(&item.filename) {
                    Ok(bytes) => hex::encode(Sha256::digest(&bytes)),
                    Err(err) => {
                        warn!(id = %item.id, error = %err, "cannot hash image for duplicate check");
                        continue;
                    }
                },
            };
            groups.entry(digest).or_default().push(item.id.clone());
        }
        Ok(groups
            .into_values()
            .filter(|ids| ids.len() >= 2)
            .collect())
    }

    /// Vectors the store would reject count as unavailable, so a bad
    /// provider response never fails a mutation.
    fn embed(&self, text: &str, image: Option<&[u8]>, id: Option<&str>) -> Option<Vec<f32>> {
        let request = EmbeddingRequest {
            text,
            image,
            timeout: self.embed_timeout,
        };
        let reason = match self.embedder.embed(&request) {
            Ok(EmbeddingOutcome::Vector(vector)) => match normalized(&vector) {
                Ok(values) => return Some(values),
                Err(err) => err.to_string(),
            },
            Ok(EmbeddingOutcome::Unavailable(reason)) => reason,
            Err(err) => err.to_string(),
        };
        warn!(
            provider = self.embedder.name(),
            id = id.unwrap_or(""),
            reason = %reason,
            "embedding unavailable"
        );
        if let Some(id) = id {
            self.events.record_quietly(
                GalleryEvent::EmbeddingUnavailable,
                payload(json!({
                    "id": id,
                    "provider": self.embedder.name(),
                    "reason": reason,
                })),
            );
        }
        None
    }

    fn read(&self) -> GalleryResult<RwLockReadGuard<'_, GalleryState>> {
        self.state.read().map_err(|_| GalleryError::Poisoned)
    }

    fn write(&self) -> GalleryResult<RwLockWriteGuard<'_, GalleryState>> {
        self.state.write().map_err(|_| GalleryError::Poisoned)
    }
}

pub fn image_url(filename: &str) -> String {
    format!("{IMAGE_URL_PREFIX}{filename}")
}

fn payload(value: Value) -> EventPayload {
    match value {
        Value::Object(map) => map,
        _ => EventPayload::new(),
    }
}
