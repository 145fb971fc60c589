//! Core traits for lumen abstractions.
//!
//! Repository traits describe the relational store; capability traits
//! describe the external models and the vector index. The scheduler, the
//! identity resolver and the search engine only see these traits, so the
//! PostgreSQL and in-process backends are interchangeable.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::*;

// =============================================================================
// RELATIONAL STORE
// =============================================================================

/// Repository for photo rows.
#[async_trait]
pub trait PhotoRepository: Send + Sync {
    /// Register a photo.
    async fn insert(&self, photo: NewPhoto) -> Result<Photo>;

    /// Get a photo by id.
    async fn get(&self, id: i64) -> Result<Option<Photo>>;

    /// Fetch the photos that exist among `ids`, in no particular order.
    async fn get_many(&self, ids: &[i64]) -> Result<Vec<Photo>>;

    /// Ids of photos with `is_processed = false`, oldest first.
    async fn list_unprocessed_ids(&self) -> Result<Vec<i64>>;

    /// Ids of still images with `has_faces_processed = false`, oldest first.
    async fn list_faces_pending_ids(&self) -> Result<Vec<i64>>;

    /// Clear `is_processed` so the photo is picked up again.
    async fn reset_processed(&self, id: i64) -> Result<()>;

    /// Ids of every video, oldest first.
    async fn list_video_ids(&self) -> Result<Vec<i64>>;
}

/// Repository for face rows.
#[async_trait]
pub trait FaceRepository: Send + Sync {
    /// Create an unassigned face with no vector entry.
    async fn insert(&self, face: NewFace) -> Result<Face>;

    /// Record the face's vector index id once the index insert succeeded.
    async fn set_embedding_id(&self, face_id: i64, embedding_id: &str) -> Result<()>;

    async fn get(&self, id: i64) -> Result<Option<Face>>;

    /// Fetch the faces that exist among `ids`, in no particular order.
    async fn get_many(&self, ids: &[i64]) -> Result<Vec<Face>>;

    async fn list_for_photo(&self, photo_id: i64) -> Result<Vec<Face>>;

    async fn list_for_person(&self, person_id: i64) -> Result<Vec<Face>>;
}

/// Repository for people (face clusters).
///
/// Every mutating method is atomic: face assignment, the photo association
/// set and `photo_count` change together or not at all.
#[async_trait]
pub trait PersonRepository: Send + Sync {
    /// Create an unnamed person seeded by `face`: the face becomes its
    /// representative, is assigned to it, and its photo is linked
    /// (`photo_count = 1`).
    async fn create_for_face(&self, face: &Face) -> Result<Person>;

    /// Assign `face` to `person_id`, link its photo if not already linked and
    /// recompute `photo_count` from the association set.
    async fn assign_face(&self, face: &Face, person_id: i64) -> Result<Person>;

    async fn get(&self, id: i64) -> Result<Option<Person>>;

    async fn list(&self) -> Result<Vec<Person>>;

    /// Give a person a display name and mark it as named.
    async fn rename(&self, id: i64, name: &str) -> Result<Person>;

    /// Photo ids associated with the person, ascending.
    async fn photo_ids(&self, person_id: i64) -> Result<Vec<i64>>;

    /// Move every face and photo association of `source_id` onto `target_id`,
    /// recompute the target's `photo_count` and delete the source.
    async fn merge(&self, target_id: i64, source_id: i64) -> Result<Person>;

    /// Unassign the person's faces, drop its photo associations and delete it.
    async fn delete(&self, id: i64) -> Result<()>;
}

/// Repository for tags.
#[async_trait]
pub trait TagRepository: Send + Sync {
    /// Find a tag by name, creating it with `category` if absent.
    async fn get_or_create(&self, name: &str, category: Option<&str>) -> Result<Tag>;

    /// Attach a tag to a photo. Returns false if it was already attached.
    async fn link_photo(&self, photo_id: i64, tag_id: i64) -> Result<bool>;

    async fn list_for_photo(&self, photo_id: i64) -> Result<Vec<Tag>>;
}

/// Repository for the processing queue.
#[async_trait]
pub trait QueueRepository: Send + Sync {
    /// Insert a pending item. Never deduplicates.
    async fn enqueue(&self, photo_id: i64, task_type: TaskType, priority: i32) -> Result<i64>;

    async fn get(&self, id: i64) -> Result<Option<QueueItem>>;

    /// Up to `limit` pending items by priority descending, then insertion order.
    async fn next_pending(&self, limit: usize) -> Result<Vec<QueueItem>>;

    /// Transition `pending -> processing` and stamp `started_at`.
    async fn mark_processing(&self, id: i64) -> Result<QueueItem>;

    /// Transition `processing -> completed`, writing `photo_update` to the
    /// item's photo in the same transaction.
    async fn complete(&self, id: i64, photo_update: Option<&PhotoProcessingUpdate>) -> Result<()>;

    /// Transition `processing -> failed` with `error`, writing whatever photo
    /// state the pass reached in the same transaction.
    async fn fail(
        &self,
        id: i64,
        error: &str,
        photo_update: Option<&PhotoProcessingUpdate>,
    ) -> Result<()>;

    async fn pending_count(&self) -> Result<i64>;

    /// Delete the photo's pending items. History is kept.
    async fn remove_pending_for_photo(&self, photo_id: i64) -> Result<u64>;

    async fn list_for_photo(&self, photo_id: i64) -> Result<Vec<QueueItem>>;

    async fn stats(&self) -> Result<QueueStats>;

    /// In one transaction: clear the photo's `is_processed` flag and
    /// thumbnail paths, delete its queue items that are not in flight, and
    /// insert a fresh pending item. Returns the new item id.
    async fn requeue_for_reprocess(
        &self,
        photo_id: i64,
        task_type: TaskType,
        priority: i32,
    ) -> Result<i64>;
}

/// Relational side of photo search.
#[async_trait]
pub trait PhotoSearchRepository: Send + Sync {
    /// Photos matching `criteria`, newest capture date first.
    async fn filter(
        &self,
        criteria: &SearchCriteria,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Photo>>;

    /// The subset of `candidates` that exist and match `criteria`, unordered.
    async fn filter_ids(&self, candidates: &[i64], criteria: &SearchCriteria) -> Result<Vec<i64>>;

    /// Case-insensitive substring lookups per category, each capped at `limit`.
    async fn suggestions(&self, partial: &str, limit: i64) -> Result<Suggestions>;

    /// Row counts across the library.
    async fn library_stats(&self) -> Result<LibraryStats>;
}

// =============================================================================
// CAPABILITIES
// =============================================================================

/// Backend producing L2-normalized image and text embeddings in one space.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    async fn embed_image(&self, image: &Path) -> Result<Vector>;

    async fn embed_images(&self, images: &[PathBuf]) -> Result<Vec<Vector>> {
        let mut out = Vec::with_capacity(images.len());
        for image in images {
            out.push(self.embed_image(image).await?);
        }
        Ok(out)
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vector>>;

    async fn embed_text(&self, text: &str) -> Result<Vector> {
        let mut vectors = self.embed_texts(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| crate::Error::Embedding("backend returned no embedding".into()))
    }

    /// Get the expected dimension of embedding vectors.
    fn dimension(&self) -> usize;

    /// Get the model name being used.
    fn model_name(&self) -> &str;
}

/// Face detector.
#[async_trait]
pub trait FaceDetector: Send + Sync {
    async fn detect(&self, image: &Path) -> Result<Vec<FaceDetection>>;
}

/// Zero-shot tagger.
#[async_trait]
pub trait TagPredictor: Send + Sync {
    /// Predictions at or above `threshold`, by confidence descending, at most `top_k`.
    async fn predict_tags(
        &self,
        image: &Path,
        threshold: f32,
        top_k: usize,
    ) -> Result<Vec<TagPrediction>>;
}

/// Similarity-searchable vector store, partitioned by [`Collection`].
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace the vector stored under `id`.
    async fn upsert(
        &self,
        collection: Collection,
        id: &str,
        vector: &Vector,
        metadata: VectorMetadata,
    ) -> Result<()>;

    /// The `k` nearest entries by cosine distance, closest first.
    async fn query(
        &self,
        collection: Collection,
        vector: &Vector,
        k: usize,
    ) -> Result<Vec<VectorMatch>>;

    async fn delete(&self, collection: Collection, id: &str) -> Result<()>;

    async fn count(&self, collection: Collection) -> Result<i64>;
}

// =============================================================================
// BUNDLE
// =============================================================================

/// Every store the pipeline and search engine need, behind trait objects.
#[derive(Clone)]
pub struct Library {
    pub photos: Arc<dyn PhotoRepository>,
    pub faces: Arc<dyn FaceRepository>,
    pub people: Arc<dyn PersonRepository>,
    pub tags: Arc<dyn TagRepository>,
    pub queue: Arc<dyn QueueRepository>,
    pub search: Arc<dyn PhotoSearchRepository>,
    pub vectors: Arc<dyn VectorIndex>,
}

/// External models, injected once at startup.
#[derive(Clone)]
pub struct Capabilities {
    pub embedder: Arc<dyn EmbeddingBackend>,
    pub face_detector: Arc<dyn FaceDetector>,
    pub tagger: Arc<dyn TagPredictor>,
}
