//! Centralized default constants for the lumen system.
//!
//! **This module is the single source of truth** for shared default values.
//! Configuration structs read their fallbacks from here; nothing else should
//! hard-code these numbers.

// =============================================================================
// FACE IDENTITY RESOLUTION
// =============================================================================

/// Cosine distance below which a neighbor face is accepted as the same person.
pub const FACE_MATCH_THRESHOLD: f32 = 0.6;

/// Number of nearest neighbors inspected when resolving a new face.
pub const FACE_NEIGHBOR_COUNT: usize = 10;

// =============================================================================
// AUTO-TAGGING
// =============================================================================

/// Minimum similarity for a tag prediction during pipeline processing.
pub const TAG_THRESHOLD: f32 = 0.18;

/// Maximum number of tags attached to one photo during pipeline processing.
pub const TAG_TOP_K: usize = 8;

/// Minimum similarity for `predict_tags` when called directly.
pub const TAG_THRESHOLD_DIRECT: f32 = 0.25;

/// Maximum number of predictions for `predict_tags` when called directly.
pub const TAG_TOP_K_DIRECT: usize = 10;

/// Minimum similarity for pet detection.
pub const PET_THRESHOLD: f32 = 0.3;

/// Prompt template for zero-shot tag embeddings.
pub const TAG_PROMPT_PREFIX: &str = "a photo of ";

// =============================================================================
// THUMBNAILS / VIDEO
// =============================================================================

/// Directory where thumbnails are written.
pub const THUMBNAIL_PATH: &str = "./data/thumbnails";

/// Thumbnail bounding-box sizes in pixels (small, medium, large).
pub const THUMBNAIL_SIZES: [u32; 3] = [200, 400, 800];

/// JPEG quality for thumbnails.
pub const THUMBNAIL_JPEG_QUALITY: u8 = 85;

/// Upper bound on a single ffmpeg frame extraction.
pub const VIDEO_FRAME_TIMEOUT_SECS: u64 = 30;

/// Seek offset for the representative video frame.
pub const VIDEO_FRAME_SEEK: &str = "00:00:01";

/// ffmpeg executable.
pub const FFMPEG_PATH: &str = "ffmpeg";

// =============================================================================
// SCHEDULER
// =============================================================================

/// Default `run_batch` size.
pub const PROCESSING_BATCH_SIZE: usize = 10;

/// Capacity of the processing event broadcast channel.
pub const EVENT_CAPACITY: usize = 256;

/// Default queue priority.
pub const QUEUE_PRIORITY: i32 = 0;

/// Priority of the `full` passes enqueued when videos are requeued.
pub const VIDEO_REQUEUE_PRIORITY: i32 = 1;

// =============================================================================
// SEARCH
// =============================================================================

/// Semantic candidates fetched per requested result in combined search.
pub const SEARCH_OVERSAMPLE: usize = 3;

/// Upper bound on semantic candidates requested from the vector index per query.
pub const SEARCH_MAX_CANDIDATES: usize = 10_000;

/// Default page size for search endpoints.
pub const PAGE_LIMIT: i64 = 50;

/// Default page offset.
pub const PAGE_OFFSET: i64 = 0;

/// Default per-category limit for suggestions.
pub const SUGGESTION_LIMIT: i64 = 10;

// =============================================================================
// EMBEDDING / VISION BACKEND
// =============================================================================

/// Default vision model server URL.
pub const VISION_BASE_URL: &str = "http://localhost:8100";

/// Default embedding model name reported by the vision server.
pub const EMBED_MODEL: &str = "clip-vit-base-patch32";

/// Default image/text embedding dimension (CLIP ViT-B/32).
pub const EMBED_DIMENSION: usize = 512;

/// Face embedding dimension.
pub const FACE_EMBED_DIMENSION: usize = 512;

/// Request timeout for the vision server.
pub const VISION_TIMEOUT_SECS: u64 = 120;

/// Concurrent requests issued by batch embedding calls.
pub const VISION_BATCH_CONCURRENCY: usize = 4;

// =============================================================================
// DATABASE POOL
// =============================================================================

/// Default maximum number of connections in the pool.
pub const POOL_MAX_CONNECTIONS: u32 = 10;

/// Default connection timeout in seconds.
pub const POOL_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default idle timeout in seconds.
pub const POOL_IDLE_TIMEOUT_SECS: u64 = 600;

/// Default maximum connection lifetime in seconds.
pub const POOL_MAX_LIFETIME_SECS: u64 = 1800;

// =============================================================================
// VECTOR INDEX
// =============================================================================

/// Lower bound on `hnsw.ef_search` for k-NN queries.
pub const HNSW_EF_SEARCH_MIN: usize = 40;

/// pgvector's upper bound on `hnsw.ef_search`. Larger k falls back to an
/// exact scan.
pub const HNSW_EF_SEARCH_MAX: usize = 1000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thumbnail_sizes_ascending() {
        assert!(THUMBNAIL_SIZES.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_pipeline_tagging_is_looser_than_direct() {
        assert!(TAG_THRESHOLD < TAG_THRESHOLD_DIRECT);
        assert!(TAG_TOP_K < TAG_TOP_K_DIRECT);
    }

    #[test]
    fn test_face_threshold_is_valid_cosine_distance() {
        assert!(FACE_MATCH_THRESHOLD > 0.0 && FACE_MATCH_THRESHOLD < 2.0);
    }
}
