//! Structured logging schema and field name constants for lumen.
//!
//! Every crate logs with these field names so that a library's processing
//! history can be queried uniformly regardless of which subsystem emitted
//! the event.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue: an enrichment step failed, the item continues |
//! | INFO  | Run lifecycle (started, stopped), item completions |
//! | DEBUG | Decision points (resolver match/new person, dispatch choice) |
//! | TRACE | Per-candidate iteration (neighbor distances, search hits) |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "db", "inference", "jobs", "search", "cli"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "scheduler", "resolver", "hybrid_search", "vision", "pool"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "run_batch", "resolve", "semantic_search", "embed_image"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Photo id being operated on.
pub const PHOTO_ID: &str = "photo_id";

/// Processing queue item id.
pub const QUEUE_ITEM_ID: &str = "queue_item_id";

/// Queue task type (`full`, `thumbnails`, ...).
pub const TASK_TYPE: &str = "task_type";

/// Enrichment step name.
pub const STEP: &str = "step";

/// Person id touched by identity resolution or a merge.
pub const PERSON_ID: &str = "person_id";

/// Face row id.
pub const FACE_ID: &str = "face_id";

/// Vector index collection ("image" or "face").
pub const COLLECTION: &str = "collection";

/// Search query text.
pub const QUERY: &str = "query";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of results returned by a search or query.
pub const RESULT_COUNT: &str = "result_count";

/// Number of queue items processed in a run.
pub const PROCESSED_COUNT: &str = "processed";

/// Number of faces detected in one photo.
pub const FACE_COUNT: &str = "face_count";

/// Cosine distance of the accepted neighbor.
pub const DISTANCE: &str = "distance";

// ─── Database fields ───────────────────────────────────────────────────────

/// Number of active connections in the pool.
pub const POOL_SIZE: &str = "pool_size";

/// Number of idle connections in the pool.
pub const POOL_IDLE: &str = "pool_idle";

// ─── Inference fields ──────────────────────────────────────────────────────

/// Model name used for inference.
pub const MODEL: &str = "model";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
