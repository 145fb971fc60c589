//! # lumen-jobs
//!
//! The processing pipeline for lumen.
//!
//! This crate provides:
//! - A scheduler draining the processing queue in batches or as a single
//!   continuous background run with live progress and cooperative stop
//! - Enrichment steps: thumbnails, image embeddings, faces, auto-tags
//! - Face identity resolution and manual person corrections
//! - Video frame extraction via ffmpeg
//!
//! ## Example
//!
//! ```rust,ignore
//! use lumen_jobs::{Enricher, FaceIdentityResolver, ProcessingScheduler, ThumbnailGenerator};
//!
//! let resolver = FaceIdentityResolver::new(library.clone(), ResolverConfig::from_env());
//! let enricher = Enricher::new(
//!     library.clone(),
//!     capabilities,
//!     ThumbnailGenerator::from_config(&LibraryConfig::from_env()),
//!     resolver,
//!     TaggerConfig::from_env(),
//! );
//! let scheduler = ProcessingScheduler::new(library, enricher, SchedulerConfig::from_env());
//!
//! scheduler.queue_all_unprocessed().await?;
//! let handle = scheduler.start_continuous(None);
//! ```

pub mod enrichment;
pub mod identity;
pub mod progress;
pub mod scheduler;
pub mod thumbnails;

// Re-export core types
pub use lumen_core::*;

pub use enrichment::Enricher;
pub use identity::{FaceIdentityResolver, Resolution};
pub use progress::{ProgressSnapshot, ProgressTracker};
pub use scheduler::{ItemOutcome, ProcessingEvent, ProcessingScheduler};
pub use thumbnails::{FfmpegFrameExtractor, FrameExtractor, ThumbnailGenerator};
