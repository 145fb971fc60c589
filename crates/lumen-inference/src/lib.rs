//! # lumen-inference
//!
//! Capability implementations for the lumen processing pipeline.
//!
//! This crate provides:
//! - An HTTP vision backend producing image/text embeddings and face detections
//! - A zero-shot auto-tagger built on any embedding backend
//! - Deterministic mock backends (feature `mock`)
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use lumen_inference::{AutoTagger, VisionBackend};
//! use lumen_core::TagPredictor;
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = Arc::new(VisionBackend::from_env());
//!     let tagger = AutoTagger::new(backend);
//!     let tags = tagger
//!         .predict_tags(std::path::Path::new("beach.jpg"), 0.18, 8)
//!         .await
//!         .unwrap();
//! }
//! ```

pub mod tagger;
pub mod vision;

// Mock vision backend for testing
#[cfg(any(test, feature = "mock"))]
pub mod mock;

// Re-export core types
pub use lumen_core::*;

pub use tagger::AutoTagger;
pub use vision::{VisionBackend, VisionBackendConfig};

#[cfg(any(test, feature = "mock"))]
pub use mock::MockVisionBackend;
