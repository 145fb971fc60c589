//! # lumen-search
//!
//! Hybrid photo search for lumen.
//!
//! This crate provides:
//! - Filter search over people, pets, tags, location, dates and media kind
//! - Semantic search over image embeddings
//! - Combined search: semantic ranking restricted by relational filters
//! - Autocomplete suggestions
//!
//! ## Example
//!
//! ```ignore
//! use lumen_search::{HybridSearchEngine, SearchRequest};
//!
//! let engine = HybridSearchEngine::new(library, embedder, SearchConfig::from_env());
//!
//! let photos = SearchRequest::text("beach at sunset")
//!     .with_criteria(SearchCriteria::new().with_person_ids([7]))
//!     .with_limit(20)
//!     .execute(&engine)
//!     .await?;
//! ```

pub mod hybrid;
pub mod ranking;

// Re-export core types
pub use lumen_core::*;

pub use hybrid::{HybridSearch, HybridSearchEngine, SearchRequest};
