//! # lumen-core
//!
//! Core types, traits, and abstractions for the lumen photo library.
//!
//! This crate provides the data model, the error type, the repository and
//! capability traits every other crate programs against, and the shared
//! defaults and configuration.

pub mod config;
pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod similarity;
pub mod traits;

// Re-export commonly used types at crate root
pub use config::{LibraryConfig, ResolverConfig, SchedulerConfig, SearchConfig, TaggerConfig};
pub use error::{Error, Result};
pub use models::*;
pub use traits::*;
