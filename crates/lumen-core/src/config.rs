//! Environment-driven configuration.
//!
//! Each config has a `from_env()` constructor with documented defaults from
//! [`crate::defaults`] and builder-style `with_*` setters. `from_vars` takes
//! an arbitrary lookup so tests never touch the process environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::defaults;

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

// =============================================================================
// LIBRARY
// =============================================================================

/// Storage locations and media tooling.
#[derive(Debug, Clone)]
pub struct LibraryConfig {
    pub database_url: Option<String>,
    pub thumbnail_path: PathBuf,
    /// Bounding-box sizes; the first three map to small/medium/large.
    pub thumbnail_sizes: Vec<u32>,
    pub video_frame_timeout: Duration,
    pub ffmpeg_path: String,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            thumbnail_path: PathBuf::from(defaults::THUMBNAIL_PATH),
            thumbnail_sizes: defaults::THUMBNAIL_SIZES.to_vec(),
            video_frame_timeout: Duration::from_secs(defaults::VIDEO_FRAME_TIMEOUT_SECS),
            ffmpeg_path: defaults::FFMPEG_PATH.to_string(),
        }
    }
}

impl LibraryConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `DATABASE_URL` | unset | PostgreSQL connection string |
    /// | `THUMBNAIL_PATH` | `./data/thumbnails` | Thumbnail output directory |
    /// | `THUMBNAIL_SIZES` | `200,400,800` | Comma-separated sizes in pixels |
    /// | `VIDEO_FRAME_TIMEOUT_SECS` | `30` | ffmpeg frame extraction bound |
    /// | `FFMPEG_PATH` | `ffmpeg` | ffmpeg executable |
    pub fn from_env() -> Self {
        Self::from_vars(env_lookup)
    }

    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let base = Self::default();

        let thumbnail_sizes = lookup("THUMBNAIL_SIZES")
            .map(|v| {
                v.split(',')
                    .filter_map(|s| s.trim().parse::<u32>().ok())
                    .filter(|s| *s > 0)
                    .collect::<Vec<_>>()
            })
            .filter(|sizes| !sizes.is_empty())
            .unwrap_or(base.thumbnail_sizes);

        Self {
            database_url: lookup("DATABASE_URL").filter(|v| !v.is_empty()),
            thumbnail_path: lookup("THUMBNAIL_PATH")
                .map(PathBuf::from)
                .unwrap_or(base.thumbnail_path),
            thumbnail_sizes,
            video_frame_timeout: Duration::from_secs(parse_or(
                &lookup,
                "VIDEO_FRAME_TIMEOUT_SECS",
                defaults::VIDEO_FRAME_TIMEOUT_SECS,
            )),
            ffmpeg_path: lookup("FFMPEG_PATH").unwrap_or(base.ffmpeg_path),
        }
    }

    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    pub fn with_thumbnail_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.thumbnail_path = path.into();
        self
    }

    pub fn with_thumbnail_sizes(mut self, sizes: Vec<u32>) -> Self {
        self.thumbnail_sizes = sizes;
        self
    }

    pub fn with_video_frame_timeout(mut self, timeout: Duration) -> Self {
        self.video_frame_timeout = timeout;
        self
    }

    pub fn with_ffmpeg_path(mut self, path: impl Into<String>) -> Self {
        self.ffmpeg_path = path.into();
        self
    }
}

// =============================================================================
// FACE IDENTITY RESOLVER
// =============================================================================

/// Tuning for greedy nearest-neighbor face clustering.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolverConfig {
    /// A neighbor matches only if its cosine distance is strictly below this.
    pub match_threshold: f32,
    /// Neighbors inspected per new face.
    pub neighbor_count: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            match_threshold: defaults::FACE_MATCH_THRESHOLD,
            neighbor_count: defaults::FACE_NEIGHBOR_COUNT,
        }
    }
}

impl ResolverConfig {
    /// | Variable | Default |
    /// |----------|---------|
    /// | `FACE_MATCH_THRESHOLD` | `0.6` |
    /// | `FACE_NEIGHBOR_COUNT` | `10` |
    pub fn from_env() -> Self {
        Self::from_vars(env_lookup)
    }

    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            match_threshold: parse_or(
                &lookup,
                "FACE_MATCH_THRESHOLD",
                defaults::FACE_MATCH_THRESHOLD,
            ),
            neighbor_count: parse_or(&lookup, "FACE_NEIGHBOR_COUNT", defaults::FACE_NEIGHBOR_COUNT)
                .max(1),
        }
    }

    pub fn with_match_threshold(mut self, threshold: f32) -> Self {
        self.match_threshold = threshold;
        self
    }

    pub fn with_neighbor_count(mut self, k: usize) -> Self {
        self.neighbor_count = k.max(1);
        self
    }
}

// =============================================================================
// AUTO-TAGGING
// =============================================================================

/// Pipeline tagging thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TaggerConfig {
    pub threshold: f32,
    pub top_k: usize,
}

impl Default for TaggerConfig {
    fn default() -> Self {
        Self {
            threshold: defaults::TAG_THRESHOLD,
            top_k: defaults::TAG_TOP_K,
        }
    }
}

impl TaggerConfig {
    /// | Variable | Default |
    /// |----------|---------|
    /// | `TAG_THRESHOLD` | `0.18` |
    /// | `TAG_TOP_K` | `8` |
    pub fn from_env() -> Self {
        Self::from_vars(env_lookup)
    }

    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            threshold: parse_or(&lookup, "TAG_THRESHOLD", defaults::TAG_THRESHOLD),
            top_k: parse_or(&lookup, "TAG_TOP_K", defaults::TAG_TOP_K),
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }
}

// =============================================================================
// SCHEDULER
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub batch_size: usize,
    pub event_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_size: defaults::PROCESSING_BATCH_SIZE,
            event_capacity: defaults::EVENT_CAPACITY,
        }
    }
}

impl SchedulerConfig {
    /// | Variable | Default |
    /// |----------|---------|
    /// | `PROCESSING_BATCH_SIZE` | `10` |
    /// | `EVENT_CAPACITY` | `256` |
    pub fn from_env() -> Self {
        Self::from_vars(env_lookup)
    }

    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            batch_size: parse_or(
                &lookup,
                "PROCESSING_BATCH_SIZE",
                defaults::PROCESSING_BATCH_SIZE,
            )
            .max(1),
            event_capacity: parse_or(&lookup, "EVENT_CAPACITY", defaults::EVENT_CAPACITY).max(1),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }
}

// =============================================================================
// SEARCH
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchConfig {
    /// Semantic candidates fetched per requested result in combined search.
    pub oversample: usize,
    pub default_limit: i64,
    pub suggestion_limit: i64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            oversample: defaults::SEARCH_OVERSAMPLE,
            default_limit: defaults::PAGE_LIMIT,
            suggestion_limit: defaults::SUGGESTION_LIMIT,
        }
    }
}

impl SearchConfig {
    /// | Variable | Default |
    /// |----------|---------|
    /// | `SEARCH_OVERSAMPLE` | `3` |
    pub fn from_env() -> Self {
        Self::from_vars(env_lookup)
    }

    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            oversample: parse_or(&lookup, "SEARCH_OVERSAMPLE", defaults::SEARCH_OVERSAMPLE).max(1),
            ..Self::default()
        }
    }

    pub fn with_oversample(mut self, factor: usize) -> Self {
        self.oversample = factor.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_library_config_defaults() {
        let config = LibraryConfig::from_vars(vars(&[]));
        assert_eq!(config.thumbnail_sizes, vec![200, 400, 800]);
        assert_eq!(config.thumbnail_path, PathBuf::from("./data/thumbnails"));
        assert_eq!(config.video_frame_timeout, Duration::from_secs(30));
        assert_eq!(config.ffmpeg_path, "ffmpeg");
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_library_config_parses_sizes_and_skips_garbage() {
        let config = LibraryConfig::from_vars(vars(&[("THUMBNAIL_SIZES", "128, x, 0, 512")]));
        assert_eq!(config.thumbnail_sizes, vec![128, 512]);

        let config = LibraryConfig::from_vars(vars(&[("THUMBNAIL_SIZES", "nope")]));
        assert_eq!(config.thumbnail_sizes, vec![200, 400, 800]);
    }

    #[test]
    fn test_resolver_config_overrides() {
        let config = ResolverConfig::from_vars(vars(&[
            ("FACE_MATCH_THRESHOLD", "0.45"),
            ("FACE_NEIGHBOR_COUNT", "0"),
        ]));
        assert_eq!(config.match_threshold, 0.45);
        assert_eq!(config.neighbor_count, 1);
    }

    #[test]
    fn test_resolver_config_defaults() {
        let config = ResolverConfig::default();
        assert_eq!(config.match_threshold, 0.6);
        assert_eq!(config.neighbor_count, 10);
    }

    #[test]
    fn test_tagger_config_defaults_and_invalid_values() {
        let config = TaggerConfig::from_vars(vars(&[("TAG_TOP_K", "many")]));
        assert_eq!(config.threshold, 0.18);
        assert_eq!(config.top_k, 8);
    }

    #[test]
    fn test_scheduler_and_search_builders() {
        let scheduler = SchedulerConfig::default().with_batch_size(0);
        assert_eq!(scheduler.batch_size, 1);

        let search = SearchConfig::from_vars(vars(&[("SEARCH_OVERSAMPLE", "5")]));
        assert_eq!(search.oversample, 5);
        assert_eq!(search.default_limit, 50);
    }
}
