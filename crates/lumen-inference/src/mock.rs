//! Mock vision backend for deterministic testing.
//!
//! Unmapped inputs get a pseudo-random unit vector derived from a hash of the
//! text or file name, so the same input always embeds the same way and
//! unrelated inputs are nearly orthogonal at realistic dimensions.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use lumen_inference::mock::MockVisionBackend;
//!
//! let backend = MockVisionBackend::new()
//!     .with_dimension(512)
//!     .with_image_embedding("beach.jpg", beach_vector.clone())
//!     .with_text_embedding("beach", beach_vector);
//! ```

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use lumen_core::defaults;
use lumen_core::similarity::normalize;
use lumen_core::{EmbeddingBackend, Error, FaceDetection, FaceDetector, Result, Vector};

#[derive(Debug, Clone, Default)]
struct MockConfig {
    dimension: usize,
    image_embeddings: HashMap<String, Vec<f32>>,
    text_embeddings: HashMap<String, Vec<f32>>,
    faces: HashMap<String, Vec<FaceDetection>>,
    fail_embeddings: bool,
    fail_faces: bool,
}

#[derive(Debug, Default)]
struct CallCounts {
    image: AtomicUsize,
    text_batches: AtomicUsize,
    detect: AtomicUsize,
}

/// Deterministic embedding backend and face detector.
#[derive(Debug, Clone)]
pub struct MockVisionBackend {
    config: Arc<MockConfig>,
    calls: Arc<CallCounts>,
}

impl Default for MockVisionBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockVisionBackend {
    pub fn new() -> Self {
        Self {
            config: Arc::new(MockConfig {
                dimension: defaults::EMBED_DIMENSION,
                ..Default::default()
            }),
            calls: Arc::new(CallCounts::default()),
        }
    }

    pub fn with_dimension(mut self, dimension: usize) -> Self {
        Arc::make_mut(&mut self.config).dimension = dimension;
        self
    }

    /// Fixed embedding for images whose file name equals `file_name`.
    pub fn with_image_embedding(mut self, file_name: impl Into<String>, vector: Vec<f32>) -> Self {
        Arc::make_mut(&mut self.config)
            .image_embeddings
            .insert(file_name.into(), unit(vector));
        self
    }

    /// Fixed embedding for an exact text input.
    pub fn with_text_embedding(mut self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        Arc::make_mut(&mut self.config)
            .text_embeddings
            .insert(text.into(), unit(vector));
        self
    }

    /// Faces returned for images whose file name equals `file_name`. Others have none.
    pub fn with_faces(mut self, file_name: impl Into<String>, faces: Vec<FaceDetection>) -> Self {
        Arc::make_mut(&mut self.config)
            .faces
            .insert(file_name.into(), faces);
        self
    }

    /// Every embedding call fails with [`Error::Embedding`].
    pub fn failing_embeddings(mut self) -> Self {
        Arc::make_mut(&mut self.config).fail_embeddings = true;
        self
    }

    /// Every detection call fails with [`Error::FaceDetection`].
    pub fn failing_faces(mut self) -> Self {
        Arc::make_mut(&mut self.config).fail_faces = true;
        self
    }

    pub fn image_calls(&self) -> usize {
        self.calls.image.load(Ordering::SeqCst)
    }

    pub fn text_batch_calls(&self) -> usize {
        self.calls.text_batches.load(Ordering::SeqCst)
    }

    pub fn detect_calls(&self) -> usize {
        self.calls.detect.load(Ordering::SeqCst)
    }

    /// The vector an unmapped input of this key embeds to.
    pub fn hashed_embedding(&self, key: &str) -> Vec<f32> {
        hashed(key, self.config.dimension)
    }
}

fn file_key(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

fn unit(mut v: Vec<f32>) -> Vec<f32> {
    normalize(&mut v);
    v
}

/// Unit vector seeded from `key` with a 64-bit LCG.
fn hashed(key: &str, dimension: usize) -> Vec<f32> {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    let mut state = hasher.finish() | 1;
    let v = (0..dimension)
        .map(|_| {
            state = state
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            ((state >> 33) as f32 / (1u64 << 31) as f32) - 0.5
        })
        .collect();
    unit(v)
}

/// Clone of `v` padded or truncated to `dimension`.
fn fit(v: &[f32], dimension: usize) -> Vec<f32> {
    let mut out = v.to_vec();
    out.resize(dimension, 0.0);
    out
}

#[async_trait]
impl EmbeddingBackend for MockVisionBackend {
    async fn embed_image(&self, image: &Path) -> Result<Vector> {
        self.calls.image.fetch_add(1, Ordering::SeqCst);
        if self.config.fail_embeddings {
            return Err(Error::Embedding("mock embedding failure".into()));
        }
        let key = file_key(image);
        let v = match self.config.image_embeddings.get(&key) {
            Some(v) => fit(v, self.config.dimension),
            None => hashed(&key, self.config.dimension),
        };
        Ok(Vector::from(v))
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vector>> {
        self.calls.text_batches.fetch_add(1, Ordering::SeqCst);
        if self.config.fail_embeddings {
            return Err(Error::Embedding("mock embedding failure".into()));
        }
        Ok(texts
            .iter()
            .map(|text| {
                let v = match self.config.text_embeddings.get(text) {
                    Some(v) => fit(v, self.config.dimension),
                    None => hashed(text, self.config.dimension),
                };
                Vector::from(v)
            })
            .collect())
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}

#[async_trait]
impl FaceDetector for MockVisionBackend {
    async fn detect(&self, image: &Path) -> Result<Vec<FaceDetection>> {
        self.calls.detect.fetch_add(1, Ordering::SeqCst);
        if self.config.fail_faces {
            return Err(Error::FaceDetection("mock detector failure".into()));
        }
        Ok(self
            .config
            .faces
            .get(&file_key(image))
            .cloned()
            .unwrap_or_default())
    }
}
