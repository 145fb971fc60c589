//! HTTP vision backend: image/text embeddings and face detection served by a
//! model server.
//!
//! Wire format (JSON over HTTP):
//!
//! | Endpoint | Request | Response |
//! |----------|---------|----------|
//! | `POST /embed/image` | `{"images": [b64, ...]}` | `{"embeddings": [[f32]]}` |
//! | `POST /embed/text` | `{"texts": [str, ...]}` | `{"embeddings": [[f32]]}` |
//! | `POST /faces/detect` | `{"image": b64}` | `{"width", "height", "faces": [...]}` |
//! | `GET /health` | | 2xx when ready |
//!
//! Face boxes come back in pixels and are normalized here against the
//! reported image size. Every returned vector is L2-normalized before it
//! leaves this module.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::Engine;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use lumen_core::defaults;
use lumen_core::similarity::normalize;
use lumen_core::{BoundingBox, EmbeddingBackend, Error, FaceDetection, FaceDetector, Result, Vector};

/// Slow-request warning threshold.
const SLOW_REQUEST_MS: u64 = 5000;

/// Vision backend configuration.
#[derive(Debug, Clone)]
pub struct VisionBackendConfig {
    pub base_url: String,
    pub model: String,
    pub dimension: usize,
    pub timeout: Duration,
    /// Concurrent single-image requests issued by `embed_images`.
    pub batch_concurrency: usize,
}

impl Default for VisionBackendConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::VISION_BASE_URL.to_string(),
            model: defaults::EMBED_MODEL.to_string(),
            dimension: defaults::EMBED_DIMENSION,
            timeout: Duration::from_secs(defaults::VISION_TIMEOUT_SECS),
            batch_concurrency: defaults::VISION_BATCH_CONCURRENCY,
        }
    }
}

impl VisionBackendConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `VISION_BASE_URL` | `http://localhost:8100` |
    /// | `VISION_EMBED_MODEL` | `clip-vit-base-patch32` |
    /// | `VISION_EMBED_DIM` | `512` |
    /// | `VISION_TIMEOUT_SECS` | `120` |
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let d = Self::default();
        Self {
            base_url: lookup("VISION_BASE_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(d.base_url),
            model: lookup("VISION_EMBED_MODEL").unwrap_or(d.model),
            dimension: lookup("VISION_EMBED_DIM")
                .and_then(|v| v.parse().ok())
                .unwrap_or(d.dimension),
            timeout: lookup("VISION_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(d.timeout),
            batch_concurrency: d.batch_concurrency,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Serialize)]
struct EmbedImageRequest {
    images: Vec<String>,
}

#[derive(Serialize)]
struct EmbedTextRequest<'a> {
    texts: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Serialize)]
struct DetectRequest {
    image: String,
}

#[derive(Deserialize)]
struct DetectResponse {
    width: u32,
    height: u32,
    #[serde(default)]
    faces: Vec<DetectedFace>,
}

#[derive(Deserialize)]
struct DetectedFace {
    /// Pixel-space `[x, y, width, height]`.
    bbox: [f32; 4],
    confidence: f32,
    embedding: Vec<f32>,
    #[serde(default)]
    age: Option<i32>,
    #[serde(default)]
    gender: Option<String>,
}

/// Embedding and face-detection client for a vision model server.
pub struct VisionBackend {
    client: reqwest::Client,
    config: VisionBackendConfig,
}

impl VisionBackend {
    pub fn new(config: VisionBackendConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    pub fn from_env() -> Self {
        Self::new(VisionBackendConfig::from_env())
    }

    pub fn config(&self) -> &VisionBackendConfig {
        &self.config
    }

    /// True if the model server answers its health endpoint.
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/health", self.config.base_url);
        match self
            .client
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    async fn read_image_b64(image: &Path) -> Result<String> {
        let bytes = tokio::fs::read(image).await?;
        Ok(base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    /// POST `body` and decode the JSON reply, mapping every failure through `wrap`.
    async fn post<B, R>(&self, endpoint: &str, body: &B, wrap: fn(String) -> Error) -> Result<R>
    where
        B: Serialize + ?Sized,
        R: for<'de> Deserialize<'de>,
    {
        let start = Instant::now();
        let url = format!("{}/{}", self.config.base_url, endpoint);
        let response = self
            .client
            .post(&url)
            .timeout(self.config.timeout)
            .json(body)
            .send()
            .await
            .map_err(|e| wrap(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(wrap(format!("Vision server returned {}: {}", status, body)));
        }

        let parsed = response
            .json()
            .await
            .map_err(|e| wrap(format!("Failed to parse response: {}", e)))?;

        let elapsed = start.elapsed().as_millis() as u64;
        if elapsed > SLOW_REQUEST_MS {
            warn!(endpoint, duration_ms = elapsed, slow = true, "Slow vision request");
        }
        Ok(parsed)
    }

    fn to_unit_vectors(&self, raw: Vec<Vec<f32>>, expected: usize) -> Result<Vec<Vector>> {
        if raw.len() != expected {
            return Err(Error::Embedding(format!(
                "expected {} embeddings, got {}",
                expected,
                raw.len()
            )));
        }
        raw.into_iter()
            .map(|mut v| {
                if v.len() != self.config.dimension {
                    return Err(Error::Embedding(format!(
                        "dimension mismatch: expected {}, got {}",
                        self.config.dimension,
                        v.len()
                    )));
                }
                normalize(&mut v);
                Ok(Vector::from(v))
            })
            .collect()
    }
}

#[async_trait]
impl EmbeddingBackend for VisionBackend {
    #[instrument(skip(self), fields(subsystem = "inference", component = "vision", op = "embed_image"))]
    async fn embed_image(&self, image: &Path) -> Result<Vector> {
        let request = EmbedImageRequest {
            images: vec![Self::read_image_b64(image).await?],
        };
        let response: EmbeddingResponse = self
            .post("embed/image", &request, Error::Embedding)
            .await?;
        let mut vectors = self.to_unit_vectors(response.embeddings, 1)?;
        vectors
            .pop()
            .ok_or_else(|| Error::Embedding("backend returned no embedding".into()))
    }

    async fn embed_images(&self, images: &[PathBuf]) -> Result<Vec<Vector>> {
        stream::iter(images.to_vec())
            .map(|path| async move { self.embed_image(&path).await })
            .buffered(self.config.batch_concurrency.max(1))
            .try_collect()
            .await
    }

    #[instrument(skip(self, texts), fields(subsystem = "inference", component = "vision", op = "embed_texts", input_count = texts.len()))]
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vector>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let response: EmbeddingResponse = self
            .post("embed/text", &EmbedTextRequest { texts }, Error::Embedding)
            .await?;
        let vectors = self.to_unit_vectors(response.embeddings, texts.len())?;
        debug!(result_count = vectors.len(), "Text embedding complete");
        Ok(vectors)
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

#[async_trait]
impl FaceDetector for VisionBackend {
    #[instrument(skip(self), fields(subsystem = "inference", component = "vision", op = "detect_faces"))]
    async fn detect(&self, image: &Path) -> Result<Vec<FaceDetection>> {
        let request = DetectRequest {
            image: Self::read_image_b64(image).await?,
        };
        let response: DetectResponse = self
            .post("faces/detect", &request, Error::FaceDetection)
            .await?;

        let faces: Vec<FaceDetection> = response
            .faces
            .into_iter()
            .map(|face| {
                let [x, y, w, h] = face.bbox;
                let mut embedding = face.embedding;
                normalize(&mut embedding);
                FaceDetection {
                    bbox: BoundingBox::from_pixels(x, y, w, h, response.width, response.height),
                    confidence: face.confidence,
                    embedding: Vector::from(embedding),
                    age: face.age,
                    gender: face.gender,
                }
            })
            .collect();

        debug!(face_count = faces.len(), "Face detection complete");
        Ok(faces)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_config_from_vars() {
        let vars: HashMap<&str, &str> = [
            ("VISION_BASE_URL", "http://gpu-box:9000/"),
            ("VISION_EMBED_DIM", "768"),
            ("VISION_TIMEOUT_SECS", "15"),
        ]
        .into_iter()
        .collect();
        let config = VisionBackendConfig::from_vars(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.base_url, "http://gpu-box:9000");
        assert_eq!(config.dimension, 768);
        assert_eq!(config.timeout, Duration::from_secs(15));
        assert_eq!(config.model, defaults::EMBED_MODEL);
    }

    #[test]
    fn test_config_defaults() {
        let config = VisionBackendConfig::from_vars(|_| None);
        assert_eq!(config.base_url, defaults::VISION_BASE_URL);
        assert_eq!(config.dimension, defaults::EMBED_DIMENSION);
    }

    #[test]
    fn test_detect_response_deserialization() {
        let json = r#"{
            "width": 640, "height": 480,
            "faces": [{"bbox": [64, 48, 128, 96], "confidence": 0.99, "embedding": [3.0, 4.0]}]
        }"#;
        let response: DetectResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.faces.len(), 1);
        assert_eq!(response.faces[0].age, None);
        assert_eq!(response.faces[0].bbox, [64.0, 48.0, 128.0, 96.0]);
    }

    #[test]
    fn test_embed_text_request_serialization() {
        let texts = vec!["a photo of beach".to_string()];
        let json = serde_json::to_value(EmbedTextRequest { texts: &texts }).unwrap();
        assert_eq!(json["texts"][0], "a photo of beach");
    }
}
