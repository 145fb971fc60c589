//! Thumbnail generation and video frame extraction.

use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use tokio::process::Command;
use tracing::{debug, warn};

use lumen_core::defaults;
use lumen_core::{Error, LibraryConfig, Photo, PhotoProcessingUpdate, Result};

// =============================================================================
// VIDEO FRAMES
// =============================================================================

/// Source of a representative still frame for a video.
///
/// Any failure yields `None`: a video without a frame simply gets no thumbnail.
#[async_trait]
pub trait FrameExtractor: Send + Sync {
    async fn extract_frame(&self, video: &Path) -> Option<DynamicImage>;
}

/// `ffmpeg`-backed frame extractor.
///
/// Tries the frame at one second first, then falls back to the first frame
/// for clips shorter than that.
pub struct FfmpegFrameExtractor {
    ffmpeg_path: String,
    timeout: Duration,
}

impl FfmpegFrameExtractor {
    pub fn new(ffmpeg_path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            timeout,
        }
    }

    pub fn from_config(config: &LibraryConfig) -> Self {
        Self::new(config.ffmpeg_path.clone(), config.video_frame_timeout)
    }

    /// Run ffmpeg once, writing a single frame to `out`.
    async fn run(&self, video: &Path, out: &Path, seek: Option<&str>) -> Result<()> {
        let mut cmd = Command::new(&self.ffmpeg_path);
        cmd.arg("-y").arg("-loglevel").arg("error");
        if let Some(position) = seek {
            cmd.arg("-ss").arg(position);
        }
        cmd.arg("-i")
            .arg(video)
            .arg("-frames:v")
            .arg("1")
            .arg("-q:v")
            .arg("2")
            .arg(out)
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| {
                Error::Thumbnail(format!(
                    "ffmpeg timed out after {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| Error::Thumbnail(format!("Failed to execute ffmpeg: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Thumbnail(format!(
                "ffmpeg failed (exit {}): {}",
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }

    fn frame_written(out: &Path) -> bool {
        std::fs::metadata(out).map(|m| m.len() > 0).unwrap_or(false)
    }
}

#[async_trait]
impl FrameExtractor for FfmpegFrameExtractor {
    async fn extract_frame(&self, video: &Path) -> Option<DynamicImage> {
        let dir = match tempfile::tempdir() {
            Ok(dir) => dir,
            Err(e) => {
                warn!(error = %e, "Failed to create temp dir for video frame");
                return None;
            }
        };
        let out = dir.path().join("frame.jpg");

        if let Err(e) = self
            .run(video, &out, Some(defaults::VIDEO_FRAME_SEEK))
            .await
        {
            debug!(error = %e, video = %video.display(), "Seek extraction failed, trying first frame");
        }
        if !Self::frame_written(&out) {
            if let Err(e) = self.run(video, &out, None).await {
                warn!(error = %e, video = %video.display(), "Video frame extraction failed");
                return None;
            }
        }
        if !Self::frame_written(&out) {
            return None;
        }

        match image::open(&out) {
            Ok(img) => Some(img),
            Err(e) => {
                warn!(error = %e, video = %video.display(), "Extracted frame is unreadable");
                None
            }
        }
    }
}

// =============================================================================
// THUMBNAILS
// =============================================================================

/// Writes JPEG thumbnails to `<root>/<photo_id>/<size>.jpg`.
pub struct ThumbnailGenerator {
    root: PathBuf,
    sizes: Vec<u32>,
    frames: Arc<dyn FrameExtractor>,
}

impl ThumbnailGenerator {
    pub fn new(root: impl Into<PathBuf>, sizes: Vec<u32>, frames: Arc<dyn FrameExtractor>) -> Self {
        Self {
            root: root.into(),
            sizes,
            frames,
        }
    }

    pub fn from_config(config: &LibraryConfig) -> Self {
        Self::new(
            config.thumbnail_path.clone(),
            config.thumbnail_sizes.clone(),
            Arc::new(FfmpegFrameExtractor::from_config(config)),
        )
    }

    pub fn thumbnail_path(&self, photo_id: i64, size: u32) -> PathBuf {
        self.root
            .join(photo_id.to_string())
            .join(format!("{}.jpg", size))
    }

    /// Generate every configured size and record the first three on `update`.
    ///
    /// Returns `Ok(false)` when there is nothing to thumbnail: the source file
    /// is missing or no video frame could be extracted.
    pub async fn generate(&self, photo: &Photo, update: &mut PhotoProcessingUpdate) -> Result<bool> {
        let source = PathBuf::from(&photo.file_path);
        if !source.exists() {
            debug!(photo_id = photo.id, "Source file missing, skipping thumbnails");
            return Ok(false);
        }

        let img = if photo.is_video {
            match self.frames.extract_frame(&source).await {
                Some(frame) => frame,
                None => return Ok(false),
            }
        } else {
            let path = source.clone();
            tokio::task::spawn_blocking(move || image::open(&path))
                .await
                .map_err(|e| Error::Internal(format!("Thumbnail task failed: {}", e)))?
                .map_err(|e| Error::Thumbnail(format!("Failed to decode {}: {}", photo.file_path, e)))?
        };

        let targets: Vec<(u32, PathBuf)> = self
            .sizes
            .iter()
            .map(|&size| (size, self.thumbnail_path(photo.id, size)))
            .collect();
        let written = targets.clone();

        tokio::task::spawn_blocking(move || write_thumbnails(img, &targets))
            .await
            .map_err(|e| Error::Internal(format!("Thumbnail task failed: {}", e)))??;

        let path_at = |i: usize| {
            written
                .get(i)
                .map(|(_, p)| p.to_string_lossy().into_owned())
        };
        update.thumbnail_small = path_at(0);
        update.thumbnail_medium = path_at(1);
        update.thumbnail_large = path_at(2);

        debug!(photo_id = photo.id, count = written.len(), "Thumbnails written");
        Ok(true)
    }
}

/// Downscale `img` to fit each size (never upscaling) and save as JPEG.
fn write_thumbnails(img: DynamicImage, targets: &[(u32, PathBuf)]) -> Result<()> {
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    for (size, path) in targets {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let thumb = if rgb.width() > *size || rgb.height() > *size {
            rgb.thumbnail(*size, *size)
        } else {
            rgb.clone()
        };
        let file = std::fs::File::create(path)?;
        let encoder =
            JpegEncoder::new_with_quality(BufWriter::new(file), defaults::THUMBNAIL_JPEG_QUALITY);
        thumb
            .to_rgb8()
            .write_with_encoder(encoder)
            .map_err(|e| Error::Thumbnail(format!("Failed to encode {}: {}", path.display(), e)))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    struct NoFrames;

    #[async_trait]
    impl FrameExtractor for NoFrames {
        async fn extract_frame(&self, _video: &Path) -> Option<DynamicImage> {
            None
        }
    }

    struct SolidFrame;

    #[async_trait]
    impl FrameExtractor for SolidFrame {
        async fn extract_frame(&self, _video: &Path) -> Option<DynamicImage> {
            Some(DynamicImage::ImageRgba8(RgbaImage::from_pixel(
                320,
                180,
                Rgba([10, 20, 30, 255]),
            )))
        }
    }

    fn photo(id: i64, path: &Path, is_video: bool) -> Photo {
        Photo {
            id,
            file_path: path.to_string_lossy().into_owned(),
            file_name: "x".into(),
            is_video,
            date_taken: None,
            location_name: None,
            country: None,
            city: None,
            is_processed: false,
            has_embeddings: false,
            has_faces_processed: false,
            thumbnail_small: None,
            thumbnail_medium: None,
            thumbnail_large: None,
        }
    }

    #[tokio::test]
    async fn test_generates_aspect_preserving_jpegs() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("wide.png");
        RgbaImage::from_pixel(1000, 500, Rgba([200, 100, 50, 128]))
            .save(&src)
            .unwrap();

        let thumbs = dir.path().join("thumbs");
        let generator = ThumbnailGenerator::new(&thumbs, vec![200, 400, 800], Arc::new(NoFrames));
        let p = photo(7, &src, false);
        let mut update = p.processing_update();

        assert!(generator.generate(&p, &mut update).await.unwrap());

        let small = image::open(thumbs.join("7").join("200.jpg")).unwrap();
        assert_eq!((small.width(), small.height()), (200, 100));
        let large = image::open(thumbs.join("7").join("800.jpg")).unwrap();
        assert_eq!((large.width(), large.height()), (800, 400));
        assert!(update.thumbnail_small.unwrap().ends_with("200.jpg"));
        assert!(update.thumbnail_large.unwrap().ends_with("800.jpg"));
    }

    #[tokio::test]
    async fn test_small_source_is_not_upscaled() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("tiny.png");
        RgbaImage::from_pixel(120, 90, Rgba([0, 0, 0, 255]))
            .save(&src)
            .unwrap();

        let generator = ThumbnailGenerator::new(dir.path(), vec![200], Arc::new(NoFrames));
        let p = photo(1, &src, false);
        let mut update = p.processing_update();
        assert!(generator.generate(&p, &mut update).await.unwrap());

        let thumb = image::open(generator.thumbnail_path(1, 200)).unwrap();
        assert_eq!((thumb.width(), thumb.height()), (120, 90));
        assert_eq!(update.thumbnail_medium, None);
    }

    #[tokio::test]
    async fn test_missing_source_is_negative_result() {
        let dir = tempfile::tempdir().unwrap();
        let generator = ThumbnailGenerator::new(dir.path(), vec![200], Arc::new(NoFrames));
        let p = photo(2, &dir.path().join("gone.jpg"), false);
        let mut update = p.processing_update();

        assert!(!generator.generate(&p, &mut update).await.unwrap());
        assert_eq!(update.thumbnail_small, None);
    }

    #[tokio::test]
    async fn test_video_without_frame_gets_no_thumbnail() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("clip.mp4");
        std::fs::write(&src, b"not a video").unwrap();

        let generator = ThumbnailGenerator::new(dir.path(), vec![200], Arc::new(NoFrames));
        let p = photo(3, &src, true);
        let mut update = p.processing_update();
        assert!(!generator.generate(&p, &mut update).await.unwrap());
    }

    #[tokio::test]
    async fn test_video_frame_is_thumbnailed() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("clip.mp4");
        std::fs::write(&src, b"stub").unwrap();

        let generator = ThumbnailGenerator::new(dir.path(), vec![160], Arc::new(SolidFrame));
        let p = photo(4, &src, true);
        let mut update = p.processing_update();
        assert!(generator.generate(&p, &mut update).await.unwrap());

        let thumb = image::open(generator.thumbnail_path(4, 160)).unwrap();
        assert_eq!((thumb.width(), thumb.height()), (160, 90));
    }

    #[tokio::test]
    async fn test_undecodable_image_is_thumbnail_error() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("broken.jpg");
        std::fs::write(&src, b"definitely not a jpeg").unwrap();

        let generator = ThumbnailGenerator::new(dir.path(), vec![200], Arc::new(NoFrames));
        let p = photo(5, &src, false);
        let mut update = p.processing_update();
        let err = generator.generate(&p, &mut update).await.unwrap_err();
        assert!(matches!(err, Error::Thumbnail(_)));
        assert!(err.is_external());
    }

    #[tokio::test]
    async fn test_missing_ffmpeg_yields_no_frame() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("clip.mp4");
        std::fs::write(&src, b"stub").unwrap();

        let extractor =
            FfmpegFrameExtractor::new("/nonexistent/ffmpeg-binary", Duration::from_secs(2));
        assert!(extractor.extract_frame(&src).await.is_none());
    }
}
