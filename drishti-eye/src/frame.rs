//! Frame types and JPEG helpers

use crate::error::SourceError;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use drishti_core::{CameraId, Detection};
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{ColorType, ImageFormat, RgbImage};
use std::sync::Arc;

/// Decoded image straight from a source, before any processing
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub image: RgbImage,
    pub captured_at: DateTime<Utc>,
}

impl RawFrame {
    pub fn new(image: RgbImage) -> Self {
        Self {
            image,
            captured_at: Utc::now(),
        }
    }
}

/// A processed frame as published on the bus. Immutable once published.
#[derive(Debug, Clone)]
pub struct Frame {
    pub camera_id: CameraId,
    /// Annotated image (unannotated when detection is off or failed)
    pub image: Arc<RgbImage>,
    /// JPEG payload ready to send to viewers or write to disk
    pub encoded: Bytes,
    pub captured_at: DateTime<Utc>,
    pub detections: Vec<Detection>,
    /// Per-camera publish counter, increasing in capture order
    pub sequence: u64,
}

impl Frame {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// Encode an RGB image as JPEG
pub fn encode_jpeg(image: &RgbImage, quality: u8) -> image::ImageResult<Bytes> {
    let mut buf = Vec::with_capacity((image.width() * image.height() / 4) as usize);
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
    encoder.encode(image.as_raw(), image.width(), image.height(), ColorType::Rgb8)?;
    Ok(Bytes::from(buf))
}

/// Decode a JPEG buffer into an RGB image
pub fn decode_jpeg(data: &[u8]) -> Result<RgbImage, SourceError> {
    image::load_from_memory_with_format(data, ImageFormat::Jpeg)
        .map(|img| img.to_rgb8())
        .map_err(|e| SourceError::decode(format!("jpeg decode failed: {}", e)))
}

/// Resize to the target resolution unless the image already matches
pub fn fit_resolution(image: RgbImage, width: u32, height: u32) -> RgbImage {
    if image.width() == width && image.height() == height {
        return image;
    }
    image::imageops::resize(&image, width, height, FilterType::Triangle)
}
