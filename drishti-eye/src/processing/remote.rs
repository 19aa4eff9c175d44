//! HTTP inference endpoint adapter

use crate::error::DetectionError;
use crate::frame::encode_jpeg;
use crate::processing::detection::Detector;
use drishti_core::{BoundingBox, Detection};
use image::RgbImage;
use serde::Deserialize;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::debug;

const UPLOAD_QUALITY: u8 = 85;

#[derive(Debug, Deserialize)]
struct WireDetection {
    label: String,
    confidence: f32,
    /// `[x, y, width, height]` in pixels
    bbox: [f32; 4],
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireResponse {
    List(Vec<WireDetection>),
    Wrapped { detections: Vec<WireDetection> },
}

impl WireResponse {
    fn into_detections(self) -> Vec<Detection> {
        let list = match self {
            WireResponse::List(list) => list,
            WireResponse::Wrapped { detections } => detections,
        };
        list.into_iter()
            .map(|d| {
                let [x, y, w, h] = d.bbox;
                Detection::new(d.label, d.confidence, BoundingBox::new(x, y, w, h))
            })
            .collect()
    }
}

/// Parse a detector response body
pub fn parse_response(body: &[u8]) -> Result<Vec<Detection>, DetectionError> {
    serde_json::from_slice::<WireResponse>(body)
        .map(WireResponse::into_detections)
        .map_err(|e| DetectionError::Malformed(e.to_string()))
}

/// Detector that POSTs each frame as JPEG to an inference service.
///
/// Camera loops run on plain threads, so requests are driven on the
/// runtime captured at construction.
pub struct RemoteDetector {
    endpoint: String,
    client: reqwest::Client,
    runtime: Handle,
}

impl RemoteDetector {
    pub fn new(endpoint: impl Into<String>, timeout: Duration, runtime: Handle) -> Result<Self, DetectionError> {
        let endpoint = endpoint.into();
        url::Url::parse(&endpoint)
            .map_err(|e| DetectionError::Unavailable(format!("invalid endpoint {}: {}", endpoint, e)))?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            endpoint,
            client,
            runtime,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn request(&self, body: Vec<u8>) -> Result<Vec<Detection>, DetectionError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "image/jpeg")
            .body(body)
            .send()
            .await?
            .error_for_status()?;
        let bytes = response.bytes().await?;
        parse_response(&bytes)
    }
}

impl Detector for RemoteDetector {
    fn name(&self) -> &str {
        "remote"
    }

    fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, DetectionError> {
        if Handle::try_current().is_ok() {
            // block_on would panic inside the runtime
            return Err(DetectionError::Unavailable(
                "remote detector called from an async context".to_string(),
            ));
        }
        let body = encode_jpeg(image, UPLOAD_QUALITY)
            .map_err(|e| DetectionError::Inference(format!("jpeg encode failed: {}", e)))?;
        let detections = self.runtime.block_on(self.request(body.to_vec()))?;
        debug!(endpoint = %self.endpoint, count = detections.len(), "Remote detection complete");
        Ok(detections)
    }
}
