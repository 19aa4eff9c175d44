//! Detection stage

use crate::error::DetectionError;
use crate::processing::overlay;
use crate::settings::CameraSettings;
use drishti_core::{CameraId, Detection};
use image::RgbImage;
use std::sync::Arc;
use tracing::{debug, warn};

/// Opaque object-detection capability. Called from camera threads, possibly
/// for several cameras at once.
pub trait Detector: Send + Sync {
    fn name(&self) -> &str;

    /// Raw candidate detections for one frame, unfiltered
    fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>, DetectionError>;
}

/// Detector that never finds anything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDetector;

impl Detector for NoopDetector {
    fn name(&self) -> &str {
        "noop"
    }

    fn detect(&self, _image: &RgbImage) -> Result<Vec<Detection>, DetectionError> {
        Ok(Vec::new())
    }
}

/// Result of running one frame through the stage
#[derive(Debug, Clone)]
pub struct StageOutput {
    pub image: RgbImage,
    pub detections: Vec<Detection>,
}

/// Detections carried between frames of one camera when inference only runs
/// every few frames. Owned by the camera's worker, never shared.
#[derive(Debug, Clone, Default)]
pub struct DetectionMemory {
    candidates: Vec<Detection>,
    frames_since_refresh: Option<u32>,
}

impl DetectionMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget cached candidates; the next frame runs the detector
    pub fn clear(&mut self) {
        self.candidates.clear();
        self.frames_since_refresh = None;
    }

    fn is_due(&self, refresh_interval: u32) -> bool {
        match self.frames_since_refresh {
            None => true,
            Some(skipped) => skipped.saturating_add(1) >= refresh_interval,
        }
    }

    fn refresh(&mut self, candidates: Vec<Detection>) {
        self.candidates = candidates;
        self.frames_since_refresh = Some(0);
    }

    fn reuse(&mut self) -> Vec<Detection> {
        self.frames_since_refresh = self.frames_since_refresh.map(|n| n.saturating_add(1));
        self.candidates.clone()
    }
}

/// Frame transform: detect, filter by threshold, draw overlays. Holds no
/// per-camera state; callers that skip inference keep a [`DetectionMemory`].
#[derive(Clone)]
pub struct DetectionStage {
    detector: Arc<dyn Detector>,
    refresh_interval: u32,
}

impl DetectionStage {
    pub fn new(detector: Arc<dyn Detector>) -> Self {
        Self {
            detector,
            refresh_interval: 1,
        }
    }

    /// Run the detector on every `interval`-th frame only. Zero means 1.
    pub fn with_refresh_interval(mut self, interval: u32) -> Self {
        self.refresh_interval = interval.max(1);
        self
    }

    pub fn detector_name(&self) -> &str {
        self.detector.name()
    }

    pub fn refresh_interval(&self) -> u32 {
        self.refresh_interval
    }

    /// Process one frame with a point-in-time settings snapshot, running the
    /// detector unconditionally.
    ///
    /// Disabled detection returns the image untouched. A detector failure is
    /// logged and the frame passes through unannotated.
    pub fn process(
        &self,
        camera_id: &CameraId,
        image: RgbImage,
        settings: &CameraSettings,
    ) -> StageOutput {
        if !settings.detection_enabled {
            return StageOutput {
                image,
                detections: Vec::new(),
            };
        }
        let candidates = self.run_detector(camera_id, &image).unwrap_or_default();
        annotate(camera_id, image, candidates, settings)
    }

    /// Like [`process`](Self::process), but between refreshes the candidates
    /// cached in `memory` are re-filtered with the current threshold and
    /// redrawn instead of calling the detector.
    pub fn process_with_memory(
        &self,
        camera_id: &CameraId,
        image: RgbImage,
        settings: &CameraSettings,
        memory: &mut DetectionMemory,
    ) -> StageOutput {
        if !settings.detection_enabled {
            memory.clear();
            return StageOutput {
                image,
                detections: Vec::new(),
            };
        }

        let candidates = if memory.is_due(self.refresh_interval) {
            let candidates = self.run_detector(camera_id, &image).unwrap_or_default();
            memory.refresh(candidates.clone());
            candidates
        } else {
            memory.reuse()
        };
        annotate(camera_id, image, candidates, settings)
    }

    fn run_detector(&self, camera_id: &CameraId, image: &RgbImage) -> Option<Vec<Detection>> {
        match self.detector.detect(image) {
            Ok(candidates) => Some(candidates),
            Err(e) => {
                warn!(camera_id = %camera_id, detector = self.detector.name(), error = %e, "Detection failed, forwarding frame unannotated");
                None
            }
        }
    }
}

fn annotate(
    camera_id: &CameraId,
    image: RgbImage,
    candidates: Vec<Detection>,
    settings: &CameraSettings,
) -> StageOutput {
    let detections = filter_by_confidence(candidates, settings.confidence_threshold);
    debug!(camera_id = %camera_id, count = detections.len(), "Detections kept");

    if detections.is_empty() {
        return StageOutput { image, detections };
    }

    let mut annotated = image;
    overlay::draw_detections(&mut annotated, &detections);
    StageOutput {
        image: annotated,
        detections,
    }
}

impl std::fmt::Debug for DetectionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectionStage")
            .field("detector", &self.detector.name())
            .field("refresh_interval", &self.refresh_interval)
            .finish()
    }
}

/// Keep detections at or above `threshold`, preserving order. Non-finite
/// confidences are dropped.
pub fn filter_by_confidence(candidates: Vec<Detection>, threshold: f32) -> Vec<Detection> {
    candidates
        .into_iter()
        .filter(|d| d.confidence.is_finite() && d.confidence >= threshold)
        .collect()
}
