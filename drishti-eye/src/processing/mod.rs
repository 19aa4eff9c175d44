//! Per-frame processing: detection, filtering and overlays

pub mod detection;
pub mod overlay;
pub mod remote;

pub use detection::{DetectionMemory, DetectionStage, Detector, NoopDetector, StageOutput};
pub use remote::RemoteDetector;
