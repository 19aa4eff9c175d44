// Wiring from a loaded configuration to a running camera service

use anyhow::Context;
use drishti_core::DrishtiConfig;
use drishti_eye::camera::{CameraSupervisor, CaptureOptions, RetryPolicy, SourcePipeline};
use drishti_eye::processing::{DetectionStage, Detector, NoopDetector, RemoteDetector};
use drishti_eye::settings::{CameraSettings, SettingsRegistry};
use drishti_eye::snapshot::{FsSnapshotStore, SnapshotService};
use drishti_eye::source::{FfmpegConnector, RoutingConnector, TestPatternConnector};
use drishti_eye::{CameraService, FrameBus};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{info, warn};

/// Detector chosen by configuration: remote when an endpoint is set
pub fn build_detector(config: &DrishtiConfig, runtime: Handle) -> anyhow::Result<Arc<dyn Detector>> {
    match &config.detection.endpoint {
        Some(endpoint) => {
            let timeout = Duration::from_millis(config.detection.request_timeout_ms);
            let detector = RemoteDetector::new(endpoint.clone(), timeout, runtime)
                .with_context(|| format!("invalid detection endpoint {}", endpoint))?;
            info!(endpoint = %endpoint, "Using remote detector");
            Ok(Arc::new(detector))
        }
        None => {
            info!("No detection endpoint configured, detection disabled");
            Ok(Arc::new(NoopDetector))
        }
    }
}

/// Pipeline shared by every camera of this deployment
pub fn build_pipeline(config: &DrishtiConfig, detector: Arc<dyn Detector>) -> SourcePipeline {
    let capture = &config.capture;
    let connector = RoutingConnector::standard(
        FfmpegConnector::from_capture(capture),
        TestPatternConnector::new(capture.width, capture.height, capture.fps),
    );
    SourcePipeline {
        connector: Arc::new(connector),
        settings: Arc::new(SettingsRegistry::new()),
        stage: DetectionStage::new(detector).with_refresh_interval(config.detection.refresh_interval),
        bus: Arc::new(FrameBus::new()),
        policy: RetryPolicy::from(&config.retry),
        capture: CaptureOptions::from(capture),
    }
}

/// Build the camera service: every configured camera is registered but not
/// started, and snapshots already on disk are indexed.
pub async fn build_service(config: &DrishtiConfig) -> anyhow::Result<Arc<CameraService>> {
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {}", e))?;

    let detector = build_detector(config, Handle::current())?;
    let supervisor = Arc::new(CameraSupervisor::new(build_pipeline(config, detector)));

    for camera in &config.cameras {
        let settings = CameraSettings {
            detection_enabled: camera
                .detection_enabled
                .unwrap_or(config.detection.default_enabled),
            confidence_threshold: camera
                .confidence_threshold
                .unwrap_or(config.detection.confidence_threshold),
        };
        supervisor
            .add_camera(camera.spec(), settings)
            .with_context(|| format!("failed to add camera {}", camera.id))?;
    }

    let store = Arc::new(FsSnapshotStore::new(config.snapshots.dir.clone()));
    let snapshots = Arc::new(SnapshotService::new(supervisor.bus().clone(), store));
    if let Err(e) = snapshots.load_existing().await {
        warn!(dir = %config.snapshots.dir.display(), error = %e, "Could not index existing snapshots");
    }

    info!(cameras = supervisor.len(), "Camera service ready");
    Ok(Arc::new(CameraService::new(supervisor, snapshots)))
}
