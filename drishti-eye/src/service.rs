//! Client-facing facade over cameras, settings, frames and snapshots

use crate::bus::FrameSubscription;
use crate::camera::{CameraSource, CameraState, CameraSupervisor, ShutdownReport};
use crate::error::{EyeError, SettingsValidationError, SnapshotError};
use crate::settings::CameraSettings;
use crate::snapshot::{Snapshot, SnapshotService};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use drishti_core::{CameraId, Detection};
use futures_util::stream::{self, Stream};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// One camera as shown in listings
#[derive(Debug, Clone, Serialize)]
pub struct CameraOverview {
    pub name: String,
    #[serde(flatten)]
    pub state: CameraState,
    pub connected: bool,
    pub detection_enabled: bool,
    pub confidence_threshold: f32,
    pub last_frame_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// A frame as delivered to a live viewer
#[derive(Debug, Clone)]
pub struct LiveFrame {
    pub camera_id: CameraId,
    pub frame_bytes: Bytes,
    pub timestamp: DateTime<Utc>,
    pub detections: Vec<Detection>,
    pub connected: bool,
    pub sequence: u64,
}

/// Live sequence of frames for one camera
pub struct LiveFeed {
    source: Arc<CameraSource>,
    frames: FrameSubscription,
}

impl LiveFeed {
    pub fn camera_id(&self) -> &CameraId {
        self.source.id()
    }

    /// Next frame, or `None` once the camera is removed or the bus shut down
    pub async fn next(&mut self) -> Option<LiveFrame> {
        let frame = self.frames.recv().await?;
        Some(LiveFrame {
            camera_id: frame.camera_id.clone(),
            frame_bytes: frame.encoded.clone(),
            timestamp: frame.captured_at,
            detections: frame.detections.clone(),
            connected: self.source.is_connected(),
            sequence: frame.sequence,
        })
    }

    pub fn into_stream(self) -> impl Stream<Item = LiveFrame> + Send + 'static {
        stream::unfold(self, |mut feed| async move {
            feed.next().await.map(|frame| (frame, feed))
        })
    }
}

/// The operations exposed to session gateways and the HTTP API
pub struct CameraService {
    supervisor: Arc<CameraSupervisor>,
    snapshots: Arc<SnapshotService>,
}

impl std::fmt::Debug for CameraService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraService").finish_non_exhaustive()
    }
}

impl CameraService {
    pub fn new(supervisor: Arc<CameraSupervisor>, snapshots: Arc<SnapshotService>) -> Self {
        Self {
            supervisor,
            snapshots,
        }
    }

    pub fn supervisor(&self) -> &Arc<CameraSupervisor> {
        &self.supervisor
    }

    pub fn snapshots(&self) -> &Arc<SnapshotService> {
        &self.snapshots
    }

    /// State and settings of every camera, keyed by id
    pub fn list_cameras(&self) -> BTreeMap<CameraId, CameraOverview> {
        let settings = self.supervisor.settings();
        self.supervisor
            .cameras()
            .into_iter()
            .map(|source| {
                let status = source.status();
                let current = settings.get(source.id().as_str()).unwrap_or_default();
                let overview = CameraOverview {
                    name: source.spec().name.clone(),
                    state: status.state,
                    connected: source.is_connected(),
                    detection_enabled: current.detection_enabled,
                    confidence_threshold: current.confidence_threshold,
                    last_frame_at: status.last_frame_at,
                    last_error: status.last_error,
                };
                (source.id().clone(), overview)
            })
            .collect()
    }

    pub fn subscribe(&self, camera_id: &str) -> Result<LiveFeed, EyeError> {
        let unknown = || EyeError::UnknownCamera(CameraId::new(camera_id));
        let source = self.supervisor.camera(camera_id).ok_or_else(unknown)?;
        let frames = self.supervisor.bus().subscribe(camera_id).ok_or_else(unknown)?;
        Ok(LiveFeed { source, frames })
    }

    /// Change one setting. Nothing is changed on error.
    pub fn update_setting(
        &self,
        camera_id: &str,
        key: &str,
        value: &Value,
    ) -> Result<CameraSettings, SettingsValidationError> {
        self.supervisor.settings().set_json(camera_id, key, value)
    }

    pub fn settings(&self) -> BTreeMap<CameraId, CameraSettings> {
        self.supervisor.settings().snapshot_all()
    }

    pub async fn take_snapshot(&self, camera_id: &str) -> Result<Snapshot, SnapshotError> {
        self.snapshots.capture(camera_id).await
    }

    /// Snapshot metadata, newest first
    pub fn list_snapshots(&self) -> Vec<Snapshot> {
        self.snapshots.list()
    }

    /// Metadata of the stored snapshot named `filename`, if it was recorded
    pub fn snapshot(&self, filename: &str) -> Option<Snapshot> {
        self.snapshots.find(filename)
    }

    /// JPEG of the camera's current frame
    pub fn latest_jpeg(&self, camera_id: &str) -> Result<Bytes, SnapshotError> {
        let bus = self.supervisor.bus();
        if !bus.contains(camera_id) {
            return Err(SnapshotError::UnknownCamera(CameraId::new(camera_id)));
        }
        bus.latest(camera_id)
            .map(|frame| frame.encoded.clone())
            .ok_or_else(|| SnapshotError::NoFrameAvailable {
                camera_id: CameraId::new(camera_id),
            })
    }

    /// Stop all cameras; blocks for up to `timeout`
    pub fn shutdown(&self, timeout: Duration) -> ShutdownReport {
        self.supervisor.shutdown(timeout)
    }
}
