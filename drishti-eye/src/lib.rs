//! drishti-eye: multi-camera ingestion engine
//!
//! Keeps many unreliable network cameras alive behind a reconnect/backoff
//! state machine, runs optional object detection on each frame, and fans the
//! latest frame per camera out to live viewers and the snapshot service.
//!
//! Each camera runs on its own OS thread; nothing one camera does can block
//! another, and publishing a frame never waits on viewers.

pub mod bus;
pub mod camera;
pub mod error;
pub mod frame;
pub mod processing;
pub mod service;
pub mod settings;
pub mod snapshot;
pub mod source;

pub use bus::{FrameBus, FrameSubscription};
pub use camera::{
    CameraEvent, CameraSource, CameraState, CameraStatus, CameraSupervisor, CaptureOptions,
    RetryPolicy, ShutdownReport, SourcePipeline, StopOutcome,
};
pub use error::{
    DetectionError, EyeError, FailureClass, SettingsValidationError, SnapshotError, SourceError,
    StorageError,
};
pub use frame::{Frame, RawFrame};
pub use processing::{DetectionStage, Detector, NoopDetector, RemoteDetector};
pub use service::{CameraOverview, CameraService, LiveFeed, LiveFrame};
pub use settings::{CameraSettings, SettingKey, SettingUpdate, SettingsRegistry};
pub use snapshot::{FsSnapshotStore, Snapshot, SnapshotService, SnapshotStore};
pub use source::{CameraConnector, FfmpegConnector, FrameStream, Interrupt, RoutingConnector, TestPatternConnector};
