//! Camera lifecycle, workers and supervision

pub mod lifecycle;
pub mod supervisor;
pub mod worker;

pub use lifecycle::{transition, CameraEvent, CameraState, RetryPolicy};
pub use supervisor::{CameraSupervisor, ShutdownReport};
pub use worker::{CameraSource, CameraStatus, CaptureOptions, SourcePipeline, StopOutcome};
