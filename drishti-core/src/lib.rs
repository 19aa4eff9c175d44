//! drishti-core: shared types, errors and configuration for the Drishti
//! camera ingestion workspace.

pub mod config;
pub mod error;
pub mod types;

pub use crate::config::{
    CameraConfig, CaptureConfig, DetectionConfig, DrishtiConfig, RetryConfig, ServerConfig,
    SnapshotConfig,
};
pub use error::{Error, Result};
pub use types::{BoundingBox, CameraId, CameraSpec, Credentials, Detection};
