//! Error types for drishti-eye

use drishti_core::{CameraId, Error as CoreError};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// How a connect or read failure should be treated by the reconnect loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Network error, timeout or end of stream
    Transient,
    /// Undecodable frame data
    Decode,
    /// Bad address, missing stream, unusable source
    Config,
    /// Rejected credentials
    Auth,
}

impl FailureClass {
    /// Config and auth failures will not fix themselves by retrying
    pub fn is_persistent(&self) -> bool {
        matches!(self, FailureClass::Config | FailureClass::Auth)
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureClass::Transient => "transient",
            FailureClass::Decode => "decode",
            FailureClass::Config => "config",
            FailureClass::Auth => "auth",
        };
        f.write_str(name)
    }
}

/// Failure reported by a camera source
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{class} source error: {message}")]
pub struct SourceError {
    pub class: FailureClass,
    pub message: String,
}

impl SourceError {
    pub fn new(class: FailureClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(FailureClass::Transient, message)
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new(FailureClass::Decode, message)
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(FailureClass::Config, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(FailureClass::Auth, message)
    }

    /// Source was interrupted by a stop request
    pub fn interrupted() -> Self {
        Self::transient("interrupted")
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SettingsValidationError {
    #[error("unknown camera: {0}")]
    UnknownCamera(CameraId),

    #[error("unknown setting key: {0}")]
    UnknownKey(String),

    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("confidence threshold {0} out of range [0, 1]")]
    ThresholdOutOfRange(f32),
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid snapshot name: {0}")]
    InvalidName(String),
}

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("no frame available")]
    NoFrameAvailable { camera_id: CameraId },

    #[error("unknown camera: {0}")]
    UnknownCamera(CameraId),

    #[error("snapshot storage failed: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("detector unavailable: {0}")]
    Unavailable(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("detector network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("malformed detector response: {0}")]
    Malformed(String),
}

#[derive(Error, Debug)]
pub enum EyeError {
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsValidationError),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("Detection error: {0}")]
    Detection(#[from] DetectionError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Camera {0} is still shutting down")]
    CameraBusy(CameraId),

    #[error("Unknown camera: {0}")]
    UnknownCamera(CameraId),

    #[error("Camera {0} already registered")]
    DuplicateCamera(CameraId),

    #[error("Camera supervisor is shut down")]
    ShutDown,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

impl From<EyeError> for CoreError {
    fn from(err: EyeError) -> Self {
        CoreError::Camera(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EyeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_class_persistence() {
        assert!(FailureClass::Config.is_persistent());
        assert!(FailureClass::Auth.is_persistent());
        assert!(!FailureClass::Transient.is_persistent());
        assert!(!FailureClass::Decode.is_persistent());
    }

    #[test]
    fn test_source_error_display() {
        let err = SourceError::auth("401 Unauthorized");
        assert_eq!(err.to_string(), "auth source error: 401 Unauthorized");
    }

    #[test]
    fn test_no_frame_message() {
        let err = SnapshotError::NoFrameAvailable {
            camera_id: CameraId::new("gate"),
        };
        assert_eq!(err.to_string(), "no frame available");
    }

    #[test]
    fn test_eye_error_to_core_error() {
        let err = EyeError::UnknownCamera(CameraId::new("attic"));
        let core_err: CoreError = err.into();
        match core_err {
            CoreError::Camera(msg) => assert!(msg.contains("attic")),
            other => panic!("Expected Camera error, got {:?}", other),
        }
    }

    #[test]
    fn test_eye_error_from_settings() {
        let err: EyeError = SettingsValidationError::ThresholdOutOfRange(1.2).into();
        assert!(matches!(
            err,
            EyeError::Settings(SettingsValidationError::ThresholdOutOfRange(_))
        ));
    }
}
