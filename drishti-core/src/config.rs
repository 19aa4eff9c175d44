// Configuration system for Drishti
//
// A deployment is described by one file (TOML or YAML). Every section has
// working defaults so an empty file plus a camera list is enough to run.

use crate::error::{Error, Result};
use crate::types::{CameraId, CameraSpec, Credentials};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix for environment overrides, e.g. `DRISHTI__SERVER__LISTEN_ADDR`
pub const ENV_PREFIX: &str = "DRISHTI";

/// One camera entry in the deployment file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraConfig {
    pub id: String,
    /// Display name (defaults to the id)
    #[serde(default)]
    pub name: Option<String>,
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Per-camera override of `detection.default_enabled`
    #[serde(default)]
    pub detection_enabled: Option<bool>,
    /// Per-camera override of `detection.confidence_threshold`
    #[serde(default)]
    pub confidence_threshold: Option<f32>,
}

impl CameraConfig {
    pub fn spec(&self) -> CameraSpec {
        let credentials = self.username.as_ref().map(|username| Credentials {
            username: username.clone(),
            password: self.password.clone().unwrap_or_default(),
        });
        CameraSpec {
            id: CameraId::new(self.id.clone()),
            name: self.name.clone().unwrap_or_else(|| self.id.clone()),
            url: self.url.clone(),
            credentials,
        }
    }
}

/// Capture and encoding settings applied to every camera
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub width: u32,
    pub height: u32,
    /// Upper bound on processed frames per second per camera
    pub fps: u32,
    /// JPEG quality for the wire payload (1-100)
    pub jpeg_quality: u8,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    /// A streaming camera with no frame for this long is reported disconnected
    pub stale_after_ms: u64,
    /// Path of the ffmpeg binary used for RTSP/HTTP sources
    pub ffmpeg_path: String,
    /// RTSP transport passed to ffmpeg (`tcp` or `udp`)
    pub rtsp_transport: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fps: 15,
            jpeg_quality: 70,
            connect_timeout_ms: 10_000,
            read_timeout_ms: 5_000,
            stale_after_ms: 5_000,
            ffmpeg_path: "ffmpeg".to_string(),
            rtsp_transport: "tcp".to_string(),
        }
    }
}

impl CaptureConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_millis(self.stale_after_ms)
    }
}

/// Reconnect backoff policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub base_ms: u64,
    pub cap_ms: u64,
    /// Consecutive failures after which a config/auth failure is reported as fatal
    pub fatal_threshold: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_ms: 1_000,
            cap_ms: 30_000,
            fatal_threshold: 10,
        }
    }
}

impl RetryConfig {
    pub fn base(&self) -> Duration {
        Duration::from_millis(self.base_ms)
    }

    pub fn cap(&self) -> Duration {
        Duration::from_millis(self.cap_ms)
    }
}

/// Object detection defaults and the optional remote inference endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub default_enabled: bool,
    pub confidence_threshold: f32,
    /// HTTP endpoint accepting a JPEG body and answering with detections.
    /// Without one, detection is a no-op.
    pub endpoint: Option<String>,
    pub request_timeout_ms: u64,
    /// Run the detector on every Nth frame; frames in between reuse the last
    /// result
    pub refresh_interval: u32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            default_enabled: true,
            confidence_threshold: 0.5,
            endpoint: None,
            request_timeout_ms: 2_000,
            refresh_interval: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub dir: PathBuf,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("snapshots"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:5000".to_string(),
        }
    }
}

/// Complete Drishti configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DrishtiConfig {
    pub cameras: Vec<CameraConfig>,
    pub capture: CaptureConfig,
    pub retry: RetryConfig,
    pub detection: DetectionConfig,
    pub snapshots: SnapshotConfig,
    pub server: ServerConfig,
    /// How long a global shutdown waits for camera workers
    pub shutdown_timeout_ms: u64,
}

impl Default for DrishtiConfig {
    fn default() -> Self {
        Self {
            cameras: Vec::new(),
            capture: CaptureConfig::default(),
            retry: RetryConfig::default(),
            detection: DetectionConfig::default(),
            snapshots: SnapshotConfig::default(),
            server: ServerConfig::default(),
            shutdown_timeout_ms: 5_000,
        }
    }
}

impl DrishtiConfig {
    /// Load from a TOML/YAML file (format picked by extension) with
    /// `DRISHTI__SECTION__KEY` environment overrides layered on top.
    /// Without a path only defaults and the environment are used.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            if !path.exists() {
                return Err(Error::Configuration(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            builder = builder.add_source(::config::File::from(path));
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let config: DrishtiConfig = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Parse configuration text, trying TOML first, then YAML
    pub fn from_str(content: &str) -> Result<Self> {
        let toml_err = match toml::from_str::<DrishtiConfig>(content) {
            Ok(config) => return Ok(config),
            Err(e) => e,
        };

        match serde_yaml::from_str::<DrishtiConfig>(content) {
            Ok(config) => Ok(config),
            Err(yaml_err) => Err(Error::Deserialization(format!(
                "not valid TOML ({}) or YAML ({})",
                toml_err, yaml_err
            ))),
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Validate configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        let mut seen = HashSet::new();
        for camera in &self.cameras {
            if camera.id.trim().is_empty() {
                return Err("Camera id must not be empty".to_string());
            }
            if !seen.insert(camera.id.as_str()) {
                return Err(format!("Duplicate camera id: {}", camera.id));
            }
            if camera.url.trim().is_empty() {
                return Err(format!("Camera {} has no url", camera.id));
            }
            if let Some(threshold) = camera.confidence_threshold {
                if !(0.0..=1.0).contains(&threshold) {
                    return Err(format!(
                        "Camera {} confidence_threshold must be between 0 and 1",
                        camera.id
                    ));
                }
            }
        }

        if !(0.0..=1.0).contains(&self.detection.confidence_threshold) {
            return Err("detection.confidence_threshold must be between 0 and 1".to_string());
        }
        if self.detection.refresh_interval == 0 {
            return Err("detection.refresh_interval must be > 0".to_string());
        }

        if self.capture.width == 0 || self.capture.height == 0 {
            return Err("Capture resolution must be non-zero".to_string());
        }
        if self.capture.width > 7680 || self.capture.height > 4320 {
            return Err("Capture resolution too large (max 8K)".to_string());
        }
        if self.capture.fps == 0 || self.capture.fps > 120 {
            return Err("Capture fps must be between 1 and 120".to_string());
        }
        if self.capture.jpeg_quality == 0 || self.capture.jpeg_quality > 100 {
            return Err("JPEG quality must be between 1 and 100".to_string());
        }
        if self.capture.connect_timeout_ms == 0 || self.capture.read_timeout_ms == 0 {
            return Err("Capture timeouts must be non-zero".to_string());
        }

        if self.retry.base_ms == 0 {
            return Err("retry.base_ms must be > 0".to_string());
        }
        if self.retry.base_ms > self.retry.cap_ms {
            return Err("retry.base_ms cannot be greater than retry.cap_ms".to_string());
        }

        if self.shutdown_timeout_ms == 0 {
            return Err("shutdown_timeout_ms must be > 0".to_string());
        }

        Ok(())
    }
}
