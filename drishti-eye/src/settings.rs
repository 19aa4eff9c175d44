//! Per-camera runtime settings
//!
//! Settings are read once per frame by the owning camera loop as a `Copy`
//! snapshot, so an update is seen at the next frame boundary and never
//! partway through one. The registry is sharded by camera id; a shard lock is
//! only held for the copy or the write, never across detection or publish.

use crate::error::SettingsValidationError;
use dashmap::DashMap;
use drishti_core::CameraId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::info;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;

/// Point-in-time copy of one camera's settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraSettings {
    pub detection_enabled: bool,
    pub confidence_threshold: f32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            detection_enabled: true,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }
}

impl CameraSettings {
    pub fn validate(&self) -> Result<(), SettingsValidationError> {
        check_threshold(self.confidence_threshold)
    }

    fn apply(&mut self, update: SettingUpdate) {
        match update {
            SettingUpdate::DetectionEnabled(enabled) => self.detection_enabled = enabled,
            SettingUpdate::ConfidenceThreshold(threshold) => self.confidence_threshold = threshold,
        }
    }
}

fn check_threshold(threshold: f32) -> Result<(), SettingsValidationError> {
    // NaN fails the range check too
    if (0.0..=1.0).contains(&threshold) {
        Ok(())
    } else {
        Err(SettingsValidationError::ThresholdOutOfRange(threshold))
    }
}

/// The closed set of settings a client may change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingKey {
    DetectionEnabled,
    ConfidenceThreshold,
}

impl SettingKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            SettingKey::DetectionEnabled => "detection_enabled",
            SettingKey::ConfidenceThreshold => "confidence_threshold",
        }
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SettingKey {
    type Err = SettingsValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "detection_enabled" => Ok(SettingKey::DetectionEnabled),
            "confidence_threshold" => Ok(SettingKey::ConfidenceThreshold),
            other => Err(SettingsValidationError::UnknownKey(other.to_string())),
        }
    }
}

/// A typed setting change
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SettingUpdate {
    DetectionEnabled(bool),
    ConfidenceThreshold(f32),
}

impl SettingUpdate {
    pub fn key(&self) -> SettingKey {
        match self {
            SettingUpdate::DetectionEnabled(_) => SettingKey::DetectionEnabled,
            SettingUpdate::ConfidenceThreshold(_) => SettingKey::ConfidenceThreshold,
        }
    }

    /// Build an update from a key name and a loosely typed JSON value.
    /// Booleans also accept `"true"`/`"false"`; thresholds accept numeric strings.
    pub fn from_json(key: &str, value: &Value) -> Result<Self, SettingsValidationError> {
        let key: SettingKey = key.parse()?;
        let invalid = |reason: &str| SettingsValidationError::InvalidValue {
            key: key.to_string(),
            reason: reason.to_string(),
        };

        match key {
            SettingKey::DetectionEnabled => match value {
                Value::Bool(enabled) => Ok(SettingUpdate::DetectionEnabled(*enabled)),
                Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                    "true" => Ok(SettingUpdate::DetectionEnabled(true)),
                    "false" => Ok(SettingUpdate::DetectionEnabled(false)),
                    _ => Err(invalid("expected a boolean")),
                },
                _ => Err(invalid("expected a boolean")),
            },
            SettingKey::ConfidenceThreshold => {
                let threshold = match value {
                    Value::Number(n) => n.as_f64().ok_or_else(|| invalid("expected a number"))?,
                    Value::String(s) => s
                        .trim()
                        .parse::<f64>()
                        .map_err(|_| invalid("expected a number"))?,
                    _ => return Err(invalid("expected a number")),
                };
                let threshold = threshold as f32;
                check_threshold(threshold)?;
                Ok(SettingUpdate::ConfidenceThreshold(threshold))
            }
        }
    }

    fn validate(&self) -> Result<(), SettingsValidationError> {
        match self {
            SettingUpdate::DetectionEnabled(_) => Ok(()),
            SettingUpdate::ConfidenceThreshold(threshold) => check_threshold(*threshold),
        }
    }
}

/// Concurrency-safe registry of per-camera settings
#[derive(Debug, Default)]
pub struct SettingsRegistry {
    entries: DashMap<CameraId, CameraSettings>,
}

impl SettingsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a camera with initial settings, replacing any previous entry
    pub fn register(
        &self,
        camera_id: CameraId,
        settings: CameraSettings,
    ) -> Result<(), SettingsValidationError> {
        settings.validate()?;
        self.entries.insert(camera_id, settings);
        Ok(())
    }

    pub fn unregister(&self, camera_id: &str) -> Option<CameraSettings> {
        self.entries.remove(camera_id).map(|(_, settings)| settings)
    }

    pub fn contains(&self, camera_id: &str) -> bool {
        self.entries.contains_key(camera_id)
    }

    /// Immutable snapshot of a camera's current settings
    pub fn get(&self, camera_id: &str) -> Result<CameraSettings, SettingsValidationError> {
        self.entries
            .get(camera_id)
            .map(|entry| *entry)
            .ok_or_else(|| SettingsValidationError::UnknownCamera(CameraId::new(camera_id)))
    }

    /// Validate and apply one change atomically; on error nothing is mutated.
    /// Returns the settings as they are after the change.
    pub fn set(
        &self,
        camera_id: &str,
        update: SettingUpdate,
    ) -> Result<CameraSettings, SettingsValidationError> {
        update.validate()?;
        let mut entry = self
            .entries
            .get_mut(camera_id)
            .ok_or_else(|| SettingsValidationError::UnknownCamera(CameraId::new(camera_id)))?;
        entry.apply(update);
        let updated = *entry;
        drop(entry);

        info!(camera_id = %camera_id, key = %update.key(), "Camera setting updated");
        Ok(updated)
    }

    /// Parse a key/value pair and apply it
    pub fn set_json(
        &self,
        camera_id: &str,
        key: &str,
        value: &Value,
    ) -> Result<CameraSettings, SettingsValidationError> {
        if !self.contains(camera_id) {
            return Err(SettingsValidationError::UnknownCamera(CameraId::new(camera_id)));
        }
        let update = SettingUpdate::from_json(key, value)?;
        self.set(camera_id, update)
    }

    /// Copy of every camera's settings, ordered by id
    pub fn snapshot_all(&self) -> BTreeMap<CameraId, CameraSettings> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
