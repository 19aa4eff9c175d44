//! Snapshot capture and listing
//!
//! A snapshot is a copy of a camera's latest published JPEG, written to the
//! storage collaborator under `<camera>_<YYYYmmdd-HHMMSS-mmm>.jpg`. A second
//! capture within the same millisecond gets a `-<n>` counter before `.jpg`.

use crate::bus::FrameBus;
use crate::error::{SnapshotError, StorageError};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use drishti_core::CameraId;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};

const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S-%3f";
const LEGACY_TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Metadata of one stored snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub camera_id: CameraId,
    pub filename: String,
    pub timestamp: DateTime<Utc>,
    pub path: PathBuf,
}

/// A file already present in storage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub name: String,
    pub path: PathBuf,
    pub modified: DateTime<Utc>,
}

/// Where snapshot bytes end up
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Persist `bytes` under `name`, returning the resulting path
    async fn write(&self, name: &str, bytes: Bytes) -> Result<PathBuf, StorageError>;

    /// Snapshots already in storage
    async fn scan(&self) -> Result<Vec<StoredFile>, StorageError>;
}

/// Stores snapshots as files in one directory
#[derive(Debug, Clone)]
pub struct FsSnapshotStore {
    dir: PathBuf,
}

impl FsSnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn check_name(name: &str) -> Result<(), StorageError> {
    let plain = !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\'])
        && name != "..";
    if plain {
        Ok(())
    } else {
        Err(StorageError::InvalidName(name.to_string()))
    }
}

fn is_jpeg_name(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    !name.starts_with('.') && (lower.ends_with(".jpg") || lower.ends_with(".jpeg"))
}

#[async_trait]
impl SnapshotStore for FsSnapshotStore {
    async fn write(&self, name: &str, bytes: Bytes) -> Result<PathBuf, StorageError> {
        check_name(name)?;
        fs::create_dir_all(&self.dir).await?;

        // write then rename so readers never see a partial file
        let final_path = self.dir.join(name);
        let temp_path = self.dir.join(format!(".{}.tmp", name));
        if let Err(e) = fs::write(&temp_path, &bytes).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&temp_path, &final_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        Ok(final_path)
    }

    async fn scan(&self) -> Result<Vec<StoredFile>, StorageError> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !is_jpeg_name(&name) {
                continue;
            }
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            files.push(StoredFile {
                name,
                path: entry.path(),
                modified,
            });
        }
        Ok(files)
    }
}

/// File name for a snapshot of `camera_id` taken at `timestamp`
pub fn snapshot_filename(camera_id: &CameraId, timestamp: DateTime<Utc>) -> String {
    format!("{}_{}.jpg", camera_id.file_stem(), timestamp.format(TIMESTAMP_FORMAT))
}

fn numbered_filename(camera_id: &CameraId, timestamp: DateTime<Utc>, n: u32) -> String {
    format!(
        "{}_{}-{}.jpg",
        camera_id.file_stem(),
        timestamp.format(TIMESTAMP_FORMAT),
        n
    )
}

fn parse_stamp(stamp: &str) -> Option<NaiveDateTime> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(stamp, LEGACY_TIMESTAMP_FORMAT))
    {
        return Some(naive);
    }
    let (stamp, counter) = stamp.rsplit_once('-')?;
    if counter.is_empty() || !counter.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()
}

/// Split a snapshot file name into camera stem and timestamp. Accepts names
/// with and without milliseconds, and with a same-millisecond counter.
pub fn parse_snapshot_filename(name: &str) -> Option<(String, DateTime<Utc>)> {
    let stem = name
        .strip_suffix(".jpg")
        .or_else(|| name.strip_suffix(".jpeg"))?;

    // the timestamp itself contains no underscore
    let (camera, stamp) = stem.rsplit_once('_')?;
    if camera.is_empty() {
        return None;
    }
    let naive = parse_stamp(stamp)?;
    Some((camera.to_string(), Utc.from_utc_datetime(&naive)))
}

/// Captures snapshots from the frame bus and keeps their listing
pub struct SnapshotService {
    bus: Arc<FrameBus>,
    store: Arc<dyn SnapshotStore>,
    records: RwLock<Vec<Snapshot>>,
    /// Names recorded or being written
    claimed: Mutex<HashSet<String>>,
}

impl SnapshotService {
    pub fn new(bus: Arc<FrameBus>, store: Arc<dyn SnapshotStore>) -> Self {
        Self {
            bus,
            store,
            records: RwLock::new(Vec::new()),
            claimed: Mutex::new(HashSet::new()),
        }
    }

    /// Index snapshots already in storage, replacing the current listing.
    /// The timestamp comes from the file name, falling back to its mtime.
    pub async fn load_existing(&self) -> Result<usize, SnapshotError> {
        let files = self.store.scan().await?;
        let records: Vec<Snapshot> = files
            .into_iter()
            .map(|file| {
                let (camera, timestamp) = parse_snapshot_filename(&file.name).unwrap_or_else(|| {
                    let stem = file.name.split('_').next().unwrap_or_default().to_string();
                    (stem, file.modified)
                });
                Snapshot {
                    camera_id: CameraId::new(camera),
                    filename: file.name,
                    timestamp,
                    path: file.path,
                }
            })
            .collect();

        let count = records.len();
        *self.claimed.lock() = records.iter().map(|r| r.filename.clone()).collect();
        *self.records.write() = records;
        info!(count, "Indexed existing snapshots");
        Ok(count)
    }

    /// Persist the camera's current frame.
    ///
    /// Fails with `NoFrameAvailable` before the first frame is published.
    /// Storage failures are returned as-is and not retried.
    pub async fn capture(&self, camera_id: &str) -> Result<Snapshot, SnapshotError> {
        self.capture_at(camera_id, Utc::now()).await
    }

    async fn capture_at(
        &self,
        camera_id: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Snapshot, SnapshotError> {
        if !self.bus.contains(camera_id) {
            return Err(SnapshotError::UnknownCamera(CameraId::new(camera_id)));
        }
        let frame = self
            .bus
            .latest(camera_id)
            .ok_or_else(|| SnapshotError::NoFrameAvailable {
                camera_id: CameraId::new(camera_id),
            })?;

        let filename = self.claim_name(&frame.camera_id, timestamp);
        let path = match self.store.write(&filename, frame.encoded.clone()).await {
            Ok(path) => path,
            Err(e) => {
                self.claimed.lock().remove(&filename);
                warn!(camera_id = %camera_id, error = %e, "Snapshot write failed");
                return Err(e.into());
            }
        };

        let snapshot = Snapshot {
            camera_id: frame.camera_id.clone(),
            filename,
            timestamp,
            path,
        };

        self.records.write().push(snapshot.clone());

        info!(camera_id = %camera_id, filename = %snapshot.filename, "Snapshot saved");
        debug!(bytes = frame.encoded.len(), sequence = frame.sequence, "Snapshot payload");
        Ok(snapshot)
    }

    /// First free name for a capture at `timestamp`, reserved until released
    fn claim_name(&self, camera_id: &CameraId, timestamp: DateTime<Utc>) -> String {
        let mut claimed = self.claimed.lock();
        let mut name = snapshot_filename(camera_id, timestamp);
        let mut n = 1;
        while claimed.contains(&name) {
            name = numbered_filename(camera_id, timestamp, n);
            n += 1;
        }
        claimed.insert(name.clone());
        name
    }

    /// Recorded snapshot stored under `filename`
    pub fn find(&self, filename: &str) -> Option<Snapshot> {
        self.records
            .read()
            .iter()
            .find(|snapshot| snapshot.filename == filename)
            .cloned()
    }

    /// Every recorded snapshot, newest first
    pub fn list(&self) -> Vec<Snapshot> {
        let mut snapshots = self.records.read().clone();
        snapshots.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| b.filename.cmp(&a.filename))
        });
        snapshots
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}
