//! Registry of running cameras

use crate::bus::FrameBus;
use crate::camera::worker::{CameraSource, SourcePipeline, StopOutcome};
use crate::error::EyeError;
use crate::settings::{CameraSettings, SettingsRegistry};
use drishti_core::{CameraId, CameraSpec};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Outcome of a global shutdown
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    pub stopped: Vec<CameraId>,
    /// Workers still running when the deadline passed
    pub abandoned: Vec<CameraId>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.abandoned.is_empty()
    }
}

/// Owns every [`CameraSource`] and the shared pipeline they run on.
///
/// A removed camera whose worker did not exit in time stays parked under its
/// id until the thread is gone; the id cannot be re-added before that.
pub struct CameraSupervisor {
    pipeline: SourcePipeline,
    cameras: RwLock<BTreeMap<CameraId, Arc<CameraSource>>>,
    detached: Mutex<BTreeMap<CameraId, Arc<CameraSource>>>,
}

impl CameraSupervisor {
    pub fn new(pipeline: SourcePipeline) -> Self {
        Self {
            pipeline,
            cameras: RwLock::new(BTreeMap::new()),
            detached: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn settings(&self) -> &Arc<SettingsRegistry> {
        &self.pipeline.settings
    }

    pub fn bus(&self) -> &Arc<FrameBus> {
        &self.pipeline.bus
    }

    pub fn pipeline(&self) -> &SourcePipeline {
        &self.pipeline
    }

    /// Register a camera without starting it.
    ///
    /// Fails with `CameraBusy` while a worker from an earlier registration of
    /// the same id is still running, and with `ShutDown` once the supervisor
    /// has been shut down.
    pub fn add_camera(
        &self,
        spec: CameraSpec,
        settings: CameraSettings,
    ) -> Result<Arc<CameraSource>, EyeError> {
        let mut cameras = self.cameras.write();
        if self.pipeline.bus.is_closed() {
            return Err(EyeError::ShutDown);
        }
        if cameras.contains_key(&spec.id) {
            return Err(EyeError::DuplicateCamera(spec.id));
        }
        {
            let mut detached = self.detached.lock();
            if let Some(previous) = detached.get(&spec.id) {
                if previous.is_running() {
                    return Err(EyeError::CameraBusy(spec.id));
                }
                detached.remove(&spec.id);
                debug!(camera_id = %spec.id, "Detached worker has exited");
            }
        }

        self.pipeline.settings.register(spec.id.clone(), settings)?;
        if !self.pipeline.bus.register(&spec.id) {
            self.pipeline.settings.unregister(spec.id.as_str());
            return Err(EyeError::ShutDown);
        }

        let id = spec.id.clone();
        let source = Arc::new(CameraSource::new(spec, self.pipeline.clone()));
        cameras.insert(id.clone(), source.clone());
        info!(camera_id = %id, "Camera added");
        Ok(source)
    }

    /// Stop a camera and forget it: its settings and bus slot go with it
    pub fn remove_camera(&self, camera_id: &str, timeout: Duration) -> Result<StopOutcome, EyeError> {
        let source = self
            .cameras
            .write()
            .remove(camera_id)
            .ok_or_else(|| EyeError::UnknownCamera(CameraId::new(camera_id)))?;
        // parked before stopping so the id stays busy while we wait
        self.detached.lock().insert(source.id().clone(), source.clone());
        self.pipeline.settings.unregister(camera_id);
        self.pipeline.bus.remove(camera_id);

        let outcome = source.stop(timeout);
        if outcome != StopOutcome::Abandoned {
            let mut detached = self.detached.lock();
            if detached
                .get(camera_id)
                .map_or(false, |parked| Arc::ptr_eq(parked, &source))
            {
                detached.remove(camera_id);
            }
        }
        info!(camera_id = %camera_id, outcome = ?outcome, "Camera removed");
        Ok(outcome)
    }

    pub fn camera(&self, camera_id: &str) -> Option<Arc<CameraSource>> {
        self.cameras.read().get(camera_id).cloned()
    }

    /// All cameras ordered by id
    pub fn cameras(&self) -> Vec<Arc<CameraSource>> {
        self.cameras.read().values().cloned().collect()
    }

    pub fn contains(&self, camera_id: &str) -> bool {
        self.cameras.read().contains_key(camera_id)
    }

    pub fn len(&self) -> usize {
        self.cameras.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cameras.read().is_empty()
    }

    /// Ids of removed cameras whose worker thread is still running
    pub fn detached(&self) -> Vec<CameraId> {
        let mut detached = self.detached.lock();
        detached.retain(|_, source| source.is_running());
        detached.keys().cloned().collect()
    }

    pub fn start(&self, camera_id: &str) -> Result<(), EyeError> {
        self.camera(camera_id)
            .ok_or_else(|| EyeError::UnknownCamera(CameraId::new(camera_id)))?
            .start()
    }

    pub fn stop(&self, camera_id: &str, timeout: Duration) -> Result<StopOutcome, EyeError> {
        Ok(self
            .camera(camera_id)
            .ok_or_else(|| EyeError::UnknownCamera(CameraId::new(camera_id)))?
            .stop(timeout))
    }

    /// Start every camera. One camera failing to start does not prevent the
    /// others; failures are returned.
    pub fn start_all(&self) -> Vec<(CameraId, EyeError)> {
        let mut failures = Vec::new();
        for source in self.cameras() {
            if let Err(e) = source.start() {
                warn!(camera_id = %source.id(), error = %e, "Failed to start camera");
                failures.push((source.id().clone(), e));
            }
        }
        failures
    }

    /// Stop every camera concurrently, waiting at most `timeout` overall,
    /// then close the frame bus.
    pub fn shutdown(&self, timeout: Duration) -> ShutdownReport {
        let deadline = Instant::now() + timeout;
        let cameras = self.cameras();

        // signal everyone before waiting on anyone
        let signalled: Vec<(Arc<CameraSource>, bool)> = cameras
            .into_iter()
            .map(|source| {
                let running = source.begin_stop();
                (source, running)
            })
            .collect();

        let mut report = ShutdownReport::default();
        let detached: Vec<Arc<CameraSource>> = self.detached.lock().values().cloned().collect();
        for source in detached {
            if source.is_running() && source.finish_stop(deadline) == StopOutcome::Abandoned {
                warn!(camera_id = %source.id(), "Removed camera still running at shutdown");
                report.abandoned.push(source.id().clone());
            }
        }
        for (source, running) in signalled {
            let outcome = if running {
                source.finish_stop(deadline)
            } else {
                StopOutcome::AlreadyStopped
            };
            match outcome {
                StopOutcome::Abandoned => {
                    warn!(camera_id = %source.id(), "Camera abandoned at shutdown");
                    report.abandoned.push(source.id().clone());
                }
                StopOutcome::Stopped | StopOutcome::AlreadyStopped => {
                    report.stopped.push(source.id().clone());
                }
            }
        }

        self.pipeline.bus.shutdown();
        info!(
            stopped = report.stopped.len(),
            abandoned = report.abandoned.len(),
            "Camera supervisor shut down"
        );
        report
    }
}

impl std::fmt::Debug for CameraSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraSupervisor")
            .field("cameras", &self.cameras.read().keys().collect::<Vec<_>>())
            .field("detached", &self.detached.lock().keys().collect::<Vec<_>>())
            .finish()
    }
}
