//! Per-camera worker thread

use crate::bus::FrameBus;
use crate::camera::lifecycle::{transition, CameraEvent, CameraState, RetryPolicy};
use crate::error::{EyeError, SourceError};
use crate::frame::{encode_jpeg, fit_resolution, Frame, RawFrame};
use crate::processing::{DetectionMemory, DetectionStage};
use crate::settings::SettingsRegistry;
use crate::source::{CameraConnector, FrameStream, Interrupt};
use chrono::{DateTime, Utc};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use drishti_core::{CameraId, CameraSpec, CaptureConfig};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

const STATE_CHANNEL_CAPACITY: usize = 64;

/// Capture parameters shared by every camera
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureOptions {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub jpeg_quality: u8,
    pub connect_timeout: Duration,
    pub stale_after: Duration,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self::from(&CaptureConfig::default())
    }
}

impl From<&CaptureConfig> for CaptureOptions {
    fn from(config: &CaptureConfig) -> Self {
        Self {
            width: config.width,
            height: config.height,
            fps: config.fps.max(1),
            jpeg_quality: config.jpeg_quality,
            connect_timeout: config.connect_timeout(),
            stale_after: config.stale_after(),
        }
    }
}

impl CaptureOptions {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.fps.max(1)
    }
}

/// Shared collaborators every camera worker needs
#[derive(Clone)]
pub struct SourcePipeline {
    pub connector: Arc<dyn CameraConnector>,
    pub settings: Arc<SettingsRegistry>,
    pub stage: DetectionStage,
    pub bus: Arc<FrameBus>,
    pub policy: RetryPolicy,
    pub capture: CaptureOptions,
}

/// Observable status of one camera
#[derive(Debug, Clone, Default, Serialize)]
pub struct CameraStatus {
    #[serde(flatten)]
    pub state: CameraState,
    pub last_frame_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub frames_published: u64,
    #[serde(skip)]
    last_frame_instant: Option<Instant>,
}

impl CameraStatus {
    /// Streaming and a frame arrived within `stale_after`
    pub fn is_connected(&self, stale_after: Duration) -> bool {
        self.state.is_streaming()
            && self
                .last_frame_instant
                .map_or(false, |at| at.elapsed() <= stale_after)
    }
}

/// Result of [`CameraSource::stop`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopOutcome {
    Stopped,
    AlreadyStopped,
    /// The worker did not exit in time; it is detached and will exit on its own
    Abandoned,
}

type InterruptSlot = Arc<Mutex<Option<Arc<dyn Interrupt>>>>;

struct WorkerControl {
    stop_tx: Option<Sender<()>>,
    done_rx: Receiver<()>,
    cancelled: Arc<AtomicBool>,
    interrupter: InterruptSlot,
    handle: Option<JoinHandle<()>>,
}

impl WorkerControl {
    fn is_alive(&self) -> bool {
        matches!(self.done_rx.try_recv(), Err(TryRecvError::Empty))
    }

    fn stop_requested(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Ask the worker to exit and unblock whatever it is waiting on
    fn signal(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.stop_tx.take();
        let interrupter = self.interrupter.lock().clone();
        if let Some(interrupter) = interrupter {
            interrupter.interrupt();
        }
    }
}

struct Shared {
    status: RwLock<CameraStatus>,
    states: broadcast::Sender<CameraState>,
}

/// Owns one camera's connection lifecycle.
///
/// At most one worker thread exists per source: `start` refuses while a
/// previous worker is still winding down.
pub struct CameraSource {
    spec: CameraSpec,
    pipeline: SourcePipeline,
    shared: Arc<Shared>,
    control: Mutex<Option<WorkerControl>>,
}

impl CameraSource {
    pub fn new(spec: CameraSpec, pipeline: SourcePipeline) -> Self {
        let (states, _) = broadcast::channel(STATE_CHANNEL_CAPACITY);
        Self {
            spec,
            pipeline,
            shared: Arc::new(Shared {
                status: RwLock::new(CameraStatus::default()),
                states,
            }),
            control: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &CameraId {
        &self.spec.id
    }

    pub fn spec(&self) -> &CameraSpec {
        &self.spec
    }

    pub fn state(&self) -> CameraState {
        self.shared.status.read().state
    }

    pub fn status(&self) -> CameraStatus {
        self.shared.status.read().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.shared
            .status
            .read()
            .is_connected(self.pipeline.capture.stale_after)
    }

    /// Whether a worker thread is currently alive
    pub fn is_running(&self) -> bool {
        self.control
            .lock()
            .as_ref()
            .map_or(false, WorkerControl::is_alive)
    }

    /// Every state transition from now on. Slow receivers may lag.
    pub fn subscribe_state(&self) -> broadcast::Receiver<CameraState> {
        self.shared.states.subscribe()
    }

    /// Start the worker. Starting a running camera is a no-op.
    pub fn start(&self) -> Result<(), EyeError> {
        let mut control = self.control.lock();
        if let Some(existing) = control.as_ref() {
            if existing.is_alive() {
                if existing.stop_requested() {
                    return Err(EyeError::CameraBusy(self.spec.id.clone()));
                }
                return Ok(());
            }
        }

        if !self.pipeline.bus.register(&self.spec.id) {
            return Err(EyeError::ShutDown);
        }

        let (stop_tx, stop_rx) = channel::bounded(1);
        let (done_tx, done_rx) = channel::bounded(1);
        let cancelled = Arc::new(AtomicBool::new(false));
        let interrupter: InterruptSlot = Arc::new(Mutex::new(None));

        let worker = Worker {
            spec: self.spec.clone(),
            pipeline: self.pipeline.clone(),
            shared: self.shared.clone(),
            stop_rx,
            cancelled: cancelled.clone(),
            interrupter: interrupter.clone(),
            sequence: self.shared.status.read().frames_published,
            detections: DetectionMemory::new(),
            _done: done_tx,
        };

        let handle = thread::Builder::new()
            .name(format!("camera-{}", self.spec.id))
            .spawn(move || worker.run_guarded())?;

        info!(camera_id = %self.spec.id, "Camera worker started");
        *control = Some(WorkerControl {
            stop_tx: Some(stop_tx),
            done_rx,
            cancelled,
            interrupter,
            handle: Some(handle),
        });
        Ok(())
    }

    /// Stop the worker, waiting up to `timeout` for it to exit. Idempotent.
    pub fn stop(&self, timeout: Duration) -> StopOutcome {
        let deadline = Instant::now() + timeout;
        if !self.begin_stop() {
            return StopOutcome::AlreadyStopped;
        }
        self.finish_stop(deadline)
    }

    /// Signal the worker without waiting. False if no worker is alive; an
    /// already signalled worker that is still winding down counts as alive.
    pub(crate) fn begin_stop(&self) -> bool {
        let alive = {
            let mut control = self.control.lock();
            match control.as_mut() {
                Some(worker) if worker.is_alive() => {
                    if !worker.stop_requested() {
                        worker.signal();
                    }
                    true
                }
                _ => {
                    *control = None;
                    false
                }
            }
        };
        self.mark_disconnected();
        alive
    }

    /// Wait for a signalled worker until `deadline`
    pub(crate) fn finish_stop(&self, deadline: Instant) -> StopOutcome {
        let (done_rx, handle) = {
            let mut control = self.control.lock();
            match control.as_mut() {
                Some(worker) => (worker.done_rx.clone(), worker.handle.take()),
                None => return StopOutcome::AlreadyStopped,
            }
        };

        let remaining = deadline.saturating_duration_since(Instant::now());
        match done_rx.recv_timeout(remaining) {
            Err(RecvTimeoutError::Disconnected) | Ok(()) => {
                if let Some(handle) = handle {
                    let _ = handle.join();
                }
                let mut control = self.control.lock();
                if control.as_ref().map_or(false, |w| !w.is_alive()) {
                    *control = None;
                }
                info!(camera_id = %self.spec.id, "Camera worker stopped");
                StopOutcome::Stopped
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(camera_id = %self.spec.id, "Camera worker did not stop in time, abandoning it");
                StopOutcome::Abandoned
            }
        }
    }

    fn mark_disconnected(&self) {
        let mut status = self.shared.status.write();
        let next = transition(&status.state, CameraEvent::Stop, &self.pipeline.policy);
        if next != status.state {
            status.state = next;
            let _ = self.shared.states.send(next);
        }
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        if let Some(worker) = self.control.get_mut().as_mut() {
            worker.signal();
        }
    }
}

impl std::fmt::Debug for CameraSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraSource")
            .field("id", &self.spec.id)
            .field("state", &self.state())
            .finish()
    }
}

enum SessionEnd {
    Stopped,
    Failed(SourceError),
}

struct Worker {
    spec: CameraSpec,
    pipeline: SourcePipeline,
    shared: Arc<Shared>,
    stop_rx: Receiver<()>,
    cancelled: Arc<AtomicBool>,
    interrupter: InterruptSlot,
    sequence: u64,
    detections: DetectionMemory,
    /// Dropped when the thread exits, which is what `stop` waits for
    _done: Sender<()>,
}

impl Worker {
    /// Run until stopped. A panic anywhere in the loop counts as a transient
    /// failure of the current attempt: the camera backs off and reconnects.
    fn run_guarded(mut self) {
        while panic::catch_unwind(AssertUnwindSafe(|| self.run())).is_err() {
            error!(camera_id = %self.spec.id, "Camera worker panicked");
            *self.interrupter.lock() = None;
            self.detections.clear();

            let error = SourceError::transient("worker panicked");
            let event = if self.state().is_streaming() {
                CameraEvent::ReadFailed(error.class)
            } else {
                CameraEvent::ConnectFailed(error.class)
            };
            if self.stopping() || !self.fail(event, &error) {
                break;
            }
        }
        debug!(camera_id = %self.spec.id, "Camera worker exiting");
    }

    fn run(&mut self) {
        self.apply(CameraEvent::Start);

        while !self.stopping() {
            let stream = match self
                .pipeline
                .connector
                .connect(&self.spec, self.pipeline.capture.connect_timeout)
            {
                Ok(stream) => stream,
                Err(e) => {
                    if self.stopping() || !self.fail(CameraEvent::ConnectFailed(e.class), &e) {
                        break;
                    }
                    continue;
                }
            };

            match self.session(stream) {
                SessionEnd::Stopped => break,
                SessionEnd::Failed(e) => {
                    let event = if self.state().is_streaming() {
                        CameraEvent::ReadFailed(e.class)
                    } else {
                        CameraEvent::ConnectFailed(e.class)
                    };
                    if self.stopping() || !self.fail(event, &e) {
                        break;
                    }
                }
            }
        }
    }

    /// Read from one open stream until it fails or we are stopped. The stream
    /// is released before returning.
    fn session(&mut self, mut stream: Box<dyn FrameStream>) -> SessionEnd {
        *self.interrupter.lock() = stream.interrupter();
        // stop may have run before the interrupter was visible
        let end = if self.stopping() {
            SessionEnd::Stopped
        } else {
            self.read_loop(stream.as_mut())
        };
        *self.interrupter.lock() = None;
        drop(stream);
        end
    }

    fn read_loop(&mut self, stream: &mut dyn FrameStream) -> SessionEnd {
        let interval = self.pipeline.capture.frame_interval();
        loop {
            let raw = match stream.read_frame() {
                Ok(raw) => raw,
                Err(e) if self.stopping() => {
                    debug!(camera_id = %self.spec.id, error = %e, "Read ended by stop");
                    return SessionEnd::Stopped;
                }
                Err(e) => return SessionEnd::Failed(e),
            };
            let started = Instant::now();

            if !self.state().is_streaming() {
                self.apply(CameraEvent::Connected);
            }
            self.publish(raw);

            let remaining = interval.saturating_sub(started.elapsed());
            if !self.pause(remaining) {
                return SessionEnd::Stopped;
            }
        }
    }

    fn publish(&mut self, raw: RawFrame) {
        let camera_id = &self.spec.id;
        let capture = &self.pipeline.capture;

        // one consistent settings copy per frame
        let settings = self
            .pipeline
            .settings
            .get(camera_id.as_str())
            .unwrap_or_default();
        let image = fit_resolution(raw.image, capture.width, capture.height);
        let output =
            self.pipeline
                .stage
                .process_with_memory(camera_id, image, &settings, &mut self.detections);

        let encoded = match encode_jpeg(&output.image, capture.jpeg_quality) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(camera_id = %camera_id, error = %e, "Failed to encode frame, skipping");
                return;
            }
        };

        if self.stopping() {
            return;
        }
        self.sequence += 1;
        let frame = Frame {
            camera_id: camera_id.clone(),
            image: Arc::new(output.image),
            encoded,
            captured_at: raw.captured_at,
            detections: output.detections,
            sequence: self.sequence,
        };
        self.pipeline.bus.publish(frame);

        let mut status = self.shared.status.write();
        status.last_frame_at = Some(raw.captured_at);
        status.last_frame_instant = Some(Instant::now());
        status.frames_published += 1;
    }

    /// Record a failure and wait out the backoff. False if stopped meanwhile.
    fn fail(&mut self, event: CameraEvent, error: &SourceError) -> bool {
        self.shared.status.write().last_error = Some(error.to_string());
        let state = self.apply(event);
        warn!(
            camera_id = %self.spec.id,
            class = %error.class,
            failures = state.failures(),
            error = %error.message,
            "Camera source failed"
        );

        let backoff = state.backoff().unwrap_or(self.pipeline.policy.base);
        if !self.pause(backoff) {
            return false;
        }
        self.apply(CameraEvent::BackoffElapsed);
        true
    }

    /// Sleep for `duration` unless stopped first. False if stopped.
    fn pause(&self, duration: Duration) -> bool {
        if duration.is_zero() {
            return !self.stopping();
        }
        match self.stop_rx.recv_timeout(duration) {
            Err(RecvTimeoutError::Timeout) => !self.stopping(),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => false,
        }
    }

    fn stopping(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn state(&self) -> CameraState {
        self.shared.status.read().state
    }

    /// Feed an event to the state machine. Ignored once stop was requested
    /// so a dying worker cannot overwrite the stopped state.
    fn apply(&self, event: CameraEvent) -> CameraState {
        let mut status = self.shared.status.write();
        if self.stopping() {
            return status.state;
        }
        let next = transition(&status.state, event, &self.pipeline.policy);
        if next != status.state {
            status.state = next;
            if next.is_streaming() {
                status.last_error = None;
            }
            let _ = self.shared.states.send(next);
            drop(status);
            info!(
                camera_id = %self.spec.id,
                state = next.name(),
                failures = next.failures(),
                backoff_ms = next.backoff().map(|b| b.as_millis() as u64),
                "Camera state changed"
            );
        }
        next
    }
}
