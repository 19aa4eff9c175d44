//! Shared fakes for drishti-eye integration tests

#![allow(dead_code)]

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use drishti_core::{BoundingBox, CameraId, CameraSpec, Detection};
use drishti_eye::camera::{CaptureOptions, RetryPolicy, SourcePipeline};
use drishti_eye::error::{DetectionError, FailureClass, SourceError};
use drishti_eye::frame::RawFrame;
use drishti_eye::processing::{DetectionStage, Detector, NoopDetector};
use drishti_eye::source::{CameraConnector, FrameStream, Interrupt};
use drishti_eye::{FrameBus, SettingsRegistry};
use image::{Rgb, RgbImage};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const WIDTH: u32 = 64;
pub const HEIGHT: u32 = 48;

pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        base: Duration::from_millis(10),
        cap: Duration::from_millis(80),
        fatal_threshold: 10,
    }
}

pub fn fast_capture() -> CaptureOptions {
    CaptureOptions {
        width: WIDTH,
        height: HEIGHT,
        fps: 200,
        jpeg_quality: 70,
        connect_timeout: Duration::from_millis(500),
        stale_after: Duration::from_secs(5),
    }
}

pub fn pipeline(connector: Arc<dyn CameraConnector>, detector: Arc<dyn Detector>) -> SourcePipeline {
    SourcePipeline {
        connector,
        settings: Arc::new(SettingsRegistry::new()),
        stage: DetectionStage::new(detector),
        bus: Arc::new(FrameBus::new()),
        policy: fast_policy(),
        capture: fast_capture(),
    }
}

pub fn noop_pipeline(connector: Arc<dyn CameraConnector>) -> SourcePipeline {
    pipeline(connector, Arc::new(NoopDetector))
}

pub fn solid(value: u8) -> RgbImage {
    RgbImage::from_pixel(WIDTH, HEIGHT, Rgb([value, value, value]))
}

/// Poll `condition` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

/// Counts how many connect/read calls are in flight at once
#[derive(Debug, Default)]
pub struct InFlight {
    active: AtomicUsize,
    max_active: AtomicUsize,
    total: AtomicUsize,
}

impl InFlight {
    pub fn enter(self: &Arc<Self>) -> InFlightGuard {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        self.total.fetch_add(1, Ordering::SeqCst);
        InFlightGuard(self.clone())
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

pub struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// What a scripted connect attempt does
#[derive(Debug, Clone, Copy)]
pub enum Step {
    /// `connect` fails with this class
    Refuse(FailureClass),
    /// Connects and yields `frames` frames, then fails transiently. `None` streams forever.
    Stream { frames: Option<usize> },
    /// Connects, then the first read blocks until interrupted
    Hang,
    /// Connects, then every read sleeps this long and ignores interrupts
    Stubborn(Duration),
}

/// Connector following a script; the last step repeats forever
pub struct ScriptedConnector {
    steps: Mutex<VecDeque<Step>>,
    last: Mutex<Step>,
    pub in_flight: Arc<InFlight>,
    pub connects: AtomicUsize,
    frame_delay: Duration,
}

impl ScriptedConnector {
    pub fn new(steps: Vec<Step>) -> Arc<Self> {
        let last = steps.last().copied().unwrap_or(Step::Stream { frames: None });
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            last: Mutex::new(last),
            in_flight: Arc::new(InFlight::default()),
            connects: AtomicUsize::new(0),
            frame_delay: Duration::from_millis(2),
        })
    }

    pub fn streaming() -> Arc<Self> {
        Self::new(vec![Step::Stream { frames: None }])
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> Step {
        let mut steps = self.steps.lock();
        match steps.pop_front() {
            Some(step) => {
                *self.last.lock() = step;
                step
            }
            None => *self.last.lock(),
        }
    }
}

impl CameraConnector for ScriptedConnector {
    fn connect(&self, _spec: &CameraSpec, _timeout: Duration) -> Result<Box<dyn FrameStream>, SourceError> {
        let _guard = self.in_flight.enter();
        self.connects.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(1));

        let step = self.next_step();
        if let Step::Refuse(class) = step {
            return Err(SourceError::new(class, "scripted refusal"));
        }
        let (stop_tx, stop_rx) = channel::bounded(1);
        Ok(Box::new(ScriptedStream {
            step,
            produced: 0,
            frame_delay: self.frame_delay,
            in_flight: self.in_flight.clone(),
            stop_rx,
            interrupter: Arc::new(ChannelInterrupt(stop_tx)),
        }))
    }
}

struct ChannelInterrupt(Sender<()>);

impl Interrupt for ChannelInterrupt {
    fn interrupt(&self) {
        let _ = self.0.try_send(());
    }
}

struct ScriptedStream {
    step: Step,
    produced: usize,
    frame_delay: Duration,
    in_flight: Arc<InFlight>,
    stop_rx: Receiver<()>,
    interrupter: Arc<ChannelInterrupt>,
}

impl FrameStream for ScriptedStream {
    fn read_frame(&mut self) -> Result<RawFrame, SourceError> {
        let _guard = self.in_flight.enter();
        match self.step {
            Step::Hang => {
                let _ = self.stop_rx.recv();
                Err(SourceError::interrupted())
            }
            Step::Stubborn(delay) => {
                std::thread::sleep(delay);
                Err(SourceError::transient("stubborn read ended"))
            }
            Step::Stream { frames } => {
                if frames.map_or(false, |limit| self.produced >= limit) {
                    return Err(SourceError::transient("scripted stream end"));
                }
                match self.stop_rx.recv_timeout(self.frame_delay) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => Err(SourceError::interrupted()),
                    Err(RecvTimeoutError::Timeout) => {
                        self.produced += 1;
                        Ok(RawFrame::new(solid((self.produced % 256) as u8)))
                    }
                }
            }
            Step::Refuse(class) => Err(SourceError::new(class, "unreachable")),
        }
    }

    fn interrupter(&self) -> Option<Arc<dyn Interrupt>> {
        Some(self.interrupter.clone())
    }
}

/// Detector returning the same candidates for every frame
pub struct FixedDetector {
    pub candidates: Vec<Detection>,
}

impl FixedDetector {
    pub fn with_confidences(confidences: &[f32]) -> Arc<Self> {
        let candidates = confidences
            .iter()
            .enumerate()
            .map(|(i, c)| {
                Detection::new("person", *c, BoundingBox::new(2.0 + i as f32 * 12.0, 10.0, 10.0, 10.0))
            })
            .collect();
        Arc::new(Self { candidates })
    }
}

impl Detector for FixedDetector {
    fn name(&self) -> &str {
        "fixed"
    }

    fn detect(&self, _image: &RgbImage) -> Result<Vec<Detection>, DetectionError> {
        Ok(self.candidates.clone())
    }
}

pub struct FailingDetector;

impl Detector for FailingDetector {
    fn name(&self) -> &str {
        "failing"
    }

    fn detect(&self, _image: &RgbImage) -> Result<Vec<Detection>, DetectionError> {
        Err(DetectionError::Inference("scripted failure".to_string()))
    }
}

pub fn spec(id: &str) -> CameraSpec {
    CameraSpec::new(CameraId::new(id), format!("fake://{}", id))
}
