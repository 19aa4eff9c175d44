//! RTSP/HTTP cameras through an ffmpeg subprocess
//!
//! ffmpeg transcodes the camera stream to MJPEG on stdout. A pump thread
//! splits the byte stream into JPEG images and hands them over through a
//! one-slot channel, replacing any frame the camera loop has not taken yet.
//! Interrupting the stream kills the child, which ends the pump.

use crate::error::SourceError;
use crate::frame::{decode_jpeg, RawFrame};
use crate::source::{CameraConnector, FrameStream, Interrupt};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use drishti_core::{CameraSpec, CaptureConfig};
use parking_lot::Mutex;
use std::io::{ErrorKind, Read};
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];
const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;
const STDERR_TAIL_BYTES: usize = 4096;
const EXIT_GRACE: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone)]
pub struct FfmpegConnector {
    ffmpeg_path: String,
    rtsp_transport: String,
    read_timeout: Duration,
    fps: u32,
}

impl FfmpegConnector {
    pub fn new(ffmpeg_path: impl Into<String>, read_timeout: Duration, fps: u32) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            rtsp_transport: "tcp".to_string(),
            read_timeout,
            fps: fps.max(1),
        }
    }

    pub fn from_capture(capture: &CaptureConfig) -> Self {
        Self::new(capture.ffmpeg_path.clone(), capture.read_timeout(), capture.fps)
            .with_rtsp_transport(capture.rtsp_transport.clone())
    }

    pub fn with_rtsp_transport(mut self, transport: impl Into<String>) -> Self {
        self.rtsp_transport = transport.into();
        self
    }

    /// Command line for one source address
    pub fn build_args(&self, url: &str) -> Vec<String> {
        let mut args: Vec<String> = [
            "-hide_banner",
            "-loglevel",
            "error",
            "-fflags",
            "+nobuffer+discardcorrupt",
            "-flags",
            "low_delay",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let is_rtsp = url.to_ascii_lowercase().starts_with("rtsp");
        if is_rtsp {
            args.push("-rtsp_transport".to_string());
            args.push(self.rtsp_transport.clone());
        }

        args.extend([
            "-i".to_string(),
            url.to_string(),
            "-an".to_string(),
            "-vf".to_string(),
            format!("fps={}", self.fps),
            "-f".to_string(),
            "mjpeg".to_string(),
            "-q:v".to_string(),
            "5".to_string(),
            "-".to_string(),
        ]);
        args
    }
}

impl CameraConnector for FfmpegConnector {
    fn connect(
        &self,
        spec: &CameraSpec,
        connect_timeout: Duration,
    ) -> Result<Box<dyn FrameStream>, SourceError> {
        let url = source_url(spec)?;
        let mut child = Command::new(&self.ffmpeg_path)
            .args(self.build_args(&url))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => {
                    SourceError::config(format!("ffmpeg binary not found: {}", self.ffmpeg_path))
                }
                _ => SourceError::transient(format!("failed to spawn ffmpeg: {}", e)),
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let process = Arc::new(FfmpegProcess {
            child: Mutex::new(child),
            interrupted: AtomicBool::new(false),
        });
        let (Some(stdout), Some(stderr)) = (stdout, stderr) else {
            process.kill();
            return Err(SourceError::transient("ffmpeg pipes unavailable"));
        };

        let (frame_tx, frame_rx) = channel::bounded(1);
        let pump_rx = frame_rx.clone();
        let thread_name = format!("ffmpeg-{}", spec.id);
        let pump = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || pump_frames(stdout, frame_tx, pump_rx));
        let stderr_reader = thread::Builder::new()
            .name(format!("{}-stderr", thread_name))
            .spawn(move || collect_stderr(stderr));
        let (Ok(_pump), Ok(stderr_reader)) = (pump, stderr_reader) else {
            process.kill();
            return Err(SourceError::transient("failed to start ffmpeg reader threads"));
        };

        info!(camera_id = %spec.id, url = %redact_url(&url), "ffmpeg source started");

        Ok(Box::new(FfmpegStream {
            frames: frame_rx,
            first_timeout: connect_timeout,
            read_timeout: self.read_timeout,
            received_any: false,
            process,
            stderr_reader: Some(stderr_reader),
        }))
    }
}

struct FfmpegProcess {
    child: Mutex<Child>,
    interrupted: AtomicBool,
}

impl FfmpegProcess {
    fn kill(&self) {
        let mut child = self.child.lock();
        if let Ok(None) = child.try_wait() {
            let _ = child.kill();
        }
        let _ = child.wait();
    }

    /// Wait briefly for a natural exit, then kill
    fn reap(&self) {
        let deadline = Instant::now() + EXIT_GRACE;
        loop {
            let exited = matches!(self.child.lock().try_wait(), Ok(Some(_)));
            if exited || Instant::now() >= deadline {
                break;
            }
            thread::sleep(Duration::from_millis(20));
        }
        self.kill();
    }
}

impl Interrupt for FfmpegProcess {
    fn interrupt(&self) {
        self.interrupted.store(true, Ordering::Release);
        let _ = self.child.lock().kill();
    }
}

struct FfmpegStream {
    frames: Receiver<Vec<u8>>,
    first_timeout: Duration,
    read_timeout: Duration,
    received_any: bool,
    process: Arc<FfmpegProcess>,
    stderr_reader: Option<JoinHandle<String>>,
}

impl FfmpegStream {
    fn exit_error(&mut self) -> SourceError {
        if self.process.interrupted.load(Ordering::Acquire) {
            return SourceError::interrupted();
        }
        self.process.reap();
        let stderr = self
            .stderr_reader
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();
        classify_ffmpeg_exit(&stderr)
    }
}

impl FrameStream for FfmpegStream {
    fn read_frame(&mut self) -> Result<RawFrame, SourceError> {
        let timeout = if self.received_any {
            self.read_timeout
        } else {
            self.first_timeout
        };
        match self.frames.recv_timeout(timeout) {
            Ok(jpeg) => {
                self.received_any = true;
                let image = decode_jpeg(&jpeg)?;
                Ok(RawFrame::new(image))
            }
            Err(RecvTimeoutError::Timeout) => {
                if self.process.interrupted.load(Ordering::Acquire) {
                    return Err(SourceError::interrupted());
                }
                Err(SourceError::transient(format!(
                    "no frame within {} ms",
                    timeout.as_millis()
                )))
            }
            Err(RecvTimeoutError::Disconnected) => Err(self.exit_error()),
        }
    }

    fn interrupter(&self) -> Option<Arc<dyn Interrupt>> {
        Some(self.process.clone())
    }
}

impl Drop for FfmpegStream {
    fn drop(&mut self) {
        self.process.kill();
        debug!("ffmpeg process released");
    }
}

fn pump_frames(mut stdout: ChildStdout, tx: Sender<Vec<u8>>, rx: Receiver<Vec<u8>>) {
    let mut splitter = MjpegSplitter::new();
    let mut chunk = vec![0u8; 64 * 1024];
    loop {
        match stdout.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                for frame in splitter.push(&chunk[..n]) {
                    if !offer_latest(&tx, &rx, frame) {
                        return;
                    }
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!(error = %e, "ffmpeg stdout read failed");
                break;
            }
        }
    }
}

/// Put `frame` in the slot, evicting an unread one. False once the reader is gone.
fn offer_latest(tx: &Sender<Vec<u8>>, rx: &Receiver<Vec<u8>>, frame: Vec<u8>) -> bool {
    match tx.try_send(frame) {
        Ok(()) => true,
        Err(TrySendError::Full(frame)) => {
            let _ = rx.try_recv();
            !matches!(tx.try_send(frame), Err(TrySendError::Disconnected(_)))
        }
        Err(TrySendError::Disconnected(_)) => false,
    }
}

fn collect_stderr(mut stderr: ChildStderr) -> String {
    let mut tail: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        match stderr.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                tail.extend_from_slice(&chunk[..n]);
                if tail.len() > STDERR_TAIL_BYTES {
                    let excess = tail.len() - STDERR_TAIL_BYTES;
                    tail.drain(..excess);
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
    String::from_utf8_lossy(&tail).into_owned()
}

/// Splits a concatenated MJPEG byte stream into individual JPEG images
#[derive(Debug, Default)]
pub struct MjpegSplitter {
    buf: Vec<u8>,
    /// Offset from which to resume looking for EOI in `buf`
    scan_from: usize,
}

impl MjpegSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes, returning every image completed by them
    pub fn push(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        self.buf.extend_from_slice(data);
        let mut frames = Vec::new();

        loop {
            let Some(start) = find_marker(&self.buf, SOI, 0) else {
                // keep a trailing 0xFF that may begin the next SOI
                let keep = usize::from(self.buf.last() == Some(&0xFF));
                let drop_len = self.buf.len() - keep;
                self.buf.drain(..drop_len);
                self.scan_from = 0;
                break;
            };
            if start > 0 {
                self.buf.drain(..start);
                self.scan_from = 0;
            }

            let Some(end) = find_marker(&self.buf, EOI, self.scan_from.max(SOI.len())) else {
                self.scan_from = self.buf.len().saturating_sub(1);
                break;
            };
            frames.push(self.buf.drain(..end + EOI.len()).collect());
            self.scan_from = 0;
        }

        if self.buf.len() > MAX_FRAME_BYTES {
            warn!(bytes = self.buf.len(), "Discarding oversized MJPEG fragment");
            self.buf.clear();
            self.scan_from = 0;
        }
        frames
    }
}

fn find_marker(buf: &[u8], marker: [u8; 2], from: usize) -> Option<usize> {
    if from >= buf.len() {
        return None;
    }
    buf[from..]
        .windows(2)
        .position(|w| w == marker)
        .map(|pos| pos + from)
}

/// Map ffmpeg's final stderr output to a failure class
pub fn classify_ffmpeg_exit(stderr: &str) -> SourceError {
    let message = stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("ffmpeg exited without output")
        .to_string();
    let lower = stderr.to_ascii_lowercase();

    if lower.contains("401") || lower.contains("unauthorized") {
        SourceError::auth(message)
    } else if lower.contains("invalid data")
        || lower.contains("no such file")
        || lower.contains("404")
        || lower.contains("protocol not found")
    {
        SourceError::config(message)
    } else {
        SourceError::transient(message)
    }
}

/// The camera address with credentials filled in from the `CameraSpec`, unless the
/// address already carries a user.
pub fn source_url(spec: &CameraSpec) -> Result<String, SourceError> {
    let Some(credentials) = &spec.credentials else {
        return Ok(spec.url.clone());
    };
    let mut url = Url::parse(&spec.url)
        .map_err(|e| SourceError::config(format!("invalid camera url: {}", e)))?;
    if url.username().is_empty() {
        url.set_username(&credentials.username)
            .map_err(|_| SourceError::config("camera url cannot carry credentials"))?;
        let password = Some(credentials.password.as_str()).filter(|p| !p.is_empty());
        url.set_password(password)
            .map_err(|_| SourceError::config("camera url cannot carry credentials"))?;
    }
    Ok(url.to_string())
}

/// Address safe to log
pub fn redact_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) if url.password().is_some() => {
            let _ = url.set_password(Some("***"));
            url.to_string()
        }
        _ => raw.to_string(),
    }
}
