//! Camera sources
//!
//! A connector opens a [`FrameStream`] for a camera. Streams are read from
//! the camera's own thread with blocking calls; [`Interrupt`] lets another
//! thread unblock a pending read when the camera is stopped.

pub mod ffmpeg;
pub mod test_pattern;

use crate::error::SourceError;
use crate::frame::RawFrame;
use drishti_core::CameraSpec;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub use ffmpeg::FfmpegConnector;
pub use test_pattern::TestPatternConnector;

/// Unblocks a stream's pending read from another thread
pub trait Interrupt: Send + Sync {
    fn interrupt(&self);
}

/// An open camera stream
pub trait FrameStream: Send {
    /// Block until the next frame, a timeout, or a failure
    fn read_frame(&mut self) -> Result<RawFrame, SourceError>;

    /// Handle used by `stop` to abort a blocking read. Streams whose reads
    /// always return within the read timeout may return `None`.
    fn interrupter(&self) -> Option<Arc<dyn Interrupt>> {
        None
    }
}

/// Opens streams for camera specs
pub trait CameraConnector: Send + Sync {
    fn connect(
        &self,
        spec: &CameraSpec,
        connect_timeout: Duration,
    ) -> Result<Box<dyn FrameStream>, SourceError>;
}

/// Dispatches to a connector by URL scheme
#[derive(Default)]
pub struct RoutingConnector {
    routes: HashMap<String, Arc<dyn CameraConnector>>,
    fallback: Option<Arc<dyn CameraConnector>>,
}

impl RoutingConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, scheme: &str, connector: Arc<dyn CameraConnector>) -> Self {
        self.routes.insert(scheme.to_ascii_lowercase(), connector);
        self
    }

    /// Connector for addresses without a scheme (device paths, local files)
    pub fn fallback(mut self, connector: Arc<dyn CameraConnector>) -> Self {
        self.fallback = Some(connector);
        self
    }

    /// `test://` goes to the synthetic source, network schemes to ffmpeg
    pub fn standard(ffmpeg: FfmpegConnector, test_pattern: TestPatternConnector) -> Self {
        let ffmpeg: Arc<dyn CameraConnector> = Arc::new(ffmpeg);
        Self::new()
            .route("test", Arc::new(test_pattern))
            .route("rtsp", ffmpeg.clone())
            .route("rtsps", ffmpeg.clone())
            .route("http", ffmpeg.clone())
            .route("https", ffmpeg.clone())
            .route("file", ffmpeg.clone())
            .fallback(ffmpeg)
    }

    fn pick(&self, spec: &CameraSpec) -> Result<&Arc<dyn CameraConnector>, SourceError> {
        match spec.scheme() {
            Some(scheme) => self
                .routes
                .get(&scheme)
                .ok_or_else(|| SourceError::config(format!("unsupported url scheme: {}", scheme))),
            None => self
                .fallback
                .as_ref()
                .ok_or_else(|| SourceError::config("camera url has no scheme")),
        }
    }
}

impl CameraConnector for RoutingConnector {
    fn connect(
        &self,
        spec: &CameraSpec,
        connect_timeout: Duration,
    ) -> Result<Box<dyn FrameStream>, SourceError> {
        self.pick(spec)?.connect(spec, connect_timeout)
    }
}
