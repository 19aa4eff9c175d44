//! Synthetic source for demos and tests (`test://` addresses)

use crate::error::SourceError;
use crate::frame::RawFrame;
use crate::source::{CameraConnector, FrameStream, Interrupt};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use drishti_core::CameraSpec;
use image::{Rgb, RgbImage};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Produces a moving gradient at a fixed frame rate
#[derive(Debug, Clone)]
pub struct TestPatternConnector {
    width: u32,
    height: u32,
    fps: u32,
}

impl TestPatternConnector {
    pub fn new(width: u32, height: u32, fps: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            fps: fps.max(1),
        }
    }
}

impl CameraConnector for TestPatternConnector {
    fn connect(&self, _spec: &CameraSpec, _connect_timeout: Duration) -> Result<Box<dyn FrameStream>, SourceError> {
        let (stop_tx, stop_rx) = channel::bounded(1);
        Ok(Box::new(TestPatternStream {
            width: self.width,
            height: self.height,
            interval: Duration::from_secs(1) / self.fps,
            tick: 0,
            next_due: None,
            stop_rx,
            interrupter: Arc::new(PatternInterrupt { stop_tx }),
        }))
    }
}

struct PatternInterrupt {
    stop_tx: Sender<()>,
}

impl Interrupt for PatternInterrupt {
    fn interrupt(&self) {
        let _ = self.stop_tx.try_send(());
    }
}

struct TestPatternStream {
    width: u32,
    height: u32,
    interval: Duration,
    tick: u64,
    next_due: Option<Instant>,
    stop_rx: Receiver<()>,
    interrupter: Arc<PatternInterrupt>,
}

impl TestPatternStream {
    fn render(&self) -> RgbImage {
        let (w, h) = (self.width, self.height);
        let shift = (self.tick.wrapping_mul(4) % w as u64) as u32;
        let blue = (self.tick % 256) as u8;
        RgbImage::from_fn(w, h, |x, y| {
            let r = ((x + shift) % w * 255 / w) as u8;
            let g = (y * 255 / h) as u8;
            Rgb([r, g, blue])
        })
    }
}

impl FrameStream for TestPatternStream {
    fn read_frame(&mut self) -> Result<RawFrame, SourceError> {
        if let Some(due) = self.next_due {
            let wait = due.saturating_duration_since(Instant::now());
            match self.stop_rx.recv_timeout(wait) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => return Err(SourceError::interrupted()),
                Err(RecvTimeoutError::Timeout) => {}
            }
        } else if self.stop_rx.try_recv().is_ok() {
            return Err(SourceError::interrupted());
        }

        let image = self.render();
        self.tick = self.tick.wrapping_add(1);
        self.next_due = Some(Instant::now() + self.interval);
        Ok(RawFrame::new(image))
    }

    fn interrupter(&self) -> Option<Arc<dyn Interrupt>> {
        Some(self.interrupter.clone())
    }
}
