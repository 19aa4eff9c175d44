//! Latest-frame bus
//!
//! One single-slot `watch` channel per camera. Publishing replaces the slot
//! and wakes subscribers; it never waits on them. A subscriber that falls
//! behind simply sees the newest frame next time it looks.

use crate::frame::Frame;
use dashmap::DashMap;
use drishti_core::CameraId;
use futures_util::stream::{self, Stream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

type Slot = watch::Sender<Option<Arc<Frame>>>;

#[derive(Debug, Default)]
pub struct FrameBus {
    slots: DashMap<CameraId, Slot>,
    closed: AtomicBool,
}

impl FrameBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the slot for a camera. Returns false if the bus is shut down.
    /// Registering an existing camera keeps its slot and subscribers.
    pub fn register(&self, camera_id: &CameraId) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        self.slots
            .entry(camera_id.clone())
            .or_insert_with(|| watch::channel(None).0);
        true
    }

    /// Overwrite the camera's slot with `frame` and notify subscribers.
    /// Frames for unregistered cameras are dropped; returns whether it was stored.
    pub fn publish(&self, frame: Frame) -> bool {
        match self.slots.get(frame.camera_id.as_str()) {
            Some(slot) => {
                slot.send_replace(Some(Arc::new(frame)));
                true
            }
            None => {
                debug!(camera_id = %frame.camera_id, "Dropping frame for unregistered camera");
                false
            }
        }
    }

    /// The most recently published frame, if any
    pub fn latest(&self, camera_id: &str) -> Option<Arc<Frame>> {
        self.slots
            .get(camera_id)
            .and_then(|slot| slot.borrow().clone())
    }

    /// Live sequence of frames for one camera, starting with the current slot
    /// contents. `None` for unknown cameras or after shutdown.
    pub fn subscribe(&self, camera_id: &str) -> Option<FrameSubscription> {
        let slot = self.slots.get(camera_id)?;
        let receiver = slot.subscribe();
        let pending = receiver.borrow().clone();
        Some(FrameSubscription {
            camera_id: slot.key().clone(),
            receiver,
            pending,
        })
    }

    pub fn contains(&self, camera_id: &str) -> bool {
        self.slots.contains_key(camera_id)
    }

    /// Close a camera's slot; its subscriptions end
    pub fn remove(&self, camera_id: &str) -> bool {
        self.slots.remove(camera_id).is_some()
    }

    /// Close every slot and refuse new registrations
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        self.slots.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn subscriber_count(&self, camera_id: &str) -> usize {
        self.slots
            .get(camera_id)
            .map(|slot| slot.receiver_count())
            .unwrap_or(0)
    }
}

/// Handle receiving one camera's frames
#[derive(Debug)]
pub struct FrameSubscription {
    camera_id: CameraId,
    receiver: watch::Receiver<Option<Arc<Frame>>>,
    pending: Option<Arc<Frame>>,
}

impl FrameSubscription {
    pub fn camera_id(&self) -> &CameraId {
        &self.camera_id
    }

    /// Wait for the next frame. Intermediate frames published while the
    /// caller was busy are skipped. Returns `None` once the slot is closed.
    pub async fn recv(&mut self) -> Option<Arc<Frame>> {
        if let Some(frame) = self.pending.take() {
            return Some(frame);
        }
        loop {
            self.receiver.changed().await.ok()?;
            let next = self.receiver.borrow_and_update().clone();
            if next.is_some() {
                return next;
            }
        }
    }

    /// Current slot contents without waiting
    pub fn current(&self) -> Option<Arc<Frame>> {
        self.receiver.borrow().clone()
    }

    pub fn into_stream(self) -> impl Stream<Item = Arc<Frame>> + Send + 'static {
        stream::unfold(self, |mut subscription| async move {
            subscription.recv().await.map(|frame| (frame, subscription))
        })
    }
}
