//! Background frame capture with a shared latest-frame slot.
//!
//! One capture thread continuously replaces the newest frame;
//! consumers read it at their own pace. There is no queue and no
//! backpressure — intermediate frames are dropped, and a consumer that
//! outpaces the camera simply reads the same frame twice. Writes are
//! last-write-wins; the mutex only guards the swap of the `Arc`
//! handle, never the pixel data itself.

use crate::camera::Camera;
use crate::frame::Frame;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// Read-side of a frame stream. Implemented by [`FrameSource`] and by
/// scripted feeds in tests.
pub trait FrameFeed: Send + Sync {
    /// The most recently captured frame, or `None` if nothing has been
    /// captured yet. Never blocks.
    fn read(&self) -> Option<Arc<Frame>>;
}

struct SharedSlot {
    latest: Mutex<Option<Arc<Frame>>>,
    running: AtomicBool,
}

/// Owns the camera for the lifetime of a capture session.
///
/// The capture thread holds the [`Camera`] and drops it when the
/// thread exits, so the device is released on every exit path —
/// normal stop, capture error, or drop of the source itself.
pub struct FrameSource {
    shared: Arc<SharedSlot>,
    handle: Option<JoinHandle<()>>,
}

impl FrameSource {
    /// Open the device and launch continuous capture.
    ///
    /// A device that cannot be opened is not an error: the source is
    /// returned anyway and `read()` yields `None` indefinitely, so the
    /// orchestrator degrades to skipping iterations instead of
    /// crashing.
    pub fn start(device_path: &str) -> Self {
        let shared = Arc::new(SharedSlot {
            latest: Mutex::new(None),
            running: AtomicBool::new(true),
        });

        let handle = match Camera::open(device_path) {
            Ok(camera) => {
                let slot = Arc::clone(&shared);
                match std::thread::Builder::new()
                    .name("presence-capture".into())
                    .spawn(move || capture_loop(camera, slot))
                {
                    Ok(h) => Some(h),
                    Err(e) => {
                        tracing::error!(error = %e, "failed to spawn capture thread");
                        None
                    }
                }
            }
            Err(e) => {
                tracing::warn!(
                    device = device_path,
                    error = %e,
                    "camera unavailable; frame source will yield no frames"
                );
                None
            }
        };

        FrameSource { shared, handle }
    }

    /// Halt capture and release the device. Idempotent; also runs on
    /// drop.
    pub fn stop(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("capture thread panicked");
            }
            tracing::info!("frame source stopped");
        }
    }
}

impl FrameFeed for FrameSource {
    fn read(&self) -> Option<Arc<Frame>> {
        self.shared.latest.lock().ok().and_then(|slot| slot.clone())
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.stop();
    }
}

fn capture_loop(camera: Camera, shared: Arc<SharedSlot>) {
    tracing::info!(device = %camera.device_path, "capture thread started");
    let result = camera.capture_into(|frame| {
        if let Ok(mut slot) = shared.latest.lock() {
            *slot = Some(Arc::new(frame));
        }
        shared.running.load(Ordering::SeqCst)
    });
    if let Err(e) = result {
        tracing::warn!(error = %e, "capture loop ended with error");
    }
    tracing::info!("capture thread exiting");
    // Camera is dropped here, releasing the device.
}
