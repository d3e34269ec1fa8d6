// SPDX-License-Identifier: GPL-3.0-only

//! Background frame cache for asynchronous cameras
//!
//! The updater fetches frames on its own thread and keeps the latest one
//! cached, so readers of an asynchronously opened camera never wait on the
//! device. The pace of the loop is decided by a [`DelayCalculator`].

use super::camera::{Camera, CameraInner};
use crate::backends::camera::{CaptureLoopController, Frame, LoopAction, StopToken};
use crate::constants::{DEFAULT_TARGET_FPS, IMAGE_POLL_ATTEMPTS, IMAGE_POLL_INTERVAL, smooth_fps};
use crate::errors::{CaptureError, CaptureResult};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, trace, warn};

static UPDATER_NUMBER: AtomicUsize = AtomicUsize::new(0);

/// Decides how long the updater sleeps between two fetches
pub trait DelayCalculator: Send + Sync {
    /// `snapshot_duration` is the time the last fetch took; `device_fps` is
    /// set when the device reports its own frame rate
    fn calculate_delay(&self, snapshot_duration: Duration, device_fps: Option<f64>) -> Duration;
}

/// Aims for a fixed frame rate, never sleeping when the device is slower
#[derive(Debug, Clone, Copy)]
pub struct DefaultDelayCalculator {
    target_fps: u32,
}

impl DefaultDelayCalculator {
    pub fn new(target_fps: u32) -> Self {
        Self {
            target_fps: target_fps.max(1),
        }
    }

    pub fn target_fps(&self) -> u32 {
        self.target_fps
    }
}

impl Default for DefaultDelayCalculator {
    fn default() -> Self {
        Self::new(DEFAULT_TARGET_FPS)
    }
}

impl DelayCalculator for DefaultDelayCalculator {
    fn calculate_delay(&self, snapshot_duration: Duration, _device_fps: Option<f64>) -> Duration {
        let frame_time = 1000 / self.target_fps as u64;
        let spent = snapshot_duration.as_millis() as u64;
        Duration::from_millis(frame_time.saturating_sub(spent))
    }
}

/// Cached frame with a freshness flag, refreshed by a background loop
pub struct FrameUpdater {
    camera: Weak<CameraInner>,
    image: Mutex<Option<Frame>>,
    image_new: AtomicBool,
    fps: Mutex<f64>,
    delay_calculator: Mutex<Arc<dyn DelayCalculator>>,
    running: AtomicBool,
    controller: Mutex<Option<CaptureLoopController>>,
}

impl FrameUpdater {
    pub(crate) fn new(camera: Weak<CameraInner>, delay_calculator: Arc<dyn DelayCalculator>) -> Self {
        Self {
            camera,
            image: Mutex::new(None),
            image_new: AtomicBool::new(false),
            fps: Mutex::new(0.0),
            delay_calculator: Mutex::new(delay_calculator),
            running: AtomicBool::new(false),
            controller: Mutex::new(None),
        }
    }

    pub fn set_delay_calculator(&self, delay_calculator: Arc<dyn DelayCalculator>) {
        *self.delay_calculator.lock().unwrap_or_else(|e| e.into_inner()) = delay_calculator;
    }

    /// Prime the cache with one synchronous fetch, then start the loop
    pub fn start(self: &Arc<Self>) -> CaptureResult<()> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Frame updater is already started");
            return Ok(());
        }

        let Some(camera) = self.camera() else {
            self.running.store(false, Ordering::SeqCst);
            return Err(CaptureError::InvalidState(
                "Camera of the frame updater is gone".to_string(),
            ));
        };

        // Drop the previous session frame before priming
        *self.image.lock().unwrap_or_else(|e| e.into_inner()) = None;
        self.image_new.store(false, Ordering::SeqCst);

        match camera.fetch_frame() {
            Ok(Some(frame)) => *self.image.lock().unwrap_or_else(|e| e.into_inner()) = Some(frame),
            Ok(None) => {}
            Err(e) => warn!(camera = %camera.name(), error = %e, "Cannot prime frame cache"),
        }
        drop(camera);

        let name = format!(
            "webcam-updater-thread-{}",
            UPDATER_NUMBER.fetch_add(1, Ordering::SeqCst) + 1
        );
        let updater = Arc::downgrade(self);
        let controller = CaptureLoopController::start(&name, move |token| {
            match updater.upgrade() {
                Some(updater) => updater.tick(token),
                None => LoopAction::Stop,
            }
        });

        match controller {
            Ok(controller) => {
                *self.controller.lock().unwrap_or_else(|e| e.into_inner()) = Some(controller);
                debug!(thread = %name, "Frame updater has been started");
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                Err(e.into())
            }
        }
    }

    /// Stop the loop and wait until no tick is in flight
    pub fn stop(&self) {
        if self
            .running
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Frame updater is already stopped");
            return;
        }

        let controller = self
            .controller
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(mut controller) = controller {
            controller.stop();
        }
        debug!("Frame updater has been stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Latest cached frame
    ///
    /// Waits for the first frame when the cache is still empty, giving up
    /// after [`IMAGE_POLL_ATTEMPTS`] polls. Reading clears the freshness flag.
    pub fn image(&self) -> Option<Frame> {
        let mut attempts = 0;
        loop {
            if let Some(frame) = self.image.lock().unwrap_or_else(|e| e.into_inner()).clone() {
                self.image_new.store(false, Ordering::SeqCst);
                return Some(frame);
            }

            if attempts >= IMAGE_POLL_ATTEMPTS {
                error!("Image has not been found for more than 10 seconds");
                return None;
            }
            attempts += 1;
            thread::sleep(IMAGE_POLL_INTERVAL);
        }
    }

    /// True if a tick produced a frame nobody has read yet
    pub fn is_image_new(&self) -> bool {
        self.image_new.load(Ordering::SeqCst)
    }

    pub fn fps(&self) -> f64 {
        *self.fps.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn camera(&self) -> Option<Camera> {
        self.camera.upgrade().map(Camera::from_inner)
    }

    fn tick(&self, token: &StopToken) -> LoopAction {
        if !self.running.load(Ordering::SeqCst) {
            return LoopAction::Stop;
        }
        let Some(camera) = self.camera() else {
            return LoopAction::Stop;
        };
        if !camera.is_open() {
            return LoopAction::Stop;
        }

        let started = Instant::now();
        let fetched = match camera.fetch_frame() {
            Ok(frame) => frame,
            Err(CaptureError::Rejected(e)) => {
                debug!(camera = %camera.name(), reason = %e, "Frame updater can no longer reach the device");
                return LoopAction::Stop;
            }
            Err(e) => {
                warn!(camera = %camera.name(), error = %e, "Cannot fetch frame");
                None
            }
        };
        let duration = started.elapsed();

        let device_fps = camera.device_fps();
        let delay = self
            .delay_calculator
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .calculate_delay(duration, device_fps);

        {
            let mut fps = self.fps.lock().unwrap_or_else(|e| e.into_inner());
            *fps = device_fps.unwrap_or_else(|| smooth_fps(*fps, duration));
        }

        if let Some(frame) = &fetched {
            *self.image.lock().unwrap_or_else(|e| e.into_inner()) = Some(frame.clone());
            self.image_new.store(true, Ordering::SeqCst);
        }

        let next = if camera.is_open() && !token.is_stopped() {
            LoopAction::Wait(delay)
        } else {
            trace!(camera = %camera.name(), "Frame update has been rejected");
            LoopAction::Stop
        };

        if let Some(frame) = fetched
            && camera.is_open()
        {
            camera.notify_image_acquired(frame);
        }

        next
    }
}
