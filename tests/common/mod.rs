// SPDX-License-Identifier: MPL-2.0

//! Scriptable device shared by the integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use webcam_capture::backends::camera::{Device, FpsSource, Frame, Size, resolution};
use webcam_capture::{CaptureError, CaptureResult};

/// One native call seen by a [`StubDevice`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub op: &'static str,
    pub device: String,
    pub thread: Option<String>,
}

/// Calls recorded across clones
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<Call>>>);

impl CallLog {
    fn record(&self, op: &'static str, device: &str) {
        let thread = std::thread::current().name().map(str::to_string);
        self.0.lock().unwrap().push(Call {
            op,
            device: device.to_string(),
            thread,
        });
    }

    pub fn calls(&self) -> Vec<Call> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, op: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|c| c.op == op).count()
    }
}

/// How a native open should fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    Interrupt,
    Error,
}

impl Failure {
    fn raise(self, op: &str) -> CaptureError {
        match self {
            Failure::Interrupt => CaptureError::Interrupted(format!("{} interrupted", op)),
            Failure::Error => CaptureError::Device(format!("{} failed", op)),
        }
    }
}

pub struct StubDevice {
    name: String,
    resolution: Size,
    open: bool,
    log: CallLog,
    delay: Duration,
    open_failure: Option<Failure>,
    frames: Vec<Frame>,
    frame_index: Arc<AtomicUsize>,
    frame_faults: Arc<AtomicUsize>,
    fps: Option<f64>,
}

impl StubDevice {
    pub const RESOLUTIONS: [Size; 2] = [resolution::QQVGA, resolution::QVGA];

    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            resolution: Self::RESOLUTIONS[0],
            open: false,
            log: CallLog::default(),
            delay: Duration::ZERO,
            open_failure: None,
            frames: Vec::new(),
            frame_index: Arc::new(AtomicUsize::new(0)),
            frame_faults: Arc::new(AtomicUsize::new(0)),
            fps: None,
        }
    }

    pub fn log(&self) -> CallLog {
        self.log.clone()
    }

    /// Record into `log`, shared with other devices
    pub fn with_log(mut self, log: CallLog) -> Self {
        self.log = log;
        self
    }

    /// Sleep this long inside every native call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_open(mut self, failure: Failure) -> Self {
        self.open_failure = Some(failure);
        self
    }

    /// Frames handed out in order; the last one repeats
    pub fn with_frames(mut self, frames: Vec<Frame>) -> Self {
        self.frames = frames;
        self
    }

    /// Fail the next `count` frame fetches
    pub fn failing_frames(self, count: usize) -> Self {
        self.frame_faults.store(count, Ordering::SeqCst);
        self
    }

    /// Pending frame failures, adjustable while the device is in use
    pub fn frame_faults(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.frame_faults)
    }

    pub fn with_fps(mut self, fps: f64) -> Self {
        self.fps = Some(fps);
        self
    }

    /// Number of frames served so far
    pub fn frames_served(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.frame_index)
    }

    fn call(&self, op: &'static str) {
        self.log.record(op, &self.name);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
    }
}

impl Device for StubDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn resolutions(&self) -> Vec<Size> {
        Self::RESOLUTIONS.to_vec()
    }

    fn resolution(&self) -> Size {
        self.resolution
    }

    fn set_resolution(&mut self, size: Size) {
        self.resolution = size;
    }

    fn open(&mut self) -> CaptureResult<()> {
        self.call("open");
        if let Some(failure) = self.open_failure {
            return Err(failure.raise("open"));
        }
        self.open = true;
        Ok(())
    }

    fn close(&mut self) -> CaptureResult<()> {
        self.call("close");
        self.open = false;
        Ok(())
    }

    fn dispose(&mut self) -> CaptureResult<()> {
        self.call("dispose");
        self.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn frame(&mut self) -> CaptureResult<Option<Frame>> {
        self.call("frame");
        let index = self.frame_index.fetch_add(1, Ordering::SeqCst);
        if self
            .frame_faults
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Failure::Error.raise("frame"));
        }
        if self.frames.is_empty() {
            return Ok(Some(Frame::solid(self.resolution, [0, 0, 0, 255])));
        }
        let frame = self.frames[index.min(self.frames.len() - 1)].clone();
        Ok(Some(frame))
    }

    fn as_fps_source(&self) -> Option<&dyn FpsSource> {
        self.fps.map(|_| self as &dyn FpsSource)
    }
}

impl FpsSource for StubDevice {
    fn fps(&self) -> f64 {
        self.fps.unwrap_or_default()
    }
}
