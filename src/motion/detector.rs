// SPDX-License-Identifier: GPL-3.0-only

//! Motion detector over a camera
//!
//! Two loops run while the detector is started:
//!
//! - the detection loop checks a new frame every `interval`;
//! - the inertia loop clears the motion flag once no motion has been seen
//!   for the inertia window (`inertia`, or twice the interval when unset).

use super::algorithm::{DefaultMotionAlgorithm, MotionAlgorithm};
use super::event::{MotionEvent, MotionListener};
use crate::backends::camera::{CaptureLoopController, Frame, LoopAction, Point, Rect};
use crate::capture::{Camera, ListenerSet};
use crate::config::MotionConfig;
use crate::constants::motion::{DEFAULT_INTERVAL, INERTIA_POLL, MIN_INTERVAL};
use crate::errors::{CaptureError, CaptureResult};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

static DETECTOR_THREAD_NUMBER: AtomicUsize = AtomicUsize::new(0);

fn thread_name() -> String {
    format!(
        "motion-detector-{}",
        DETECTOR_THREAD_NUMBER.fetch_add(1, Ordering::SeqCst) + 1
    )
}

/// Previous frame, raw and filtered
struct PreviousFrame {
    original: Frame,
    filtered: Frame,
}

struct DetectorInner<A> {
    camera: Camera,
    algorithm: Mutex<A>,
    listeners: ListenerSet<dyn MotionListener>,
    running: AtomicBool,
    motion: AtomicBool,
    interval: Mutex<Duration>,
    inertia: Mutex<Option<Duration>>,
    last_motion: Mutex<Option<Instant>>,
    previous: Mutex<Option<PreviousFrame>>,
    loops: Mutex<Vec<CaptureLoopController>>,
}

/// Raises motion events from consecutive camera frames
pub struct MotionDetector<A: MotionAlgorithm + 'static = DefaultMotionAlgorithm> {
    inner: Arc<DetectorInner<A>>,
}

impl MotionDetector<DefaultMotionAlgorithm> {
    /// Detector with the default algorithm and interval
    pub fn new(camera: Camera) -> Self {
        Self::build(camera, DefaultMotionAlgorithm::default(), DEFAULT_INTERVAL)
    }

    /// Detector with every motion setting taken from `config`
    pub fn from_config(camera: Camera, config: &MotionConfig) -> CaptureResult<Self> {
        let mut algorithm = DefaultMotionAlgorithm::new(config.pixel_threshold, config.area_threshold)?;
        algorithm.set_max_area_threshold(config.area_threshold_max)?;
        algorithm.set_point_range(config.point_range);
        algorithm.set_max_points(config.max_points);

        let detector = Self::with_algorithm(camera, algorithm, config.interval())?;
        if let Some(inertia) = config.inertia() {
            detector.set_inertia(inertia);
        }
        Ok(detector)
    }

    pub fn set_pixel_threshold(&self, threshold: u8) {
        self.algorithm().set_pixel_threshold(threshold);
    }

    pub fn set_area_threshold(&self, threshold: f64) -> CaptureResult<()> {
        self.algorithm().set_area_threshold(threshold)
    }

    pub fn set_max_area_threshold(&self, threshold: f64) -> CaptureResult<()> {
        self.algorithm().set_max_area_threshold(threshold)
    }
}

impl<A: MotionAlgorithm + 'static> MotionDetector<A> {
    /// Detector with a custom algorithm; `interval` must be at least 100 ms
    pub fn with_algorithm(camera: Camera, algorithm: A, interval: Duration) -> CaptureResult<Self> {
        check_interval(interval)?;
        Ok(Self::build(camera, algorithm, interval))
    }

    fn build(camera: Camera, algorithm: A, interval: Duration) -> Self {
        Self {
            inner: Arc::new(DetectorInner {
                camera,
                algorithm: Mutex::new(algorithm),
                listeners: ListenerSet::new(),
                running: AtomicBool::new(false),
                motion: AtomicBool::new(false),
                interval: Mutex::new(interval),
                inertia: Mutex::new(None),
                last_motion: Mutex::new(None),
                previous: Mutex::new(None),
                loops: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn camera(&self) -> &Camera {
        &self.inner.camera
    }

    /// Open the camera and start both loops
    pub fn start(&self) -> CaptureResult<()> {
        let inner = &self.inner;
        if inner
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }

        match inner.camera.open() {
            Ok(true) => {}
            Ok(false) => {
                inner.running.store(false, Ordering::SeqCst);
                return Err(CaptureError::Interrupted(format!(
                    "Opening {} was interrupted",
                    inner.camera.name()
                )));
            }
            Err(e) => {
                inner.running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        }

        let detection = Arc::downgrade(&self.inner);
        let inertia = Arc::downgrade(&self.inner);
        let loops = CaptureLoopController::start(&thread_name(), move |_| {
            with_detector(&detection, |d| {
                d.detect();
                LoopAction::Wait(d.interval())
            })
        })
        .and_then(|detection_loop| {
            let inertia_loop = CaptureLoopController::start(&thread_name(), move |_| {
                with_detector(&inertia, |d| {
                    d.decay();
                    LoopAction::Wait(INERTIA_POLL)
                })
            })?;
            Ok(vec![detection_loop, inertia_loop])
        });

        match loops {
            Ok(loops) => {
                *inner.loops.lock().unwrap_or_else(|e| e.into_inner()) = loops;
                info!(camera = %inner.camera.name(), interval = ?inner.interval(), "Motion detector started");
                Ok(())
            }
            Err(e) => {
                inner.running.store(false, Ordering::SeqCst);
                Err(e.into())
            }
        }
    }

    /// Stop both loops and close the camera
    pub fn stop(&self) -> CaptureResult<()> {
        let inner = &self.inner;
        if inner
            .running
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }

        let loops = std::mem::take(&mut *inner.loops.lock().unwrap_or_else(|e| e.into_inner()));
        for mut controller in loops {
            controller.stop();
        }

        inner.motion.store(false, Ordering::SeqCst);
        info!(camera = %inner.camera.name(), "Motion detector stopped");
        inner.camera.close().map(|_| ())
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// True while inside the inertia window of the last detected motion
    pub fn is_motion(&self) -> bool {
        if !self.is_running() {
            warn!("Motion cannot be detected when detector is not running");
        }
        self.inner.motion.load(Ordering::SeqCst)
    }

    pub fn interval(&self) -> Duration {
        self.inner.interval()
    }

    /// Check interval, at least 100 ms
    pub fn set_interval(&self, interval: Duration) -> CaptureResult<()> {
        check_interval(interval)?;
        *self.inner.interval.lock().unwrap_or_else(|e| e.into_inner()) = interval;
        Ok(())
    }

    /// Explicit inertia, `None` when derived from the interval
    pub fn inertia(&self) -> Option<Duration> {
        *self.inner.inertia.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_inertia(&self, inertia: Duration) {
        *self.inner.inertia.lock().unwrap_or_else(|e| e.into_inner()) = Some(inertia);
    }

    /// Derive the inertia from the interval again
    pub fn clear_inertia(&self) {
        *self.inner.inertia.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Moved area of the last check, in percent
    pub fn motion_area(&self) -> f64 {
        self.algorithm().area()
    }

    /// Center of gravity of the last check; image center before any check
    pub fn motion_cog(&self) -> Point {
        self.algorithm()
            .cog()
            .unwrap_or_else(|| self.inner.camera.view_size().center())
    }

    pub fn max_motion_points(&self) -> usize {
        self.algorithm().max_points()
    }

    pub fn set_max_motion_points(&self, max: usize) {
        self.algorithm().set_max_points(max);
    }

    pub fn point_range(&self) -> u32 {
        self.algorithm().point_range()
    }

    pub fn set_point_range(&self, range: u32) {
        self.algorithm().set_point_range(range);
    }

    pub fn set_do_not_engage_zones(&self, zones: Vec<Rect>) {
        self.algorithm().set_do_not_engage_zones(zones);
    }

    /// Exclusive access to the algorithm
    pub fn algorithm(&self) -> MutexGuard<'_, A> {
        self.inner.algorithm.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_listener(&self, listener: Arc<dyn MotionListener>) -> bool {
        self.inner.listeners.add(listener)
    }

    pub fn remove_listener(&self, listener: &Arc<dyn MotionListener>) -> bool {
        self.inner.listeners.remove(listener)
    }

    pub fn listeners(&self) -> Arc<Vec<Arc<dyn MotionListener>>> {
        self.inner.listeners.snapshot()
    }
}

impl<A: MotionAlgorithm + 'static> Drop for MotionDetector<A> {
    fn drop(&mut self) {
        if self.is_running()
            && let Err(e) = self.stop()
        {
            warn!(error = %e, "Cannot stop motion detector");
        }
    }
}

fn check_interval(interval: Duration) -> CaptureResult<()> {
    if interval < MIN_INTERVAL {
        return Err(CaptureError::InvalidArgument(format!(
            "Motion check interval cannot be less than {} ms",
            MIN_INTERVAL.as_millis()
        )));
    }
    Ok(())
}

fn with_detector<A, F>(detector: &Weak<DetectorInner<A>>, f: F) -> LoopAction
where
    F: FnOnce(&DetectorInner<A>) -> LoopAction,
{
    match detector.upgrade() {
        Some(detector) if detector.running.load(Ordering::SeqCst) => f(&detector),
        _ => LoopAction::Stop,
    }
}

impl<A: MotionAlgorithm> DetectorInner<A> {
    fn interval(&self) -> Duration {
        *self.interval.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn inertia_window(&self) -> Duration {
        self.inertia
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .unwrap_or_else(|| 2 * self.interval())
    }

    fn detect(&self) {
        if !self.camera.is_open() {
            self.motion.store(false, Ordering::SeqCst);
            return;
        }

        let current = match self.camera.get_image() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                self.motion.store(false, Ordering::SeqCst);
                return;
            }
            Err(e) => {
                warn!(camera = %self.camera.name(), error = %e, "Cannot get image for motion check");
                self.motion.store(false, Ordering::SeqCst);
                return;
            }
        };

        let mut previous = self.previous.lock().unwrap_or_else(|e| e.into_inner());

        let (filtered, detected, area, cog, points) = {
            let mut algorithm = self.algorithm.lock().unwrap_or_else(|e| e.into_inner());
            let filtered = algorithm.filter(&current);
            let detected = algorithm.detect(previous.as_ref().map(|p| &p.filtered), &filtered);
            (
                filtered,
                detected,
                algorithm.area(),
                algorithm.cog(),
                algorithm.points().to_vec(),
            )
        };

        let previous_original = previous.take().map(|p| p.original);
        *previous = Some(PreviousFrame {
            original: current.clone(),
            filtered,
        });
        drop(previous);

        if detected {
            trace!(camera = %self.camera.name(), area, "Motion detected");
            self.motion.store(true, Ordering::SeqCst);
            *self.last_motion.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());

            let event = MotionEvent {
                camera: self.camera.clone(),
                previous: previous_original,
                cog: cog.unwrap_or_else(|| current.size().center()),
                current,
                area,
                points,
            };
            self.listeners
                .dispatch("motion detected", |listener| listener.on_motion_detected(&event));
        }
    }

    fn decay(&self) {
        let window = self.inertia_window();
        let expired = self
            .last_motion
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_none_or(|last| last.elapsed() > window);
        if expired && self.motion.swap(false, Ordering::SeqCst) {
            debug!(camera = %self.camera.name(), "Motion inertia elapsed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::DummyDevice;
    use crate::capture::TaskProcessor;

    fn camera() -> Camera {
        Camera::new(
            Box::new(DummyDevice::new(0).with_pacing(Duration::ZERO)),
            Arc::new(TaskProcessor::new()),
        )
    }

    #[test]
    fn test_interval_lower_bound() {
        let detector = MotionDetector::new(camera());
        assert_eq!(detector.interval(), DEFAULT_INTERVAL);
        assert!(detector.set_interval(Duration::from_millis(99)).is_err());
        detector.set_interval(Duration::from_millis(100)).unwrap();
        assert!(
            MotionDetector::with_algorithm(
                camera(),
                DefaultMotionAlgorithm::default(),
                Duration::from_millis(50)
            )
            .is_err()
        );
    }

    #[test]
    fn test_inertia_window() {
        let detector = MotionDetector::new(camera());
        detector.set_interval(Duration::from_millis(300)).unwrap();
        assert_eq!(detector.inner.inertia_window(), Duration::from_millis(600));
        detector.set_inertia(Duration::from_millis(50));
        assert_eq!(detector.inner.inertia_window(), Duration::from_millis(50));
        detector.set_inertia(Duration::ZERO);
        assert_eq!(detector.inertia(), Some(Duration::ZERO));
        detector.clear_inertia();
        assert_eq!(detector.inertia(), None);
        assert_eq!(detector.inner.inertia_window(), Duration::from_millis(600));
    }

    #[test]
    fn test_cog_defaults_to_image_center() {
        let detector = MotionDetector::new(camera());
        assert_eq!(detector.motion_cog(), Point::new(88, 72));
    }

    #[test]
    fn test_start_stop_opens_and_closes_camera() {
        let detector = MotionDetector::new(camera());
        detector.start().unwrap();
        assert!(detector.is_running());
        assert!(detector.camera().is_open());
        detector.stop().unwrap();
        assert!(!detector.is_running());
        assert!(!detector.camera().is_open());
    }

    #[test]
    fn test_from_config() {
        let config = MotionConfig {
            interval_ms: 250,
            inertia_ms: Some(1000),
            pixel_threshold: 40,
            point_range: 10,
            max_points: 5,
            ..MotionConfig::default()
        };
        let detector = MotionDetector::from_config(camera(), &config).unwrap();
        assert_eq!(detector.interval(), Duration::from_millis(250));
        assert_eq!(detector.inertia(), Some(Duration::from_secs(1)));
        assert_eq!(detector.point_range(), 10);
        assert_eq!(detector.max_motion_points(), 5);
        assert_eq!(detector.algorithm().pixel_threshold(), 40);
    }
}
