// SPDX-License-Identifier: GPL-3.0-only

//! Stateful, listenable camera over a [`Device`]
//!
//! ```text
//!            open()                 dispose()
//!  Closed ───────────▶ Open ─────────────────────┐
//!    ▲                  │                        ▼
//!    └──────────────────┘ close()            Disposed (terminal)
//! ```
//!
//! Every native call is a [`DeviceTask`]. For drivers that are not thread
//! safe the tasks go through the shared [`TaskProcessor`]; otherwise they run
//! on the calling thread.

use super::listener::{CameraEvent, CameraEventKind, CameraListener, ListenerSet};
use super::lock::{CameraLock, FileLock, NoLock};
use super::notifier::Notifier;
use super::processor::TaskProcessor;
use super::task::{DeviceTask, SharedDevice, TaskKind, TaskOutput};
use super::updater::{DefaultDelayCalculator, DelayCalculator, FrameUpdater};
use crate::backends::camera::{Device, DeviceCapabilities, Frame, Size};
use crate::config::CaptureConfig;
use crate::constants::{DEFAULT_NOTIFICATION_QUEUE, DEFAULT_TARGET_FPS, smooth_fps};
use crate::errors::{CaptureError, CaptureResult};
use crate::motion::FrameFilter;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;
use tracing::{debug, error, info, trace, warn};

/// Construction options for a [`Camera`]
pub struct CameraOptions {
    /// Bypass the task processor
    pub thread_safe: bool,
    pub lock: Box<dyn CameraLock>,
    pub notification_queue: usize,
    pub target_fps: u32,
    pub auto_open: bool,
}

impl Default for CameraOptions {
    fn default() -> Self {
        Self {
            thread_safe: false,
            lock: Box::new(NoLock),
            notification_queue: DEFAULT_NOTIFICATION_QUEUE,
            target_fps: DEFAULT_TARGET_FPS,
            auto_open: false,
        }
    }
}

impl CameraOptions {
    /// Options for camera `name` under `config`
    pub fn from_config(config: &CaptureConfig, name: &str, thread_safe: bool) -> Self {
        let lock: Box<dyn CameraLock> = if config.lock_enabled {
            Box::new(FileLock::new(name, config.lock_dir.as_deref()))
        } else {
            Box::new(NoLock)
        };
        Self {
            thread_safe,
            lock,
            notification_queue: config.notification_queue,
            target_fps: config.target_fps,
            auto_open: config.auto_open,
        }
    }
}

pub(crate) struct CameraInner {
    name: String,
    device: SharedDevice,
    capabilities: DeviceCapabilities,
    processor: Arc<TaskProcessor>,
    thread_safe: bool,
    lock: Box<dyn CameraLock>,
    notification_queue: usize,
    target_fps: u32,
    open: AtomicBool,
    disposed: AtomicBool,
    asynchronous: AtomicBool,
    auto_open: AtomicBool,
    fps: Mutex<f64>,
    updater: Mutex<Option<Arc<FrameUpdater>>>,
    notifier: Mutex<Option<Notifier>>,
    listeners: ListenerSet<dyn CameraListener>,
    filter: RwLock<Option<Arc<dyn FrameFilter>>>,
    custom_sizes: RwLock<Vec<Size>>,
}

impl Drop for CameraInner {
    fn drop(&mut self) {
        let updater = self.updater.get_mut().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(updater) = updater {
            updater.stop();
        }
    }
}

/// Shared handle to one camera
///
/// Cloning is cheap; all clones refer to the same device and state.
#[derive(Clone)]
pub struct Camera {
    inner: Arc<CameraInner>,
}

impl Camera {
    /// Wrap `device` with default options
    pub fn new(device: Box<dyn Device>, processor: Arc<TaskProcessor>) -> Self {
        Self::with_options(device, processor, CameraOptions::default())
    }

    pub fn with_options(
        mut device: Box<dyn Device>,
        processor: Arc<TaskProcessor>,
        options: CameraOptions,
    ) -> Self {
        let name = device.name().to_string();
        let capabilities = DeviceCapabilities::probe(device.as_mut());
        debug!(camera = %name, ?capabilities, thread_safe = options.thread_safe, "Wrapping device");

        Self {
            inner: Arc::new(CameraInner {
                name,
                device: Arc::new(Mutex::new(device)),
                capabilities,
                processor,
                thread_safe: options.thread_safe,
                lock: options.lock,
                notification_queue: options.notification_queue,
                target_fps: options.target_fps,
                open: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
                asynchronous: AtomicBool::new(false),
                auto_open: AtomicBool::new(options.auto_open),
                fps: Mutex::new(0.0),
                updater: Mutex::new(None),
                notifier: Mutex::new(None),
                listeners: ListenerSet::new(),
                filter: RwLock::new(None),
                custom_sizes: RwLock::new(Vec::new()),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<CameraInner>) -> Self {
        Self { inner }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn capabilities(&self) -> DeviceCapabilities {
        self.inner.capabilities
    }

    pub fn is_thread_safe(&self) -> bool {
        self.inner.thread_safe
    }

    pub fn camera_lock(&self) -> &dyn CameraLock {
        self.inner.lock.as_ref()
    }

    /// True if both handles refer to the same camera
    pub fn ptr_eq(&self, other: &Camera) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Open in blocking mode
    pub fn open(&self) -> CaptureResult<bool> {
        self.open_with(false, None)
    }

    /// Open with a background frame updater
    pub fn open_async(&self) -> CaptureResult<bool> {
        self.open_with(true, None)
    }

    /// Open the camera
    ///
    /// Returns `Ok(true)` when the camera is open afterwards, including when it
    /// already was. Returns `Ok(false)` if the native open was interrupted; in
    /// that case, and on any error, the camera is left closed and unlocked.
    pub fn open_with(
        &self,
        asynchronous: bool,
        delay_calculator: Option<Arc<dyn DelayCalculator>>,
    ) -> CaptureResult<bool> {
        self.ensure_not_disposed()?;

        let inner = &self.inner;
        if inner
            .open
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(camera = %inner.name, "Camera is already open");
            return Ok(true);
        }

        if let Err(e) = inner.lock.lock() {
            inner.open.store(false, Ordering::SeqCst);
            return Err(e);
        }

        match Notifier::start(&inner.name, inner.notification_queue) {
            Ok(notifier) => *inner.notifier.lock().unwrap_or_else(|e| e.into_inner()) = Some(notifier),
            Err(e) => {
                inner.lock.unlock();
                inner.open.store(false, Ordering::SeqCst);
                return Err(e);
            }
        }

        info!(camera = %inner.name, asynchronous, "Opening camera");

        if let Err(e) = self.run_task(TaskKind::Open) {
            self.shutdown_notifier();
            inner.lock.unlock();
            inner.open.store(false, Ordering::SeqCst);
            if e.is_interrupted() {
                debug!(camera = %inner.name, error = %e, "Interrupted in the middle of opening");
                return Ok(false);
            }
            debug!(camera = %inner.name, error = %e, "Device error when opening");
            return Err(e);
        }

        debug!(camera = %inner.name, "Camera is now open");

        inner.asynchronous.store(asynchronous, Ordering::SeqCst);
        if asynchronous {
            let updater = {
                let mut slot = inner.updater.lock().unwrap_or_else(|e| e.into_inner());
                let updater = slot.get_or_insert_with(|| {
                    Arc::new(FrameUpdater::new(
                        Arc::downgrade(&self.inner),
                        Arc::new(DefaultDelayCalculator::new(inner.target_fps)),
                    ))
                });
                if let Some(calculator) = delay_calculator {
                    updater.set_delay_calculator(calculator);
                }
                Arc::clone(updater)
            };

            if let Err(e) = updater.start() {
                error!(camera = %inner.name, error = %e, "Cannot start frame updater");
                if let Err(close_error) = self.close() {
                    warn!(camera = %inner.name, error = %close_error, "Cannot close after failed start");
                }
                return Err(e);
            }
        }

        let event = self.event(CameraEventKind::Open);
        inner
            .listeners
            .dispatch("camera open", |listener| listener.on_open(&event));

        Ok(true)
    }

    /// Close the camera
    ///
    /// Returns `Ok(true)` when the camera is closed afterwards, including when
    /// it already was. Returns `Ok(false)` if the native close was interrupted
    /// (the camera stays open) or if pending image notifications did not drain
    /// in time.
    pub fn close(&self) -> CaptureResult<bool> {
        let inner = &self.inner;
        if inner
            .open
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(camera = %inner.name, "Camera is already closed");
            return Ok(true);
        }

        debug!(camera = %inner.name, "Closing camera");

        if let Err(e) = self.run_task(TaskKind::Close) {
            inner.open.store(true, Ordering::SeqCst);
            if e.is_interrupted() {
                debug!(camera = %inner.name, error = %e, "Interrupted before camera was closed");
                return Ok(false);
            }
            return Err(e);
        }

        if inner.asynchronous.load(Ordering::SeqCst) {
            self.stop_updater();
        }

        inner.lock.unlock();

        let event = self.event(CameraEventKind::Closed);
        inner
            .listeners
            .dispatch("camera closed", |listener| listener.on_close(&event));

        if !self.shutdown_notifier() {
            return Ok(false);
        }

        debug!(camera = %inner.name, "Camera has been closed");
        Ok(true)
    }

    /// Release the device for good
    ///
    /// Idempotent. A disposed camera cannot be opened again.
    pub fn dispose(&self) -> CaptureResult<()> {
        let inner = &self.inner;
        if inner
            .disposed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(());
        }

        inner.open.store(false, Ordering::SeqCst);
        self.stop_updater();
        inner.lock.unlock();
        self.shutdown_notifier();

        info!(camera = %inner.name, "Disposing camera");

        if let Err(e) = self.run_task(TaskKind::Dispose) {
            if e.is_interrupted() {
                error!(camera = %inner.name, error = %e, "Interrupted before camera was disposed");
                return Ok(());
            }
            return Err(e);
        }

        let event = self.event(CameraEventKind::Disposed);
        inner.listeners.dispatch("camera disposed", |listener| {
            listener.on_close(&event)?;
            listener.on_disposed(&event)
        });

        debug!(camera = %inner.name, "Camera disposed");
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::SeqCst)
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    pub fn is_asynchronous(&self) -> bool {
        self.inner.asynchronous.load(Ordering::SeqCst)
    }

    /// Latest frame
    ///
    /// `Ok(None)` when the camera is disposed, or closed with auto-open off.
    /// Asynchronous cameras answer from the updater cache.
    pub fn get_image(&self) -> CaptureResult<Option<Frame>> {
        if !self.is_ready()? {
            return Ok(None);
        }

        if self.is_asynchronous()
            && let Some(updater) = self.updater()
        {
            return Ok(updater.image());
        }

        let started = Instant::now();
        let frame = self.fetch_frame()?;
        self.update_fps(started);

        if let Some(frame) = &frame {
            self.notify_image_acquired(frame.clone());
        }
        Ok(frame)
    }

    /// Packed RGB bytes of the next frame
    pub fn get_image_bytes(&self) -> CaptureResult<Option<Vec<u8>>> {
        if !self.inner.capabilities.buffer_access {
            return Err(CaptureError::Unsupported(format!(
                "Device {} does not support buffer access",
                self.inner.name
            )));
        }
        if !self.is_ready()? {
            return Ok(None);
        }

        let started = Instant::now();
        let output = self.run_task(TaskKind::GetBuffer)?;
        self.update_fps(started);

        match output {
            TaskOutput::Buffer(bytes) => Ok(Some(bytes)),
            _ => Ok(None),
        }
    }

    /// Frames per second, from the updater in asynchronous mode
    pub fn fps(&self) -> f64 {
        if self.is_asynchronous()
            && let Some(updater) = self.updater()
        {
            return updater.fps();
        }
        *self.inner.fps.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether the cached frame has not been read yet; always true when synchronous
    pub fn is_image_new(&self) -> bool {
        if self.is_asynchronous()
            && let Some(updater) = self.updater()
        {
            return updater.is_image_new();
        }
        true
    }

    pub fn set_filter(&self, filter: Option<Arc<dyn FrameFilter>>) {
        *self.inner.filter.write().unwrap_or_else(|e| e.into_inner()) = filter;
    }

    pub fn filter(&self) -> Option<Arc<dyn FrameFilter>> {
        self.inner.filter.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_auto_open(&self) -> bool {
        self.inner.auto_open.load(Ordering::SeqCst)
    }

    /// Let `get_image` open a closed camera
    pub fn set_auto_open(&self, auto_open: bool) {
        self.inner.auto_open.store(auto_open, Ordering::SeqCst);
    }

    /// Current resolution
    pub fn view_size(&self) -> Size {
        self.device().resolution()
    }

    /// Resolutions reported by the device
    pub fn view_sizes(&self) -> Vec<Size> {
        self.device().resolutions()
    }

    pub fn custom_view_sizes(&self) -> Vec<Size> {
        self.inner
            .custom_sizes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Sizes accepted by [`set_view_size`](Self::set_view_size) besides the device ones
    pub fn set_custom_view_sizes(&self, sizes: Vec<Size>) {
        *self.inner.custom_sizes.write().unwrap_or_else(|e| e.into_inner()) = sizes;
    }

    /// Select a resolution; only allowed while closed
    pub fn set_view_size(&self, size: Size) -> CaptureResult<()> {
        if self.is_open() {
            return Err(CaptureError::InvalidState(
                "Cannot change resolution when camera is open, please close it first".to_string(),
            ));
        }

        let mut device = self.device();
        if device.resolution() == size {
            return Ok(());
        }

        let predefined = device.resolutions();
        let custom = self.custom_view_sizes();
        if !predefined.contains(&size) && !custom.contains(&size) {
            let mut choices = predefined;
            choices.extend(custom);
            return Err(CaptureError::InvalidResolution {
                requested: size,
                choices,
            });
        }

        debug!(camera = %self.inner.name, %size, "Setting new resolution");
        device.set_resolution(size);
        Ok(())
    }

    /// Forward opaque parameters to a configurable device
    pub fn set_parameters(&self, parameters: HashMap<String, serde_json::Value>) -> CaptureResult<()> {
        if !self.inner.capabilities.configurable {
            debug!(camera = %self.inner.name, "Device is not configurable, parameters ignored");
            return Ok(());
        }
        self.run_task(TaskKind::Configure(parameters)).map(|_| ())
    }

    /// Returns false if the listener was already registered
    pub fn add_listener(&self, listener: Arc<dyn CameraListener>) -> bool {
        self.inner.listeners.add(listener)
    }

    pub fn remove_listener(&self, listener: &Arc<dyn CameraListener>) -> bool {
        self.inner.listeners.remove(listener)
    }

    pub fn listeners(&self) -> Arc<Vec<Arc<dyn CameraListener>>> {
        self.inner.listeners.snapshot()
    }

    /// Queue an image notification on the session notifier
    ///
    /// Nothing is queued when no listener is registered.
    pub(crate) fn notify_image_acquired(&self, frame: Frame) {
        if self.inner.listeners.is_empty() {
            return;
        }

        let guard = self.inner.notifier.lock().unwrap_or_else(|e| e.into_inner());
        let Some(notifier) = guard.as_ref() else {
            trace!(camera = %self.inner.name, "No notifier, image notification skipped");
            return;
        };

        let camera = self.clone();
        notifier.submit(Box::new(move || {
            let event = CameraEvent {
                kind: CameraEventKind::NewImage,
                camera: camera.clone(),
                frame: Some(frame),
            };
            camera
                .inner
                .listeners
                .dispatch("image obtained", |listener| listener.on_image_obtained(&event));
        }));
    }

    /// Fetch one frame from the device and apply the filter
    pub(crate) fn fetch_frame(&self) -> CaptureResult<Option<Frame>> {
        let frame = match self.run_task(TaskKind::GetImage)? {
            TaskOutput::Frame(frame) => frame,
            _ => None,
        };
        Ok(frame.map(|frame| match self.filter() {
            Some(filter) => filter.transform(&frame),
            None => frame,
        }))
    }

    /// Frame rate reported by the device itself
    pub(crate) fn device_fps(&self) -> Option<f64> {
        if !self.inner.capabilities.fps_source {
            return None;
        }
        self.device().as_fps_source().map(|source| source.fps())
    }

    fn run_task(&self, kind: TaskKind) -> CaptureResult<TaskOutput> {
        DeviceTask::new(kind, Arc::clone(&self.inner.device))
            .process(&self.inner.processor, self.inner.thread_safe)
    }

    fn device(&self) -> std::sync::MutexGuard<'_, Box<dyn Device>> {
        self.inner.device.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn updater(&self) -> Option<Arc<FrameUpdater>> {
        self.inner
            .updater
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn stop_updater(&self) {
        if let Some(updater) = self.updater() {
            updater.stop();
        }
    }

    /// Returns false if the notifier did not drain in time
    fn shutdown_notifier(&self) -> bool {
        let notifier = self
            .inner
            .notifier
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        match notifier {
            Some(mut notifier) => notifier.shutdown(),
            None => true,
        }
    }

    fn update_fps(&self, started: Instant) {
        let elapsed = started.elapsed();
        let device_fps = self.device_fps();
        let mut fps = self.inner.fps.lock().unwrap_or_else(|e| e.into_inner());
        *fps = device_fps.unwrap_or_else(|| smooth_fps(*fps, elapsed));
    }

    fn ensure_not_disposed(&self) -> CaptureResult<()> {
        if self.is_disposed() {
            return Err(CaptureError::Disposed(self.inner.name.clone()));
        }
        Ok(())
    }

    fn is_ready(&self) -> CaptureResult<bool> {
        if self.is_disposed() {
            warn!(camera = %self.inner.name, "Camera has been already disposed");
            return Ok(false);
        }

        if !self.is_open() {
            if !self.is_auto_open() {
                return Ok(false);
            }
            if !self.open()? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn event(&self, kind: CameraEventKind) -> CameraEvent {
        CameraEvent {
            kind,
            camera: self.clone(),
            frame: None,
        }
    }
}

impl std::fmt::Debug for Camera {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Camera")
            .field("name", &self.inner.name)
            .field("open", &self.is_open())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl std::fmt::Display for Camera {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Webcam {}", self.inner.name)
    }
}
