// SPDX-License-Identifier: GPL-3.0-only

//! Device discovery
//!
//! The service enumerates the driver's devices once, wraps each in a
//! [`Camera`] and then, for drivers with [`DiscoverySupport`], rescans
//! periodically. Cameras are matched across scans by device name.

use super::camera::{Camera, CameraOptions};
use super::listener::{DiscoveryEvent, DiscoveryEventKind, DiscoveryListener, ListenerSet};
use super::processor::TaskProcessor;
use crate::backends::camera::{CaptureLoopController, Device, DiscoverySupport, Driver, LoopAction};
use crate::config::CaptureConfig;
use crate::errors::{CaptureError, CaptureResult};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

struct DiscoveryInner {
    driver: Arc<dyn Driver>,
    processor: Arc<TaskProcessor>,
    config: CaptureConfig,
    cameras: Mutex<Option<Vec<Camera>>>,
    listeners: Arc<ListenerSet<dyn DiscoveryListener>>,
    enabled: AtomicBool,
    scanner: Mutex<Option<CaptureLoopController>>,
}

/// Tracks the cameras a driver currently exposes
#[derive(Clone)]
pub struct DiscoveryService {
    inner: Arc<DiscoveryInner>,
}

impl DiscoveryService {
    pub fn new(
        driver: Arc<dyn Driver>,
        processor: Arc<TaskProcessor>,
        config: CaptureConfig,
        listeners: Arc<ListenerSet<dyn DiscoveryListener>>,
    ) -> Self {
        Self {
            inner: Arc::new(DiscoveryInner {
                driver,
                processor,
                config,
                cameras: Mutex::new(None),
                listeners,
                enabled: AtomicBool::new(true),
                scanner: Mutex::new(None),
            }),
        }
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.inner.driver
    }

    /// Known cameras, enumerating the driver on first use
    ///
    /// Enumeration runs on a helper thread and fails with
    /// [`CaptureError::Timeout`] when it exceeds `timeout`.
    pub fn cameras(&self, timeout: Duration) -> CaptureResult<Vec<Camera>> {
        let found = {
            let mut cameras = self.inner.cameras.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(cameras) = cameras.as_ref() {
                return Ok(cameras.clone());
            }

            let found: Vec<Camera> = self
                .inner
                .enumerate(timeout)?
                .into_iter()
                .map(|device| self.inner.wrap(device))
                .collect();
            info!(driver = %self.inner.driver.name(), count = found.len(), "Cameras discovered");
            *cameras = Some(found.clone());
            found
        };

        for camera in &found {
            self.inner.notify(DiscoveryEventKind::Added, camera);
        }
        Ok(found)
    }

    /// Compare the driver's devices with the known cameras
    ///
    /// Vanished cameras are disposed and reported gone; new devices are
    /// wrapped and reported found.
    pub fn scan(&self) -> CaptureResult<()> {
        self.inner.scan()
    }

    /// Start the periodic scan, if enabled and supported by the driver
    pub fn start(&self) -> CaptureResult<()> {
        if !self.inner.enabled.load(Ordering::SeqCst) {
            debug!("Discovery service has been disabled and thus it will not be started");
            return Ok(());
        }

        let Some(interval) = self.inner.scan_support().map(|s| s.scan_interval()) else {
            debug!(driver = %self.inner.driver.name(), "Driver does not support device scanning");
            return Ok(());
        };

        let mut scanner = self.inner.scanner.lock().unwrap_or_else(|e| e.into_inner());
        if scanner.as_ref().is_some_and(|s| s.is_running()) {
            return Ok(());
        }

        let service = Arc::downgrade(&self.inner);
        let mut first = true;
        *scanner = Some(CaptureLoopController::start(
            "webcam-discovery-service",
            move |_| {
                if std::mem::take(&mut first) {
                    return LoopAction::Wait(interval);
                }
                let Some(service) = Weak::upgrade(&service) else {
                    return LoopAction::Stop;
                };
                if let Err(e) = service.scan() {
                    warn!(error = %e, "Device scan failed");
                }
                LoopAction::Wait(interval)
            },
        )?);

        info!(?interval, "Discovery service started");
        Ok(())
    }

    /// Stop the periodic scan and wait for it
    pub fn stop(&self) {
        let scanner = self
            .inner
            .scanner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(mut scanner) = scanner {
            scanner.stop();
            debug!("Discovery service stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner
            .scanner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|s| s.is_running())
    }

    /// A disabled service refuses to start
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    /// Stop scanning and dispose every known camera
    pub fn shutdown(&self) {
        self.stop();

        let cameras = self
            .inner
            .cameras
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .unwrap_or_default();

        for camera in cameras {
            if let Err(e) = camera.dispose() {
                warn!(camera = %camera.name(), error = %e, "Cannot dispose camera");
            }
        }
        debug!("Discovery service shut down");
    }
}

impl DiscoveryInner {
    fn scan_support(&self) -> Option<&dyn DiscoverySupport> {
        self.driver.discovery().filter(|s| s.is_scan_possible())
    }

    fn wrap(&self, device: Box<dyn Device>) -> Camera {
        let options =
            CameraOptions::from_config(&self.config, device.name(), self.driver.is_thread_safe());
        Camera::with_options(device, Arc::clone(&self.processor), options)
    }

    fn enumerate(&self, timeout: Duration) -> CaptureResult<Vec<Box<dyn Device>>> {
        let driver = Arc::clone(&self.driver);
        let (sender, receiver) = mpsc::channel();

        thread::Builder::new()
            .name("webcam-discovery-enumeration".to_string())
            .spawn(move || {
                let _ = sender.send(driver.devices());
            })?;

        match receiver.recv_timeout(timeout) {
            Ok(devices) => devices,
            Err(RecvTimeoutError::Timeout) => Err(CaptureError::Timeout(format!(
                "Webcams discovery timeout ({} ms) has been exceeded",
                timeout.as_millis()
            ))),
            Err(RecvTimeoutError::Disconnected) => Err(CaptureError::Device(
                "Device enumeration terminated unexpectedly".to_string(),
            )),
        }
    }

    fn scan(&self) -> CaptureResult<()> {
        if self.scan_support().is_none() {
            return Ok(());
        }

        let devices = self.enumerate(self.config.discovery_timeout())?;

        let (gone, found) = {
            let mut guard = self.cameras.lock().unwrap_or_else(|e| e.into_inner());
            let cameras = guard.get_or_insert_with(Vec::new);

            let present: HashSet<String> = devices.iter().map(|d| d.name().to_string()).collect();
            let known: HashSet<String> = cameras.iter().map(|c| c.name().to_string()).collect();

            let (kept, gone): (Vec<Camera>, Vec<Camera>) = cameras
                .drain(..)
                .partition(|camera| present.contains(camera.name()));
            *cameras = kept;

            let found: Vec<Camera> = devices
                .into_iter()
                .filter(|device| !known.contains(device.name()))
                .map(|device| self.wrap(device))
                .collect();
            cameras.extend(found.iter().cloned());

            (gone, found)
        };

        for camera in &gone {
            info!(camera = %camera.name(), "Camera gone");
            if let Err(e) = camera.dispose() {
                warn!(camera = %camera.name(), error = %e, "Cannot dispose vanished camera");
            }
            self.notify(DiscoveryEventKind::Removed, camera);
        }

        for camera in &found {
            info!(camera = %camera.name(), "Camera found");
            self.notify(DiscoveryEventKind::Added, camera);
        }

        Ok(())
    }

    fn notify(&self, kind: DiscoveryEventKind, camera: &Camera) {
        let event = DiscoveryEvent {
            kind,
            camera: camera.clone(),
        };
        match kind {
            DiscoveryEventKind::Added => self
                .listeners
                .dispatch("camera found", |listener| listener.on_camera_found(&event)),
            DiscoveryEventKind::Removed => self
                .listeners
                .dispatch("camera gone", |listener| listener.on_camera_gone(&event)),
        }
    }
}
