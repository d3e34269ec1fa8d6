// SPDX-License-Identifier: GPL-3.0-only

//! Process-wide capture state
//!
//! The application builds one [`CaptureRegistry`] at startup and hands it to
//! whatever needs cameras. It owns the driver, the shared task processor and
//! the discovery service, and tears them down explicitly.

use super::camera::Camera;
use super::discovery::DiscoveryService;
use super::listener::{DiscoveryListener, ListenerSet};
use super::processor::TaskProcessor;
use crate::backends::camera::Driver;
use crate::config::CaptureConfig;
use crate::errors::CaptureResult;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tracing::{debug, info};

pub struct CaptureRegistry {
    driver: RwLock<Arc<dyn Driver>>,
    processor: Arc<TaskProcessor>,
    config: CaptureConfig,
    discovery: Mutex<Option<DiscoveryService>>,
    listeners: Arc<ListenerSet<dyn DiscoveryListener>>,
}

impl CaptureRegistry {
    pub fn new(driver: Arc<dyn Driver>, config: CaptureConfig) -> Self {
        info!(driver = %driver.name(), "Capture registry created");
        Self {
            driver: RwLock::new(driver),
            processor: Arc::new(TaskProcessor::new()),
            config,
            discovery: Mutex::new(None),
            listeners: Arc::new(ListenerSet::new()),
        }
    }

    pub fn driver(&self) -> Arc<dyn Driver> {
        Arc::clone(&self.driver.read().unwrap_or_else(|e| e.into_inner()))
    }

    /// Replace the driver; cameras of the previous one are disposed
    pub fn set_driver(&self, driver: Arc<dyn Driver>) {
        self.reset();
        info!(driver = %driver.name(), "Setting new capture driver");
        *self.driver.write().unwrap_or_else(|e| e.into_inner()) = driver;
    }

    pub fn processor(&self) -> &Arc<TaskProcessor> {
        &self.processor
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Discovery service of the current driver, created on first use
    pub fn discovery_service(&self) -> DiscoveryService {
        let mut discovery = self.discovery.lock().unwrap_or_else(|e| e.into_inner());
        discovery
            .get_or_insert_with(|| {
                DiscoveryService::new(
                    self.driver(),
                    Arc::clone(&self.processor),
                    self.config.clone(),
                    Arc::clone(&self.listeners),
                )
            })
            .clone()
    }

    /// Cameras within the configured discovery timeout
    pub fn cameras(&self) -> CaptureResult<Vec<Camera>> {
        self.cameras_with_timeout(self.config.discovery_timeout())
    }

    /// Cameras within `timeout`; also starts the periodic scan
    pub fn cameras_with_timeout(&self, timeout: Duration) -> CaptureResult<Vec<Camera>> {
        let service = self.discovery_service();
        let cameras = service.cameras(timeout)?;
        service.start()?;
        Ok(cameras)
    }

    /// First camera, if any
    pub fn default_camera(&self) -> CaptureResult<Option<Camera>> {
        Ok(self.cameras()?.into_iter().next())
    }

    pub fn camera_by_name(&self, name: &str) -> CaptureResult<Option<Camera>> {
        Ok(self.cameras()?.into_iter().find(|c| c.name() == name))
    }

    pub fn add_discovery_listener(&self, listener: Arc<dyn DiscoveryListener>) -> bool {
        self.listeners.add(listener)
    }

    pub fn remove_discovery_listener(&self, listener: &Arc<dyn DiscoveryListener>) -> bool {
        self.listeners.remove(listener)
    }

    /// Shut the discovery service down and forget it
    pub fn reset(&self) {
        let discovery = self
            .discovery
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(discovery) = discovery {
            debug!("Resetting discovery service");
            discovery.shutdown();
        }
    }

    /// Reset and stop the task processor; the registry is unusable afterwards
    pub fn shutdown(&self) {
        self.reset();
        self.processor.shutdown();
        info!("Capture registry shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::DummyDriver;

    fn registry(count: usize) -> CaptureRegistry {
        let config = CaptureConfig {
            lock_enabled: false,
            ..CaptureConfig::default()
        };
        CaptureRegistry::new(Arc::new(DummyDriver::new(count)), config)
    }

    #[test]
    fn test_lookup() {
        let registry = registry(2);
        assert_eq!(registry.cameras().unwrap().len(), 2);
        let first = registry.default_camera().unwrap().unwrap();
        assert_eq!(first.name(), "Dummy Webcam 0");
        let second = registry.camera_by_name("Dummy Webcam 1").unwrap();
        assert!(second.is_some());
        assert!(registry.camera_by_name("missing").unwrap().is_none());
        registry.shutdown();
    }

    #[test]
    fn test_reset_disposes_cameras() {
        let registry = registry(1);
        let camera = registry.default_camera().unwrap().unwrap();
        assert!(registry.discovery_service().is_running());

        registry.reset();
        assert!(camera.is_disposed());

        // A fresh service hands out fresh cameras
        let again = registry.default_camera().unwrap().unwrap();
        assert!(!again.ptr_eq(&camera));
        registry.shutdown();
    }

    #[test]
    fn test_set_driver() {
        let registry = registry(1);
        assert_eq!(registry.cameras().unwrap().len(), 1);
        registry.set_driver(Arc::new(DummyDriver::new(3)));
        assert_eq!(registry.cameras().unwrap().len(), 3);
        registry.shutdown();
    }

    #[test]
    fn test_shutdown_rejects_device_work() {
        let registry = registry(1);
        let camera = registry.default_camera().unwrap().unwrap();
        registry.shutdown();
        assert!(registry.processor().is_shut_down());
        assert!(camera.is_disposed());
    }
}
