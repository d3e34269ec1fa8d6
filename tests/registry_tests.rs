// SPDX-License-Identifier: MPL-2.0

//! Integration tests for discovery and the capture registry

mod common;

use common::StubDevice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use webcam_capture::backends::camera::{
    CompositeDriver, Device, DiscoverySupport, Driver, DummyDriver,
};
use webcam_capture::capture::{DiscoveryEvent, DiscoveryListener};
use webcam_capture::errors::ListenerResult;
use webcam_capture::{CaptureConfig, CaptureRegistry, CaptureResult};

/// Driver whose device list can be changed while scanning
#[derive(Clone, Default)]
struct HotPlugDriver {
    names: Arc<Mutex<Vec<String>>>,
}

impl HotPlugDriver {
    fn plug(&self, name: &str) {
        self.names.lock().unwrap().push(name.to_string());
    }

    fn unplug(&self, name: &str) {
        self.names.lock().unwrap().retain(|n| n != name);
    }
}

impl Driver for HotPlugDriver {
    fn devices(&self) -> CaptureResult<Vec<Box<dyn Device>>> {
        Ok(self
            .names
            .lock()
            .unwrap()
            .iter()
            .map(|name| Box::new(StubDevice::new(name)) as Box<dyn Device>)
            .collect())
    }

    fn discovery(&self) -> Option<&dyn DiscoverySupport> {
        Some(self)
    }

    fn name(&self) -> &str {
        "hot-plug"
    }
}

impl DiscoverySupport for HotPlugDriver {
    fn scan_interval(&self) -> Duration {
        Duration::from_millis(50)
    }

    fn is_scan_possible(&self) -> bool {
        true
    }
}

#[derive(Default)]
struct Tally {
    found: Mutex<Vec<String>>,
    gone: Mutex<Vec<String>>,
}

impl DiscoveryListener for Tally {
    fn on_camera_found(&self, event: &DiscoveryEvent) -> ListenerResult {
        self.found.lock().unwrap().push(event.camera.name().to_string());
        Ok(())
    }

    fn on_camera_gone(&self, event: &DiscoveryEvent) -> ListenerResult {
        assert!(event.camera.is_disposed());
        self.gone.lock().unwrap().push(event.camera.name().to_string());
        Ok(())
    }
}

fn config() -> CaptureConfig {
    CaptureConfig {
        lock_enabled: false,
        ..CaptureConfig::default()
    }
}

fn wait_for(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

#[test]
fn test_background_scan_reports_changes() {
    let driver = HotPlugDriver::default();
    driver.plug("front");
    driver.plug("rear");

    let registry = CaptureRegistry::new(Arc::new(driver.clone()), config());
    let tally = Arc::new(Tally::default());
    registry.add_discovery_listener(tally.clone());

    let cameras = registry.cameras().unwrap();
    assert_eq!(cameras.len(), 2);
    assert_eq!(*tally.found.lock().unwrap(), vec!["front", "rear"]);
    assert!(registry.discovery_service().is_running());

    let rear = registry.camera_by_name("rear").unwrap().unwrap();
    driver.unplug("rear");
    driver.plug("side");

    assert!(wait_for(Duration::from_secs(3), || {
        tally.gone.lock().unwrap().len() == 1 && tally.found.lock().unwrap().len() == 3
    }));
    assert_eq!(*tally.gone.lock().unwrap(), vec!["rear"]);
    assert!(rear.is_disposed());

    let names: Vec<String> = registry
        .cameras()
        .unwrap()
        .iter()
        .map(|c| c.name().to_string())
        .collect();
    assert_eq!(names, vec!["front", "side"]);

    registry.shutdown();
}

#[test]
fn test_cameras_are_stable_handles() {
    let registry = CaptureRegistry::new(Arc::new(DummyDriver::new(2)), config());

    let first = registry.default_camera().unwrap().unwrap();
    let again = registry.default_camera().unwrap().unwrap();
    assert!(first.ptr_eq(&again));
    assert_eq!(first.name(), "Dummy Webcam 0");
    assert!(registry.camera_by_name("No Such Webcam").unwrap().is_none());

    registry.shutdown();
}

#[test]
fn test_reset_disposes_and_rediscovers() {
    let registry = CaptureRegistry::new(Arc::new(DummyDriver::new(1)), config());
    let camera = registry.default_camera().unwrap().unwrap();
    camera.open().unwrap();

    registry.reset();
    assert!(camera.is_disposed());

    let fresh = registry.default_camera().unwrap().unwrap();
    assert!(!fresh.ptr_eq(&camera));
    assert!(fresh.open().unwrap());
    fresh.close().unwrap();

    registry.shutdown();
}

#[test]
fn test_switching_driver() {
    let registry = CaptureRegistry::new(Arc::new(DummyDriver::new(1)), config());
    assert_eq!(registry.cameras().unwrap().len(), 1);

    let composite = CompositeDriver::new(vec![
        Box::new(DummyDriver::new(2)),
        Box::new(HotPlugDriver::default()),
    ]);
    registry.set_driver(Arc::new(composite));
    assert_eq!(registry.cameras().unwrap().len(), 2);
    assert_eq!(registry.driver().name(), "composite");

    registry.shutdown();
}

#[test]
fn test_removed_listener_not_notified() {
    let registry = CaptureRegistry::new(Arc::new(DummyDriver::new(3)), config());
    let calls = Arc::new(AtomicUsize::new(0));

    struct Counter(Arc<AtomicUsize>);
    impl DiscoveryListener for Counter {
        fn on_camera_found(&self, _event: &DiscoveryEvent) -> ListenerResult {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    let listener: Arc<dyn DiscoveryListener> = Arc::new(Counter(Arc::clone(&calls)));
    assert!(registry.add_discovery_listener(Arc::clone(&listener)));
    assert!(registry.remove_discovery_listener(&listener));

    registry.cameras().unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    registry.shutdown();
}
