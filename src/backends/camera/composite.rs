// SPDX-License-Identifier: GPL-3.0-only

//! Driver aggregating the devices of several other drivers

use super::{DEFAULT_SCAN_INTERVAL, Device, DiscoverySupport, Driver};
use crate::errors::CaptureResult;
use std::time::Duration;
use tracing::warn;

pub struct CompositeDriver {
    drivers: Vec<Box<dyn Driver>>,
    scan_interval: Option<Duration>,
}

impl CompositeDriver {
    pub fn new(drivers: Vec<Box<dyn Driver>>) -> Self {
        Self {
            drivers,
            scan_interval: None,
        }
    }

    pub fn add(&mut self, driver: Box<dyn Driver>) {
        self.drivers.push(driver);
    }

    pub fn drivers(&self) -> &[Box<dyn Driver>] {
        &self.drivers
    }

    /// Zero resets to the default interval
    pub fn set_scan_interval(&mut self, interval: Duration) {
        self.scan_interval = (!interval.is_zero()).then_some(interval);
    }
}

impl Driver for CompositeDriver {
    /// Devices of all drivers, in driver order
    ///
    /// A failing driver is skipped so the others can still be used.
    fn devices(&self) -> CaptureResult<Vec<Box<dyn Device>>> {
        let mut all = Vec::new();
        for driver in &self.drivers {
            match driver.devices() {
                Ok(devices) => all.extend(devices),
                Err(e) => warn!(driver = %driver.name(), error = %e, "Driver enumeration failed"),
            }
        }
        Ok(all)
    }

    fn is_thread_safe(&self) -> bool {
        self.drivers.iter().all(|d| d.is_thread_safe())
    }

    fn discovery(&self) -> Option<&dyn DiscoverySupport> {
        Some(self)
    }

    fn name(&self) -> &str {
        "composite"
    }
}

impl DiscoverySupport for CompositeDriver {
    fn scan_interval(&self) -> Duration {
        self.scan_interval.unwrap_or(DEFAULT_SCAN_INTERVAL)
    }

    fn is_scan_possible(&self) -> bool {
        true
    }
}
