// SPDX-License-Identifier: GPL-3.0-only

//! Webcam capture - device serialization, frame caching and motion detection
//!
//! This library wraps native camera devices behind a small capability
//! interface and makes them safe and convenient to use from many threads.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`backends`]: Device and driver capability traits, value types, synthetic drivers
//! - [`capture`]: Task processor, cameras, frame updater, discovery and registry
//! - [`motion`]: Frame filters and motion detection
//! - [`config`]: User configuration handling
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use webcam_capture::backends::camera::DummyDriver;
//! use webcam_capture::{CaptureConfig, CaptureRegistry};
//!
//! let registry = CaptureRegistry::new(Arc::new(DummyDriver::new(1)), CaptureConfig::default());
//! if let Some(camera) = registry.default_camera()? {
//!     camera.open()?;
//!     let frame = camera.get_image()?;
//!     camera.close()?;
//! }
//! registry.shutdown();
//! # Ok::<(), webcam_capture::CaptureError>(())
//! ```

pub mod backends;
pub mod capture;
pub mod config;
pub mod constants;
pub mod errors;
pub mod motion;

// Re-export commonly used types
pub use backends::camera::{Device, Driver, Frame, Point, Rect, Size};
pub use capture::{Camera, CameraListener, CaptureRegistry, DiscoveryListener, TaskProcessor};
pub use config::{CaptureConfig, MotionConfig};
pub use errors::{CaptureError, CaptureResult};
pub use motion::{MotionDetector, MotionEvent, MotionListener};
