// SPDX-License-Identifier: GPL-3.0-only

//! Camera capability abstraction
//!
//! Native capture bindings live outside this crate. They plug in through two
//! traits:
//!
//! ```text
//! ┌─────────────────────┐
//! │       Driver        │  ← Enumerates devices, declares thread safety
//! └──────────┬──────────┘
//!            │ devices()
//!            ▼
//! ┌─────────────────────┐
//! │       Device        │  ← open / close / dispose / frame
//! └──────────┬──────────┘
//!            │ optional capabilities
//!            ▼
//!  BufferAccess · FpsSource · Configurable
//! ```
//!
//! A [`Device`] is not assumed to be thread safe. The capture layer wraps each
//! one in a mutex and, unless the driver says otherwise, funnels every call
//! through the shared task processor.

pub mod composite;
pub mod dummy;
pub mod frame_loop;
pub mod types;

pub use composite::CompositeDriver;
pub use dummy::{DummyDevice, DummyDriver};
pub use frame_loop::{CaptureLoopController, LoopAction, StopToken};
pub use types::*;

use crate::errors::CaptureResult;
use std::collections::HashMap;
use std::time::Duration;

/// Default interval between two device scans
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_millis(2000);

/// Direct access to raw frame bytes
pub trait BufferAccess {
    /// Packed RGB bytes of the next frame, 3 bytes per pixel
    fn frame_bytes(&mut self) -> CaptureResult<Vec<u8>>;
}

/// Device able to report its own frame rate
pub trait FpsSource {
    fn fps(&self) -> f64;
}

/// Device accepting opaque configuration parameters
pub trait Configurable {
    fn set_parameters(&mut self, parameters: &HashMap<String, serde_json::Value>)
    -> CaptureResult<()>;
}

/// Native camera handle
///
/// Implementations may block in any of the operations. Returning
/// [`CaptureError::Interrupted`](crate::errors::CaptureError::Interrupted)
/// signals that the operation was abandoned rather than failed.
pub trait Device: Send {
    /// Device name, unique per physical camera
    fn name(&self) -> &str;

    /// Resolutions supported by the device
    fn resolutions(&self) -> Vec<Size>;

    /// Currently selected resolution
    fn resolution(&self) -> Size;

    fn set_resolution(&mut self, size: Size);

    fn open(&mut self) -> CaptureResult<()>;

    fn close(&mut self) -> CaptureResult<()>;

    /// Release the device for good
    fn dispose(&mut self) -> CaptureResult<()>;

    fn is_open(&self) -> bool;

    /// Fetch the next frame; `None` when the device had nothing to deliver
    fn frame(&mut self) -> CaptureResult<Option<Frame>>;

    fn as_buffer_access(&mut self) -> Option<&mut dyn BufferAccess> {
        None
    }

    fn as_fps_source(&self) -> Option<&dyn FpsSource> {
        None
    }

    fn as_configurable(&mut self) -> Option<&mut dyn Configurable> {
        None
    }
}

/// Optional device capabilities, resolved once when a device is wrapped
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceCapabilities {
    pub buffer_access: bool,
    pub fps_source: bool,
    pub configurable: bool,
}

impl DeviceCapabilities {
    pub fn probe(device: &mut dyn Device) -> Self {
        Self {
            buffer_access: device.as_buffer_access().is_some(),
            fps_source: device.as_fps_source().is_some(),
            configurable: device.as_configurable().is_some(),
        }
    }
}

/// Driver extension for periodic device scanning
pub trait DiscoverySupport {
    /// How long to wait between two scans
    fn scan_interval(&self) -> Duration {
        DEFAULT_SCAN_INTERVAL
    }

    /// Whether scanning is possible at all
    fn is_scan_possible(&self) -> bool;
}

/// Device enumerator
pub trait Driver: Send + Sync {
    /// Enumerate currently attached devices
    fn devices(&self) -> CaptureResult<Vec<Box<dyn Device>>>;

    /// If true, device calls bypass the task processor
    fn is_thread_safe(&self) -> bool {
        false
    }

    /// Discovery extension, when supported
    fn discovery(&self) -> Option<&dyn DiscoverySupport> {
        None
    }

    /// Short name used in logs
    fn name(&self) -> &str;
}
