// SPDX-License-Identifier: GPL-3.0-only

//! Camera capture core
//!
//! ```text
//! CaptureRegistry ── DiscoveryService ── Driver
//!        │                  │
//!        │                  ▼
//!        │               Camera ──▶ DeviceTask ──▶ TaskProcessor ──▶ Device
//!        │                  │
//!        └── TaskProcessor  ├── FrameUpdater (asynchronous mode)
//!                           ├── Notifier (image listeners)
//!                           └── CameraLock
//! ```

pub mod camera;
pub mod discovery;
pub mod listener;
pub mod lock;
pub mod notifier;
pub mod processor;
pub mod registry;
pub mod task;
pub mod updater;

pub use camera::{Camera, CameraOptions};
pub use discovery::DiscoveryService;
pub use listener::{
    CameraEvent, CameraEventKind, CameraListener, DiscoveryEvent, DiscoveryEventKind,
    DiscoveryListener, ListenerSet,
};
pub use lock::{CameraLock, FileLock, NoLock};
pub use notifier::Notifier;
pub use processor::TaskProcessor;
pub use registry::CaptureRegistry;
pub use task::{DeviceTask, SharedDevice, TaskKind, TaskOutput};
pub use updater::{DefaultDelayCalculator, DelayCalculator, FrameUpdater};
