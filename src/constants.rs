// SPDX-License-Identifier: GPL-3.0-only

//! Crate-wide constants

use std::time::Duration;

/// Frame rate the default delay calculator aims for
pub const DEFAULT_TARGET_FPS: u32 = 50;

/// Poll step while waiting for the first cached frame
pub const IMAGE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Give up waiting for the first cached frame after this many polls (~10 s)
pub const IMAGE_POLL_ATTEMPTS: u32 = 100;

/// Upper bound for draining a notification queue on close
pub const NOTIFIER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Step used while polling for notifier termination
pub const NOTIFIER_DRAIN_POLL: Duration = Duration::from_millis(100);

/// Default notification queue capacity per camera session
pub const DEFAULT_NOTIFICATION_QUEUE: usize = 64;

/// Default device discovery timeout
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(60);

/// Motion detection timing
pub mod motion {
    use std::time::Duration;

    /// Default check interval
    pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(500);

    /// Intervals below this are rejected
    pub const MIN_INTERVAL: Duration = Duration::from_millis(100);

    /// Poll step of the inertia loop
    pub const INERTIA_POLL: Duration = Duration::from_millis(10);

    /// Default pixel intensity threshold (0 - 255)
    pub const DEFAULT_PIXEL_THRESHOLD: u8 = 25;

    /// Default area fraction threshold, in percent
    pub const DEFAULT_AREA_THRESHOLD: f64 = 0.2;

    /// Default maximum area fraction threshold, in percent
    pub const DEFAULT_AREA_THRESHOLD_MAX: f64 = 100.0;

    /// Default minimum distance between two reported points
    pub const DEFAULT_POINT_RANGE: u32 = 50;

    /// Default maximum number of reported points
    pub const DEFAULT_MAX_POINTS: usize = 100;

    /// Default blur strength of the motion pre-filter
    pub const DEFAULT_BLUR_SIGMA: f32 = 6.0;
}

/// Lock file timing
pub mod lock {
    use std::time::Duration;

    /// How often the lock holder refreshes its timestamp
    pub const REFRESH_INTERVAL: Duration = Duration::from_millis(2000);

    /// Attempts when rewriting the lock file in place
    pub const REWRITE_ATTEMPTS: u32 = 5;
}

/// Application information utilities
pub mod app_info {
    /// Get the crate version from build-time environment
    pub fn version() -> &'static str {
        env!("GIT_VERSION")
    }
}

/// Exponentially smoothed frame rate
///
/// One new sample weighs a fifth; the `+ 1` keeps the division defined for
/// instant fetches.
pub fn smooth_fps(previous: f64, elapsed: Duration) -> f64 {
    let elapsed_ms = elapsed.as_millis() as f64;
    (4.0 * previous + 1000.0 / (elapsed_ms + 1.0)) / 5.0
}
