// SPDX-License-Identifier: GPL-3.0-only

use crate::constants::motion as motion_defaults;
use crate::constants::{DEFAULT_DISCOVERY_TIMEOUT, DEFAULT_NOTIFICATION_QUEUE, DEFAULT_TARGET_FPS};
use crate::errors::{CaptureError, CaptureResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Directory name under the user config dir
const CONFIG_DIR: &str = "webcam-capture";
const CONFIG_FILE: &str = "config.json";

/// Motion detector settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// Check interval in milliseconds (>= 100)
    pub interval_ms: u64,
    /// Inertia in milliseconds; `None` means twice the interval
    pub inertia_ms: Option<u64>,
    /// Per-pixel intensity threshold
    pub pixel_threshold: u8,
    /// Minimum moved area in percent
    pub area_threshold: f64,
    /// Maximum moved area in percent
    pub area_threshold_max: f64,
    /// Minimum distance between two reported points
    pub point_range: u32,
    /// Maximum number of reported points
    pub max_points: usize,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            interval_ms: motion_defaults::DEFAULT_INTERVAL.as_millis() as u64,
            inertia_ms: None,
            pixel_threshold: motion_defaults::DEFAULT_PIXEL_THRESHOLD,
            area_threshold: motion_defaults::DEFAULT_AREA_THRESHOLD,
            area_threshold_max: motion_defaults::DEFAULT_AREA_THRESHOLD_MAX,
            point_range: motion_defaults::DEFAULT_POINT_RANGE,
            max_points: motion_defaults::DEFAULT_MAX_POINTS,
        }
    }
}

impl MotionConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn inertia(&self) -> Option<Duration> {
        self.inertia_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> CaptureResult<()> {
        if self.interval() < motion_defaults::MIN_INTERVAL {
            return Err(CaptureError::Config(format!(
                "motion.interval_ms must be at least {}",
                motion_defaults::MIN_INTERVAL.as_millis()
            )));
        }
        for (key, value) in [
            ("area_threshold", self.area_threshold),
            ("area_threshold_max", self.area_threshold_max),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(CaptureError::Config(format!(
                    "motion.{} must be within 0 and 100",
                    key
                )));
            }
        }
        if self.area_threshold > self.area_threshold_max {
            return Err(CaptureError::Config(
                "motion.area_threshold cannot exceed motion.area_threshold_max".to_string(),
            ));
        }
        Ok(())
    }
}

/// Capture settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Frame rate the asynchronous updater aims for
    pub target_fps: u32,
    /// Open cameras on first image request
    pub auto_open: bool,
    /// Guard cameras with a lock file
    pub lock_enabled: bool,
    /// Lock file directory, system temp dir when unset
    pub lock_dir: Option<PathBuf>,
    /// Device enumeration timeout in milliseconds
    pub discovery_timeout_ms: u64,
    /// Pending image notifications kept per camera
    pub notification_queue: usize,
    pub motion: MotionConfig,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            target_fps: DEFAULT_TARGET_FPS,
            auto_open: false,
            lock_enabled: true,
            lock_dir: None,
            discovery_timeout_ms: DEFAULT_DISCOVERY_TIMEOUT.as_millis() as u64,
            notification_queue: DEFAULT_NOTIFICATION_QUEUE,
            motion: MotionConfig::default(),
        }
    }
}

impl CaptureConfig {
    /// Default location, `<config dir>/webcam-capture/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Read and validate a config file
    pub fn load(path: &Path) -> CaptureResult<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| CaptureError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        debug!(path = %path.display(), "Configuration loaded");
        Ok(config)
    }

    /// Load `path`, or the default location; a missing file gives defaults
    pub fn load_or_default(path: Option<&Path>) -> CaptureResult<Self> {
        let Some(path) = path.map(Path::to_path_buf).or_else(Self::default_path) else {
            debug!("No config directory, using defaults");
            return Ok(Self::default());
        };

        if !path.exists() {
            debug!(path = %path.display(), "No configuration file, using defaults");
            return Ok(Self::default());
        }

        Self::load(&path)
    }

    /// Write as pretty JSON, creating parent directories
    pub fn save(&self, path: &Path) -> CaptureResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    pub fn validate(&self) -> CaptureResult<()> {
        if self.target_fps == 0 {
            return Err(CaptureError::Config("target_fps must be positive".to_string()));
        }
        if self.discovery_timeout_ms == 0 {
            return Err(CaptureError::Config(
                "discovery_timeout_ms must be positive".to_string(),
            ));
        }
        self.motion.validate()
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }
}
