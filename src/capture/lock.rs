// SPDX-License-Identifier: GPL-3.0-only

//! Advisory cross-process camera lock
//!
//! A process holding a camera keeps a small lock file up to date:
//!
//! ```text
//! <lock dir>/.webcam-lock-<name>   8 bytes, big-endian i64, epoch millis
//! ```
//!
//! The holder rewrites the timestamp every [`REFRESH_INTERVAL`]. Another
//! process treats the camera as taken while the timestamp is younger than
//! twice that interval. `-1` marks a released lock.

use crate::backends::camera::{CaptureLoopController, LoopAction};
use crate::constants::lock::{REFRESH_INTERVAL, REWRITE_ATTEMPTS};
use crate::errors::{CaptureError, CaptureResult};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, trace, warn};

const RELEASED: i64 = -1;

/// Lock guarding a camera against use by other processes
pub trait CameraLock: Send + Sync {
    /// Take the lock; fails if another live process holds it
    fn lock(&self) -> CaptureResult<()>;

    fn unlock(&self);

    /// True if held by this instance or by another live process
    fn is_locked(&self) -> bool;

    /// Turn the lock into a no-op for the rest of its life
    fn disable(&self);
}

/// Lock that never blocks anybody
#[derive(Debug, Default)]
pub struct NoLock;

impl CameraLock for NoLock {
    fn lock(&self) -> CaptureResult<()> {
        Ok(())
    }

    fn unlock(&self) {}

    fn is_locked(&self) -> bool {
        false
    }

    fn disable(&self) {}
}

/// Timestamp file lock
pub struct FileLock {
    name: String,
    path: PathBuf,
    locked: AtomicBool,
    disabled: AtomicBool,
    keeper: Mutex<Option<CaptureLoopController>>,
}

impl FileLock {
    /// Lock for `camera` in `dir`, or in the system temp dir when `None`
    pub fn new(camera: &str, dir: Option<&Path>) -> Self {
        let dir = dir.map(Path::to_path_buf).unwrap_or_else(std::env::temp_dir);
        let path = dir.join(format!(".webcam-lock-{}", sanitize(camera)));
        Self {
            name: camera.to_string(),
            path,
            locked: AtomicBool::new(false),
            disabled: AtomicBool::new(false),
            keeper: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Keep the refresher, or undo the acquisition if it could not start
    fn install_keeper(&self, keeper: io::Result<CaptureLoopController>) -> CaptureResult<()> {
        match keeper {
            Ok(keeper) => {
                *self.keeper.lock().unwrap_or_else(|e| e.into_inner()) = Some(keeper);
                debug!(camera = %self.name, lock = %self.path.display(), "Lock acquired");
                Ok(())
            }
            Err(e) => {
                warn!(camera = %self.name, error = %e, "Cannot start lock keeper, releasing lock");
                self.locked.store(false, Ordering::SeqCst);
                self.release_file();
                Err(e.into())
            }
        }
    }

    fn release_file(&self) {
        if let Err(e) = write_timestamp(&self.path, RELEASED) {
            warn!(lock = %self.path.display(), error = %e, "Cannot release lock file");
        }
        if let Err(e) = fs::remove_file(&self.path) {
            trace!(lock = %self.path.display(), error = %e, "Lock file not removed");
        }
    }

    fn held_by_other(&self) -> bool {
        match read_timestamp(&self.path) {
            Ok(Some(stamp)) => stamp != RELEASED && now_millis() - stamp < alive_window_millis(),
            Ok(None) => false,
            Err(e) => {
                warn!(lock = %self.path.display(), error = %e, "Unreadable lock file, resetting it");
                if let Err(e) = write_timestamp(&self.path, RELEASED) {
                    warn!(lock = %self.path.display(), error = %e, "Cannot reset lock file");
                }
                false
            }
        }
    }
}

impl CameraLock for FileLock {
    fn lock(&self) -> CaptureResult<()> {
        if self.disabled.load(Ordering::SeqCst) || self.locked.load(Ordering::SeqCst) {
            return Ok(());
        }

        if self.held_by_other() {
            return Err(CaptureError::Lock(format!(
                "Webcam {} has already been locked",
                self.name
            )));
        }

        write_timestamp(&self.path, now_millis())?;
        self.locked.store(true, Ordering::SeqCst);

        let path = self.path.clone();
        let keeper = CaptureLoopController::start(
            &format!("webcam-lock-[{}]", self.name),
            move |_| {
                if let Err(e) = write_timestamp(&path, now_millis()) {
                    warn!(lock = %path.display(), error = %e, "Cannot refresh lock file");
                }
                LoopAction::Wait(REFRESH_INTERVAL)
            },
        );
        self.install_keeper(keeper)
    }

    fn unlock(&self) {
        if self.disabled.load(Ordering::SeqCst) || !self.locked.swap(false, Ordering::SeqCst) {
            return;
        }

        let keeper = self.keeper.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(mut keeper) = keeper {
            keeper.stop();
        }

        self.release_file();
        debug!(camera = %self.name, "Lock released");
    }

    fn is_locked(&self) -> bool {
        if self.disabled.load(Ordering::SeqCst) {
            return false;
        }
        self.locked.load(Ordering::SeqCst) || self.held_by_other()
    }

    fn disable(&self) {
        if !self.disabled.load(Ordering::SeqCst) {
            debug!(camera = %self.name, "Disabling lock");
            self.unlock();
            self.disabled.store(true, Ordering::SeqCst);
        }
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        self.unlock();
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn alive_window_millis() -> i64 {
    2 * REFRESH_INTERVAL.as_millis() as i64
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// `Ok(None)` for a missing file, `Err` for a corrupt one
fn read_timestamp(path: &Path) -> io::Result<Option<i64>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    let stamp: [u8; 8] = bytes.get(..8).and_then(|b| b.try_into().ok()).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("lock file holds {} bytes", bytes.len()),
        )
    })?;

    Ok(Some(i64::from_be_bytes(stamp)))
}

fn write_timestamp(path: &Path, stamp: i64) -> io::Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!("{}.{}.tmp", file_name, std::process::id()));

    fs::write(&tmp, stamp.to_be_bytes())?;

    let mut attempt = 1;
    loop {
        match fs::rename(&tmp, path) {
            Ok(()) => return Ok(()),
            Err(e) if attempt < REWRITE_ATTEMPTS => {
                trace!(lock = %path.display(), attempt, error = %e, "Lock rewrite failed, retrying");
                attempt += 1;
                thread::sleep(Duration::from_millis(10));
            }
            Err(e) => {
                let _ = fs::remove_file(&tmp);
                return Err(e);
            }
        }
    }
}
