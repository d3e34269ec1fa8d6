// SPDX-License-Identifier: GPL-3.0-only
//! Thread lifecycle management for capture loops
//!
//! Every background activity in the crate (frame updater, motion detector,
//! discovery scan, lock keeper) runs on a dedicated OS thread driven by a
//! [`CaptureLoopController`]. Loops wait through a [`StopToken`] rather than
//! `thread::sleep`, so stopping a loop does not have to wait out its delay.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Action returned by the capture loop callback to control loop behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    /// Run the next iteration immediately
    Continue,
    /// Run the next iteration after the given delay
    Wait(Duration),
    /// Stop the loop gracefully
    Stop,
}

/// Stop signal shared between a controller and its loop thread
#[derive(Debug, Default)]
pub struct StopToken {
    stopped: Mutex<bool>,
    signal: Condvar,
    flag: AtomicBool,
}

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        let mut stopped = self.stopped.lock().unwrap_or_else(|e| e.into_inner());
        *stopped = true;
        self.flag.store(true, Ordering::SeqCst);
        self.signal.notify_all();
    }

    /// Wait up to `timeout`; returns true if stop was requested meanwhile
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut stopped = self.stopped.lock().unwrap_or_else(|e| e.into_inner());
        while !*stopped {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            stopped = match self.signal.wait_timeout(stopped, deadline - now) {
                Ok((guard, _)) => guard,
                Err(e) => e.into_inner().0,
            };
        }
        true
    }
}

/// Controller for a capture loop running in a separate thread
///
/// # Example
///
/// ```ignore
/// let controller = CaptureLoopController::start("motion-detector-1", move |_| {
///     detector.detect();
///     LoopAction::Wait(interval)
/// })?;
///
/// // Later, stop the loop
/// controller.stop();
/// ```
pub struct CaptureLoopController {
    /// Thread handle for joining
    thread_handle: Option<JoinHandle<()>>,
    /// Signal to stop the loop
    stop_token: Arc<StopToken>,
    /// Name for logging
    name: String,
}

impl CaptureLoopController {
    /// Start a new capture loop in a named thread
    ///
    /// The closure is called repeatedly until it returns [`LoopAction::Stop`]
    /// or the controller is stopped. Waits requested through
    /// [`LoopAction::Wait`] end early when a stop is requested.
    pub fn start<F>(name: &str, mut loop_fn: F) -> std::io::Result<Self>
    where
        F: FnMut(&StopToken) -> LoopAction + Send + 'static,
    {
        let stop_token = Arc::new(StopToken::new());
        let token = Arc::clone(&stop_token);
        let name_clone = name.to_string();

        debug!(name = %name, "Starting capture loop");

        let thread_handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                debug!(name = %name_clone, "Capture loop thread started");

                loop {
                    if token.is_stopped() {
                        debug!(name = %name_clone, "Stop signal received");
                        break;
                    }

                    match loop_fn(&token) {
                        LoopAction::Continue => {}
                        LoopAction::Wait(delay) => {
                            if token.wait(delay) {
                                debug!(name = %name_clone, "Stopped while waiting");
                                break;
                            }
                        }
                        LoopAction::Stop => {
                            debug!(name = %name_clone, "Loop requested stop");
                            break;
                        }
                    }
                }

                debug!(name = %name_clone, "Capture loop thread exiting");
            })?;

        Ok(Self {
            thread_handle: Some(thread_handle),
            stop_token,
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check if the loop is still running
    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Id of the loop thread, if it has not been joined yet
    pub fn thread_id(&self) -> Option<ThreadId> {
        self.thread_handle.as_ref().map(|h| h.thread().id())
    }

    /// Signal the loop to stop (non-blocking)
    pub fn request_stop(&self) {
        debug!(name = %self.name, "Requesting capture loop stop");
        self.stop_token.stop();
    }

    /// Stop the loop and wait for the thread to finish
    ///
    /// Calling this from the loop thread itself only signals the stop, since
    /// joining would never return.
    pub fn stop(&mut self) {
        self.request_stop();
        if self.thread_id() == Some(thread::current().id()) {
            debug!(name = %self.name, "Stop requested from loop thread, not joining");
            self.thread_handle.take();
            return;
        }
        self.join();
    }

    /// Wait for the thread to finish without sending stop signal
    pub fn join(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            debug!(name = %self.name, "Waiting for capture loop thread to finish");
            if let Err(e) = handle.join() {
                warn!(name = %self.name, "Capture loop thread panicked: {:?}", e);
            } else {
                info!(name = %self.name, "Capture loop stopped");
            }
        }
    }
}

impl Drop for CaptureLoopController {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            debug!(name = %self.name, "CaptureLoopController dropped, stopping loop");
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn test_basic_loop() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);

        let mut controller = CaptureLoopController::start("test-loop", move |_| {
            let count = counter_clone.fetch_add(1, Ordering::SeqCst);
            if count >= 10 {
                LoopAction::Stop
            } else {
                LoopAction::Continue
            }
        })
        .unwrap();

        controller.join();

        assert_eq!(counter.load(Ordering::SeqCst), 11); // 0-10 inclusive
    }

    #[test]
    fn test_stop_interrupts_wait() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);

        let mut controller = CaptureLoopController::start("test-wait", move |_| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            LoopAction::Wait(Duration::from_secs(30))
        })
        .unwrap();

        thread::sleep(Duration::from_millis(50));

        let started = Instant::now();
        controller.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stop_token_wait_times_out() {
        let token = StopToken::new();
        assert!(!token.wait(Duration::from_millis(10)));
        token.stop();
        assert!(token.wait(Duration::from_secs(10)));
    }

    #[test]
    fn test_thread_is_named() {
        let name = Arc::new(Mutex::new(None));
        let name_clone = Arc::clone(&name);

        let mut controller = CaptureLoopController::start("named-loop", move |_| {
            *name_clone.lock().unwrap() = thread::current().name().map(str::to_string);
            LoopAction::Stop
        })
        .unwrap();

        controller.join();
        assert_eq!(name.lock().unwrap().as_deref(), Some("named-loop"));
    }

    #[test]
    fn test_is_running() {
        let controller = CaptureLoopController::start("test-running", |_| {
            LoopAction::Wait(Duration::from_millis(100))
        })
        .unwrap();

        assert!(controller.is_running());

        // Drop will stop it
        drop(controller);
    }
}
