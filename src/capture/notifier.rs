// SPDX-License-Identifier: GPL-3.0-only

//! Per-session image notification worker
//!
//! A camera allocates one [`Notifier`] when it opens and tears it down when it
//! closes. Image notifications are queued here so the producer (the frame
//! updater or a synchronous caller) never waits for listeners.

use crate::constants::{NOTIFIER_DRAIN_POLL, NOTIFIER_DRAIN_TIMEOUT};
use crate::errors::CaptureResult;
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, trace, warn};

/// Queued notification
pub type NotificationJob = Box<dyn FnOnce() + Send + 'static>;

/// Bounded queue drained by one dedicated thread
pub struct Notifier {
    name: String,
    sender: Option<SyncSender<NotificationJob>>,
    worker: Option<JoinHandle<()>>,
}

impl Notifier {
    /// Spawn the `notificator-[camera]` thread
    ///
    /// `capacity` is clamped to at least one slot.
    pub fn start(camera: &str, capacity: usize) -> CaptureResult<Self> {
        let name = format!("notificator-[{}]", camera);
        let (sender, receiver) = mpsc::sync_channel::<NotificationJob>(capacity.max(1));

        let worker = thread::Builder::new().name(name.clone()).spawn(move || {
            while let Ok(job) = receiver.recv() {
                job();
            }
        })?;

        debug!(notifier = %name, capacity, "Notifier started");

        Ok(Self {
            name,
            sender: Some(sender),
            worker: Some(worker),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue a job; returns false if it was dropped
    pub fn submit(&self, job: NotificationJob) -> bool {
        let Some(sender) = &self.sender else {
            trace!(notifier = %self.name, "Notifier shut down, dropping notification");
            return false;
        };

        match sender.try_send(job) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                trace!(notifier = %self.name, "Notification queue full, dropping notification");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                trace!(notifier = %self.name, "Notifier worker gone, dropping notification");
                false
            }
        }
    }

    /// Stop accepting jobs and wait for the queue to drain
    ///
    /// Returns false if the worker did not finish within the drain timeout.
    /// Called from the notifier thread itself, the wait is skipped.
    pub fn shutdown(&mut self) -> bool {
        self.sender.take();

        let Some(worker) = self.worker.take() else {
            return true;
        };

        if worker.thread().id() == thread::current().id() {
            debug!(notifier = %self.name, "Shutdown from notifier thread, not waiting");
            return true;
        }

        let deadline = Instant::now() + NOTIFIER_DRAIN_TIMEOUT;
        while !worker.is_finished() {
            if Instant::now() >= deadline {
                warn!(notifier = %self.name, "Notifier did not drain in time");
                self.worker = Some(worker);
                return false;
            }
            thread::sleep(NOTIFIER_DRAIN_POLL);
        }

        if worker.join().is_err() {
            warn!(notifier = %self.name, "Notifier thread panicked");
        }
        debug!(notifier = %self.name, "Notifier terminated");
        true
    }

    pub fn is_terminated(&self) -> bool {
        self.worker.as_ref().map(|w| w.is_finished()).unwrap_or(true)
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        // Never block in drop; a still-running worker is detached
        self.sender.take();
    }
}
