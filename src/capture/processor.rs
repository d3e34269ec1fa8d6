// SPDX-License-Identifier: GPL-3.0-only

//! Single-threaded device task processor
//!
//! All native calls of drivers that are not thread safe go through one worker
//! thread. Submission is a rendezvous in both directions: the caller blocks
//! until the worker has taken the task, executed it and handed it back, so
//! "submit returned" always means "task fully executed".
//!
//! ```text
//!  caller A ─┐                    ┌──────────────────┐
//!  caller B ─┼─ inbound (cap 0) ─▶│ atomic-processor │─ reply (cap 0) ─▶ caller
//!  caller C ─┘                    └──────────────────┘
//! ```

use super::task::DeviceTask;
use crate::errors::{CaptureError, CaptureResult};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Mutex, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};
use tracing::{debug, info, warn};

static PROCESSOR_NUMBER: AtomicUsize = AtomicUsize::new(0);

struct Envelope {
    task: DeviceTask,
    reply: SyncSender<DeviceTask>,
}

#[derive(Default)]
struct ProcessorState {
    inbound: Option<SyncSender<Envelope>>,
    worker: Option<JoinHandle<()>>,
}

/// Serializes device tasks onto a single worker thread
///
/// The worker is started lazily by the first submission. After
/// [`shutdown`](Self::shutdown) every submission is rejected.
#[derive(Default)]
pub struct TaskProcessor {
    state: Mutex<ProcessorState>,
    worker_id: OnceLock<ThreadId>,
    shut_down: AtomicBool,
}

impl TaskProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand a task to the worker and wait until it has been executed
    ///
    /// The returned task carries the captured output or error. Called from
    /// this processor's worker itself, the task runs inline so nested tasks
    /// cannot deadlock. Workers of other processors queue like any caller.
    pub fn submit(&self, task: DeviceTask) -> CaptureResult<DeviceTask> {
        if self.is_worker_thread() {
            let mut task = task;
            task.handle();
            return Ok(task);
        }

        let inbound = self.inbound()?;
        let (reply, response) = mpsc::sync_channel(0);

        inbound.send(Envelope { task, reply }).map_err(|_| {
            CaptureError::Rejected(
                "Cannot process because processor has been already shut down".to_string(),
            )
        })?;

        response.recv().map_err(|_| {
            CaptureError::Interrupted("Processor stopped before the task completed".to_string())
        })
    }

    /// Stop accepting work and wait for the worker to finish
    ///
    /// Idempotent. Tasks already handed over are still executed.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        let (inbound, worker) = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            (state.inbound.take(), state.worker.take())
        };

        let Some(worker) = worker else {
            debug!("Task processor shut down before it was started");
            return;
        };

        debug!("Shutting down task processor");
        drop(inbound);

        if worker.thread().id() == thread::current().id() {
            debug!("Shutdown requested from the worker, not awaiting termination");
            return;
        }

        debug!("Awaiting tasks termination");
        if worker.join().is_err() {
            warn!("Task processor worker panicked");
        }
        debug!("All tasks have been terminated");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// True when called from this processor's worker thread
    pub fn is_worker_thread(&self) -> bool {
        self.worker_id
            .get()
            .is_some_and(|id| *id == thread::current().id())
    }

    /// True once the worker thread has been spawned
    pub fn is_started(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .worker
            .is_some()
    }

    fn inbound(&self) -> CaptureResult<SyncSender<Envelope>> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        if self.shut_down.load(Ordering::SeqCst) {
            return Err(CaptureError::Rejected(
                "Cannot process because processor has been already shut down".to_string(),
            ));
        }

        if let Some(inbound) = &state.inbound {
            return Ok(inbound.clone());
        }

        let (inbound, receiver) = mpsc::sync_channel(0);
        let name = format!(
            "atomic-processor-{}",
            PROCESSOR_NUMBER.fetch_add(1, Ordering::SeqCst) + 1
        );
        info!(thread = %name, "Starting task processor");

        let worker = thread::Builder::new()
            .name(name)
            .spawn(move || run(receiver))?;

        let _ = self.worker_id.set(worker.thread().id());
        state.worker = Some(worker);
        state.inbound = Some(inbound.clone());
        Ok(inbound)
    }
}

impl Drop for TaskProcessor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(inbound: Receiver<Envelope>) {
    while let Ok(Envelope { mut task, reply }) = inbound.recv() {
        task.handle();
        if reply.send(task).is_err() {
            debug!("Task submitter went away before receiving the result");
        }
    }

    debug!("Task processor worker exiting");
}
