// SPDX-License-Identifier: GPL-3.0-only

//! Units of device work
//!
//! Every native call made by a [`Camera`](super::Camera) is wrapped in a
//! [`DeviceTask`]. Tasks run on the processor worker when the driver is not
//! thread safe, inline otherwise. A task records the outcome of its body,
//! including panics, instead of unwinding through the worker.

use super::processor::TaskProcessor;
use crate::backends::camera::{Device, Frame};
use crate::errors::{CaptureError, CaptureResult};
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};
use tracing::trace;

/// Device shared between a camera and its tasks
pub type SharedDevice = Arc<Mutex<Box<dyn Device>>>;

/// Operation carried by a task
#[derive(Debug, Clone)]
pub enum TaskKind {
    Open,
    Close,
    Dispose,
    GetImage,
    GetBuffer,
    Configure(HashMap<String, serde_json::Value>),
}

impl TaskKind {
    pub fn name(&self) -> &'static str {
        match self {
            TaskKind::Open => "open",
            TaskKind::Close => "close",
            TaskKind::Dispose => "dispose",
            TaskKind::GetImage => "get-image",
            TaskKind::GetBuffer => "get-buffer",
            TaskKind::Configure(_) => "configure",
        }
    }
}

/// Value produced by a successful task
#[derive(Debug)]
pub enum TaskOutput {
    Done,
    Frame(Option<Frame>),
    Buffer(Vec<u8>),
}

/// Single serialized unit of device work
pub struct DeviceTask {
    kind: TaskKind,
    device: SharedDevice,
    output: Option<TaskOutput>,
    error: Option<CaptureError>,
}

impl DeviceTask {
    pub fn new(kind: TaskKind, device: SharedDevice) -> Self {
        Self {
            kind,
            device,
            output: None,
            error: None,
        }
    }

    pub fn kind(&self) -> &TaskKind {
        &self.kind
    }

    /// Error captured while the task ran
    pub fn error(&self) -> Option<&CaptureError> {
        self.error.as_ref()
    }

    /// Run the task body on the current thread, capturing any failure
    pub(crate) fn handle(&mut self) {
        trace!(task = self.kind.name(), "Handling device task");

        let device = Arc::clone(&self.device);
        let kind = &self.kind;
        let result = catch_unwind(AssertUnwindSafe(|| {
            let mut device = device.lock().unwrap_or_else(|e| e.into_inner());
            execute(kind, device.as_mut())
        }));

        match result {
            Ok(Ok(output)) => self.output = Some(output),
            Ok(Err(e)) => self.error = Some(e),
            Err(_) => {
                self.error = Some(CaptureError::Device(format!(
                    "Device panicked during {} task",
                    self.kind.name()
                )))
            }
        }
    }

    /// Execute the task, through `processor` unless `thread_safe` is set
    ///
    /// Tasks issued from the worker of `processor` itself always run inline.
    pub fn process(self, processor: &TaskProcessor, thread_safe: bool) -> CaptureResult<TaskOutput> {
        let task = if thread_safe || processor.is_worker_thread() {
            let mut task = self;
            task.handle();
            task
        } else {
            processor.submit(self)?
        };
        task.into_result()
    }

    fn into_result(self) -> CaptureResult<TaskOutput> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.output.unwrap_or(TaskOutput::Done)),
        }
    }
}

fn execute(kind: &TaskKind, device: &mut dyn Device) -> CaptureResult<TaskOutput> {
    match kind {
        TaskKind::Open => device.open().map(|_| TaskOutput::Done),
        TaskKind::Close => device.close().map(|_| TaskOutput::Done),
        TaskKind::Dispose => device.dispose().map(|_| TaskOutput::Done),
        TaskKind::GetImage => device.frame().map(TaskOutput::Frame),
        TaskKind::GetBuffer => {
            let name = device.name().to_string();
            match device.as_buffer_access() {
                Some(buffer) => buffer.frame_bytes().map(TaskOutput::Buffer),
                None => Err(CaptureError::Unsupported(format!(
                    "Device {} does not support buffer access",
                    name
                ))),
            }
        }
        TaskKind::Configure(parameters) => {
            let name = device.name().to_string();
            match device.as_configurable() {
                Some(configurable) => configurable
                    .set_parameters(parameters)
                    .map(|_| TaskOutput::Done),
                None => Err(CaptureError::Unsupported(format!(
                    "Device {} is not configurable",
                    name
                ))),
            }
        }
    }
}
