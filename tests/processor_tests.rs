// SPDX-License-Identifier: MPL-2.0

//! Integration tests for device task serialization

mod common;

use common::{CallLog, StubDevice};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use webcam_capture::backends::camera::{Device, Frame, Size};
use webcam_capture::capture::{
    CameraOptions, DeviceTask, SharedDevice, TaskKind, TaskOutput, TaskProcessor,
};
use webcam_capture::{Camera, CaptureError, CaptureResult};

fn shared(device: impl Device + 'static) -> SharedDevice {
    Arc::new(Mutex::new(Box::new(device)))
}

#[test]
fn test_tasks_from_many_threads_run_one_at_a_time() {
    let processor = Arc::new(TaskProcessor::new());
    let delay = Duration::from_millis(50);
    let devices: Vec<StubDevice> = (0..4)
        .map(|i| StubDevice::new(&format!("stub {}", i)).with_delay(delay))
        .collect();
    let logs: Vec<_> = devices.iter().map(StubDevice::log).collect();

    let started = Instant::now();
    let handles: Vec<_> = devices
        .into_iter()
        .map(|device| {
            let processor = Arc::clone(&processor);
            let device = shared(device);
            thread::spawn(move || {
                DeviceTask::new(TaskKind::Open, device).process(&processor, false)
            })
        })
        .collect();
    for handle in handles {
        assert!(handle.join().unwrap().is_ok());
    }

    // Separate devices, so only the single worker keeps them apart
    assert!(started.elapsed() >= delay * 4);
    for log in logs {
        let calls = log.calls();
        assert_eq!(calls.len(), 1);
        let thread = calls[0].thread.as_deref().unwrap();
        assert!(thread.starts_with("atomic-processor-"), "ran on {}", thread);
    }
}

#[test]
fn test_tasks_execute_in_submission_order() {
    let processor = Arc::new(TaskProcessor::new());
    let log = CallLog::default();

    let handles: Vec<_> = (0..5)
        .map(|i| {
            let processor = Arc::clone(&processor);
            let device = shared(
                StubDevice::new(&format!("d{}", i))
                    .with_log(log.clone())
                    .with_delay(Duration::from_millis(40)),
            );
            thread::spawn(move || {
                // Stagger so each submission queues behind a busy worker
                thread::sleep(Duration::from_millis(25 * i));
                DeviceTask::new(TaskKind::Open, device).process(&processor, false)
            })
        })
        .collect();
    for handle in handles {
        assert!(handle.join().unwrap().is_ok());
    }

    let order: Vec<String> = log.calls().into_iter().map(|call| call.device).collect();
    assert_eq!(order, vec!["d0", "d1", "d2", "d3", "d4"]);
}

#[test]
fn test_submit_returns_after_execution() {
    let processor = TaskProcessor::new();
    let device = StubDevice::new("stub").with_delay(Duration::from_millis(30));
    let log = device.log();

    let task = processor
        .submit(DeviceTask::new(TaskKind::GetImage, shared(device)))
        .unwrap();

    assert!(task.error().is_none());
    assert_eq!(log.count("frame"), 1);
}

/// Device whose open issues another task through the same processor
struct NestingDevice {
    inner: StubDevice,
    processor: Arc<TaskProcessor>,
    nested: SharedDevice,
}

impl Device for NestingDevice {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn resolutions(&self) -> Vec<Size> {
        self.inner.resolutions()
    }

    fn resolution(&self) -> Size {
        self.inner.resolution()
    }

    fn set_resolution(&mut self, size: Size) {
        self.inner.set_resolution(size);
    }

    fn open(&mut self) -> CaptureResult<()> {
        let task = DeviceTask::new(TaskKind::Open, Arc::clone(&self.nested));
        self.processor.submit(task)?;
        self.inner.open()
    }

    fn close(&mut self) -> CaptureResult<()> {
        self.inner.close()
    }

    fn dispose(&mut self) -> CaptureResult<()> {
        self.inner.dispose()
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    fn frame(&mut self) -> CaptureResult<Option<Frame>> {
        self.inner.frame()
    }
}

#[test]
fn test_nested_submission_runs_inline() {
    let processor = Arc::new(TaskProcessor::new());
    let nested = StubDevice::new("nested");
    let nested_log = nested.log();
    let outer = NestingDevice {
        inner: StubDevice::new("outer"),
        processor: Arc::clone(&processor),
        nested: shared(nested),
    };

    let output = DeviceTask::new(TaskKind::Open, shared(outer)).process(&processor, false);

    assert!(matches!(output, Ok(TaskOutput::Done)));
    let calls = nested_log.calls();
    assert_eq!(calls.len(), 1);
    assert!(
        calls[0]
            .thread
            .as_deref()
            .is_some_and(|t| t.starts_with("atomic-processor-"))
    );
}

#[test]
fn test_nested_submission_to_other_processor_waits_its_turn() {
    let first = Arc::new(TaskProcessor::new());
    let second = Arc::new(TaskProcessor::new());
    let log = CallLog::default();

    let busy = shared(
        StubDevice::new("busy")
            .with_log(log.clone())
            .with_delay(Duration::from_millis(300)),
    );
    let blocker = {
        let second = Arc::clone(&second);
        thread::spawn(move || DeviceTask::new(TaskKind::Open, busy).process(&second, false))
    };
    thread::sleep(Duration::from_millis(50));

    // Runs on the first worker, submits into the busy second one
    let outer = NestingDevice {
        inner: StubDevice::new("outer"),
        processor: Arc::clone(&second),
        nested: shared(StubDevice::new("nested").with_log(log.clone())),
    };
    let started = Instant::now();
    let output = DeviceTask::new(TaskKind::Open, shared(outer)).process(&first, false);

    assert!(matches!(output, Ok(TaskOutput::Done)));
    assert!(blocker.join().unwrap().is_ok());
    assert!(started.elapsed() >= Duration::from_millis(200));

    let calls = log.calls();
    let devices: Vec<_> = calls.iter().map(|call| call.device.as_str()).collect();
    assert_eq!(devices, ["busy", "nested"]);
    assert!(calls[0].thread.is_some());
    assert_eq!(calls[1].thread, calls[0].thread);
}

struct PanickingDevice(StubDevice);

impl Device for PanickingDevice {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn resolutions(&self) -> Vec<Size> {
        self.0.resolutions()
    }

    fn resolution(&self) -> Size {
        self.0.resolution()
    }

    fn set_resolution(&mut self, size: Size) {
        self.0.set_resolution(size);
    }

    fn open(&mut self) -> CaptureResult<()> {
        self.0.open()
    }

    fn close(&mut self) -> CaptureResult<()> {
        self.0.close()
    }

    fn dispose(&mut self) -> CaptureResult<()> {
        self.0.dispose()
    }

    fn is_open(&self) -> bool {
        self.0.is_open()
    }

    fn frame(&mut self) -> CaptureResult<Option<Frame>> {
        panic!("sensor fell off");
    }
}

#[test]
fn test_panicking_device_does_not_kill_worker() {
    let processor = TaskProcessor::new();
    let device = shared(PanickingDevice(StubDevice::new("fragile")));

    let result = DeviceTask::new(TaskKind::GetImage, Arc::clone(&device)).process(&processor, false);
    assert!(matches!(result, Err(CaptureError::Device(_))));

    // Worker and device mutex both survive
    let result = DeviceTask::new(TaskKind::Open, device).process(&processor, false);
    assert!(result.is_ok());
}

#[test]
fn test_camera_rejected_after_shutdown() {
    let processor = Arc::new(TaskProcessor::new());
    let camera = Camera::new(Box::new(StubDevice::new("stub")), Arc::clone(&processor));

    processor.shutdown();
    processor.shutdown();

    assert!(matches!(camera.open(), Err(CaptureError::Rejected(_))));
    assert!(!camera.is_open());
}

#[test]
fn test_thread_safe_camera_bypasses_worker() {
    let processor = Arc::new(TaskProcessor::new());
    let device = StubDevice::new("stub");
    let log = device.log();
    let options = CameraOptions {
        thread_safe: true,
        ..CameraOptions::default()
    };
    let camera = Camera::with_options(Box::new(device), Arc::clone(&processor), options);

    assert!(camera.open().unwrap());
    camera.close().unwrap();

    assert!(!processor.is_started());
    let current = thread::current().name().map(str::to_string);
    assert!(log.calls().iter().all(|call| call.thread == current));
}
