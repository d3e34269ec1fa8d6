// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for camera operations
//!
//! This module provides command-line functionality for:
//! - Listing available cameras
//! - Saving snapshots
//! - Watching for motion
//! - Following device discovery

use chrono::Local;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use webcam_capture::backends::camera::DummyDriver;
use webcam_capture::capture::{DiscoveryEvent, DiscoveryListener};
use webcam_capture::errors::ListenerResult;
use webcam_capture::{
    Camera, CaptureConfig, CaptureRegistry, CaptureResult, MotionDetector, MotionEvent,
    MotionListener,
};

type CliResult = Result<(), Box<dyn std::error::Error>>;

/// Build the registry shared by all commands
pub fn registry(config: Option<&Path>, devices: usize) -> CaptureResult<CaptureRegistry> {
    let config = CaptureConfig::load_or_default(config)?;
    Ok(CaptureRegistry::new(
        Arc::new(DummyDriver::new(devices)),
        config,
    ))
}

fn camera_at(registry: &CaptureRegistry, index: usize) -> Result<Camera, Box<dyn std::error::Error>> {
    let cameras = registry.cameras()?;
    let count = cameras.len();
    cameras.into_iter().nth(index).ok_or_else(|| {
        format!(
            "Camera index {} not found, {} camera(s) available",
            index, count
        )
        .into()
    })
}

/// List all available cameras
pub fn list_cameras(registry: &CaptureRegistry) -> CliResult {
    let cameras = registry.cameras()?;

    if cameras.is_empty() {
        println!("No cameras found.");
        return Ok(());
    }

    println!("Available cameras:");
    println!();
    for (index, camera) in cameras.iter().enumerate() {
        println!("  [{}] {}", index, camera.name());

        // Sort by resolution (highest first)
        let mut sizes = camera.view_sizes();
        sizes.sort_by_key(|size| std::cmp::Reverse(size.area()));
        let sizes: Vec<String> = sizes.iter().map(ToString::to_string).collect();
        if !sizes.is_empty() {
            println!("      Resolutions: {}", sizes.join(", "));
        }
        println!("      Current: {}", camera.view_size());
        println!();
    }

    Ok(())
}

/// Save one frame from the specified camera
pub fn take_snapshot(
    registry: &CaptureRegistry,
    camera_index: usize,
    output: Option<PathBuf>,
    asynchronous: bool,
) -> CliResult {
    let camera = camera_at(registry, camera_index)?;
    println!("Using camera: {}", camera.name());

    let opened = if asynchronous {
        camera.open_async()?
    } else {
        camera.open()?
    };
    if !opened {
        return Err(format!("Camera {} could not be opened", camera.name()).into());
    }

    let frame = camera.get_image();
    camera.close()?;
    let Some(frame) = frame? else {
        return Err("No frame received from camera".into());
    };

    let output_path = output.unwrap_or_else(|| {
        let timestamp = Local::now().format("%Y%m%d_%H%M%S");
        PathBuf::from(format!("snapshot_{}.png", timestamp))
    });

    frame.image().save(&output_path)?;
    println!(
        "Saved {} frame to: {}",
        frame.size(),
        output_path.display()
    );

    Ok(())
}

struct MotionPrinter;

impl MotionListener for MotionPrinter {
    fn on_motion_detected(&self, event: &MotionEvent) -> ListenerResult {
        println!(
            "[{}] motion on {}: area {:.2}%, center ({}, {}), {} point(s)",
            Local::now().format("%H:%M:%S%.3f"),
            event.camera.name(),
            event.area,
            event.cog.x,
            event.cog.y,
            event.points.len()
        );
        Ok(())
    }
}

/// Report motion until Ctrl+C or the time limit
pub fn watch_motion(
    registry: &CaptureRegistry,
    camera_index: usize,
    interval_ms: Option<u64>,
    seconds: Option<u64>,
) -> CliResult {
    let camera = camera_at(registry, camera_index)?;
    let detector = MotionDetector::from_config(camera.clone(), &registry.config().motion)?;
    if let Some(interval_ms) = interval_ms {
        detector.set_interval(Duration::from_millis(interval_ms))?;
    }
    detector.add_listener(Arc::new(MotionPrinter));

    let stop = Arc::new(AtomicBool::new(false));
    let stop_handler = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        stop_handler.store(true, Ordering::SeqCst);
    })?;

    detector.start()?;
    println!(
        "Watching {} every {}ms (Ctrl+C to stop)",
        camera.name(),
        detector.interval().as_millis()
    );

    let deadline = seconds.map(|s| Instant::now() + Duration::from_secs(s));
    while !stop.load(Ordering::SeqCst) && deadline.is_none_or(|d| Instant::now() < d) {
        std::thread::sleep(Duration::from_millis(100));
    }

    detector.stop()?;
    println!("Stopped watching {}", camera.name());

    Ok(())
}

struct DiscoveryPrinter;

impl DiscoveryListener for DiscoveryPrinter {
    fn on_camera_found(&self, event: &DiscoveryEvent) -> ListenerResult {
        println!("+ {}", event.camera.name());
        Ok(())
    }

    fn on_camera_gone(&self, event: &DiscoveryEvent) -> ListenerResult {
        println!("- {}", event.camera.name());
        Ok(())
    }
}

/// Follow device arrivals and removals for a while
pub fn discover(registry: &CaptureRegistry, seconds: u64) -> CliResult {
    registry.add_discovery_listener(Arc::new(DiscoveryPrinter));

    let cameras = registry.cameras()?;
    println!("Found {} camera(s):", cameras.len());
    for camera in &cameras {
        println!("  {}", camera.name());
    }

    let service = registry.discovery_service();
    if service.is_running() {
        println!("Scanning for changes for {}s", seconds);
        std::thread::sleep(Duration::from_secs(seconds));
    } else {
        println!("Driver does not support device scanning");
    }

    Ok(())
}
