// SPDX-License-Identifier: GPL-3.0-only

//! Synthetic camera driver
//!
//! Produces a gradient background with a square that moves a few pixels per
//! frame, paced at roughly 30 frames per second. Useful for trying the
//! capture stack without hardware.

use super::{BufferAccess, Device, DiscoverySupport, Driver, Frame, Size, resolution};
use crate::errors::{CaptureError, CaptureResult};
use image::{Rgba, RgbaImage};
use std::thread;
use std::time::Duration;
use tracing::debug;

const FRAME_PACING: Duration = Duration::from_millis(1000 / 30);
const SQUARE_SIZE: u32 = 24;
const SQUARE_STEP: u32 = 4;

/// Synthetic device
pub struct DummyDevice {
    name: String,
    resolution: Size,
    open: bool,
    disposed: bool,
    frame_counter: u32,
    pacing: Duration,
}

impl DummyDevice {
    pub const RESOLUTIONS: [Size; 3] = [resolution::QQVGA, resolution::QVGA, resolution::VGA];

    pub fn new(number: usize) -> Self {
        Self {
            name: format!("Dummy Webcam {}", number),
            resolution: Self::RESOLUTIONS[0],
            open: false,
            disposed: false,
            frame_counter: 0,
            pacing: FRAME_PACING,
        }
    }

    /// Override the per-frame delay
    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    fn render(&mut self) -> RgbaImage {
        let Size { width, height } = self.resolution;
        let travel = width.saturating_sub(SQUARE_SIZE).max(1);
        let offset = (self.frame_counter % travel) * SQUARE_STEP % travel;
        let top = height.saturating_sub(SQUARE_SIZE) / 2;
        self.frame_counter = self.frame_counter.wrapping_add(1);

        RgbaImage::from_fn(width, height, |x, y| {
            let in_square =
                x >= offset && x < offset + SQUARE_SIZE && y >= top && y < top + SQUARE_SIZE;
            if in_square {
                Rgba([255, 255, 255, 255])
            } else {
                let r = (x * 255 / width.max(1)) as u8;
                let g = (y * 255 / height.max(1)) as u8;
                Rgba([r, g, 96, 255])
            }
        })
    }

    fn ensure_open(&self) -> CaptureResult<()> {
        if self.open {
            Ok(())
        } else {
            Err(CaptureError::Device(format!("{} is not open", self.name)))
        }
    }
}

impl Device for DummyDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn resolutions(&self) -> Vec<Size> {
        Self::RESOLUTIONS.to_vec()
    }

    fn resolution(&self) -> Size {
        self.resolution
    }

    fn set_resolution(&mut self, size: Size) {
        self.resolution = size;
    }

    fn open(&mut self) -> CaptureResult<()> {
        if self.disposed {
            return Err(CaptureError::Disposed(self.name.clone()));
        }
        if !self.open {
            debug!(device = %self.name, "Dummy device opened");
            self.open = true;
        }
        Ok(())
    }

    fn close(&mut self) -> CaptureResult<()> {
        if self.open {
            debug!(device = %self.name, "Dummy device closed");
            self.open = false;
        }
        Ok(())
    }

    fn dispose(&mut self) -> CaptureResult<()> {
        self.close()?;
        self.disposed = true;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn frame(&mut self) -> CaptureResult<Option<Frame>> {
        self.ensure_open()?;
        thread::sleep(self.pacing);
        Ok(Some(Frame::from_image(self.render())))
    }

    fn as_buffer_access(&mut self) -> Option<&mut dyn BufferAccess> {
        Some(self)
    }
}

impl BufferAccess for DummyDevice {
    fn frame_bytes(&mut self) -> CaptureResult<Vec<u8>> {
        self.ensure_open()?;
        thread::sleep(self.pacing);
        Ok(Frame::from_image(self.render()).to_rgb_bytes())
    }
}

/// Driver exposing a fixed number of synthetic devices
pub struct DummyDriver {
    count: usize,
}

impl DummyDriver {
    pub fn new(count: usize) -> Self {
        Self { count }
    }
}

impl Driver for DummyDriver {
    fn devices(&self) -> CaptureResult<Vec<Box<dyn Device>>> {
        Ok((0..self.count)
            .map(|i| Box::new(DummyDevice::new(i)) as Box<dyn Device>)
            .collect())
    }

    fn discovery(&self) -> Option<&dyn DiscoverySupport> {
        Some(self)
    }

    fn name(&self) -> &str {
        "dummy"
    }
}

impl DiscoverySupport for DummyDriver {
    fn scan_interval(&self) -> Duration {
        Duration::from_secs(10)
    }

    fn is_scan_possible(&self) -> bool {
        true
    }
}
