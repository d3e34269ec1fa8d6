// SPDX-License-Identifier: GPL-3.0-only
// Shared types for camera capability abstraction

//! Shared types for camera devices

use crate::errors::{CaptureError, CaptureResult};
use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

/// Resolution in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Number of pixels covered by this size
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Centre point, used as the default centre of motion gravity
    pub fn center(&self) -> Point {
        Point::new(self.width / 2, self.height / 2)
    }
}

impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Well-known resolutions
pub mod resolution {
    use super::Size;

    pub const QQVGA: Size = Size::new(176, 144);
    pub const QVGA: Size = Size::new(320, 240);
    pub const VGA: Size = Size::new(640, 480);
    pub const HD: Size = Size::new(1280, 720);
}

/// Pixel coordinate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: u32,
    pub y: u32,
}

impl Point {
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance between two points
    pub fn distance(&self, other: &Point) -> f64 {
        let dx = self.x as f64 - other.x as f64;
        let dy = self.y as f64 - other.y as f64;
        (dx * dx + dy * dy).sqrt()
    }
}

impl std::fmt::Display for Point {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Axis aligned rectangle, right and bottom edges exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x
            && y >= self.y
            && (x as u64) < self.x as u64 + self.width as u64
            && (y as u64) < self.y as u64 + self.height as u64
    }
}

/// A single RGBA frame
///
/// The pixel buffer is reference counted, so cloning a frame is cheap and the
/// same image can be handed to several listeners without copying.
#[derive(Debug, Clone)]
pub struct Frame {
    image: Arc<RgbaImage>,
    /// When the frame was produced by the device
    pub captured_at: Instant,
}

impl Frame {
    /// Wrap an RGBA image
    pub fn from_image(image: RgbaImage) -> Self {
        Self {
            image: Arc::new(image),
            captured_at: Instant::now(),
        }
    }

    /// Build a frame from tightly packed RGBA bytes
    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> CaptureResult<Self> {
        let expected = width as usize * height as usize * 4;
        let actual = data.len();
        RgbaImage::from_raw(width, height, data)
            .map(Self::from_image)
            .ok_or_else(|| {
                CaptureError::InvalidArgument(format!(
                    "RGBA buffer of {} bytes does not match {}x{} ({} bytes)",
                    actual, width, height, expected
                ))
            })
    }

    /// Frame filled with a single colour
    pub fn solid(size: Size, rgba: [u8; 4]) -> Self {
        Self::from_image(RgbaImage::from_pixel(size.width, size.height, Rgba(rgba)))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn size(&self) -> Size {
        Size::new(self.width(), self.height())
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    /// Pixel as `[r, g, b, a]`
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        self.image.get_pixel(x, y).0
    }

    /// Packed RGB bytes, 3 bytes per pixel, alpha dropped
    pub fn to_rgb_bytes(&self) -> Vec<u8> {
        self.image
            .pixels()
            .flat_map(|p| [p.0[0], p.0[1], p.0[2]])
            .collect()
    }

    /// True if both frames share the same pixel buffer
    pub fn ptr_eq(&self, other: &Frame) -> bool {
        Arc::ptr_eq(&self.image, &other.image)
    }
}
