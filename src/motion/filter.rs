// SPDX-License-Identifier: GPL-3.0-only

//! Frame transforms applied after every raw fetch

use crate::backends::camera::Frame;
use crate::constants::motion::DEFAULT_BLUR_SIGMA;
use image::{Rgba, RgbaImage, imageops};
use std::sync::Arc;

/// Pure frame-to-frame transform
pub trait FrameFilter: Send + Sync {
    fn transform(&self, frame: &Frame) -> Frame;
}

/// Gaussian blur
#[derive(Debug, Clone, Copy)]
pub struct BlurFilter {
    sigma: f32,
}

impl BlurFilter {
    pub fn new(sigma: f32) -> Self {
        Self { sigma }
    }

    pub fn sigma(&self) -> f32 {
        self.sigma
    }
}

impl Default for BlurFilter {
    fn default() -> Self {
        Self::new(DEFAULT_BLUR_SIGMA)
    }
}

impl FrameFilter for BlurFilter {
    fn transform(&self, frame: &Frame) -> Frame {
        if self.sigma <= 0.0 {
            return frame.clone();
        }
        Frame::from_image(imageops::blur(frame.image(), self.sigma))
    }
}

/// Luma conversion, alpha kept
#[derive(Debug, Clone, Copy, Default)]
pub struct GrayFilter;

/// NTSC weighted luma in 8-bit fixed point
pub fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((r as u32 * 77 + g as u32 * 151 + b as u32 * 28) >> 8) as u8
}

impl FrameFilter for GrayFilter {
    fn transform(&self, frame: &Frame) -> Frame {
        let source = frame.image();
        let gray = RgbaImage::from_fn(source.width(), source.height(), |x, y| {
            let [r, g, b, a] = source.get_pixel(x, y).0;
            let l = luma(r, g, b);
            Rgba([l, l, l, a])
        });
        Frame::from_image(gray)
    }
}

/// Filters applied in insertion order
#[derive(Clone, Default)]
pub struct FilterChain {
    filters: Vec<Arc<dyn FrameFilter>>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, filter: Arc<dyn FrameFilter>) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn push(&mut self, filter: Arc<dyn FrameFilter>) {
        self.filters.push(filter);
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl FrameFilter for FilterChain {
    fn transform(&self, frame: &Frame) -> Frame {
        self.filters
            .iter()
            .fold(frame.clone(), |current, filter| filter.transform(&current))
    }
}
