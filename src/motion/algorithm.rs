// SPDX-License-Identifier: GPL-3.0-only

//! Frame difference motion algorithm
//!
//! Pixels are scanned column by column (x outer, y inner). A pixel has moved
//! when the luma of its per-channel difference reaches the pixel threshold.
//! Reported points are picked greedily in scan order, so the left-most moved
//! pixels win when the point cap is reached.

use super::filter::{BlurFilter, FilterChain, FrameFilter, GrayFilter, luma};
use crate::backends::camera::{Frame, Point, Rect};
use crate::constants::motion::{
    DEFAULT_AREA_THRESHOLD, DEFAULT_AREA_THRESHOLD_MAX, DEFAULT_MAX_POINTS, DEFAULT_PIXEL_THRESHOLD,
    DEFAULT_POINT_RANGE,
};
use crate::errors::{CaptureError, CaptureResult};
use std::sync::Arc;

/// Motion detection strategy
pub trait MotionAlgorithm: Send {
    /// Prepare a raw frame for comparison
    fn filter(&self, frame: &Frame) -> Frame;

    /// Compare two filtered frames; true on motion
    fn detect(&mut self, previous: Option<&Frame>, current: &Frame) -> bool;

    /// Moved area of the last check, in percent
    fn area(&self) -> f64;

    /// Center of gravity of the last check, `None` before the first one
    fn cog(&self) -> Option<Point>;

    /// Points reported by the last check
    fn points(&self) -> &[Point];

    fn point_range(&self) -> u32;

    fn set_point_range(&mut self, range: u32);

    fn max_points(&self) -> usize;

    fn set_max_points(&mut self, max: usize);

    /// Regions ignored by the scan
    fn set_do_not_engage_zones(&mut self, zones: Vec<Rect>);
}

/// Blur, gray, then per-pixel thresholded difference
pub struct DefaultMotionAlgorithm {
    pixel_threshold: u8,
    area_threshold: f64,
    area_threshold_max: f64,
    point_range: u32,
    max_points: usize,
    zones: Vec<Rect>,
    area: f64,
    cog: Option<Point>,
    points: Vec<Point>,
    thresholds: Vec<u8>,
    filter: FilterChain,
}

impl Default for DefaultMotionAlgorithm {
    fn default() -> Self {
        Self {
            pixel_threshold: DEFAULT_PIXEL_THRESHOLD,
            area_threshold: DEFAULT_AREA_THRESHOLD,
            area_threshold_max: DEFAULT_AREA_THRESHOLD_MAX,
            point_range: DEFAULT_POINT_RANGE,
            max_points: DEFAULT_MAX_POINTS,
            zones: Vec::new(),
            area: 0.0,
            cog: None,
            points: Vec::new(),
            thresholds: Vec::new(),
            filter: FilterChain::new()
                .with(Arc::new(BlurFilter::default()))
                .with(Arc::new(GrayFilter)),
        }
    }
}

impl DefaultMotionAlgorithm {
    pub fn new(pixel_threshold: u8, area_threshold: f64) -> CaptureResult<Self> {
        let mut algorithm = Self::default();
        algorithm.set_pixel_threshold(pixel_threshold);
        algorithm.set_area_threshold(area_threshold)?;
        Ok(algorithm)
    }

    pub fn pixel_threshold(&self) -> u8 {
        self.pixel_threshold
    }

    pub fn set_pixel_threshold(&mut self, threshold: u8) {
        self.pixel_threshold = threshold;
    }

    pub fn area_threshold(&self) -> f64 {
        self.area_threshold
    }

    /// Minimum moved area, 0 - 100 percent
    pub fn set_area_threshold(&mut self, threshold: f64) -> CaptureResult<()> {
        self.area_threshold = check_area(threshold)?;
        Ok(())
    }

    pub fn max_area_threshold(&self) -> f64 {
        self.area_threshold_max
    }

    /// Maximum moved area, 0 - 100 percent
    pub fn set_max_area_threshold(&mut self, threshold: f64) -> CaptureResult<()> {
        self.area_threshold_max = check_area(threshold)?;
        Ok(())
    }

    pub fn do_not_engage_zones(&self) -> &[Rect] {
        &self.zones
    }

    /// Intensity deltas of the moved pixels of the last check, in scan order
    pub fn thresholds(&self) -> &[u8] {
        &self.thresholds
    }

    /// Replace the pre-filter
    pub fn set_filter(&mut self, filter: FilterChain) {
        self.filter = filter;
    }

    fn is_in_do_not_engage_zone(&self, x: u32, y: u32) -> bool {
        self.zones.iter().any(|zone| zone.contains(x, y))
    }
}

fn check_area(threshold: f64) -> CaptureResult<f64> {
    if !(0.0..=100.0).contains(&threshold) {
        return Err(CaptureError::InvalidArgument(format!(
            "Area fraction threshold must be within 0 and 100, got {}",
            threshold
        )));
    }
    Ok(threshold)
}

/// Intensity of the difference between two RGBA pixels
///
/// A translucent `current` pixel is blended over the `previous` one before
/// the luma is taken.
pub fn combine_pixels(current: [u8; 4], previous: [u8; 4]) -> u8 {
    let [r1, g1, b1, a1] = current;
    let [r2, g2, b2, a2] = previous;

    let mut r = r1.abs_diff(r2) as u32;
    let mut g = g1.abs_diff(g2) as u32;
    let mut b = b1.abs_diff(b2) as u32;

    if a1 != u8::MAX {
        let a1 = a1 as u32;
        let a3 = (255 - a1) * a2 as u32 / 255;
        r = ((r * a1 + r2 as u32 * a3) / 255).min(255);
        g = ((g * a1 + g2 as u32 * a3) / 255).min(255);
        b = ((b * a1 + b2 as u32 * a3) / 255).min(255);
    }

    luma(r as u8, g as u8, b as u8)
}

impl MotionAlgorithm for DefaultMotionAlgorithm {
    fn filter(&self, frame: &Frame) -> Frame {
        self.filter.transform(frame)
    }

    fn detect(&mut self, previous: Option<&Frame>, current: &Frame) -> bool {
        self.points.clear();
        self.thresholds.clear();

        let size = current.size();
        let center = size.center();

        let Some(previous) = previous.filter(|p| p.size() == size) else {
            self.area = 0.0;
            self.cog = Some(center);
            return false;
        };

        let mut moved: u64 = 0;
        let mut cog_x: u64 = 0;
        let mut cog_y: u64 = 0;

        for x in 0..size.width {
            for y in 0..size.height {
                if self.is_in_do_not_engage_zone(x, y) {
                    continue;
                }

                let delta = combine_pixels(current.pixel(x, y), previous.pixel(x, y));
                if delta < self.pixel_threshold {
                    continue;
                }

                let candidate = Point::new(x, y);
                let keep = self.points.len() < self.max_points
                    && self
                        .points
                        .iter()
                        .all(|kept| kept.distance(&candidate) > self.point_range as f64);
                if keep {
                    self.points.push(candidate);
                }

                cog_x += x as u64;
                cog_y += y as u64;
                moved += 1;
                self.thresholds.push(delta);
            }
        }

        let total = size.area();
        self.area = if total == 0 {
            0.0
        } else {
            moved as f64 * 100.0 / total as f64
        };

        if moved > 0 && self.area >= self.area_threshold && self.area <= self.area_threshold_max {
            self.cog = Some(Point::new((cog_x / moved) as u32, (cog_y / moved) as u32));
            true
        } else {
            self.cog = Some(center);
            false
        }
    }

    fn area(&self) -> f64 {
        self.area
    }

    fn cog(&self) -> Option<Point> {
        self.cog
    }

    fn points(&self) -> &[Point] {
        &self.points
    }

    fn point_range(&self) -> u32 {
        self.point_range
    }

    fn set_point_range(&mut self, range: u32) {
        self.point_range = range;
    }

    fn max_points(&self) -> usize {
        self.max_points
    }

    fn set_max_points(&mut self, max: usize) {
        self.max_points = max;
    }

    fn set_do_not_engage_zones(&mut self, zones: Vec<Rect>) {
        self.zones = zones;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::camera::Size;
    use image::{Rgba, RgbaImage};

    const BLACK: [u8; 4] = [0, 0, 0, 255];
    const WHITE: [u8; 4] = [255, 255, 255, 255];

    fn with_pixels(size: Size, pixels: &[(u32, u32)]) -> Frame {
        let mut image = RgbaImage::from_pixel(size.width, size.height, Rgba(BLACK));
        for &(x, y) in pixels {
            image.put_pixel(x, y, Rgba(WHITE));
        }
        Frame::from_image(image)
    }

    #[test]
    fn test_combine_pixels() {
        assert_eq!(combine_pixels(WHITE, WHITE), 0);
        assert_eq!(combine_pixels(WHITE, BLACK), 255);
        assert_eq!(combine_pixels([10, 10, 10, 255], [40, 40, 40, 255]), 30);
        // Fully transparent current pixel shows the previous one
        assert_eq!(combine_pixels([0, 0, 0, 0], WHITE), 255);
    }

    #[test]
    fn test_no_previous_frame() {
        let mut algorithm = DefaultMotionAlgorithm::default();
        let current = Frame::solid(Size::new(40, 20), WHITE);
        assert!(!algorithm.detect(None, &current));
        assert_eq!(algorithm.area(), 0.0);
        assert_eq!(algorithm.cog(), Some(Point::new(20, 10)));
    }

    #[test]
    fn test_size_change_is_no_motion() {
        let mut algorithm = DefaultMotionAlgorithm::default();
        let previous = Frame::solid(Size::new(10, 10), BLACK);
        let current = Frame::solid(Size::new(20, 20), WHITE);
        assert!(!algorithm.detect(Some(&previous), &current));
        assert_eq!(algorithm.area(), 0.0);
    }

    #[test]
    fn test_full_change_detected() {
        let mut algorithm = DefaultMotionAlgorithm::default();
        let size = Size::new(20, 10);
        let previous = Frame::solid(size, BLACK);
        let current = Frame::solid(size, WHITE);
        assert!(algorithm.detect(Some(&previous), &current));
        assert_eq!(algorithm.area(), 100.0);
        // mean of 0..20 and 0..10 in integer arithmetic
        assert_eq!(algorithm.cog(), Some(Point::new(9, 4)));
        assert_eq!(algorithm.thresholds().len(), 200);
    }

    #[test]
    fn test_zero_threshold_without_change_does_not_divide_by_zero() {
        let mut algorithm = DefaultMotionAlgorithm::default();
        algorithm.set_pixel_threshold(1);
        algorithm.set_area_threshold(0.0).unwrap();
        let frame = Frame::solid(Size::new(8, 8), BLACK);
        assert!(!algorithm.detect(Some(&frame), &frame));
        assert_eq!(algorithm.area(), 0.0);
        assert_eq!(algorithm.cog(), Some(Point::new(4, 4)));
    }

    #[test]
    fn test_do_not_engage_zone_excluded() {
        let mut algorithm = DefaultMotionAlgorithm::default();
        let size = Size::new(100, 100);
        let changed: Vec<(u32, u32)> = (10..30)
            .flat_map(|x| (10..30).map(move |y| (x, y)))
            .collect();
        let previous = with_pixels(size, &[]);
        let current = with_pixels(size, &changed);

        assert!(algorithm.detect(Some(&previous), &current));

        algorithm.set_do_not_engage_zones(vec![Rect::new(10, 10, 20, 20)]);
        assert!(!algorithm.detect(Some(&previous), &current));
        assert_eq!(algorithm.area(), 0.0);
        assert!(algorithm.points().is_empty());
    }

    #[test]
    fn test_distant_single_pixels_are_two_points() {
        let mut algorithm = DefaultMotionAlgorithm::default();
        let size = Size::new(200, 200);
        let previous = with_pixels(size, &[]);
        let current = with_pixels(size, &[(10, 10), (150, 150)]);

        algorithm.detect(Some(&previous), &current);
        assert_eq!(algorithm.points(), &[Point::new(10, 10), Point::new(150, 150)]);
    }

    #[test]
    fn test_close_pixels_collapse_to_one_point() {
        let mut algorithm = DefaultMotionAlgorithm::default();
        let size = Size::new(100, 100);
        // 10 x 15 block, every pair well within the point range
        let block: Vec<(u32, u32)> = (20..30)
            .flat_map(|x| (40..55).map(move |y| (x, y)))
            .collect();
        assert_eq!(block.len(), 150);

        let previous = with_pixels(size, &[]);
        let current = with_pixels(size, &block);

        assert!(algorithm.detect(Some(&previous), &current));
        assert_eq!(algorithm.points(), &[Point::new(20, 40)]);
    }

    #[test]
    fn test_max_points_cap() {
        let mut algorithm = DefaultMotionAlgorithm::default();
        algorithm.set_point_range(0);
        algorithm.set_max_points(3);
        let size = Size::new(10, 10);
        let previous = with_pixels(size, &[]);
        let current = with_pixels(size, &[(0, 0), (0, 5), (5, 0), (5, 5)]);

        algorithm.detect(Some(&previous), &current);
        // column-major: x = 0 column first
        assert_eq!(
            algorithm.points(),
            &[Point::new(0, 0), Point::new(0, 5), Point::new(5, 0)]
        );
    }

    #[test]
    fn test_area_threshold_validation() {
        let mut algorithm = DefaultMotionAlgorithm::default();
        assert!(algorithm.set_area_threshold(-0.1).is_err());
        assert!(algorithm.set_area_threshold(100.1).is_err());
        assert!(algorithm.set_max_area_threshold(f64::NAN).is_err());
        assert!(algorithm.set_area_threshold(50.0).is_ok());
        assert!(DefaultMotionAlgorithm::new(25, 200.0).is_err());
    }

    #[test]
    fn test_area_above_max_is_no_motion() {
        let mut algorithm = DefaultMotionAlgorithm::default();
        algorithm.set_max_area_threshold(50.0).unwrap();
        let size = Size::new(10, 10);
        assert!(!algorithm.detect(Some(&Frame::solid(size, BLACK)), &Frame::solid(size, WHITE)));
        assert_eq!(algorithm.area(), 100.0);
    }
}
