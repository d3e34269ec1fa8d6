// SPDX-License-Identifier: GPL-3.0-only

use crate::backends::camera::{Frame, Point};
use crate::capture::Camera;
use crate::errors::ListenerResult;

/// Positive motion check
#[derive(Clone)]
pub struct MotionEvent {
    pub camera: Camera,
    /// Unfiltered frame of the previous check, if any
    pub previous: Option<Frame>,
    /// Unfiltered frame in which motion was found
    pub current: Frame,
    /// Moved area in percent of the frame
    pub area: f64,
    /// Center of gravity of the moved pixels
    pub cog: Point,
    pub points: Vec<Point>,
}

impl std::fmt::Debug for MotionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MotionEvent")
            .field("camera", &self.camera.name())
            .field("area", &self.area)
            .field("cog", &self.cog)
            .field("points", &self.points.len())
            .finish()
    }
}

pub trait MotionListener: Send + Sync {
    /// Called on the detector thread
    fn on_motion_detected(&self, event: &MotionEvent) -> ListenerResult;
}
