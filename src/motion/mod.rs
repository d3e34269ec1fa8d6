// SPDX-License-Identifier: GPL-3.0-only

//! Motion detection on top of the capture core

pub mod algorithm;
pub mod detector;
pub mod event;
pub mod filter;

pub use algorithm::{DefaultMotionAlgorithm, MotionAlgorithm, combine_pixels};
pub use detector::MotionDetector;
pub use event::{MotionEvent, MotionListener};
pub use filter::{BlurFilter, FilterChain, FrameFilter, GrayFilter};
