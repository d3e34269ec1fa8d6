// SPDX-License-Identifier: GPL-3.0-only

//! Error types for webcam capture

use crate::backends::camera::Size;
use thiserror::Error;

/// Result type alias using CaptureError
pub type CaptureResult<T> = Result<T, CaptureError>;

/// Error returned by user supplied listener callbacks
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for listener callbacks
pub type ListenerResult = Result<(), ListenerError>;

/// Main error type
#[derive(Debug, Error)]
pub enum CaptureError {
    /// Native device operation failed
    #[error("Device error: {0}")]
    Device(String),

    /// Cross-process lock already held or lock file unusable
    #[error("Lock error: {0}")]
    Lock(String),

    /// Discovery or buffer wait exceeded its bound
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Submission after the task processor has been shut down
    #[error("Rejected: {0}")]
    Rejected(String),

    /// Blocking operation was abandoned before it completed
    #[error("Interrupted: {0}")]
    Interrupted(String),

    /// Camera has been disposed and cannot be used anymore
    #[error("Camera {0} has been already disposed")]
    Disposed(String),

    /// Operation not allowed in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Argument out of its allowed range
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Requested view size is neither predefined nor custom
    #[error("Incorrect dimension [{requested}] possible ones are {}", format_choices(.choices))]
    InvalidResolution { requested: Size, choices: Vec<Size> },

    /// Device lacks an optional capability
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Configuration could not be loaded or is invalid
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CaptureError {
    /// True for errors that represent an abandoned wait rather than a failure
    pub fn is_interrupted(&self) -> bool {
        matches!(self, CaptureError::Interrupted(_))
    }
}

fn format_choices(choices: &[Size]) -> String {
    choices
        .iter()
        .map(|size| format!("[{}]", size))
        .collect::<Vec<_>>()
        .join(" ")
}
