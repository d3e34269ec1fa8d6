// SPDX-License-Identifier: MPL-2.0

//! Backend abstraction layer for camera capture
//!
//! Native capture bindings are provided by the embedding application. This
//! module defines the seam they plug into and ships two drivers that need no
//! hardware:
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │               Capture Layer                  │
//! └────────────────────┬────────────────────────┘
//!                      │
//! ┌────────────────────┴────────────────────────┐
//! │              Backend Layer                   │
//! │  ┌─────────────┐    ┌──────────────────┐   │
//! │  │   Dummy     │    │    Composite     │   │
//! │  │  (frames)   │    │ (many drivers)   │   │
//! │  └─────────────┘    └──────────────────┘   │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`camera`]: Device and driver traits, value types and capture loops

pub mod camera;
