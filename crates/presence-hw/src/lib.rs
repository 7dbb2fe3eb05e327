//! presence-hw — Camera capture and frame handling.
//!
//! Provides V4L2-based camera access, the grayscale [`Frame`] type with
//! its geometric operations, and [`FrameSource`], the background
//! capture thread that keeps the newest frame available without ever
//! blocking the consumer.

pub mod camera;
pub mod frame;
pub mod source;

pub use camera::{Camera, CameraError};
pub use frame::Frame;
pub use source::{FrameFeed, FrameSource};
