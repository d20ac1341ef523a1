//! moodcam-hw: Hardware abstraction for camera capture.
//!
//! Provides V4L2-based camera access, pixel format conversion, and a
//! threaded live frame source for the session controller to poll.

pub mod camera;
pub mod frame;
pub mod source;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use frame::Frame;
pub use source::{CameraSettings, CameraSource, CaptureSource, CaptureStatus};
