//! facewarp-hw — Frame acquisition for the alignment pipeline.
//!
//! Provides V4L2-based camera access, a pull-based [`FrameSource`] with
//! scoped device release, cooperative cancellation and preview sinks.

pub mod camera;
pub mod control;
pub mod frame;
pub mod preview;
pub mod source;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use control::CancelToken;
pub use frame::Frame;
pub use preview::{DirectorySink, NullSink, PreviewSink, SinkControl};
pub use source::{CaptureDevice, FrameSource, SourceOptions};
