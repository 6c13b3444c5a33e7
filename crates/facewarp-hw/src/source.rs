//! Pull-based frame source over a capture device.
//!
//! [`FrameSource`] owns its device for the lifetime of the stream and drops
//! it exactly once: when the frame cap is reached, when cancellation is
//! requested, after the first read failure, or when the source itself is
//! dropped early.

use crate::camera::{Camera, CameraError};
use crate::control::CancelToken;
use crate::frame::Frame;
use crate::preview::{PreviewSink, SinkControl};

/// Window name used for raw frame previews.
pub const PREVIEW_WINDOW: &str = "webcam";

/// Anything that can hand out frames one at a time.
///
/// Dropping the device releases it.
pub trait CaptureDevice {
    fn read_frame(&mut self) -> Result<Frame, CameraError>;
}

/// Per-stream options.
#[derive(Debug, Clone, Default)]
pub struct SourceOptions {
    /// Stop after this many frames. `None` streams until cancelled.
    pub max_frames: Option<usize>,
    pub cancel: CancelToken,
}

/// Lazy sequence of frames. Each `next()` performs exactly one device read.
pub struct FrameSource<D: CaptureDevice> {
    device: Option<D>,
    options: SourceOptions,
    preview: Option<Box<dyn PreviewSink>>,
    /// Set by a preview quit. Local to this source so downstream stages
    /// still process the frame that was on screen.
    quit_requested: bool,
    produced: usize,
}

impl FrameSource<Camera> {
    /// Open the V4L2 device at `device_path` and wrap it as a frame stream.
    pub fn open(device_path: &str, options: SourceOptions) -> Result<Self, CameraError> {
        let camera = Camera::open(device_path)?;
        Ok(Self::new(camera, options))
    }
}

impl<D: CaptureDevice> FrameSource<D> {
    pub fn new(device: D, options: SourceOptions) -> Self {
        Self {
            device: Some(device),
            options,
            preview: None,
            quit_requested: false,
            produced: 0,
        }
    }

    /// Show every produced frame on `sink`. A quit from the sink ends the stream.
    pub fn with_preview(mut self, sink: Box<dyn PreviewSink>) -> Self {
        self.preview = Some(sink);
        self
    }

    /// Number of frames handed out so far.
    pub fn produced(&self) -> usize {
        self.produced
    }

    /// True once the device has been released; the stream yields nothing more.
    pub fn is_finished(&self) -> bool {
        self.device.is_none()
    }

    fn release(&mut self, reason: &'static str) {
        if let Some(device) = self.device.take() {
            tracing::debug!(reason, produced = self.produced, "frame source finished");
            if let Some(sink) = self.preview.as_mut() {
                sink.close();
            }
            drop(device);
        }
    }
}

impl<D: CaptureDevice> Iterator for FrameSource<D> {
    type Item = Result<Frame, CameraError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.device.is_none() {
            return None;
        }
        if self.options.cancel.is_cancelled() {
            self.release("cancelled");
            return None;
        }
        if self.quit_requested {
            self.release("preview quit");
            return None;
        }
        if self.options.max_frames.is_some_and(|max| self.produced >= max) {
            self.release("frame cap reached");
            return None;
        }

        let result = self.device.as_mut()?.read_frame();
        match result {
            Ok(frame) => {
                self.produced += 1;
                if let Some(sink) = self.preview.as_mut() {
                    if sink.show(PREVIEW_WINDOW, &frame.image) == SinkControl::Quit {
                        self.quit_requested = true;
                    }
                }
                // Release right after the last frame instead of on the next pull.
                if self.options.max_frames.is_some_and(|max| self.produced >= max) {
                    self.release("frame cap reached");
                }
                Some(Ok(frame))
            }
            Err(e) => {
                tracing::error!(error = %e, produced = self.produced, "frame capture failed");
                self.release("capture failed");
                Some(Err(e))
            }
        }
    }
}

impl<D: CaptureDevice> std::iter::FusedIterator for FrameSource<D> {}

impl<D: CaptureDevice> Drop for FrameSource<D> {
    fn drop(&mut self) {
        self.release("dropped");
    }
}
