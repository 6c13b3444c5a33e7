//! Streaming pipeline stages: frames → landmarks → aligned faces.
//!
//! Each stage is an iterator that pulls from the one before it, exactly one
//! upstream item per step. When a stage finishes, for whatever reason, it
//! drops its upstream, which releases the capture device.

use crate::alignment::{self, AlignOptions, AlignedFace, AlignmentRecord};
use crate::landmarks::LandmarkDetector;
use crate::overlay;
use crate::types::FaceRecord;
use facewarp_hw::{CameraError, CancelToken, Frame, PreviewSink, SinkControl};
use std::sync::Arc;

/// Preview window for frames annotated with detections and landmarks.
pub const LANDMARKS_WINDOW: &str = "landmarks";
/// Preview window for aligned crops.
pub const ALIGNED_WINDOW: &str = "aligned";

/// Runs a [`LandmarkDetector`] over a frame stream.
///
/// Yields `(frame, record)` for every frame; frames without faces carry an
/// empty record. A detector failure on one frame is logged and treated as
/// "no face". A camera error is passed through once and ends the stream.
pub struct LandmarkStream<S, D> {
    frames: Option<S>,
    detector: D,
    preview: Option<Box<dyn PreviewSink>>,
}

impl<S, D> LandmarkStream<S, D>
where
    S: Iterator<Item = Result<Frame, CameraError>>,
    D: LandmarkDetector,
{
    pub fn new(frames: S, detector: D) -> Self {
        Self {
            frames: Some(frames),
            detector,
            preview: None,
        }
    }

    /// Show annotated frames on `sink`. A quit from the sink ends the stream
    /// before the frame being shown is yielded.
    pub fn with_preview(mut self, sink: Box<dyn PreviewSink>) -> Self {
        self.preview = Some(sink);
        self
    }

    fn finish(&mut self) {
        if self.frames.take().is_some() {
            if let Some(sink) = self.preview.as_mut() {
                sink.close();
            }
        }
    }
}

impl<S, D> Iterator for LandmarkStream<S, D>
where
    S: Iterator<Item = Result<Frame, CameraError>>,
    D: LandmarkDetector,
{
    type Item = Result<(Frame, FaceRecord), CameraError>;

    fn next(&mut self) -> Option<Self::Item> {
        let frame = match self.frames.as_mut()?.next() {
            None => {
                self.finish();
                return None;
            }
            Some(Err(e)) => {
                self.finish();
                return Some(Err(e));
            }
            Some(Ok(frame)) => frame,
        };

        let record = match self.detector.detect(&frame.image) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(seq = frame.sequence, error = %e, "landmark detection failed; treating frame as faceless");
                FaceRecord::empty()
            }
        };
        tracing::debug!(
            seq = frame.sequence,
            detections = record.detections.len(),
            faces = record.landmarks.len(),
            "landmarks detected"
        );

        if let Some(sink) = self.preview.as_mut() {
            let mut annotated = frame.image.clone();
            overlay::draw_face_record(&mut annotated, &record);
            if sink.show(LANDMARKS_WINDOW, &annotated) == SinkControl::Quit {
                self.finish();
                return None;
            }
        }

        Some(Ok((frame, record)))
    }
}

impl<S, D> Drop for LandmarkStream<S, D> {
    fn drop(&mut self) {
        if self.frames.take().is_some() {
            if let Some(sink) = self.preview.as_mut() {
                sink.close();
            }
        }
    }
}

/// Options for the [`AlignedFaces`] stage.
#[derive(Debug, Clone, Default)]
pub struct AlignStreamOptions {
    pub align: AlignOptions,
    /// Stop after this many aligned faces. `None` runs until upstream ends.
    pub max_items: Option<usize>,
    pub cancel: CancelToken,
}

/// The frame currently being aligned, one landmark set at a time.
struct PendingFrame {
    frame: Arc<Frame>,
    record: FaceRecord,
    next_face: usize,
}

/// Aligns every face of every frame coming out of a [`LandmarkStream`].
///
/// Faces that cannot be aligned are logged and skipped; frames without faces
/// are skipped silently. Camera errors end the stream after being yielded once.
pub struct AlignedFaces<S> {
    upstream: Option<S>,
    options: AlignStreamOptions,
    preview: Option<Box<dyn PreviewSink>>,
    pending: Option<PendingFrame>,
    produced: usize,
    skipped: usize,
}

impl<S> AlignedFaces<S>
where
    S: Iterator<Item = Result<(Frame, FaceRecord), CameraError>>,
{
    pub fn new(upstream: S, options: AlignStreamOptions) -> Self {
        Self {
            upstream: Some(upstream),
            options,
            preview: None,
            pending: None,
            produced: 0,
            skipped: 0,
        }
    }

    /// Show each aligned crop, with reference markers, on `sink`. A quit from
    /// the sink ends the stream before the crop being shown is yielded.
    pub fn with_preview(mut self, sink: Box<dyn PreviewSink>) -> Self {
        self.preview = Some(sink);
        self
    }

    /// Aligned faces yielded so far.
    pub fn produced(&self) -> usize {
        self.produced
    }

    /// Faces dropped because their anchors could not be aligned.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    fn finish(&mut self, reason: &'static str) {
        if self.upstream.take().is_some() {
            self.pending = None;
            tracing::debug!(
                reason,
                produced = self.produced,
                skipped = self.skipped,
                "aligned face stream finished"
            );
            if let Some(sink) = self.preview.as_mut() {
                sink.close();
            }
        }
    }

    fn cap_reached(&self) -> bool {
        self.options.max_items.is_some_and(|max| self.produced >= max)
    }

    /// Align the next face of the pending frame, if any remain.
    fn next_pending(&mut self) -> Option<(AlignedFace, AlignmentRecord)> {
        while let Some(pending) = self.pending.as_mut() {
            let Some(landmarks) = pending.record.landmarks.get(pending.next_face) else {
                self.pending = None;
                break;
            };
            pending.next_face += 1;

            match alignment::align_landmarks(&pending.frame, landmarks, self.options.align) {
                Ok(item) => return Some(item),
                Err(e) => {
                    self.skipped += 1;
                    tracing::warn!(
                        seq = pending.frame.sequence,
                        face = pending.next_face - 1,
                        error = %e,
                        "skipping face"
                    );
                }
            }
        }
        None
    }
}

impl<S> Iterator for AlignedFaces<S>
where
    S: Iterator<Item = Result<(Frame, FaceRecord), CameraError>>,
{
    type Item = Result<(AlignedFace, AlignmentRecord), CameraError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.upstream.as_ref()?;
            if self.options.cancel.is_cancelled() {
                self.finish("cancelled");
                return None;
            }
            if self.cap_reached() {
                self.finish("item cap reached");
                return None;
            }

            if let Some((face, record)) = self.next_pending() {
                if let Some(sink) = self.preview.as_mut() {
                    let mut marked = face.image.clone();
                    overlay::draw_reference_markers(&mut marked, self.options.align.output_size);
                    if sink.show(ALIGNED_WINDOW, &marked) == SinkControl::Quit {
                        self.finish("preview quit");
                        return None;
                    }
                }
                self.produced += 1;
                if self.cap_reached() {
                    self.finish("item cap reached");
                }
                return Some(Ok((face, record)));
            }

            match self.upstream.as_mut()?.next() {
                None => {
                    self.finish("upstream exhausted");
                    return None;
                }
                Some(Err(e)) => {
                    self.finish("camera error");
                    return Some(Err(e));
                }
                Some(Ok((frame, record))) => {
                    if !record.has_faces() {
                        tracing::debug!(seq = frame.sequence, "no face in frame");
                        continue;
                    }
                    self.pending = Some(PendingFrame {
                        frame: Arc::new(frame),
                        record,
                        next_face: 0,
                    });
                }
            }
        }
    }
}

impl<S> Drop for AlignedFaces<S> {
    fn drop(&mut self) {
        if self.upstream.take().is_some() {
            if let Some(sink) = self.preview.as_mut() {
                sink.close();
            }
        }
    }
}
