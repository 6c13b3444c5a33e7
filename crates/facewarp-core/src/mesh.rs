//! MediaPipe Face Mesh landmark estimator via ONNX Runtime.
//!
//! Takes a square crop around a detected face, resized to 192×192 with
//! values mapped to [-1, 1], and returns 468 keypoints plus a face-presence
//! logit. Keypoints come back in crop pixels and are mapped to normalized
//! frame coordinates here.

use crate::detector::DetectorError;
use crate::preprocess::{self, Border, SampleGrid};
use crate::schema::NUM_LANDMARKS;
use crate::types::{BoundingBox, Keypoint, LandmarkSet};
use image::RgbImage;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

const MESH_INPUT_SIZE: usize = 192;
/// The crop is this much larger than the detector box so the whole face fits.
const MESH_CROP_SCALE: f32 = 1.5;
/// Each keypoint is (x, y, z); z is relative depth and not used.
const MESH_VALUES_PER_POINT: usize = 3;

/// Square region of the frame fed to the mesh model.
#[derive(Debug, Clone, Copy, PartialEq)]
struct MeshCrop {
    x0: f32,
    y0: f32,
    side: f32,
}

impl MeshCrop {
    fn around(face: &BoundingBox) -> Self {
        let (cx, cy) = face.center();
        let side = face.width.max(face.height) * MESH_CROP_SCALE;
        Self {
            x0: cx - side / 2.0,
            y0: cy - side / 2.0,
            side,
        }
    }

    fn grid(&self) -> SampleGrid {
        SampleGrid {
            origin_x: self.x0,
            origin_y: self.y0,
            step: self.side / MESH_INPUT_SIZE as f32,
        }
    }

    /// Map a point in model input pixels to normalized frame coordinates.
    fn to_frame(&self, x: f32, y: f32, width: u32, height: u32) -> Keypoint {
        let scale = self.side / MESH_INPUT_SIZE as f32;
        Keypoint::new(
            (self.x0 + x * scale) / width as f32,
            (self.y0 + y * scale) / height as f32,
        )
    }
}

/// Face Mesh landmark model.
pub struct FaceMesh {
    session: Session,
}

impl FaceMesh {
    /// Load the face landmark ONNX model from the given path.
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded face mesh model"
        );

        if session.outputs().len() < 2 {
            return Err(DetectorError::InferenceFailed(format!(
                "face mesh model requires 2 outputs (landmarks, face flag), got {}",
                session.outputs().len()
            )));
        }

        Ok(Self { session })
    }

    /// Estimate landmarks for the face inside `face`.
    pub fn estimate(
        &mut self,
        image: &RgbImage,
        face: &BoundingBox,
    ) -> Result<LandmarkSet, DetectorError> {
        let crop = MeshCrop::around(face);
        let input = preprocess::rgb_to_nchw(
            image,
            MESH_INPUT_SIZE,
            crop.grid(),
            Border::Replicate,
            |v| v / 127.5 - 1.0,
        );

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, coords) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("mesh landmarks: {e}")))?;
        let (_, flag) = outputs[1]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("mesh face flag: {e}")))?;

        let logit = flag.first().copied().ok_or_else(|| {
            DetectorError::InferenceFailed("mesh face flag tensor is empty".to_string())
        })?;

        decode_landmarks(coords, sigmoid(logit), &crop, image.width(), image.height())
    }
}

fn decode_landmarks(
    coords: &[f32],
    confidence: f32,
    crop: &MeshCrop,
    width: u32,
    height: u32,
) -> Result<LandmarkSet, DetectorError> {
    let expected = NUM_LANDMARKS * MESH_VALUES_PER_POINT;
    if coords.len() < expected {
        return Err(DetectorError::InferenceFailed(format!(
            "expected {expected} landmark values, got {}",
            coords.len()
        )));
    }

    let points = coords[..expected]
        .chunks_exact(MESH_VALUES_PER_POINT)
        .map(|p| crop.to_frame(p[0], p[1], width, height))
        .collect();

    Ok(LandmarkSet::new(points, confidence))
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}
