//! Landmark detection: frame in, [`FaceRecord`] out.

use crate::detector::{self, DetectorError, FaceDetector};
use crate::mesh::FaceMesh;
use crate::types::{BoundingBox, FaceRecord, LandmarkSet};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// SCRFD detection model file name inside the model directory.
pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";
/// Face mesh landmark model file name inside the model directory.
pub const MESH_MODEL_FILE: &str = "face_landmark.onnx";

/// Anything that turns a frame into per-face landmark sets.
///
/// Finding no face is a successful, empty [`FaceRecord`].
pub trait LandmarkDetector {
    fn detect(&mut self, image: &RgbImage) -> Result<FaceRecord, DetectorError>;
}

/// Tuning for [`MeshLandmarkDetector`]. Defaults favour speed and recall.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorOptions {
    pub min_detection_confidence: f32,
    /// Minimum face-presence score from the mesh model to keep a landmark set.
    pub min_tracking_confidence: f32,
    /// Landmark sets are estimated for at most this many faces per frame.
    pub max_faces: usize,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self {
            min_detection_confidence: detector::DEFAULT_CONFIDENCE_THRESHOLD,
            min_tracking_confidence: 0.1,
            max_faces: 1,
        }
    }
}

/// SCRFD face boxes feeding a Face Mesh landmark estimator.
pub struct MeshLandmarkDetector {
    detector: FaceDetector,
    mesh: FaceMesh,
    options: DetectorOptions,
}

impl MeshLandmarkDetector {
    pub fn new(detector: FaceDetector, mesh: FaceMesh, options: DetectorOptions) -> Self {
        Self {
            detector: detector.with_confidence_threshold(options.min_detection_confidence),
            mesh,
            options,
        }
    }

    /// Load both models from `model_dir` using their standard file names.
    pub fn load(model_dir: &Path, options: DetectorOptions) -> Result<Self, DetectorError> {
        let detector_path = model_dir.join(DETECTOR_MODEL_FILE);
        let mesh_path = model_dir.join(MESH_MODEL_FILE);
        let detector = FaceDetector::load(&detector_path.to_string_lossy())?;
        let mesh = FaceMesh::load(&mesh_path.to_string_lossy())?;
        tracing::info!(model_dir = %model_dir.display(), ?options, "landmark detector ready");
        Ok(Self::new(detector, mesh, options))
    }
}

impl LandmarkDetector for MeshLandmarkDetector {
    fn detect(&mut self, image: &RgbImage) -> Result<FaceRecord, DetectorError> {
        let detections = self.detector.detect(image)?;
        let mesh = &mut self.mesh;
        let landmarks = estimate_faces(&detections, &self.options, |face| mesh.estimate(image, face));

        Ok(FaceRecord {
            detections,
            landmarks,
        })
    }
}

/// Run `estimate` on up to `max_faces` detections.
///
/// A failed or low-confidence estimate drops only that face.
fn estimate_faces(
    detections: &[BoundingBox],
    options: &DetectorOptions,
    mut estimate: impl FnMut(&BoundingBox) -> Result<LandmarkSet, DetectorError>,
) -> Vec<LandmarkSet> {
    let mut landmarks = Vec::new();
    for (i, face) in detections.iter().take(options.max_faces).enumerate() {
        let set = match estimate(face) {
            Ok(set) => set,
            Err(e) => {
                tracing::warn!(face = i, error = %e, "landmark estimation failed; skipping face");
                continue;
            }
        };
        if set.confidence < options.min_tracking_confidence {
            tracing::debug!(
                face = i,
                confidence = set.confidence,
                "mesh face flag below threshold; dropping landmark set"
            );
            continue;
        }
        landmarks.push(set);
    }
    landmarks
}

impl<D: LandmarkDetector + ?Sized> LandmarkDetector for Box<D> {
    fn detect(&mut self, image: &RgbImage) -> Result<FaceRecord, DetectorError> {
        (**self).detect(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options_are_permissive() {
        let opts = DetectorOptions::default();
        assert!(opts.min_detection_confidence <= 0.1);
        assert!(opts.min_tracking_confidence <= 0.1);
        assert_eq!(opts.max_faces, 1);
    }

    #[test]
    fn test_options_partial_deserialize() {
        let opts: DetectorOptions = serde_json::from_str(r#"{"max_faces": 3}"#).unwrap();
        assert_eq!(opts.max_faces, 3);
        assert_eq!(opts.min_tracking_confidence, 0.1);
    }

    fn boxes(n: usize) -> Vec<BoundingBox> {
        (0..n)
            .map(|i| BoundingBox {
                x: i as f32 * 100.0,
                y: 0.0,
                width: 80.0,
                height: 80.0,
                confidence: 0.9,
                landmarks: None,
            })
            .collect()
    }

    /// Landmark set whose confidence encodes which box it came from.
    fn tagged(face: &BoundingBox) -> LandmarkSet {
        LandmarkSet::new(vec![], 0.5 + face.x / 1000.0)
    }

    #[test]
    fn test_one_failed_face_keeps_the_others() {
        let options = DetectorOptions { max_faces: 3, ..Default::default() };
        let sets = estimate_faces(&boxes(3), &options, |face| {
            if face.x == 100.0 {
                Err(DetectorError::InferenceFailed("mesh".into()))
            } else {
                Ok(tagged(face))
            }
        });
        assert_eq!(sets.len(), 2);
        assert!((sets[0].confidence - 0.5).abs() < 1e-6);
        assert!((sets[1].confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_max_faces_and_tracking_threshold() {
        let options = DetectorOptions {
            max_faces: 2,
            min_tracking_confidence: 0.55,
            ..Default::default()
        };
        let mut calls = 0;
        let sets = estimate_faces(&boxes(4), &options, |face| {
            calls += 1;
            Ok(tagged(face))
        });
        assert_eq!(calls, 2);
        assert_eq!(sets.len(), 1);
        assert!((sets[0].confidence - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_load_missing_models() {
        let dir = Path::new("/nonexistent/facewarp-models");
        assert!(matches!(
            MeshLandmarkDetector::load(dir, DetectorOptions::default()),
            Err(DetectorError::ModelNotFound(_))
        ));
    }
}
