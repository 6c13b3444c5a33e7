use serde::{Deserialize, Serialize};

/// Bounding box for a detected face in frame pixels, with optional facial landmarks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    /// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
    pub landmarks: Option<[(f32, f32); 5]>,
}

impl BoundingBox {
    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// A landmark position normalized to the frame: (0,0) top-left, (1,1) bottom-right.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keypoint {
    pub x: f32,
    pub y: f32,
}

impl Keypoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Scale to pixel coordinates of a `width` × `height` frame.
    pub fn to_pixel(self, width: u32, height: u32) -> (f64, f64) {
        (self.x as f64 * width as f64, self.y as f64 * height as f64)
    }
}

/// Keypoints for one face, indexed by the face-mesh schema (see [`crate::schema`]).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LandmarkSet {
    pub points: Vec<Keypoint>,
    /// Face presence confidence reported by the landmark model (0.0–1.0).
    pub confidence: f32,
}

impl LandmarkSet {
    pub fn new(points: Vec<Keypoint>, confidence: f32) -> Self {
        Self { points, confidence }
    }

    pub fn get(&self, index: usize) -> Option<Keypoint> {
        self.points.get(index).copied()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Pixel-space box enclosing every finite keypoint. `None` if there are none.
    pub fn pixel_bounds(&self, width: u32, height: u32) -> Option<BoundingBox> {
        if self.is_empty() {
            return None;
        }
        let mut min = (f64::INFINITY, f64::INFINITY);
        let mut max = (f64::NEG_INFINITY, f64::NEG_INFINITY);
        for kp in &self.points {
            let (px, py) = kp.to_pixel(width, height);
            if !px.is_finite() || !py.is_finite() {
                continue;
            }
            min = (min.0.min(px), min.1.min(py));
            max = (max.0.max(px), max.1.max(py));
        }
        if min.0 > max.0 {
            return None;
        }
        Some(BoundingBox {
            x: min.0 as f32,
            y: min.1 as f32,
            width: (max.0 - min.0) as f32,
            height: (max.1 - min.1) as f32,
            confidence: self.confidence,
            landmarks: None,
        })
    }
}

/// Everything the landmark detector found in one frame.
///
/// An empty `landmarks` list means no face was found; that is not an error.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FaceRecord {
    /// Face-presence boxes in frame pixels. Not used for alignment.
    pub detections: Vec<BoundingBox>,
    /// One landmark set per detected face.
    pub landmarks: Vec<LandmarkSet>,
}

impl FaceRecord {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn has_faces(&self) -> bool {
        !self.landmarks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keypoint_to_pixel() {
        let kp = Keypoint::new(0.25, 0.5);
        assert_eq!(kp.to_pixel(640, 480), (160.0, 240.0));
    }

    #[test]
    fn test_pixel_bounds() {
        let set = LandmarkSet::new(
            vec![
                Keypoint::new(0.1, 0.2),
                Keypoint::new(0.5, 0.25),
                Keypoint::new(0.3, 0.6),
            ],
            0.9,
        );
        let bbox = set.pixel_bounds(100, 200).unwrap();
        assert!((bbox.x - 10.0).abs() < 1e-4);
        assert!((bbox.y - 40.0).abs() < 1e-4);
        assert!((bbox.width - 40.0).abs() < 1e-4);
        assert!((bbox.height - 80.0).abs() < 1e-4);
        assert_eq!(bbox.confidence, 0.9);
    }

    #[test]
    fn test_pixel_bounds_skips_non_finite() {
        let set = LandmarkSet::new(
            vec![Keypoint::new(f32::NAN, 0.5), Keypoint::new(0.5, 0.5)],
            1.0,
        );
        let bbox = set.pixel_bounds(10, 10).unwrap();
        assert_eq!((bbox.x, bbox.width), (5.0, 0.0));
    }

    #[test]
    fn test_pixel_bounds_empty() {
        assert!(LandmarkSet::default().pixel_bounds(10, 10).is_none());
    }

    #[test]
    fn test_bbox_center() {
        let bbox = BoundingBox {
            x: 10.0, y: 20.0, width: 30.0, height: 40.0,
            confidence: 1.0, landmarks: None,
        };
        assert_eq!(bbox.center(), (25.0, 40.0));
    }

    #[test]
    fn test_face_record_empty() {
        assert!(!FaceRecord::empty().has_faces());
    }
}
