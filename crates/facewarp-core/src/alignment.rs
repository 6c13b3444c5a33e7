//! Face alignment via an exact 3-point affine transform.
//!
//! Maps the left eye, right eye and nose tip of a face-mesh landmark set onto
//! fixed reference positions of the output crop, then resamples the frame
//! through the inverse transform with bilinear interpolation.
//!
//! Border policy: samples outside the source frame replicate the nearest edge
//! pixel, so the output never depends on uninitialized or zero fill.

use crate::schema;
use crate::types::{BoundingBox, FaceRecord, LandmarkSet};
use facewarp_hw::Frame;
use image::{Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Anchor triangles smaller than this (in square pixels) are rejected.
const MIN_ANCHOR_AREA: f64 = 1.0;
/// Anchor triangles flatter than this are rejected regardless of size.
/// Measured as `|2 * area| / longest_edge²`, which is scale invariant.
const MIN_ANCHOR_FLATNESS: f64 = 1e-3;

/// Reference positions as fractions of the output width/height.
const REF_LEFT_EYE: (f64, f64) = (0.3, 0.4);
const REF_RIGHT_EYE: (f64, f64) = (0.7, 0.4);
const REF_NOSE_TIP: (f64, f64) = (0.5, 0.65);

pub type Point = (f64, f64);

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AlignError {
    #[error("landmark set has no keypoint at index {index} ({len} keypoints)")]
    MissingLandmark { index: usize, len: usize },
    #[error("anchor keypoint {index} is not finite")]
    NonFiniteAnchor { index: usize },
    #[error("anchor points are collinear or coincident (triangle area {area:.4} px²)")]
    DegenerateAnchorGeometry { area: f64 },
}

/// Size of the aligned crop in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputSize {
    pub width: u32,
    pub height: u32,
}

impl OutputSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for OutputSize {
    fn default() -> Self {
        Self::new(112, 112)
    }
}

/// Per-call alignment options.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlignOptions {
    pub output_size: OutputSize,
    /// Fill [`AlignmentRecord::bbox`] from the landmark extent.
    pub record_bbox: bool,
}

/// Left eye, right eye and nose tip in source-frame pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnchorTriple {
    pub left_eye: Point,
    pub right_eye: Point,
    pub nose_tip: Point,
}

impl AnchorTriple {
    /// Denormalize the three anchor keypoints against a `width` × `height` frame.
    pub fn from_landmarks(
        landmarks: &LandmarkSet,
        width: u32,
        height: u32,
    ) -> Result<Self, AlignError> {
        let mut pts = [(0.0, 0.0); 3];
        for (slot, &index) in pts.iter_mut().zip(schema::ANCHOR_INDICES.iter()) {
            let kp = landmarks.get(index).ok_or(AlignError::MissingLandmark {
                index,
                len: landmarks.len(),
            })?;
            let (px, py) = kp.to_pixel(width, height);
            if !px.is_finite() || !py.is_finite() {
                return Err(AlignError::NonFiniteAnchor { index });
            }
            *slot = (px, py);
        }
        Ok(Self {
            left_eye: pts[0],
            right_eye: pts[1],
            nose_tip: pts[2],
        })
    }

    pub fn points(&self) -> [Point; 3] {
        [self.left_eye, self.right_eye, self.nose_tip]
    }

}

/// Where the anchors land in the output crop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferenceTriple {
    pub left_eye: Point,
    pub right_eye: Point,
    pub nose_tip: Point,
}

impl ReferenceTriple {
    pub fn for_size(size: OutputSize) -> Self {
        let (w, h) = (size.width as f64, size.height as f64);
        let at = |(fx, fy): (f64, f64)| (fx * w, fy * h);
        Self {
            left_eye: at(REF_LEFT_EYE),
            right_eye: at(REF_RIGHT_EYE),
            nose_tip: at(REF_NOSE_TIP),
        }
    }

    pub fn points(&self) -> [Point; 3] {
        [self.left_eye, self.right_eye, self.nose_tip]
    }
}

/// 2×3 affine matrix:
/// ```text
/// | a  b  tx |
/// | c  d  ty |
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AffineTransform {
    pub matrix: [[f64; 3]; 2],
}

impl AffineTransform {
    /// Solve the affine map sending each `src[i]` exactly onto `dst[i]`.
    ///
    /// Three correspondences give six equations for six unknowns; the system is
    /// solved in closed form (Cramer's rule). Fails if `src` is degenerate.
    pub fn from_correspondences(src: &[Point; 3], dst: &[Point; 3]) -> Result<Self, AlignError> {
        let area = triangle_area(src);
        if area.is_nan() || area.abs() < MIN_ANCHOR_AREA {
            return Err(AlignError::DegenerateAnchorGeometry { area });
        }
        if (2.0 * area).abs() < MIN_ANCHOR_FLATNESS * longest_edge_sq(src) {
            return Err(AlignError::DegenerateAnchorGeometry { area });
        }

        let [(x1, y1), (x2, y2), (x3, y3)] = *src;
        let det = 2.0 * area;

        // Cofactors of the [x y 1] system matrix, shared by both output rows.
        let ca = [y2 - y3, y3 - y1, y1 - y2];
        let cb = [x3 - x2, x1 - x3, x2 - x1];
        let cc = [x2 * y3 - x3 * y2, x3 * y1 - x1 * y3, x1 * y2 - x2 * y1];

        let solve_row = |t: [f64; 3]| -> [f64; 3] {
            let dot = |c: &[f64; 3]| c[0] * t[0] + c[1] * t[1] + c[2] * t[2];
            [dot(&ca) / det, dot(&cb) / det, dot(&cc) / det]
        };

        let transform = Self {
            matrix: [
                solve_row([dst[0].0, dst[1].0, dst[2].0]),
                solve_row([dst[0].1, dst[1].1, dst[2].1]),
            ],
        };

        if transform.matrix.iter().flatten().any(|v| !v.is_finite()) {
            return Err(AlignError::DegenerateAnchorGeometry { area });
        }
        Ok(transform)
    }

    pub fn apply(&self, (x, y): Point) -> Point {
        let [[a, b, tx], [c, d, ty]] = self.matrix;
        (a * x + b * y + tx, c * x + d * y + ty)
    }

    /// Inverse map, or `None` if the linear part is singular.
    pub fn inverse(&self) -> Option<Self> {
        let [[a, b, tx], [c, d, ty]] = self.matrix;
        let det = a * d - b * c;
        if det.abs() < 1e-12 || !det.is_finite() {
            return None;
        }
        let inv_det = 1.0 / det;
        let (ia, ib, ic, id) = (d * inv_det, -b * inv_det, -c * inv_det, a * inv_det);
        Some(Self {
            matrix: [
                [ia, ib, -(ia * tx + ib * ty)],
                [ic, id, -(ic * tx + id * ty)],
            ],
        })
    }
}

/// Apply a 2×3 affine warp to produce an `size` output image.
///
/// Uses bilinear interpolation with replicate-edge borders.
pub fn warp_affine(src: &RgbImage, transform: &AffineTransform, size: OutputSize) -> RgbImage {
    let mut output = RgbImage::new(size.width, size.height);
    let (src_w, src_h) = src.dimensions();
    if src_w == 0 || src_h == 0 {
        return output;
    }
    let Some(inverse) = transform.inverse() else {
        return output;
    };

    let max_x = (src_w - 1) as f64;
    let max_y = (src_h - 1) as f64;

    for (ox, oy, out) in output.enumerate_pixels_mut() {
        let (sx, sy) = inverse.apply((ox as f64, oy as f64));
        // Clamping the sample position is exactly edge replication.
        let sx = if sx.is_finite() { sx.clamp(0.0, max_x) } else { 0.0 };
        let sy = if sy.is_finite() { sy.clamp(0.0, max_y) } else { 0.0 };

        let x0 = sx.floor() as u32;
        let y0 = sy.floor() as u32;
        let x1 = (x0 + 1).min(src_w - 1);
        let y1 = (y0 + 1).min(src_h - 1);
        let fx = sx - x0 as f64;
        let fy = sy - y0 as f64;

        let tl = src.get_pixel(x0, y0).0;
        let tr = src.get_pixel(x1, y0).0;
        let bl = src.get_pixel(x0, y1).0;
        let br = src.get_pixel(x1, y1).0;

        let mut px = [0u8; 3];
        for ch in 0..3 {
            let val = tl[ch] as f64 * (1.0 - fx) * (1.0 - fy)
                + tr[ch] as f64 * fx * (1.0 - fy)
                + bl[ch] as f64 * (1.0 - fx) * fy
                + br[ch] as f64 * fx * fy;
            px[ch] = val.round().clamp(0.0, 255.0) as u8;
        }
        *out = Rgb(px);
    }

    output
}

/// Align one face: solve the anchor → reference transform and warp the frame.
pub fn align_face(
    image: &RgbImage,
    landmarks: &LandmarkSet,
    size: OutputSize,
) -> Result<(RgbImage, AffineTransform), AlignError> {
    let anchors = AnchorTriple::from_landmarks(landmarks, image.width(), image.height())?;
    let reference = ReferenceTriple::for_size(size);
    let transform = AffineTransform::from_correspondences(&anchors.points(), &reference.points())?;
    Ok((warp_affine(image, &transform, size), transform))
}

/// An aligned, pose-canonical face crop.
#[derive(Debug, Clone)]
pub struct AlignedFace {
    pub image: RgbImage,
}

/// How an [`AlignedFace`] was produced.
#[derive(Debug, Clone)]
pub struct AlignmentRecord {
    /// The source frame, shared by every face aligned from it.
    pub frame: Arc<Frame>,
    pub landmarks: LandmarkSet,
    pub transform: AffineTransform,
    pub bbox: Option<BoundingBox>,
}

/// Align a single landmark set of `frame`, producing the crop and its record.
pub fn align_landmarks(
    frame: &Arc<Frame>,
    landmarks: &LandmarkSet,
    options: AlignOptions,
) -> Result<(AlignedFace, AlignmentRecord), AlignError> {
    let (image, transform) = align_face(&frame.image, landmarks, options.output_size)?;
    let bbox = if options.record_bbox {
        landmarks.pixel_bounds(frame.width(), frame.height())
    } else {
        None
    };
    Ok((
        AlignedFace { image },
        AlignmentRecord {
            frame: Arc::clone(frame),
            landmarks: landmarks.clone(),
            transform,
            bbox,
        },
    ))
}

/// Align every landmark set of `record` against `frame`, lazily, in order.
///
/// Yields nothing for a record without faces. Each item is independent: a
/// degenerate face does not affect the others.
pub fn align<'a>(
    frame: &'a Arc<Frame>,
    record: &'a FaceRecord,
    options: AlignOptions,
) -> impl Iterator<Item = Result<(AlignedFace, AlignmentRecord), AlignError>> + 'a {
    record
        .landmarks
        .iter()
        .map(move |landmarks| align_landmarks(frame, landmarks, options))
}

fn longest_edge_sq(pts: &[Point; 3]) -> f64 {
    let d2 = |(ax, ay): Point, (bx, by): Point| (bx - ax).powi(2) + (by - ay).powi(2);
    d2(pts[0], pts[1]).max(d2(pts[1], pts[2])).max(d2(pts[2], pts[0]))
}

fn triangle_area(pts: &[Point; 3]) -> f64 {
    let [(x1, y1), (x2, y2), (x3, y3)] = *pts;
    0.5 * ((x2 - x1) * (y3 - y1) - (x3 - x1) * (y2 - y1))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::types::Keypoint;

    const TOL: f64 = 1e-3;

    const IDENTITY: AffineTransform = AffineTransform {
        matrix: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
    };

    /// A full-size landmark set whose anchors sit at the given pixel positions.
    pub(crate) fn landmarks_at(width: u32, height: u32, anchors: [Point; 3]) -> LandmarkSet {
        let mut points = vec![Keypoint::new(0.5, 0.5); schema::NUM_LANDMARKS];
        for (&index, (px, py)) in schema::ANCHOR_INDICES.iter().zip(anchors) {
            points[index] = Keypoint::new((px / width as f64) as f32, (py / height as f64) as f32);
        }
        LandmarkSet::new(points, 1.0)
    }

    /// Smooth gradient: R = x / 4, G = y / 2, B = 128.
    pub(crate) fn gradient_frame(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x / 4).min(255) as u8, (y / 2).min(255) as u8, 128])
        })
    }

    fn assert_close(actual: Point, expected: Point, tol: f64) {
        assert!(
            (actual.0 - expected.0).abs() < tol && (actual.1 - expected.1).abs() < tol,
            "got {actual:?}, expected {expected:?}"
        );
    }

    #[test]
    fn test_reference_triple_default_size() {
        let r = ReferenceTriple::for_size(OutputSize::default());
        assert_close(r.left_eye, (33.6, 44.8), 1e-9);
        assert_close(r.right_eye, (78.4, 44.8), 1e-9);
        assert_close(r.nose_tip, (56.0, 72.8), 1e-9);
    }

    #[test]
    fn test_identity_when_src_equals_dst() {
        let pts = ReferenceTriple::for_size(OutputSize::default()).points();
        let t = AffineTransform::from_correspondences(&pts, &pts).unwrap();
        for (got, want) in t.matrix.iter().flatten().zip(IDENTITY.matrix.iter().flatten()) {
            assert!((got - want).abs() < 1e-9, "{:?}", t.matrix);
        }
    }

    #[test]
    fn test_transform_maps_anchors_exactly() {
        let cases: [[Point; 3]; 4] = [
            [(200.0, 220.0), (440.0, 220.0), (320.0, 300.0)],
            [(12.5, 300.0), (250.0, 180.0), (90.0, 410.0)],
            [(600.0, 40.0), (630.0, 470.0), (5.0, 5.0)],
            // Rotated, mirrored face.
            [(400.0, 100.0), (150.0, 260.0), (300.0, 300.0)],
        ];
        let dst = ReferenceTriple::for_size(OutputSize::new(160, 200)).points();
        for src in cases {
            let t = AffineTransform::from_correspondences(&src, &dst).unwrap();
            for (s, d) in src.iter().zip(dst.iter()) {
                assert_close(t.apply(*s), *d, TOL);
            }
        }
    }

    #[test]
    fn test_inverse_round_trips() {
        let src = [(200.0, 220.0), (440.0, 220.0), (320.0, 300.0)];
        let dst = ReferenceTriple::for_size(OutputSize::default()).points();
        let t = AffineTransform::from_correspondences(&src, &dst).unwrap();
        let inv = t.inverse().unwrap();
        for p in src {
            assert_close(inv.apply(t.apply(p)), p, TOL);
        }
    }

    #[test]
    fn test_collinear_anchors_rejected() {
        let src = [(100.0, 100.0), (200.0, 200.0), (300.0, 300.0)];
        let dst = ReferenceTriple::for_size(OutputSize::default()).points();
        assert!(matches!(
            AffineTransform::from_correspondences(&src, &dst),
            Err(AlignError::DegenerateAnchorGeometry { .. })
        ));
    }

    #[test]
    fn test_coincident_anchors_rejected() {
        let src = [(50.0, 50.0); 3];
        let dst = ReferenceTriple::for_size(OutputSize::default()).points();
        assert!(AffineTransform::from_correspondences(&src, &dst).is_err());
    }

    #[test]
    fn test_nearly_collinear_anchors_rejected() {
        // Triangle area 0.25 px², below the threshold.
        let src = [(0.0, 0.0), (100.0, 0.0), (50.0, 0.005)];
        let dst = ReferenceTriple::for_size(OutputSize::default()).points();
        assert!(AffineTransform::from_correspondences(&src, &dst).is_err());
    }

    #[test]
    fn test_wide_flat_anchors_rejected() {
        // Area 1.5 px² clears the absolute floor, but over a 600 px baseline
        // the solve would blow up the vertical scale by ~5600x.
        let src = [(20.0, 200.0), (620.0, 200.0), (320.0, 200.005)];
        let dst = ReferenceTriple::for_size(OutputSize::default()).points();
        assert!(matches!(
            AffineTransform::from_correspondences(&src, &dst),
            Err(AlignError::DegenerateAnchorGeometry { .. })
        ));
    }

    #[test]
    fn test_small_well_shaped_anchors_accepted() {
        let src = [(10.0, 10.0), (13.0, 10.0), (11.5, 12.0)];
        let dst = ReferenceTriple::for_size(OutputSize::default()).points();
        let t = AffineTransform::from_correspondences(&src, &dst).unwrap();
        for (s, d) in src.iter().zip(dst.iter()) {
            assert_close(t.apply(*s), *d, TOL);
        }
    }

    #[test]
    fn test_missing_anchor_landmark() {
        let set = LandmarkSet::new(vec![Keypoint::new(0.5, 0.5); 10], 1.0);
        assert_eq!(
            AnchorTriple::from_landmarks(&set, 640, 480),
            Err(AlignError::MissingLandmark { index: schema::LEFT_EYE, len: 10 })
        );
    }

    #[test]
    fn test_non_finite_anchor() {
        let mut set = landmarks_at(640, 480, [(200.0, 220.0), (440.0, 220.0), (320.0, 300.0)]);
        set.points[schema::NOSE_TIP] = Keypoint::new(f32::NAN, 0.5);
        assert_eq!(
            AnchorTriple::from_landmarks(&set, 640, 480),
            Err(AlignError::NonFiniteAnchor { index: schema::NOSE_TIP })
        );
    }

    #[test]
    fn test_output_size_independent_of_source() {
        for (w, h) in [(640, 480), (32, 24), (1920, 1080)] {
            let frame = gradient_frame(w, h);
            let anchors = [
                (w as f64 * 0.3, h as f64 * 0.45),
                (w as f64 * 0.7, h as f64 * 0.45),
                (w as f64 * 0.5, h as f64 * 0.6),
            ];
            let set = landmarks_at(w, h, anchors);
            for size in [OutputSize::default(), OutputSize::new(96, 128)] {
                let (crop, _) = align_face(&frame, &set, size).unwrap();
                assert_eq!(crop.dimensions(), (size.width, size.height));
            }
        }
    }

    #[test]
    fn test_warp_identity_copies_pixels() {
        let frame = gradient_frame(64, 48);
        let out = warp_affine(&frame, &IDENTITY, OutputSize::new(64, 48));
        assert_eq!(out, frame);
    }

    #[test]
    fn test_warp_replicates_edges() {
        // Shift the source 10 px right: output columns 0..10 sample x < 0.
        let frame = RgbImage::from_fn(20, 4, |x, _| Rgb([x as u8 * 10, 0, 0]));
        let shift = AffineTransform {
            matrix: [[1.0, 0.0, 10.0], [0.0, 1.0, 0.0]],
        };
        let out = warp_affine(&frame, &shift, OutputSize::new(20, 4));
        for x in 0..=10 {
            assert_eq!(out.get_pixel(x, 2).0[0], 0, "column {x}");
        }
        assert_eq!(out.get_pixel(15, 0).0[0], 50);
    }

    #[test]
    fn test_warp_singular_transform_is_blank() {
        let frame = gradient_frame(8, 8);
        let singular = AffineTransform {
            matrix: [[0.0, 0.0, 1.0], [0.0, 0.0, 1.0]],
        };
        let out = warp_affine(&frame, &singular, OutputSize::new(4, 4));
        assert!(out.pixels().all(|p| p.0 == [0, 0, 0]));
    }

    #[test]
    fn test_end_to_end_640x480() {
        let frame = gradient_frame(640, 480);
        let set = landmarks_at(640, 480, [(200.0, 220.0), (440.0, 220.0), (320.0, 300.0)]);
        let (crop, t) = align_face(&frame, &set, OutputSize::default()).unwrap();

        assert_close(t.apply((200.0, 220.0)), (33.6, 44.8), TOL);
        assert_close(t.apply((440.0, 220.0)), (78.4, 44.8), TOL);
        assert_close(t.apply((320.0, 300.0)), (56.0, 72.8), TOL);

        assert_eq!(crop.dimensions(), (112, 112));
        let got = crop.get_pixel(34, 45).0;
        let want = frame.get_pixel(200, 220).0;
        for ch in 0..3 {
            assert!(
                (got[ch] as i32 - want[ch] as i32).abs() <= 2,
                "channel {ch}: crop {got:?} vs source {want:?}"
            );
        }
    }

    #[test]
    fn test_align_yields_one_item_per_face() {
        let frame = Arc::new(Frame::new(gradient_frame(640, 480), 0));
        let good = landmarks_at(640, 480, [(200.0, 220.0), (440.0, 220.0), (320.0, 300.0)]);
        let collinear = landmarks_at(640, 480, [(100.0, 100.0), (200.0, 100.0), (300.0, 100.0)]);
        let record = FaceRecord {
            detections: vec![],
            landmarks: vec![good.clone(), collinear, good],
        };

        let items: Vec<_> = align(&frame, &record, AlignOptions::default()).collect();
        assert_eq!(items.len(), 3);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(AlignError::DegenerateAnchorGeometry { .. })));
        let (face, rec) = items[2].as_ref().unwrap();
        assert_eq!(face.image.dimensions(), (112, 112));
        assert!(Arc::ptr_eq(&rec.frame, &frame));
        assert!(rec.bbox.is_none());
    }

    #[test]
    fn test_align_records_bbox_when_requested() {
        let frame = Arc::new(Frame::new(gradient_frame(640, 480), 0));
        let record = FaceRecord {
            detections: vec![],
            landmarks: vec![landmarks_at(640, 480, [(200.0, 220.0), (440.0, 220.0), (320.0, 300.0)])],
        };
        let options = AlignOptions {
            record_bbox: true,
            ..Default::default()
        };
        let (_, rec) = align(&frame, &record, options).next().unwrap().unwrap();
        let bbox = rec.bbox.unwrap();
        assert!((bbox.x - 200.0).abs() < 1e-2);
        assert!((bbox.width - 240.0).abs() < 1e-2);
    }

    #[test]
    fn test_align_empty_record_yields_nothing() {
        let frame = Arc::new(Frame::new(gradient_frame(16, 16), 0));
        let record = FaceRecord::empty();
        assert_eq!(align(&frame, &record, AlignOptions::default()).count(), 0);
    }
}
