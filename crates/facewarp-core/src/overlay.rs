//! Debug overlays drawn onto preview images.

use crate::alignment::{OutputSize, ReferenceTriple};
use crate::schema::FACE_OVAL;
use crate::types::{BoundingBox, FaceRecord};
use image::{Rgb, RgbImage};

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const LANDMARK_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const REFERENCE_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const CONTOUR_COLOR: Rgb<u8> = Rgb([255, 255, 0]);

/// Draw detection boxes, the face oval contour and every landmark of
/// `record` onto `image`.
pub fn draw_face_record(image: &mut RgbImage, record: &FaceRecord) {
    for bbox in &record.detections {
        draw_rect(image, bbox, BOX_COLOR);
    }
    let (w, h) = image.dimensions();
    for set in &record.landmarks {
        let oval: Vec<_> = FACE_OVAL
            .iter()
            .filter_map(|&i| set.get(i))
            .map(|kp| kp.to_pixel(w, h))
            .collect();
        // Closed loop; sets missing oval indices just draw what they have.
        for (a, b) in oval.iter().zip(oval.iter().cycle().skip(1)) {
            draw_line(image, *a, *b, CONTOUR_COLOR);
        }
        for kp in &set.points {
            let (x, y) = kp.to_pixel(w, h);
            draw_dot(image, x, y, 0, LANDMARK_COLOR);
        }
    }
}

/// Mark where the alignment anchors should land on an aligned crop.
pub fn draw_reference_markers(image: &mut RgbImage, size: OutputSize) {
    for (x, y) in ReferenceTriple::for_size(size).points() {
        draw_dot(image, x, y, 2, REFERENCE_COLOR);
    }
}

fn draw_dot(image: &mut RgbImage, x: f64, y: f64, radius: i64, color: Rgb<u8>) {
    if !x.is_finite() || !y.is_finite() {
        return;
    }
    let (cx, cy) = (x.round() as i64, y.round() as i64);
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx * dx + dy * dy <= radius * radius {
                put(image, cx + dx, cy + dy, color);
            }
        }
    }
}

fn draw_line(image: &mut RgbImage, (x0, y0): (f64, f64), (x1, y1): (f64, f64), color: Rgb<u8>) {
    if ![x0, y0, x1, y1].iter().all(|v| v.is_finite()) {
        return;
    }
    let steps = (x1 - x0).abs().max((y1 - y0).abs()).ceil().min(4096.0) as i64;
    for i in 0..=steps {
        let t = if steps == 0 { 0.0 } else { i as f64 / steps as f64 };
        let x = x0 + (x1 - x0) * t;
        let y = y0 + (y1 - y0) * t;
        put(image, x.round() as i64, y.round() as i64, color);
    }
}

fn draw_rect(image: &mut RgbImage, bbox: &BoundingBox, color: Rgb<u8>) {
    let x0 = bbox.x.round() as i64;
    let y0 = bbox.y.round() as i64;
    let x1 = (bbox.x + bbox.width).round() as i64;
    let y1 = (bbox.y + bbox.height).round() as i64;
    for x in x0..=x1 {
        put(image, x, y0, color);
        put(image, x, y1, color);
    }
    for y in y0..=y1 {
        put(image, x0, y, color);
        put(image, x1, y, color);
    }
}

fn put(image: &mut RgbImage, x: i64, y: i64, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u64) < image.width() as u64 && (y as u64) < image.height() as u64 {
        image.put_pixel(x as u32, y as u32, color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Keypoint, LandmarkSet};

    #[test]
    fn test_reference_markers_drawn_at_reference_points() {
        let mut img = RgbImage::new(112, 112);
        draw_reference_markers(&mut img, OutputSize::default());
        // Left eye reference (33.6, 44.8) rounds to (34, 45).
        assert_eq!(*img.get_pixel(34, 45), REFERENCE_COLOR);
        assert_eq!(*img.get_pixel(0, 0), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_face_oval_contour_drawn() {
        let mut img = RgbImage::new(100, 100);
        let mut points = vec![Keypoint::new(0.5, 0.5); crate::schema::NUM_LANDMARKS];
        // Put the whole oval on a horizontal segment from x=20 to x=80 at y=30.
        let n = FACE_OVAL.len();
        for (k, &i) in FACE_OVAL.iter().enumerate() {
            let x = 0.2 + 0.6 * k as f32 / (n - 1) as f32;
            points[i] = Keypoint::new(x, 0.3);
        }
        let record = FaceRecord {
            detections: vec![],
            landmarks: vec![LandmarkSet::new(points, 1.0)],
        };
        draw_face_record(&mut img, &record);
        // Between two oval vertices: only the contour line can reach here.
        assert_eq!(*img.get_pixel(50, 30), CONTOUR_COLOR);
        assert_eq!(*img.get_pixel(50, 70), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_face_record_overlay_clips_to_image() {
        let mut img = RgbImage::new(20, 20);
        let record = FaceRecord {
            detections: vec![BoundingBox {
                x: -5.0, y: 2.0, width: 40.0, height: 10.0,
                confidence: 1.0, landmarks: None,
            }],
            landmarks: vec![LandmarkSet::new(vec![Keypoint::new(0.5, 0.5), Keypoint::new(2.0, 2.0)], 1.0)],
        };
        draw_face_record(&mut img, &record);
        assert_eq!(*img.get_pixel(10, 2), BOX_COLOR);
        assert_eq!(*img.get_pixel(10, 12), BOX_COLOR);
        assert_eq!(*img.get_pixel(10, 10), LANDMARK_COLOR);
    }
}
