//! Face-mesh landmark index schema.
//!
//! Indices follow the 468-point MediaPipe Face Mesh topology. "Left" and
//! "right" are as seen in the image, not from the subject's point of view.

/// Identifier of the index layout landmark sets are produced in.
pub const SCHEMA_VERSION: &str = "mediapipe-face-mesh-468";

/// Number of keypoints in a complete landmark set.
pub const NUM_LANDMARKS: usize = 468;

/// Outer corner of the eye on the image-left side.
pub const LEFT_EYE: usize = 33;
/// Outer corner of the eye on the image-right side.
pub const RIGHT_EYE: usize = 263;
pub const NOSE_TIP: usize = 1;

/// Anchor indices used for alignment, in (left eye, right eye, nose tip) order.
pub const ANCHOR_INDICES: [usize; 3] = [LEFT_EYE, RIGHT_EYE, NOSE_TIP];

/// Face oval, drawn as a closed contour by the landmark preview.
pub const FACE_OVAL: &[usize] = &[
    10, 338, 297, 332, 284, 251, 389, 356, 454, 323, 361, 288, 397, 365, 379, 378, 400, 377, 152,
    148, 176, 149, 150, 136, 172, 58, 132, 93, 234, 127, 162, 21, 54, 103, 67, 109,
];
