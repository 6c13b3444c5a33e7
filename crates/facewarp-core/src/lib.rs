//! facewarp-core — facial landmarks and face alignment.
//!
//! SCRFD finds faces and a Face Mesh model places 468 landmarks on each,
//! both via ONNX Runtime on the CPU. Faces are then aligned to a canonical
//! pose with a 3-point affine warp. [`stages`] chains all of it onto a
//! [`facewarp_hw::FrameSource`].

pub mod alignment;
pub mod detector;
pub mod landmarks;
pub mod mesh;
pub mod overlay;
mod preprocess;
pub mod schema;
pub mod stages;
pub mod types;

use std::path::PathBuf;

pub use alignment::{
    align, align_face, AffineTransform, AlignError, AlignOptions, AlignedFace, AlignmentRecord,
    OutputSize,
};
pub use landmarks::{DetectorOptions, LandmarkDetector, MeshLandmarkDetector};
pub use stages::{AlignStreamOptions, AlignedFaces, LandmarkStream};
pub use types::{BoundingBox, FaceRecord, Keypoint, LandmarkSet};

/// Default model directory: `$XDG_DATA_HOME/facewarp/models`, falling back to
/// `~/.local/share/facewarp/models`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facewarp")
        .join("models")
}
