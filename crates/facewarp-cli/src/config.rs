use anyhow::{Context, Result};
use facewarp_core::{DetectorOptions, OutputSize};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Pipeline configuration.
///
/// Resolved in order: built-in defaults, then the optional TOML file, then
/// `FACEWARP_*` environment variables. Command-line flags are applied last by
/// the caller.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Aligned crop width in pixels.
    pub output_width: u32,
    /// Aligned crop height in pixels.
    pub output_height: u32,
    pub min_detection_confidence: f32,
    pub min_tracking_confidence: f32,
    /// Landmark sets are estimated for at most this many faces per frame.
    pub max_faces: usize,
    /// Attach the landmark bounding box to each alignment record.
    pub record_bbox: bool,
}

impl Default for Config {
    fn default() -> Self {
        let detector = DetectorOptions::default();
        let size = OutputSize::default();
        Self {
            camera_device: "/dev/video0".to_string(),
            model_dir: facewarp_core::default_model_dir(),
            output_width: size.width,
            output_height: size.height,
            min_detection_confidence: detector.min_detection_confidence,
            min_tracking_confidence: detector.min_tracking_confidence,
            max_faces: detector.max_faces,
            record_bbox: false,
        }
    }
}

impl Config {
    /// Load the TOML file at `path` (if any), then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config file {}", path.display()))
    }

    /// Override fields from `FACEWARP_*` variables. Unparseable values are ignored.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(device) = lookup("FACEWARP_CAMERA_DEVICE") {
            self.camera_device = device;
        }
        if let Some(dir) = lookup("FACEWARP_MODEL_DIR") {
            self.model_dir = PathBuf::from(dir);
        }
        self.output_width = env_parse(&lookup, "FACEWARP_OUTPUT_WIDTH", self.output_width);
        self.output_height = env_parse(&lookup, "FACEWARP_OUTPUT_HEIGHT", self.output_height);
        self.min_detection_confidence = env_parse(
            &lookup,
            "FACEWARP_MIN_DETECTION_CONFIDENCE",
            self.min_detection_confidence,
        );
        self.min_tracking_confidence = env_parse(
            &lookup,
            "FACEWARP_MIN_TRACKING_CONFIDENCE",
            self.min_tracking_confidence,
        );
        self.max_faces = env_parse(&lookup, "FACEWARP_MAX_FACES", self.max_faces);
        if let Some(v) = lookup("FACEWARP_RECORD_BBOX") {
            self.record_bbox = v != "0" && !v.eq_ignore_ascii_case("false");
        }
    }

    pub fn output_size(&self) -> OutputSize {
        OutputSize::new(self.output_width, self.output_height)
    }

    pub fn detector_options(&self) -> DetectorOptions {
        DetectorOptions {
            min_detection_confidence: self.min_detection_confidence,
            min_tracking_confidence: self.min_tracking_confidence,
            max_faces: self.max_faces,
        }
    }
}

fn env_parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
