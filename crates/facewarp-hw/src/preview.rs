//! Preview sinks — where pipeline stages show intermediate images.
//!
//! Stages never talk to a display directly. They hand images to an
//! injected [`PreviewSink`], which may render them somewhere and may ask the
//! pipeline to stop (the "quit key" of an interactive preview).

use image::RgbImage;
use std::path::{Path, PathBuf};

/// What a stage should do after showing an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkControl {
    Continue,
    Quit,
}

/// Destination for preview images.
pub trait PreviewSink {
    /// Show `image` in the window called `window`.
    fn show(&mut self, window: &str, image: &RgbImage) -> SinkControl;

    /// Tear down any windows. Called once when the owning stage ends.
    fn close(&mut self) {}
}

/// Headless sink: discards every image and never quits.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl PreviewSink for NullSink {
    fn show(&mut self, _window: &str, _image: &RgbImage) -> SinkControl {
        SinkControl::Continue
    }
}

/// Writes the latest image of each window to `<dir>/<window>.png`.
///
/// Creating a file named `quit` inside the directory stops the pipeline.
#[derive(Debug)]
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl AsRef<Path>) -> std::io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        tracing::info!(dir = %dir.display(), "preview sink writing to directory");
        Ok(Self { dir })
    }
}

impl PreviewSink for DirectorySink {
    fn show(&mut self, window: &str, image: &RgbImage) -> SinkControl {
        let path = self.dir.join(format!("{window}.png"));
        if let Err(e) = image.save(&path) {
            tracing::warn!(path = %path.display(), error = %e, "failed to write preview image");
        }
        if self.dir.join("quit").exists() {
            tracing::info!("quit requested via preview directory");
            return SinkControl::Quit;
        }
        SinkControl::Continue
    }

    fn close(&mut self) {
        let quit = self.dir.join("quit");
        if quit.exists() {
            if let Err(e) = std::fs::remove_file(&quit) {
                tracing::warn!(path = %quit.display(), error = %e, "failed to clear quit request");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("facewarp-preview-{name}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_null_sink_never_quits() {
        let img = RgbImage::new(2, 2);
        assert_eq!(NullSink.show("webcam", &img), SinkControl::Continue);
    }

    #[test]
    fn test_directory_sink_writes_window_file() {
        let dir = scratch_dir("write");
        let mut sink = DirectorySink::new(&dir).unwrap();
        let img = RgbImage::from_pixel(4, 3, image::Rgb([1, 2, 3]));
        assert_eq!(sink.show("aligned", &img), SinkControl::Continue);

        let written = image::open(dir.join("aligned.png")).unwrap().to_rgb8();
        assert_eq!(written.dimensions(), (4, 3));
        assert_eq!(written.get_pixel(0, 0).0, [1, 2, 3]);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_directory_sink_quit_file() {
        let dir = scratch_dir("quit");
        let mut sink = DirectorySink::new(&dir).unwrap();
        std::fs::write(dir.join("quit"), b"").unwrap();
        assert_eq!(sink.show("webcam", &RgbImage::new(1, 1)), SinkControl::Quit);
        sink.close();
        assert!(!dir.join("quit").exists());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_directory_sink_close_survives_unremovable_quit() {
        let dir = scratch_dir("quit-dir");
        let mut sink = DirectorySink::new(&dir).unwrap();
        // A directory named `quit` cannot be removed with remove_file.
        std::fs::create_dir(dir.join("quit")).unwrap();
        sink.close();
        assert!(dir.join("quit").is_dir());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
