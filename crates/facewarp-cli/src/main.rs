use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facewarp_core::alignment::{AnchorTriple, Point};
use facewarp_core::schema::SCHEMA_VERSION;
use facewarp_core::{
    AffineTransform, AlignOptions, AlignStreamOptions, AlignedFaces, BoundingBox, FaceRecord,
    LandmarkStream, MeshLandmarkDetector,
};
use facewarp_hw::{Camera, CancelToken, DirectorySink, FrameSource, PreviewSink, SourceOptions};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "facewarp", about = "Webcam face landmarking and alignment")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// V4L2 capture device (overrides config)
    #[arg(short, long, global = true)]
    device: Option<String>,
    /// Directory holding the ONNX models (overrides config)
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,
    /// Write live preview images into this directory
    #[arg(long, global = true)]
    preview: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List V4L2 capture devices
    Devices,
    /// Capture raw frames
    Capture {
        /// Number of frames to capture (default: until Ctrl-C)
        #[arg(short = 'n', long)]
        frames: Option<usize>,
        /// Save each frame as PNG into this directory
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Detect facial landmarks on each frame
    Landmarks {
        /// Number of frames to process (default: until Ctrl-C)
        #[arg(short = 'n', long)]
        frames: Option<usize>,
        /// Print one JSON object per frame
        #[arg(long)]
        json: bool,
    },
    /// Align detected faces to the canonical pose
    Align {
        /// Stop after this many aligned faces
        #[arg(short = 'n', long)]
        max_items: Option<usize>,
        /// Aligned crop width (overrides config)
        #[arg(long)]
        width: Option<u32>,
        /// Aligned crop height (overrides config)
        #[arg(long)]
        height: Option<u32>,
        /// Save aligned crops as PNG into this directory
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Print one JSON alignment record per face
        #[arg(long)]
        json: bool,
    },
}

/// Printed per frame by `landmarks --json`.
#[derive(Serialize)]
struct FrameLandmarks<'a> {
    schema: &'static str,
    frame: u32,
    record: &'a FaceRecord,
}

/// Printed per aligned face with `--json`.
#[derive(Serialize)]
struct AlignmentSummary<'a> {
    schema: &'static str,
    frame: u32,
    face: usize,
    output: Option<&'a Path>,
    anchors: Option<[Point; 3]>,
    transform: &'a AffineTransform,
    bbox: Option<&'a BoundingBox>,
    confidence: f32,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(device) = cli.device {
        config.camera_device = device;
    }
    if let Some(dir) = cli.model_dir {
        config.model_dir = dir;
    }
    let preview = cli.preview;

    if let Commands::Devices = cli.command {
        list_devices();
        return Ok(());
    }

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received; stopping");
                cancel.cancel();
            }
        });
    }

    // Device, models and sinks all live on the blocking worker.
    let worker = tokio::task::spawn_blocking(move || match cli.command {
        Commands::Devices => Ok(()),
        Commands::Capture { frames, out } => {
            run_capture(&config, preview.as_deref(), frames, out.as_deref(), cancel)
        }
        Commands::Landmarks { frames, json } => {
            run_landmarks(&config, preview.as_deref(), frames, json, cancel)
        }
        Commands::Align { max_items, width, height, out, json } => {
            if let Some(width) = width {
                config.output_width = width;
            }
            if let Some(height) = height {
                config.output_height = height;
            }
            run_align(&config, preview.as_deref(), max_items, out.as_deref(), json, cancel)
        }
    });

    worker.await.context("pipeline worker panicked")?
}

fn list_devices() {
    let devices = Camera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found");
        return;
    }
    for dev in devices {
        println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
    }
}

fn open_source(
    config: &Config,
    preview: Option<&Path>,
    max_frames: Option<usize>,
    cancel: CancelToken,
) -> Result<FrameSource<Camera>> {
    let source = FrameSource::open(&config.camera_device, SourceOptions { max_frames, cancel })
        .with_context(|| format!("opening {}", config.camera_device))?;
    Ok(match preview_sink(preview)? {
        Some(sink) => source.with_preview(sink),
        None => source,
    })
}

fn preview_sink(dir: Option<&Path>) -> Result<Option<Box<dyn PreviewSink>>> {
    match dir {
        Some(dir) => {
            let sink = DirectorySink::new(dir)
                .with_context(|| format!("creating preview directory {}", dir.display()))?;
            Ok(Some(Box::new(sink)))
        }
        None => Ok(None),
    }
}

fn ensure_dir(dir: Option<&Path>) -> Result<()> {
    if let Some(dir) = dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating output directory {}", dir.display()))?;
    }
    Ok(())
}

fn run_capture(
    config: &Config,
    preview: Option<&Path>,
    frames: Option<usize>,
    out: Option<&Path>,
    cancel: CancelToken,
) -> Result<()> {
    ensure_dir(out)?;
    let source = open_source(config, preview, frames, cancel)?;

    let mut count = 0usize;
    for frame in source {
        let frame = frame?;
        if let Some(dir) = out {
            let path = dir.join(format!("frame_{:05}.png", frame.sequence));
            frame
                .image
                .save(&path)
                .with_context(|| format!("saving {}", path.display()))?;
        }
        count += 1;
    }

    println!("Captured {count} frame(s)");
    Ok(())
}

fn run_landmarks(
    config: &Config,
    preview: Option<&Path>,
    frames: Option<usize>,
    json: bool,
    cancel: CancelToken,
) -> Result<()> {
    let detector = MeshLandmarkDetector::load(&config.model_dir, config.detector_options())?;
    let source = open_source(config, preview, frames, cancel)?;
    let mut stream = LandmarkStream::new(source, detector);
    if let Some(sink) = preview_sink(preview)? {
        stream = stream.with_preview(sink);
    }

    let (mut total, mut with_faces) = (0usize, 0usize);
    for item in stream {
        let (frame, record) = item?;
        total += 1;
        if record.has_faces() {
            with_faces += 1;
        }
        if json {
            let line = FrameLandmarks {
                schema: SCHEMA_VERSION,
                frame: frame.sequence,
                record: &record,
            };
            println!("{}", serde_json::to_string(&line)?);
        } else {
            println!(
                "frame {:>5}: {} detection(s), {} landmark set(s)",
                frame.sequence,
                record.detections.len(),
                record.landmarks.len()
            );
        }
    }

    if !json {
        println!("{with_faces}/{total} frame(s) with a face");
    }
    Ok(())
}

fn run_align(
    config: &Config,
    preview: Option<&Path>,
    max_items: Option<usize>,
    out: Option<&Path>,
    json: bool,
    cancel: CancelToken,
) -> Result<()> {
    ensure_dir(out)?;
    let detector = MeshLandmarkDetector::load(&config.model_dir, config.detector_options())?;
    let source = open_source(config, preview, None, cancel.clone())?;

    let options = AlignStreamOptions {
        align: AlignOptions {
            output_size: config.output_size(),
            record_bbox: config.record_bbox,
        },
        max_items,
        cancel,
    };
    let mut faces = AlignedFaces::new(LandmarkStream::new(source, detector), options);
    if let Some(sink) = preview_sink(preview)? {
        faces = faces.with_preview(sink);
    }

    let mut last_frame = None;
    let mut face_in_frame = 0usize;
    let mut count = 0usize;
    for item in faces.by_ref() {
        let (face, record) = item?;
        if last_frame == Some(record.frame.sequence) {
            face_in_frame += 1;
        } else {
            last_frame = Some(record.frame.sequence);
            face_in_frame = 0;
        }

        let path = out.map(|dir| {
            dir.join(format!("face_{:05}_{}.png", record.frame.sequence, face_in_frame))
        });
        if let Some(path) = &path {
            face.image
                .save(path)
                .with_context(|| format!("saving {}", path.display()))?;
        }

        if json {
            let anchors = AnchorTriple::from_landmarks(
                &record.landmarks,
                record.frame.width(),
                record.frame.height(),
            )
            .ok()
            .map(|a| a.points());
            let summary = AlignmentSummary {
                schema: SCHEMA_VERSION,
                frame: record.frame.sequence,
                face: face_in_frame,
                output: path.as_deref(),
                anchors,
                transform: &record.transform,
                bbox: record.bbox.as_ref(),
                confidence: record.landmarks.confidence,
            };
            println!("{}", serde_json::to_string(&summary)?);
        }
        count += 1;
    }

    if !json {
        println!("Aligned {count} face(s), skipped {}", faces.skipped());
    }
    Ok(())
}
