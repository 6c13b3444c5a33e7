//! V4L2 camera capture via the `v4l` crate.

use crate::frame::{self, Frame};
use crate::source::CaptureDevice;
use image::RgbImage;
use std::path::Path;
use thiserror::Error;
use v4l::buffer::Type as BufType;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

/// Requested capture resolution; the driver may negotiate something else.
const REQUESTED_WIDTH: u32 = 640;
const REQUESTED_HEIGHT: u32 = 480;
const MMAP_BUFFERS: u32 = 4;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("capture failed: {0}")]
    CaptureFailed(String),
    #[error("device busy")]
    DeviceBusy,
    #[error("format negotiation failed: {0}")]
    FormatNegotiationFailed(String),
    #[error("streaming not supported")]
    StreamingNotSupported,
}

/// Info about a discovered V4L2 device.
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub name: String,
    pub driver: String,
    pub bus: String,
}

/// Negotiated pixel format for the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// Packed 24-bit RGB (3 bytes/pixel, used as-is).
    Rgb3,
    /// YUYV 4:2:2 packed (2 bytes/pixel).
    Yuyv,
    /// 8-bit grayscale (1 byte/pixel, expanded to RGB).
    Grey,
    /// Motion-JPEG, one compressed image per buffer.
    Mjpg,
}

impl PixelFormat {
    fn from_fourcc(fourcc: FourCC) -> Option<Self> {
        match &fourcc.repr {
            b"RGB3" => Some(Self::Rgb3),
            b"YUYV" => Some(Self::Yuyv),
            b"GREY" => Some(Self::Grey),
            b"MJPG" => Some(Self::Mjpg),
            _ => None,
        }
    }
}

/// V4L2 camera device handle. The device is released when this is dropped.
pub struct Camera {
    // Declared before `device` so the buffers are unmapped before the handle closes.
    stream: MmapStream<'static>,
    #[allow(dead_code)]
    device: Device,
    pub width: u32,
    pub height: u32,
    pub device_path: String,
    pub fourcc: FourCC,
    pixel_format: PixelFormat,
}

impl Camera {
    /// Open a V4L2 camera device by path (e.g., "/dev/video0") and start streaming.
    pub fn open(device_path: &str) -> Result<Self, CameraError> {
        if !Path::new(device_path).exists() {
            return Err(CameraError::DeviceUnavailable(format!(
                "{device_path}: no such device"
            )));
        }

        let device = Device::with_path(device_path).map_err(|e| {
            if e.to_string().contains("busy") || e.to_string().contains("EBUSY") {
                CameraError::DeviceBusy
            } else {
                CameraError::DeviceUnavailable(format!("{device_path}: {e}"))
            }
        })?;

        let caps = device.query_caps().map_err(|e| {
            CameraError::DeviceUnavailable(format!("failed to query capabilities: {e}"))
        })?;

        tracing::info!(
            device = device_path,
            driver = %caps.driver,
            card = %caps.card,
            "opened camera"
        );

        if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
            return Err(CameraError::StreamingNotSupported);
        }

        // Ask for YUYV at 640x480; accept whatever supported format the driver settles on.
        let mut fmt = device.format().map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to get format: {e}"))
        })?;
        fmt.fourcc = FourCC::new(b"YUYV");
        fmt.width = REQUESTED_WIDTH;
        fmt.height = REQUESTED_HEIGHT;

        let negotiated = device.set_format(&fmt).map_err(|e| {
            CameraError::FormatNegotiationFailed(format!("failed to set format: {e}"))
        })?;

        let fourcc = negotiated.fourcc;
        let pixel_format = PixelFormat::from_fourcc(fourcc).ok_or_else(|| {
            CameraError::FormatNegotiationFailed(format!(
                "unsupported pixel format: {fourcc:?} (need RGB3, YUYV, GREY, or MJPG)"
            ))
        })?;

        tracing::info!(
            width = negotiated.width,
            height = negotiated.height,
            fourcc = ?fourcc,
            "negotiated format"
        );

        let stream = MmapStream::with_buffers(&device, BufType::VideoCapture, MMAP_BUFFERS)
            .map_err(|e| {
                CameraError::DeviceUnavailable(format!("failed to create mmap stream: {e}"))
            })?;

        Ok(Self {
            stream,
            device,
            width: negotiated.width,
            height: negotiated.height,
            device_path: device_path.to_string(),
            fourcc,
            pixel_format,
        })
    }

    /// Capture a single frame, converting it to RGB.
    pub fn capture_frame(&mut self) -> Result<Frame, CameraError> {
        let (buf, meta) = self
            .stream
            .next()
            .map_err(|e| CameraError::CaptureFailed(format!("failed to dequeue buffer: {e}")))?;

        let sequence = meta.sequence;
        let image = buf_to_rgb(self.pixel_format, buf, self.width, self.height)?;
        tracing::debug!(seq = sequence, bytes = buf.len(), "captured frame");

        Ok(Frame::new(image, sequence))
    }

    /// List available V4L2 video capture devices.
    pub fn list_devices() -> Vec<DeviceInfo> {
        let mut devices = Vec::new();

        for i in 0..16 {
            let path = format!("/dev/video{i}");
            if !Path::new(&path).exists() {
                continue;
            }
            let Ok(dev) = Device::with_path(&path) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            if !caps.capabilities.contains(v4l::capability::Flags::VIDEO_CAPTURE) {
                continue;
            }
            devices.push(DeviceInfo {
                path,
                name: caps.card.clone(),
                driver: caps.driver.clone(),
                bus: caps.bus.clone(),
            });
        }

        devices
    }
}

impl CaptureDevice for Camera {
    fn read_frame(&mut self) -> Result<Frame, CameraError> {
        self.capture_frame()
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        tracing::info!(device = %self.device_path, "released camera");
    }
}

/// Convert a raw buffer in the negotiated format to an RGB image.
fn buf_to_rgb(
    format: PixelFormat,
    buf: &[u8],
    width: u32,
    height: u32,
) -> Result<RgbImage, CameraError> {
    let rgb = match format {
        PixelFormat::Mjpg => {
            let image = frame::decode_mjpeg(buf)
                .map_err(|e| CameraError::CaptureFailed(e.to_string()))?;
            if image.dimensions() != (width, height) {
                return Err(CameraError::CaptureFailed(format!(
                    "MJPG frame is {}x{}, expected {width}x{height}",
                    image.width(),
                    image.height()
                )));
            }
            return Ok(image);
        }
        PixelFormat::Rgb3 => {
            let expected = (width * height * 3) as usize;
            if buf.len() < expected {
                return Err(CameraError::CaptureFailed(format!(
                    "RGB3 buffer too short: expected {expected}, got {}",
                    buf.len()
                )));
            }
            buf[..expected].to_vec()
        }
        PixelFormat::Yuyv => frame::yuyv_to_rgb(buf, width, height)
            .map_err(|e| CameraError::CaptureFailed(e.to_string()))?,
        PixelFormat::Grey => frame::grey_to_rgb(buf, width, height)
            .map_err(|e| CameraError::CaptureFailed(e.to_string()))?,
    };

    RgbImage::from_raw(width, height, rgb)
        .ok_or_else(|| CameraError::CaptureFailed("failed to build RGB image".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_format_from_fourcc() {
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"YUYV")), Some(PixelFormat::Yuyv));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"MJPG")), Some(PixelFormat::Mjpg));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"RGB3")), Some(PixelFormat::Rgb3));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"GREY")), Some(PixelFormat::Grey));
        assert_eq!(PixelFormat::from_fourcc(FourCC::new(b"NV12")), None);
    }

    #[test]
    fn test_buf_to_rgb_grey() {
        let img = buf_to_rgb(PixelFormat::Grey, &[10, 20, 30, 40], 2, 2).unwrap();
        assert_eq!(img.get_pixel(1, 1).0, [40, 40, 40]);
    }

    #[test]
    fn test_buf_to_rgb_rgb3_short_buffer() {
        let err = buf_to_rgb(PixelFormat::Rgb3, &[0u8; 5], 2, 1).unwrap_err();
        assert!(matches!(err, CameraError::CaptureFailed(_)));
    }

    #[test]
    fn test_buf_to_rgb_yuyv() {
        let img = buf_to_rgb(PixelFormat::Yuyv, &[50, 128, 60, 128], 2, 1).unwrap();
        assert_eq!(img.get_pixel(0, 0).0, [50, 50, 50]);
        assert_eq!(img.get_pixel(1, 0).0, [60, 60, 60]);
    }

    #[test]
    fn test_open_missing_device() {
        let err = Camera::open("/dev/facewarp-does-not-exist").err().unwrap();
        assert!(matches!(err, CameraError::DeviceUnavailable(_)));
    }
}
