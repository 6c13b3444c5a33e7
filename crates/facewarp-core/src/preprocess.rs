//! Resampling an RGB frame region into a square NCHW model input tensor.

use image::RgbImage;
use ndarray::Array4;

/// How a square tensor grid lies over the source image.
///
/// Tensor pixel `t` samples source coordinate `origin + (t + 0.5) * step - 0.5`
/// on each axis, so pixel centers line up.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct SampleGrid {
    pub origin_x: f32,
    pub origin_y: f32,
    pub step: f32,
}

impl SampleGrid {
    /// Fit a `width` × `height` image inside a `size` square, centered, keeping aspect.
    pub fn letterbox(width: u32, height: u32, size: usize) -> Letterbox {
        let scale = (size as f32 / width as f32).min(size as f32 / height as f32);
        let new_w = (width as f32 * scale).round();
        let new_h = (height as f32 * scale).round();
        let pad_x = (size as f32 - new_w) / 2.0;
        let pad_y = (size as f32 - new_h) / 2.0;
        Letterbox { scale, pad_x, pad_y }
    }

    /// Source position of tensor pixel `(tx, ty)`.
    fn source(&self, tx: usize, ty: usize) -> (f32, f32) {
        (
            self.origin_x + (tx as f32 + 0.5) * self.step - 0.5,
            self.origin_y + (ty as f32 + 0.5) * self.step - 0.5,
        )
    }
}

/// Metadata for coordinate de-mapping after letterbox resize.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
}

impl Letterbox {
    pub fn grid(&self) -> SampleGrid {
        SampleGrid {
            origin_x: -self.pad_x / self.scale,
            origin_y: -self.pad_y / self.scale,
            step: 1.0 / self.scale,
        }
    }

    /// Map a point in letterboxed tensor space back to source pixels.
    pub fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// What to sample where the grid leaves the source image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Border {
    /// Fixed raw pixel value (before normalization).
    Constant(f32),
    Replicate,
}

/// Bilinearly resample `image` over `grid` into a `[1, 3, size, size]` tensor,
/// mapping each raw channel value through `normalize`.
pub(crate) fn rgb_to_nchw(
    image: &RgbImage,
    size: usize,
    grid: SampleGrid,
    border: Border,
    normalize: impl Fn(f32) -> f32,
) -> Array4<f32> {
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return tensor;
    }
    let max_x = (w - 1) as f32;
    let max_y = (h - 1) as f32;

    for ty in 0..size {
        for tx in 0..size {
            let (sx, sy) = grid.source(tx, ty);
            let outside = sx < -0.5 || sy < -0.5 || sx > max_x + 0.5 || sy > max_y + 0.5;

            let rgb = match border {
                Border::Constant(v) if outside => [v; 3],
                _ => bilinear(image, sx.clamp(0.0, max_x), sy.clamp(0.0, max_y)),
            };

            for (ch, value) in rgb.into_iter().enumerate() {
                tensor[[0, ch, ty, tx]] = normalize(value);
            }
        }
    }

    tensor
}

fn bilinear(image: &RgbImage, x: f32, y: f32) -> [f32; 3] {
    let (w, h) = image.dimensions();
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let tl = image.get_pixel(x0, y0).0;
    let tr = image.get_pixel(x1, y0).0;
    let bl = image.get_pixel(x0, y1).0;
    let br = image.get_pixel(x1, y1).0;

    std::array::from_fn(|ch| {
        tl[ch] as f32 * (1.0 - fx) * (1.0 - fy)
            + tr[ch] as f32 * fx * (1.0 - fy)
            + bl[ch] as f32 * (1.0 - fx) * fy
            + br[ch] as f32 * fx * fy
    })
}
