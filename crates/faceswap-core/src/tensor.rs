//! Conversions between RGB pixels and NCHW `f32` tensors in [0, 1].

use image::{Rgb, RgbImage};
use ndarray::Array4;

/// RGB image → `1×3×H×W` tensor scaled to [0, 1].
pub(crate) fn to_unit_tensor(image: &RgbImage) -> Array4<f32> {
    let (w, h) = image.dimensions();
    let mut tensor = Array4::<f32>::zeros((1, 3, h as usize, w as usize));
    for (x, y, pixel) in image.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = pixel[c] as f32 / 255.0;
        }
    }
    tensor
}

/// Flat planar `[R..., G..., B...]` data in [0, 1] → RGB image.
///
/// Returns `None` when `data` does not hold exactly three `width`×`height` planes.
pub(crate) fn from_unit_planes(data: &[f32], width: u32, height: u32) -> Option<RgbImage> {
    let plane = width as usize * height as usize;
    if data.len() != plane * 3 {
        return None;
    }

    Some(RgbImage::from_fn(width, height, |x, y| {
        let i = y as usize * width as usize + x as usize;
        Rgb(std::array::from_fn(|c| {
            (data[c * plane + i] * 255.0).round().clamp(0.0, 255.0) as u8
        }))
    }))
}
