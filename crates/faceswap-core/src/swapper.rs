//! Face swap boundary and the InSwapper model via ONNX Runtime.
//!
//! The model works on a 128×128 aligned crop of the face being replaced plus
//! the identity embedding of the donor face. Its output crop is pasted back
//! into the full image through the inverse alignment with a feathered edge.

use crate::alignment::{self, sample_bilinear, to_u8, SimilarityTransform};
use crate::tensor::{from_unit_planes, to_unit_tensor};
use crate::types::{FaceDescriptor, Image};
use image::{Rgb, RgbImage};
use ndarray::Array2;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const INSWAPPER_INPUT_SIZE: usize = 128;
/// Width of the blend ramp at the crop edge, in aligned-crop pixels.
const PASTE_FEATHER: f32 = 8.0;

#[derive(Error, Debug)]
pub enum SwapError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("source face has no landmarks to align on")]
    MissingLandmarks,
    #[error("target face has no identity embedding")]
    MissingEmbedding,
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Swap model boundary (`pasteBack: true`).
///
/// Replaces the face described by `source_face` inside `image` with the
/// identity of `target_face`, returning a full image of the same dimensions.
pub trait FaceSwapper {
    fn swap(
        &mut self,
        image: &Image,
        source_face: &FaceDescriptor,
        target_face: &FaceDescriptor,
    ) -> Result<RgbImage, SwapError>;
}

/// InsightFace-style 128px face swapper.
///
/// The identity input is the L2-normalized ArcFace embedding; models that need
/// an extra latent projection must have it folded into the graph.
pub struct InSwapper {
    session: Session,
}

impl InSwapper {
    pub fn load(model_path: &Path, intra_threads: usize) -> Result<Self, SwapError> {
        if !model_path.exists() {
            return Err(SwapError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded swap model"
        );

        Ok(Self { session })
    }
}

impl FaceSwapper for InSwapper {
    fn swap(
        &mut self,
        image: &Image,
        source_face: &FaceDescriptor,
        target_face: &FaceDescriptor,
    ) -> Result<RgbImage, SwapError> {
        let landmarks = source_face
            .detection
            .landmarks
            .as_ref()
            .ok_or(SwapError::MissingLandmarks)?;
        let identity = target_face
            .embedding
            .as_ref()
            .ok_or(SwapError::MissingEmbedding)?;

        let (aligned, transform) =
            alignment::align_face(image.pixels(), landmarks, INSWAPPER_INPUT_SIZE);
        let target = to_unit_tensor(&aligned);
        let source = Array2::from_shape_vec((1, identity.values.len()), identity.values.clone())
            .map_err(|e| SwapError::InferenceFailed(format!("identity tensor: {e}")))?;

        let outputs = self.session.run(ort::inputs![
            "target" => TensorRef::from_array_view(target.view())?,
            "source" => TensorRef::from_array_view(source.view())?
        ])?;

        let (_, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| SwapError::InferenceFailed(format!("swap output: {e}")))?;
        let size = INSWAPPER_INPUT_SIZE as u32;
        let swapped = from_unit_planes(data, size, size).ok_or_else(|| {
            SwapError::InferenceFailed(format!(
                "expected a 3x{size}x{size} face, got {} values",
                data.len()
            ))
        })?;

        tracing::debug!(
            origin = %image.origin(),
            confidence = source_face.detection.confidence,
            "swap model produced aligned face"
        );

        Ok(paste_back(image.pixels(), &swapped, &transform))
    }
}

/// Blend weight of an aligned-space position: 1 well inside the crop, ramping
/// to 0 at its border.
fn feather_weight(u: f32, v: f32, size: f32) -> f32 {
    let edge = u.min(v).min(size - 1.0 - u).min(size - 1.0 - v);
    if edge <= 0.0 {
        0.0
    } else {
        (edge / PASTE_FEATHER).min(1.0)
    }
}

/// Paste an aligned face crop back into a copy of `base`.
fn paste_back(base: &RgbImage, face: &RgbImage, transform: &SimilarityTransform) -> RgbImage {
    let mut output = base.clone();
    let Some(inverse) = transform.inverse() else {
        return output;
    };

    let size = face.width() as f32;
    let corners = [(0.0, 0.0), (size, 0.0), (0.0, size), (size, size)].map(|(u, v)| inverse.apply(u, v));
    let xs = corners.map(|c| c.0);
    let ys = corners.map(|c| c.1);
    let lower = |vals: [f32; 4]| vals.into_iter().fold(f32::INFINITY, f32::min).floor().max(0.0) as u32;
    let upper = |vals: [f32; 4]| vals.into_iter().fold(f32::NEG_INFINITY, f32::max).ceil().max(0.0) as u32;
    let (min_x, max_x) = (lower(xs), upper(xs).min(base.width()));
    let (min_y, max_y) = (lower(ys), upper(ys).min(base.height()));

    for y in min_y..max_y {
        for x in min_x..max_x {
            let (u, v) = transform.apply(x as f32, y as f32);
            let weight = feather_weight(u, v, size);
            if weight <= 0.0 {
                continue;
            }
            let swapped = sample_bilinear(face, u, v);
            let original = base.get_pixel(x, y);
            let blended: [u8; 3] = std::array::from_fn(|c| {
                to_u8(swapped[c] * weight + original[c] as f32 * (1.0 - weight))
            });
            output.put_pixel(x, y, Rgb(blended));
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feather_weight_profile() {
        assert_eq!(feather_weight(0.0, 50.0, 128.0), 0.0);
        assert_eq!(feather_weight(-3.0, 50.0, 128.0), 0.0);
        assert!((feather_weight(4.0, 50.0, 128.0) - 0.5).abs() < 1e-6);
        assert_eq!(feather_weight(64.0, 64.0, 128.0), 1.0);
    }

    #[test]
    fn test_paste_back_keeps_dimensions_and_outside_pixels() {
        let base = RgbImage::from_pixel(300, 200, Rgb([10, 20, 30]));
        let face = RgbImage::from_pixel(128, 128, Rgb([200, 200, 200]));
        // Aligned crop covers image pixels [50, 178) × [40, 168)
        let transform = SimilarityTransform { a: 1.0, b: 0.0, tx: -50.0, ty: -40.0 };

        let out = paste_back(&base, &face, &transform);

        assert_eq!(out.dimensions(), base.dimensions());
        assert_eq!(*out.get_pixel(5, 5), Rgb([10, 20, 30]));
        assert_eq!(*out.get_pixel(250, 190), Rgb([10, 20, 30]));
        assert_eq!(*out.get_pixel(114, 104), Rgb([200, 200, 200]));
        // Inside the feather band the two are mixed
        let edge = out.get_pixel(52, 104)[0];
        assert!(edge > 10 && edge < 200, "edge = {edge}");
    }

    #[test]
    fn test_missing_model_file() {
        let result = InSwapper::load(Path::new("/nonexistent/FaceFusion-SoC.onnx"), 1);
        assert!(matches!(result, Err(SwapError::ModelNotFound(_))));
    }
}
