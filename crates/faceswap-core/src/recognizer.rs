//! ArcFace face recognizer via ONNX Runtime.
//!
//! Extracts 512-dimensional identity embeddings from aligned face crops,
//! using the w600k_r50 ArcFace model. The swap model consumes these as the
//! identity of the face being transplanted.

use crate::alignment;
use crate::types::{BoundingBox, Embedding};
use image::RgbImage;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// Symmetric normalization, unlike SCRFD.
const ARCFACE_INPUT_SIZE: usize = 112;
const ARCFACE_MEAN: f32 = 127.5;
const ARCFACE_STD: f32 = 127.5;
const ARCFACE_EMBEDDING_DIM: usize = 512;
const ARCFACE_MODEL_VERSION: &str = "w600k_r50";

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("recognition model not found: {0}")]
    ModelNotFound(String),
    #[error("recognition inference failed: {0}")]
    InferenceFailed(String),
    #[error("cannot align a face without landmarks")]
    NoLandmarks,
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// ArcFace identity encoder.
pub struct FaceRecognizer {
    session: Session,
}

impl FaceRecognizer {
    pub fn load(model_path: &Path, intra_threads: usize) -> Result<Self, RecognizerError> {
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(intra_threads)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded ArcFace model"
        );

        Ok(Self { session })
    }

    /// Extract an identity embedding for a detected face.
    ///
    /// The face is aligned to the canonical 112×112 position first, so the
    /// detector must have produced landmarks.
    pub fn extract(
        &mut self,
        image: &RgbImage,
        face: &BoundingBox,
    ) -> Result<Embedding, RecognizerError> {
        let landmarks = face.landmarks.as_ref().ok_or(RecognizerError::NoLandmarks)?;
        let (aligned, _) = alignment::align_face(image, landmarks, ARCFACE_INPUT_SIZE);
        let input = preprocess(&aligned);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let raw = outputs[0]
            .try_extract_tensor::<f32>()
            .map(|(_, data)| data.to_vec())
            .map_err(|e| RecognizerError::InferenceFailed(e.to_string()))?;
        if raw.len() != ARCFACE_EMBEDDING_DIM {
            return Err(RecognizerError::InferenceFailed(format!(
                "embedding has {} values, want {ARCFACE_EMBEDDING_DIM}",
                raw.len()
            )));
        }

        let embedding = Embedding::normalized(raw, Some(ARCFACE_MODEL_VERSION.into()));
        tracing::debug!(confidence = face.confidence, "identity embedding extracted");
        Ok(embedding)
    }
}

/// NCHW tensor of an aligned crop, each channel mapped to [-1, 1].
fn preprocess(aligned: &RgbImage) -> Array4<f32> {
    let size = ARCFACE_INPUT_SIZE;
    Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
        aligned
            .get_pixel_checked(x as u32, y as u32)
            .map_or(0.0, |p| (p[c] as f32 - ARCFACE_MEAN) / ARCFACE_STD)
    })
}
