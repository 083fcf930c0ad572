//! Image enhancement boundary and Real-ESRGAN upscaling via ONNX Runtime.

use crate::tensor::{from_unit_planes, to_unit_tensor};
use image::RgbImage;
use ort::execution_providers::{CUDAExecutionProvider, ExecutionProvider};
use ort::session::Session;
use ort::value::TensorRef;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnhanceError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("enhancer returned {actual:?}, expected {expected:?}")]
    UnexpectedSize {
        expected: (u32, u32),
        actual: (u32, u32),
    },
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Enhancement model boundary: a pure image → image transform.
pub trait Enhancer {
    fn enhance(&mut self, image: &RgbImage) -> Result<RgbImage, EnhanceError>;
}

/// Selectable enhancement model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EnhancerVariant {
    #[default]
    #[serde(rename = "realesrgan-2x")]
    RealEsrgan2x,
    #[serde(rename = "realesrgan-4x")]
    RealEsrgan4x,
    #[serde(rename = "realesrgan-8x")]
    RealEsrgan8x,
}

impl EnhancerVariant {
    pub const ALL: [EnhancerVariant; 3] = [
        EnhancerVariant::RealEsrgan2x,
        EnhancerVariant::RealEsrgan4x,
        EnhancerVariant::RealEsrgan8x,
    ];

    /// Upscale factor applied to both axes.
    pub fn scale(self) -> u32 {
        match self {
            EnhancerVariant::RealEsrgan2x => 2,
            EnhancerVariant::RealEsrgan4x => 4,
            EnhancerVariant::RealEsrgan8x => 8,
        }
    }

    /// Model file name inside the model directory.
    pub fn model_file(self) -> &'static str {
        match self {
            EnhancerVariant::RealEsrgan2x => "RealESRGAN_x2.onnx",
            EnhancerVariant::RealEsrgan4x => "RealESRGAN_x4.onnx",
            EnhancerVariant::RealEsrgan8x => "RealESRGAN_x8.onnx",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EnhancerVariant::RealEsrgan2x => "realesrgan-2x",
            EnhancerVariant::RealEsrgan4x => "realesrgan-4x",
            EnhancerVariant::RealEsrgan8x => "realesrgan-8x",
        }
    }
}

impl fmt::Display for EnhancerVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnhancerVariant {
    type Err = String;

    /// Accepts `realesrgan-2x`, `REAL-ESRGAN 2x`, `2x` and similar spellings.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized: String = value
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.trim_start_matches("realesrgan") {
            "2x" | "x2" => Ok(EnhancerVariant::RealEsrgan2x),
            "4x" | "x4" => Ok(EnhancerVariant::RealEsrgan4x),
            "8x" | "x8" => Ok(EnhancerVariant::RealEsrgan8x),
            _ => Err(format!("unknown enhancer '{value}'")),
        }
    }
}

/// Inference device for the enhancement model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    #[default]
    Cpu,
    Cuda,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Device::Cpu => "cpu",
            Device::Cuda => "cuda",
        })
    }
}

impl FromStr for Device {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(Device::Cpu),
            "cuda" | "gpu" => Ok(Device::Cuda),
            other => Err(format!("unknown device '{other}'")),
        }
    }
}

/// Real-ESRGAN upscaler.
pub struct EsrganEnhancer {
    session: Session,
    variant: EnhancerVariant,
    device: Device,
}

impl EsrganEnhancer {
    /// Path of the model file for `variant` under `model_dir`.
    pub fn model_path(model_dir: &Path, variant: EnhancerVariant) -> PathBuf {
        model_dir.join(variant.model_file())
    }

    /// Load the model for `variant`.
    ///
    /// Requesting [`Device::Cuda`] when no CUDA provider is available logs a
    /// warning and runs on the CPU.
    pub fn load(
        model_dir: &Path,
        variant: EnhancerVariant,
        device: Device,
        intra_threads: usize,
    ) -> Result<Self, EnhanceError> {
        let path = Self::model_path(model_dir, variant);
        if !path.exists() {
            return Err(EnhanceError::ModelNotFound(path.display().to_string()));
        }

        let mut builder = Session::builder()?.with_intra_threads(intra_threads)?;
        let device = match device {
            Device::Cuda => {
                let cuda = CUDAExecutionProvider::default();
                if cuda.is_available().unwrap_or(false) {
                    builder = builder.with_execution_providers([cuda.build()])?;
                    Device::Cuda
                } else {
                    tracing::warn!(
                        variant = %variant,
                        "CUDA requested but not available; enhancement will run on CPU (slow)"
                    );
                    Device::Cpu
                }
            }
            Device::Cpu => {
                tracing::warn!(variant = %variant, "enhancement running on CPU; this can be slow");
                Device::Cpu
            }
        };
        let session = builder.commit_from_file(&path)?;

        tracing::info!(path = %path.display(), %variant, %device, "loaded enhancement model");

        Ok(Self {
            session,
            variant,
            device,
        })
    }

    pub fn variant(&self) -> EnhancerVariant {
        self.variant
    }

    /// Device the model actually runs on.
    pub fn device(&self) -> Device {
        self.device
    }
}

impl Enhancer for EsrganEnhancer {
    fn enhance(&mut self, image: &RgbImage) -> Result<RgbImage, EnhanceError> {
        let (width, height) = image.dimensions();
        let scale = self.variant.scale();
        let expected = (width * scale, height * scale);

        let input = to_unit_tensor(image);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| EnhanceError::InferenceFailed(format!("enhancer output: {e}")))?;
        if shape.len() != 4 || shape[1] != 3 {
            return Err(EnhanceError::InferenceFailed(format!(
                "expected NCHW RGB output, got shape {shape:?}"
            )));
        }

        let actual = (shape[3] as u32, shape[2] as u32);
        if actual != expected {
            return Err(EnhanceError::UnexpectedSize { expected, actual });
        }

        tracing::debug!(from = ?(width, height), to = ?actual, "enhanced image");
        from_unit_planes(data, actual.0, actual.1).ok_or_else(|| {
            EnhanceError::InferenceFailed(format!("output holds {} values for {actual:?}", data.len()))
        })
    }
}
