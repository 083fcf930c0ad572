use faceswap_core::{Device, EnhancerVariant};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable naming an optional TOML config file.
pub const CONFIG_ENV: &str = "FACESWAP_CONFIG";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Pipeline configuration, fixed at startup.
///
/// Sources, later wins: built-in defaults, the TOML file named by
/// `FACESWAP_CONFIG`, `FACESWAP_*` environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Where uploads are staged.
    pub content_dir: PathBuf,
    /// Root of the output archive.
    pub output_dir: PathBuf,
    /// SCRFD detection model, relative to `model_dir`.
    pub detector_model: String,
    /// ArcFace recognition model, relative to `model_dir`.
    pub recognizer_model: String,
    /// Face swap model, relative to `model_dir`.
    pub swap_model: String,
    /// Enhancer used when a swap asks for enhancement without naming one.
    pub enhancer: EnhancerVariant,
    /// Device for enhancement inference.
    pub device: Device,
    /// Square detector input size.
    pub detect_size: usize,
    /// Default number of history entries to list.
    pub history_limit: usize,
    /// ONNX Runtime intra-op threads per model.
    pub intra_threads: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("model"),
            content_dir: PathBuf::from("assets"),
            output_dir: PathBuf::from("outputs"),
            detector_model: "det_10g.onnx".to_string(),
            recognizer_model: "w600k_r50.onnx".to_string(),
            swap_model: "FaceFusion-SoC.onnx".to_string(),
            enhancer: EnhancerVariant::default(),
            device: Device::default(),
            detect_size: 640,
            history_limit: 5,
            intra_threads: 2,
        }
    }
}

impl Config {
    /// Load from the optional config file, then apply `FACESWAP_*` overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Apply `FACESWAP_*` overrides read through `lookup`.
    ///
    /// Unparsable values are logged and ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("FACESWAP_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("FACESWAP_CONTENT_DIR") {
            self.content_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("FACESWAP_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("FACESWAP_DETECTOR_MODEL") {
            self.detector_model = v;
        }
        if let Some(v) = lookup("FACESWAP_RECOGNIZER_MODEL") {
            self.recognizer_model = v;
        }
        if let Some(v) = lookup("FACESWAP_SWAP_MODEL") {
            self.swap_model = v;
        }
        override_parsed(&lookup, "FACESWAP_ENHANCER", &mut self.enhancer);
        override_parsed(&lookup, "FACESWAP_DEVICE", &mut self.device);
        override_parsed(&lookup, "FACESWAP_DETECT_SIZE", &mut self.detect_size);
        override_parsed(&lookup, "FACESWAP_HISTORY_LIMIT", &mut self.history_limit);
        override_parsed(&lookup, "FACESWAP_INTRA_THREADS", &mut self.intra_threads);
    }

    pub fn detector_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.detector_model)
    }

    pub fn recognizer_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.recognizer_model)
    }

    pub fn swap_model_path(&self) -> PathBuf {
        self.model_dir.join(&self.swap_model)
    }

    pub fn enhancer_model_path(&self, variant: EnhancerVariant) -> PathBuf {
        self.model_dir.join(variant.model_file())
    }
}

fn override_parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.parse() {
        Ok(value) => *slot = value,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparsable config override"),
    }
}
