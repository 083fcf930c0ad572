//! Load state of a model-backed capability.
//!
//! Models load once. A missing or broken model disables its capability only;
//! the slot remembers why so calls can fail with a precise error.

use serde::Serialize;
use std::fmt::Display;
use std::path::{Path, PathBuf};

pub enum ModelSlot<T> {
    Loaded { model: T, path: PathBuf },
    Missing { path: PathBuf },
    Failed { path: PathBuf, reason: String },
}

impl<T> ModelSlot<T> {
    /// Load the model at `path` unless the file is absent.
    pub fn load<E: Display>(path: PathBuf, load: impl FnOnce(&Path) -> Result<T, E>) -> Self {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "model file not found; capability disabled");
            return ModelSlot::Missing { path };
        }
        match load(&path) {
            Ok(model) => ModelSlot::Loaded { model, path },
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "model failed to load; capability disabled");
                ModelSlot::Failed {
                    path,
                    reason: e.to_string(),
                }
            }
        }
    }

    /// A slot holding an already constructed model.
    pub fn ready(model: T, path: impl Into<PathBuf>) -> Self {
        ModelSlot::Loaded {
            model,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            ModelSlot::Loaded { path, .. }
            | ModelSlot::Missing { path }
            | ModelSlot::Failed { path, .. } => path,
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, ModelSlot::Loaded { .. })
    }

    pub fn status(&self) -> SlotStatus {
        let (state, reason) = match self {
            ModelSlot::Loaded { .. } => (SlotState::Loaded, None),
            ModelSlot::Missing { .. } => (SlotState::Missing, None),
            ModelSlot::Failed { reason, .. } => (SlotState::Failed, Some(reason.clone())),
        };
        SlotStatus {
            path: self.path().to_path_buf(),
            state,
            reason,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotState {
    Loaded,
    Missing,
    Failed,
}

/// Reportable view of a [`ModelSlot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotStatus {
    pub path: PathBuf,
    pub state: SlotState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}
