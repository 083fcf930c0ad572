use crate::session::SessionState;
use faceswap_store::ArchiveError;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Which of the two uploaded images an error or face refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Source,
    Target,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Side::Source => "source",
            Side::Target => "target",
        })
    }
}

/// Model-backed capability of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityKind {
    Detection,
    Swap,
    Enhancement,
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CapabilityKind::Detection => "detection",
            CapabilityKind::Swap => "swap",
            CapabilityKind::Enhancement => "enhancement",
        })
    }
}

/// Errors surfaced by pipeline operations.
///
/// Every variant ends only the operation that raised it; the pipeline and its
/// current session stay usable.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("invalid image: {0}")]
    InvalidImage(String),
    #[error("face detection unavailable: {0}")]
    DetectionUnavailable(String),
    #[error("no faces detected in the {side} image")]
    NoFacesDetected { side: Side },
    #[error("{side} face index {index} out of range ({count} detected)")]
    IndexOutOfRange {
        side: Side,
        index: usize,
        count: usize,
    },
    #[error("session is {state}, not ready for this operation")]
    SessionNotReady { state: SessionState },
    #[error("no images uploaded")]
    NoSession,
    #[error("{capability} model not found at {}", path.display())]
    ModelNotFound {
        capability: CapabilityKind,
        path: PathBuf,
    },
    #[error("swap failed: {0}")]
    SwapFailed(String),
    #[error("enhancement failed: {0}")]
    EnhancementFailed(String),
    #[error("failed to archive result: {0}")]
    ArchiveWriteFailed(#[source] ArchiveError),
    #[error("failed to read history: {0}")]
    ArchiveReadFailed(#[source] ArchiveError),
}
