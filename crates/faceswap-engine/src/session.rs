//! Swap session: the state of one detect → select → swap cycle.
//!
//! ```text
//! Empty → Detecting → Ready → (Swapping → Ready)* → Invalidated
//!             └──────────────(no faces)──────────────┘
//! ```
//!
//! Any state moves to `Invalidated` when new images replace the session.

use crate::error::{PipelineError, Side};
use faceswap_core::{FaceRecord, Image};
use serde::Serialize;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Empty,
    Detecting,
    Ready,
    Swapping,
    Invalidated,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionState::Empty => "empty",
            SessionState::Detecting => "detecting",
            SessionState::Ready => "ready",
            SessionState::Swapping => "swapping",
            SessionState::Invalidated => "invalidated",
        })
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("cannot {operation} while session is {state}")]
    WrongState {
        state: SessionState,
        operation: &'static str,
    },
    #[error("no faces detected in the {side} image")]
    NoFaces { side: Side },
    #[error("{side} face index {index} out of range ({count} detected)")]
    IndexOutOfRange {
        side: Side,
        index: usize,
        count: usize,
    },
}

impl From<SessionError> for PipelineError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::WrongState { state, .. } => PipelineError::SessionNotReady { state },
            SessionError::NoFaces { side } => PipelineError::NoFacesDetected { side },
            SessionError::IndexOutOfRange { side, index, count } => {
                PipelineError::IndexOutOfRange { side, index, count }
            }
        }
    }
}

struct ImagePair {
    source: Image,
    target: Image,
}

/// The faces picked for one swap, borrowed from the session.
pub struct Selection<'a> {
    pub source_image: &'a Image,
    pub source_face: &'a FaceRecord,
    pub target_face: &'a FaceRecord,
}

/// Owned state for one pair of uploaded images.
///
/// The session enforces its own state machine; face lists are only reachable
/// while it is `Ready`.
pub struct SwapSession {
    id: Uuid,
    state: SessionState,
    images: Option<ImagePair>,
    source_faces: Vec<FaceRecord>,
    target_faces: Vec<FaceRecord>,
}

impl Default for SwapSession {
    fn default() -> Self {
        Self::new()
    }
}

impl SwapSession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            state: SessionState::Empty,
            images: None,
            source_faces: Vec::new(),
            target_faces: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Supply the image pair. `Empty → Detecting`.
    pub fn supply(&mut self, source: Image, target: Image) -> Result<(), SessionError> {
        self.require(SessionState::Empty, "supply images")?;
        tracing::debug!(
            session = %self.id,
            source = %source.origin(),
            target = %target.origin(),
            "session images supplied"
        );
        self.images = Some(ImagePair { source, target });
        self.state = SessionState::Detecting;
        Ok(())
    }

    /// Images to run detection on.
    ///
    /// Valid while `Detecting`, or `Ready` to detect again. The state and any
    /// detected faces are left untouched until [`Self::complete_detection`].
    pub fn detection_input(&self) -> Result<(&Image, &Image), SessionError> {
        if !matches!(self.state, SessionState::Detecting | SessionState::Ready) {
            return Err(SessionError::WrongState {
                state: self.state,
                operation: "detect faces",
            });
        }
        let pair = self.images.as_ref().ok_or(SessionError::WrongState {
            state: self.state,
            operation: "detect faces",
        })?;
        Ok((&pair.source, &pair.target))
    }

    /// Record detection output. `Detecting → Ready`, or `→ Invalidated` when
    /// either side has no faces. A `Ready` session has its faces replaced.
    pub fn complete_detection(
        &mut self,
        source_faces: Vec<FaceRecord>,
        target_faces: Vec<FaceRecord>,
    ) -> Result<(), SessionError> {
        if !matches!(self.state, SessionState::Detecting | SessionState::Ready) {
            return Err(SessionError::WrongState {
                state: self.state,
                operation: "complete detection",
            });
        }

        let empty_side = if source_faces.is_empty() {
            Some(Side::Source)
        } else if target_faces.is_empty() {
            Some(Side::Target)
        } else {
            None
        };
        if let Some(side) = empty_side {
            tracing::warn!(
                session = %self.id,
                %side,
                source_faces = source_faces.len(),
                target_faces = target_faces.len(),
                "no faces detected; session invalidated"
            );
            self.invalidate();
            return Err(SessionError::NoFaces { side });
        }

        tracing::info!(
            session = %self.id,
            source_faces = source_faces.len(),
            target_faces = target_faces.len(),
            "session ready"
        );
        self.source_faces = source_faces;
        self.target_faces = target_faces;
        self.state = SessionState::Ready;
        Ok(())
    }

    /// Discard images and faces. Any state → `Invalidated`.
    pub fn invalidate(&mut self) {
        if self.state != SessionState::Invalidated {
            tracing::debug!(session = %self.id, from = %self.state, "session invalidated");
        }
        self.images = None;
        self.source_faces = Vec::new();
        self.target_faces = Vec::new();
        self.state = SessionState::Invalidated;
    }

    /// The supplied source and target images, if any.
    pub fn images(&self) -> Option<(&Image, &Image)> {
        self.images.as_ref().map(|pair| (&pair.source, &pair.target))
    }

    /// Detected faces per side, in detection order. Only while `Ready`.
    pub fn faces(&self) -> Result<(&[FaceRecord], &[FaceRecord]), SessionError> {
        self.require(SessionState::Ready, "list faces")?;
        Ok((&self.source_faces, &self.target_faces))
    }

    /// Run `swap` against the selected faces. `Ready → Swapping → Ready`.
    ///
    /// State and both indices are validated before `swap` is called; an index
    /// outside the detected range is never clamped.
    pub fn with_selection<T>(
        &mut self,
        source_index: usize,
        target_index: usize,
        swap: impl FnOnce(Selection<'_>) -> T,
    ) -> Result<T, SessionError> {
        self.require(SessionState::Ready, "swap")?;
        let source_face = self
            .source_faces
            .get(source_index)
            .ok_or(SessionError::IndexOutOfRange {
                side: Side::Source,
                index: source_index,
                count: self.source_faces.len(),
            })?;
        let target_face = self
            .target_faces
            .get(target_index)
            .ok_or(SessionError::IndexOutOfRange {
                side: Side::Target,
                index: target_index,
                count: self.target_faces.len(),
            })?;
        let pair = self.images.as_ref().ok_or(SessionError::WrongState {
            state: self.state,
            operation: "swap",
        })?;

        self.state = SessionState::Swapping;
        let output = swap(Selection {
            source_image: &pair.source,
            source_face,
            target_face,
        });
        self.state = SessionState::Ready;

        Ok(output)
    }

    fn require(&self, state: SessionState, operation: &'static str) -> Result<(), SessionError> {
        if self.state == state {
            Ok(())
        } else {
            Err(SessionError::WrongState {
                state: self.state,
                operation,
            })
        }
    }
}
