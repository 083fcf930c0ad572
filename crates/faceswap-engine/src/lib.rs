//! faceswap-engine: Session state machine and pipeline control.
//!
//! A [`Pipeline`] takes two images through detect → select → swap → enhance →
//! persist. Models are injected behind the `faceswap-core` traits, so the
//! control flow runs the same against ONNX models or test doubles.

pub mod capability;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod pipeline;
pub mod session;

pub use capability::{ModelSlot, SlotState, SlotStatus};
pub use config::{Config, ConfigError};
pub use engine::{spawn_engine, EngineError, EngineHandle};
pub use error::{CapabilityKind, PipelineError, Side};
pub use executor::{BoxedEnhancer, BoxedSwapper, EnhanceRequest, EnhancerLoader, SwapExecutor};
pub use pipeline::{
    AnnotatedImages, BoxedDetector, DetectedFaces, FaceSummary, Pipeline, StatusReport,
    SwapResult, Upload,
};
pub use session::{SessionError, SessionState, SwapSession};
