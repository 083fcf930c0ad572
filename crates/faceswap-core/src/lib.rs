//! faceswap-core: Face detection, identity embedding, swap and enhancement.
//!
//! Uses SCRFD for face detection, ArcFace for identity embeddings, an
//! InSwapper-style model for the swap and Real-ESRGAN for enhancement, all via
//! ONNX Runtime. Each model sits behind a trait so the pipeline can run
//! against any implementation.

pub mod alignment;
pub mod analyzer;
pub mod annotate;
pub mod detector;
pub mod enhancer;
pub mod extractor;
pub mod recognizer;
pub mod swapper;
mod tensor;
pub mod types;

pub use analyzer::FaceAnalyzer;
pub use detector::{DetectorError, FaceDetector};
pub use enhancer::{Device, EnhanceError, Enhancer, EnhancerVariant, EsrganEnhancer};
pub use swapper::{FaceSwapper, InSwapper, SwapError};
pub use types::{
    BoundingBox, DetectedFace, Embedding, EmptyImage, FaceDescriptor, FaceRecord, FaceRect, Image,
    ImageOrigin,
};
