//! SCRFD + ArcFace combined into the production [`FaceDetector`].

use crate::detector::{DetectorError, FaceDetector, ScrfdDetector};
use crate::recognizer::FaceRecognizer;
use crate::types::{DetectedFace, FaceDescriptor, Image};
use std::path::Path;

/// Detects faces and attaches an identity embedding to each one.
pub struct FaceAnalyzer {
    detector: ScrfdDetector,
    recognizer: FaceRecognizer,
}

impl FaceAnalyzer {
    pub fn load(
        detector_path: &Path,
        recognizer_path: &Path,
        detect_size: usize,
        intra_threads: usize,
    ) -> Result<Self, DetectorError> {
        let detector = ScrfdDetector::load(detector_path, detect_size, intra_threads)?;
        let recognizer = FaceRecognizer::load(recognizer_path, intra_threads)?;
        Ok(Self {
            detector,
            recognizer,
        })
    }
}

impl FaceDetector for FaceAnalyzer {
    fn detect(&mut self, image: &Image) -> Result<Vec<DetectedFace>, DetectorError> {
        let boxes = self.detector.detect_boxes(image.pixels())?;
        tracing::debug!(origin = %image.origin(), count = boxes.len(), "SCRFD boxes");

        boxes
            .into_iter()
            .map(|detection| {
                let embedding = if detection.landmarks.is_some() {
                    Some(self.recognizer.extract(image.pixels(), &detection)?)
                } else {
                    tracing::warn!(
                        confidence = detection.confidence,
                        "face has no landmarks; swaps involving it will fail"
                    );
                    None
                };
                Ok(DetectedFace {
                    bbox: detection.to_rect(),
                    descriptor: FaceDescriptor {
                        detection,
                        embedding,
                    },
                })
            })
            .collect()
    }
}
