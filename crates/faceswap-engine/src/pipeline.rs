//! Caller-facing pipeline: upload → detect → list faces → swap → history.
//!
//! Owns the single active [`SwapSession`], the injected model capabilities and
//! both storage areas. All calls are synchronous; see [`crate::engine`] for
//! running the pipeline on its own thread.

use crate::capability::{ModelSlot, SlotStatus};
use crate::config::Config;
use crate::error::PipelineError;
use crate::executor::{
    BoxedEnhancer, BoxedSwapper, EnhanceRequest, EnhancerLoader, EnhancerStatus, SwapExecutor,
};
use crate::session::{SessionState, SwapSession};
use chrono::{DateTime, Utc};
use faceswap_core::annotate::annotate;
use faceswap_core::extractor::extract;
use faceswap_core::{
    DetectedFace, DetectorError, EsrganEnhancer, FaceAnalyzer, FaceDetector, FaceRecord, FaceRect,
    Image, InSwapper,
};
use faceswap_store::{ArchiveEntry, ImageStore, ImageStoreError, OutputArchive, UploadRole};
use image::RgbImage;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;
use uuid::Uuid;

pub type BoxedDetector = Box<dyn FaceDetector + Send>;

/// Raw uploaded file: original name plus encoded bytes.
#[derive(Debug, Clone)]
pub struct Upload {
    pub name: String,
    pub bytes: Vec<u8>,
}

/// One detected face, as shown to the operator for selection.
#[derive(Debug, Clone, Serialize)]
pub struct FaceSummary {
    pub index: usize,
    pub bbox: FaceRect,
    pub crop_rect: FaceRect,
    pub clamped: bool,
    pub confidence: f32,
    #[serde(skip)]
    pub crop: RgbImage,
}

impl From<&FaceRecord> for FaceSummary {
    fn from(record: &FaceRecord) -> Self {
        Self {
            index: record.index(),
            bbox: record.bbox(),
            crop_rect: record.crop_rect(),
            clamped: record.clamped(),
            confidence: record.confidence(),
            crop: record.crop().clone(),
        }
    }
}

/// Faces of both images, in detection order.
#[derive(Debug, Clone, Serialize)]
pub struct DetectedFaces {
    pub session_id: Uuid,
    pub source: Vec<FaceSummary>,
    pub target: Vec<FaceSummary>,
}

/// Both images with their detected faces drawn in.
#[derive(Debug, Clone)]
pub struct AnnotatedImages {
    pub source: RgbImage,
    pub target: RgbImage,
}

/// Outcome of a successful swap.
///
/// `archived` holds the persistence outcome separately: the image is returned
/// even when it could not be written to the archive.
#[derive(Debug)]
pub struct SwapResult {
    pub session_id: Uuid,
    pub source_index: usize,
    pub target_index: usize,
    pub image: Image,
    pub enhancement: Option<EnhanceRequest>,
    pub created_at: DateTime<Utc>,
    pub archived: Result<ArchiveEntry, PipelineError>,
}

impl SwapResult {
    /// Archive location, when persisting succeeded.
    pub fn path(&self) -> Option<&Path> {
        self.archived.as_ref().ok().map(|e| e.result_path.as_path())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub id: Uuid,
    pub state: SessionState,
}

/// Capability and storage report.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub session: Option<SessionStatus>,
    pub detection: SlotStatus,
    pub swap: SlotStatus,
    pub enhancers: Vec<EnhancerStatus>,
    pub default_enhancement: EnhanceRequest,
    pub content_dir: PathBuf,
    pub output_dir: PathBuf,
    pub history_limit: usize,
}

pub struct Pipeline {
    store: ImageStore,
    archive: OutputArchive,
    detector: ModelSlot<BoxedDetector>,
    executor: SwapExecutor,
    session: Option<SwapSession>,
    default_enhancement: EnhanceRequest,
    history_limit: usize,
}

impl Pipeline {
    /// Assemble a pipeline from already loaded capabilities.
    pub fn new(
        store: ImageStore,
        archive: OutputArchive,
        detector: ModelSlot<BoxedDetector>,
        executor: SwapExecutor,
    ) -> Self {
        Self {
            store,
            archive,
            detector,
            executor,
            session: None,
            default_enhancement: EnhanceRequest::default(),
            history_limit: 5,
        }
    }

    /// Load every model named by `config`.
    ///
    /// A missing or unloadable model only disables its own capability.
    /// Enhancers are loaded on the first swap that asks for them.
    pub fn from_config(config: &Config) -> Self {
        let started = Instant::now();
        let recognizer_path = config.recognizer_model_path();
        let detector = ModelSlot::load(config.detector_model_path(), |path| {
            FaceAnalyzer::load(
                path,
                &recognizer_path,
                config.detect_size,
                config.intra_threads,
            )
            .map(|analyzer| Box::new(analyzer) as BoxedDetector)
        });

        let threads = config.intra_threads;
        let swapper = ModelSlot::load(config.swap_model_path(), |path| {
            InSwapper::load(path, threads).map(|swapper| Box::new(swapper) as BoxedSwapper)
        });

        let model_dir = config.model_dir.clone();
        let load_enhancer: EnhancerLoader = Box::new(move |variant, device| {
            ModelSlot::load(EsrganEnhancer::model_path(&model_dir, variant), |_| {
                EsrganEnhancer::load(&model_dir, variant, device, threads)
                    .map(|enhancer| Box::new(enhancer) as BoxedEnhancer)
            })
        });

        let default_enhancement = EnhanceRequest {
            variant: config.enhancer,
            device: config.device,
        };
        let executor = SwapExecutor::new(swapper, load_enhancer);

        tracing::info!(
            detection = detector.is_loaded(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "pipeline models loaded"
        );

        Self::new(
            ImageStore::new(&config.content_dir),
            OutputArchive::new(&config.output_dir),
            detector,
            executor,
        )
        .with_default_enhancement(default_enhancement)
        .with_history_limit(config.history_limit)
    }

    pub fn with_default_enhancement(mut self, request: EnhanceRequest) -> Self {
        self.default_enhancement = request;
        self
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    pub fn session_state(&self) -> Option<SessionState> {
        self.session.as_ref().map(SwapSession::state)
    }

    /// Load two image files and start a new session for them.
    ///
    /// Both images are decoded before anything changes; a bad image leaves
    /// the current session as it was. Otherwise the current session is
    /// invalidated and replaced.
    pub fn upload_images(&mut self, source: &Path, target: &Path) -> Result<Uuid, PipelineError> {
        let source = self.store.load(source).map_err(invalid_image)?;
        let target = self.store.load(target).map_err(invalid_image)?;
        self.replace_session(source, target)
    }

    /// Stage uploaded files in the content directory, then load them.
    ///
    /// If either upload is rejected, nothing stays staged.
    pub fn upload_bytes(&mut self, source: &Upload, target: &Upload) -> Result<Uuid, PipelineError> {
        let source_path = self
            .store
            .save_upload(UploadRole::Source, &source.name, &source.bytes)
            .map_err(invalid_image)?;
        let target_path = match self
            .store
            .save_upload(UploadRole::Target, &target.name, &target.bytes)
        {
            Ok(path) => path,
            Err(e) => {
                self.store.discard_upload(&source_path);
                return Err(invalid_image(e));
            }
        };

        let result = self.upload_images(&source_path, &target_path);
        if result.is_err() {
            self.store.discard_upload(&source_path);
            self.store.discard_upload(&target_path);
        }
        result
    }

    fn replace_session(&mut self, source: Image, target: Image) -> Result<Uuid, PipelineError> {
        if let Some(mut previous) = self.session.take() {
            previous.invalidate();
            tracing::info!(session = %previous.id(), "previous session replaced by new upload");
        }
        let mut session = SwapSession::new();
        session.supply(source, target)?;
        let id = session.id();
        self.session = Some(session);
        Ok(id)
    }

    /// Run detection on both images of the current session.
    ///
    /// Zero faces on either side invalidates the session. If the detector is
    /// unavailable or fails, the session keeps its state and any earlier faces,
    /// so detection can be retried.
    pub fn detect_faces(&mut self) -> Result<DetectedFaces, PipelineError> {
        let session = self.session.as_mut().ok_or(PipelineError::NoSession)?;
        let detector = match &mut self.detector {
            ModelSlot::Loaded { model, .. } => model,
            ModelSlot::Missing { path } => {
                return Err(PipelineError::DetectionUnavailable(format!(
                    "model not found at {}",
                    path.display()
                )))
            }
            ModelSlot::Failed { reason, .. } => {
                return Err(PipelineError::DetectionUnavailable(reason.clone()))
            }
        };

        let started = Instant::now();
        let (source, target) = session.detection_input()?;
        let source_faces = run_detector(detector, source)?;
        let target_faces = run_detector(detector, target)?;
        let source_records = extract(source, source_faces);
        let target_records = extract(target, target_faces);
        session.complete_detection(source_records, target_records)?;

        tracing::info!(
            session = %session.id(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "detection complete"
        );

        self.list_detected_faces()
    }

    /// Faces of the current session, for display and selection.
    pub fn list_detected_faces(&self) -> Result<DetectedFaces, PipelineError> {
        let session = self.session.as_ref().ok_or(PipelineError::NoSession)?;
        let (source, target) = session.faces()?;
        Ok(DetectedFaces {
            session_id: session.id(),
            source: source.iter().map(FaceSummary::from).collect(),
            target: target.iter().map(FaceSummary::from).collect(),
        })
    }

    /// Both images of the current session with face boxes and indices drawn.
    pub fn annotate_faces(&self) -> Result<AnnotatedImages, PipelineError> {
        let session = self.session.as_ref().ok_or(PipelineError::NoSession)?;
        let (source_faces, target_faces) = session.faces()?;
        let (source, target) = session.images().ok_or(PipelineError::SessionNotReady {
            state: session.state(),
        })?;
        Ok(AnnotatedImages {
            source: annotate(source, source_faces),
            target: annotate(target, target_faces),
        })
    }

    /// Swap using the configured enhancer when `enhance` is set.
    pub fn swap(
        &mut self,
        source_index: usize,
        target_index: usize,
        enhance: bool,
    ) -> Result<SwapResult, PipelineError> {
        let enhancement = enhance.then_some(self.default_enhancement);
        self.swap_with(source_index, target_index, enhancement)
    }

    /// Swap the selected faces, optionally enhance, and archive the result.
    ///
    /// Nothing is archived unless every model call succeeded. An archive
    /// failure is reported in [`SwapResult::archived`] alongside the image.
    pub fn swap_with(
        &mut self,
        source_index: usize,
        target_index: usize,
        enhancement: Option<EnhanceRequest>,
    ) -> Result<SwapResult, PipelineError> {
        let session = self.session.as_mut().ok_or(PipelineError::NoSession)?;
        let session_id = session.id();
        let image = self
            .executor
            .swap(session, source_index, target_index, enhancement)?;

        let created_at = Utc::now();
        let archived = self
            .archive
            .store_at(image.pixels(), created_at)
            .map_err(|e| {
                tracing::error!(session = %session_id, error = %e, "swap result not archived");
                PipelineError::ArchiveWriteFailed(e)
            });

        Ok(SwapResult {
            session_id,
            source_index,
            target_index,
            image,
            enhancement,
            created_at,
            archived,
        })
    }

    /// Up to `limit` archived results, most recent first.
    pub fn list_history(&self, limit: usize) -> Result<Vec<ArchiveEntry>, PipelineError> {
        self.archive
            .list_recent(limit)
            .map_err(PipelineError::ArchiveReadFailed)
    }

    pub fn status(&self) -> StatusReport {
        StatusReport {
            session: self.session.as_ref().map(|s| SessionStatus {
                id: s.id(),
                state: s.state(),
            }),
            detection: self.detector.status(),
            swap: self.executor.swapper_status(),
            enhancers: self.executor.enhancer_status(),
            default_enhancement: self.default_enhancement,
            content_dir: self.store.content_dir().to_path_buf(),
            output_dir: self.archive.root().to_path_buf(),
            history_limit: self.history_limit,
        }
    }
}

fn invalid_image(err: ImageStoreError) -> PipelineError {
    tracing::warn!(error = %err, "rejected upload");
    PipelineError::InvalidImage(err.to_string())
}

fn run_detector(
    detector: &mut BoxedDetector,
    image: &Image,
) -> Result<Vec<DetectedFace>, PipelineError> {
    let faces = detector.detect(image).map_err(|e| match e {
        DetectorError::InvalidImage(reason) => PipelineError::InvalidImage(reason),
        other => PipelineError::DetectionUnavailable(other.to_string()),
    })?;
    tracing::debug!(origin = %image.origin(), count = faces.len(), "faces detected");
    Ok(faces)
}
