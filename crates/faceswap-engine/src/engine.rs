//! Pipeline worker thread.
//!
//! The [`Pipeline`] moves onto a dedicated OS thread and is driven through an
//! [`EngineHandle`]. Requests are served one at a time, so no two swaps ever
//! run against the session concurrently.

use crate::error::PipelineError;
use crate::executor::EnhanceRequest;
use crate::pipeline::{AnnotatedImages, DetectedFaces, Pipeline, StatusReport, SwapResult, Upload};
use faceswap_store::ArchiveEntry;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

type Reply<T> = oneshot::Sender<Result<T, PipelineError>>;

/// Messages sent from callers to the engine thread.
enum EngineRequest {
    UploadImages {
        source: PathBuf,
        target: PathBuf,
        reply: Reply<Uuid>,
    },
    UploadBytes {
        source: Upload,
        target: Upload,
        reply: Reply<Uuid>,
    },
    DetectFaces {
        reply: Reply<DetectedFaces>,
    },
    ListDetectedFaces {
        reply: Reply<DetectedFaces>,
    },
    AnnotateFaces {
        reply: Reply<AnnotatedImages>,
    },
    Swap {
        source_index: usize,
        target_index: usize,
        enhancement: Option<EnhanceRequest>,
        reply: Reply<SwapResult>,
    },
    ListHistory {
        limit: usize,
        reply: Reply<Vec<ArchiveEntry>>,
    },
    Status {
        reply: oneshot::Sender<StatusReport>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Load two image files and start a new session.
    pub async fn upload_images(&self, source: PathBuf, target: PathBuf) -> Result<Uuid, EngineError> {
        Ok(self
            .request(|reply| EngineRequest::UploadImages {
                source,
                target,
                reply,
            })
            .await??)
    }

    /// Stage uploaded bytes and start a new session.
    pub async fn upload_bytes(&self, source: Upload, target: Upload) -> Result<Uuid, EngineError> {
        Ok(self
            .request(|reply| EngineRequest::UploadBytes {
                source,
                target,
                reply,
            })
            .await??)
    }

    pub async fn detect_faces(&self) -> Result<DetectedFaces, EngineError> {
        Ok(self
            .request(|reply| EngineRequest::DetectFaces { reply })
            .await??)
    }

    pub async fn list_detected_faces(&self) -> Result<DetectedFaces, EngineError> {
        Ok(self
            .request(|reply| EngineRequest::ListDetectedFaces { reply })
            .await??)
    }

    pub async fn annotate_faces(&self) -> Result<AnnotatedImages, EngineError> {
        Ok(self
            .request(|reply| EngineRequest::AnnotateFaces { reply })
            .await??)
    }

    pub async fn swap(
        &self,
        source_index: usize,
        target_index: usize,
        enhancement: Option<EnhanceRequest>,
    ) -> Result<SwapResult, EngineError> {
        Ok(self
            .request(|reply| EngineRequest::Swap {
                source_index,
                target_index,
                enhancement,
                reply,
            })
            .await??)
    }

    pub async fn list_history(&self, limit: usize) -> Result<Vec<ArchiveEntry>, EngineError> {
        Ok(self
            .request(|reply| EngineRequest::ListHistory { limit, reply })
            .await??)
    }

    pub async fn status(&self) -> Result<StatusReport, EngineError> {
        self.request(|reply| EngineRequest::Status { reply }).await
    }
}

/// Move `pipeline` onto a dedicated OS thread and return a handle to it.
///
/// The thread exits once every handle has been dropped.
pub fn spawn_engine(mut pipeline: Pipeline) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("faceswap-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::UploadImages {
                        source,
                        target,
                        reply,
                    } => {
                        let _ = reply.send(pipeline.upload_images(&source, &target));
                    }
                    EngineRequest::UploadBytes {
                        source,
                        target,
                        reply,
                    } => {
                        let _ = reply.send(pipeline.upload_bytes(&source, &target));
                    }
                    EngineRequest::DetectFaces { reply } => {
                        let _ = reply.send(pipeline.detect_faces());
                    }
                    EngineRequest::ListDetectedFaces { reply } => {
                        let _ = reply.send(pipeline.list_detected_faces());
                    }
                    EngineRequest::AnnotateFaces { reply } => {
                        let _ = reply.send(pipeline.annotate_faces());
                    }
                    EngineRequest::Swap {
                        source_index,
                        target_index,
                        enhancement,
                        reply,
                    } => {
                        let result = pipeline.swap_with(source_index, target_index, enhancement);
                        let _ = reply.send(result);
                    }
                    EngineRequest::ListHistory { limit, reply } => {
                        let _ = reply.send(pipeline.list_history(limit));
                    }
                    EngineRequest::Status { reply } => {
                        let _ = reply.send(pipeline.status());
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}
