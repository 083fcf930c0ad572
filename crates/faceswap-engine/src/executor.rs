//! Swap executor: validated selection → swap model → optional enhancement.

use crate::capability::{ModelSlot, SlotStatus};
use crate::error::{CapabilityKind, PipelineError};
use crate::session::SwapSession;
use faceswap_core::{Device, Enhancer, EnhancerVariant, FaceSwapper, Image, ImageOrigin};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Instant;

pub type BoxedSwapper = Box<dyn FaceSwapper + Send>;
pub type BoxedEnhancer = Box<dyn Enhancer + Send>;
/// Builds the enhancer for a variant/device pair on first use.
pub type EnhancerLoader = Box<dyn FnMut(EnhancerVariant, Device) -> ModelSlot<BoxedEnhancer> + Send>;

/// Enhancement model selection for one swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct EnhanceRequest {
    pub variant: EnhancerVariant,
    pub device: Device,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnhancerStatus {
    pub variant: EnhancerVariant,
    pub device: Device,
    #[serde(flatten)]
    pub slot: SlotStatus,
}

pub struct SwapExecutor {
    swapper: ModelSlot<BoxedSwapper>,
    enhancers: HashMap<EnhanceRequest, ModelSlot<BoxedEnhancer>>,
    load_enhancer: EnhancerLoader,
}

impl SwapExecutor {
    pub fn new(swapper: ModelSlot<BoxedSwapper>, load_enhancer: EnhancerLoader) -> Self {
        Self {
            swapper,
            enhancers: HashMap::new(),
            load_enhancer,
        }
    }

    pub fn swapper_status(&self) -> SlotStatus {
        self.swapper.status()
    }

    /// Every enhancer loaded or attempted so far.
    pub fn enhancer_status(&self) -> Vec<EnhancerStatus> {
        let mut statuses: Vec<_> = self
            .enhancers
            .iter()
            .map(|(request, slot)| EnhancerStatus {
                variant: request.variant,
                device: request.device,
                slot: slot.status(),
            })
            .collect();
        statuses.sort_by_key(|s| (s.variant.scale(), s.device.to_string()));
        statuses
    }

    /// Swap the selected faces and optionally enhance the composite.
    ///
    /// Checks run in order: session state, face indices, model availability.
    /// Models are only called once all three pass. The result is a new
    /// [`Image`] with the source image's dimensions times the enhancer scale;
    /// an enhancement failure yields no image at all.
    pub fn swap(
        &mut self,
        session: &mut SwapSession,
        source_index: usize,
        target_index: usize,
        enhance: Option<EnhanceRequest>,
    ) -> Result<Image, PipelineError> {
        let session_id = session.id();
        let Self {
            swapper,
            enhancers,
            load_enhancer,
        } = self;

        session.with_selection(source_index, target_index, |selection| {
            let swapper = match swapper {
                ModelSlot::Loaded { model, .. } => model,
                ModelSlot::Missing { path } => {
                    return Err(PipelineError::ModelNotFound {
                        capability: CapabilityKind::Swap,
                        path: path.clone(),
                    })
                }
                ModelSlot::Failed { reason, .. } => {
                    return Err(PipelineError::SwapFailed(format!(
                        "model failed to load: {reason}"
                    )))
                }
            };
            let enhancer = match enhance {
                Some(request) => Some((request, ready_enhancer(enhancers, load_enhancer, request)?)),
                None => None,
            };

            let started = Instant::now();
            let composite = swapper
                .swap(
                    selection.source_image,
                    selection.source_face.descriptor(),
                    selection.target_face.descriptor(),
                )
                .map_err(|e| PipelineError::SwapFailed(e.to_string()))?;
            if composite.dimensions() != selection.source_image.dimensions() {
                return Err(PipelineError::SwapFailed(format!(
                    "swap model returned {:?} for a {:?} image",
                    composite.dimensions(),
                    selection.source_image.dimensions()
                )));
            }
            tracing::info!(
                session = %session_id,
                source_index,
                target_index,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "face swapped"
            );

            let (pixels, stage) = match enhancer {
                Some((request, enhancer)) => {
                    let started = Instant::now();
                    let enhanced = enhancer
                        .enhance(&composite)
                        .map_err(|e| PipelineError::EnhancementFailed(e.to_string()))?;
                    tracing::info!(
                        session = %session_id,
                        variant = %request.variant,
                        from = ?composite.dimensions(),
                        to = ?enhanced.dimensions(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "result enhanced"
                    );
                    (enhanced, format!("swap+{}", request.variant))
                }
                None => (composite, "swap".to_string()),
            };

            Image::new(pixels, ImageOrigin::Derived(stage))
                .map_err(|e| PipelineError::SwapFailed(e.to_string()))
        })?
    }
}

fn enhancer_slot<'a>(
    enhancers: &'a mut HashMap<EnhanceRequest, ModelSlot<BoxedEnhancer>>,
    load_enhancer: &mut EnhancerLoader,
    request: EnhanceRequest,
) -> &'a mut ModelSlot<BoxedEnhancer> {
    enhancers
        .entry(request)
        .or_insert_with(|| load_enhancer(request.variant, request.device))
}

fn ready_enhancer<'a>(
    enhancers: &'a mut HashMap<EnhanceRequest, ModelSlot<BoxedEnhancer>>,
    load_enhancer: &mut EnhancerLoader,
    request: EnhanceRequest,
) -> Result<&'a mut BoxedEnhancer, PipelineError> {
    match enhancer_slot(enhancers, load_enhancer, request) {
        ModelSlot::Loaded { model, .. } => Ok(model),
        ModelSlot::Missing { path } => Err(PipelineError::ModelNotFound {
            capability: CapabilityKind::Enhancement,
            path: path.clone(),
        }),
        ModelSlot::Failed { reason, .. } => Err(PipelineError::EnhancementFailed(format!(
            "model failed to load: {reason}"
        ))),
    }
}
