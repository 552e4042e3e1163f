use std::sync::Arc;

use anyhow::Result;
use image::DynamicImage;
use serde::Deserialize;
use thiserror::Error;

use crate::enrichment::{EnrichmentClient, EnrichmentOutcome, EnrichmentQuery};
use crate::handle::PipelineHandle;
use crate::prompt::{self, PromptPair};
use crate::view::View;
use crate::{RenderRequest, DEFAULT_GUIDANCE_SCALE, DEFAULT_HEIGHT, DEFAULT_STEPS, DEFAULT_WIDTH};

/// Seed shared by every view of a batch when the request does not name one.
pub const DEFAULT_SEED: u64 = 42;

/// Multi-view batches run slightly hotter than single renders.
const BATCH_STEPS: usize = 30;
const BATCH_GUIDANCE_SCALE: f64 = 6.0;

/// Request body for `/generate-avatar` and `/generate-multiview-avatar`.
#[derive(Debug, Clone, Deserialize)]
pub struct AvatarRequest {
    pub gender: String,
    #[serde(rename = "skinTone")]
    pub skin_tone: String,
    pub seed: Option<u64>,
}

/// Request body for `/generate-fashion-avatar`. The clothing text is embedded
/// in prompts verbatim, never parsed.
#[derive(Debug, Clone, Deserialize)]
pub struct FashionAvatarRequest {
    pub clothing_request: String,
    pub gender: String,
    #[serde(rename = "skinTone")]
    pub skin_tone: String,
    pub style_theme: Option<String>,
    pub occasion: Option<String>,
    pub seed: Option<u64>,
}

/// Single-view result for the legacy avatar endpoint.
pub struct SingleAvatar {
    pub prompt: String,
    pub image: DynamicImage,
    pub seed: Option<u64>,
}

/// One successfully rendered view of a batch.
#[derive(Debug)]
pub struct GeneratedView {
    pub view: View,
    pub image: DynamicImage,
    pub prompt: String,
}

/// All four views of an avatar, rendered with one shared seed.
#[derive(Debug)]
pub struct MultiViewAvatar {
    pub seed: u64,
    pub views: Vec<GeneratedView>,
    pub fashion_ai_used: bool,
}

/// A batch aborts at the first view that fails to render; no partial image
/// sets are returned.
#[derive(Debug, Error)]
#[error("Failed to generate {view} view: {cause}")]
pub struct ViewFailure {
    pub view: View,
    pub cause: anyhow::Error,
}

/// Coordinates prompts, enrichment and the pipeline handle for the avatar
/// endpoints.
pub struct Orchestrator {
    pipeline: Arc<PipelineHandle>,
    enrichment: EnrichmentClient,
}

impl Orchestrator {
    pub fn new(pipeline: Arc<PipelineHandle>, enrichment: EnrichmentClient) -> Self {
        Self { pipeline, enrichment }
    }

    /// Renders the legacy single-view portrait. Without a seed the output is
    /// nondeterministic.
    pub async fn generate_avatar(&self, request: &AvatarRequest) -> Result<SingleAvatar> {
        let pair = prompt::avatar_prompt(&request.gender, &request.skin_tone);
        let render = RenderRequest {
            prompt: pair.positive.clone(),
            negative_prompt: Some(pair.negative),
            width: Some(DEFAULT_WIDTH),
            height: Some(DEFAULT_HEIGHT),
            steps: Some(DEFAULT_STEPS),
            guidance_scale: Some(DEFAULT_GUIDANCE_SCALE),
            seed: request.seed,
        };
        let image = self.pipeline.render(&render).await?;
        Ok(SingleAvatar {
            prompt: pair.positive,
            image,
            seed: request.seed,
        })
    }

    /// Renders all four views with one shared seed.
    pub async fn generate_multiview(
        &self,
        request: &AvatarRequest,
    ) -> Result<MultiViewAvatar, ViewFailure> {
        let seed = request.seed.unwrap_or(DEFAULT_SEED);
        let mut views = Vec::with_capacity(View::ALL.len());
        for view in View::ALL {
            let pair = prompt::multiview_prompt(&request.gender, &request.skin_tone, view);
            views.push(self.render_view(view, pair, seed).await?);
        }
        Ok(MultiViewAvatar {
            seed,
            views,
            fashion_ai_used: false,
        })
    }

    /// Renders all four views of a clothed avatar. The enrichment service is
    /// probed once per batch; every enrichment miss falls back to the
    /// built-in fashion prompt for that view.
    pub async fn generate_fashion(
        &self,
        request: &FashionAvatarRequest,
    ) -> Result<MultiViewAvatar, ViewFailure> {
        let seed = request.seed.unwrap_or(DEFAULT_SEED);
        let fashion_ai_used = self.enrichment.is_available().await;
        if !fashion_ai_used {
            tracing::info!(
                url = self.enrichment.base_url(),
                "enrichment service unavailable, using built-in fashion prompts"
            );
        }

        let mut views = Vec::with_capacity(View::ALL.len());
        for view in View::ALL {
            let pair = if fashion_ai_used {
                self.enriched_or_fallback(request, view, seed).await
            } else {
                prompt::fashion_prompt(
                    &request.gender,
                    &request.skin_tone,
                    &request.clothing_request,
                    view,
                )
            };
            views.push(self.render_view(view, pair, seed).await?);
        }
        Ok(MultiViewAvatar {
            seed,
            views,
            fashion_ai_used,
        })
    }

    async fn enriched_or_fallback(
        &self,
        request: &FashionAvatarRequest,
        view: View,
        seed: u64,
    ) -> PromptPair {
        let query = EnrichmentQuery {
            clothing_request: &request.clothing_request,
            gender: &request.gender,
            skin_tone: &request.skin_tone,
            view,
            style_theme: request.style_theme.as_deref(),
            occasion: request.occasion.as_deref(),
            seed,
        };
        match self.enrichment.enhance(&query).await {
            EnrichmentOutcome::Enriched(pair) => pair,
            EnrichmentOutcome::Unavailable => {
                tracing::warn!(%view, "enrichment miss, falling back to the built-in prompt");
                prompt::fashion_prompt(
                    &request.gender,
                    &request.skin_tone,
                    &request.clothing_request,
                    view,
                )
            }
        }
    }

    async fn render_view(
        &self,
        view: View,
        pair: PromptPair,
        seed: u64,
    ) -> Result<GeneratedView, ViewFailure> {
        let render = RenderRequest {
            prompt: pair.positive.clone(),
            negative_prompt: Some(pair.negative),
            width: Some(DEFAULT_WIDTH),
            height: Some(DEFAULT_HEIGHT),
            steps: Some(BATCH_STEPS),
            guidance_scale: Some(BATCH_GUIDANCE_SCALE),
            seed: Some(seed),
        };
        match self.pipeline.render(&render).await {
            Ok(image) => {
                tracing::info!(%view, "view generated");
                Ok(GeneratedView {
                    view,
                    image,
                    prompt: pair.positive,
                })
            }
            Err(cause) => {
                tracing::error!(%view, error = ?cause, "view generation failed");
                Err(ViewFailure { view, cause })
            }
        }
    }
}
