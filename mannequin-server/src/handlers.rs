use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use mannequin_core::orchestrator::{AvatarRequest, FashionAvatarRequest};
use mannequin_core::RenderRequest;

use crate::api::{
    encode_views, image_to_data_url, AvatarMeta, AvatarResponse, FashionMeta, FashionResponse,
    GenerateMeta, GenerateResponse, HealthResponse, MultiViewMeta, MultiViewResponse,
};
use crate::AppState;

pub(crate) async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        device: state.pipeline.info().device,
        model_loaded: state.pipeline.is_loaded(),
    })
}

pub(crate) async fn generate(
    State(state): State<AppState>,
    Json(request): Json<RenderRequest>,
) -> Response {
    match render_image(&state, &request).await {
        Ok(body) => Json(body).into_response(),
        Err(e) => {
            tracing::error!(error = ?e, "image generation failed");
            (StatusCode::INTERNAL_SERVER_ERROR, format!("Error: {:?}", e)).into_response()
        }
    }
}

async fn render_image(state: &AppState, request: &RenderRequest) -> anyhow::Result<GenerateResponse> {
    let image = state.pipeline.render(request).await?;
    let info = state.pipeline.info();
    Ok(GenerateResponse {
        image_data_url: image_to_data_url(&image)?,
        meta: GenerateMeta {
            device: info.device,
            dtype: info.dtype,
            width: request.width(),
            height: request.height(),
            steps: request.steps(),
            guidance_scale: request.guidance_scale(),
            seed: request.seed,
            model: info.model_id.clone(),
        },
    })
}

pub(crate) async fn generate_avatar(
    State(state): State<AppState>,
    Json(request): Json<AvatarRequest>,
) -> Response {
    match avatar_image(&state, &request).await {
        Ok(body) => Json(body).into_response(),
        Err(e) => {
            tracing::error!(error = ?e, "avatar generation failed");
            (StatusCode::INTERNAL_SERVER_ERROR, format!("Error: {:?}", e)).into_response()
        }
    }
}

async fn avatar_image(state: &AppState, request: &AvatarRequest) -> anyhow::Result<AvatarResponse> {
    let avatar = state.avatars.generate_avatar(request).await?;
    let info = state.pipeline.info();
    Ok(AvatarResponse {
        success: true,
        image_data_url: image_to_data_url(&avatar.image)?,
        meta: AvatarMeta {
            prompt: avatar.prompt,
            device: info.device,
            model: info.model_id.clone(),
            seed: avatar.seed,
        },
    })
}

/// Batch failures are reported in-band: HTTP 200 with `success: false`.
pub(crate) async fn generate_multiview_avatar(
    State(state): State<AppState>,
    Json(request): Json<AvatarRequest>,
) -> Response {
    let avatar = match state.avatars.generate_multiview(&request).await {
        Ok(avatar) => avatar,
        Err(failure) => {
            tracing::warn!(view = %failure.view, "multi-view batch aborted");
            return Json(MultiViewResponse::failure(failure.to_string())).into_response();
        }
    };
    let info = state.pipeline.info();
    let views_generated = avatar.views.len();
    match encode_views(&avatar) {
        Ok(images) => Json(MultiViewResponse {
            success: true,
            error: None,
            images,
            meta: Some(MultiViewMeta {
                gender: request.gender,
                skin_tone: request.skin_tone,
                seed: avatar.seed,
                device: info.device,
                model: info.model_id.clone(),
                views_generated,
            }),
        })
        .into_response(),
        Err(e) => {
            tracing::error!(error = ?e, "failed to encode generated views");
            (StatusCode::INTERNAL_SERVER_ERROR, format!("Error: {:?}", e)).into_response()
        }
    }
}

pub(crate) async fn generate_fashion_avatar(
    State(state): State<AppState>,
    Json(request): Json<FashionAvatarRequest>,
) -> Response {
    let avatar = match state.avatars.generate_fashion(&request).await {
        Ok(avatar) => avatar,
        Err(failure) => {
            tracing::warn!(view = %failure.view, "fashion batch aborted");
            return Json(FashionResponse::failure(failure.to_string())).into_response();
        }
    };
    let info = state.pipeline.info();
    let views_generated = avatar.views.len();
    match encode_views(&avatar) {
        Ok(images) => Json(FashionResponse {
            success: true,
            error: None,
            images,
            meta: Some(FashionMeta {
                clothing_request: request.clothing_request,
                gender: request.gender,
                skin_tone: request.skin_tone,
                style_theme: request.style_theme,
                occasion: request.occasion,
                seed: avatar.seed,
                device: info.device,
                model: info.model_id.clone(),
                views_generated,
                fashion_ai_used: avatar.fashion_ai_used,
            }),
        })
        .into_response(),
        Err(e) => {
            tracing::error!(error = ?e, "failed to encode generated views");
            (StatusCode::INTERNAL_SERVER_ERROR, format!("Error: {:?}", e)).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, RgbImage};
    use mannequin_core::enrichment::EnrichmentClient;
    use mannequin_core::orchestrator::Orchestrator;
    use mannequin_core::{
        DeviceMap, PipelineHandle, PipelineInfo, PipelineLike, PipelineSpec,
    };
    use std::sync::Arc;

    struct SolidPipeline;

    impl PipelineLike for SolidPipeline {
        fn render(&self, request: &RenderRequest) -> anyhow::Result<DynamicImage> {
            // Tiny stand-in image, scaled down to keep PNG encoding fast.
            Ok(DynamicImage::ImageRgb8(RgbImage::new(
                (request.width() / 8) as u32,
                (request.height() / 8) as u32,
            )))
        }
    }

    struct FailingPipeline;

    impl PipelineLike for FailingPipeline {
        fn render(&self, _request: &RenderRequest) -> anyhow::Result<DynamicImage> {
            anyhow::bail!("CUDA out of memory")
        }
    }

    fn stub_state(pipeline: Arc<dyn PipelineLike>) -> AppState {
        let info = PipelineInfo {
            model_id: "stub/sdxl".to_string(),
            device: "cpu",
            dtype: "float32",
        };
        let handle = Arc::new(PipelineHandle::preloaded(info, pipeline));
        // Port 1 refuses connections, so enrichment always falls back.
        let avatars = Arc::new(Orchestrator::new(
            handle.clone(),
            EnrichmentClient::new("http://127.0.0.1:1"),
        ));
        AppState {
            pipeline: handle,
            avatars,
        }
    }

    async fn body_json(response: Response) -> serde_json::Value {
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_flips_once_loaded() {
        let lazy = PipelineHandle::lazy(PipelineSpec {
            model_id: "stabilityai/stable-diffusion-xl-base-1.0".to_string(),
            device_map: DeviceMap::ForceCpu,
        });
        let avatars = Arc::new(Orchestrator::new(
            Arc::new(PipelineHandle::preloaded(
                PipelineInfo {
                    model_id: "stub/sdxl".to_string(),
                    device: "cpu",
                    dtype: "float32",
                },
                Arc::new(SolidPipeline),
            )),
            EnrichmentClient::new("http://127.0.0.1:1"),
        ));
        let state = AppState {
            pipeline: Arc::new(lazy),
            avatars,
        };
        let Json(body) = health(State(state)).await;
        assert_eq!(body.status, "ok");
        assert_eq!(body.device, "cpu");
        assert!(!body.model_loaded);

        let loaded = stub_state(Arc::new(SolidPipeline));
        let Json(body) = health(State(loaded)).await;
        assert!(body.model_loaded);
    }

    #[tokio::test]
    async fn test_generate_echoes_resolved_settings() {
        let state = stub_state(Arc::new(SolidPipeline));
        let request = RenderRequest {
            prompt: "a studio portrait".to_string(),
            negative_prompt: None,
            width: None,
            height: None,
            steps: None,
            guidance_scale: None,
            seed: None,
        };
        let body = body_json(generate(State(state), Json(request)).await).await;
        assert!(body["imageDataUrl"]
            .as_str()
            .unwrap()
            .starts_with("data:image/png;base64,"));
        assert_eq!(body["meta"]["width"], 832);
        assert_eq!(body["meta"]["height"], 1216);
        assert_eq!(body["meta"]["steps"], 28);
        assert_eq!(body["meta"]["guidance_scale"], 5.5);
        assert!(body["meta"]["seed"].is_null());
        assert_eq!(body["meta"]["device"], "cpu");
        assert_eq!(body["meta"]["dtype"], "float32");
        assert_eq!(body["meta"]["model"], "stub/sdxl");
    }

    #[tokio::test]
    async fn test_generate_failure_returns_500() {
        let state = stub_state(Arc::new(FailingPipeline));
        let request = RenderRequest {
            prompt: "a studio portrait".to_string(),
            negative_prompt: None,
            width: None,
            height: None,
            steps: None,
            guidance_scale: None,
            seed: None,
        };
        let response = generate(State(state), Json(request)).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_generate_avatar_echoes_prompt_and_seed() {
        let state = stub_state(Arc::new(SolidPipeline));
        let request = AvatarRequest {
            gender: "female".to_string(),
            skin_tone: "fair-cool".to_string(),
            seed: Some(7),
        };
        let body = body_json(generate_avatar(State(state), Json(request)).await).await;
        assert_eq!(body["success"], true);
        assert!(body["imageDataUrl"]
            .as_str()
            .unwrap()
            .starts_with("data:image/png;base64,"));
        assert!(body["meta"]["prompt"]
            .as_str()
            .unwrap()
            .contains("female adult, fair cool undertone skin"));
        assert_eq!(body["meta"]["seed"], 7);
    }

    #[tokio::test]
    async fn test_generate_avatar_without_seed_omits_it() {
        let state = stub_state(Arc::new(SolidPipeline));
        let request = AvatarRequest {
            gender: "male".to_string(),
            skin_tone: "tan-golden".to_string(),
            seed: None,
        };
        let body = body_json(generate_avatar(State(state), Json(request)).await).await;
        assert!(body["meta"].get("seed").is_none());
    }

    #[tokio::test]
    async fn test_multiview_success_shape() {
        let state = stub_state(Arc::new(SolidPipeline));
        let request = AvatarRequest {
            gender: "female".to_string(),
            skin_tone: "deep-cool".to_string(),
            seed: None,
        };
        let body = body_json(generate_multiview_avatar(State(state), Json(request)).await).await;
        assert_eq!(body["success"], true);
        let images = body["images"].as_array().unwrap();
        assert_eq!(images.len(), 4);
        assert_eq!(images[0]["view"], "front");
        assert_eq!(images[3]["view"], "three-quarter");
        assert_eq!(body["meta"]["seed"], 42);
        assert_eq!(body["meta"]["views_generated"], 4);
        assert_eq!(body["meta"]["skinTone"], "deep-cool");
    }

    #[tokio::test]
    async fn test_multiview_failure_is_in_band() {
        let state = stub_state(Arc::new(FailingPipeline));
        let request = AvatarRequest {
            gender: "female".to_string(),
            skin_tone: "fair-cool".to_string(),
            seed: Some(3),
        };
        let body = body_json(generate_multiview_avatar(State(state), Json(request)).await).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["images"], serde_json::json!([]));
        let message = body["error"].as_str().unwrap();
        assert!(message.starts_with("Failed to generate front view:"));
        assert!(message.contains("CUDA out of memory"));
    }

    #[tokio::test]
    async fn test_fashion_fallback_meta() {
        let state = stub_state(Arc::new(SolidPipeline));
        let request = FashionAvatarRequest {
            clothing_request: "Red Evening Dress".to_string(),
            gender: "female".to_string(),
            skin_tone: "fair-cool".to_string(),
            style_theme: None,
            occasion: Some("gala".to_string()),
            seed: Some(11),
        };
        let body = body_json(generate_fashion_avatar(State(state), Json(request)).await).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["images"].as_array().unwrap().len(), 4);
        assert!(body["images"][0]["prompt"]
            .as_str()
            .unwrap()
            .contains("wearing red evening dress"));
        assert_eq!(body["meta"]["fashion_ai_used"], false);
        assert_eq!(body["meta"]["seed"], 11);
        assert!(body["meta"]["style_theme"].is_null());
        assert_eq!(body["meta"]["occasion"], "gala");
        assert_eq!(body["meta"]["clothing_request"], "Red Evening Dress");
    }
}
