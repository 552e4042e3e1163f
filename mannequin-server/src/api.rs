use anyhow::Result;
use base64::{prelude::BASE64_STANDARD, Engine};
use image::DynamicImage;
use mannequin_core::orchestrator::MultiViewAvatar;
use mannequin_core::View;
use serde::Serialize;
use std::io::Cursor;

/// Encodes an image as a `data:image/png;base64,...` URL for the browser.
pub(crate) fn image_to_data_url(img: &DynamicImage) -> Result<String> {
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)?;
    Ok(format!(
        "data:image/png;base64,{}",
        BASE64_STANDARD.encode(&bytes)
    ))
}

#[derive(Serialize)]
pub(crate) struct HealthResponse {
    pub status: &'static str,
    pub device: &'static str,
    pub model_loaded: bool,
}

#[derive(Serialize)]
pub(crate) struct GenerateResponse {
    #[serde(rename = "imageDataUrl")]
    pub image_data_url: String,
    pub meta: GenerateMeta,
}

/// Settings echo for raw generation; `seed` stays null when the request did
/// not carry one.
#[derive(Serialize)]
pub(crate) struct GenerateMeta {
    pub device: &'static str,
    pub dtype: &'static str,
    pub width: usize,
    pub height: usize,
    pub steps: usize,
    pub guidance_scale: f64,
    pub seed: Option<u64>,
    pub model: String,
}

#[derive(Serialize)]
pub(crate) struct AvatarResponse {
    pub success: bool,
    #[serde(rename = "imageDataUrl")]
    pub image_data_url: String,
    pub meta: AvatarMeta,
}

#[derive(Serialize)]
pub(crate) struct AvatarMeta {
    pub prompt: String,
    pub device: &'static str,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

#[derive(Serialize)]
pub(crate) struct ViewImage {
    pub view: View,
    #[serde(rename = "imageDataUrl")]
    pub image_data_url: String,
    pub prompt: String,
}

#[derive(Serialize)]
pub(crate) struct MultiViewResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub images: Vec<ViewImage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<MultiViewMeta>,
}

impl MultiViewResponse {
    /// In-band failure body: HTTP 200 with `success: false` and no images.
    pub fn failure(message: String) -> Self {
        Self {
            success: false,
            error: Some(message),
            images: Vec::new(),
            meta: None,
        }
    }
}

#[derive(Serialize)]
pub(crate) struct MultiViewMeta {
    pub gender: String,
    #[serde(rename = "skinTone")]
    pub skin_tone: String,
    pub seed: u64,
    pub device: &'static str,
    pub model: String,
    pub views_generated: usize,
}

#[derive(Serialize)]
pub(crate) struct FashionResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub images: Vec<ViewImage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<FashionMeta>,
}

impl FashionResponse {
    pub fn failure(message: String) -> Self {
        Self {
            success: false,
            error: Some(message),
            images: Vec::new(),
            meta: None,
        }
    }
}

/// Fashion batches echo the full request back; `style_theme` and `occasion`
/// serialize as null when absent.
#[derive(Serialize)]
pub(crate) struct FashionMeta {
    pub clothing_request: String,
    pub gender: String,
    #[serde(rename = "skinTone")]
    pub skin_tone: String,
    pub style_theme: Option<String>,
    pub occasion: Option<String>,
    pub seed: u64,
    pub device: &'static str,
    pub model: String,
    pub views_generated: usize,
    pub fashion_ai_used: bool,
}

/// Encodes every rendered view for the wire, preserving order.
pub(crate) fn encode_views(avatar: &MultiViewAvatar) -> Result<Vec<ViewImage>> {
    avatar
        .views
        .iter()
        .map(|generated| {
            Ok(ViewImage {
                view: generated.view,
                image_data_url: image_to_data_url(&generated.image)?,
                prompt: generated.prompt.clone(),
            })
        })
        .collect()
}
