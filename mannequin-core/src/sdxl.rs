use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context, Error, Result};
use candle_core::{DType, Device, IndexOp, Tensor, D};
use candle_nn::Module;
use candle_transformers::models::stable_diffusion::{
    self, clip::ClipTextTransformer, unet_2d::UNet2DConditionModel, vae::AutoEncoderKL,
    StableDiffusionConfig,
};
use hf_hub::api::tokio::Api;
use image::DynamicImage;
use tokenizers::Tokenizer;

use crate::{default_dtype, select_device, tensor_to_image, DeviceMap, PipelineLike, RenderRequest};

/// SDXL latent scaling factor, applied before the VAE decode.
const VAE_SCALE_FACTOR: f64 = 0.13025;

const FIRST_TOKENIZER_REPO: &str = "openai/clip-vit-large-patch14";
const SECOND_TOKENIZER_REPO: &str = "laion/CLIP-ViT-bigG-14-laion2B-39B-b160k";
/// The stock XL VAE overflows in half precision; these weights are patched.
const FP16_FIX_VAE_REPO: &str = "madebyollin/sdxl-vae-fp16-fix";

/// Supported checkpoint families, detected from the model name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdxlVariant {
    Base,
    Turbo,
}

impl SdxlVariant {
    pub fn from_name(model_name: &str) -> Option<Self> {
        let name = model_name.to_uppercase();
        if name.contains("TURBO") {
            Some(SdxlVariant::Turbo)
        } else if name.contains("XL") {
            Some(SdxlVariant::Base)
        } else {
            None
        }
    }

    fn config(self, height: usize, width: usize) -> StableDiffusionConfig {
        match self {
            SdxlVariant::Base => StableDiffusionConfig::sdxl(None, Some(height), Some(width)),
            SdxlVariant::Turbo => StableDiffusionConfig::sdxl_turbo(None, Some(height), Some(width)),
        }
    }
}

/// Loads the pipeline serving `model_id`, failing on checkpoints outside the
/// Stable Diffusion XL family.
pub async fn load_pipeline(
    model_id: &str,
    api: Api,
    device_map: DeviceMap,
) -> Result<Arc<dyn PipelineLike>> {
    let variant = SdxlVariant::from_name(model_id).ok_or_else(|| {
        anyhow!("unsupported model {model_id:?}, expected a Stable Diffusion XL checkpoint")
    })?;
    tracing::info!(model = model_id, ?variant, "loading pipeline");
    let pipeline = SdxlLoader::load(model_id.to_string(), variant, api, device_map).await?;
    Ok(Arc::new(pipeline))
}

pub trait PipelineLoader {
    type Pipeline: PipelineLike;

    fn load(
        model_id: String,
        variant: SdxlVariant,
        api: Api,
        device_map: DeviceMap,
    ) -> impl Future<Output = Result<Self::Pipeline>>
    where
        Self: Sized;
}

pub struct SdxlLoader;

impl PipelineLoader for SdxlLoader {
    type Pipeline = SdxlPipeline;

    async fn load(
        model_id: String,
        variant: SdxlVariant,
        api: Api,
        device_map: DeviceMap,
    ) -> Result<SdxlPipeline> {
        let device = select_device(device_map).context("failed to set up device")?;
        let dtype = default_dtype(&device);
        let use_f16 = dtype == DType::F16;

        let tokenizer_file = api
            .model(FIRST_TOKENIZER_REPO.to_string())
            .get("tokenizer.json")
            .await
            .context("failed to get the first tokenizer")?;
        let tokenizer_2_file = api
            .model(SECOND_TOKENIZER_REPO.to_string())
            .get("tokenizer.json")
            .await
            .context("failed to get the second tokenizer")?;

        let repo = api.repo(hf_hub::Repo::model(model_id));
        let text_encoder_file = repo
            .get("text_encoder/model.safetensors")
            .await
            .context("failed to get the first text encoder weights")?;
        let text_encoder_2_file = repo
            .get("text_encoder_2/model.safetensors")
            .await
            .context("failed to get the second text encoder weights")?;
        let vae_file = if use_f16 {
            api.model(FP16_FIX_VAE_REPO.to_string())
                .get("diffusion_pytorch_model.safetensors")
                .await
                .context("failed to get the patched VAE weights")?
        } else {
            repo.get("vae/diffusion_pytorch_model.safetensors")
                .await
                .context("failed to get the VAE weights")?
        };
        let unet_file = if use_f16 {
            repo.get("unet/diffusion_pytorch_model.fp16.safetensors")
                .await
                .context("failed to get the UNet weights")?
        } else {
            repo.get("unet/diffusion_pytorch_model.safetensors")
                .await
                .context("failed to get the UNet weights")?
        };

        let config = variant.config(crate::DEFAULT_HEIGHT, crate::DEFAULT_WIDTH);
        let clip2_config = config
            .clip2
            .clone()
            .ok_or_else(|| anyhow!("model config is missing the second text encoder"))?;
        let tokenizer = Tokenizer::from_file(tokenizer_file)
            .map_err(Error::msg)
            .context("failed to load the first tokenizer")?;
        let tokenizer_2 = Tokenizer::from_file(tokenizer_2_file)
            .map_err(Error::msg)
            .context("failed to load the second tokenizer")?;

        // Both text encoders run in full precision; embeddings are cast to
        // the pipeline dtype after the forward pass.
        let text_encoder = stable_diffusion::build_clip_transformer(
            &config.clip,
            text_encoder_file,
            &device,
            DType::F32,
        )
        .context("failed to load the first text encoder")?;
        let text_encoder_2 = stable_diffusion::build_clip_transformer(
            &clip2_config,
            text_encoder_2_file,
            &device,
            DType::F32,
        )
        .context("failed to load the second text encoder")?;
        let vae = config
            .build_vae(vae_file, &device, dtype)
            .context("failed to load the VAE")?;
        let unet = config
            .build_unet(unet_file, &device, 4, cfg!(feature = "flash-attn"), dtype)
            .context("failed to load the UNet")?;

        Ok(SdxlPipeline {
            device,
            dtype,
            variant,
            clip_config: config.clip.clone(),
            clip2_config,
            tokenizer,
            tokenizer_2,
            text_encoder,
            text_encoder_2,
            unet,
            vae,
        })
    }
}

pub struct SdxlPipeline {
    device: Device,
    dtype: DType,
    variant: SdxlVariant,
    clip_config: stable_diffusion::clip::Config,
    clip2_config: stable_diffusion::clip::Config,
    tokenizer: Tokenizer,
    tokenizer_2: Tokenizer,
    text_encoder: ClipTextTransformer,
    text_encoder_2: ClipTextTransformer,
    unet: UNet2DConditionModel,
    vae: AutoEncoderKL,
}

impl SdxlPipeline {
    fn prompt_ids(
        &self,
        tokenizer: &Tokenizer,
        prompt: &str,
        pad_id: u32,
        max_len: usize,
    ) -> Result<Tensor> {
        let mut tokens = tokenizer
            .encode(prompt, true)
            .map_err(Error::msg)?
            .get_ids()
            .to_vec();
        if tokens.len() > max_len {
            tracing::warn!(tokens = tokens.len(), max = max_len, "prompt too long, truncating");
            tokens.truncate(max_len);
        }
        tokens.resize(max_len, pad_id);
        let tokens = Tensor::new(tokens.as_slice(), &self.device)?.unsqueeze(0)?;
        Ok(tokens)
    }

    /// Encodes a prompt with one of the two text encoders, stacking the
    /// unconditional embedding in front when classifier-free guidance is on.
    fn encode_half(
        &self,
        tokenizer: &Tokenizer,
        encoder: &ClipTextTransformer,
        clip_config: &stable_diffusion::clip::Config,
        prompt: &str,
        negative_prompt: &str,
        use_guide_scale: bool,
    ) -> Result<Tensor> {
        let pad_token = clip_config.pad_with.as_deref().unwrap_or("<|endoftext|>");
        let pad_id = *tokenizer
            .get_vocab(true)
            .get(pad_token)
            .ok_or_else(|| anyhow!("tokenizer vocabulary is missing the {pad_token:?} pad token"))?;
        let max_len = clip_config.max_position_embeddings;

        let tokens = self.prompt_ids(tokenizer, prompt, pad_id, max_len)?;
        let embedding = encoder.forward(&tokens)?;

        if use_guide_scale {
            let uncond_tokens = self.prompt_ids(tokenizer, negative_prompt, pad_id, max_len)?;
            let uncond_embedding = encoder.forward(&uncond_tokens)?;
            Ok(Tensor::cat(&[uncond_embedding, embedding], 0)?.to_dtype(self.dtype)?)
        } else {
            Ok(embedding.to_dtype(self.dtype)?)
        }
    }

    fn encode_prompt(
        &self,
        prompt: &str,
        negative_prompt: &str,
        use_guide_scale: bool,
    ) -> Result<Tensor> {
        let first = self.encode_half(
            &self.tokenizer,
            &self.text_encoder,
            &self.clip_config,
            prompt,
            negative_prompt,
            use_guide_scale,
        )?;
        let second = self.encode_half(
            &self.tokenizer_2,
            &self.text_encoder_2,
            &self.clip2_config,
            prompt,
            negative_prompt,
            use_guide_scale,
        )?;
        Ok(Tensor::cat(&[first, second], D::Minus1)?)
    }
}

impl PipelineLike for SdxlPipeline {
    fn render(&self, request: &RenderRequest) -> Result<DynamicImage> {
        let width = request.width();
        let height = request.height();
        let steps = request.steps();
        let guidance_scale = request.guidance_scale();

        if width % 8 != 0 || height % 8 != 0 {
            anyhow::bail!("width and height must be multiples of 8, got {width}x{height}");
        }

        // Identical requests with the same seed produce identical images on
        // the same backend.
        if let Some(seed) = request.seed {
            self.device.set_seed(seed)?;
        }

        let use_guide_scale = guidance_scale > 1.0;
        let text_embeddings =
            self.encode_prompt(&request.prompt, request.negative_prompt(), use_guide_scale)?;

        let mut scheduler = self.variant.config(height, width).build_scheduler(steps)?;
        let latents = Tensor::randn(0f32, 1f32, (1, 4, height / 8, width / 8), &self.device)?;
        let latents = (latents * scheduler.init_noise_sigma())?;
        let mut latents = latents.to_dtype(self.dtype)?;

        let started = Instant::now();
        let timesteps = scheduler.timesteps().to_vec();
        for (step_index, &timestep) in timesteps.iter().enumerate() {
            let latent_input = if use_guide_scale {
                Tensor::cat(&[&latents, &latents], 0)?
            } else {
                latents.clone()
            };
            let latent_input = scheduler.scale_model_input(latent_input, timestep)?;
            let noise_pred = self
                .unet
                .forward(&latent_input, timestep as f64, &text_embeddings)?;
            let noise_pred = if use_guide_scale {
                let chunks = noise_pred.chunk(2, 0)?;
                let (uncond, text) = (&chunks[0], &chunks[1]);
                (uncond + ((text - uncond)? * guidance_scale)?)?
            } else {
                noise_pred
            };
            latents = scheduler.step(&noise_pred, timestep, &latents)?;
            tracing::debug!(step = step_index + 1, total = steps, "denoising");
        }
        tracing::info!(
            width,
            height,
            steps,
            elapsed = ?started.elapsed(),
            "sampling finished"
        );

        let image = self.vae.decode(&(latents / VAE_SCALE_FACTOR)?)?;
        let image = ((image / 2.)? + 0.5)?.to_device(&Device::Cpu)?;
        let image = (image.clamp(0f32, 1f32)? * 255.)?.to_dtype(DType::U8)?;
        tensor_to_image(&image.i(0)?)
    }
}
