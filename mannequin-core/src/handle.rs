use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use hf_hub::api::tokio::Api;
use image::DynamicImage;
use tokio::sync::{Mutex, OnceCell};

use crate::device_map::{device_label, DeviceMap};
use crate::sdxl;
use crate::{PipelineLike, RenderRequest};

/// Load-time configuration for the lazily initialized pipeline.
#[derive(Debug, Clone)]
pub struct PipelineSpec {
    pub model_id: String,
    pub device_map: DeviceMap,
}

/// Static facts about the pipeline, available before it is loaded.
#[derive(Debug, Clone)]
pub struct PipelineInfo {
    pub model_id: String,
    pub device: &'static str,
    pub dtype: &'static str,
}

impl PipelineInfo {
    pub fn probe(model_id: &str, device_map: DeviceMap) -> Self {
        let device = device_label(device_map);
        let dtype = if device == "cpu" { "float32" } else { "float16" };
        Self {
            model_id: model_id.to_string(),
            device,
            dtype,
        }
    }
}

/// Owner of the process-wide pipeline instance.
///
/// Loading happens once, on first use, and the instance lives for the rest of
/// the process. Renders go through a single queue: there is exactly one set
/// of weights in memory and one render in flight at a time.
pub struct PipelineHandle {
    info: PipelineInfo,
    spec: Option<PipelineSpec>,
    pipeline: OnceCell<Arc<dyn PipelineLike>>,
    render_queue: Mutex<()>,
}

impl PipelineHandle {
    /// Handle that loads `spec` on the first render or on [`Self::ensure_loaded`].
    pub fn lazy(spec: PipelineSpec) -> Self {
        let info = PipelineInfo::probe(&spec.model_id, spec.device_map);
        Self {
            info,
            spec: Some(spec),
            pipeline: OnceCell::new(),
            render_queue: Mutex::new(()),
        }
    }

    /// Handle over an already constructed pipeline.
    pub fn preloaded(info: PipelineInfo, pipeline: Arc<dyn PipelineLike>) -> Self {
        Self {
            info,
            spec: None,
            pipeline: OnceCell::new_with(Some(pipeline)),
            render_queue: Mutex::new(()),
        }
    }

    pub fn info(&self) -> &PipelineInfo {
        &self.info
    }

    /// False until the first render (or an explicit [`Self::ensure_loaded`])
    /// has initialized the pipeline. Reported by `/health`.
    pub fn is_loaded(&self) -> bool {
        self.pipeline.initialized()
    }

    pub async fn ensure_loaded(&self) -> Result<()> {
        self.get_or_load().await?;
        Ok(())
    }

    /// Renders through the shared pipeline, loading it first if needed.
    pub async fn render(&self, request: &RenderRequest) -> Result<DynamicImage> {
        let pipeline = self.get_or_load().await?;
        let _slot = self.render_queue.lock().await;
        pipeline.render(request)
    }

    async fn get_or_load(&self) -> Result<&Arc<dyn PipelineLike>> {
        self.pipeline
            .get_or_try_init(|| async {
                let spec = self
                    .spec
                    .as_ref()
                    .ok_or_else(|| anyhow!("pipeline handle has no load configuration"))?;
                let api = Api::new().context("failed to set up the Hugging Face hub client")?;
                let started = Instant::now();
                let pipeline = sdxl::load_pipeline(&spec.model_id, api, spec.device_map).await?;
                tracing::info!(
                    model = %spec.model_id,
                    elapsed = ?started.elapsed(),
                    "pipeline loaded"
                );
                Ok(pipeline)
            })
            .await
    }
}
