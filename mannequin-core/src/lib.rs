pub mod device_map;
pub mod enrichment;
pub mod handle;
pub mod orchestrator;
pub mod prompt;
pub mod sdxl;
mod util;
pub mod view;

pub use device_map::*;
pub use enrichment::{EnrichmentClient, EnrichmentOutcome, DEFAULT_ENRICHMENT_URL};
pub use handle::{PipelineHandle, PipelineInfo, PipelineSpec};
use image::DynamicImage;
pub use orchestrator::{Orchestrator, DEFAULT_SEED};
pub use sdxl::{SdxlLoader, SdxlVariant};
use serde::{Deserialize, Serialize};
pub(crate) use util::*;
pub use view::View;

/// Portrait canvas shared by every avatar endpoint.
pub const DEFAULT_WIDTH: usize = 832;
pub const DEFAULT_HEIGHT: usize = 1216;
pub const DEFAULT_STEPS: usize = 28;
pub const DEFAULT_GUIDANCE_SCALE: f64 = 5.5;

// Define the request type shared by the wire and the pipeline.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, PartialOrd)]
pub struct RenderRequest {
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub width: Option<usize>,
    pub height: Option<usize>,
    pub steps: Option<usize>,
    pub guidance_scale: Option<f64>,
    pub seed: Option<u64>,
}

impl RenderRequest {
    pub fn width(&self) -> usize {
        self.width.unwrap_or(DEFAULT_WIDTH)
    }

    pub fn height(&self) -> usize {
        self.height.unwrap_or(DEFAULT_HEIGHT)
    }

    pub fn steps(&self) -> usize {
        self.steps.unwrap_or(DEFAULT_STEPS)
    }

    pub fn guidance_scale(&self) -> f64 {
        self.guidance_scale.unwrap_or(DEFAULT_GUIDANCE_SCALE)
    }

    pub fn negative_prompt(&self) -> &str {
        self.negative_prompt
            .as_deref()
            .unwrap_or(prompt::DEFAULT_NEGATIVE_PROMPT)
    }
}

pub trait PipelineLike: Send + Sync {
    fn render(&self, request: &RenderRequest) -> anyhow::Result<DynamicImage>;
}
