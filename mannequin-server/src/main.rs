use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use clap::Parser;
use mannequin_core::enrichment::{EnrichmentClient, DEFAULT_ENRICHMENT_URL};
use mannequin_core::orchestrator::Orchestrator;
use mannequin_core::{DeviceMap, PipelineHandle, PipelineSpec};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod api;
mod handlers;

// Define command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "Mannequin avatar generation server")]
struct Args {
    /// Use CPU instead of GPU
    #[arg(long)]
    cpu: bool,

    /// Stable Diffusion XL checkpoint to serve
    #[arg(long, default_value = "stabilityai/stable-diffusion-xl-base-1.0")]
    model: String,

    /// Host address to bind the server to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to bind the server to
    #[arg(long, default_value_t = 8000)]
    port: u16,

    /// Base URL of the fashion prompt enrichment service
    #[arg(long, default_value = DEFAULT_ENRICHMENT_URL)]
    enrichment_url: String,

    /// Load the pipeline at startup instead of on the first request
    #[arg(long)]
    preload: bool,
}

// Application state shared by all handlers.
#[derive(Clone)]
struct AppState {
    pipeline: Arc<PipelineHandle>,
    avatars: Arc<Orchestrator>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let args = Args::parse();

    let device_map = if args.cpu {
        DeviceMap::ForceCpu
    } else {
        DeviceMap::default()
    };
    let pipeline = Arc::new(PipelineHandle::lazy(PipelineSpec {
        model_id: args.model.clone(),
        device_map,
    }));
    if args.preload {
        pipeline.ensure_loaded().await?;
    }

    let enrichment = EnrichmentClient::new(&args.enrichment_url);
    let avatars = Arc::new(Orchestrator::new(pipeline.clone(), enrichment));
    let state = AppState { pipeline, avatars };

    // --- Build axum router with shared state ---
    let app = Router::new()
        .route("/generate", post(handlers::generate))
        .route("/generate-avatar", post(handlers::generate_avatar))
        .route(
            "/generate-multiview-avatar",
            post(handlers::generate_multiview_avatar),
        )
        .route(
            "/generate-fashion-avatar",
            post(handlers::generate_fashion_avatar),
        )
        .route("/health", get(handlers::health))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    // --- Start the server ---
    let bind_address = format!("{}:{}", args.host, args.port);
    let listener = TcpListener::bind(&bind_address).await?;
    tracing::info!(addr = %listener.local_addr()?, model = %args.model, "started server");
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
