use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use voxa::api::{self, AppState};
use voxa::config::ServiceConfig;
use voxa::inference::t5::{device_label, T5Service};
use voxa::inference::{GenerationConfig, InferenceService};
use voxa::logging;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = ServiceConfig::parse();

    // -----------------------------
    // Logging
    // -----------------------------
    logging::init("info,tower_http=info");

    println!("🚀 Starting Voxa inference server...");
    println!("📁 Model: {}", config.model);

    // -----------------------------
    // Model + generation settings, loaded once
    // -----------------------------
    let engine = T5Service::load(&config.model, config.device.as_deref()).await?;
    let device = device_label(engine.device()).to_string();

    let generation = GenerationConfig {
        seed: config.seed,
        ..Default::default()
    };
    let infer = Arc::new(InferenceService::new(Arc::new(engine), generation));

    let state = AppState {
        infer,
        model_id: config.model.clone(),
        device,
    };

    let app = api::router(state);

    let addr = config.bind;
    println!("🌐 HTTP listening on http://{addr}");
    println!("💬 Chat endpoint at http://{addr}/chat");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}
