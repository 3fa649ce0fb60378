use actix_web::{middleware, web, App, HttpServer};
use anyhow::{Context, Result};
use moodlens_core::{HaarFaceLocator, OnnxEmotionClassifier, PredictionPipeline};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod api;
mod config;
mod identity;

use api::AppState;
use config::Config;
use identity::{IdentityGateway, SupabaseGateway, UnconfiguredGateway};

#[actix_web::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!("moodlensd starting");

    let config = Config::load()?;
    tracing::info!(model_dir = %config.model_dir.display(), "configuration loaded");

    let locator = HaarFaceLocator::load(&config.cascade_path(), config.locator)
        .context("loading face cascade")?;
    let classifier =
        OnnxEmotionClassifier::load(&config.classifier_model_path(), config.inference_threads)
            .context("loading emotion model")?;
    let pipeline = Arc::new(PredictionPipeline::new(locator, classifier));

    let identity: Arc<dyn IdentityGateway> = match &config.identity {
        Some(id) => Arc::new(
            SupabaseGateway::new(&id.url, &id.anon_key, id.timeout)
                .context("building identity client")?,
        ),
        None => {
            tracing::warn!("SUPABASE_URL / SUPABASE_ANON_KEY not set; account routes will fail");
            Arc::new(UnconfiguredGateway)
        }
    };

    let state = web::Data::new(AppState { pipeline, identity });
    let allowed_origins = config.allowed_origins.clone();
    let max_payload_bytes = config.max_payload_bytes;

    let mut server = HttpServer::new(move || {
        App::new()
            .wrap(api::cors(&allowed_origins))
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .configure(api::routes(max_payload_bytes))
    });
    if let Some(workers) = config.workers {
        server = server.workers(workers);
    }

    let server = server
        .bind(config.bind_addr.as_str())
        .with_context(|| format!("binding {}", config.bind_addr))?;

    tracing::info!(addr = %config.bind_addr, "moodlensd ready");
    server.run().await?;
    tracing::info!("moodlensd shutting down");

    Ok(())
}
