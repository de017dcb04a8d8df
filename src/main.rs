mod api;
mod bootstrap;
mod clock;
mod config;
mod error;
mod gvms;
mod ledger;
mod middleware;
mod polling;
mod publisher;
mod scheduler;
mod server;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use validator::Validate;

// Initialize logging and tracing
fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,tower_http=debug,gmr_finder=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before anything reads the environment
    dotenv::dotenv().ok();

    init_tracing();

    info!("🚀 Starting GMR Finder");

    let config = config::Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;
    info!(
        store = ?config.store,
        max_poll_size = config.polling.max_poll_size,
        polling_enabled = config.features.enable_gmr_polling,
        "Configuration loaded"
    );

    let application = bootstrap::initialize_app(&config)
        .await
        .context("Failed to initialize application")?;

    // Create HTTP server
    let app = server::create_app(application.state);

    // Run until a shutdown signal arrives
    server::run_server(app, &config.bind_address)
        .await
        .context("HTTP server failed")?;

    bootstrap::stop_jobs(application.jobs, config.jobs_stop_timeout()).await;

    info!("👋 Shutdown complete");
    Ok(())
}
