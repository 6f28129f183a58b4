//! Boursa server
//!
//! Loads the configuration, installs logging and serves the API until
//! Ctrl-C.

use anyhow::Context;
use boursa::config::AppConfig;
use boursa::web::{self, AppState};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("Failed to load configuration")?;
    boursa::logging::init(&config.logging)?;

    println!("📊 Boursa v{}", env!("CARGO_PKG_VERSION"));
    info!("⚙️ {}", config.digest());
    for note in &config.load_warnings {
        warn!("⚠️ {}", note);
    }

    let state = AppState::build(config).await?;
    info!(
        "🚀 Storage ready: uploads={} models={} cache={}",
        state.upload_dir.display(),
        state.models_dir.display(),
        state.cache.backend()
    );

    web::serve(state, shutdown_signal()).await?;
    info!("👋 Boursa stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal, stopping server..."),
        Err(e) => {
            error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
