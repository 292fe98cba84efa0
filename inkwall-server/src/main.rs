//! Inkwall reference backend.
//!
//! Serves the stroke write endpoint and the live feed from environment
//! configuration (see `inkwall_collab::config`). Build with `--features rocksdb`
//! to persist strokes under `INKWALL_STORAGE_PATH`.

use log::{error, info};

use inkwall_collab::{Backend, ServerConfig};

#[tokio::main]
async fn main() {
    env_logger::init();

    info!("Starting Inkwall backend...");

    let config = ServerConfig::from_env().expect("Invalid configuration");
    let backend = Backend::bind(&config)
        .await
        .expect("Failed to start backend");

    if let Some(seed) = &config.seed_page {
        info!("Seed page {} ready", seed.id);
    }
    info!(
        "Cooldown {} ms, writes {}",
        config.ledger.cooldown.as_millis(),
        if config.insert_secret.is_some() || config.api_key.is_some() {
            "require credentials"
        } else {
            "are open"
        }
    );

    tokio::select! {
        result = backend.run() => {
            if let Err(e) = result {
                error!("Backend stopped: {e}");
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }
}
