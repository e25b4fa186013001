#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Runs one incremental sync of Denver traffic incidents.
//!
//! Configuration comes from the environment, optionally seeded from a
//! `.env` file; see [`SyncConfig`].

use vision_zero_sync::config::{self, SyncConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Before the logger, so RUST_LOG may come from .env too.
    let dotenv = config::load_dotenv();

    pretty_env_logger::init();

    match dotenv {
        Ok(Some(path)) => log::debug!("Loaded environment from {}", path.display()),
        Ok(None) => {}
        Err(e) => log::warn!("Failed to load .env file: {e}"),
    }

    let config = SyncConfig::from_env()?;
    let report = vision_zero_sync::run(&config).await?;

    log::info!(
        "Done: mark {}, {} fetched, {} inserted, {} updated, {} failed",
        report.high_water_mark,
        report.fetched,
        report.inserted,
        report.updated,
        report.failed,
    );

    Ok(())
}
