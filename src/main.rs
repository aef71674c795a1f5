// src/main.rs
mod app;
mod capture;
mod config;
mod detector;
mod dispatch;
mod dtw;
mod gesture;
mod landmarks;
mod motion;
mod pipeline;
mod plugin;
mod store;
mod trainer;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::app::App;
use crate::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;

    let mut app = App::new(config)?;
    app.load_gestures()?;
    app.set_on_match(Arc::new(|_id, name| {
        info!(gesture = name, "gesture recognized");
    }));
    app.set_enabled(true);
    app.start()?;

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    app.stop().await;

    Ok(())
}
