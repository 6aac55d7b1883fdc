//! Meshchat peer entry point.

mod app;
mod config;
mod display;
mod tui;

use clap::Parser;

use crate::app::App;
use crate::config::Config;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let mut config = Config::parse();
    if let Err(e) = config.ensure_dirs() {
        tracing::error!(error = %e, "data directory setup failed");
        std::process::exit(1);
    }

    let mut app = match App::build(&config).await {
        Ok(app) => app,
        Err(e) => {
            tracing::error!(error = %e, "startup failed");
            std::process::exit(1);
        }
    };
    if let Err(e) = app.start().await {
        tracing::error!(error = %e, "startup failed");
        std::process::exit(1);
    }

    app.wait().await;
}
