//! # Convoy Server
//!
//! Application entry point: tracing setup, configuration loading, database
//! pool creation, and the HTTP/websocket server.

use anyhow::Result;
use tracing::info;

use convoy::config::Settings;
use convoy::startup::Application;

#[tokio::main]
async fn main() -> Result<()> {
    convoy::telemetry::init_tracing();

    info!("Starting Convoy...");

    let settings = Settings::load()?;
    info!(
        host = %settings.server.host,
        port = %settings.server.port,
        environment = %settings.environment,
        "Configuration loaded"
    );

    let application = Application::build(settings).await?;

    info!("Server ready to accept connections");
    application.run_until_stopped().await?;

    Ok(())
}
