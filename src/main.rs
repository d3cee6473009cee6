/// Storyloom workflow core server
///
/// Main entry point. Loads configuration from the environment and starts the
/// HTTP server exposing the workflow management and run-tracking API.

use storyloom::{config::Config, server::start_server};

/// Application entry point
///
/// The server provides:
/// - Definition/version/lock management at /api/definitions/*
/// - Run registry and sub-workflow tracking at /api/runs/* and /api/subworkflows/*
/// - Health check at /healthz
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::default();

    start_server(config).await?;

    Ok(())
}
