mod init;
mod server;

use rmcp::ServiceExt;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::server::{Backends, ForgeServer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // stdout carries the protocol; logs go to stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Handle `prdforge-mcp init` subcommand
    if std::env::args().nth(1).as_deref() == Some("init") {
        return init::init_project();
    }

    let settings = prdforge_core::settings::read_settings();
    let backends = Backends::from_settings(&settings);

    info!("starting prdforge MCP server");
    let service = ForgeServer::new(backends)
        .serve(rmcp::transport::io::stdio())
        .await
        .inspect_err(|e| tracing::error!(error = %e, "MCP server error"))?;
    service.waiting().await?;
    info!("prdforge MCP server stopped");
    Ok(())
}
