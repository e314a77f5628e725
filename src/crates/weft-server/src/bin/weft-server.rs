//! weft-server binary
//!
//! Loads layered configuration, wires the application, and serves the HTTP
//! surface until SIGINT/SIGTERM.

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use weft_server::config::{resolve_database_path, ConfigLoader};
use weft_server::{shutdown, App};

#[derive(Debug, Parser)]
#[command(name = "weft-server", about = "Workflow automation platform server", version)]
struct Cli {
    /// Bind address, overriding the config file
    #[arg(long)]
    host: Option<String>,

    /// Bind port, overriding the config file
    #[arg(long)]
    port: Option<u16>,

    /// SQLite database path, overriding the config file
    #[arg(long, env = "WEFT_DB")]
    database: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = ConfigLoader::new()
        .load()
        .await
        .context("failed to load configuration")?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(database) = cli.database {
        config.database.path = database;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone())),
        )
        .init();

    let database_path = resolve_database_path(&config.database.path);
    let bind = format!("{}:{}", config.server.host, config.server.port);

    let app = App::build(config, &database_path)
        .await
        .context("failed to build application")?;
    let router = app.router();

    shutdown::install_signal_handlers(app.shutdown.clone());

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {}", bind))?;
    info!(bind = %bind, db = %database_path.display(), "weft-server listening");

    let shutdown_signal = app.shutdown.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown_signal.cancelled().await })
        .await
        .context("server error")?;

    app.stop().await;
    info!("weft-server stopped");
    Ok(())
}
