use clap::Parser;
use coderadar_api::Server;
use coderadar_core::{ConfigManager, LoggingConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "coderadar-server", version, about = "Progressive repository analysis server")]
struct Cli {
    /// Configuration file (defaults to ./.coderadar.toml, then ~/.coderadar/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address override
    #[arg(long)]
    host: Option<String>,

    /// Listen port override
    #[arg(short, long)]
    port: Option<u16>,

    /// Write a default configuration file to this path and exit
    #[arg(long, value_name = "PATH")]
    init_config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Some(path) = &cli.init_config {
        ConfigManager::create_default_config(path)?;
        println!("Wrote default configuration to {}", path.display());
        return Ok(());
    }

    let mut manager = match &cli.config {
        Some(path) => ConfigManager::from_path(path)?,
        None => ConfigManager::load()?,
    };
    init_tracing(&manager.config().logging);

    if let Some(path) = manager.config_path() {
        tracing::info!("loaded configuration from {}", path.display());
    }
    let server_config = &mut manager.config_mut().server;
    if let Some(host) = cli.host {
        server_config.host = host;
    }
    if let Some(port) = cli.port {
        server_config.port = port;
    }
    let config = manager.config().clone();

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let server = Server::new(addr, config).await?;
    server.run().await
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},tower_http=info", logging.level)));
    let registry = tracing_subscriber::registry().with(filter);
    match logging.format.as_str() {
        "json" => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        "compact" => registry
            .with(tracing_subscriber::fmt::layer().compact())
            .init(),
        _ => registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .init(),
    }
}
