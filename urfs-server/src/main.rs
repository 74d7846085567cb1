mod config;
mod server;

use clap::{Parser, Subcommand};
use config::Config;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "urfs")]
#[command(about = "Replicated file directory over content-addressed storage nodes")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a directory node
    Directory {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.yaml")]
        config: String,
    },
    /// Start a storage node
    Storage {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.yaml")]
        config: String,
    },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "urfs=info,urfs_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let (role, config_path) = match &cli.command {
        Commands::Directory { config } => ("directory", config),
        Commands::Storage { config } => ("storage", config),
    };
    tracing::info!("Starting urfs {} node with config: {}", role, config_path);

    let cfg = match Config::from_file(config_path) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    tracing::info!(
        "Node ID: {}, Bind: {}, Advertise: {}",
        cfg.node.node_id,
        cfg.node.bind_addr,
        cfg.node.effective_address()
    );

    let result = match cli.command {
        Commands::Directory { .. } => server::run_directory_server(cfg).await,
        Commands::Storage { .. } => server::run_storage_server(cfg).await,
    };

    if let Err(e) = result {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
