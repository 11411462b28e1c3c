//! Cluster node binary

use clap::{Parser, Subcommand};
use minicluster::{Config, NodeServer};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "minicluster-node")]
#[command(about = "minicluster node with admin API")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a cluster node
    Serve {
        /// Config file (TOML); ./minicluster.toml when omitted
        #[arg(long)]
        config: Option<PathBuf>,

        /// Node ID (omit to run outside the cluster)
        #[arg(long)]
        id: Option<String>,

        /// Bind address for the admin API
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Database directory
        #[arg(long)]
        db: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            id,
            bind,
            db,
        } => {
            // File and environment first, CLI arguments win
            let mut config = Config::load(config.as_deref())?;
            if id.is_some() {
                config.node.node_id = id;
            }
            if let Some(bind) = bind {
                config.admin.bind_addr = bind;
            }
            if let Some(db) = db {
                config.cluster.db_path = db;
            }

            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| config.log_level.as_str().into()),
                )
                .with(tracing_subscriber::fmt::layer())
                .init();

            NodeServer::new(config).serve().await?;
        }
    }

    Ok(())
}
