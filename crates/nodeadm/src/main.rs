//! nodeadm - hybrid node lifecycle CLI
//!
//! Installs, initializes, upgrades and removes the software that lets a Linux
//! host join a managed Kubernetes cluster.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use nodeadm_common::artifact::DEFAULT_MANIFEST_URL;
use nodeadm_common::config::Skip;
use nodeadm_common::platform::{ContainerdSource, CredentialProvider};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nodeadm")]
#[command(about = "Hybrid node lifecycle manager", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Give up after this many minutes
    #[arg(long, global = true, default_value_t = 20)]
    timeout: u64,

    /// Debug logging (RUST_LOG takes precedence)
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Install node components for a Kubernetes version
    Install {
        /// Kubernetes version, e.g. 1.31
        kubernetes_version: String,

        /// ssm or iam-ra
        #[arg(long, short = 'p')]
        credential_provider: CredentialProvider,

        /// none, distro or docker
        #[arg(long, default_value = "none")]
        containerd_source: ContainerdSource,

        /// Release manifest listing artifact URLs
        #[arg(long, default_value = DEFAULT_MANIFEST_URL)]
        manifest_url: String,
    },

    /// Remove everything nodeadm installed
    Uninstall {
        /// Checks to skip: pod-validation, node-validation
        #[arg(long, value_delimiter = ',')]
        skip: Vec<Skip>,
    },

    /// Upgrade node components in place and restart the node
    Upgrade {
        kubernetes_version: String,

        /// NodeConfig file
        #[arg(long, short = 'c')]
        config_source: PathBuf,

        #[arg(long, value_delimiter = ',')]
        skip: Vec<Skip>,

        #[arg(long, default_value = DEFAULT_MANIFEST_URL)]
        manifest_url: String,
    },

    /// Configure and start the node daemons
    Init {
        /// NodeConfig file
        #[arg(long, short = 'c')]
        config_source: PathBuf,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    commands::require_root()?;

    let timeout = Duration::from_secs(cli.timeout * 60);

    match cli.command {
        Commands::Install {
            kubernetes_version,
            credential_provider,
            containerd_source,
            manifest_url,
        } => {
            commands::install(
                kubernetes_version,
                credential_provider,
                containerd_source,
                manifest_url,
                timeout,
            )
            .await
        }
        Commands::Uninstall { skip } => commands::uninstall(skip, timeout).await,
        Commands::Upgrade {
            kubernetes_version,
            config_source,
            skip,
            manifest_url,
        } => commands::upgrade(kubernetes_version, config_source, skip, manifest_url, timeout).await,
        Commands::Init { config_source } => commands::init(config_source, timeout).await,
    }
}
