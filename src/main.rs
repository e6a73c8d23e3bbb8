use anyhow::Result;
use clap::{Parser, Subcommand};
use reqwest::Client;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use strato_cli::cli::{list, login, raw, wif};
use strato_cli::config::Config;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Authenticate with the Strato control plane
    Login {
        /// Control plane URL (defaults to the hosted service)
        #[arg(long)]
        url: Option<String>,
        /// Bearer token issued by the control plane
        #[arg(long)]
        token: String,
    },
    /// Remove stored credentials
    Logout,
    /// Print the stored access token
    Token {
        /// Also print the token's expiration
        #[arg(long)]
        full: bool,
    },
    /// Send a raw GET request to the control plane API
    Get {
        /// API path, e.g. /api/v1/clusters
        path: String,
    },
    /// Send a raw POST request to the control plane API
    Post {
        /// API path, e.g. /api/v1/clusters
        path: String,
        /// File containing the JSON request body ('-' for stdin)
        #[arg(long)]
        body: Option<PathBuf>,
    },
    /// List control plane resources
    #[command(subcommand)]
    #[command(visible_alias = "ls")]
    List(ListCommands),
    /// Manage GCP workload identity federation
    #[command(subcommand)]
    Wif(WifCommands),
}

#[derive(Subcommand, Debug)]
enum ListCommands {
    /// List clusters
    Clusters {
        /// Only show managed clusters
        #[arg(long)]
        managed: bool,
    },
    /// List machine pools of a cluster
    MachinePools {
        /// Cluster name or ID
        cluster: String,
    },
    /// List users of a cluster
    Users {
        /// Cluster name or ID
        cluster: String,
    },
    /// List available cloud providers
    Providers,
    /// List available cluster versions
    Versions,
    /// List quota costs for the current organization
    Quota,
}

#[derive(Subcommand, Debug)]
enum WifCommands {
    /// Create a new federation configuration and provision it
    #[command(visible_alias = "c")]
    Create {
        /// Display name for the configuration
        #[arg(long)]
        name: String,
        /// GCP project to provision into
        #[arg(long)]
        project: String,
        /// Workload identity pool id (defaults to '<name>-pool')
        #[arg(long)]
        pool_id: Option<String>,
        /// Apply changes directly (auto) or write a script (manual)
        #[arg(long, value_enum, default_value = "auto")]
        mode: wif::Mode,
        /// Directory the manual-mode script is written to
        #[arg(long, default_value = ".")]
        target_dir: PathBuf,
    },
    /// Re-converge cloud resources for an existing configuration
    #[command(visible_alias = "u")]
    Update {
        /// Configuration name or ID
        config: String,
        #[arg(long, value_enum, default_value = "auto")]
        mode: wif::Mode,
        #[arg(long, default_value = ".")]
        target_dir: PathBuf,
    },
    /// Delete a federation configuration and its cloud resources
    #[command(visible_alias = "del")]
    #[command(visible_alias = "rm")]
    Delete {
        /// Configuration name or ID
        config: String,
        #[arg(long, value_enum, default_value = "auto")]
        mode: wif::Mode,
        /// Show what would be deleted without changing anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Print a federation configuration as JSON
    Get {
        /// Configuration name or ID
        config: String,
    },
    /// Show a federation configuration in human-readable form
    #[command(visible_alias = "s")]
    Describe {
        /// Configuration name or ID
        config: String,
    },
    /// List federation configurations
    #[command(visible_alias = "ls")]
    List,
    /// Check whether a configuration is fully provisioned
    #[command(visible_alias = "v")]
    Verify {
        /// Configuration name or ID
        config: String,
    },
    /// Write the provisioning script without applying anything
    Generate {
        /// Configuration name or ID
        config: String,
        /// Directory the script and JWKS file are written to
        #[arg(long, default_value = ".")]
        target_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let http_client = Client::new();
    let mut config = Config::load()?;

    match &cli.command {
        Commands::Login { url, token } => {
            login::login(&http_client, &mut config, url.as_deref(), token).await?;
        }
        Commands::Logout => {
            login::logout(&mut config)?;
        }
        Commands::Token { full } => {
            login::token(&config, *full)?;
        }
        Commands::Get { path } => {
            raw::get(&http_client, &config, path).await?;
        }
        Commands::Post { path, body } => {
            raw::post(&http_client, &config, path, body.as_deref()).await?;
        }
        Commands::List(list_cmd) => match list_cmd {
            ListCommands::Clusters { managed } => {
                list::clusters(&http_client, &config, *managed).await?;
            }
            ListCommands::MachinePools { cluster } => {
                list::machine_pools(&http_client, &config, cluster).await?;
            }
            ListCommands::Users { cluster } => {
                list::users(&http_client, &config, cluster).await?;
            }
            ListCommands::Providers => {
                list::providers(&http_client, &config).await?;
            }
            ListCommands::Versions => {
                list::versions(&http_client, &config).await?;
            }
            ListCommands::Quota => {
                list::quota(&http_client, &config).await?;
            }
        },
        Commands::Wif(wif_cmd) => match wif_cmd {
            WifCommands::Create {
                name,
                project,
                pool_id,
                mode,
                target_dir,
            } => {
                wif::create(
                    &http_client,
                    &config,
                    name,
                    project,
                    pool_id.as_deref(),
                    *mode,
                    target_dir,
                )
                .await?;
            }
            WifCommands::Update {
                config: key,
                mode,
                target_dir,
            } => {
                wif::update(&http_client, &config, key, *mode, target_dir).await?;
            }
            WifCommands::Delete {
                config: key,
                mode,
                dry_run,
            } => {
                wif::delete(&http_client, &config, key, *mode, *dry_run).await?;
            }
            WifCommands::Get { config: key } => {
                wif::get(&http_client, &config, key).await?;
            }
            WifCommands::Describe { config: key } => {
                wif::describe(&http_client, &config, key).await?;
            }
            WifCommands::List => {
                wif::list(&http_client, &config).await?;
            }
            WifCommands::Verify { config: key } => {
                wif::verify(&http_client, &config, key).await?;
            }
            WifCommands::Generate {
                config: key,
                target_dir,
            } => {
                wif::generate(&http_client, &config, key, target_dir).await?;
            }
        },
    }

    Ok(())
}
