mod commands;
mod ui;

use clap::{Parser, Subcommand};
use rpsls_core::{GameConfig, RpslsError};
use rpsls_game::GameError;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "rpsls")]
#[command(about = "Rock Paper Scissors Lizard Spock - peer-to-peer wagers settled on-chain")]
#[command(version)]
struct Cli {
    /// Data directory for configuration
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// JSON-RPC endpoint, overrides the configured one
    #[arg(long, global = true)]
    rpc_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Host a game as Player One and wait for an opponent
    Host {
        /// Address to accept the opponent on, e.g. 0.0.0.0:9470
        #[arg(short, long)]
        listen: Option<String>,
    },
    /// Join a hosted game as Player Two
    Join {
        /// Share link (rpsls://host:port/?peerId=...) or bare session id
        link: String,
    },
    /// List the accounts exposed by the wallet node
    Accounts,
    /// Configuration commands
    #[command(subcommand)]
    Config(commands::ConfigCommands),
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(format!(
            "rpsls={},rpsls_core={},rpsls_game={}",
            log_level, log_level, log_level
        )))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let data_dir = cli.data_dir.unwrap_or_else(|| {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("rpsls")
    });
    tokio::fs::create_dir_all(&data_dir).await?;
    let config_path = data_dir.join("config.json");

    let result = run(cli.command, &config_path, cli.rpc_url).await;

    if let Err(e) = result {
        report(&e);
        std::process::exit(1);
    }

    Ok(())
}

async fn run(command: Commands, config_path: &Path, rpc_url: Option<String>) -> anyhow::Result<()> {
    match command {
        Commands::Config(cmd) => commands::handle_config_command(cmd, config_path, rpc_url).await,
        Commands::Host { listen } => {
            let config = load_config(config_path, rpc_url).await?;
            commands::host_game(config, listen).await
        }
        Commands::Join { link } => {
            let config = load_config(config_path, rpc_url).await?;
            commands::join_game(config, &link).await
        }
        Commands::Accounts => {
            let config = load_config(config_path, rpc_url).await?;
            commands::list_accounts(&config).await
        }
    }
}

async fn load_config(
    path: &Path,
    rpc_url: Option<String>,
) -> rpsls_core::Result<GameConfig> {
    let mut config = GameConfig::load_or_default(path).await?;
    if let Some(url) = rpc_url {
        config.rpc_url = url;
    }
    config.validate()?;
    Ok(config)
}

fn report(e: &anyhow::Error) {
    let core = e
        .downcast_ref::<RpslsError>()
        .or_else(|| match e.downcast_ref::<GameError>() {
            Some(GameError::Core(inner)) => Some(inner),
            _ => None,
        });

    match (core, e.downcast_ref::<GameError>()) {
        (Some(RpslsError::StakeMismatch { required, offered }), _) => {
            eprintln!("Error: Stake mismatch");
            eprintln!("Game requires {} ETH, you offered {} ETH", required, offered);
        }
        (Some(RpslsError::Config(msg)), _) => {
            eprintln!("Error: Invalid configuration: {}", msg);
            eprintln!("Use 'rpsls config init' to write a configuration file");
        }
        (Some(RpslsError::Connection(msg)), _) | (_, Some(GameError::PeerDisconnected(msg))) => {
            eprintln!("Error: Lost the connection to the other player: {}", msg);
        }
        (Some(RpslsError::Http(inner)), _) => {
            eprintln!("Error: Wallet node unreachable: {}", inner);
        }
        _ => {
            eprintln!("Error: {}", e);
        }
    }
}
