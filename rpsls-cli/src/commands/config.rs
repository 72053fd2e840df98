use clap::Subcommand;
use comfy_table::{presets::UTF8_FULL, Table};
use dialoguer::Confirm;
use rpsls_core::GameConfig;
use std::path::{Path, PathBuf};

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Write a configuration file
    Init {
        /// File holding the hex creation code of the wager contract
        #[arg(short, long)]
        bytecode: Option<PathBuf>,
        /// Address to accept opponents on when hosting
        #[arg(short, long)]
        listen: Option<String>,
        /// Host name advertised in share links
        #[arg(long)]
        public_host: Option<String>,
        /// Stake used when none is entered, in ether
        #[arg(long)]
        default_stake: Option<String>,
        /// Overwrite an existing file without asking
        #[arg(short, long)]
        force: bool,
    },
    /// Show the effective configuration
    Show,
}

pub async fn handle_config_command(
    cmd: ConfigCommands,
    path: &Path,
    rpc_url: Option<String>,
) -> anyhow::Result<()> {
    match cmd {
        ConfigCommands::Init {
            bytecode,
            listen,
            public_host,
            default_stake,
            force,
        } => {
            if tokio::fs::try_exists(path).await? && !force {
                let prompt = format!("{} exists. Overwrite?", path.display());
                let overwrite = tokio::task::spawn_blocking(move || {
                    Confirm::new().with_prompt(prompt).default(false).interact()
                })
                .await??;
                if !overwrite {
                    println!("Configuration left unchanged.");
                    return Ok(());
                }
            }

            let mut config = GameConfig::default();
            if let Some(url) = rpc_url {
                config.rpc_url = url;
            }
            if let Some(file) = bytecode {
                config.contract_bytecode = read_bytecode(&file).await?;
            }
            if let Some(listen) = listen {
                config.listen_addr = listen;
            }
            if let Some(stake) = default_stake {
                config.default_stake = stake;
            }
            config.public_host = public_host;
            config.validate()?;
            config.save(path).await?;

            println!("Configuration written to {}", path.display());
            if config.contract_bytecode.is_empty() {
                println!("No contract bytecode set: 'rpsls host' needs it to create games.");
            }
        }

        ConfigCommands::Show => {
            let mut config = GameConfig::load_or_default(path).await?;
            if let Some(url) = rpc_url {
                config.rpc_url = url;
            }
            println!("Configuration ({}):", path.display());
            println!("{}", config_table(&config));
        }
    }

    Ok(())
}

/// Reads a creation-code file, accepting both raw hex and a solc/forge JSON
/// artifact with a `bytecode` field.
async fn read_bytecode(file: &Path) -> anyhow::Result<String> {
    let content = tokio::fs::read_to_string(file).await?;
    let trimmed = content.trim();
    if !trimmed.starts_with('{') {
        return Ok(trimmed.to_string());
    }

    let artifact: serde_json::Value = serde_json::from_str(trimmed)?;
    let code = match &artifact["bytecode"] {
        serde_json::Value::String(code) => Some(code.clone()),
        serde_json::Value::Object(inner) => inner
            .get("object")
            .and_then(|object| object.as_str())
            .map(str::to_string),
        _ => None,
    };
    code.ok_or_else(|| anyhow::anyhow!("{} has no bytecode field", file.display()))
}

fn config_table(config: &GameConfig) -> Table {
    let bytecode = if config.contract_bytecode.is_empty() {
        "(not set)".to_string()
    } else {
        format!("{} hex chars", config.contract_bytecode.trim().len())
    };

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Setting", "Value"]);
    table.add_row(vec!["RPC URL".to_string(), config.rpc_url.clone()]);
    table.add_row(vec!["Contract bytecode".to_string(), bytecode]);
    table.add_row(vec![
        "Default stake".to_string(),
        format!("{} ETH", config.default_stake),
    ]);
    table.add_row(vec![
        "Poll interval".to_string(),
        format!("{:?}", config.poll_interval),
    ]);
    table.add_row(vec![
        "Receipt retries".to_string(),
        format!(
            "{} every {:?}",
            config.receipt_max_retries, config.receipt_retry_backoff
        ),
    ]);
    table.add_row(vec![
        "Receipt timeout".to_string(),
        format!("{:?}", config.receipt_timeout),
    ]);
    table.add_row(vec!["Listen address".to_string(), config.listen_addr.clone()]);
    table.add_row(vec![
        "Public host".to_string(),
        config
            .public_host
            .clone()
            .unwrap_or_else(|| "(listen address)".to_string()),
    ]);
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_init_writes_loadable_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");

        handle_config_command(
            ConfigCommands::Init {
                bytecode: None,
                listen: Some("127.0.0.1:9555".to_string()),
                public_host: Some("games.example.org".to_string()),
                default_stake: Some("0.01".to_string()),
                force: true,
            },
            &path,
            Some("http://127.0.0.1:8545".to_string()),
        )
        .await
        .unwrap();

        let config = GameConfig::load(&path).await.unwrap();
        assert_eq!(config.rpc_url, "http://127.0.0.1:8545");
        assert_eq!(config.listen_addr, "127.0.0.1:9555");
        assert_eq!(config.public_host.as_deref(), Some("games.example.org"));
        assert_eq!(config.default_stake, "0.01");
    }

    #[tokio::test]
    async fn test_init_rejects_zero_default_stake() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");

        let result = handle_config_command(
            ConfigCommands::Init {
                bytecode: None,
                listen: None,
                public_host: None,
                default_stake: Some("0".to_string()),
                force: true,
            },
            &path,
            None,
        )
        .await;
        assert!(result.is_err());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_read_bytecode_formats() {
        let dir = TempDir::new().unwrap();

        let raw = dir.path().join("raw.hex");
        tokio::fs::write(&raw, "0x6080604052\n").await.unwrap();
        assert_eq!(read_bytecode(&raw).await.unwrap(), "0x6080604052");

        let forge = dir.path().join("RPS.json");
        tokio::fs::write(&forge, r#"{"bytecode":{"object":"0x6080"}}"#)
            .await
            .unwrap();
        assert_eq!(read_bytecode(&forge).await.unwrap(), "0x6080");

        let hardhat = dir.path().join("RPS.hardhat.json");
        tokio::fs::write(&hardhat, r#"{"bytecode":"0x60aa"}"#)
            .await
            .unwrap();
        assert_eq!(read_bytecode(&hardhat).await.unwrap(), "0x60aa");

        let empty = dir.path().join("abi.json");
        tokio::fs::write(&empty, r#"{"abi":[]}"#).await.unwrap();
        assert!(read_bytecode(&empty).await.is_err());
    }
}
