use crate::error::{Result, RpslsError};
use crate::types::Wei;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Stake applied when the creator leaves the stake field empty.
pub const DEFAULT_STAKE: &str = "0.0001";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameConfig {
    pub rpc_url: String,
    /// Hex creation code of the wager contract, deployed once per game.
    pub contract_bytecode: String,
    pub poll_interval: Duration,
    pub receipt_retry_backoff: Duration,
    pub receipt_max_retries: u32,
    pub receipt_poll_interval: Duration,
    pub receipt_timeout: Duration,
    pub default_stake: String,
    pub listen_addr: String,
    /// Host advertised in share links; the bound address is used when unset.
    pub public_host: Option<String>,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://localhost:8545".to_string(),
            contract_bytecode: String::new(),
            poll_interval: Duration::from_secs(15),
            receipt_retry_backoff: Duration::from_secs(5),
            receipt_max_retries: 12,
            receipt_poll_interval: Duration::from_secs(1),
            receipt_timeout: Duration::from_secs(120),
            default_stake: DEFAULT_STAKE.to_string(),
            listen_addr: "0.0.0.0:9470".to_string(),
            public_host: None,
        }
    }
}

impl GameConfig {
    pub fn new(rpc_url: impl Into<String>) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            ..Self::default()
        }
    }

    pub fn sepolia() -> Self {
        Self::new("https://rpc.sepolia.org")
    }

    pub fn validate(&self) -> Result<()> {
        if self.rpc_url.is_empty() {
            return Err(RpslsError::config("RPC URL cannot be empty"));
        }

        if self.poll_interval.is_zero() {
            return Err(RpslsError::config("Poll interval must be greater than 0"));
        }

        if self.receipt_poll_interval.is_zero() {
            return Err(RpslsError::config(
                "Receipt poll interval must be greater than 0",
            ));
        }

        if self.listen_addr.is_empty() {
            return Err(RpslsError::config("Listen address cannot be empty"));
        }

        let stake = self.default_stake()?;
        if stake.is_zero() {
            return Err(RpslsError::config("Default stake must be greater than 0"));
        }

        if !self.contract_bytecode.is_empty() {
            self.bytecode()?;
        }

        Ok(())
    }

    pub fn default_stake(&self) -> Result<Wei> {
        Wei::parse_ether(&self.default_stake)
            .map_err(|_| RpslsError::config(format!("Invalid default stake: {}", self.default_stake)))
    }

    pub fn bytecode(&self) -> Result<Vec<u8>> {
        let trimmed = self.contract_bytecode.trim();
        if trimmed.is_empty() {
            return Err(RpslsError::config("Contract bytecode is not configured"));
        }
        let digits = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        hex::decode(digits)
            .map_err(|e| RpslsError::config(format!("Invalid contract bytecode: {}", e)))
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;
        let config: GameConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the file when present, otherwise falls back to defaults.
    pub async fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        if tokio::fs::try_exists(path.as_ref()).await? {
            Self::load(path).await
        } else {
            Ok(Self::default())
        }
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path.as_ref(), content).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_is_valid() {
        let config = GameConfig::default();
        config.validate().unwrap();
        assert_eq!(config.poll_interval, Duration::from_secs(15));
        assert_eq!(config.receipt_retry_backoff, Duration::from_secs(5));
        assert_eq!(
            config.default_stake().unwrap(),
            Wei::parse_ether("0.0001").unwrap()
        );
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = GameConfig::new("");
        assert!(config.validate().is_err());

        config = GameConfig::default();
        config.default_stake = "0".to_string();
        assert!(config.validate().is_err());

        config = GameConfig::default();
        config.contract_bytecode = "0xnothex".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bytecode_decoding() {
        let mut config = GameConfig::default();
        assert!(config.bytecode().is_err());

        config.contract_bytecode = "0x6080604052".to_string();
        assert_eq!(config.bytecode().unwrap(), vec![0x60, 0x80, 0x60, 0x40, 0x52]);
    }

    #[tokio::test]
    async fn test_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let mut config = GameConfig::sepolia();
        config.public_host = Some("example.org:9470".to_string());
        config.save(&path).await.unwrap();

        let loaded = GameConfig::load(&path).await.unwrap();
        assert_eq!(loaded.rpc_url, "https://rpc.sepolia.org");
        assert_eq!(loaded.public_host.as_deref(), Some("example.org:9470"));
    }

    #[tokio::test]
    async fn test_load_or_default_without_file() {
        let dir = tempdir().unwrap();
        let config = GameConfig::load_or_default(dir.path().join("missing.json"))
            .await
            .unwrap();
        assert_eq!(config.rpc_url, GameConfig::default().rpc_url);
    }
}
