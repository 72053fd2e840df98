pub mod accounts;
pub mod config;
pub mod play;

pub use accounts::list_accounts;
pub use config::{handle_config_command, ConfigCommands};
pub use play::{host_game, join_game};

use rpsls_core::{GameConfig, LedgerGateway, NodeClient};
use std::sync::Arc;

/// Builds the ledger gateway over the configured Ethereum node.
pub(crate) fn connect_ledger(config: &GameConfig) -> anyhow::Result<Arc<LedgerGateway>> {
    let client = NodeClient::new(config)?;
    tracing::debug!("Using wallet node at {}", client.url());
    Ok(Arc::new(LedgerGateway::from_config(Arc::new(client), config)))
}
