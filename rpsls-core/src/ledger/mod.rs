pub mod contract;
pub mod gateway;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod node;

pub use contract::{ContractCall, DeployArgs, GameReads};
pub use gateway::{LedgerGateway, LedgerState, PendingTx, RetryPolicy, TxKind};
#[cfg(any(test, feature = "mock"))]
pub use mock::MockChain;
pub use node::NodeClient;

use crate::error::Result;
use crate::types::{Address, TxHash, Wei};
use async_trait::async_trait;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptStatus {
    Success,
    Reverted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub tx_hash: TxHash,
    pub status: ReceiptStatus,
    pub contract_address: Option<Address>,
    pub block_number: u64,
}

impl Receipt {
    pub fn is_success(&self) -> bool {
        self.status == ReceiptStatus::Success
    }
}

/// Wallet and node surface the gateway is built on.
///
/// Implementations hand back transaction hashes; confirmation is a
/// separate, possibly long, wait that can be resumed from the hash alone.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn request_addresses(&self) -> Result<Vec<Address>>;

    async fn deploy_contract(
        &self,
        account: &Address,
        args: &DeployArgs,
        value: Wei,
    ) -> Result<TxHash>;

    /// Dry-runs a call so reverts surface before anything is signed.
    async fn simulate_contract(
        &self,
        account: &Address,
        contract: &Address,
        call: &ContractCall,
        value: Wei,
    ) -> Result<()>;

    async fn write_contract(
        &self,
        account: &Address,
        contract: &Address,
        call: &ContractCall,
        value: Wei,
    ) -> Result<TxHash>;

    /// All five public getters, read against the same block tag.
    async fn read_game(&self, contract: &Address) -> Result<GameReads>;

    async fn wait_for_transaction_receipt(&self, tx: &TxHash) -> Result<Receipt>;
}
