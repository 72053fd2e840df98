use crate::config::GameConfig;
use crate::error::{Result, RpslsError};
use crate::ledger::contract::{salt_word, ContractCall, DeployArgs, GameReads, RPS};
use crate::ledger::{ChainClient, Receipt, ReceiptStatus};
use crate::types::{Address, TxHash, Wei};
use async_trait::async_trait;
use ethers::contract::{ContractCall as BoundCall, ContractError};
use ethers::providers::{Http, Middleware, PendingTransaction, Provider, ProviderError};
use ethers::types::{TransactionReceipt, TransactionRequest, U64};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

type NodeProvider = Provider<Http>;

fn provider_error(e: ProviderError) -> RpslsError {
    match e {
        ProviderError::JsonRpcClientError(inner) => match inner.as_error_response() {
            Some(rpc) if rpc.message.to_ascii_lowercase().contains("revert") => {
                RpslsError::reverted(rpc.message.clone())
            }
            Some(rpc) => RpslsError::Rpc {
                code: rpc.code,
                message: rpc.message.clone(),
            },
            // transport failure: nothing came back from the node
            None => RpslsError::transient(inner.to_string()),
        },
        ProviderError::HTTPError(e) => RpslsError::Http(e),
        ProviderError::SerdeJson(e) => RpslsError::Serialization(e),
        other => RpslsError::internal(other.to_string()),
    }
}

fn contract_error(e: ContractError<NodeProvider>) -> RpslsError {
    if e.is_revert() {
        let reason = e
            .decode_revert::<String>()
            .unwrap_or_else(|| "execution reverted".to_string());
        return RpslsError::reverted(reason);
    }
    match e {
        ContractError::MiddlewareError { e } | ContractError::ProviderError { e } => {
            provider_error(e)
        }
        other => RpslsError::internal(other.to_string()),
    }
}

fn into_receipt(receipt: TransactionReceipt) -> Receipt {
    Receipt {
        tx_hash: receipt.transaction_hash,
        status: if receipt.status == Some(U64::from(1)) {
            ReceiptStatus::Success
        } else {
            ReceiptStatus::Reverted
        },
        contract_address: receipt.contract_address,
        block_number: receipt
            .block_number
            .map(|number| number.as_u64())
            .unwrap_or_default(),
    }
}

/// Ethereum node client that signs with the node's own unlocked accounts.
pub struct NodeClient {
    provider: Arc<NodeProvider>,
    url: String,
    bytecode: Vec<u8>,
    receipt_timeout: Duration,
}

impl NodeClient {
    pub fn new(config: &GameConfig) -> Result<Self> {
        let url = Url::parse(&config.rpc_url)
            .map_err(|e| RpslsError::config(format!("Invalid RPC URL {}: {}", config.rpc_url, e)))?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        let provider =
            Provider::new(Http::new_with_client(url, http)).interval(config.receipt_poll_interval);

        Ok(Self {
            provider: Arc::new(provider),
            url: config.rpc_url.clone(),
            // only needed for deployment; checked there
            bytecode: config.bytecode().unwrap_or_default(),
            receipt_timeout: config.receipt_timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn game(&self, contract: &Address) -> RPS<NodeProvider> {
        RPS::new(*contract, self.provider.clone())
    }

    fn bind(
        &self,
        account: &Address,
        contract: &Address,
        call: &ContractCall,
        value: Wei,
    ) -> BoundCall<NodeProvider, ()> {
        let game = self.game(contract);
        let bound = match call {
            ContractCall::Play(choice) => game.play(choice.code()),
            ContractCall::Solve { choice, salt } => game.solve(choice.code(), salt_word(salt)),
            ContractCall::J1Timeout => game.j_1_timeout(),
            ContractCall::J2Timeout => game.j_2_timeout(),
        };
        bound.from(*account).value(value.as_wei())
    }
}

#[async_trait]
impl ChainClient for NodeClient {
    async fn request_addresses(&self) -> Result<Vec<Address>> {
        self.provider.get_accounts().await.map_err(provider_error)
    }

    async fn deploy_contract(
        &self,
        account: &Address,
        args: &DeployArgs,
        value: Wei,
    ) -> Result<TxHash> {
        if self.bytecode.is_empty() {
            return Err(RpslsError::deploy("contract bytecode is not configured"));
        }

        let tx = TransactionRequest::new()
            .from(*account)
            .data(args.init_code(&self.bytecode))
            .value(value.as_wei());
        let pending = self
            .provider
            .send_transaction(tx, None)
            .await
            .map_err(provider_error)?;
        Ok(pending.tx_hash())
    }

    async fn simulate_contract(
        &self,
        account: &Address,
        contract: &Address,
        call: &ContractCall,
        value: Wei,
    ) -> Result<()> {
        self.bind(account, contract, call, value)
            .call()
            .await
            .map_err(contract_error)
    }

    async fn write_contract(
        &self,
        account: &Address,
        contract: &Address,
        call: &ContractCall,
        value: Wei,
    ) -> Result<TxHash> {
        let bound = self.bind(account, contract, call, value);
        let pending = bound.send().await.map_err(contract_error)?;
        Ok(pending.tx_hash())
    }

    async fn read_game(&self, contract: &Address) -> Result<GameReads> {
        let game = self.game(contract);
        let (c1_hash, c2, stake, last_action, timeout) = (
            game.c_1_hash(),
            game.c_2(),
            game.stake(),
            game.last_action(),
            game.timeout(),
        );
        let (c1_hash, c2, stake, last_action, timeout) = futures::try_join!(
            c1_hash.call(),
            c2.call(),
            stake.call(),
            last_action.call(),
            timeout.call(),
        )
        .map_err(contract_error)?;

        Ok(GameReads {
            c1_hash,
            c2,
            stake,
            last_action,
            timeout,
        })
    }

    async fn wait_for_transaction_receipt(&self, tx: &TxHash) -> Result<Receipt> {
        let pending = PendingTransaction::new(*tx, &self.provider);
        let receipt = tokio::time::timeout(self.receipt_timeout, pending)
            .await
            .map_err(|_| RpslsError::Timeout(format!("no receipt for {:?} yet", tx)))?
            .map_err(provider_error)?;

        // the node no longer knows the hash; a later lookup may still find it
        receipt
            .map(into_receipt)
            .ok_or_else(|| RpslsError::transient(format!("transaction {:?} not found", tx)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::H256;

    #[test]
    fn test_receipt_conversion() {
        let receipt = TransactionReceipt {
            transaction_hash: H256::repeat_byte(0x11),
            status: Some(U64::from(1)),
            contract_address: Some(Address::from_low_u64_be(0xcc)),
            block_number: Some(U64::from(16)),
            ..Default::default()
        };
        let converted = into_receipt(receipt.clone());
        assert!(converted.is_success());
        assert_eq!(converted.block_number, 16);
        assert_eq!(converted.contract_address, Some(Address::from_low_u64_be(0xcc)));

        let reverted = into_receipt(TransactionReceipt {
            status: Some(U64::zero()),
            ..receipt
        });
        assert_eq!(reverted.status, ReceiptStatus::Reverted);
    }

    #[test]
    fn test_rejects_malformed_url() {
        let config = GameConfig::new("not a url");
        assert!(matches!(NodeClient::new(&config), Err(RpslsError::Config(_))));
    }

    #[test]
    fn test_custom_provider_errors_are_not_retried() {
        let err = provider_error(ProviderError::CustomError("boom".to_string()));
        assert!(matches!(err, RpslsError::Internal(_)));
        assert!(!err.is_transient());
    }
}
