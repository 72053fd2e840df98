use crate::commitment::{CommitmentHash, Salt};
use crate::config::GameConfig;
use crate::error::{Result, RpslsError};
use crate::ledger::contract::{ContractCall, DeployArgs, GameReads};
use crate::ledger::{ChainClient, Receipt};
use crate::types::{parse_address, Address, Role, TxHash, Weapon, Wei, U256};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxKind {
    CreateGame,
    SubmitMove,
    Reveal,
    ClaimTimeout,
}

/// A transaction that has been handed to the signer but not yet confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingTx {
    pub hash: TxHash,
    pub kind: TxKind,
}

/// Read-only snapshot of one ledger game instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerState {
    pub p1_committed: bool,
    pub p2_move: Weapon,
    pub required_stake: Wei,
    /// Unix seconds of the last confirmed action by either party.
    pub last_action: i64,
    pub timeout_window: Duration,
}

impl LedgerState {
    /// Range-checks raw getter values. A contract reporting timing that does
    /// not fit the local clock types is treated like a failed read.
    pub fn from_reads(reads: &GameReads) -> Result<Self> {
        if reads.last_action > U256::from(i64::MAX as u64) {
            return Err(RpslsError::transient(format!(
                "lastAction {} out of range",
                reads.last_action
            )));
        }
        if reads.timeout.bits() > 64 {
            return Err(RpslsError::transient(format!(
                "TIMEOUT {} out of range",
                reads.timeout
            )));
        }
        let last_action = i64::try_from(reads.last_action.low_u64())
            .map_err(|_| RpslsError::transient("lastAction out of range"))?;

        Ok(Self {
            p1_committed: reads.c1_hash.iter().any(|b| *b != 0),
            p2_move: Weapon::try_from(reads.c2)?,
            required_stake: Wei(reads.stake),
            last_action,
            timeout_window: Duration::from_secs(reads.timeout.low_u64()),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub backoff: Duration,
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: Duration::from_secs(5),
            max_retries: 12,
        }
    }
}

/// Typed wrapper over a [`ChainClient`] for the four game operations.
pub struct LedgerGateway {
    client: Arc<dyn ChainClient>,
    retry: RetryPolicy,
}

impl LedgerGateway {
    pub fn new(client: Arc<dyn ChainClient>, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    pub fn from_config(client: Arc<dyn ChainClient>, config: &GameConfig) -> Self {
        Self::new(
            client,
            RetryPolicy {
                backoff: config.receipt_retry_backoff,
                max_retries: config.receipt_max_retries,
            },
        )
    }

    pub fn client(&self) -> &Arc<dyn ChainClient> {
        &self.client
    }

    /// First account exposed by the wallet.
    pub async fn request_account(&self) -> Result<Address> {
        self.client
            .request_addresses()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RpslsError::internal("Wallet exposes no accounts"))
    }

    pub async fn create_game(
        &self,
        account: &Address,
        commitment: CommitmentHash,
        opponent: &str,
        stake: Wei,
    ) -> Result<PendingTx> {
        let opponent = parse_address(opponent)
            .map_err(|_| RpslsError::deploy(format!("malformed opponent address '{}'", opponent)))?;
        if opponent.is_zero() {
            return Err(RpslsError::deploy("opponent address cannot be zero"));
        }
        if stake.is_zero() {
            return Err(RpslsError::deploy("stake must be greater than 0"));
        }

        let args = DeployArgs {
            commitment,
            opponent,
        };
        let hash = self
            .client
            .deploy_contract(account, &args, stake)
            .await
            .map_err(|e| match e {
                RpslsError::Deploy(_) => e,
                other => RpslsError::deploy(other.to_string()),
            })?;

        tracing::info!("Game creation submitted: {:?}", hash);
        Ok(PendingTx {
            hash,
            kind: TxKind::CreateGame,
        })
    }

    /// Waits for the transaction to be mined, riding out transient read errors.
    pub async fn await_receipt(&self, pending: &PendingTx) -> Result<Receipt> {
        let mut attempt = 0u32;
        loop {
            match self.client.wait_for_transaction_receipt(&pending.hash).await {
                Ok(receipt) if receipt.is_success() => {
                    tracing::debug!("{:?} {:?} confirmed", pending.kind, pending.hash);
                    return Ok(receipt);
                }
                Ok(_) => {
                    return Err(RpslsError::TransactionFailed {
                        tx: format!("{:#x}", pending.hash),
                        reason: "receipt status is not success".to_string(),
                    });
                }
                Err(e) if e.is_transient() && attempt < self.retry.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        "Receipt lookup for {:?} failed ({}), retry {}/{} in {:?}",
                        pending.hash,
                        e,
                        attempt,
                        self.retry.max_retries,
                        self.retry.backoff
                    );
                    tokio::time::sleep(self.retry.backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn submit_move(
        &self,
        account: &Address,
        ledger: &Address,
        choice: Weapon,
        stake: Wei,
    ) -> Result<PendingTx> {
        if !choice.is_playable() {
            return Err(RpslsError::InvalidMove(choice.code()));
        }

        let required = Wei(self.client.read_game(ledger).await?.stake);
        if required != stake {
            return Err(RpslsError::StakeMismatch {
                required: required.to_ether_string(),
                offered: stake.to_ether_string(),
            });
        }

        self.write(
            account,
            ledger,
            ContractCall::Play(choice),
            stake,
            TxKind::SubmitMove,
        )
        .await
    }

    pub async fn reveal(
        &self,
        account: &Address,
        ledger: &Address,
        choice: Weapon,
        salt: &Salt,
    ) -> Result<PendingTx> {
        let call = ContractCall::Solve {
            choice,
            salt: salt.clone(),
        };
        self.write(account, ledger, call, Wei::ZERO, TxKind::Reveal)
            .await
    }

    /// `claimant` is the role filing the claim; its opponent is the one timed out.
    pub async fn claim_opponent_timeout(
        &self,
        account: &Address,
        ledger: &Address,
        claimant: Role,
    ) -> Result<PendingTx> {
        let call = match claimant {
            Role::Player1 => ContractCall::J2Timeout,
            Role::Player2 => ContractCall::J1Timeout,
        };
        self.write(account, ledger, call, Wei::ZERO, TxKind::ClaimTimeout)
            .await
    }

    pub async fn poll_state(&self, ledger: &Address) -> Result<LedgerState> {
        let reads = self
            .client
            .read_game(ledger)
            .await
            .map_err(|e| RpslsError::transient(format!("reading game state: {}", e)))?;
        LedgerState::from_reads(&reads)
    }

    async fn write(
        &self,
        account: &Address,
        ledger: &Address,
        call: ContractCall,
        value: Wei,
        kind: TxKind,
    ) -> Result<PendingTx> {
        self.client
            .simulate_contract(account, ledger, &call, value)
            .await?;
        let hash = self
            .client
            .write_contract(account, ledger, &call, value)
            .await?;

        tracing::info!("{} submitted: {:?}", call.function_name(), hash);
        Ok(PendingTx { hash, kind })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commitment::MoveSecret;
    use crate::ledger::MockChain;

    fn gateway(chain: &Arc<MockChain>) -> LedgerGateway {
        LedgerGateway::new(chain.clone(), RetryPolicy::default())
    }

    async fn deployed_game(
        chain: &Arc<MockChain>,
        secret: &MoveSecret,
        stake: Wei,
    ) -> Address {
        let gateway = gateway(chain);
        let p1 = chain.account(0);
        let p2 = chain.account(1);
        let pending = gateway
            .create_game(&p1, secret.commitment(), &format!("{:?}", p2), stake)
            .await
            .unwrap();
        gateway
            .await_receipt(&pending)
            .await
            .unwrap()
            .contract_address
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_game_rejects_bad_input() {
        let chain = Arc::new(MockChain::new());
        let gateway = gateway(&chain);
        let p1 = chain.account(0);
        let secret = MoveSecret::new(Weapon::Rock).unwrap();
        let stake = Wei::parse_ether("0.0001").unwrap();

        let err = gateway
            .create_game(&p1, secret.commitment(), "not-an-address", stake)
            .await
            .unwrap_err();
        assert!(matches!(err, RpslsError::Deploy(_)));

        let err = gateway
            .create_game(&p1, secret.commitment(), &format!("{:?}", chain.account(1)), Wei::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, RpslsError::Deploy(_)));
    }

    #[tokio::test]
    async fn test_poll_state_after_creation() {
        let chain = Arc::new(MockChain::new());
        let secret = MoveSecret::new(Weapon::Paper).unwrap();
        let stake = Wei::parse_ether("0.0001").unwrap();
        let ledger = deployed_game(&chain, &secret, stake).await;

        let state = gateway(&chain).poll_state(&ledger).await.unwrap();
        assert!(state.p1_committed);
        assert_eq!(state.p2_move, Weapon::Null);
        assert_eq!(state.required_stake, stake);
        assert_eq!(state.timeout_window, Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_submit_move_checks_stake() {
        let chain = Arc::new(MockChain::new());
        let secret = MoveSecret::new(Weapon::Paper).unwrap();
        let stake = Wei::parse_ether("0.0001").unwrap();
        let ledger = deployed_game(&chain, &secret, stake).await;
        let gateway = gateway(&chain);
        let p2 = chain.account(1);

        let err = gateway
            .submit_move(&p2, &ledger, Weapon::Rock, Wei::parse_ether("0.001").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, RpslsError::StakeMismatch { .. }));

        let pending = gateway
            .submit_move(&p2, &ledger, Weapon::Rock, stake)
            .await
            .unwrap();
        gateway.await_receipt(&pending).await.unwrap();
        assert_eq!(gateway.poll_state(&ledger).await.unwrap().p2_move, Weapon::Rock);
    }

    #[tokio::test]
    async fn test_reveal_with_wrong_salt_is_rejected_by_ledger() {
        let chain = Arc::new(MockChain::new());
        let secret = MoveSecret::new(Weapon::Spock).unwrap();
        let stake = Wei::parse_ether("0.0001").unwrap();
        let ledger = deployed_game(&chain, &secret, stake).await;
        let gateway = gateway(&chain);

        let played = gateway
            .submit_move(&chain.account(1), &ledger, Weapon::Lizard, stake)
            .await
            .unwrap();
        gateway.await_receipt(&played).await.unwrap();

        let other = MoveSecret::new(Weapon::Spock).unwrap();
        let err = gateway
            .reveal(&chain.account(0), &ledger, Weapon::Spock, other.salt())
            .await
            .unwrap_err();
        assert!(matches!(err, RpslsError::Reverted(_)));

        let pending = gateway
            .reveal(&chain.account(0), &ledger, secret.choice(), secret.salt())
            .await
            .unwrap();
        gateway.await_receipt(&pending).await.unwrap();
        assert!(gateway.poll_state(&ledger).await.unwrap().required_stake.is_zero());
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_receipt_retries_transient_errors() {
        let chain = Arc::new(MockChain::new());
        let secret = MoveSecret::new(Weapon::Rock).unwrap();
        let gateway = gateway(&chain);
        let pending = gateway
            .create_game(
                &chain.account(0),
                secret.commitment(),
                &format!("{:?}", chain.account(1)),
                Wei::parse_ether("0.0001").unwrap(),
            )
            .await
            .unwrap();

        chain.fail_next_receipts(3);
        let started = tokio::time::Instant::now();
        let receipt = gateway.await_receipt(&pending).await.unwrap();
        assert!(receipt.contract_address.is_some());
        assert_eq!(started.elapsed(), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_await_receipt_gives_up_after_retry_cap() {
        let chain = Arc::new(MockChain::new());
        let secret = MoveSecret::new(Weapon::Rock).unwrap();
        let gateway = LedgerGateway::new(
            chain.clone(),
            RetryPolicy {
                backoff: Duration::from_secs(5),
                max_retries: 2,
            },
        );
        let pending = gateway
            .create_game(
                &chain.account(0),
                secret.commitment(),
                &format!("{:?}", chain.account(1)),
                Wei::parse_ether("0.0001").unwrap(),
            )
            .await
            .unwrap();

        chain.fail_next_receipts(3);
        let err = gateway.await_receipt(&pending).await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_reverted_receipt_is_transaction_failed() {
        let chain = Arc::new(MockChain::new());
        let secret = MoveSecret::new(Weapon::Rock).unwrap();
        let gateway = gateway(&chain);

        chain.revert_next_transaction();
        let pending = gateway
            .create_game(
                &chain.account(0),
                secret.commitment(),
                &format!("{:?}", chain.account(1)),
                Wei::parse_ether("0.0001").unwrap(),
            )
            .await
            .unwrap();
        let err = gateway.await_receipt(&pending).await.unwrap_err();
        assert!(matches!(err, RpslsError::TransactionFailed { .. }));
    }

    #[tokio::test]
    async fn test_claim_timeout_targets_opponent() {
        let chain = Arc::new(MockChain::new());
        let secret = MoveSecret::new(Weapon::Rock).unwrap();
        let stake = Wei::parse_ether("0.0001").unwrap();
        let ledger = deployed_game(&chain, &secret, stake).await;
        let gateway = gateway(&chain);

        // too early: the ledger refuses
        assert!(gateway
            .claim_opponent_timeout(&chain.account(0), &ledger, Role::Player1)
            .await
            .is_err());

        chain.advance(301);
        let pending = gateway
            .claim_opponent_timeout(&chain.account(0), &ledger, Role::Player1)
            .await
            .unwrap();
        gateway.await_receipt(&pending).await.unwrap();
        assert_eq!(chain.writes("j2Timeout"), 1);
        assert_eq!(chain.writes("j1Timeout"), 0);
    }

    #[tokio::test]
    async fn test_poll_state_rejects_out_of_range_timing() {
        let chain = Arc::new(MockChain::new());
        let secret = MoveSecret::new(Weapon::Rock).unwrap();
        let stake = Wei::parse_ether("0.0001").unwrap();
        let ledger = deployed_game(&chain, &secret, stake).await;
        let gateway = gateway(&chain);

        chain.set_timing(&ledger, U256::MAX, U256::from(300u64));
        let err = gateway.poll_state(&ledger).await.unwrap_err();
        assert!(err.is_transient());

        chain.set_timing(&ledger, U256::from(1_700_000_000u64), U256::from(u64::MAX) + U256::one());
        let err = gateway.poll_state(&ledger).await.unwrap_err();
        assert!(err.is_transient());

        // the largest values that still fit are accepted as-is
        chain.set_timing(&ledger, U256::from(i64::MAX as u64), U256::from(u64::MAX));
        let state = gateway.poll_state(&ledger).await.unwrap();
        assert_eq!(state.last_action, i64::MAX);
        assert_eq!(state.timeout_window, Duration::from_secs(u64::MAX));
    }
}
