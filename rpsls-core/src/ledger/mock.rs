//! In-process stand-in for a node with unlocked accounts and the wager
//! contract deployed on it. Enforces the same preconditions the contract
//! does so controller tests exercise realistic rejections.

use crate::commitment::{keccak256, verify, CommitmentHash};
use crate::error::{Result, RpslsError};
use crate::ledger::contract::{ContractCall, DeployArgs, GameReads};
use crate::ledger::{ChainClient, Receipt, ReceiptStatus};
use crate::types::{Address, TxHash, Weapon, Wei, U256};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::Notify;

/// `TIMEOUT` of the deployed contract: five minutes.
pub const MOCK_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone)]
struct MockGame {
    j1: Address,
    j2: Address,
    c1_hash: CommitmentHash,
    c2: Weapon,
    stake: Wei,
    last_action: U256,
    timeout: U256,
}

#[derive(Debug, Default)]
struct MockState {
    games: HashMap<Address, MockGame>,
    receipts: HashMap<TxHash, Receipt>,
    nonce: u64,
    clock_offset: i64,
    failing_receipts: u32,
    revert_next: bool,
    receipts_stalled: bool,
    writes: Vec<&'static str>,
}

pub struct MockChain {
    accounts: Vec<Address>,
    state: Mutex<MockState>,
    released: Notify,
}

impl Default for MockChain {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChain {
    pub fn new() -> Self {
        Self::with_accounts(vec![
            Address::from_low_u64_be(0x01),
            Address::from_low_u64_be(0x02),
        ])
    }

    pub fn with_accounts(accounts: Vec<Address>) -> Self {
        Self {
            accounts,
            state: Mutex::new(MockState::default()),
            released: Notify::new(),
        }
    }

    pub fn account(&self, index: usize) -> Address {
        self.accounts[index]
    }

    /// Chain time in unix seconds.
    pub fn now(&self) -> i64 {
        Utc::now().timestamp() + self.state.lock().clock_offset
    }

    pub fn advance(&self, secs: i64) {
        self.state.lock().clock_offset += secs;
    }

    /// Makes the next `count` receipt lookups fail with a transient error.
    pub fn fail_next_receipts(&self, count: u32) {
        self.state.lock().failing_receipts = count;
    }

    /// Receipt lookups hang until [`MockChain::release_receipts`].
    pub fn stall_receipts(&self) {
        self.state.lock().receipts_stalled = true;
    }

    pub fn release_receipts(&self) {
        self.state.lock().receipts_stalled = false;
        self.released.notify_waiters();
    }

    /// Overwrites the timing getters of a deployed game, including values a
    /// well-behaved contract would never report.
    pub fn set_timing(&self, contract: &Address, last_action: U256, timeout: U256) {
        if let Some(game) = self.state.lock().games.get_mut(contract) {
            game.last_action = last_action;
            game.timeout = timeout;
        }
    }

    /// The next mined transaction gets a reverted receipt.
    pub fn revert_next_transaction(&self) {
        self.state.lock().revert_next = true;
    }

    /// Number of successful writes of the named contract function.
    pub fn writes(&self, function: &str) -> usize {
        self.state
            .lock()
            .writes
            .iter()
            .filter(|name| **name == function)
            .count()
    }

    pub fn stake_of(&self, contract: &Address) -> Option<Wei> {
        self.state.lock().games.get(contract).map(|g| g.stake)
    }

    fn check(
        state: &MockState,
        now: i64,
        account: &Address,
        contract: &Address,
        call: &ContractCall,
        value: Wei,
    ) -> Result<()> {
        let game = state
            .games
            .get(contract)
            .ok_or_else(|| RpslsError::reverted(format!("no contract at {:?}", contract)))?;
        let timed_out = U256::from(now.max(0) as u64) > game.last_action.saturating_add(game.timeout);

        match call {
            ContractCall::Play(choice) => {
                if game.c2 != Weapon::Null {
                    return Err(RpslsError::reverted("j2 already played"));
                }
                if !choice.is_playable() {
                    return Err(RpslsError::reverted("invalid move"));
                }
                if value != game.stake {
                    return Err(RpslsError::reverted("value must equal stake"));
                }
                if *account != game.j2 {
                    return Err(RpslsError::reverted("only j2 can play"));
                }
            }
            ContractCall::Solve { choice, salt } => {
                if game.c2 == Weapon::Null {
                    return Err(RpslsError::reverted("j2 has not played"));
                }
                if *account != game.j1 {
                    return Err(RpslsError::reverted("only j1 can solve"));
                }
                if !verify(&game.c1_hash, *choice, salt) {
                    return Err(RpslsError::reverted("commitment mismatch"));
                }
            }
            ContractCall::J1Timeout => {
                if game.c2 == Weapon::Null {
                    return Err(RpslsError::reverted("j2 has not played"));
                }
                if !timed_out {
                    return Err(RpslsError::reverted("timeout not reached"));
                }
            }
            ContractCall::J2Timeout => {
                if game.c2 != Weapon::Null {
                    return Err(RpslsError::reverted("j2 already played"));
                }
                if !timed_out {
                    return Err(RpslsError::reverted("timeout not reached"));
                }
            }
        }

        if game.stake.is_zero() {
            return Err(RpslsError::reverted("game already settled"));
        }
        Ok(())
    }

    fn next_hash(state: &mut MockState, tag: &[u8]) -> [u8; 32] {
        state.nonce += 1;
        let mut seed = tag.to_vec();
        seed.extend_from_slice(&state.nonce.to_be_bytes());
        keccak256(&seed)
    }

    fn mine(state: &mut MockState, contract_address: Option<Address>) -> TxHash {
        let hash = TxHash::from(Self::next_hash(state, b"tx"));
        let status = if std::mem::take(&mut state.revert_next) {
            ReceiptStatus::Reverted
        } else {
            ReceiptStatus::Success
        };
        let block_number = state.nonce;
        state.receipts.insert(
            hash,
            Receipt {
                tx_hash: hash,
                status,
                contract_address,
                block_number,
            },
        );
        hash
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn request_addresses(&self) -> Result<Vec<Address>> {
        Ok(self.accounts.clone())
    }

    async fn deploy_contract(
        &self,
        account: &Address,
        args: &DeployArgs,
        value: Wei,
    ) -> Result<TxHash> {
        let now = self.now();
        let mut state = self.state.lock();

        let mut seed = account.as_bytes().to_vec();
        seed.extend_from_slice(&Self::next_hash(&mut state, b"contract"));
        let digest = keccak256(&seed);
        let contract = Address::from_slice(&digest[12..]);

        if !state.revert_next {
            state.games.insert(
                contract,
                MockGame {
                    j1: *account,
                    j2: args.opponent,
                    c1_hash: args.commitment,
                    c2: Weapon::Null,
                    stake: value,
                    last_action: U256::from(now.max(0) as u64),
                    timeout: U256::from(MOCK_TIMEOUT_SECS),
                },
            );
        }
        Ok(Self::mine(&mut state, Some(contract)))
    }

    async fn simulate_contract(
        &self,
        account: &Address,
        contract: &Address,
        call: &ContractCall,
        value: Wei,
    ) -> Result<()> {
        let now = self.now();
        let state = self.state.lock();
        Self::check(&state, now, account, contract, call, value)
    }

    async fn write_contract(
        &self,
        account: &Address,
        contract: &Address,
        call: &ContractCall,
        value: Wei,
    ) -> Result<TxHash> {
        let now = self.now();
        let mut state = self.state.lock();
        Self::check(&state, now, account, contract, call, value)?;

        if !state.revert_next {
            if let Some(game) = state.games.get_mut(contract) {
                match call {
                    ContractCall::Play(choice) => game.c2 = *choice,
                    ContractCall::Solve { .. }
                    | ContractCall::J1Timeout
                    | ContractCall::J2Timeout => game.stake = Wei::ZERO,
                }
                game.last_action = U256::from(now.max(0) as u64);
            }
            state.writes.push(call.function_name());
        }
        Ok(Self::mine(&mut state, None))
    }

    async fn read_game(&self, contract: &Address) -> Result<GameReads> {
        let state = self.state.lock();
        let game = state.games.get(contract).ok_or_else(|| RpslsError::Rpc {
            code: -32000,
            message: format!("no contract at {:?}", contract),
        })?;

        Ok(GameReads {
            c1_hash: game.c1_hash.0,
            c2: game.c2.code(),
            stake: game.stake.as_wei(),
            last_action: game.last_action,
            timeout: game.timeout,
        })
    }

    async fn wait_for_transaction_receipt(&self, tx: &TxHash) -> Result<Receipt> {
        loop {
            let released = self.released.notified();
            {
                let mut state = self.state.lock();
                if !state.receipts_stalled {
                    if state.failing_receipts > 0 {
                        state.failing_receipts -= 1;
                        return Err(RpslsError::transient("simulated load balancer hiccup"));
                    }
                    return state
                        .receipts
                        .get(tx)
                        .cloned()
                        .ok_or_else(|| RpslsError::Rpc {
                            code: -32000,
                            message: format!("unknown transaction {:?}", tx),
                        });
                }
            }
            released.await;
        }
    }
}
