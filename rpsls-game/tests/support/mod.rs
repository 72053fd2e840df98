#![allow(dead_code)]

use rpsls_core::ledger::{MockChain, RetryPolicy};
use rpsls_core::{GameConfig, LedgerGateway, MemoryHub};
use rpsls_game::SessionSnapshot;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

pub struct Fixture {
    pub chain: Arc<MockChain>,
    pub gateway: Arc<LedgerGateway>,
    pub hub: MemoryHub,
    pub config: GameConfig,
}

impl Fixture {
    pub fn new() -> Self {
        let chain = Arc::new(MockChain::new());
        let gateway = Arc::new(LedgerGateway::new(chain.clone(), RetryPolicy::default()));
        Self {
            chain,
            gateway,
            hub: MemoryHub::new(),
            config: GameConfig::default(),
        }
    }
}

/// Waits until a published snapshot satisfies `predicate`.
pub async fn wait_for<F>(
    updates: &mut watch::Receiver<SessionSnapshot>,
    limit: Duration,
    predicate: F,
) -> SessionSnapshot
where
    F: Fn(&SessionSnapshot) -> bool,
{
    let waiting = async {
        loop {
            {
                let snapshot = updates.borrow_and_update();
                if predicate(&snapshot) {
                    return snapshot.clone();
                }
            }
            if updates.changed().await.is_err() {
                let snapshot = updates.borrow().clone();
                assert!(predicate(&snapshot), "session ended early: {:?}", snapshot);
                return snapshot;
            }
        }
    };

    tokio::time::timeout(limit, waiting)
        .await
        .expect("timed out waiting for session state")
}
