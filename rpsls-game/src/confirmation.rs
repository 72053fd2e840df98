//! Receipt waits for the session's own ledger writes.
//!
//! A wait runs as its own task and reports back over a channel the run loop
//! selects on, so peer events and commands are handled while a transaction
//! is being mined. The submitted hash is kept until a definite answer
//! arrives; a wait that gives up on transient errors is resumed for the same
//! hash instead of submitting the write again.

use rpsls_core::{LedgerGateway, PendingTx, Receipt, TxHash};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

/// Outcome of one receipt wait.
#[derive(Debug)]
pub struct Confirmation {
    pub pending: PendingTx,
    pub result: rpsls_core::Result<Receipt>,
}

impl Confirmation {
    /// The wait gave up without learning whether the transaction was mined.
    pub fn is_inconclusive(&self) -> bool {
        matches!(&self.result, Err(e) if e.is_transient())
    }
}

pub(crate) struct Confirmations {
    gateway: Arc<LedgerGateway>,
    results: UnboundedSender<Confirmation>,
    outstanding: Option<PendingTx>,
    task: Option<JoinHandle<()>>,
}

impl Confirmations {
    pub(crate) fn new(gateway: Arc<LedgerGateway>) -> (Self, UnboundedReceiver<Confirmation>) {
        let (results, rx) = mpsc::unbounded_channel();
        (
            Self {
                gateway,
                results,
                outstanding: None,
                task: None,
            },
            rx,
        )
    }

    pub(crate) fn outstanding(&self) -> Option<PendingTx> {
        self.outstanding
    }

    pub(crate) fn outstanding_hash(&self) -> Option<TxHash> {
        self.outstanding.map(|pending| pending.hash)
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.outstanding.is_none()
    }

    /// Starts waiting for a freshly submitted transaction.
    pub(crate) fn track(&mut self, pending: PendingTx) {
        if let Some(previous) = self.outstanding.replace(pending) {
            tracing::warn!("Dropping wait for {:?} {:?}", previous.kind, previous.hash);
        }
        self.spawn(pending);
    }

    /// Restarts the wait for an outstanding transaction whose last wait was
    /// inconclusive. Returns true if a wait was started.
    pub(crate) fn resume(&mut self) -> bool {
        match self.outstanding {
            Some(pending) if self.task.is_none() => {
                tracing::info!("Resuming confirmation of {:?} {:?}", pending.kind, pending.hash);
                self.spawn(pending);
                true
            }
            _ => false,
        }
    }

    /// Takes a wait result for the outstanding transaction. Results for
    /// anything else are stale and dropped. An inconclusive result keeps the
    /// transaction outstanding.
    pub(crate) fn accept(&mut self, confirmation: Confirmation) -> Option<Confirmation> {
        if self.outstanding != Some(confirmation.pending) {
            tracing::debug!("Ignoring stale confirmation for {:?}", confirmation.pending.hash);
            return None;
        }
        self.task = None;
        if !confirmation.is_inconclusive() {
            self.outstanding = None;
        }
        Some(confirmation)
    }

    /// Stops waiting. The transaction itself may still be mined.
    pub(crate) fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.outstanding = None;
    }

    fn spawn(&mut self, pending: PendingTx) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        let gateway = self.gateway.clone();
        let results = self.results.clone();
        self.task = Some(tokio::spawn(async move {
            let result = gateway.await_receipt(&pending).await;
            let _ = results.send(Confirmation { pending, result });
        }));
    }
}

impl Drop for Confirmations {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
