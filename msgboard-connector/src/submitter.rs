//! # Transaction Submitter
//!
//! Posts a message to the ledger contract through the connected wallet and
//! follows the transaction until its fate is known or the fallback timer
//! fires.
//!
//! `publish` returns as soon as the wallet accepts the transaction; the record
//! is then visible as an optimistic entry. A background tracker races the
//! receipt wait against the timer, then keeps requesting ledger refreshes
//! until the entry is superseded or expires. Removing the optimistic entry is left to ledger reconciliation, so
//! a late receipt and a fast refresh cannot step on each other.

use crate::{
    abi,
    config::SubmitterConfig,
    connection::ConnectionManager,
    error::BoardError,
    ledger::{BlockRef, MessageLedger, ReconcileTrigger, TransactionRecord, TxState},
    network::{NetworkReconciler, NetworkState},
    transport::{parse_hash, WalletTransport},
    workers::RefreshHandle,
};
use alloy_primitives::{Address, B256};
use chrono::Utc;
use serde_json::json;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex,
};
use tokio::task::JoinSet;

pub struct TransactionSubmitter {
    connection: ConnectionManager,
    network: Arc<NetworkReconciler>,
    ledger: MessageLedger,
    refresh: RefreshHandle,
    contract: Address,
    config: SubmitterConfig,
    next_id: AtomicU64,
    /// Confirmation trackers; aborted when the submitter is dropped.
    trackers: Mutex<JoinSet<()>>,
}

impl TransactionSubmitter {
    pub fn new(
        connection: ConnectionManager,
        network: Arc<NetworkReconciler>,
        ledger: MessageLedger,
        refresh: RefreshHandle,
        contract: Address,
        config: SubmitterConfig,
    ) -> Self {
        Self {
            connection,
            network,
            ledger,
            refresh,
            contract,
            config,
            next_id: AtomicU64::new(0),
            trackers: Mutex::new(JoinSet::new()),
        }
    }

    /// Submits `text` with the required fee attached.
    ///
    /// Returns the record in its `Submitted` state; confirmation progresses
    /// asynchronously and is observable through the ledger.
    pub async fn publish(&self, text: &str) -> Result<TransactionRecord, BoardError> {
        if text.trim().is_empty() {
            return Err(BoardError::EmptyMessage);
        }
        let (transport, author) = match (self.connection.current(), self.connection.active_transport()) {
            (state, Some(transport)) if state.is_connected() => {
                (transport, state.address().ok_or(BoardError::NotConnected)?)
            }
            _ => return Err(BoardError::NotConnected),
        };

        // The wallet may have been moved to another chain since connect.
        match self.network.ensure(transport.clone()).await {
            NetworkState::Correct => {}
            NetworkState::Blocked { reason } => {
                return Err(BoardError::WrongNetwork(Box::new(reason)))
            }
            other => {
                return Err(BoardError::WrongNetwork(Box::new(BoardError::Unknown {
                    detail: format!("network check ended in {other:?}"),
                })))
            }
        }

        let submitted_at = Utc::now();
        let request = json!([{
            "from": author,
            "to": self.contract,
            "value": format!("{:#x}", self.config.fee()),
            "gas": format!("{:#x}", self.config.gas_limit),
            "data": abi::encode_post(text),
        }]);
        let hash = transport
            .request("eth_sendTransaction", request)
            .await
            .and_then(|raw| parse_hash(&raw))
            .map_err(|err| {
                tracing::warn!(%author, error = %err, "transaction not accepted by wallet");
                BoardError::from(err)
            })?;

        let local_id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::info!(local_id, %hash, "transaction submitted");
        self.ledger
            .register_optimistic(author, TransactionRecord::new(local_id, text, submitted_at));
        let record = self
            .ledger
            .transition(local_id, TxState::Submitted { hash })
            .ok_or_else(|| BoardError::Unknown {
                detail: "optimistic entry vanished".to_string(),
            })?;

        self.track(transport, hash, local_id);
        Ok(record)
    }

    fn track(&self, transport: Arc<dyn WalletTransport>, hash: B256, local_id: u64) {
        let tracker = ConfirmationTracker {
            transport,
            hash,
            local_id,
            ledger: self.ledger.clone(),
            refresh: self.refresh.clone(),
            config: self.config.clone(),
        };
        let mut trackers = self.trackers.lock().unwrap_or_else(|e| e.into_inner());
        while trackers.try_join_next().is_some() {}
        trackers.spawn(tracker.run());
    }

    /// Number of transactions still being followed.
    pub fn in_flight(&self) -> usize {
        let mut trackers = self.trackers.lock().unwrap_or_else(|e| e.into_inner());
        while trackers.try_join_next().is_some() {}
        trackers.len()
    }

    pub(crate) fn abort_all(&self) {
        self.trackers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .abort_all();
    }
}

struct ConfirmationTracker {
    transport: Arc<dyn WalletTransport>,
    hash: B256,
    local_id: u64,
    ledger: MessageLedger,
    refresh: RefreshHandle,
    config: SubmitterConfig,
}

impl ConfirmationTracker {
    async fn run(self) {
        let timeout = self.config.confirmation_timeout();
        let outcome = tokio::select! {
            receipt = self.transport.wait_for_receipt(self.hash, self.config.receipt_poll_interval()) => Some(receipt),
            _ = tokio::time::sleep(timeout) => None,
        };

        match outcome {
            Some(Ok(receipt)) if receipt.success => {
                tracing::info!(local_id = self.local_id, hash = %self.hash, block = receipt.block_number, "transaction confirmed");
                let block = BlockRef {
                    number: receipt.block_number,
                    hash: receipt.block_hash,
                };
                self.ledger
                    .transition(self.local_id, TxState::Confirmed { block });
            }
            Some(Ok(receipt)) => {
                tracing::warn!(local_id = self.local_id, hash = %self.hash, block = receipt.block_number, "transaction reverted");
                self.ledger.transition(
                    self.local_id,
                    TxState::Reverted {
                        reason: format!("execution reverted in block {}", receipt.block_number),
                    },
                );
                self.refresh.request(ReconcileTrigger::Automatic).await;
                return;
            }
            Some(Err(err)) => {
                tracing::warn!(local_id = self.local_id, hash = %self.hash, error = %err, "receipt unavailable, awaiting ledger");
                self.settle_unknown().await;
            }
            None => {
                tracing::info!(local_id = self.local_id, hash = %self.hash, timeout_secs = timeout.as_secs(), "no receipt in time, awaiting ledger");
                self.settle_unknown().await;
            }
        }

        self.follow_up().await;
    }

    /// Re-reads the ledger until the entry is superseded or has missed enough
    /// cycles to expire.
    async fn follow_up(&self) {
        for cycle in 0..=self.config.max_reconcile_cycles {
            if cycle > 0 {
                tokio::time::sleep(self.config.grace_delay()).await;
            }
            if let Err(err) = self.refresh.refresh(ReconcileTrigger::Automatic).await {
                tracing::debug!(local_id = self.local_id, cycle, error = %err, "follow-up refresh failed");
            }
            if self.ledger.record(self.local_id).is_none() {
                return;
            }
        }
        tracing::debug!(local_id = self.local_id, "optimistic entry outlived its follow-up refreshes");
    }

    /// Some wallets stop reporting receipts while the transaction still
    /// lands; give the chain a moment before the authoritative read.
    async fn settle_unknown(&self) {
        self.ledger.transition(self.local_id, TxState::TimedOut);
        tokio::time::sleep(self.config.grace_delay()).await;
    }
}
