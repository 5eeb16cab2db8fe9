//! # Background Workers
//!
//! - [`RefreshWorker`]: re-reads the canonical ledger on request and feeds the
//!   result to the [`MessageLedger`](crate::ledger::MessageLedger).
//! - [`RefreshHandle`]: the clonable command side used by the submitter, the
//!   engine and hosts to request refreshes.

mod refresh;

pub use refresh::RefreshWorker;

use crate::{error::BoardError, ledger::ReconcileTrigger};
use tokio::sync::{mpsc, oneshot};

/// The outcome of one refresh cycle: the number of canonical records read.
pub type RefreshOutcome = Result<usize, BoardError>;

/// Defines commands that can be sent to the refresh worker.
#[derive(Debug)]
pub enum RefreshCommand {
    Refresh {
        trigger: ReconcileTrigger,
        reply: Option<oneshot::Sender<RefreshOutcome>>,
    },
    Shutdown,
}

#[derive(Clone, Debug)]
pub struct RefreshHandle {
    command_tx: mpsc::Sender<RefreshCommand>,
}

impl RefreshHandle {
    pub(crate) fn new(command_tx: mpsc::Sender<RefreshCommand>) -> Self {
        Self { command_tx }
    }

    /// Queues a refresh without waiting for it.
    pub async fn request(&self, trigger: ReconcileTrigger) {
        if self
            .command_tx
            .send(RefreshCommand::Refresh {
                trigger,
                reply: None,
            })
            .await
            .is_err()
        {
            tracing::warn!("Failed to request refresh: worker may be down");
        }
    }

    /// Queues a refresh from synchronous code. Dropped if the queue is full,
    /// since a queued refresh already covers it.
    pub fn try_request(&self, trigger: ReconcileTrigger) {
        if let Err(err) = self.command_tx.try_send(RefreshCommand::Refresh {
            trigger,
            reply: None,
        }) {
            tracing::debug!(error = %err, "refresh request not queued");
        }
    }

    /// Runs a refresh and waits for its outcome.
    pub async fn refresh(&self, trigger: ReconcileTrigger) -> RefreshOutcome {
        let (reply_tx, reply_rx) = oneshot::channel();
        let unavailable = || BoardError::Unknown {
            detail: "refresh worker is not running".to_string(),
        };
        self.command_tx
            .send(RefreshCommand::Refresh {
                trigger,
                reply: Some(reply_tx),
            })
            .await
            .map_err(|_| unavailable())?;
        reply_rx.await.map_err(|_| unavailable())?
    }

    pub async fn stop(&self) {
        if self
            .command_tx
            .send(RefreshCommand::Shutdown)
            .await
            .is_err()
        {
            tracing::warn!("Failed to send shutdown to refresh worker: it may already be down");
        }
    }
}
