use crate::{
    ledger::{MessageLedger, ReconcileTrigger},
    reader::LedgerReader,
    rpc::LedgerRpc,
    workers::{RefreshCommand, RefreshHandle, RefreshOutcome},
};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Reads the canonical ledger and reconciles the shared view.
///
/// Requests that pile up while a read is running are coalesced into the next
/// single read. A failed read leaves the previous view untouched.
pub struct RefreshWorker {
    reader: Arc<LedgerReader<dyn LedgerRpc>>,
    ledger: MessageLedger,
    command_rx: mpsc::Receiver<RefreshCommand>,
}

impl RefreshWorker {
    /// Creates a new `RefreshWorker` and the handle used to command it.
    pub fn new(
        reader: Arc<LedgerReader<dyn LedgerRpc>>,
        ledger: MessageLedger,
        command_buffer: usize,
    ) -> (Self, RefreshHandle) {
        let (command_tx, command_rx) = mpsc::channel(command_buffer.max(1));
        let worker = Self {
            reader,
            ledger,
            command_rx,
        };
        (worker, RefreshHandle::new(command_tx))
    }

    /// Runs the command loop until shutdown or until every handle is dropped.
    pub async fn run(mut self) {
        tracing::info!("Refresh worker started.");
        while let Some(command) = self.command_rx.recv().await {
            let RefreshCommand::Refresh { trigger, reply } = command else {
                tracing::info!("Received shutdown command. Exiting.");
                return;
            };

            let mut trigger = trigger;
            let mut replies: Vec<oneshot::Sender<RefreshOutcome>> = reply.into_iter().collect();
            let mut shutdown = false;
            while let Ok(queued) = self.command_rx.try_recv() {
                match queued {
                    RefreshCommand::Refresh { trigger: t, reply } => {
                        if t == ReconcileTrigger::Manual {
                            trigger = ReconcileTrigger::Manual;
                        }
                        replies.extend(reply);
                    }
                    RefreshCommand::Shutdown => {
                        shutdown = true;
                        break;
                    }
                }
            }

            let outcome = self.cycle(trigger).await;
            for reply in replies {
                let _ = reply.send(outcome.clone());
            }
            if shutdown {
                tracing::info!("Received shutdown command. Exiting.");
                return;
            }
        }
        tracing::info!("All refresh handles dropped. Refresh worker shutting down.");
    }

    async fn cycle(&self, trigger: ReconcileTrigger) -> RefreshOutcome {
        match self.reader.fetch_all().await {
            Ok(records) => {
                let count = records.len();
                self.ledger.reconcile(records, trigger);
                Ok(count)
            }
            Err(err) => {
                tracing::warn!(error = %err, "ledger read failed, keeping previous view");
                Err(err)
            }
        }
    }
}
