//! # Board Engine
//!
//! The explicitly constructed owner of every component. It is the single
//! entry point a presentation layer talks to: it calls the operations and
//! renders [`BoardEngine::view`] and [`BoardEngine::connection_state`].
//!
//! Dropping the engine aborts its background work (refresh worker,
//! confirmation trackers, wallet listener), so nothing updates state after
//! the host is torn down.

use crate::{
    config::BoardConfig,
    connection::{ConnectionManager, ConnectionState, ConnectionSubscription},
    error::BoardError,
    ledger::{LedgerEvent, LedgerView, MessageLedger, ReconcileTrigger, TransactionRecord},
    network::{NetworkReconciler, NetworkState},
    reader::LedgerReader,
    resolver::{Candidate, ProviderResolver, TransportSource},
    rpc::{BridgeTransport, JsonRpcClient, LedgerRpc},
    submitter::TransactionSubmitter,
    transport::TransportKind,
    workers::{RefreshHandle, RefreshWorker},
};
use anyhow::Context;
use std::{sync::Arc, time::Duration};
use tokio::{sync::broadcast, task::JoinHandle};

pub struct BoardEngine {
    config: Arc<BoardConfig>,
    connection: ConnectionManager,
    network: Arc<NetworkReconciler>,
    ledger: MessageLedger,
    reader: Arc<LedgerReader<dyn LedgerRpc>>,
    submitter: TransactionSubmitter,
    refresh: RefreshHandle,
    worker: JoinHandle<()>,
}

impl BoardEngine {
    /// Creates the engine, spawns its refresh worker and queues the first
    /// ledger read. Must be called from within a Tokio runtime.
    ///
    /// # Arguments
    ///
    /// * `config` - The shared board configuration.
    /// * `sources` - Wallet transport candidates, in any order.
    /// * `read_rpc` - The public, wallet-independent read path.
    pub fn new(
        config: Arc<BoardConfig>,
        sources: Vec<Arc<dyn TransportSource>>,
        read_rpc: Arc<dyn LedgerRpc>,
    ) -> Self {
        let network = Arc::new(NetworkReconciler::new(Arc::new(config.chain.clone())));
        let connection = ConnectionManager::new(
            ProviderResolver::new(sources),
            network.clone(),
            config.channels.connection_event_buffer,
        );
        let ledger = MessageLedger::new(
            config.submitter.max_reconcile_cycles,
            config.channels.ledger_event_buffer,
        )
        .with_clock_skew(config.submitter.clock_skew());
        let reader: Arc<LedgerReader<dyn LedgerRpc>> =
            Arc::new(LedgerReader::new(read_rpc, &config.ledger));

        let (worker, refresh) = RefreshWorker::new(
            reader.clone(),
            ledger.clone(),
            config.channels.refresh_command_buffer,
        );
        let worker = tokio::spawn(worker.run());
        refresh.try_request(ReconcileTrigger::Automatic);

        let submitter = TransactionSubmitter::new(
            connection.clone(),
            network.clone(),
            ledger.clone(),
            refresh.clone(),
            config.ledger.contract_address,
            config.submitter.clone(),
        );

        tracing::info!(
            chain_id = config.chain.chain_id,
            contract = %config.ledger.contract_address,
            "board engine started"
        );

        Self {
            config,
            connection,
            network,
            ledger,
            reader,
            submitter,
            refresh,
            worker,
        }
    }

    /// Builds the engine from configuration alone: the public read endpoint
    /// and any configured wallet bridges.
    pub fn from_config(config: BoardConfig) -> anyhow::Result<Self> {
        let timeout = Duration::from_secs(config.ledger.request_timeout_secs);
        let read_rpc = JsonRpcClient::new(config.ledger.read_url.clone(), timeout)
            .context("Failed to build the public read client")?;

        let mut sources: Vec<Arc<dyn TransportSource>> = Vec::new();
        let bridges = [
            (TransportKind::HostInApp, &config.transports.host_bridge_url),
            (
                TransportKind::BrowserInjected,
                &config.transports.injected_bridge_url,
            ),
        ];
        for (kind, url) in bridges {
            let candidate = match url {
                Some(url) => {
                    let client = JsonRpcClient::new(url.clone(), timeout)
                        .with_context(|| format!("Failed to build wallet bridge client for '{url}'"))?;
                    Candidate::present(Arc::new(BridgeTransport::new(kind, client)))
                }
                None => Candidate::absent(kind),
            };
            sources.push(Arc::new(candidate));
        }

        Ok(Self::new(Arc::new(config), sources, Arc::new(read_rpc)))
    }

    pub fn config(&self) -> &BoardConfig {
        &self.config
    }

    pub async fn connect(&self) -> ConnectionState {
        self.connection.connect().await
    }

    pub async fn disconnect(&self) {
        self.connection.disconnect().await
    }

    pub fn is_connecting(&self) -> bool {
        self.connection.is_connecting()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.current()
    }

    pub fn subscribe_connection(&self) -> ConnectionSubscription {
        self.connection.subscribe()
    }

    pub fn network_state(&self) -> NetworkState {
        self.network.state()
    }

    pub async fn publish(&self, text: &str) -> Result<TransactionRecord, BoardError> {
        self.submitter.publish(text).await
    }

    /// Manual refresh: re-reads the ledger and waits for reconciliation.
    /// Timed-out posts that are still not on chain are given up on.
    pub async fn refresh(&self) -> Result<usize, BoardError> {
        self.refresh.refresh(ReconcileTrigger::Manual).await
    }

    /// Re-reads the ledger as a regular cycle and waits for it.
    pub async fn reload(&self) -> Result<usize, BoardError> {
        self.refresh.refresh(ReconcileTrigger::Automatic).await
    }

    pub fn view(&self) -> LedgerView {
        self.ledger.view()
    }

    pub fn subscribe_ledger(&self) -> broadcast::Receiver<LedgerEvent> {
        self.ledger.subscribe()
    }

    pub async fn message_count(&self) -> Result<u64, BoardError> {
        self.reader.count().await
    }

    /// Number of posts whose confirmation is still being tracked.
    pub fn in_flight(&self) -> usize {
        self.submitter.in_flight()
    }

    /// Stops the refresh worker and ends the wallet session.
    pub async fn shutdown(self) {
        self.refresh.stop().await;
        self.connection.disconnect().await;
        tracing::info!("board engine stopped");
    }
}

impl Drop for BoardEngine {
    fn drop(&mut self) {
        self.worker.abort();
        self.submitter.abort_all();
        self.connection.shutdown();
    }
}
