//! # Network Reconciler
//!
//! Brings a wallet onto the target chain:
//!
//! ```text
//! Unknown → Checking → Correct
//!                    → Switching → Correct | Blocked
//!                                → AddingChain → Switching → Correct | Blocked
//!                                              → Blocked
//! ```
//!
//! `ensure` is idempotent and cheap when the wallet is already on the right
//! chain (one `eth_chainId`, no mutating request), so it runs before every
//! submission as well as at connect time. Concurrent calls for the same
//! transport share one run, so a wallet never sees two switch prompts.

use crate::{
    config::ChainConfig,
    error::{BoardError, TransportError},
    singleflight::SingleFlight,
    transport::{parse_chain_id, TransportId, WalletTransport},
};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq)]
pub enum NetworkState {
    Unknown,
    Checking,
    Correct,
    Switching,
    AddingChain,
    Blocked { reason: BoardError },
}

impl NetworkState {
    pub fn is_correct(&self) -> bool {
        matches!(self, NetworkState::Correct)
    }
}

pub struct NetworkReconciler {
    chain: Arc<ChainConfig>,
    state: Arc<watch::Sender<NetworkState>>,
    inflight: SingleFlight<TransportId, NetworkState>,
}

impl NetworkReconciler {
    pub fn new(chain: Arc<ChainConfig>) -> Self {
        let (state, _) = watch::channel(NetworkState::Unknown);
        Self {
            chain,
            state: Arc::new(state),
            inflight: SingleFlight::new(),
        }
    }

    pub fn chain(&self) -> &ChainConfig {
        &self.chain
    }

    /// The last observed state.
    pub fn state(&self) -> NetworkState {
        self.state.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<NetworkState> {
        self.state.subscribe()
    }

    /// Forgets everything known about the network, e.g. after a disconnect.
    pub fn reset(&self) {
        self.inflight.clear();
        self.state.send_replace(NetworkState::Unknown);
    }

    /// Drives `transport` onto the target chain and returns the terminal state
    /// (`Correct` or `Blocked`).
    pub async fn ensure(&self, transport: Arc<dyn WalletTransport>) -> NetworkState {
        let chain = self.chain.clone();
        let state = self.state.clone();
        self.inflight
            .run(transport.id(), move || reconcile(transport, chain, state))
            .await
    }
}

async fn reconcile(
    transport: Arc<dyn WalletTransport>,
    chain: Arc<ChainConfig>,
    state: Arc<watch::Sender<NetworkState>>,
) -> NetworkState {
    let terminal = match drive(transport.as_ref(), &chain, &state).await {
        Ok(()) => NetworkState::Correct,
        Err(reason) => {
            tracing::warn!(transport = %transport.id(), target = chain.chain_id, error = %reason, "network blocked");
            NetworkState::Blocked { reason }
        }
    };
    state.send_replace(terminal.clone());
    terminal
}

async fn drive(
    transport: &dyn WalletTransport,
    chain: &ChainConfig,
    state: &watch::Sender<NetworkState>,
) -> Result<(), BoardError> {
    state.send_replace(NetworkState::Checking);
    let current = parse_chain_id(&transport.request("eth_chainId", json!([])).await?)?;
    if current == chain.chain_id {
        tracing::debug!(chain_id = current, "already on target chain");
        return Ok(());
    }

    tracing::info!(from = current, to = chain.chain_id, "requesting chain switch");
    state.send_replace(NetworkState::Switching);
    match switch(transport, chain).await {
        Ok(()) => return Ok(()),
        Err(err) if err.is_unrecognized_chain() => {}
        Err(err) => return Err(err.into()),
    }

    tracing::info!(chain_id = chain.chain_id, name = %chain.name, "chain unknown to wallet, adding it");
    state.send_replace(NetworkState::AddingChain);
    transport
        .request("wallet_addEthereumChain", json!([chain.add_chain_params()]))
        .await
        .map_err(|err| match BoardError::from(err.clone()) {
            BoardError::UserRejected => BoardError::UserRejected,
            _ => BoardError::ChainAddFailed(err.to_string()),
        })?;

    state.send_replace(NetworkState::Switching);
    switch(transport, chain).await.map_err(BoardError::from)
}

async fn switch(transport: &dyn WalletTransport, chain: &ChainConfig) -> Result<(), TransportError> {
    transport
        .request(
            "wallet_switchEthereumChain",
            json!([{ "chainId": chain.hex_chain_id() }]),
        )
        .await
        .map(|_| ())
}
