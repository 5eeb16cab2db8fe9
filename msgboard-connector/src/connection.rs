//! # Connection Manager
//!
//! Owns the single active wallet transport for the session and the
//! authoritative [`ConnectionState`].
//!
//! ## Flow
//! resolve transport → subscribe to wallet notifications →
//! `eth_requestAccounts` → network reconciliation → best-effort balance →
//! `Connected`. Notifications that arrive mid-flow are buffered and handled
//! once the session is installed.
//!
//! At most one connect flow, and at most one authorization request per
//! transport, is in flight at any time; concurrent callers attach to it.
//! Wallet notifications are consumed by a listener task that is replaced on
//! every new session and aborted on disconnect, so listeners never pile up
//! across reconnects.

use crate::{
    error::BoardError,
    network::{NetworkReconciler, NetworkState},
    resolver::ProviderResolver,
    singleflight::SingleFlight,
    transport::{parse_accounts, parse_u256, TransportEvent, TransportId, WalletTransport},
};
use alloy_primitives::{Address, U256};
use serde_json::json;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, Weak,
};
use tokio::{
    sync::{broadcast, watch},
    task::JoinHandle,
};
use tokio_stream::wrappers::BroadcastStream;

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected {
        address: Address,
        /// `None` when the balance could not be read.
        balance: Option<U256>,
    },
    ConnectionFailed {
        reason: BoardError,
    },
}

impl ConnectionState {
    pub fn address(&self) -> Option<Address> {
        match self {
            ConnectionState::Connected { address, .. } => Some(*address),
            _ => None,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected { .. })
    }
}

/// A stream of connection state changes.
///
/// Subscriptions are explicit: call [`ConnectionSubscription::unsubscribe`]
/// (or drop the value) to stop receiving updates.
#[derive(Debug)]
pub struct ConnectionSubscription {
    rx: broadcast::Receiver<ConnectionState>,
}

impl ConnectionSubscription {
    /// Receives the next state change. Returns `None` once the manager is gone.
    /// Slow subscribers skip the states they missed.
    pub async fn next(&mut self) -> Option<ConnectionState> {
        loop {
            match self.rx.recv().await {
                Ok(state) => return Some(state),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "connection subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Returns an already buffered state change without waiting.
    pub fn try_next(&mut self) -> Option<ConnectionState> {
        loop {
            match self.rx.try_recv() {
                Ok(state) => return Some(state),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }

    pub fn into_stream(self) -> BroadcastStream<ConnectionState> {
        BroadcastStream::new(self.rx)
    }

    pub fn unsubscribe(self) {
        tracing::debug!("connection subscription released");
    }
}

struct Session {
    transport: Arc<dyn WalletTransport>,
    listener: JoinHandle<()>,
}

struct Inner {
    resolver: ProviderResolver,
    network: Arc<NetworkReconciler>,
    state: watch::Sender<ConnectionState>,
    events: broadcast::Sender<ConnectionState>,
    session: Mutex<Option<Session>>,
    /// Bumped on every teardown; work started under an older epoch is discarded.
    epoch: AtomicU64,
    connecting: SingleFlight<(), ConnectionState>,
    authorizing: SingleFlight<TransportId, Result<Vec<Address>, BoardError>>,
}

/// A clonable handle to the connection manager.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(
        resolver: ProviderResolver,
        network: Arc<NetworkReconciler>,
        event_buffer: usize,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(event_buffer.max(1));
        Self {
            inner: Arc::new(Inner {
                resolver,
                network,
                state,
                events,
                session: Mutex::new(None),
                epoch: AtomicU64::new(0),
                connecting: SingleFlight::new(),
                authorizing: SingleFlight::new(),
            }),
        }
    }

    /// The current state, without waiting.
    pub fn current(&self) -> ConnectionState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> ConnectionSubscription {
        ConnectionSubscription {
            rx: self.inner.events.subscribe(),
        }
    }

    /// The transport of the live session. Callers must fetch it per use and
    /// not hold on to it across reconnects.
    pub fn active_transport(&self) -> Option<Arc<dyn WalletTransport>> {
        self.inner
            .lock_session()
            .as_ref()
            .map(|s| s.transport.clone())
    }

    /// Whether a connect flow is currently in flight.
    pub fn is_connecting(&self) -> bool {
        self.inner.connecting.is_pending()
    }

    /// Connects, or joins the connect already in progress.
    pub async fn connect(&self) -> ConnectionState {
        let current = self.current();
        if current.is_connected() && self.active_transport().is_some() {
            return current;
        }
        let inner = self.inner.clone();
        self.inner
            .connecting
            .run((), move || establish(inner))
            .await
    }

    /// Drops the session and any connect in progress.
    pub async fn disconnect(&self) {
        tracing::info!("disconnecting wallet");
        self.inner.teardown(true);
    }

    /// Releases the listener task and pending operations without emitting
    /// further state changes.
    pub(crate) fn shutdown(&self) {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.connecting.clear();
        self.inner.authorizing.clear();
        if let Some(session) = self.inner.lock_session().take() {
            session.listener.abort();
        }
    }
}

impl Inner {
    fn lock_session(&self) -> std::sync::MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, next: ConnectionState) {
        tracing::debug!(state = ?next, "connection state changed");
        self.state.send_replace(next.clone());
        // No subscribers is fine.
        let _ = self.events.send(next);
    }

    fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Ends the session. `abort_listener` is false when called from the
    /// listener itself, which then simply returns.
    fn teardown(&self, abort_listener: bool) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.connecting.clear();
        self.authorizing.clear();
        if let Some(session) = self.lock_session().take() {
            if abort_listener {
                session.listener.abort();
            }
        }
        self.network.reset();
        self.set_state(ConnectionState::Disconnected);
    }

    async fn authorize(&self, transport: Arc<dyn WalletTransport>) -> Result<Vec<Address>, BoardError> {
        self.authorizing
            .run(transport.id(), move || async move {
                tracing::info!(transport = %transport.id(), "requesting account authorization");
                let raw = transport.request("eth_requestAccounts", json!([])).await?;
                Ok(parse_accounts(&raw)?)
            })
            .await
    }

    fn install_session(
        self: &Arc<Self>,
        transport: Arc<dyn WalletTransport>,
        events: broadcast::Receiver<TransportEvent>,
        epoch: u64,
    ) {
        let listener = tokio::spawn(listen(
            Arc::downgrade(self),
            transport.clone(),
            events,
            epoch,
        ));
        let previous = self.lock_session().replace(Session {
            transport,
            listener,
        });
        if let Some(previous) = previous {
            previous.listener.abort();
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(session) = self.lock_session().take() {
            session.listener.abort();
        }
    }
}

async fn establish(inner: Arc<Inner>) -> ConnectionState {
    let epoch = inner.epoch();
    inner.set_state(ConnectionState::Connecting);

    let outcome = async {
        let transport = inner.resolver.resolve().await?;
        let events = transport.subscribe();
        let accounts = inner.authorize(transport.clone()).await?;
        let address = accounts.first().copied().ok_or(BoardError::UserRejected)?;
        if inner.epoch() != epoch {
            return Err(BoardError::NotConnected);
        }

        match inner.network.ensure(transport.clone()).await {
            NetworkState::Correct => {}
            NetworkState::Blocked { reason } => {
                return Err(BoardError::NetworkBlocked(Box::new(reason)))
            }
            other => {
                return Err(BoardError::Unknown {
                    detail: format!("network check ended in {other:?}"),
                })
            }
        }

        let balance = fetch_balance(transport.as_ref(), address).await;
        Ok::<_, BoardError>((transport, events, address, balance))
    }
    .await;

    if inner.epoch() != epoch {
        tracing::debug!("connect attempt abandoned by a disconnect");
        return inner.state.borrow().clone();
    }

    let next = match outcome {
        Ok((transport, events, address, balance)) => {
            tracing::info!(%address, "wallet connected");
            inner.install_session(transport, events, epoch);
            ConnectionState::Connected { address, balance }
        }
        Err(reason) => {
            tracing::warn!(error = %reason, "wallet connection failed");
            ConnectionState::ConnectionFailed { reason }
        }
    };
    inner.set_state(next.clone());
    next
}

async fn fetch_balance(transport: &dyn WalletTransport, address: Address) -> Option<U256> {
    let raw = transport
        .request("eth_getBalance", json!([address, "latest"]))
        .await;
    match raw.and_then(|value| parse_u256(&value)) {
        Ok(balance) => Some(balance),
        Err(err) => {
            tracing::warn!(%address, error = %err, "balance unavailable");
            None
        }
    }
}

async fn listen(
    inner: Weak<Inner>,
    transport: Arc<dyn WalletTransport>,
    mut events: broadcast::Receiver<TransportEvent>,
    epoch: u64,
) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "missed wallet notifications");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => TransportEvent::Disconnect,
        };

        let Some(inner) = inner.upgrade() else {
            return;
        };
        if inner.epoch() != epoch {
            return;
        }

        match event {
            TransportEvent::AccountsChanged(accounts) => match accounts.first().copied() {
                None => {
                    tracing::info!("wallet revoked all accounts");
                    inner.teardown(false);
                    return;
                }
                Some(address) => {
                    tracing::info!(%address, "wallet account changed");
                    inner.set_state(ConnectionState::Connecting);
                    let balance = fetch_balance(transport.as_ref(), address).await;
                    if inner.epoch() != epoch {
                        return;
                    }
                    inner.set_state(ConnectionState::Connected { address, balance });
                }
            },
            TransportEvent::ChainChanged(chain_id) => {
                tracing::info!(chain_id, "wallet chain changed");
                let network = inner.network.ensure(transport.clone()).await;
                if inner.epoch() != epoch {
                    return;
                }
                if let NetworkState::Blocked { reason } = &network {
                    tracing::warn!(error = %reason, "wallet left the target chain");
                }
                let address = inner.state.borrow().address();
                if let Some(address) = address {
                    let balance = fetch_balance(transport.as_ref(), address).await;
                    if inner.epoch() == epoch {
                        inner.set_state(ConnectionState::Connected { address, balance });
                    }
                }
            }
            TransportEvent::Disconnect => {
                tracing::warn!(transport = %transport.id(), "wallet transport lost");
                inner.teardown(false);
                return;
            }
        }
    }
}
