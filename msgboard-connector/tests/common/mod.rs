#![allow(dead_code)]

use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_sol_types::SolCall;
use async_trait::async_trait;
use chrono::Utc;
use msgboard_connector::{
    abi::{getMessagesCall, getMessagesCountCall, messagesCall, postMessageCall, Message},
    config::{BoardConfig, ReadMode},
    error::{TransportError, CODE_UNRECOGNIZED_CHAIN, CODE_USER_REJECTED},
    ledger::{LedgerEvent, TxState},
    resolver::{Candidate, TransportSource},
    rpc::LedgerRpc,
    transport::{parse_quantity, TransportEvent, TransportId, TransportKind, WalletTransport},
    BoardEngine,
};
use serde_json::{json, Value};
use std::{
    collections::HashSet,
    str::FromStr,
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex, Once,
    },
    time::Duration,
};
use tokio::sync::broadcast;

pub const BASE: u64 = 8453;
pub const MAINNET: u64 = 1;

static TRACING: Once = Once::new();

/// Routes test logs through the workspace logger. Set `MSGBOARD_TEST_LOG` to
/// a level to see them.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let level = std::env::var("MSGBOARD_TEST_LOG").unwrap_or_else(|_| "error".to_string());
        let config = msgboard_logger::LogConfig {
            level,
            format: msgboard_logger::LogFormat::Compact,
            ..Default::default()
        };
        let _ = msgboard_logger::init(&config);
    });
}

pub fn alice() -> Address {
    Address::repeat_byte(0xa1)
}

pub fn bob() -> Address {
    Address::repeat_byte(0xb0)
}

/// Engine settings tightened for tests that run on a paused clock.
pub fn test_config() -> BoardConfig {
    let mut config = BoardConfig::default();
    config.submitter.confirmation_timeout_secs = 5;
    config.submitter.receipt_poll_interval_ms = 100;
    config.submitter.grace_delay_ms = 500;
    config.submitter.max_reconcile_cycles = 2;
    config.ledger.read_mode = ReadMode::Auto;
    config
}

// --- In-memory chain ---

#[derive(Debug, Clone)]
struct Post {
    author: Address,
    text: String,
    timestamp: u64,
}

/// The ledger contract plus the public read endpoint in front of it.
#[derive(Default)]
pub struct MockChain {
    posts: Mutex<Vec<Post>>,
    indexed_only: AtomicBool,
    fail_reads: AtomicBool,
    /// Reported by `getMessagesCount()` instead of the real length.
    claimed_count: Mutex<Option<U256>>,
    bulk_error: Mutex<Option<TransportError>>,
    pub reads: AtomicUsize,
    pub bulk_reads: AtomicUsize,
}

impl MockChain {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A deployment without `getMessages()`.
    pub fn indexed_only() -> Arc<Self> {
        let chain = Self::default();
        chain.indexed_only.store(true, Ordering::SeqCst);
        Arc::new(chain)
    }

    pub fn append(&self, author: Address, text: &str) {
        self.append_at(author, text, Utc::now().timestamp() as u64);
    }

    pub fn append_at(&self, author: Address, text: &str, timestamp: u64) {
        self.posts.lock().unwrap().push(Post {
            author,
            text: text.to_string(),
            timestamp,
        });
    }

    pub fn len(&self) -> usize {
        self.posts.lock().unwrap().len()
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn claim_count(&self, count: U256) {
        *self.claimed_count.lock().unwrap() = Some(count);
    }

    /// Fails `getMessages()` with `err` while set.
    pub fn set_bulk_error(&self, err: Option<TransportError>) {
        *self.bulk_error.lock().unwrap() = err;
    }

    fn answer(&self, data: &[u8]) -> Result<Vec<u8>, TransportError> {
        let posts = self.posts.lock().unwrap().clone();
        let selector: [u8; 4] = data
            .get(..4)
            .and_then(|s| s.try_into().ok())
            .ok_or_else(|| TransportError::rpc(-32602, "missing selector"))?;

        if selector == getMessagesCall::SELECTOR {
            if self.indexed_only.load(Ordering::SeqCst) {
                return Err(TransportError::rpc(3, "execution reverted"));
            }
            if let Some(err) = self.bulk_error.lock().unwrap().clone() {
                return Err(err);
            }
            self.bulk_reads.fetch_add(1, Ordering::SeqCst);
            let messages: Vec<Message> = posts
                .into_iter()
                .map(|p| Message {
                    user: p.author,
                    text: p.text,
                    timestamp: U256::from(p.timestamp),
                })
                .collect();
            return Ok(getMessagesCall::abi_encode_returns(&(messages,)));
        }
        if selector == getMessagesCountCall::SELECTOR {
            let count = self
                .claimed_count
                .lock()
                .unwrap()
                .unwrap_or(U256::from(posts.len()));
            return Ok(getMessagesCountCall::abi_encode_returns(&(count,)));
        }
        if selector == messagesCall::SELECTOR {
            let call = messagesCall::abi_decode(data, true)
                .map_err(|e| TransportError::rpc(-32602, e.to_string()))?;
            let index = usize::try_from(call.index).unwrap_or(usize::MAX);
            let post = posts
                .get(index)
                .ok_or_else(|| TransportError::rpc(3, "execution reverted: index out of range"))?;
            return Ok(messagesCall::abi_encode_returns(&(
                post.author,
                post.text.clone(),
                U256::from(post.timestamp),
            )));
        }
        Err(TransportError::rpc(3, "execution reverted"))
    }
}

#[async_trait]
impl LedgerRpc for MockChain {
    async fn call(&self, _to: Address, data: Bytes) -> Result<Bytes, TransportError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(TransportError::Timeout);
        }
        self.answer(&data).map(Bytes::from)
    }
}

// --- In-memory wallet ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiptMode {
    Success,
    Revert,
    /// The wallet never reports a receipt.
    Never,
}

#[derive(Debug)]
struct WalletState {
    chain_id: u64,
    known_chains: HashSet<u64>,
    accounts: Vec<Address>,
    receipt_mode: ReceiptMode,
    /// Whether submitted posts make it onto the chain.
    lands: bool,
    /// How long after submission a post shows up on chain.
    land_delay: Duration,
    /// Receipt polls that fail before the wallet answers normally.
    receipt_failures: usize,
    ready_error: Option<TransportError>,
    auth_delay: Duration,
    switch_delay: Duration,
    auth_error: Option<TransportError>,
    switch_error: Option<TransportError>,
    add_error: Option<TransportError>,
    send_error: Option<TransportError>,
    probe_fails: bool,
    balance_fails: bool,
    added_chains: Vec<Value>,
    sent: Vec<Value>,
}

pub struct MockWallet {
    name: &'static str,
    kind: TransportKind,
    chain: Arc<MockChain>,
    state: Mutex<WalletState>,
    calls: Mutex<Vec<String>>,
    events: broadcast::Sender<TransportEvent>,
    next_hash: AtomicU64,
    ready_calls: AtomicUsize,
}

impl MockWallet {
    pub fn new(kind: TransportKind, chain: Arc<MockChain>) -> Arc<Self> {
        Self::named("wallet", kind, chain)
    }

    pub fn named(name: &'static str, kind: TransportKind, chain: Arc<MockChain>) -> Arc<Self> {
        let (events, _) = broadcast::channel(16);
        Arc::new(Self {
            name,
            kind,
            chain,
            state: Mutex::new(WalletState {
                chain_id: BASE,
                known_chains: HashSet::from([MAINNET, BASE]),
                accounts: vec![alice()],
                receipt_mode: ReceiptMode::Success,
                lands: true,
                land_delay: Duration::ZERO,
                receipt_failures: 0,
                ready_error: None,
                auth_delay: Duration::ZERO,
                switch_delay: Duration::ZERO,
                auth_error: None,
                switch_error: None,
                add_error: None,
                send_error: None,
                probe_fails: false,
                balance_fails: false,
                added_chains: Vec::new(),
                sent: Vec::new(),
            }),
            calls: Mutex::new(Vec::new()),
            events,
            next_hash: AtomicU64::new(0),
            ready_calls: AtomicUsize::new(0),
        })
    }

    /// A Base wallet that has never heard of chain 8453 and sits on mainnet.
    pub fn on_mainnet_without_base(self: &Arc<Self>) -> Arc<Self> {
        {
            let mut state = self.state.lock().unwrap();
            state.chain_id = MAINNET;
            state.known_chains = HashSet::from([MAINNET]);
        }
        self.clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, method: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|m| *m == method).count()
    }

    pub fn chain_id(&self) -> u64 {
        self.state.lock().unwrap().chain_id
    }

    pub fn added_chains(&self) -> Vec<Value> {
        self.state.lock().unwrap().added_chains.clone()
    }

    pub fn sent(&self) -> Vec<Value> {
        self.state.lock().unwrap().sent.clone()
    }

    pub fn set_receipt_mode(&self, mode: ReceiptMode) {
        self.state.lock().unwrap().receipt_mode = mode;
    }

    pub fn set_lands(&self, lands: bool) {
        self.state.lock().unwrap().lands = lands;
    }

    pub fn set_land_delay(&self, delay: Duration) {
        self.state.lock().unwrap().land_delay = delay;
    }

    pub fn set_receipt_failures(&self, failures: usize) {
        self.state.lock().unwrap().receipt_failures = failures;
    }

    pub fn set_ready_error(&self, err: Option<TransportError>) {
        self.state.lock().unwrap().ready_error = err;
    }

    pub fn ready_calls(&self) -> usize {
        self.ready_calls.load(Ordering::SeqCst)
    }

    pub fn set_auth_delay(&self, delay: Duration) {
        self.state.lock().unwrap().auth_delay = delay;
    }

    pub fn set_switch_delay(&self, delay: Duration) {
        self.state.lock().unwrap().switch_delay = delay;
    }

    pub fn set_auth_error(&self, err: Option<TransportError>) {
        self.state.lock().unwrap().auth_error = err;
    }

    pub fn set_switch_error(&self, err: Option<TransportError>) {
        self.state.lock().unwrap().switch_error = err;
    }

    pub fn set_add_error(&self, err: Option<TransportError>) {
        self.state.lock().unwrap().add_error = err;
    }

    pub fn set_send_error(&self, err: Option<TransportError>) {
        self.state.lock().unwrap().send_error = err;
    }

    pub fn set_probe_fails(&self, fails: bool) {
        self.state.lock().unwrap().probe_fails = fails;
    }

    pub fn set_balance_fails(&self, fails: bool) {
        self.state.lock().unwrap().balance_fails = fails;
    }

    /// Moves the wallet to another chain out of band, without notifying.
    pub fn drift_to(&self, chain_id: u64) {
        self.state.lock().unwrap().chain_id = chain_id;
    }

    pub fn emit(&self, event: TransportEvent) {
        if let TransportEvent::AccountsChanged(accounts) = &event {
            self.state.lock().unwrap().accounts = accounts.clone();
        }
        if let TransportEvent::ChainChanged(chain_id) = event {
            self.state.lock().unwrap().chain_id = chain_id;
        }
        let _ = self.events.send(event);
    }

    pub fn listeners(&self) -> usize {
        self.events.receiver_count()
    }

    fn hex(n: u64) -> Value {
        json!(format!("{n:#x}"))
    }

    fn submit(&self, params: &Value) -> Result<Value, TransportError> {
        let tx = params
            .get(0)
            .cloned()
            .ok_or_else(|| TransportError::rpc(-32602, "missing transaction"))?;
        let (lands, land_delay) = {
            let mut state = self.state.lock().unwrap();
            if let Some(err) = state.send_error.clone() {
                return Err(err);
            }
            state.sent.push(tx.clone());
            (state.lands, state.land_delay)
        };

        let from = tx["from"]
            .as_str()
            .and_then(|s| Address::from_str(s).ok())
            .ok_or_else(|| TransportError::rpc(-32602, "bad from"))?;
        let data = tx["data"]
            .as_str()
            .and_then(|s| Bytes::from_str(s).ok())
            .ok_or_else(|| TransportError::rpc(-32602, "bad data"))?;
        let call = postMessageCall::abi_decode(&data, true)
            .map_err(|e| TransportError::rpc(-32602, e.to_string()))?;
        if lands && land_delay.is_zero() {
            self.chain.append(from, &call.text);
        } else if lands {
            let chain = self.chain.clone();
            tokio::spawn(async move {
                tokio::time::sleep(land_delay).await;
                chain.append(from, &call.text);
            });
        }

        let n = self.next_hash.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(json!(B256::left_padding_from(&n.to_be_bytes())))
    }

    fn receipt(&self, params: &Value) -> Result<Value, TransportError> {
        let hash = params[0].clone();
        let mut state = self.state.lock().unwrap();
        if state.receipt_failures > 0 {
            state.receipt_failures -= 1;
            return Err(TransportError::Io("connection reset by peer".into()));
        }
        let status = match state.receipt_mode {
            ReceiptMode::Never => return Ok(Value::Null),
            ReceiptMode::Success => "0x1",
            ReceiptMode::Revert => "0x0",
        };
        Ok(json!({
            "transactionHash": hash,
            "status": status,
            "blockNumber": "0x2a",
            "blockHash": B256::repeat_byte(0x42),
        }))
    }
}

#[async_trait]
impl WalletTransport for MockWallet {
    fn id(&self) -> TransportId {
        TransportId(format!("mock:{}", self.name))
    }

    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        self.calls.lock().unwrap().push(method.to_string());
        match method {
            "eth_chainId" => {
                let state = self.state.lock().unwrap();
                if state.probe_fails {
                    return Err(TransportError::Io("wallet unreachable".into()));
                }
                Ok(Self::hex(state.chain_id))
            }
            "eth_requestAccounts" => {
                let delay = self.state.lock().unwrap().auth_delay;
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let state = self.state.lock().unwrap();
                match state.auth_error.clone() {
                    Some(err) => Err(err),
                    None => Ok(json!(state.accounts)),
                }
            }
            "wallet_switchEthereumChain" => {
                let delay = self.state.lock().unwrap().switch_delay;
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                let target = params[0]["chainId"]
                    .as_str()
                    .map(parse_quantity)
                    .transpose()?
                    .ok_or_else(|| TransportError::rpc(-32602, "missing chainId"))?;
                let mut state = self.state.lock().unwrap();
                if let Some(err) = state.switch_error.clone() {
                    return Err(err);
                }
                if !state.known_chains.contains(&target) {
                    return Err(TransportError::rpc(
                        CODE_UNRECOGNIZED_CHAIN,
                        format!("Unrecognized chain ID {target:#x}"),
                    ));
                }
                state.chain_id = target;
                Ok(Value::Null)
            }
            "wallet_addEthereumChain" => {
                let mut state = self.state.lock().unwrap();
                if let Some(err) = state.add_error.clone() {
                    return Err(err);
                }
                let descriptor = params[0].clone();
                let id = descriptor["chainId"]
                    .as_str()
                    .map(parse_quantity)
                    .transpose()?
                    .ok_or_else(|| TransportError::rpc(-32602, "missing chainId"))?;
                state.known_chains.insert(id);
                state.added_chains.push(descriptor);
                Ok(Value::Null)
            }
            "eth_getBalance" => {
                if self.state.lock().unwrap().balance_fails {
                    return Err(TransportError::rpc(-32603, "balance lookup failed"));
                }
                Ok(json!("0xde0b6b3a7640000"))
            }
            "eth_sendTransaction" => self.submit(&params),
            "eth_getTransactionReceipt" => self.receipt(&params),
            other => Err(TransportError::rpc(-32601, format!("method {other} not supported"))),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }

    async fn ready(&self) -> Result<(), TransportError> {
        self.ready_calls.fetch_add(1, Ordering::SeqCst);
        match self.state.lock().unwrap().ready_error.clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

pub fn user_rejected() -> TransportError {
    TransportError::rpc(CODE_USER_REJECTED, "User rejected the request.")
}

pub fn present(wallet: &Arc<MockWallet>) -> Arc<dyn TransportSource> {
    Arc::new(Candidate::present(wallet.clone()))
}

/// An engine over one wallet and one chain.
pub fn engine_with(wallet: &Arc<MockWallet>, chain: &Arc<MockChain>) -> BoardEngine {
    init_tracing();
    BoardEngine::new(Arc::new(test_config()), vec![present(wallet)], chain.clone())
}

/// Waits (on the paused clock) for the first ledger event matching `pred`.
pub async fn wait_for_event<F>(rx: &mut broadcast::Receiver<LedgerEvent>, mut pred: F) -> LedgerEvent
where
    F: FnMut(&LedgerEvent) -> bool,
{
    let found = tokio::time::timeout(Duration::from_secs(600), async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("ledger closed"),
            }
        }
    })
    .await;
    found.expect("ledger event did not arrive")
}

pub fn state_rank(state: &TxState) -> u8 {
    match state {
        TxState::Pending => 0,
        TxState::Submitted { .. } => 1,
        TxState::TimedOut => 2,
        TxState::Confirmed { .. } | TxState::Reverted { .. } => 3,
    }
}
