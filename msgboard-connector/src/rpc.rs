//! JSON-RPC over HTTP.
//!
//! [`JsonRpcClient`] is the connection-independent read path used by the
//! ledger reader. Wrapped in a [`BridgeTransport`] it also serves as a wallet
//! transport for wallets exposed through a local JSON-RPC bridge.

use crate::{
    error::TransportError,
    transport::{TransportEvent, TransportId, TransportKind, WalletTransport},
};
use alloy_primitives::{Address, Bytes};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::{
    str::FromStr,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};
use tokio::sync::broadcast;

/// A trait abstracting over the read-only contract call path.
///
/// This allows the ledger reader to be generic over the RPC client, making it
/// easy to use with both the live [`JsonRpcClient`] and in-memory chains in tests.
#[async_trait]
pub trait LedgerRpc: Send + Sync {
    /// Executes a read-only `eth_call` against `to` at the latest block.
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, TransportError>;
}

/// A minimal JSON-RPC 2.0 client.
#[derive(Debug)]
pub struct JsonRpcClient {
    url: String,
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.into(),
            http,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn request(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        tracing::trace!(method, id, url = %self.url, "json-rpc request");

        let response = self.http.post(&self.url).json(&payload).send().await?;
        let status = response.status();
        let body: Value = response.json().await?;

        if let Some(err) = body.get("error") {
            return Err(TransportError::Rpc {
                code: err.get("code").and_then(Value::as_i64).unwrap_or(-32603),
                message: err
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
                data: err.get("data").cloned(),
            });
        }
        if !status.is_success() {
            return Err(TransportError::Io(format!("http status {status}: {body}")));
        }
        body.get("result")
            .cloned()
            .ok_or_else(|| TransportError::Malformed(format!("response without result: {body}")))
    }
}

#[async_trait]
impl LedgerRpc for JsonRpcClient {
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, TransportError> {
        let raw = self
            .request("eth_call", json!([{ "to": to, "data": data }, "latest"]))
            .await?;
        let hex = raw
            .as_str()
            .ok_or_else(|| TransportError::Malformed(format!("eth_call returned {raw}")))?;
        Bytes::from_str(hex).map_err(|e| TransportError::Malformed(format!("eth_call returned bad hex: {e}")))
    }
}

/// A wallet reachable through a JSON-RPC bridge.
///
/// HTTP carries no push channel, so the event stream stays silent; account
/// and chain drift is still caught by the network check before every post.
#[derive(Debug)]
pub struct BridgeTransport {
    kind: TransportKind,
    client: JsonRpcClient,
    events: broadcast::Sender<TransportEvent>,
}

impl BridgeTransport {
    pub fn new(kind: TransportKind, client: JsonRpcClient) -> Self {
        let (events, _) = broadcast::channel(16);
        Self {
            kind,
            client,
            events,
        }
    }
}

#[async_trait]
impl WalletTransport for BridgeTransport {
    fn id(&self) -> TransportId {
        TransportId(format!("{:?}@{}", self.kind, self.client.url()))
    }

    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        self.client.request(method, params).await
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }
}
