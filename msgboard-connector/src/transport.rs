//! # Wallet Transports
//!
//! A wallet transport is any channel that speaks the injected-wallet JSON-RPC
//! convention (`eth_requestAccounts`, `eth_chainId`,
//! `wallet_switchEthereumChain`, ...) and emits account/chain/disconnect
//! notifications. The engine is polymorphic over [`WalletTransport`], so an
//! in-app wallet supplied by a hosting client, a browser-injected wallet
//! reached through a bridge, and in-memory test doubles are interchangeable.

use crate::error::TransportError;
use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::{fmt, str::FromStr, time::Duration};
use tokio::sync::broadcast;

/// Where a transport comes from. The declaration order is the resolution
/// priority: a host-supplied wallet always wins over an injected one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TransportKind {
    /// A wallet supplied by the hosting client (only present in-app).
    HostInApp,
    /// A wallet injected into the browser page.
    BrowserInjected,
}

/// Stable identity of a transport instance, used to key in-flight operations.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransportId(pub String);

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Notifications pushed by a wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    AccountsChanged(Vec<Address>),
    ChainChanged(u64),
    Disconnect,
}

/// The outcome of a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub transaction_hash: B256,
    pub success: bool,
    pub block_number: u64,
    pub block_hash: Option<B256>,
}

#[async_trait]
pub trait WalletTransport: Send + Sync {
    fn id(&self) -> TransportId;

    fn kind(&self) -> TransportKind;

    /// Issues one JSON-RPC request against the wallet.
    async fn request(&self, method: &str, params: Value) -> Result<Value, TransportError>;

    /// Subscribes to wallet notifications. Every call returns an independent
    /// receiver; dropping it releases the subscription.
    fn subscribe(&self) -> broadcast::Receiver<TransportEvent>;

    /// A side-effect free capability probe. Must never open a wallet prompt.
    async fn probe(&self) -> Result<(), TransportError> {
        self.request("eth_chainId", json!([])).await.map(|_| ())
    }

    /// Waits until the transaction is mined.
    ///
    /// The default polls `eth_getTransactionReceipt`; it never gives up on its
    /// own, callers bound it with a timer. Failed polls are retried, only a
    /// receipt that cannot be parsed ends the wait early.
    async fn wait_for_receipt(
        &self,
        hash: B256,
        poll_interval: Duration,
    ) -> Result<TxReceipt, TransportError> {
        loop {
            match self
                .request("eth_getTransactionReceipt", json!([hash]))
                .await
            {
                Ok(raw) if !raw.is_null() => return parse_receipt(&raw),
                Ok(_) => {}
                Err(err) => {
                    tracing::debug!(%hash, error = %err, "receipt poll failed, retrying");
                }
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// Signals a hosting client that the app is ready to be shown. Called
    /// whenever the transport is selected; the default does nothing.
    async fn ready(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Parses a chain id given either as a JSON number or a (hex or decimal) string.
pub fn parse_chain_id(value: &Value) -> Result<u64, TransportError> {
    if let Some(n) = value.as_u64() {
        return Ok(n);
    }
    let raw = value
        .as_str()
        .ok_or_else(|| TransportError::Malformed(format!("chain id is not a string: {value}")))?;
    parse_quantity(raw)
}

/// Parses an `0x`-prefixed hex quantity, or a plain decimal string.
pub fn parse_quantity(raw: &str) -> Result<u64, TransportError> {
    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => raw.parse(),
    };
    parsed.map_err(|e| TransportError::Malformed(format!("invalid quantity '{raw}': {e}")))
}

pub fn parse_u256(value: &Value) -> Result<U256, TransportError> {
    let raw = value
        .as_str()
        .ok_or_else(|| TransportError::Malformed(format!("expected hex quantity, got {value}")))?;
    U256::from_str(raw).map_err(|e| TransportError::Malformed(format!("invalid quantity '{raw}': {e}")))
}

pub fn parse_accounts(value: &Value) -> Result<Vec<Address>, TransportError> {
    let list = value
        .as_array()
        .ok_or_else(|| TransportError::Malformed(format!("expected account list, got {value}")))?;
    list.iter()
        .map(|entry| {
            entry
                .as_str()
                .and_then(|s| Address::from_str(s).ok())
                .ok_or_else(|| TransportError::Malformed(format!("invalid account: {entry}")))
        })
        .collect()
}

pub fn parse_hash(value: &Value) -> Result<B256, TransportError> {
    value
        .as_str()
        .and_then(|s| B256::from_str(s).ok())
        .ok_or_else(|| TransportError::Malformed(format!("invalid transaction hash: {value}")))
}

pub fn parse_receipt(value: &Value) -> Result<TxReceipt, TransportError> {
    let transaction_hash = parse_hash(&value["transactionHash"])?;
    // Pre-Byzantium receipts carry no status; treat them as successful.
    let success = match value.get("status").and_then(Value::as_str) {
        Some(status) => parse_quantity(status)? == 1,
        None => true,
    };
    let block_number = value
        .get("blockNumber")
        .and_then(Value::as_str)
        .map(parse_quantity)
        .transpose()?
        .unwrap_or_default();
    let block_hash = value
        .get("blockHash")
        .filter(|v| !v.is_null())
        .map(parse_hash)
        .transpose()?;

    Ok(TxReceipt {
        transaction_hash,
        success,
        block_number,
        block_hash,
    })
}
