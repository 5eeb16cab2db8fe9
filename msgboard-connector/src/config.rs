#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use alloy_primitives::{address, Address, U256};
use serde_json::{json, Value};
use std::time::Duration;

/// The top-level configuration for the message board engine.
///
/// Every section has a default targeting the Base mainnet deployment, so an
/// empty file (or no file at all) yields a working configuration.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub struct BoardConfig {
    #[cfg_attr(feature = "serde", serde(default))]
    pub chain: ChainConfig,
    #[cfg_attr(feature = "serde", serde(default))]
    pub ledger: LedgerConfig,
    #[cfg_attr(feature = "serde", serde(default))]
    pub submitter: SubmitterConfig,
    #[cfg_attr(feature = "serde", serde(default))]
    pub transports: TransportsConfig,
    #[cfg_attr(feature = "serde", serde(default))]
    pub channels: ChannelConfig,
}

/// The target network descriptor, including everything a wallet needs for
/// `wallet_addEthereumChain`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case", default))]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: String,
    pub rpc_url: String,
    pub currency_name: String,
    pub currency_symbol: String,
    pub currency_decimals: u8,
    pub explorer_url: String,
}

/// How the ledger contract is enumerated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ReadMode {
    /// Try `getMessages()` first, fall back to count + indexed reads.
    #[default]
    Auto,
    /// Only `getMessages()`.
    Bulk,
    /// Only `getMessagesCount()` followed by `messages(i)`.
    Indexed,
}

/// Settings for the ledger contract and its public read path.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case", default))]
pub struct LedgerConfig {
    pub contract_address: Address,
    /// A connection-independent JSON-RPC endpoint used for every read.
    pub read_url: String,
    pub read_mode: ReadMode,
    /// Maximum number of indexed reads in flight at once.
    pub batch_size: usize,
    /// Indexed reads refuse a reported count above this.
    pub max_records: u64,
    pub request_timeout_secs: u64,
}

/// Fee, gas and confirmation-tracking behavior of the submitter.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case", default))]
pub struct SubmitterConfig {
    /// The fee the contract requires with every post, in wei.
    pub fee_wei: u128,
    /// Fixed gas ceiling attached to every post.
    pub gas_limit: u64,
    /// How long to wait for a receipt before marking a record as timed out.
    pub confirmation_timeout_secs: u64,
    pub receipt_poll_interval_ms: u64,
    /// Delay before the authoritative re-read that follows a timeout.
    pub grace_delay_ms: u64,
    /// Reconcile cycles an unmatched confirmed/timed-out record survives.
    pub max_reconcile_cycles: u32,
    /// How far a block timestamp may precede the local submission time and
    /// still match, to absorb a fast local clock.
    pub clock_skew_secs: u64,
}

/// Optional JSON-RPC bridges used to build transport candidates from
/// configuration. Hosts embedding the engine may supply their own sources
/// instead.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case", default))]
pub struct TransportsConfig {
    /// Endpoint of the in-app wallet exposed by a hosting client.
    pub host_bridge_url: Option<String>,
    /// Endpoint of a browser-injected wallet bridge.
    pub injected_bridge_url: Option<String>,
}

/// Defines capacities for the channels inside the engine.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case", default))]
pub struct ChannelConfig {
    /// The buffer capacity for the refresh worker's command queue.
    pub refresh_command_buffer: usize,
    /// The buffer capacity of the connection state event stream.
    pub connection_event_buffer: usize,
    /// The buffer capacity of the ledger event stream.
    pub ledger_event_buffer: usize,
}

impl ChainConfig {
    /// The chain id as the `0x`-prefixed hex string wallets expect.
    pub fn hex_chain_id(&self) -> String {
        format!("{:#x}", self.chain_id)
    }

    /// The parameter object for `wallet_addEthereumChain`.
    pub fn add_chain_params(&self) -> Value {
        json!({
            "chainId": self.hex_chain_id(),
            "chainName": self.name,
            "rpcUrls": [self.rpc_url],
            "nativeCurrency": {
                "name": self.currency_name,
                "symbol": self.currency_symbol,
                "decimals": self.currency_decimals,
            },
            "blockExplorerUrls": [self.explorer_url],
        })
    }
}

impl SubmitterConfig {
    pub fn fee(&self) -> U256 {
        U256::from(self.fee_wei)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_interval_ms)
    }

    pub fn grace_delay(&self) -> Duration {
        Duration::from_millis(self.grace_delay_ms)
    }

    pub fn clock_skew(&self) -> Duration {
        Duration::from_secs(self.clock_skew_secs)
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            chain_id: 8453,
            name: "Base".to_string(),
            rpc_url: "https://mainnet.base.org".to_string(),
            currency_name: "Ether".to_string(),
            currency_symbol: "ETH".to_string(),
            currency_decimals: 18,
            explorer_url: "https://basescan.org".to_string(),
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            contract_address: address!("7cb7f14331DCAdefbDf9dd3AAeb596a305cbA3D2"),
            read_url: "https://mainnet.base.org".to_string(),
            read_mode: ReadMode::Auto,
            batch_size: 16,
            max_records: 100_000,
            request_timeout_secs: 10,
        }
    }
}

impl Default for SubmitterConfig {
    fn default() -> Self {
        Self {
            fee_wei: 1_000_000_000_000,
            gas_limit: 300_000,
            confirmation_timeout_secs: 45,
            receipt_poll_interval_ms: 1_500,
            grace_delay_ms: 2_000,
            max_reconcile_cycles: 3,
            clock_skew_secs: 15,
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            refresh_command_buffer: 32,
            connection_event_buffer: 64,
            ledger_event_buffer: 128,
        }
    }
}

/// Loads the board configuration from a TOML file, overlaid with
/// `MSGBOARD__<SECTION>__<KEY>` environment variables.
#[cfg(feature = "serde")]
pub fn load_config(path: &str) -> anyhow::Result<BoardConfig> {
    use anyhow::Context;

    let builder = config::Config::builder()
        .add_source(config::File::with_name(path))
        .add_source(config::Environment::with_prefix("MSGBOARD").separator("__"));

    let settings: BoardConfig = builder
        .build()
        .context(format!("Failed to build configuration from '{}'", path))?
        .try_deserialize()
        .context("Failed to deserialize configuration")?;

    Ok(settings)
}
