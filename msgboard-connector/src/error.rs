use serde_json::Value;
use thiserror::Error;

/// User rejected the request (EIP-1193).
pub const CODE_USER_REJECTED: i64 = 4001;
/// The requested chain has not been added to the wallet (EIP-3326).
pub const CODE_UNRECOGNIZED_CHAIN: i64 = 4902;
/// A request of the same kind is already awaiting user approval.
pub const CODE_ALREADY_PROCESSING: i64 = -32002;
/// `eth_call` / `eth_estimateGas` reverted (geth convention).
pub const CODE_EXECUTION_REVERTED: i64 = 3;

/// A raw failure reported by a wallet transport or a JSON-RPC endpoint.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("rpc error {code}: {message}")]
    Rpc {
        code: i64,
        message: String,
        data: Option<Value>,
    },

    #[error("request timed out")]
    Timeout,

    #[error("transport failure: {0}")]
    Io(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl TransportError {
    pub fn rpc(code: i64, message: impl Into<String>) -> Self {
        TransportError::Rpc {
            code,
            message: message.into(),
            data: None,
        }
    }

    /// The JSON-RPC error code, if any.
    ///
    /// Some mobile wallets wrap the real code in `data.originalError.code`;
    /// that nested code takes precedence.
    pub fn code(&self) -> Option<i64> {
        match self {
            TransportError::Rpc { code, data, .. } => data
                .as_ref()
                .and_then(|d| d.pointer("/originalError/code"))
                .and_then(Value::as_i64)
                .or(Some(*code)),
            _ => None,
        }
    }

    pub fn is_unrecognized_chain(&self) -> bool {
        self.code() == Some(CODE_UNRECOGNIZED_CHAIN)
    }

    fn message(&self) -> &str {
        match self {
            TransportError::Rpc { message, .. } => message,
            TransportError::Io(message) | TransportError::Malformed(message) => message,
            TransportError::Timeout => "",
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_decode() {
            TransportError::Malformed(err.to_string())
        } else {
            TransportError::Io(err.to_string())
        }
    }
}

/// The failure taxonomy surfaced by the board engine.
///
/// Cloneable so a single outcome can be handed to every caller that attached
/// to a deduplicated operation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BoardError {
    #[error("no wallet provider found")]
    ProviderNotFound,

    #[error("a wallet request is already pending")]
    AlreadyPending,

    #[error("request rejected by user")]
    UserRejected,

    #[error("wrong network: {0}")]
    WrongNetwork(Box<BoardError>),

    #[error("network blocked: {0}")]
    NetworkBlocked(Box<BoardError>),

    #[error("failed to add chain: {0}")]
    ChainAddFailed(String),

    #[error("insufficient funds for fee and gas")]
    InsufficientFunds,

    #[error("transaction reverted: {reason}")]
    Reverted { reason: String },

    #[error("rpc request timed out")]
    RpcTimeout,

    #[error("rpc error: {detail}")]
    RpcError { detail: String },

    #[error("wallet is not connected")]
    NotConnected,

    #[error("message text is empty")]
    EmptyMessage,

    #[error("unexpected failure: {detail}")]
    Unknown { detail: String },
}

impl From<TransportError> for BoardError {
    fn from(err: TransportError) -> Self {
        let lowered = err.message().to_lowercase();
        match err.code() {
            Some(CODE_USER_REJECTED) => return BoardError::UserRejected,
            Some(CODE_ALREADY_PROCESSING) => return BoardError::AlreadyPending,
            _ => {}
        }
        if lowered.contains("insufficient funds") {
            return BoardError::InsufficientFunds;
        }
        if err.code() == Some(CODE_EXECUTION_REVERTED) || lowered.contains("execution reverted") {
            return BoardError::Reverted {
                reason: err.message().to_string(),
            };
        }
        match err {
            TransportError::Timeout => BoardError::RpcTimeout,
            TransportError::Malformed(detail) => BoardError::Unknown { detail },
            other => BoardError::RpcError {
                detail: other.to_string(),
            },
        }
    }
}

impl From<alloy_sol_types::Error> for BoardError {
    fn from(err: alloy_sol_types::Error) -> Self {
        BoardError::Unknown {
            detail: format!("abi decode failed: {err}"),
        }
    }
}
