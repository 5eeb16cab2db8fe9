//! The ledger contract surface.
//!
//! Deployments expose either the bulk `getMessages()` view or the
//! `getMessagesCount()` + `messages(i)` pair; both are declared here.

use crate::ledger::CanonicalRecord;
use alloy_primitives::{Bytes, U256};
use alloy_sol_types::{sol, SolCall};
use chrono::{DateTime, Utc};

sol! {
    struct Message {
        address user;
        string text;
        uint256 timestamp;
    }

    function postMessage(string text) external payable;
    function getMessagesCount() external view returns (uint256);
    function messages(uint256 index) external view returns (address user, string text, uint256 timestamp);
    function getMessages() external view returns (Message[] memory);
}

pub fn encode_post(text: &str) -> Bytes {
    postMessageCall {
        text: text.to_string(),
    }
    .abi_encode()
    .into()
}

pub fn encode_count() -> Bytes {
    getMessagesCountCall {}.abi_encode().into()
}

pub fn encode_record_at(index: u64) -> Bytes {
    messagesCall {
        index: U256::from(index),
    }
    .abi_encode()
    .into()
}

pub fn encode_read_all() -> Bytes {
    getMessagesCall {}.abi_encode().into()
}

pub fn decode_count(data: &[u8]) -> Result<u64, alloy_sol_types::Error> {
    let count = getMessagesCountCall::abi_decode_returns(data, true)?._0;
    u64::try_from(count).map_err(|_| alloy_sol_types::Error::Other("message count overflows u64".into()))
}

pub fn decode_record_at(data: &[u8]) -> Result<CanonicalRecord, alloy_sol_types::Error> {
    let ret = messagesCall::abi_decode_returns(data, true)?;
    Ok(CanonicalRecord {
        author: ret.user,
        text: ret.text,
        timestamp: block_time(ret.timestamp),
    })
}

pub fn decode_read_all(data: &[u8]) -> Result<Vec<CanonicalRecord>, alloy_sol_types::Error> {
    let ret = getMessagesCall::abi_decode_returns(data, true)?;
    Ok(ret
        ._0
        .into_iter()
        .map(|m| CanonicalRecord {
            author: m.user,
            text: m.text,
            timestamp: block_time(m.timestamp),
        })
        .collect())
}

fn block_time(seconds: U256) -> DateTime<Utc> {
    let secs = i64::try_from(seconds).unwrap_or(i64::MAX);
    DateTime::from_timestamp(secs, 0).unwrap_or(DateTime::<Utc>::MAX_UTC)
}
