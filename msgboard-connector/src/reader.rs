//! Read-only access to the canonical ledger over the public endpoint.
//!
//! Reads never touch the wallet, so the board renders before (and without)
//! any connection.

use crate::{
    abi,
    config::{LedgerConfig, ReadMode},
    error::BoardError,
    ledger::CanonicalRecord,
    rpc::LedgerRpc,
};
use alloy_primitives::Address;
use futures::future::try_join_all;
use std::sync::{
    atomic::{AtomicU8, Ordering},
    Arc,
};

const SHAPE_UNKNOWN: u8 = 0;
const SHAPE_BULK: u8 = 1;
const SHAPE_INDEXED: u8 = 2;

pub struct LedgerReader<R: LedgerRpc + ?Sized> {
    rpc: Arc<R>,
    contract: Address,
    mode: ReadMode,
    batch_size: usize,
    /// Upper bound on the count reported by the contract.
    max_records: u64,
    /// The shape `auto` mode settled on.
    detected: AtomicU8,
}

impl<R: LedgerRpc + ?Sized> LedgerReader<R> {
    pub fn new(rpc: Arc<R>, config: &LedgerConfig) -> Self {
        Self {
            rpc,
            contract: config.contract_address,
            mode: config.read_mode,
            batch_size: config.batch_size.max(1),
            max_records: config.max_records,
            detected: AtomicU8::new(SHAPE_UNKNOWN),
        }
    }

    /// Reads every record, newest first.
    pub async fn fetch_all(&self) -> Result<Vec<CanonicalRecord>, BoardError> {
        let mut records = match self.mode {
            ReadMode::Bulk => self.read_bulk().await?,
            ReadMode::Indexed => self.read_indexed().await?,
            ReadMode::Auto => self.read_auto().await?,
        };
        records.reverse();
        tracing::debug!(count = records.len(), "ledger read complete");
        Ok(records)
    }

    /// The number of records on chain.
    pub async fn count(&self) -> Result<u64, BoardError> {
        let raw = self.rpc.call(self.contract, abi::encode_count()).await?;
        Ok(abi::decode_count(&raw)?)
    }

    async fn read_auto(&self) -> Result<Vec<CanonicalRecord>, BoardError> {
        match self.detected.load(Ordering::Relaxed) {
            SHAPE_BULK => return self.read_bulk().await,
            SHAPE_INDEXED => return self.read_indexed().await,
            _ => {}
        }

        match self.read_bulk().await {
            Ok(records) => {
                self.detected.store(SHAPE_BULK, Ordering::Relaxed);
                Ok(records)
            }
            // A missing selector reverts or comes back undecodable. Anything
            // else says nothing about the contract shape.
            Err(err @ (BoardError::Reverted { .. } | BoardError::Unknown { .. })) => {
                tracing::info!(error = %err, "bulk read unavailable, switching to indexed reads");
                let records = self.read_indexed().await?;
                self.detected.store(SHAPE_INDEXED, Ordering::Relaxed);
                Ok(records)
            }
            Err(err) => Err(err),
        }
    }

    async fn read_bulk(&self) -> Result<Vec<CanonicalRecord>, BoardError> {
        let raw = self.rpc.call(self.contract, abi::encode_read_all()).await?;
        Ok(abi::decode_read_all(&raw)?)
    }

    /// Count, then every index. Batches run concurrently but results keep
    /// index order.
    async fn read_indexed(&self) -> Result<Vec<CanonicalRecord>, BoardError> {
        let count = self.count().await?;
        if count > self.max_records {
            tracing::warn!(count, max = self.max_records, "refusing implausible message count");
            return Err(BoardError::RpcError {
                detail: format!("message count {count} exceeds the limit of {}", self.max_records),
            });
        }
        let mut records = Vec::new();

        for start in (0..count).step_by(self.batch_size) {
            let end = count.min(start + self.batch_size as u64);
            let reads = (start..end).map(|index| async move {
                let raw = self
                    .rpc
                    .call(self.contract, abi::encode_record_at(index))
                    .await?;
                Ok::<_, BoardError>(abi::decode_record_at(&raw)?)
            });
            records.extend(try_join_all(reads).await?);
        }
        Ok(records)
    }
}
