//! # Message Ledger
//!
//! The single authoritative view the UI renders. It holds the canonical
//! records last read from chain plus the optimistic entries of posts still in
//! flight, and merges them so that every logical message appears exactly once.
//!
//! Optimistic entries are removed here and only here: when a canonical record
//! supersedes them, when their transaction reverts, or when they go unmatched
//! for too many reconcile cycles after confirming or timing out.

use alloy_primitives::{Address, B256};
use chrono::{DateTime, TimeDelta, Utc};
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::sync::broadcast;

/// A ledger entry as read from chain. Immutable once read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalRecord {
    pub author: Address,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

/// Where a confirmed transaction landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRef {
    pub number: u64,
    pub hash: Option<B256>,
}

/// The lifecycle of a post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxState {
    Pending,
    Submitted { hash: B256 },
    /// The fallback timer fired before a receipt arrived. Not a failure: the
    /// transaction may still land and is reconciled from chain.
    TimedOut,
    Confirmed { block: BlockRef },
    Reverted { reason: String },
}

impl TxState {
    fn rank(&self) -> u8 {
        match self {
            TxState::Pending => 0,
            TxState::Submitted { .. } => 1,
            TxState::TimedOut => 2,
            TxState::Confirmed { .. } | TxState::Reverted { .. } => 3,
        }
    }

    pub fn is_final(&self) -> bool {
        self.rank() == 3
    }

    /// Whether the record has left the receipt wait, successfully or not.
    fn awaits_canonical(&self) -> bool {
        matches!(self, TxState::Confirmed { .. } | TxState::TimedOut)
    }
}

/// A post submitted by this process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRecord {
    pub local_id: u64,
    pub text: String,
    pub submitted_at: DateTime<Utc>,
    pub state: TxState,
}

impl TransactionRecord {
    pub fn new(local_id: u64, text: impl Into<String>, submitted_at: DateTime<Utc>) -> Self {
        Self {
            local_id,
            text: text.into(),
            submitted_at,
            state: TxState::Pending,
        }
    }

    /// Moves to `next` if that is strictly later in the lifecycle.
    /// Returns `false` (and leaves the record untouched) on any regression.
    pub fn advance(&mut self, next: TxState) -> bool {
        if next.rank() <= self.state.rank() {
            return false;
        }
        self.state = next;
        true
    }

    pub fn hash(&self) -> Option<B256> {
        match self.state {
            TxState::Submitted { hash } => Some(hash),
            _ => None,
        }
    }
}

/// One row of the rendered ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEntry {
    /// A local post not yet superseded by a canonical record.
    Optimistic {
        author: Address,
        record: TransactionRecord,
    },
    Canonical(CanonicalRecord),
}

impl LedgerEntry {
    pub fn text(&self) -> &str {
        match self {
            LedgerEntry::Optimistic { record, .. } => &record.text,
            LedgerEntry::Canonical(record) => &record.text,
        }
    }

    pub fn author(&self) -> Address {
        match self {
            LedgerEntry::Optimistic { author, .. } => *author,
            LedgerEntry::Canonical(record) => record.author,
        }
    }

    pub fn is_optimistic(&self) -> bool {
        matches!(self, LedgerEntry::Optimistic { .. })
    }
}

/// Optimistic entries in submission order, then canonical records newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerView {
    pub entries: Vec<LedgerEntry>,
}

impl LedgerView {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LedgerEntry> {
        self.entries.iter()
    }

    pub fn pending(&self) -> impl Iterator<Item = &TransactionRecord> {
        self.entries.iter().filter_map(|e| match e {
            LedgerEntry::Optimistic { record, .. } => Some(record),
            LedgerEntry::Canonical(_) => None,
        })
    }
}

/// Why an optimistic entry left the view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalCause {
    /// A matching canonical record was read.
    Superseded,
    Reverted,
    /// Never matched within the reconcile-cycle bound.
    Expired,
    /// A manual refresh gave up on a timed-out post.
    ManualRefresh,
}

/// What triggered a reconcile cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileTrigger {
    Automatic,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEvent {
    RecordUpdated(TransactionRecord),
    RecordRemoved { local_id: u64, cause: RemovalCause },
    ViewChanged,
}

#[derive(Debug)]
struct OptimisticEntry {
    author: Address,
    record: TransactionRecord,
    missed_cycles: u32,
}

#[derive(Debug)]
struct LedgerState {
    canonical: Vec<CanonicalRecord>,
    optimistic: Vec<OptimisticEntry>,
}

/// A cheap, clonable handle to the shared ledger state.
#[derive(Debug, Clone)]
pub struct MessageLedger {
    state: Arc<Mutex<LedgerState>>,
    events: broadcast::Sender<LedgerEvent>,
    max_reconcile_cycles: u32,
    clock_skew: TimeDelta,
}

impl MessageLedger {
    pub fn new(max_reconcile_cycles: u32, event_buffer: usize) -> Self {
        let (events, _) = broadcast::channel(event_buffer.max(1));
        Self {
            state: Arc::new(Mutex::new(LedgerState {
                canonical: Vec::new(),
                optimistic: Vec::new(),
            })),
            events,
            max_reconcile_cycles,
            clock_skew: TimeDelta::zero(),
        }
    }

    /// Lets a canonical record match when its block timestamp precedes the
    /// local submission time by at most `skew`.
    pub fn with_clock_skew(mut self, skew: Duration) -> Self {
        self.clock_skew = TimeDelta::from_std(skew).unwrap_or(TimeDelta::zero());
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.events.subscribe()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: LedgerEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// The merged view.
    pub fn view(&self) -> LedgerView {
        let state = self.lock();
        let entries = state
            .optimistic
            .iter()
            .map(|entry| LedgerEntry::Optimistic {
                author: entry.author,
                record: entry.record.clone(),
            })
            .chain(state.canonical.iter().cloned().map(LedgerEntry::Canonical))
            .collect();
        LedgerView { entries }
    }

    /// Snapshot of one optimistic record, if it is still tracked.
    pub fn record(&self, local_id: u64) -> Option<TransactionRecord> {
        self.lock()
            .optimistic
            .iter()
            .find(|e| e.record.local_id == local_id)
            .map(|e| e.record.clone())
    }

    /// Adds a freshly submitted post to the view.
    pub fn register_optimistic(&self, author: Address, record: TransactionRecord) {
        tracing::debug!(local_id = record.local_id, %author, "registering optimistic entry");
        self.lock().optimistic.push(OptimisticEntry {
            author,
            record: record.clone(),
            missed_cycles: 0,
        });
        self.emit(LedgerEvent::RecordUpdated(record));
        self.emit(LedgerEvent::ViewChanged);
    }

    /// Applies a state transition to an optimistic record.
    ///
    /// Regressions are ignored. A revert removes the entry at once, so a
    /// failed post is never shown. Returns the record after the transition.
    pub fn transition(&self, local_id: u64, next: TxState) -> Option<TransactionRecord> {
        let mut state = self.lock();
        let pos = state
            .optimistic
            .iter()
            .position(|e| e.record.local_id == local_id)?;

        let entry = &mut state.optimistic[pos];
        if !entry.record.advance(next) {
            tracing::debug!(local_id, state = ?entry.record.state, "ignoring non-monotonic transition");
            return Some(entry.record.clone());
        }
        let record = entry.record.clone();
        let reverted = matches!(record.state, TxState::Reverted { .. });
        if reverted {
            state.optimistic.remove(pos);
        }
        drop(state);

        self.emit(LedgerEvent::RecordUpdated(record.clone()));
        if reverted {
            self.emit(LedgerEvent::RecordRemoved {
                local_id,
                cause: RemovalCause::Reverted,
            });
        }
        self.emit(LedgerEvent::ViewChanged);
        Some(record)
    }

    /// Replaces the canonical set with a fresh read (newest first) and retires
    /// the optimistic entries it supersedes.
    ///
    /// Entries are matched in submission order against records with the same
    /// author and text and a timestamp at or after submission, less the
    /// configured clock skew; each canonical
    /// record can satisfy one entry only, oldest first. Two identical posts are
    /// therefore retired by two distinct records, but which record belongs to
    /// which post cannot be told apart.
    pub fn reconcile(&self, canonical: Vec<CanonicalRecord>, trigger: ReconcileTrigger) {
        let mut removed = Vec::new();
        {
            let mut state = self.lock();
            let mut claimed = vec![false; canonical.len()];
            let max_cycles = self.max_reconcile_cycles;
            let skew = self.clock_skew;

            state.optimistic.retain_mut(|entry| {
                // Oldest eligible record first: the list is newest first.
                let matched = canonical.iter().enumerate().rev().find(|(i, c)| {
                    !claimed[*i]
                        && c.author == entry.author
                        && c.text == entry.record.text
                        && c.timestamp.timestamp() >= (entry.record.submitted_at - skew).timestamp()
                });
                if let Some((i, _)) = matched {
                    claimed[i] = true;
                    removed.push((entry.record.local_id, RemovalCause::Superseded));
                    return false;
                }

                if trigger == ReconcileTrigger::Manual && entry.record.state == TxState::TimedOut {
                    removed.push((entry.record.local_id, RemovalCause::ManualRefresh));
                    return false;
                }

                if entry.record.state.awaits_canonical() {
                    entry.missed_cycles += 1;
                    if entry.missed_cycles > max_cycles {
                        tracing::debug!(
                            local_id = entry.record.local_id,
                            cycles = entry.missed_cycles,
                            "dropping optimistic entry never seen on chain"
                        );
                        removed.push((entry.record.local_id, RemovalCause::Expired));
                        return false;
                    }
                }
                true
            });

            state.canonical = canonical;
        }

        for (local_id, cause) in removed {
            self.emit(LedgerEvent::RecordRemoved { local_id, cause });
        }
        self.emit(LedgerEvent::ViewChanged);
    }
}
