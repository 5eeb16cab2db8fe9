//! A wallet connectivity and transaction lifecycle engine for an append-only
//! on-chain message board.
//!
//! The crate discovers a usable wallet transport, connects to it without ever
//! issuing duplicate authorization prompts, keeps the wallet on the target
//! chain, submits fee-bearing posts and follows them through an uncertain
//! confirmation path, and merges optimistic local posts with canonical
//! on-chain reads into one duplicate-free view.
//!
//! # Key Components
//!
//! *   [`engine::BoardEngine`]: The entry point. Owns every component below and
//!     tears them down when dropped.
//! *   [`resolver`]: Ordered discovery of wallet transports.
//! *   [`network`]: Chain verification, switching and addition.
//! *   [`connection`]: Authorization, session ownership and state events.
//! *   [`submitter`]: Posting and confirmation tracking.
//! *   [`reader`] / [`ledger`]: Canonical reads and the merged view.
pub mod abi;
/// Defines configuration structures for the engine.
pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod network;
pub mod reader;
pub mod resolver;
/// JSON-RPC over HTTP: the public read path and bridged wallets.
pub mod rpc;
mod singleflight;
pub mod submitter;
pub mod transport;
/// The background worker that keeps the view in sync with the chain.
pub mod workers;

pub use engine::BoardEngine;
pub use error::{BoardError, TransportError};
