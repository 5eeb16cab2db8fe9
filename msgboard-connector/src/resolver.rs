//! Transport discovery.
//!
//! Candidates are evaluated once, in [`TransportKind`] priority order: the
//! first one that exists and answers the capability probe is selected and
//! told the app is ready.
//! Resolution happens again only when the caller asks for it (after a
//! transport was lost).

use crate::{
    error::BoardError,
    transport::{TransportKind, WalletTransport},
};
use std::sync::Arc;

/// A place a wallet transport may be found.
pub trait TransportSource: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Returns the transport if it exists right now. Must not prompt the user.
    fn locate(&self) -> Option<Arc<dyn WalletTransport>>;
}

type Locator = Box<dyn Fn() -> Option<Arc<dyn WalletTransport>> + Send + Sync>;

/// A [`TransportSource`] backed by a known transport, a known absence, or a
/// lookup closure evaluated at resolution time.
pub struct Candidate {
    kind: TransportKind,
    locate: Locator,
}

impl Candidate {
    pub fn present(transport: Arc<dyn WalletTransport>) -> Self {
        let kind = transport.kind();
        Self {
            kind,
            locate: Box::new(move || Some(transport.clone())),
        }
    }

    pub fn absent(kind: TransportKind) -> Self {
        Self {
            kind,
            locate: Box::new(|| None),
        }
    }

    pub fn lookup<F>(kind: TransportKind, locate: F) -> Self
    where
        F: Fn() -> Option<Arc<dyn WalletTransport>> + Send + Sync + 'static,
    {
        Self {
            kind,
            locate: Box::new(locate),
        }
    }
}

impl TransportSource for Candidate {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    fn locate(&self) -> Option<Arc<dyn WalletTransport>> {
        (self.locate)()
    }
}

pub struct ProviderResolver {
    sources: Vec<Arc<dyn TransportSource>>,
}

impl ProviderResolver {
    /// Sources are ordered by kind; sources of the same kind keep their order.
    pub fn new(mut sources: Vec<Arc<dyn TransportSource>>) -> Self {
        sources.sort_by_key(|s| s.kind());
        Self { sources }
    }

    pub async fn resolve(&self) -> Result<Arc<dyn WalletTransport>, BoardError> {
        for source in &self.sources {
            let Some(transport) = source.locate() else {
                tracing::debug!(kind = ?source.kind(), "no transport present");
                continue;
            };
            match transport.probe().await {
                Ok(()) => {
                    tracing::info!(kind = ?source.kind(), transport = %transport.id(), "wallet transport selected");
                    if let Err(err) = transport.ready().await {
                        tracing::warn!(transport = %transport.id(), error = %err, "host readiness signal failed");
                    }
                    return Ok(transport);
                }
                Err(err) => {
                    tracing::warn!(kind = ?source.kind(), transport = %transport.id(), error = %err, "transport failed capability probe");
                }
            }
        }
        tracing::warn!("no usable wallet transport found");
        Err(BoardError::ProviderNotFound)
    }
}
