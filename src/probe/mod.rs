mod trace;

pub use trace::TraceProbe;

use crate::model::{Candidate, ProbeOutcome};
use async_trait::async_trait;

/// Why a probe produced no outcome. The pool treats every variant the same
/// way; the split exists so failures stay observable in logs and tests.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("connect failed: {0}")]
    Connect(#[source] std::io::Error),
    #[error("tls configuration failed: {0}")]
    Tls(#[from] openssl::error::ErrorStack),
    #[error("tls handshake failed: {0}")]
    Handshake(#[source] openssl::ssl::Error),
    #[error("request failed: {0}")]
    Io(#[source] std::io::Error),
    #[error("probe timed out")]
    Timeout,
    #[error("trace body missing ordered colo/loc fields")]
    MissingFields,
}

#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, candidate: &Candidate) -> Result<ProbeOutcome, ProbeError>;
}
