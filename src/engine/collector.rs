use crate::model::ProbeOutcome;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Append-only sink for successful outcomes. Clones share storage; concurrent
/// appends are serialized. Order is completion order and nothing more.
#[derive(Clone, Default)]
pub struct Collector {
    outcomes: Arc<Mutex<Vec<ProbeOutcome>>>,
}

impl Collector {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, outcome: ProbeOutcome) {
        self.outcomes.lock().await.push(outcome);
    }

    /// Meant to be taken after the pool has returned.
    pub async fn snapshot(&self) -> Vec<ProbeOutcome> {
        self.outcomes.lock().await.clone()
    }
}
