pub mod collector;

use crate::model::{Candidate, Config};
use crate::probe::Prober;
use collector::Collector;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Claim-and-advance cursor over an immutable slice of work. Claiming is a
/// single atomic step, so each item is handed to exactly one caller no matter
/// how many workers pull concurrently.
pub struct WorkQueue<T> {
    items: Vec<T>,
    cursor: AtomicUsize,
}

impl<T> WorkQueue<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self {
            items,
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn claim(&self) -> Option<&T> {
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed);
        self.items.get(idx)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// The probing pool: a fixed set of symmetric workers draining one shared
/// queue through a prober, recording successes as they complete.
pub struct Engine<P> {
    cfg: Arc<Config>,
    prober: Arc<P>,
}

impl<P: Prober + 'static> Engine<P> {
    pub fn new(cfg: Config, prober: Arc<P>) -> Self {
        Self {
            cfg: Arc::new(cfg),
            prober,
        }
    }

    /// Runs every candidate through the prober, at most `concurrency` in
    /// flight at any instant. Returns only after every worker has observed
    /// queue exhaustion; no probe is left in flight at return time.
    #[instrument(skip_all, fields(candidates = candidates.len()))]
    pub async fn run(&self, candidates: Vec<Candidate>) -> Collector {
        let queue = Arc::new(WorkQueue::new(candidates));
        let collector = Collector::new();

        let workers = self.cfg.concurrency.min(queue.len()).max(1);
        let mut tasks = FuturesUnordered::new();
        for _ in 0..workers {
            let queue = queue.clone();
            let collector = collector.clone();
            let prober = self.prober.clone();
            let cfg = self.cfg.clone();
            tasks.push(tokio::spawn(async move {
                while let Some(candidate) = queue.claim() {
                    match prober.probe(candidate).await {
                        Ok(outcome) => {
                            if let Some(cap) = cfg.max_latency {
                                if u128::from(outcome.latency_ms) > cap.as_millis() {
                                    debug!(
                                        %candidate,
                                        latency_ms = outcome.latency_ms,
                                        "discarding endpoint above latency ceiling"
                                    );
                                    continue;
                                }
                            }
                            info!(
                                %candidate,
                                colo = %outcome.colo,
                                loc = %outcome.loc,
                                latency_ms = outcome.latency_ms,
                                "verified endpoint"
                            );
                            collector.record(outcome).await;
                        }
                        Err(err) => debug!(%candidate, error = %err, "probe failed"),
                    }
                }
            }));
        }

        while tasks.next().await.is_some() {}
        collector
    }
}
