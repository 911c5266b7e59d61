use crate::engine::WorkQueue;
use crate::model::{Candidate, ProbeOutcome, SpeedConfig, SpeedMeasurement};
use crate::probe::{ProbeError, TraceProbe};
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, instrument};

/// Optional post-probe stage: pull the download payload through each verified
/// endpoint and annotate it with observed throughput. A failed download keeps
/// the row at 0.0 so slow-but-valid endpoints are never silently dropped.
#[instrument(skip_all, fields(endpoints = outcomes.len(), workers = cfg.workers))]
pub async fn measure(
    cfg: &SpeedConfig,
    probe: Arc<TraceProbe>,
    outcomes: Vec<ProbeOutcome>,
) -> Vec<SpeedMeasurement> {
    let cfg = Arc::new(cfg.clone());
    let queue = Arc::new(WorkQueue::new(outcomes));
    let results = Arc::new(Mutex::new(Vec::new()));

    let workers = cfg.workers.min(queue.len()).max(1);
    let mut tasks = FuturesUnordered::new();
    for _ in 0..workers {
        let cfg = cfg.clone();
        let queue = queue.clone();
        let probe = probe.clone();
        let results = results.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(outcome) = queue.claim() {
                let candidate = Candidate {
                    addr: outcome.addr,
                    port: outcome.port,
                };
                let speed_kbps = match download(&probe, &candidate, &cfg).await {
                    Ok(speed) => speed,
                    Err(err) => {
                        debug!(%candidate, error = %err, "download failed");
                        0.0
                    }
                };
                info!(%candidate, speed_kbps, "measured endpoint");
                results.lock().await.push(SpeedMeasurement {
                    outcome: outcome.clone(),
                    speed_kbps,
                });
            }
        }));
    }

    while tasks.next().await.is_some() {}
    let results = results.lock().await.clone();
    results
}

async fn download(
    probe: &TraceProbe,
    candidate: &Candidate,
    cfg: &SpeedConfig,
) -> Result<f64, ProbeError> {
    let mut tls = probe.open(candidate).await?;
    let request = probe.request_for(&cfg.payload_path);
    tls.write_all(request.as_bytes())
        .await
        .map_err(ProbeError::Io)?;

    let start = Instant::now();
    let deadline = start + cfg.window;
    let mut buf = vec![0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match timeout(remaining, tls.read(&mut buf)).await {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => total += n as u64,
            Ok(Err(err)) => return Err(ProbeError::Io(err)),
            // Window expired mid-read; keep whatever throughput we saw.
            Err(_) => break,
        }
    }

    Ok(kbps(total, start.elapsed()))
}

fn kbps(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        return 0.0;
    }
    bytes as f64 / secs / 1024.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kbps_is_bytes_over_window() {
        let speed = kbps(1024 * 500, Duration::from_secs(5));
        assert!((speed - 100.0).abs() < f64::EPSILON);
        assert_eq!(kbps(0, Duration::from_secs(5)), 0.0);
        assert_eq!(kbps(1024, Duration::ZERO), 0.0);
    }
}
