use crate::model::Candidate;
use anyhow::Context;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Loads the candidate list. Lines that do not hold exactly two parseable
/// tokens (numeric address, port) are skipped; they never reach the pool.
/// A missing file aborts the run; a file with no usable lines yields an
/// empty list and the run completes with a header-only table.
pub async fn load_candidates(path: &Path) -> anyhow::Result<Vec<Candidate>> {
    let file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("cannot open input {}", path.display()))?;
    let mut lines = BufReader::new(file).lines();

    let mut candidates = Vec::new();
    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match parse_candidate(trimmed) {
            Some(candidate) => candidates.push(candidate),
            None => tracing::warn!(line = %trimmed, "skipping invalid candidate"),
        }
    }

    if candidates.is_empty() {
        tracing::warn!(input = %path.display(), "no candidates found");
    }

    Ok(candidates)
}

fn parse_candidate(line: &str) -> Option<Candidate> {
    let mut tokens = line.split_whitespace();
    let addr = tokens.next()?;
    let port = tokens.next()?;
    if tokens.next().is_some() {
        return None;
    }

    let addr = addr
        .trim_start_matches('[')
        .trim_end_matches(']')
        .parse()
        .ok()?;
    let port = port.parse().ok()?;
    Some(Candidate { addr, port })
}
