use clap::Parser;
use std::sync::Arc;
use trace_prober::cli::{Cli, Command};
use trace_prober::engine::Engine;
use trace_prober::model::Config;
use trace_prober::probe::TraceProbe;
use trace_prober::{input, output, regroup, speed};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_level(true)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Scan(args) => scan(args.into_config()?).await,
        Command::Regroup(args) => regroup::run(&args.into_config()?),
    }
}

async fn scan(cfg: Config) -> anyhow::Result<()> {
    let candidates = input::load_candidates(&cfg.input).await?;
    info!(
        candidates = candidates.len(),
        concurrency = cfg.concurrency,
        "starting scan"
    );

    let probe = Arc::new(TraceProbe::new(&cfg)?);
    let engine = Engine::new(cfg.clone(), probe.clone());
    let outcomes = engine.run(candidates).await.snapshot().await;
    info!(verified = outcomes.len(), "scan finished");

    if cfg.speed.enabled() {
        let measurements = speed::measure(&cfg.speed, probe, outcomes).await;
        output::write_measurements(&cfg.outfile, &measurements)?;
    } else {
        output::write_outcomes(&cfg.outfile, &outcomes)?;
    }
    info!(outfile = %cfg.outfile.display(), "wrote results");
    Ok(())
}
