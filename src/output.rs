use crate::model::{ProbeOutcome, SpeedMeasurement};
use anyhow::Context;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Writes the verified endpoint table: fixed header, one row per outcome in
/// recorded order. An empty snapshot still gets the header. Any failure here
/// is fatal to the run.
pub fn write_outcomes(path: &Path, outcomes: &[ProbeOutcome]) -> anyhow::Result<()> {
    let mut writer = create(path)?;
    writeln!(writer, "ip,port,colo,loc,latency_ms")?;
    for outcome in outcomes {
        writeln!(
            writer,
            "{},{},{},{},{}",
            outcome.addr, outcome.port, outcome.colo, outcome.loc, outcome.latency_ms
        )?;
    }
    finish(writer, path)
}

/// Same table with the measured download column appended.
pub fn write_measurements(path: &Path, rows: &[SpeedMeasurement]) -> anyhow::Result<()> {
    let mut writer = create(path)?;
    writeln!(writer, "ip,port,colo,loc,latency_ms,speed_kbps")?;
    for row in rows {
        let outcome = &row.outcome;
        writeln!(
            writer,
            "{},{},{},{},{},{:.0}",
            outcome.addr,
            outcome.port,
            outcome.colo,
            outcome.loc,
            outcome.latency_ms,
            row.speed_kbps
        )?;
    }
    finish(writer, path)
}

fn create(path: &Path) -> anyhow::Result<BufWriter<std::fs::File>> {
    let file = std::fs::File::create(path)
        .with_context(|| format!("cannot create output {}", path.display()))?;
    Ok(BufWriter::new(file))
}

fn finish(mut writer: BufWriter<std::fs::File>, path: &Path) -> anyhow::Result<()> {
    writer
        .flush()
        .with_context(|| format!("cannot write output {}", path.display()))
}
