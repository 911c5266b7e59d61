use anyhow::{bail, Context};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone)]
pub struct RegroupConfig {
    pub file: PathBuf,
    pub locations: PathBuf,
    pub outfile: PathBuf,
    /// Entries kept per country; countries that do not reach the cap are
    /// dropped entirely. 0 keeps everything.
    pub per_country: usize,
    /// Rows at or below this download speed are dropped. None disables.
    pub min_speed: Option<f64>,
}

/// One row of the location metadata table. Extra fields in the file are
/// ignored; absent fields fall back to empty and surface as "Unknown".
#[derive(Debug, Clone, Deserialize)]
pub struct Location {
    #[serde(default)]
    pub cca2: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub emoji: String,
}

struct Entry {
    text: String,
    country: String,
}

/// Reshapes a written endpoint table into per-country listings:
/// parse → filter by speed → annotate via the location table → group and cap
/// per country → emit sorted `addr:port#<label><seq>` lines.
pub fn run(cfg: &RegroupConfig) -> anyhow::Result<()> {
    let locations = load_locations(&cfg.locations)?;
    let table = std::fs::read_to_string(&cfg.file)
        .with_context(|| format!("cannot open results table {}", cfg.file.display()))?;

    let entries = annotate(&table, cfg.min_speed, &locations)?;
    let grouped = group_by_country(entries, cfg.per_country);
    if grouped.is_empty() {
        info!("no country satisfied the per-country requirement; nothing written");
        return Ok(());
    }

    std::fs::write(&cfg.outfile, render(&grouped))
        .with_context(|| format!("cannot write listing {}", cfg.outfile.display()))?;
    info!(
        countries = grouped.len(),
        outfile = %cfg.outfile.display(),
        "wrote regrouped listing"
    );
    Ok(())
}

fn load_locations(path: &Path) -> anyhow::Result<Vec<Location>> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("cannot open locations table {}", path.display()))?;
    serde_json::from_str(&data)
        .with_context(|| format!("malformed locations table {}", path.display()))
}

fn annotate(
    table: &str,
    min_speed: Option<f64>,
    locations: &[Location],
) -> anyhow::Result<Vec<Entry>> {
    let mut lines = table.lines().map(str::trim).filter(|line| !line.is_empty());
    let header = lines.next().context("results table is empty")?;

    let columns: Vec<&str> = header.split(',').collect();
    let column = |name: &str| columns.iter().position(|c| *c == name);
    let Some(ip_idx) = column("ip") else {
        bail!("results table is missing the ip column");
    };
    let Some(port_idx) = column("port") else {
        bail!("results table is missing the port column");
    };
    let Some(loc_idx) = column("loc") else {
        bail!("results table is missing the loc column");
    };
    let speed_idx = column("speed_kbps");

    let required = ip_idx.max(port_idx).max(loc_idx).max(speed_idx.unwrap_or(0));
    let mut entries = Vec::new();
    for line in lines {
        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() <= required {
            continue;
        }

        if let (Some(min), Some(idx)) = (min_speed, speed_idx) {
            if let Ok(speed) = fields[idx].trim().trim_end_matches(" kB/s").parse::<f64>() {
                if speed <= min {
                    continue;
                }
            }
        }

        let addr = bracket_ipv6(fields[ip_idx]);
        let country = country_label(fields[loc_idx], locations);
        entries.push(Entry {
            text: format!("{addr}:{}#{country}", fields[port_idx]),
            country,
        });
    }

    if entries.is_empty() {
        bail!("results table has no usable rows");
    }
    Ok(entries)
}

fn bracket_ipv6(addr: &str) -> String {
    if addr.contains(':') && !addr.starts_with('[') {
        format!("[{addr}]")
    } else {
        addr.to_string()
    }
}

fn country_label(loc: &str, locations: &[Location]) -> String {
    locations
        .iter()
        .find(|location| location.cca2 == loc)
        .map(|location| format!("{}{}", location.emoji, location.country))
        .unwrap_or_else(|| "Unknown".to_string())
}

fn group_by_country(entries: Vec<Entry>, cap: usize) -> BTreeMap<String, Vec<String>> {
    let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for entry in entries {
        let bucket = grouped.entry(entry.country).or_default();
        if cap == 0 || bucket.len() < cap {
            bucket.push(entry.text);
        }
    }
    if cap > 0 {
        grouped.retain(|_, bucket| bucket.len() >= cap);
    }
    grouped
}

fn render(grouped: &BTreeMap<String, Vec<String>>) -> String {
    grouped
        .values()
        .flat_map(|bucket| {
            bucket
                .iter()
                .enumerate()
                .map(|(seq, text)| format!("{text}{}", seq + 1))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const LOCATIONS: &str = r#"[
        {"iata": "LAX", "cca2": "US", "region": "North America", "country": "United States", "emoji": "🇺🇸"},
        {"iata": "FRA", "cca2": "DE", "region": "Europe", "country": "Germany", "emoji": "🇩🇪"}
    ]"#;

    fn write_file(dir: &tempfile::TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        write!(file, "{content}").unwrap();
        path
    }

    fn cfg(dir: &tempfile::TempDir, table: &str) -> RegroupConfig {
        RegroupConfig {
            file: write_file(dir, "ip.csv", table),
            locations: write_file(dir, "locations.json", LOCATIONS),
            outfile: dir.path().join("ip.txt"),
            per_country: 0,
            min_speed: None,
        }
    }

    #[test]
    fn groups_sorts_and_numbers_by_country() {
        let dir = tempfile::tempdir().unwrap();
        let table = "ip,port,colo,loc,latency_ms\n\
                     10.0.0.1,443,LAX,US,142\n\
                     10.0.0.2,2053,FRA,DE,80\n\
                     10.0.0.3,443,SJC,US,99\n";
        let cfg = cfg(&dir, table);
        run(&cfg).unwrap();

        let listing = std::fs::read_to_string(&cfg.outfile).unwrap();
        assert_eq!(
            listing,
            "10.0.0.2:2053#🇩🇪Germany1\n\
             10.0.0.1:443#🇺🇸United States1\n\
             10.0.0.3:443#🇺🇸United States2"
        );
    }

    #[test]
    fn caps_per_country_and_drops_undersized_countries() {
        let dir = tempfile::tempdir().unwrap();
        let table = "ip,port,colo,loc,latency_ms\n\
                     10.0.0.1,443,LAX,US,142\n\
                     10.0.0.2,443,SJC,US,80\n\
                     10.0.0.3,443,LAX,US,90\n\
                     10.0.0.4,2053,FRA,DE,70\n";
        let mut cfg = cfg(&dir, table);
        cfg.per_country = 2;
        run(&cfg).unwrap();

        let listing = std::fs::read_to_string(&cfg.outfile).unwrap();
        // Germany has one entry, below the cap of two, so it disappears.
        assert_eq!(
            listing,
            "10.0.0.1:443#🇺🇸United States1\n10.0.0.2:443#🇺🇸United States2"
        );
    }

    #[test]
    fn filters_rows_at_or_below_min_speed() {
        let dir = tempfile::tempdir().unwrap();
        let table = "ip,port,colo,loc,latency_ms,speed_kbps\n\
                     10.0.0.1,443,LAX,US,142,5000\n\
                     10.0.0.2,443,SJC,US,80,100\n\
                     10.0.0.3,443,SJC,US,80,0\n";
        let mut cfg = cfg(&dir, table);
        cfg.min_speed = Some(100.0);
        run(&cfg).unwrap();

        let listing = std::fs::read_to_string(&cfg.outfile).unwrap();
        assert_eq!(listing, "10.0.0.1:443#🇺🇸United States1");
    }

    #[test]
    fn brackets_ipv6_and_labels_unmapped_locations() {
        let dir = tempfile::tempdir().unwrap();
        let table = "ip,port,colo,loc,latency_ms\n\
                     2606:4700::1,2053,XYZ,ZZ,50\n";
        let cfg = cfg(&dir, table);
        run(&cfg).unwrap();

        let listing = std::fs::read_to_string(&cfg.outfile).unwrap();
        assert_eq!(listing, "[2606:4700::1]:2053#Unknown1");
    }

    #[test]
    fn missing_required_column_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let table = "ip,port,colo,latency_ms\n10.0.0.1,443,LAX,142\n";
        let cfg = cfg(&dir, table);
        let err = run(&cfg).unwrap_err();
        assert!(err.to_string().contains("loc column"));
    }

    #[test]
    fn header_only_table_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = cfg(&dir, "ip,port,colo,loc,latency_ms\n");
        assert!(run(&cfg).unwrap_err().to_string().contains("no usable rows"));
    }

    #[test]
    fn missing_or_malformed_locations_are_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let table = "ip,port,colo,loc,latency_ms\n10.0.0.1,443,LAX,US,142\n";
        let mut cfg = cfg(&dir, table);

        cfg.locations = dir.path().join("absent.json");
        assert!(run(&cfg)
            .unwrap_err()
            .to_string()
            .contains("cannot open locations"));

        cfg.locations = write_file(&dir, "broken.json", "{not json");
        assert!(run(&cfg)
            .unwrap_err()
            .to_string()
            .contains("malformed locations"));
    }

    #[test]
    fn under_cap_everywhere_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let table = "ip,port,colo,loc,latency_ms\n10.0.0.1,443,LAX,US,142\n";
        let mut cfg = cfg(&dir, table);
        cfg.per_country = 3;
        run(&cfg).unwrap();
        assert!(!cfg.outfile.exists());
    }
}
