use crate::model::{Config, SpeedConfig};
use crate::regroup::RegroupConfig;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(author, version, about = "Vets candidate endpoints against a fixed trace path", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Probe candidates and write the verified endpoint table
    Scan(ScanArgs),
    /// Regroup an existing endpoint table into per-country listings
    Regroup(RegroupArgs),
}

#[derive(Debug, Args)]
pub struct ScanArgs {
    /// File containing candidates, one "address port" pair per line
    #[arg(short = 'i', long = "input", value_name = "FILE", default_value = "ip.txt")]
    pub input: PathBuf,

    /// Output table path
    #[arg(short = 'o', long = "outfile", value_name = "FILE", default_value = "ip.csv")]
    pub outfile: PathBuf,

    /// Concurrency limit
    #[arg(long = "concurrency", default_value_t = 50)]
    pub concurrency: usize,

    /// Per-probe timeout in milliseconds
    #[arg(long = "timeout", default_value_t = 2000)]
    pub timeout_ms: u64,

    /// Hostname presented via SNI and the Host header on every probe
    #[arg(long = "server-name", default_value = "speed.cloudflare.com")]
    pub server_name: String,

    /// Path requested on every candidate
    #[arg(long = "trace-path", default_value = "/cdn-cgi/trace")]
    pub trace_path: String,

    /// User-Agent header value
    #[arg(long = "user-agent", default_value = "Mozilla/5.0")]
    pub user_agent: String,

    /// Latency ceiling in milliseconds; slower successes are discarded (0 disables)
    #[arg(long = "max-latency", default_value_t = 0)]
    pub max_latency_ms: u64,

    /// Download measurement workers (0 disables the speed stage)
    #[arg(long = "speed-workers", default_value_t = 5)]
    pub speed_workers: usize,

    /// Payload path requested by the speed stage
    #[arg(long = "speed-path", default_value = "/__down?bytes=50000000")]
    pub speed_path: String,

    /// Read window per download in milliseconds
    #[arg(long = "speed-window", default_value_t = 5000)]
    pub speed_window_ms: u64,

    /// Cap on bytes read from a trace response
    #[arg(long = "max-response-bytes", default_value_t = 16384)]
    pub max_response_bytes: usize,
}

#[derive(Debug, Args)]
pub struct RegroupArgs {
    /// Endpoint table produced by scan
    #[arg(short = 'f', long = "file", value_name = "FILE", default_value = "ip.csv")]
    pub file: PathBuf,

    /// Location metadata table
    #[arg(long = "locations", value_name = "FILE", default_value = "locations.json")]
    pub locations: PathBuf,

    /// Output listing path (defaults to the table path with a .txt extension)
    #[arg(short = 'o', long = "outfile", value_name = "FILE")]
    pub outfile: Option<PathBuf>,

    /// Entries kept per country; countries with fewer are dropped (0 keeps all)
    #[arg(long = "per-country", default_value_t = 0)]
    pub per_country: usize,

    /// Minimum download speed in kB/s; rows at or below it are dropped (0 disables)
    #[arg(long = "min-speed", default_value_t = 0.0)]
    pub min_speed: f64,
}

impl ScanArgs {
    pub fn into_config(self) -> anyhow::Result<Config> {
        if self.concurrency == 0 {
            anyhow::bail!("concurrency must be greater than zero");
        }

        if self.timeout_ms == 0 {
            anyhow::bail!("timeout must be greater than zero");
        }

        if self.server_name.is_empty() {
            anyhow::bail!("server name must not be empty");
        }

        if !self.trace_path.starts_with('/') {
            anyhow::bail!("trace path must start with '/'");
        }

        Ok(Config {
            input: self.input,
            outfile: self.outfile,
            concurrency: self.concurrency,
            probe_timeout: Duration::from_millis(self.timeout_ms),
            server_name: self.server_name,
            trace_path: self.trace_path,
            user_agent: self.user_agent,
            max_response_bytes: self.max_response_bytes.max(1),
            max_latency: match self.max_latency_ms {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
            speed: SpeedConfig {
                workers: self.speed_workers,
                payload_path: self.speed_path,
                window: Duration::from_millis(self.speed_window_ms.max(1)),
            },
        })
    }
}

impl RegroupArgs {
    pub fn into_config(self) -> anyhow::Result<RegroupConfig> {
        let outfile = self
            .outfile
            .unwrap_or_else(|| self.file.with_extension("txt"));

        Ok(RegroupConfig {
            file: self.file,
            locations: self.locations,
            outfile,
            per_country: self.per_country,
            min_speed: (self.min_speed > 0.0).then_some(self.min_speed),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_defaults_match_contract() {
        let cli = Cli::parse_from(["trace-prober", "scan"]);
        let Command::Scan(args) = cli.command else {
            panic!("expected scan");
        };
        let cfg = args.into_config().unwrap();
        assert_eq!(cfg.concurrency, 50);
        assert_eq!(cfg.probe_timeout, Duration::from_millis(2000));
        assert_eq!(cfg.server_name, "speed.cloudflare.com");
        assert_eq!(cfg.trace_path, "/cdn-cgi/trace");
        assert_eq!(cfg.user_agent, "Mozilla/5.0");
        assert!(cfg.max_latency.is_none());
        assert!(cfg.speed.enabled());
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let cli = Cli::parse_from(["trace-prober", "scan", "--concurrency", "0"]);
        let Command::Scan(args) = cli.command else {
            panic!("expected scan");
        };
        assert!(args.into_config().is_err());
    }

    #[test]
    fn regroup_outfile_defaults_next_to_table() {
        let cli = Cli::parse_from(["trace-prober", "regroup", "--file", "out/ip.csv"]);
        let Command::Regroup(args) = cli.command else {
            panic!("expected regroup");
        };
        let cfg = args.into_config().unwrap();
        assert_eq!(cfg.outfile, PathBuf::from("out/ip.txt"));
        assert!(cfg.min_speed.is_none());
    }
}
