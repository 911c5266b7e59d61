use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// One address/port pair to be probed. Duplicates in the input are kept and
/// probed independently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub addr: IpAddr,
    pub port: u16,
}

impl Candidate {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.addr, self.port)
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.socket_addr())
    }
}

/// Produced only by a fully successful probe: the endpoint terminated TLS for
/// the reference hostname and its trace body carried both fields.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOutcome {
    pub addr: IpAddr,
    pub port: u16,
    pub colo: String,
    pub loc: String,
    pub latency_ms: u64,
}

/// A verified outcome annotated with measured download throughput.
/// `speed_kbps` is 0.0 when the download failed; the row is kept either way.
#[derive(Debug, Clone, PartialEq)]
pub struct SpeedMeasurement {
    pub outcome: ProbeOutcome,
    pub speed_kbps: f64,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub input: PathBuf,
    pub outfile: PathBuf,
    pub concurrency: usize,
    pub probe_timeout: Duration,
    /// Hostname presented during the handshake and in the Host header,
    /// regardless of the address dialed.
    pub server_name: String,
    pub trace_path: String,
    pub user_agent: String,
    pub max_response_bytes: usize,
    /// Successful probes slower than this are discarded. None disables.
    pub max_latency: Option<Duration>,
    pub speed: SpeedConfig,
}

#[derive(Debug, Clone)]
pub struct SpeedConfig {
    /// Concurrent download workers. 0 disables the stage.
    pub workers: usize,
    pub payload_path: String,
    /// How long each download may keep reading before throughput is taken.
    pub window: Duration,
}

impl SpeedConfig {
    pub fn enabled(&self) -> bool {
        self.workers > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_display_formats() {
        let v4 = Candidate {
            addr: "10.0.0.1".parse().unwrap(),
            port: 443,
        };
        assert_eq!(v4.to_string(), "10.0.0.1:443");

        let v6 = Candidate {
            addr: "2606:4700::1".parse().unwrap(),
            port: 2053,
        };
        assert_eq!(v6.to_string(), "[2606:4700::1]:2053");
    }
}
