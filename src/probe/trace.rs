use super::{ProbeError, Prober};
use crate::model::{Candidate, Config, ProbeOutcome};
use async_trait::async_trait;
use openssl::ssl::{SslConnector, SslMethod};
use std::pin::Pin;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};
use tokio_openssl::SslStream;

/// Probes one candidate: TLS handshake presenting the reference hostname,
/// one GET against the fixed trace path, ordered field extraction.
///
/// The connector keeps `SslConnector`'s default verification; a candidate
/// that cannot present a chain trusted for the reference hostname fails the
/// handshake rather than being accepted blind.
pub struct TraceProbe {
    connector: SslConnector,
    server_name: String,
    trace_path: String,
    user_agent: String,
    probe_timeout: Duration,
    max_response_bytes: usize,
}

impl TraceProbe {
    pub fn new(cfg: &Config) -> anyhow::Result<Self> {
        let connector = SslConnector::builder(SslMethod::tls())?.build();
        Ok(Self {
            connector,
            server_name: cfg.server_name.clone(),
            trace_path: cfg.trace_path.clone(),
            user_agent: cfg.user_agent.clone(),
            probe_timeout: cfg.probe_timeout,
            max_response_bytes: cfg.max_response_bytes,
        })
    }

    /// Dials the candidate and completes a handshake in which SNI carries the
    /// reference hostname, not the address being dialed.
    pub(crate) async fn open(
        &self,
        candidate: &Candidate,
    ) -> Result<SslStream<TcpStream>, ProbeError> {
        let stream = TcpStream::connect(candidate.socket_addr())
            .await
            .map_err(ProbeError::Connect)?;

        let ssl = self
            .connector
            .configure()?
            .into_ssl(&self.server_name)?;
        let mut tls = SslStream::new(ssl, stream)?;
        Pin::new(&mut tls)
            .connect()
            .await
            .map_err(ProbeError::Handshake)?;
        Ok(tls)
    }

    // HTTP/1.0 keeps the body unchunked, so the field scan sees it verbatim.
    pub(crate) fn request_for(&self, path: &str) -> String {
        format!(
            "GET {path} HTTP/1.0\r\nHost: {host}\r\nUser-Agent: {ua}\r\nConnection: close\r\n\r\n",
            host = self.server_name,
            ua = self.user_agent,
        )
    }

    async fn exchange(&self, candidate: &Candidate) -> Result<String, ProbeError> {
        let mut tls = self.open(candidate).await?;

        let request = self.request_for(&self.trace_path);
        tls.write_all(request.as_bytes())
            .await
            .map_err(ProbeError::Io)?;

        let raw = read_limited(&mut tls, self.max_response_bytes).await?;
        Ok(String::from_utf8_lossy(body_of(&raw)).into_owned())
    }
}

#[async_trait]
impl Prober for TraceProbe {
    async fn probe(&self, candidate: &Candidate) -> Result<ProbeOutcome, ProbeError> {
        let start = Instant::now();
        let body = timeout(self.probe_timeout, self.exchange(candidate))
            .await
            .map_err(|_| ProbeError::Timeout)??;
        let latency_ms = start.elapsed().as_millis() as u64;

        let (colo, loc) = extract_trace_fields(&body).ok_or(ProbeError::MissingFields)?;
        Ok(ProbeOutcome {
            addr: candidate.addr,
            port: candidate.port,
            colo,
            loc,
            latency_ms,
        })
    }
}

/// Reads until EOF or the byte cap, whichever comes first.
async fn read_limited<S>(stream: &mut S, cap: usize) -> Result<Vec<u8>, ProbeError>
where
    S: AsyncReadExt + Unpin,
{
    let mut buf = vec![0u8; cap];
    let mut total = 0usize;
    while total < cap {
        let n = stream
            .read(&mut buf[total..])
            .await
            .map_err(ProbeError::Io)?;
        if n == 0 {
            break;
        }
        total += n;
    }
    buf.truncate(total);
    Ok(buf)
}

fn body_of(raw: &[u8]) -> &[u8] {
    match raw.windows(4).position(|w| w == b"\r\n\r\n") {
        Some(pos) => &raw[pos + 4..],
        None => raw,
    }
}

/// Ordered, non-anchored extraction: a `colo=` uppercase run followed later
/// in the body by a `loc=` uppercase run. `loc=` is only searched after the
/// end of the colo token, so a reordered body yields nothing.
pub(crate) fn extract_trace_fields(body: &str) -> Option<(String, String)> {
    let colo_at = body.find("colo=")?;
    let after_colo = &body[colo_at + 5..];
    let colo = leading_uppercase(after_colo);
    if colo.is_empty() {
        return None;
    }

    let rest = &after_colo[colo.len()..];
    let loc_at = rest.find("loc=")?;
    let loc = leading_uppercase(&rest[loc_at + 4..]);
    if loc.is_empty() {
        return None;
    }

    Some((colo.to_string(), loc.to_string()))
}

fn leading_uppercase(s: &str) -> &str {
    let end = s
        .find(|c: char| !c.is_ascii_uppercase())
        .unwrap_or(s.len());
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_ordered_fields() {
        let body = "colo=LAX\nsliver=none\nloc=US\n";
        assert_eq!(
            extract_trace_fields(body),
            Some(("LAX".into(), "US".into()))
        );
    }

    #[test]
    fn extracts_from_full_trace_body() {
        let body = "fl=123f45\nh=speed.cloudflare.com\nip=203.0.113.9\nts=1722800000.123\n\
                    visit_scheme=https\nuag=Mozilla/5.0\ncolo=SJC\nsliver=none\nhttp=http/1.1\n\
                    loc=US\ntls=TLSv1.3\nsni=plaintext\nwarp=off\n";
        assert_eq!(
            extract_trace_fields(body),
            Some(("SJC".into(), "US".into()))
        );
    }

    #[test]
    fn reordered_fields_yield_nothing() {
        assert_eq!(extract_trace_fields("loc=US\ncolo=LAX\n"), None);
    }

    #[test]
    fn missing_either_field_yields_nothing() {
        assert_eq!(extract_trace_fields("colo=LAX\n"), None);
        assert_eq!(extract_trace_fields("loc=US\n"), None);
        assert_eq!(extract_trace_fields("nothing here"), None);
    }

    #[test]
    fn empty_tokens_yield_nothing() {
        assert_eq!(extract_trace_fields("colo=\nloc=US\n"), None);
        assert_eq!(extract_trace_fields("colo=LAX\nloc=us\n"), None);
    }

    #[test]
    fn arbitrary_content_between_fields_is_fine() {
        let body = "colo=FRA lots of unrelated text, even loc-adjacent noise loc=DE tail";
        assert_eq!(
            extract_trace_fields(body),
            Some(("FRA".into(), "DE".into()))
        );
    }

    #[test]
    fn body_follows_header_separator() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n\r\ncolo=LAX\nloc=US\n";
        assert_eq!(body_of(raw), b"colo=LAX\nloc=US\n");
        assert_eq!(body_of(b"no headers at all"), b"no headers at all");
    }

    #[tokio::test]
    async fn read_limited_stops_at_cap() {
        let mut data: &[u8] = b"0123456789";
        let read = read_limited(&mut data, 4).await.unwrap();
        assert_eq!(read, b"0123");

        let mut rest: &[u8] = b"abc";
        let read = read_limited(&mut rest, 64).await.unwrap();
        assert_eq!(read, b"abc");
    }
}
