//! Generic "send some text to a port and pick the answer out of the
//! response" fetcher.
//!
//! The probe connects to each candidate port in turn, writes the configured
//! payload, and reads the response line by line until a line matches the
//! configured regexp. The first match wins. Connection refusals, resets and
//! timeouts are ordinary outcomes and only move on to the next port.

use std::collections::BTreeSet;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::{Captures, Regex};
use socket2::SockRef;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::Fetcher;
use crate::config::{PortTextConfig, ScannerConfig};
use crate::error::{Error, Result};
use crate::types::{ResultType, ScanValue, ScanningSubject};

/// Longest response line kept for matching; the rest of the line is dropped.
const MAX_LINE_LEN: usize = 8 * 1024;

pub struct PortTextFetcher {
    id: String,
    name: String,
    scanner_config: Arc<ScannerConfig>,
    default_port: u16,
    scan_open_ports: bool,
    text_to_send: String,
    matching_regexp: Regex,
    extract_group: usize,
}

impl PortTextFetcher {
    /// Build a fetcher from its probe configuration.
    ///
    /// Fails when the regexp does not compile or when `extract_group` names a
    /// capture group the regexp does not have.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        scanner_config: Arc<ScannerConfig>,
        config: PortTextConfig,
    ) -> Result<Self> {
        let matching_regexp = Regex::new(&config.matching_regexp)?;
        check_group(&matching_regexp, config.extract_group)?;
        Ok(Self {
            id: id.into(),
            name: name.into(),
            scanner_config,
            default_port: config.default_port,
            scan_open_ports: config.scan_open_ports,
            text_to_send: config.text_to_send,
            matching_regexp,
            extract_group: config.extract_group,
        })
    }

    pub fn default_port(&self) -> u16 {
        self.default_port
    }

    pub fn text_to_send(&self) -> &str {
        &self.text_to_send
    }

    pub fn set_text_to_send(&mut self, text: impl Into<String>) {
        self.text_to_send = text.into();
    }

    pub fn matching_regexp(&self) -> &Regex {
        &self.matching_regexp
    }

    /// Replace the regexp. The current extract group must exist in it.
    pub fn set_matching_regexp(&mut self, regexp: Regex) -> Result<()> {
        check_group(&regexp, self.extract_group)?;
        self.matching_regexp = regexp;
        Ok(())
    }

    pub fn extract_group(&self) -> usize {
        self.extract_group
    }

    pub fn set_extract_group(&mut self, group: usize) -> Result<()> {
        check_group(&self.matching_regexp, group)?;
        self.extract_group = group;
        Ok(())
    }

    pub fn scan_open_ports(&self) -> bool {
        self.scan_open_ports
    }

    pub fn set_scan_open_ports(&mut self, scan_open_ports: bool) {
        self.scan_open_ports = scan_open_ports;
    }

    /// Ports to probe for `subject`, in probing order:
    /// 1. previously found open ports plus the default port, ascending, when
    ///    `scan_open_ports` is set and the ports fetcher ran;
    /// 2. otherwise the subject's requested ports as given;
    /// 3. otherwise just the default port.
    pub fn port_candidates(&self, subject: &ScanningSubject) -> Vec<u16> {
        if self.scan_open_ports {
            if let Some(open) = &subject.open_ports {
                let mut ports: BTreeSet<u16> = open.clone();
                ports.insert(self.default_port);
                return ports.into_iter().collect();
            }
        }
        match subject.requested_ports() {
            Some(requested) => requested.iter().collect(),
            None => vec![self.default_port],
        }
    }

    /// One connect/send/read cycle. `Ok(None)` means the stream ended
    /// without a matching line.
    async fn probe(
        &self,
        addr: SocketAddr,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> io::Result<Option<String>> {
        let stream = time::timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| timed_out("connect"))??;
        stream.set_nodelay(true)?;
        // Abortive close: unsent data is discarded and the peer sees a reset.
        SockRef::from(&stream).set_linger(Some(Duration::ZERO))?;

        let mut reader = BufReader::new(stream);
        if !self.text_to_send.is_empty() {
            time::timeout(
                read_timeout,
                reader.get_mut().write_all(self.text_to_send.as_bytes()),
            )
            .await
            .map_err(|_| timed_out("write"))??;
        }

        let mut line = Vec::new();
        loop {
            line.clear();
            let n = time::timeout(read_timeout, read_line(&mut reader, &mut line))
                .await
                .map_err(|_| timed_out("read"))??;
            if n == 0 {
                return Ok(None);
            }
            let text = String::from_utf8_lossy(&line);
            let text = text.trim_end_matches(['\r', '\n']);
            if let Some(caps) = self.matching_regexp.captures(text) {
                return Ok(Some(extract_result(&caps, self.extract_group, addr.port())));
            }
        }
    }
}

#[async_trait]
impl Fetcher for PortTextFetcher {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn scan(
        &self,
        subject: &mut ScanningSubject,
        cancel: &CancellationToken,
    ) -> Option<ScanValue> {
        let address = subject.address();
        let connect_timeout = subject.adapted_port_timeout(&self.scanner_config);
        let read_timeout = self.scanner_config.port_timeout() * 2;

        for port in self.port_candidates(subject) {
            if cancel.is_cancelled() {
                break;
            }
            // The stream lives inside the probe future, so it is closed on
            // every path, including cancellation.
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                r = self.probe(SocketAddr::new(address, port), connect_timeout, read_timeout) => r,
            };
            match outcome {
                Ok(Some(result)) => {
                    subject.set_result_type(ResultType::WithPorts);
                    return Some(ScanValue::Text(result));
                }
                Ok(None) => {}
                Err(e) if is_expected(&e) => {
                    trace!(%address, port, error = %e, "no data");
                }
                Err(e) => {
                    debug!(%address, port, error = %e, "probe failed");
                }
            }
        }
        None
    }
}

/// The text of capture group `group`, or the port number when the group is
/// empty or did not take part in the match.
pub fn extract_result(caps: &Captures<'_>, group: usize, port: u16) -> String {
    match caps.get(group).map(|m| m.as_str()) {
        Some(s) if !s.is_empty() => s.to_string(),
        _ => port.to_string(),
    }
}

fn check_group(regexp: &Regex, group: usize) -> Result<()> {
    let available = regexp.captures_len() - 1;
    if group > available {
        return Err(Error::CaptureGroupOutOfRange { group, available });
    }
    Ok(())
}

/// Read one `\n`-terminated line, keeping at most [`MAX_LINE_LEN`] bytes of it.
async fn read_line(reader: &mut BufReader<TcpStream>, line: &mut Vec<u8>) -> io::Result<usize> {
    let mut total = 0;
    loop {
        let buf = reader.fill_buf().await?;
        if buf.is_empty() {
            return Ok(total);
        }
        let (chunk, done) = match buf.iter().position(|&b| b == b'\n') {
            Some(i) => (&buf[..=i], true),
            None => (buf, false),
        };
        let keep = chunk.len().min(MAX_LINE_LEN.saturating_sub(line.len()));
        line.extend_from_slice(&chunk[..keep]);
        let used = chunk.len();
        reader.consume(used);
        total += used;
        if done {
            return Ok(total);
        }
    }
}

fn timed_out(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, format!("{what} timed out"))
}

fn is_expected(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::TimedOut
            | io::ErrorKind::HostUnreachable
            | io::ErrorKind::NetworkUnreachable
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::PortList;
    use std::net::{IpAddr, Ipv4Addr};

    fn fetcher(scan_open_ports: bool) -> PortTextFetcher {
        let config = PortTextConfig {
            default_port: 80,
            scan_open_ports,
            ..PortTextConfig::web_detect()
        };
        PortTextFetcher::new("test", "Test", Arc::new(ScannerConfig::default()), config).unwrap()
    }

    fn subject() -> ScanningSubject {
        ScanningSubject::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)))
    }

    #[test]
    fn open_ports_are_merged_with_default_in_ascending_order() {
        let mut s = subject();
        s.open_ports = Some(BTreeSet::from([8080, 22]));
        assert_eq!(fetcher(true).port_candidates(&s), vec![22, 80, 8080]);
    }

    #[test]
    fn default_port_is_not_duplicated() {
        let mut s = subject();
        s.open_ports = Some(BTreeSet::from([80, 443]));
        assert_eq!(fetcher(true).port_candidates(&s), vec![80, 443]);
    }

    #[test]
    fn falls_back_to_default_port() {
        assert_eq!(fetcher(false).port_candidates(&subject()), vec![80]);
        // scanning open ports without a ports fetcher result
        assert_eq!(fetcher(true).port_candidates(&subject()), vec![80]);
    }

    #[test]
    fn requested_ports_keep_their_order() {
        let s = subject().with_requested_ports(PortList::from_ports([8080, 22, 443]));
        assert_eq!(fetcher(false).port_candidates(&s), vec![8080, 22, 443]);
    }

    #[test]
    fn open_ports_win_over_requested_ports() {
        let mut s = subject().with_requested_ports(PortList::from_ports([8080]));
        s.open_ports = Some(BTreeSet::from([22]));
        assert_eq!(fetcher(true).port_candidates(&s), vec![22, 80]);
        assert_eq!(fetcher(false).port_candidates(&s), vec![8080]);
    }

    #[test]
    fn empty_capture_group_falls_back_to_port() {
        let re = Regex::new(r"^Server:\s*(.*)$").unwrap();
        let caps = re.captures("Server: ").unwrap();
        assert_eq!(extract_result(&caps, 1, 80), "80");

        let caps = re.captures("Server: nginx/1.25").unwrap();
        assert_eq!(extract_result(&caps, 1, 80), "nginx/1.25");
    }

    #[test]
    fn non_participating_group_falls_back_to_port() {
        let re = Regex::new(r"^OK(?: (\w+))?$").unwrap();
        let caps = re.captures("OK").unwrap();
        assert_eq!(extract_result(&caps, 1, 8080), "8080");
    }

    #[test]
    fn group_zero_is_whole_match() {
        let re = Regex::new(r"SSH-[\d.]+").unwrap();
        let caps = re.captures("SSH-2.0-OpenSSH").unwrap();
        assert_eq!(extract_result(&caps, 0, 22), "SSH-2.0");
    }

    #[test]
    fn construction_validates_regexp_and_group() {
        let scanner = Arc::new(ScannerConfig::default());
        let bad_regex = PortTextConfig {
            matching_regexp: "(".into(),
            ..PortTextConfig::default()
        };
        assert!(matches!(
            PortTextFetcher::new("x", "x", scanner.clone(), bad_regex).err().unwrap(),
            Error::InvalidRegex(_)
        ));

        let bad_group = PortTextConfig {
            matching_regexp: "^no groups$".into(),
            extract_group: 1,
            ..PortTextConfig::default()
        };
        assert!(matches!(
            PortTextFetcher::new("x", "x", scanner, bad_group).err().unwrap(),
            Error::CaptureGroupOutOfRange { group: 1, available: 0 }
        ));
    }

    #[test]
    fn setters_keep_group_valid() {
        let mut f = fetcher(false);
        assert!(f.set_extract_group(2).is_err());
        assert_eq!(f.extract_group(), 1);
        assert!(f.set_matching_regexp(Regex::new("^plain$").unwrap()).is_err());
        f.set_extract_group(0).unwrap();
        f.set_matching_regexp(Regex::new("^plain$").unwrap()).unwrap();
        assert_eq!(f.matching_regexp().as_str(), "^plain$");

        f.set_text_to_send("PING\r\n");
        assert_eq!(f.text_to_send(), "PING\r\n");
        f.set_scan_open_ports(true);
        assert!(f.scan_open_ports());
    }
}
