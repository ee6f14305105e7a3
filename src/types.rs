use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

use serde::Serialize;

use crate::config::ScannerConfig;
use crate::ports::{compact_ports, PortList};

/// Classification of a subject after it went through the fetchers.
#[derive(Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResultType {
    #[default]
    Unknown,
    Dead,
    Alive,
    /// Alive and at least one fetcher found extended data (ports, banners).
    WithPorts,
}

/// One scan target flowing through the fetcher pipeline.
///
/// Fetchers run sequentially for a subject and communicate through the typed
/// side-channel fields below: the ports fetcher fills `open_ports`, which the
/// port/text fetchers read.
#[derive(Debug, Clone)]
pub struct ScanningSubject {
    address: IpAddr,
    requested_ports: Option<PortList>,
    adapted_port_timeout: Option<Duration>,
    result_type: ResultType,
    aborted: bool,
    pub open_ports: Option<BTreeSet<u16>>,
    pub filtered_ports: Option<BTreeSet<u16>>,
    pub ping_result: Option<PingResult>,
}

impl ScanningSubject {
    pub fn new(address: IpAddr) -> Self {
        Self {
            address,
            requested_ports: None,
            adapted_port_timeout: None,
            result_type: ResultType::Unknown,
            aborted: false,
            open_ports: None,
            filtered_ports: None,
            ping_result: None,
        }
    }

    pub fn with_requested_ports(mut self, ports: PortList) -> Self {
        self.requested_ports = Some(ports);
        self
    }

    pub fn address(&self) -> IpAddr {
        self.address
    }

    pub fn is_any_port_requested(&self) -> bool {
        self.requested_ports.as_ref().is_some_and(|p| !p.is_empty())
    }

    pub fn requested_ports(&self) -> Option<&PortList> {
        self.requested_ports.as_ref().filter(|p| !p.is_empty())
    }

    /// Port timeout for this subject: the adapted value when one was derived
    /// from ping times, otherwise the configured base timeout.
    pub fn adapted_port_timeout(&self, config: &ScannerConfig) -> Duration {
        self.adapted_port_timeout
            .unwrap_or_else(|| config.port_timeout())
    }

    pub fn set_adapted_port_timeout(&mut self, timeout: Duration) {
        self.adapted_port_timeout = Some(timeout);
    }

    /// Derive the port timeout from the slowest ping reply: three round
    /// trips, clamped to `[min_port_timeout, port_timeout]`.
    pub fn adapt_port_timeout(&mut self, ping: &PingResult, config: &ScannerConfig) {
        if let Some(longest) = ping.longest_time() {
            let adapted = (longest * 3)
                .max(config.min_port_timeout())
                .min(config.port_timeout());
            self.adapted_port_timeout = Some(adapted);
        }
    }

    pub fn result_type(&self) -> ResultType {
        self.result_type
    }

    pub fn set_result_type(&mut self, result_type: ResultType) {
        self.result_type = result_type;
    }

    /// Skip the remaining fetchers for this subject.
    pub fn abort_scanning(&mut self) {
        self.aborted = true;
    }

    pub fn is_scanning_aborted(&self) -> bool {
        self.aborted
    }
}

/// Outcome of `count` reachability attempts. Only successful replies are
/// recorded; statistics are derived from them on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingResult {
    address: IpAddr,
    count: u32,
    replies: Vec<Duration>,
}

impl PingResult {
    pub fn new(address: IpAddr, count: u32) -> Self {
        Self {
            address,
            count,
            replies: Vec::new(),
        }
    }

    pub fn add_reply(&mut self, time: Duration) {
        self.replies.push(time);
    }

    pub fn address(&self) -> IpAddr {
        self.address
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn replies(&self) -> &[Duration] {
        &self.replies
    }

    pub fn reply_count(&self) -> usize {
        self.replies.len()
    }

    pub fn is_alive(&self) -> bool {
        !self.replies.is_empty()
    }

    pub fn average_time(&self) -> Option<Duration> {
        if self.replies.is_empty() {
            return None;
        }
        let total: Duration = self.replies.iter().sum();
        Some(total / self.replies.len() as u32)
    }

    pub fn shortest_time(&self) -> Option<Duration> {
        self.replies.iter().min().copied()
    }

    pub fn longest_time(&self) -> Option<Duration> {
        self.replies.iter().max().copied()
    }

    pub fn packet_loss(&self) -> u32 {
        self.count.saturating_sub(self.replies.len() as u32)
    }

    pub fn packet_loss_percent(&self) -> u32 {
        if self.count == 0 {
            return 0;
        }
        self.packet_loss() * 100 / self.count
    }
}

/// A value produced by a fetcher for one subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanValue {
    Address(IpAddr),
    Text(String),
    Latency(Duration),
    Ports(BTreeSet<u16>),
}

impl fmt::Display for ScanValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanValue::Address(ip) => write!(f, "{ip}"),
            ScanValue::Text(s) => f.write_str(s),
            ScanValue::Latency(d) => write!(f, "{} ms", d.as_millis()),
            ScanValue::Ports(ports) => f.write_str(&compact_ports(ports.iter().copied())),
        }
    }
}

/// Render an optional value the way exporters write it: absent is empty.
pub fn display_value(value: &Option<ScanValue>) -> String {
    value.as_ref().map(ToString::to_string).unwrap_or_default()
}

/// The result vector of one subject, aligned with the scanner's fetcher names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResult {
    pub address: IpAddr,
    pub result_type: ResultType,
    pub values: Vec<Option<ScanValue>>,
}

/// Aggregate counters of a finished scan session.
#[derive(Serialize, Debug, Clone, Default)]
pub struct ScanSummary {
    pub total_subjects: u64,
    pub scanned: u64,
    pub alive: u64,
    pub with_ports: u64,
    pub cancelled: bool,
    pub started: String,
    pub finished: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn localhost() -> IpAddr {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    }

    #[test]
    fn ping_statistics() {
        let mut ping = PingResult::new(localhost(), 4);
        ping.add_reply(Duration::from_millis(10));
        ping.add_reply(Duration::from_millis(30));
        assert!(ping.is_alive());
        assert_eq!(ping.average_time(), Some(Duration::from_millis(20)));
        assert_eq!(ping.shortest_time(), Some(Duration::from_millis(10)));
        assert_eq!(ping.longest_time(), Some(Duration::from_millis(30)));
        assert_eq!(ping.packet_loss(), 2);
        assert_eq!(ping.packet_loss_percent(), 50);
    }

    #[test]
    fn empty_ping_result() {
        let ping = PingResult::new(localhost(), 0);
        assert!(!ping.is_alive());
        assert_eq!(ping.average_time(), None);
        assert_eq!(ping.packet_loss_percent(), 0);
    }

    #[test]
    fn adapted_timeout_is_clamped() {
        let config = ScannerConfig {
            port_timeout_ms: 1000,
            min_port_timeout_ms: 100,
            ..ScannerConfig::default()
        };
        let mut subject = ScanningSubject::new(localhost());
        assert_eq!(subject.adapted_port_timeout(&config), Duration::from_millis(1000));

        let mut fast = PingResult::new(localhost(), 1);
        fast.add_reply(Duration::from_millis(1));
        subject.adapt_port_timeout(&fast, &config);
        assert_eq!(subject.adapted_port_timeout(&config), Duration::from_millis(100));

        let mut slow = PingResult::new(localhost(), 1);
        slow.add_reply(Duration::from_millis(900));
        subject.adapt_port_timeout(&slow, &config);
        assert_eq!(subject.adapted_port_timeout(&config), Duration::from_millis(1000));

        let mut mid = PingResult::new(localhost(), 1);
        mid.add_reply(Duration::from_millis(50));
        subject.adapt_port_timeout(&mid, &config);
        assert_eq!(subject.adapted_port_timeout(&config), Duration::from_millis(150));
    }

    #[test]
    fn empty_requested_ports_means_none_requested() {
        let subject = ScanningSubject::new(localhost()).with_requested_ports(PortList::new());
        assert!(!subject.is_any_port_requested());
        assert!(subject.requested_ports().is_none());
    }

    #[test]
    fn value_rendering() {
        assert_eq!(ScanValue::Latency(Duration::from_millis(12)).to_string(), "12 ms");
        assert_eq!(
            ScanValue::Ports(BTreeSet::from([22, 80, 81])).to_string(),
            "22,80-81"
        );
        assert_eq!(display_value(&None), "");
        assert_eq!(display_value(&Some(ScanValue::Address(localhost()))), "127.0.0.1");
    }
}
