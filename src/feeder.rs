//! Feeders turn a target description into a sequence of scanning subjects.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use if_addrs::{get_if_addrs, IfAddr};
use ipnet::{IpNet, Ipv4Net};

use crate::error::{Error, Result};
use crate::ports::parse_ports_str;
use crate::types::ScanningSubject;

pub type SubjectIter = Box<dyn Iterator<Item = ScanningSubject> + Send>;

pub trait Feeder {
    /// Human-readable description of the targets, passed to exporters.
    fn info(&self) -> String;

    /// Number of subjects, when cheap to know.
    fn len_hint(&self) -> Option<u64>;

    fn subjects(&self) -> SubjectIter;
}

/// Every IPv4 address from `start` to `end`, inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeFeeder {
    start: Ipv4Addr,
    end: Ipv4Addr,
}

impl RangeFeeder {
    pub fn new(start: Ipv4Addr, end: Ipv4Addr) -> Result<Self> {
        if u32::from(start) > u32::from(end) {
            return Err(Error::InvalidTarget(format!("{start} - {end}")));
        }
        Ok(Self { start, end })
    }
}

impl FromStr for RangeFeeder {
    type Err = Error;

    /// Parses `10.0.0.1-10.0.0.254`.
    fn from_str(s: &str) -> Result<Self> {
        let (a, b) = s
            .split_once('-')
            .ok_or_else(|| Error::InvalidTarget(s.to_string()))?;
        let parse = |v: &str| {
            v.trim()
                .parse::<Ipv4Addr>()
                .map_err(|_| Error::InvalidTarget(s.to_string()))
        };
        Self::new(parse(a)?, parse(b)?)
    }
}

impl Feeder for RangeFeeder {
    fn info(&self) -> String {
        format!("{} - {}", self.start, self.end)
    }

    fn len_hint(&self) -> Option<u64> {
        Some(u64::from(u32::from(self.end) - u32::from(self.start)) + 1)
    }

    fn subjects(&self) -> SubjectIter {
        let range = u32::from(self.start)..=u32::from(self.end);
        Box::new(range.map(|n| ScanningSubject::new(IpAddr::V4(Ipv4Addr::from(n)))))
    }
}

/// Hosts of a network. For IPv4 the network and broadcast addresses are
/// skipped; a single-address network yields that address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CidrFeeder {
    net: IpNet,
}

impl CidrFeeder {
    pub fn new(net: IpNet) -> Self {
        Self { net }
    }
}

impl FromStr for CidrFeeder {
    type Err = Error;

    /// Accepts `192.168.1.0/24` or a bare address.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let net = if s.contains('/') {
            s.parse::<IpNet>()
                .map_err(|_| Error::InvalidTarget(s.to_string()))?
        } else {
            let ip: IpAddr = s.parse().map_err(|_| Error::InvalidTarget(s.to_string()))?;
            IpNet::from(ip)
        };
        Ok(Self::new(net))
    }
}

impl Feeder for CidrFeeder {
    fn info(&self) -> String {
        self.net.to_string()
    }

    fn len_hint(&self) -> Option<u64> {
        match self.net {
            IpNet::V4(n4) => Some(ipv4_host_span(n4).map_or(0, |(a, b)| u64::from(b - a) + 1)),
            IpNet::V6(_) => None,
        }
    }

    fn subjects(&self) -> SubjectIter {
        match self.net {
            IpNet::V4(n4) => match ipv4_host_span(n4) {
                Some((a, b)) => Box::new(
                    (a..=b).map(|n| ScanningSubject::new(IpAddr::V4(Ipv4Addr::from(n)))),
                ),
                None => Box::new(std::iter::empty()),
            },
            IpNet::V6(n6) => Box::new(n6.hosts().map(|ip| ScanningSubject::new(IpAddr::V6(ip)))),
        }
    }
}

fn ipv4_host_span(net: Ipv4Net) -> Option<(u32, u32)> {
    let start = u32::from(net.network());
    let end = u32::from(net.broadcast());
    match net.prefix_len() {
        32 => Some((start, end)),
        // point-to-point links have no network/broadcast address
        31 => Some((start, end)),
        _ if end > start + 1 => Some((start + 1, end - 1)),
        _ => None,
    }
}

/// Explicit hosts, one per line as `address[:ports]`, e.g.
/// `10.0.0.7:22,80,8000-8010`. Blank lines and `#` comments are ignored.
#[derive(Debug, Clone, Default)]
pub struct ListFeeder {
    subjects: Vec<ScanningSubject>,
}

impl ListFeeder {
    pub fn parse(text: &str) -> Result<Self> {
        let mut subjects = Vec::new();
        for raw in text.lines() {
            let line = raw.split('#').next().map(str::trim).unwrap_or("");
            if line.is_empty() {
                continue;
            }
            subjects.push(parse_list_entry(line)?);
        }
        Ok(Self { subjects })
    }

    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self> {
        Self::parse(&std::fs::read_to_string(path)?)
    }
}

fn parse_list_entry(line: &str) -> Result<ScanningSubject> {
    if let Ok(ip) = line.parse::<IpAddr>() {
        return Ok(ScanningSubject::new(ip));
    }
    // `[v6]:ports` or `v4:ports`
    let (host, ports) = match line.strip_prefix('[') {
        Some(rest) => {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| Error::InvalidTarget(line.to_string()))?;
            (host, tail.strip_prefix(':').unwrap_or(""))
        }
        None => line
            .split_once(':')
            .ok_or_else(|| Error::InvalidTarget(line.to_string()))?,
    };
    let ip: IpAddr = host
        .trim()
        .parse()
        .map_err(|_| Error::InvalidTarget(line.to_string()))?;
    let subject = ScanningSubject::new(ip);
    if ports.trim().is_empty() {
        return Ok(subject);
    }
    Ok(subject.with_requested_ports(parse_ports_str(ports)?))
}

impl Feeder for ListFeeder {
    fn info(&self) -> String {
        format!("{} host(s) from list", self.subjects.len())
    }

    fn len_hint(&self) -> Option<u64> {
        Some(self.subjects.len() as u64)
    }

    fn subjects(&self) -> SubjectIter {
        Box::new(self.subjects.clone().into_iter())
    }
}

/// Local non-loopback IPv4 interface addresses widened to their /24, sorted
/// and deduplicated. Used as the default target.
pub fn detect_local_cidrs() -> Result<Vec<Ipv4Net>> {
    let mut set = HashSet::<Ipv4Net>::new();
    for iface in get_if_addrs()? {
        if let IfAddr::V4(v4) = iface.addr {
            if v4.ip.is_loopback() {
                continue;
            }
            set.insert(ipv4_to_default_cidr(v4.ip));
        }
    }
    let mut cidrs: Vec<Ipv4Net> = set.into_iter().collect();
    cidrs.sort_by_key(|n| u32::from(n.network()));
    Ok(cidrs)
}

/// `192.168.1.42` becomes `192.168.1.0/24`.
pub fn ipv4_to_default_cidr(ip: Ipv4Addr) -> Ipv4Net {
    let o = ip.octets();
    // a /24 prefix length is always valid
    Ipv4Net::new(Ipv4Addr::new(o[0], o[1], o[2], 0), 24).unwrap_or_else(|_| Ipv4Net::from(ip))
}
