use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

/// An ordered, duplicate-free list of TCP ports (1..=65535).
///
/// Iteration order is the order of first appearance in the source text, so
/// `"8080,22"` iterates 8080 first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortList {
    ports: Vec<u16>,
}

impl PortList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_ports(ports: impl IntoIterator<Item = u16>) -> Self {
        let mut list = Self::new();
        for p in ports {
            list.push(p);
        }
        list
    }

    /// Append a port unless it is already present. Port 0 is ignored.
    pub fn push(&mut self, port: u16) {
        if port != 0 && !self.ports.contains(&port) {
            self.ports.push(port);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = u16> + '_ {
        self.ports.iter().copied()
    }

    pub fn as_slice(&self) -> &[u16] {
        &self.ports
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }
}

impl fmt::Display for PortList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&compact_ports(self.iter()))
    }
}

/// Parse a port specification into a [`PortList`].
///
/// Items are separated by commas, whitespace or newlines:
/// - single port number: `80`
/// - inclusive range: `8000-8010`
/// - comments: everything after `#` on a line is ignored
pub fn parse_ports_str(s: &str) -> Result<PortList> {
    let mut out = Vec::new();
    let mut seen = HashSet::new();

    for raw_line in s.lines() {
        let line = raw_line.split('#').next().unwrap_or("");
        for item in line
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|i| !i.is_empty())
        {
            if let Some((a, b)) = item.split_once('-') {
                let start = parse_port_str(a)?;
                let end = parse_port_str(b)?;
                if start > end {
                    return Err(Error::invalid_ports(item, "range start is greater than end"));
                }
                for p in start..=end {
                    if seen.insert(p) {
                        out.push(p);
                    }
                }
                continue;
            }

            let p = parse_port_str(item)?;
            if seen.insert(p) {
                out.push(p);
            }
        }
    }

    Ok(PortList { ports: out })
}

/// Load a port specification from a file.
pub fn load_ports_from_path(path: impl AsRef<Path>) -> Result<PortList> {
    let content = fs::read_to_string(path.as_ref())?;
    parse_ports_str(&content)
}

/// Render ascending ports with consecutive runs collapsed, e.g. `22,80,8000-8002`.
pub fn compact_ports(ports: impl IntoIterator<Item = u16>) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut run: Option<(u16, u16)> = None;

    for p in ports {
        run = match run {
            Some((start, end)) if end.checked_add(1) == Some(p) => Some((start, p)),
            Some(prev) => {
                parts.push(format_run(prev));
                Some((p, p))
            }
            None => Some((p, p)),
        };
    }
    if let Some(last) = run {
        parts.push(format_run(last));
    }
    parts.join(",")
}

fn format_run((start, end): (u16, u16)) -> String {
    if start == end {
        start.to_string()
    } else {
        format!("{start}-{end}")
    }
}

fn parse_port_str(s: &str) -> Result<u16> {
    let s = s.trim();
    let val: u32 = s
        .parse()
        .map_err(|e: std::num::ParseIntError| Error::invalid_ports(s, e.to_string()))?;
    if val == 0 || val > 65535 {
        return Err(Error::invalid_ports(s, "port out of range"));
    }
    Ok(val as u16)
}
