//! Scanner configuration.
//!
//! Every key is optional; missing keys fall back to the defaults below. The
//! configuration is read once and shared read-only between scan tasks.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::ports::{parse_ports_str, PortList};

pub const DEFAULT_PORTS: &str = "21-23,25,53,80,110,139,443,445,3389,8080";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScannerConfig {
    /// Number of subjects scanned concurrently.
    pub max_threads: usize,
    /// Reachability attempts per subject.
    pub ping_count: u32,
    pub ping_timeout_ms: u64,
    /// Base port timeout. Port/text probes read with twice this value.
    pub port_timeout_ms: u64,
    pub min_port_timeout_ms: u64,
    /// Derive per-subject port timeouts from ping round-trip times.
    pub adapt_port_timeout: bool,
    /// Keep running fetchers for subjects that did not answer pings.
    pub scan_dead_hosts: bool,
    /// Ports checked by the ports fetcher when the subject requested none.
    pub ports: String,
    /// Concurrent connects per subject in the ports fetcher.
    pub max_port_concurrency: usize,
    /// Probe used by the `fetcher.portText` fetcher.
    pub port_text: PortTextConfig,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            max_threads: 100,
            ping_count: 3,
            ping_timeout_ms: 2000,
            port_timeout_ms: 2000,
            min_port_timeout_ms: 100,
            adapt_port_timeout: true,
            scan_dead_hosts: false,
            ports: DEFAULT_PORTS.to_string(),
            max_port_concurrency: 64,
            port_text: PortTextConfig::default(),
        }
    }
}

impl ScannerConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: ScannerConfig = toml::from_str(s).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_threads == 0 {
            return Err(Error::Config("max_threads must be at least 1".into()));
        }
        if self.max_port_concurrency == 0 {
            return Err(Error::Config("max_port_concurrency must be at least 1".into()));
        }
        if self.min_port_timeout_ms > self.port_timeout_ms {
            return Err(Error::Config(format!(
                "min_port_timeout_ms ({}) exceeds port_timeout_ms ({})",
                self.min_port_timeout_ms, self.port_timeout_ms
            )));
        }
        self.port_list()?;
        Ok(())
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    pub fn port_timeout(&self) -> Duration {
        Duration::from_millis(self.port_timeout_ms)
    }

    pub fn min_port_timeout(&self) -> Duration {
        Duration::from_millis(self.min_port_timeout_ms)
    }

    pub fn port_list(&self) -> Result<PortList> {
        parse_ports_str(&self.ports)
    }
}

/// Configuration of a port/text probe: which port to talk to, what to send
/// and how to pick the answer out of the response lines.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PortTextConfig {
    pub default_port: u16,
    pub text_to_send: String,
    pub matching_regexp: String,
    pub extract_group: usize,
    /// Probe every port the ports fetcher found open, plus the default port.
    pub scan_open_ports: bool,
}

impl Default for PortTextConfig {
    fn default() -> Self {
        Self {
            default_port: 80,
            text_to_send: "GET / HTTP/1.0\r\n\r\n".to_string(),
            matching_regexp: r"^(.*)$".to_string(),
            extract_group: 1,
            scan_open_ports: false,
        }
    }
}

impl PortTextConfig {
    /// Detects the web server software from the `Server:` response header.
    pub fn web_detect() -> Self {
        Self {
            default_port: 80,
            text_to_send: "HEAD /robots.txt HTTP/1.0\r\n\r\n".to_string(),
            matching_regexp: r"^[Ss]erver:\s+(.*)$".to_string(),
            extract_group: 1,
            scan_open_ports: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_gives_defaults() {
        let config = ScannerConfig::from_toml_str("").unwrap();
        assert_eq!(config, ScannerConfig::default());
    }

    #[test]
    fn partial_toml_overrides() {
        let config = ScannerConfig::from_toml_str(
            r#"
            max_threads = 8
            port_timeout_ms = 500
            scan_dead_hosts = true

            [port_text]
            default_port = 25
            matching_regexp = "^220 (.*)$"
            "#,
        )
        .unwrap();
        assert_eq!(config.max_threads, 8);
        assert_eq!(config.port_timeout(), Duration::from_millis(500));
        assert!(config.scan_dead_hosts);
        assert_eq!(config.port_text.default_port, 25);
        assert_eq!(config.port_text.extract_group, 1);
        assert_eq!(config.ping_count, 3);
    }

    #[test]
    fn validate_rejects_bad_values() {
        assert!(ScannerConfig::from_toml_str("max_threads = 0").is_err());
        assert!(ScannerConfig::from_toml_str("ports = \"1-70000\"").is_err());
        assert!(ScannerConfig::from_toml_str(
            "port_timeout_ms = 100\nmin_port_timeout_ms = 200"
        )
        .is_err());
    }

    #[test]
    fn unknown_type_is_config_error() {
        let err = ScannerConfig::from_toml_str("max_threads = \"many\"").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
