//! Fetchers extract one piece of information about a subject.
//!
//! The scanner runs an ordered list of fetchers for every subject; the
//! values they return form the subject's result vector. Fetchers are created
//! by stable id through [`FetcherRegistry`].

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::{PortTextConfig, ScannerConfig};
use crate::error::{Error, Result};
use crate::pinger::{Pinger, ReachabilityPinger};
use crate::types::{ScanValue, ScanningSubject};

pub mod hostname;
pub mod ip;
pub mod ping;
pub mod port_text;
pub mod ports;

pub use hostname::HostnameFetcher;
pub use ip::IpFetcher;
pub use ping::PingFetcher;
pub use port_text::PortTextFetcher;
pub use ports::PortsFetcher;

#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Stable identifier, e.g. `fetcher.ping`.
    fn id(&self) -> &str;

    /// Column name used by exporters.
    fn name(&self) -> &str;

    /// Probe the subject. `None` means no data; expected network failures
    /// never surface as errors here.
    async fn scan(
        &self,
        subject: &mut ScanningSubject,
        cancel: &CancellationToken,
    ) -> Option<ScanValue>;
}

pub const IP: &str = "fetcher.ip";
pub const PING: &str = "fetcher.ping";
pub const HOSTNAME: &str = "fetcher.hostname";
pub const PORTS: &str = "fetcher.ports";
pub const WEB_DETECT: &str = "fetcher.webDetect";
pub const PORT_TEXT: &str = "fetcher.portText";

const ALL_IDS: &[&str] = &[IP, PING, HOSTNAME, PORTS, WEB_DETECT, PORT_TEXT];

/// Builds fetchers by id from the shared scanner configuration.
pub struct FetcherRegistry {
    config: Arc<ScannerConfig>,
    pinger: Arc<dyn Pinger>,
}

impl FetcherRegistry {
    pub fn new(config: Arc<ScannerConfig>) -> Self {
        let pinger = Arc::new(ReachabilityPinger::tcp_echo(config.ping_timeout()));
        Self { config, pinger }
    }

    /// Replace the pinger used by `fetcher.ping`.
    pub fn with_pinger(mut self, pinger: Arc<dyn Pinger>) -> Self {
        self.pinger = pinger;
        self
    }

    pub fn ids(&self) -> &'static [&'static str] {
        ALL_IDS
    }

    /// Accepts full ids as well as the short form (`ping`, `webDetect`),
    /// case-insensitively.
    pub fn resolve_id(name: &str) -> Option<&'static str> {
        let name = name.trim();
        ALL_IDS.iter().copied().find(|id| {
            id.eq_ignore_ascii_case(name)
                || id
                    .strip_prefix("fetcher.")
                    .is_some_and(|short| short.eq_ignore_ascii_case(name))
        })
    }

    pub fn create(&self, id: &str) -> Result<Arc<dyn Fetcher>> {
        let resolved = Self::resolve_id(id).ok_or_else(|| Error::UnknownFetcher(id.to_string()))?;
        let fetcher: Arc<dyn Fetcher> = match resolved {
            IP => Arc::new(IpFetcher),
            PING => Arc::new(PingFetcher::new(self.pinger.clone(), self.config.clone())),
            HOSTNAME => Arc::new(HostnameFetcher::new(self.config.ping_timeout())),
            PORTS => Arc::new(PortsFetcher::new(self.config.clone())?),
            WEB_DETECT => Arc::new(PortTextFetcher::new(
                WEB_DETECT,
                "Web detect",
                self.config.clone(),
                PortTextConfig::web_detect(),
            )?),
            PORT_TEXT => Arc::new(PortTextFetcher::new(
                PORT_TEXT,
                "Port text",
                self.config.clone(),
                self.config.port_text.clone(),
            )?),
            _ => return Err(Error::UnknownFetcher(id.to_string())),
        };
        Ok(fetcher)
    }

    /// Create the fetchers for `ids` in order, making sure the IP fetcher
    /// comes first.
    pub fn create_all<S: AsRef<str>>(&self, ids: &[S]) -> Result<Vec<Arc<dyn Fetcher>>> {
        let mut fetchers = Vec::with_capacity(ids.len() + 1);
        for id in ids {
            let fetcher = self.create(id.as_ref())?;
            if fetcher.id() == IP {
                continue;
            }
            fetchers.push(fetcher);
        }
        fetchers.insert(0, self.create(IP)?);
        Ok(fetchers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> FetcherRegistry {
        FetcherRegistry::new(Arc::new(ScannerConfig::default()))
    }

    #[test]
    fn resolves_short_and_full_ids() {
        assert_eq!(FetcherRegistry::resolve_id("ping"), Some(PING));
        assert_eq!(FetcherRegistry::resolve_id("fetcher.webDetect"), Some(WEB_DETECT));
        assert_eq!(FetcherRegistry::resolve_id("WEBDETECT"), Some(WEB_DETECT));
        assert_eq!(FetcherRegistry::resolve_id("mac"), None);
    }

    #[test]
    fn every_id_can_be_created() {
        let registry = registry();
        for id in registry.ids() {
            let fetcher = registry.create(id).unwrap();
            assert_eq!(fetcher.id(), *id);
        }
    }

    #[test]
    fn unknown_id_is_rejected() {
        let err = registry().create("fetcher.mac").err().unwrap();
        assert!(matches!(err, Error::UnknownFetcher(id) if id == "fetcher.mac"));
    }

    #[test]
    fn ip_fetcher_is_always_first() {
        let fetchers = registry().create_all(&["ping", "ports", "ip"]).unwrap();
        let ids: Vec<&str> = fetchers.iter().map(|f| f.id()).collect();
        assert_eq!(ids, vec![IP, PING, PORTS]);
    }

    #[test]
    fn invalid_port_text_config_fails_at_construction() {
        let mut config = ScannerConfig::default();
        config.port_text.matching_regexp = "^(a)$".into();
        config.port_text.extract_group = 2;
        let registry = FetcherRegistry::new(Arc::new(config));
        assert!(matches!(
            registry.create(PORT_TEXT).err().unwrap(),
            Error::CaptureGroupOutOfRange { group: 2, available: 1 }
        ));
    }
}
