use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::Fetcher;
use crate::config::ScannerConfig;
use crate::pinger::Pinger;
use crate::types::{ResultType, ScanValue, ScanningSubject};

/// Pings the subject and reports the average round-trip time.
///
/// Dead subjects are marked aborted unless `scan_dead_hosts` is set, so the
/// scanner skips the remaining fetchers for them.
pub struct PingFetcher {
    pinger: Arc<dyn Pinger>,
    config: Arc<ScannerConfig>,
}

impl PingFetcher {
    pub fn new(pinger: Arc<dyn Pinger>, config: Arc<ScannerConfig>) -> Self {
        Self { pinger, config }
    }
}

#[async_trait]
impl Fetcher for PingFetcher {
    fn id(&self) -> &str {
        super::PING
    }

    fn name(&self) -> &str {
        "Ping"
    }

    async fn scan(
        &self,
        subject: &mut ScanningSubject,
        cancel: &CancellationToken,
    ) -> Option<ScanValue> {
        let ping = match self.pinger.ping(subject, self.config.ping_count, cancel).await {
            Ok(ping) => ping,
            Err(e) => {
                warn!(address = %subject.address(), error = %e, "ping failed, skipping subject");
                subject.set_result_type(ResultType::Dead);
                subject.abort_scanning();
                return None;
            }
        };

        let value = if ping.is_alive() {
            subject.set_result_type(ResultType::Alive);
            if self.config.adapt_port_timeout {
                subject.adapt_port_timeout(&ping, &self.config);
            }
            ping.average_time().map(ScanValue::Latency)
        } else {
            subject.set_result_type(ResultType::Dead);
            if !self.config.scan_dead_hosts {
                subject.abort_scanning();
            }
            None
        };

        subject.ping_result = Some(ping);
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PingResult;
    use std::io;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    enum Outcome {
        Replies(Vec<u64>),
        Fail,
    }

    struct FixedPinger(Outcome);

    #[async_trait]
    impl Pinger for FixedPinger {
        async fn ping(
            &self,
            subject: &ScanningSubject,
            count: u32,
            _cancel: &CancellationToken,
        ) -> io::Result<PingResult> {
            match &self.0 {
                Outcome::Replies(ms) => {
                    let mut r = PingResult::new(subject.address(), count);
                    for m in ms {
                        r.add_reply(Duration::from_millis(*m));
                    }
                    Ok(r)
                }
                Outcome::Fail => Err(io::Error::from(io::ErrorKind::PermissionDenied)),
            }
        }
    }

    fn fetcher(outcome: Outcome, config: ScannerConfig) -> PingFetcher {
        PingFetcher::new(Arc::new(FixedPinger(outcome)), Arc::new(config))
    }

    fn subject() -> ScanningSubject {
        ScanningSubject::new(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10)))
    }

    #[tokio::test]
    async fn alive_subject_reports_average_and_adapts_timeout() {
        let config = ScannerConfig::default();
        let f = fetcher(Outcome::Replies(vec![100, 300]), config.clone());
        let mut s = subject();
        let value = f.scan(&mut s, &CancellationToken::new()).await;

        assert_eq!(value, Some(ScanValue::Latency(Duration::from_millis(200))));
        assert_eq!(s.result_type(), ResultType::Alive);
        assert!(!s.is_scanning_aborted());
        assert_eq!(s.adapted_port_timeout(&config), Duration::from_millis(900));
        assert_eq!(s.ping_result.as_ref().map(|p| p.reply_count()), Some(2));
    }

    #[tokio::test]
    async fn dead_subject_is_aborted_unless_dead_hosts_scanned() {
        let f = fetcher(Outcome::Replies(vec![]), ScannerConfig::default());
        let mut s = subject();
        assert_eq!(f.scan(&mut s, &CancellationToken::new()).await, None);
        assert_eq!(s.result_type(), ResultType::Dead);
        assert!(s.is_scanning_aborted());

        let config = ScannerConfig {
            scan_dead_hosts: true,
            ..ScannerConfig::default()
        };
        let f = fetcher(Outcome::Replies(vec![]), config);
        let mut s = subject();
        assert_eq!(f.scan(&mut s, &CancellationToken::new()).await, None);
        assert!(!s.is_scanning_aborted());
    }

    #[tokio::test]
    async fn ping_error_skips_subject() {
        let f = fetcher(Outcome::Fail, ScannerConfig::default());
        let mut s = subject();
        assert_eq!(f.scan(&mut s, &CancellationToken::new()).await, None);
        assert!(s.is_scanning_aborted());
        assert!(s.ping_result.is_none());
    }
}
