use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::Fetcher;
use crate::config::ScannerConfig;
use crate::error::Result;
use crate::ports::PortList;
use crate::types::{ResultType, ScanValue, ScanningSubject};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PortState {
    Open,
    Closed,
    Filtered,
}

/// TCP connect check of a port list.
///
/// Fills the subject's `open_ports` and `filtered_ports`, which later
/// port/text fetchers use to pick the ports they probe.
pub struct PortsFetcher {
    config: Arc<ScannerConfig>,
    default_ports: PortList,
}

impl PortsFetcher {
    pub fn new(config: Arc<ScannerConfig>) -> Result<Self> {
        let default_ports = config.port_list()?;
        Ok(Self {
            config,
            default_ports,
        })
    }

    fn ports_for<'a>(&'a self, subject: &'a ScanningSubject) -> &'a PortList {
        subject.requested_ports().unwrap_or(&self.default_ports)
    }
}

#[async_trait]
impl Fetcher for PortsFetcher {
    fn id(&self) -> &str {
        super::PORTS
    }

    fn name(&self) -> &str {
        "Ports"
    }

    async fn scan(
        &self,
        subject: &mut ScanningSubject,
        cancel: &CancellationToken,
    ) -> Option<ScanValue> {
        let ip = subject.address();
        let timeout = subject.adapted_port_timeout(&self.config);
        let sem = Arc::new(Semaphore::new(self.config.max_port_concurrency.max(1)));
        let mut set = JoinSet::new();

        for port in self.ports_for(subject).iter() {
            if cancel.is_cancelled() {
                break;
            }
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                p = sem.clone().acquire_owned() => match p {
                    Ok(p) => p,
                    Err(_) => break,
                },
            };
            let cancel = cancel.clone();

            set.spawn(async move {
                let _permit = permit;
                let state = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => PortState::Closed,
                    s = probe_port(SocketAddr::new(ip, port), timeout) => s,
                };
                (port, state)
            });
        }

        let mut open = BTreeSet::new();
        let mut filtered = BTreeSet::new();
        while let Some(res) = set.join_next().await {
            match res {
                Ok((port, PortState::Open)) => {
                    open.insert(port);
                }
                Ok((port, PortState::Filtered)) => {
                    filtered.insert(port);
                }
                Ok((_, PortState::Closed)) | Err(_) => {}
            }
        }

        subject.filtered_ports = Some(filtered);
        subject.open_ports = Some(open.clone());

        if open.is_empty() {
            None
        } else {
            subject.set_result_type(ResultType::WithPorts);
            Some(ScanValue::Ports(open))
        }
    }
}

async fn probe_port(addr: SocketAddr, timeout: Duration) -> PortState {
    match time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(_stream)) => PortState::Open,
        Ok(Err(e)) => {
            trace!(%addr, error = %e, "port closed");
            PortState::Closed
        }
        Err(_) => PortState::Filtered,
    }
}
