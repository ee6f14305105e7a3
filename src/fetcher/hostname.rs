use std::time::Duration;

use async_trait::async_trait;
use dns_lookup::lookup_addr;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::Fetcher;
use crate::types::{ScanValue, ScanningSubject};

/// Reverse DNS name of the subject.
///
/// The resolver call is blocking, so it runs on the blocking pool and is
/// bounded by `timeout`. A lookup that outlives the timeout is abandoned,
/// not interrupted.
#[derive(Debug, Clone)]
pub struct HostnameFetcher {
    timeout: Duration,
}

impl HostnameFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Fetcher for HostnameFetcher {
    fn id(&self) -> &str {
        super::HOSTNAME
    }

    fn name(&self) -> &str {
        "Hostname"
    }

    async fn scan(
        &self,
        subject: &mut ScanningSubject,
        cancel: &CancellationToken,
    ) -> Option<ScanValue> {
        let address = subject.address();
        let lookup = tokio::task::spawn_blocking(move || lookup_addr(&address));

        let name = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            res = time::timeout(self.timeout, lookup) => match res {
                Ok(Ok(Ok(name))) => name,
                Ok(Ok(Err(e))) => {
                    trace!(%address, error = %e, "reverse lookup failed");
                    return None;
                }
                Ok(Err(_join)) => return None,
                Err(_elapsed) => {
                    trace!(%address, "reverse lookup timed out");
                    return None;
                }
            },
        };

        // Resolvers echo the address back when there is no PTR record.
        if name.is_empty() || name == address.to_string() {
            None
        } else {
            Some(ScanValue::Text(name))
        }
    }
}
