use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::Fetcher;
use crate::types::{ScanValue, ScanningSubject};

/// The subject's own address; the first column of every result vector.
#[derive(Debug, Default, Clone, Copy)]
pub struct IpFetcher;

#[async_trait]
impl Fetcher for IpFetcher {
    fn id(&self) -> &str {
        super::IP
    }

    fn name(&self) -> &str {
        "IP"
    }

    async fn scan(
        &self,
        subject: &mut ScanningSubject,
        _cancel: &CancellationToken,
    ) -> Option<ScanValue> {
        Some(ScanValue::Address(subject.address()))
    }
}
