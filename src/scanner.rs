use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ::time::{format_description::well_known, OffsetDateTime};
use tokio::task::{self, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::ScannerConfig;
use crate::error::Result;
use crate::exporter::{Exporter, Sink};
use crate::feeder::{Feeder, SubjectIter};
use crate::fetcher::Fetcher;
use crate::types::{ResultType, ScanResult, ScanSummary, ScanningSubject};

/// Progress counters readable while a scan runs.
#[derive(Clone, Debug, Default)]
pub struct SharedProgress {
    pub scanned_done: Arc<AtomicU64>,
    pub alive_count: Arc<AtomicU64>,
    pub with_ports_count: Arc<AtomicU64>,
}

impl SharedProgress {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, result_type: ResultType) {
        self.scanned_done.fetch_add(1, Ordering::Relaxed);
        match result_type {
            ResultType::Alive => {
                self.alive_count.fetch_add(1, Ordering::Relaxed);
            }
            ResultType::WithPorts => {
                self.alive_count.fetch_add(1, Ordering::Relaxed);
                self.with_ports_count.fetch_add(1, Ordering::Relaxed);
            }
            ResultType::Dead | ResultType::Unknown => {}
        }
    }
}

/// Runs an ordered list of fetchers over a stream of subjects.
///
/// Subjects are scanned concurrently, up to `max_threads` at a time; the
/// fetchers of one subject run one after another because they share the
/// subject. Results are handed out in completion order from a single loop,
/// so an exporter driven from `on_result` never sees concurrent calls.
pub struct Scanner {
    fetchers: Arc<Vec<Arc<dyn Fetcher>>>,
    config: Arc<ScannerConfig>,
}

impl Scanner {
    pub fn new(fetchers: Vec<Arc<dyn Fetcher>>, config: Arc<ScannerConfig>) -> Self {
        Self {
            fetchers: Arc::new(fetchers),
            config,
        }
    }

    pub fn fetcher_names(&self) -> Vec<String> {
        self.fetchers.iter().map(|f| f.name().to_string()).collect()
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Scan every subject and pass each result to `on_result`.
    ///
    /// Cancelling `cancel` stops new subjects from starting; subjects already
    /// in flight wind down through their own cancellation checks and are
    /// still reported. An error from `on_result` cancels the scan and is
    /// returned.
    pub async fn scan<F>(
        &self,
        subjects: SubjectIter,
        cancel: CancellationToken,
        progress: SharedProgress,
        mut on_result: F,
    ) -> Result<ScanSummary>
    where
        F: FnMut(ScanResult) -> Result<()>,
    {
        let started = now_rfc3339();
        let max_threads = self.config.max_threads.clamp(1, 5_000);
        let mut set: JoinSet<ScanResult> = JoinSet::new();
        let mut in_flight: HashMap<task::Id, IpAddr> = HashMap::new();
        let mut subjects = subjects;
        let mut total = 0u64;

        loop {
            if cancel.is_cancelled() {
                break;
            }
            if set.len() >= max_threads {
                if let Some(res) = set.join_next_with_id().await {
                    self.deliver(res, &mut in_flight, &progress, &cancel, &mut on_result)?;
                }
                continue;
            }
            let Some(subject) = subjects.next() else {
                break;
            };
            total += 1;
            let address = subject.address();
            let fetchers = self.fetchers.clone();
            let task_cancel = cancel.clone();
            let handle =
                set.spawn(async move { scan_subject(&fetchers, subject, &task_cancel).await });
            in_flight.insert(handle.id(), address);

            while let Some(res) = set.try_join_next_with_id() {
                self.deliver(res, &mut in_flight, &progress, &cancel, &mut on_result)?;
            }
        }

        while let Some(res) = set.join_next_with_id().await {
            self.deliver(res, &mut in_flight, &progress, &cancel, &mut on_result)?;
        }

        let summary = ScanSummary {
            total_subjects: total,
            scanned: progress.scanned_done.load(Ordering::Relaxed),
            alive: progress.alive_count.load(Ordering::Relaxed),
            with_ports: progress.with_ports_count.load(Ordering::Relaxed),
            cancelled: cancel.is_cancelled(),
            started,
            finished: now_rfc3339(),
        };
        info!(
            scanned = summary.scanned,
            alive = summary.alive,
            with_ports = summary.with_ports,
            cancelled = summary.cancelled,
            "scan finished"
        );
        Ok(summary)
    }

    /// Hand one finished subject to `on_result`. A subject whose task
    /// panicked is still reported, with every column empty.
    fn deliver<F>(
        &self,
        res: std::result::Result<(task::Id, ScanResult), JoinError>,
        in_flight: &mut HashMap<task::Id, IpAddr>,
        progress: &SharedProgress,
        cancel: &CancellationToken,
        on_result: &mut F,
    ) -> Result<()>
    where
        F: FnMut(ScanResult) -> Result<()>,
    {
        let result = match res {
            Ok((id, result)) => {
                in_flight.remove(&id);
                result
            }
            Err(e) => {
                let Some(address) = in_flight.remove(&e.id()) else {
                    warn!(error = %e, "unknown subject task failed");
                    return Ok(());
                };
                warn!(%address, error = %e, "subject task failed");
                ScanResult {
                    address,
                    result_type: ResultType::Unknown,
                    values: vec![None; self.fetchers.len()],
                }
            }
        };
        progress.record(result.result_type);
        if let Err(e) = on_result(result) {
            cancel.cancel();
            return Err(e);
        }
        Ok(())
    }

    /// Scan the feeder's subjects and stream the results through `exporter`.
    pub async fn export(
        &self,
        feeder: &dyn Feeder,
        exporter: &mut dyn Exporter,
        sink: Sink,
        cancel: CancellationToken,
        progress: SharedProgress,
    ) -> Result<ScanSummary> {
        info!(
            targets = %feeder.info(),
            hosts = ?feeder.len_hint(),
            exporter = exporter.id(),
            "scan started"
        );

        exporter.start(sink, &feeder.info())?;
        exporter.set_fetchers(&self.fetcher_names())?;
        let summary = self
            .scan(feeder.subjects(), cancel, progress, |result| {
                exporter.next_address_results(&result.values)
            })
            .await?;
        exporter.end()?;
        Ok(summary)
    }
}

/// Run all fetchers for one subject. Once a fetcher aborts the subject, the
/// remaining columns stay empty.
async fn scan_subject(
    fetchers: &[Arc<dyn Fetcher>],
    mut subject: ScanningSubject,
    cancel: &CancellationToken,
) -> ScanResult {
    let mut values = Vec::with_capacity(fetchers.len());
    for fetcher in fetchers {
        if subject.is_scanning_aborted() {
            values.push(None);
            continue;
        }
        values.push(fetcher.scan(&mut subject, cancel).await);
    }
    ScanResult {
        address: subject.address(),
        result_type: subject.result_type(),
        values,
    }
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}
