use std::fs::OpenOptions;
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;

use lan_probe_rs::config::ScannerConfig;
use lan_probe_rs::exporter::{self, Exporter};
use lan_probe_rs::feeder::{self, CidrFeeder, Feeder, ListFeeder, RangeFeeder};
use lan_probe_rs::fetcher::FetcherRegistry;
use lan_probe_rs::logging::{init_logging, LogConfig, LogFormat};
use lan_probe_rs::ports::load_ports_from_path;
use lan_probe_rs::scanner::{Scanner, SharedProgress};
use lan_probe_rs::types::{display_value, ScanResult, ScanSummary};

/// lan-probe-rs: async LAN host discovery and probing.
#[derive(Debug, Clone, Parser)]
#[command(name = "lan-probe-rs", version, about, long_about = None)]
struct Cli {
    /// Inclusive IPv4 range, e.g. 192.168.1.1-192.168.1.254.
    #[arg(long, conflicts_with_all = ["targets", "list"])]
    range: Option<String>,

    /// CIDR (e.g. 192.168.1.0/24) or a single address. If no target is
    /// given, the first local IPv4 /24 is scanned.
    #[arg(long, conflicts_with = "list")]
    targets: Option<String>,

    /// File with one `address[:ports]` per line.
    #[arg(long)]
    list: Option<PathBuf>,

    /// Comma-separated fetcher ids; the IP column is always first.
    #[arg(
        long,
        value_delimiter = ',',
        default_values = ["ip", "ping", "hostname", "ports", "webDetect"]
    )]
    fetchers: Vec<String>,

    /// Ports for the ports fetcher, e.g. `22,80,8000-8100`.
    #[arg(long, conflicts_with = "ports_file")]
    ports: Option<String>,

    /// File with one port or range per line, `#` starts a comment.
    #[arg(long)]
    ports_file: Option<PathBuf>,

    /// TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Export results to this file instead of printing a table.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Exporter to use (sql, csv, json). Defaults to the output file extension.
    #[arg(long)]
    format: Option<String>,

    /// Append to the output file without writing a header or schema.
    #[arg(long, default_value_t = false)]
    append: bool,

    /// Subjects scanned concurrently.
    #[arg(long)]
    threads: Option<usize>,

    /// Base port timeout in milliseconds.
    #[arg(long = "timeout-ms")]
    timeout_ms: Option<u64>,

    /// Ping timeout in milliseconds.
    #[arg(long = "ping-timeout-ms")]
    ping_timeout_ms: Option<u64>,

    /// Run all fetchers even for hosts that did not answer pings.
    #[arg(long, default_value_t = false)]
    scan_dead_hosts: bool,

    /// Log filter used when RUST_LOG is unset.
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Log format: pretty, compact or json.
    #[arg(long, default_value = "compact")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(
        LogConfig::default()
            .level(cli.log_level.clone())
            .format(cli.log_format),
    );

    let config = Arc::new(load_config(&cli)?);
    let feeder = build_feeder(&cli)?;
    let registry = FetcherRegistry::new(config.clone());
    let fetchers = registry
        .create_all(&cli.fetchers)
        .context("failed to set up fetchers")?;
    let scanner = Scanner::new(fetchers, config.clone());

    println!("lan-probe-rs configuration:");
    println!("  targets      : {}", feeder.info());
    println!("  fetchers     : {}", scanner.fetcher_names().join(", "));
    println!("  threads      : {}", config.max_threads);
    println!("  port timeout : {} ms", config.port_timeout_ms);
    println!(
        "  output       : {}",
        cli.output
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<stdout>".to_string())
    );

    let cancel = CancellationToken::new();
    let cancel_ctrlc = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        cancel_ctrlc.cancel();
    });

    let progress = SharedProgress::new();
    let summary = match cli.output.as_deref() {
        Some(path) => {
            let mut exporter: Box<dyn Exporter> = match cli.format.as_deref() {
                Some(format) => exporter::by_id(format)?,
                None => exporter::for_path(path)
                    .context("cannot infer the export format, use --format")?,
            };
            exporter.set_append(cli.append);
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .append(cli.append)
                .truncate(!cli.append)
                .open(path)
                .with_context(|| format!("failed to open {}", path.display()))?;
            let summary = scanner
                .export(
                    &*feeder,
                    &mut *exporter,
                    Box::new(BufWriter::new(file)),
                    cancel,
                    progress,
                )
                .await
                .with_context(|| format!("export to {} failed", path.display()))?;
            println!("Wrote results to {}", path.display());
            summary
        }
        None => {
            let mut results = Vec::new();
            let summary = scanner
                .scan(feeder.subjects(), cancel, progress, |r| {
                    results.push(r);
                    Ok(())
                })
                .await?;
            results.sort_by_key(|r| r.address);
            print_results_table(&scanner.fetcher_names(), &results);
            summary
        }
    };

    print_summary(&summary);
    Ok(())
}

fn load_config(cli: &Cli) -> Result<ScannerConfig> {
    let mut config = match cli.config.as_deref() {
        Some(path) => ScannerConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => ScannerConfig::default(),
    };
    if let Some(ports) = &cli.ports {
        config.ports = ports.clone();
    }
    if let Some(path) = &cli.ports_file {
        let ports = load_ports_from_path(path)
            .with_context(|| format!("failed to read ports file {}", path.display()))?;
        config.ports = ports.to_string();
    }
    if let Some(threads) = cli.threads {
        config.max_threads = threads;
    }
    if let Some(ms) = cli.timeout_ms {
        config.port_timeout_ms = ms;
        config.min_port_timeout_ms = config.min_port_timeout_ms.min(ms);
    }
    if let Some(ms) = cli.ping_timeout_ms {
        config.ping_timeout_ms = ms;
    }
    if cli.scan_dead_hosts {
        config.scan_dead_hosts = true;
    }
    config.validate()?;
    Ok(config)
}

fn build_feeder(cli: &Cli) -> Result<Box<dyn Feeder>> {
    if let Some(range) = &cli.range {
        return Ok(Box::new(range.parse::<RangeFeeder>()?));
    }
    if let Some(targets) = &cli.targets {
        return Ok(Box::new(targets.parse::<CidrFeeder>()?));
    }
    if let Some(path) = &cli.list {
        let feeder = ListFeeder::load(path)
            .with_context(|| format!("failed to read host list {}", path.display()))?;
        return Ok(Box::new(feeder));
    }

    let cidrs = feeder::detect_local_cidrs().context("failed to detect local networks")?;
    match cidrs.first() {
        Some(cidr) => Ok(Box::new(CidrFeeder::new((*cidr).into()))),
        None => bail!("no local IPv4 network found, pass --range, --targets or --list"),
    }
}

fn print_results_table(names: &[String], results: &[ScanResult]) {
    const MAX_WIDTH: usize = 40;

    let rows: Vec<Vec<String>> = results
        .iter()
        .map(|r| {
            r.values
                .iter()
                .map(|v| {
                    let mut s = display_value(v);
                    if s.chars().count() > MAX_WIDTH {
                        s = s.chars().take(MAX_WIDTH).collect();
                    }
                    s
                })
                .collect()
        })
        .collect();

    let mut widths: Vec<usize> = names.iter().map(|n| n.len()).collect();
    for row in &rows {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.chars().count());
        }
    }

    println!();
    println!("{}", format_row(names, &widths));
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    println!("{}", format_row(&rule, &widths));
    for row in &rows {
        println!("{}", format_row(row, &widths));
    }
}

fn format_row(cells: &[String], widths: &[usize]) -> String {
    cells
        .iter()
        .zip(widths)
        .map(|(c, w)| format!("{c:<w$}", w = *w))
        .collect::<Vec<_>>()
        .join("  ")
}

fn print_summary(summary: &ScanSummary) {
    println!(
        "\nScanned: {} of {}, alive: {}, with ports: {}{}",
        summary.scanned,
        summary.total_subjects,
        summary.alive,
        summary.with_ports,
        if summary.cancelled { " (cancelled)" } else { "" }
    );
    println!("Started {}, finished {}", summary.started, summary.finished);
}
