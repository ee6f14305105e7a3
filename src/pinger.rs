//! Reachability probing.
//!
//! A [`Pinger`] runs `count` reachability attempts against a subject and
//! collects the round-trip times of the successful ones. The primitive that
//! answers "is this address reachable within the timeout" sits behind the
//! [`Reachability`] trait.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::types::{PingResult, ScanningSubject};

#[async_trait]
pub trait Pinger: Send + Sync {
    /// Run `count` attempts. The returned result always reports `count`
    /// attempts, however many of them were answered or skipped by
    /// cancellation.
    async fn ping(
        &self,
        subject: &ScanningSubject,
        count: u32,
        cancel: &CancellationToken,
    ) -> io::Result<PingResult>;
}

#[async_trait]
pub trait Reachability: Send + Sync {
    /// `Ok(true)` when the address answered within `timeout`, `Ok(false)`
    /// when it did not. `ConnectionRefused` errors are treated as a missing
    /// reply by the pinger; any other error is fatal for the subject.
    async fn is_reachable(&self, address: IpAddr, timeout: Duration) -> io::Result<bool>;
}

/// Reachability via a TCP connect to the echo port, which needs no raw
/// socket privileges. A refused connection still proves the host is up: its
/// stack answered with a reset.
#[derive(Debug, Clone)]
pub struct TcpEchoReachability {
    port: u16,
}

impl TcpEchoReachability {
    pub const ECHO_PORT: u16 = 7;

    pub fn new() -> Self {
        Self {
            port: Self::ECHO_PORT,
        }
    }

    pub fn with_port(port: u16) -> Self {
        Self { port }
    }
}

impl Default for TcpEchoReachability {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Reachability for TcpEchoReachability {
    async fn is_reachable(&self, address: IpAddr, timeout: Duration) -> io::Result<bool> {
        let addr = SocketAddr::new(address, self.port);
        match time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(_stream)) => Ok(true),
            Ok(Err(e)) if e.kind() == io::ErrorKind::ConnectionRefused => Ok(true),
            Err(_elapsed) => Ok(false),
            Ok(Err(e)) if is_unreachable(&e) => Ok(false),
            Ok(Err(e)) => Err(e),
        }
    }
}

fn is_unreachable(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::HostUnreachable | io::ErrorKind::NetworkUnreachable | io::ErrorKind::TimedOut
    )
}

/// Pinger built on a [`Reachability`] primitive, timing each attempt
/// individually.
#[derive(Debug, Clone)]
pub struct ReachabilityPinger<R = TcpEchoReachability> {
    reachability: R,
    timeout: Duration,
}

impl ReachabilityPinger<TcpEchoReachability> {
    pub fn tcp_echo(timeout: Duration) -> Self {
        Self::new(TcpEchoReachability::new(), timeout)
    }
}

impl<R: Reachability> ReachabilityPinger<R> {
    pub fn new(reachability: R, timeout: Duration) -> Self {
        Self {
            reachability,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl<R: Reachability> Pinger for ReachabilityPinger<R> {
    async fn ping(
        &self,
        subject: &ScanningSubject,
        count: u32,
        cancel: &CancellationToken,
    ) -> io::Result<PingResult> {
        let address = subject.address();
        let mut result = PingResult::new(address, count);

        for attempt in 0..count {
            if cancel.is_cancelled() {
                break;
            }
            let start = Instant::now();
            let reachable = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                r = self.reachability.is_reachable(address, self.timeout) => r,
            };
            match reachable {
                Ok(true) => result.add_reply(start.elapsed()),
                Ok(false) => {}
                Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                    trace!(%address, attempt, "reachability probe refused");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(result)
    }
}
