//! Library crate for lan-probe-rs: host discovery and probing with pluggable
//! fetchers and exporters.
pub mod config;
pub mod error;
pub mod exporter;
pub mod feeder;
pub mod fetcher;
pub mod logging;
pub mod pinger;
pub mod ports;
pub mod scanner;
pub mod types;

pub use error::{Error, Result};
