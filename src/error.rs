//! Error types for lan-probe-rs.
//!
//! Expected network outcomes (refused, reset, timed out) never become an
//! [`Error`]; probes report them as absent values instead.

use thiserror::Error;

/// Result type alias using the crate [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid matching regexp: {0}")]
    InvalidRegex(#[from] regex::Error),

    #[error("capture group {group} out of range, pattern has {available} group(s)")]
    CaptureGroupOutOfRange { group: usize, available: usize },

    #[error("invalid port specification `{spec}`: {reason}")]
    InvalidPorts { spec: String, reason: String },

    #[error("invalid target `{0}`")]
    InvalidTarget(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("unknown fetcher id `{0}`")]
    UnknownFetcher(String),

    #[error("unknown exporter `{0}`")]
    UnknownExporter(String),

    #[error("exporter used before start()")]
    ExporterNotStarted,
}

impl Error {
    pub(crate) fn invalid_ports(spec: &str, reason: impl Into<String>) -> Self {
        Error::InvalidPorts {
            spec: spec.to_string(),
            reason: reason.into(),
        }
    }
}
