use std::path::PathBuf;

use thiserror::Error;

/// Outcome of a failed hardware command. Retry policy matches on the variant.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// I/O trouble; the same command may succeed if resent.
    #[error("transient failure: {0}")]
    Transient(String),
    /// Unknown device or channel, missing capability, value out of range.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl CommandError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CommandError::Transient(_))
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        CommandError::Configuration(msg.into())
    }
}

/// Failure to carry one request across the agent connection.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("i/o with {addr} failed: {source}")]
    Io {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("agent rejected '{request}'")]
    Rejected { request: String },
    #[error("unexpected response '{0}'")]
    BadResponse(String),
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: Box<DeliveryError>,
    },
}

impl From<DeliveryError> for CommandError {
    fn from(e: DeliveryError) -> Self {
        CommandError::Transient(e.to_string())
    }
}

/// Why the cooldown cycle stopped.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CycleError {
    #[error("cycle cancelled")]
    Cancelled,
    #[error("{step}: {device}::{channel} failed after {attempts} attempt(s): {source}")]
    CommandFailed {
        step: String,
        device: String,
        channel: String,
        attempts: u32,
        #[source]
        source: CommandError,
    },
    #[error("preflight check failed: {0}")]
    Preflight(String),
    #[error("cycle is already running")]
    AlreadyRunning,
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("io on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("sink unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
