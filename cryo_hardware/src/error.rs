use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    #[error("{device}: unknown channel '{channel}'")]
    UnknownChannel { device: String, channel: String },
    #[error("{channel} is not configured as 'Set out' (current IOType: {iotype})")]
    NotSetOut { channel: String, iotype: String },
    #[error("voltage {0} V outside [-10, 10] V")]
    VoltageOutOfRange(f64),
    #[error("still output {0} % outside [0, 100] %")]
    PercentOutOfRange(f64),
    #[error("instrument response timeout")]
    Timeout,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

impl HwError {
    /// Whether the same transaction may succeed if simply resent.
    pub fn is_transient(&self) -> bool {
        matches!(self, HwError::Timeout | HwError::Io(_))
    }
}

pub type Result<T> = std::result::Result<T, HwError>;
