//! Error types for the station model, its statistics and configuration loading.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StationError>;

#[derive(Debug, Error)]
pub enum StationError {
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Insufficient sample size: need at least {required} observations, got {actual}")]
    InsufficientSampleSize { required: usize, actual: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Numeric overflow while computing {0}")]
    NumericOverflow(String),

    #[error("Cannot read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot parse configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl StationError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        StationError::InvalidConfiguration(message.into())
    }
}
