//! Error types for the aggregation engine and the source adapters.

use thiserror::Error;

use crate::model::Algorithm;

/// Failures an individual [`crate::sources::PriceSource`] can report.
/// These never escape the scheduler as [`EngineError`] — they are caught,
/// counted, and the affected `(pair, source, tick)` is dropped.
#[derive(Error, Debug, Clone)]
pub enum SourceError {
    #[error("network error: {0}")]
    NetworkError(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("failed to parse source response: {0}")]
    ParseError(String),

    #[error("source does not support pair {0}")]
    Unsupported(String),

    #[error("fetch cancelled")]
    Cancelled,
}

/// Failures the aggregation engine and query facade can report.
#[derive(Error, Debug, Clone)]
pub enum EngineError {
    #[error("fewer than {required} observations available (have {available})")]
    InsufficientData { required: usize, available: usize },

    #[error("no observation met the volume floor for VWAP")]
    NoVolumeData,

    #[error("outlier filtering removed every observation")]
    AllOutliers,

    #[error("combined weights summed to zero")]
    ZeroWeight,

    #[error("no algorithm produced a result: {0:?}")]
    NoAlgorithmSucceeded(Vec<(Algorithm, EngineError)>),

    #[error("invalid configuration: {0}")]
    ConfigError(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
pub type SourceResult<T> = Result<T, SourceError>;

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::ConfigError(err.to_string())
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(err: toml::de::Error) -> Self {
        EngineError::ConfigError(err.to_string())
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SourceError::NetworkError(format!("timed out: {err}"))
        } else {
            SourceError::NetworkError(err.to_string())
        }
    }
}
