//! Typed configuration, loaded from a TOML file via `toml::from_str`
//! followed by an explicit `validate()` pass, with every knob defaulted.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::model::{Pair, SourceId};

/// Default trust weight applied to a source absent from `source_weights`.
pub const DEFAULT_SOURCE_WEIGHT: f64 = 0.5;

fn default_source_weights() -> HashMap<SourceId, f64> {
    [
        ("okx", 1.0),
        ("binance", 1.0),
        ("coinbase", 0.9),
        ("raydium", 0.8),
        ("orca", 0.8),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

/// Knobs for outlier filtering, the three calculators, and store retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    pub z_score_threshold: f64,
    pub iqr_multiplier: f64,
    pub min_data_points: usize,
    pub max_age_ms: u64,
    pub vwap_window_ms: u64,
    pub twap_window_ms: u64,
    pub min_volume: f64,
    pub max_history_size: usize,
    pub source_weights: HashMap<SourceId, f64>,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            z_score_threshold: 2.5,
            iqr_multiplier: 1.5,
            min_data_points: 3,
            max_age_ms: 300_000,
            vwap_window_ms: 3_600_000,
            twap_window_ms: 3_600_000,
            min_volume: 0.01,
            max_history_size: 1000,
            source_weights: default_source_weights(),
        }
    }
}

impl AggregationConfig {
    pub fn source_weight(&self, source: &str) -> f64 {
        self.source_weights
            .get(source)
            .copied()
            .unwrap_or(DEFAULT_SOURCE_WEIGHT)
    }

    fn validate(&self) -> EngineResult<()> {
        if self.min_data_points == 0 {
            return Err(EngineError::ConfigError(
                "min_data_points must be greater than 0".into(),
            ));
        }
        if self.z_score_threshold <= 0.0 {
            return Err(EngineError::ConfigError(
                "z_score_threshold must be positive".into(),
            ));
        }
        if self.iqr_multiplier <= 0.0 {
            return Err(EngineError::ConfigError(
                "iqr_multiplier must be positive".into(),
            ));
        }
        if self.max_history_size == 0 {
            return Err(EngineError::ConfigError(
                "max_history_size must be greater than 0".into(),
            ));
        }
        for (name, weight) in &self.source_weights {
            if !(0.0..=1.0).contains(weight) {
                return Err(EngineError::ConfigError(format!(
                    "source weight for {name} must be in [0, 1], got {weight}"
                )));
            }
        }
        Ok(())
    }
}

/// Per-`(pair, source)` retry/backoff schedule. Backoff is `2^attempt`
/// seconds, capped so a misconfigured retry count cannot stall a tick
/// indefinitely.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub retry_attempts: u32,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 3,
            max_backoff_ms: 30_000,
        }
    }
}

impl RetryConfig {
    /// Exponential backoff for a given (zero-indexed) retry attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> std::time::Duration {
        let seconds = 2u64.saturating_pow(attempt);
        let ms = seconds.saturating_mul(1000).min(self.max_backoff_ms);
        std::time::Duration::from_millis(ms)
    }

    fn validate(&self) -> EngineResult<()> {
        if self.max_backoff_ms == 0 {
            return Err(EngineError::ConfigError(
                "max_backoff_ms must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// Whether a configured source participates in collection ticks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub enabled: bool,
    /// Base price for `SyntheticSource`; ignored by HTTP-backed sources.
    #[serde(default)]
    pub synthetic_base_price: Option<f64>,
    /// Base URL for `HttpSource`; ignored by the synthetic source.
    #[serde(default)]
    pub base_url: Option<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            synthetic_base_price: None,
            base_url: None,
        }
    }
}

/// Scheduler cadence, timeouts, retry policy, and the `(pair, source)`
/// fan-out matrix.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    pub collect_interval_ms: u64,
    pub request_timeout_ms: u64,
    pub retry: RetryConfig,
    pub max_in_flight: usize,
    pub pairs: Vec<Pair>,
    pub sources: HashMap<SourceId, SourceConfig>,
    pub token_mappings: HashMap<Pair, HashMap<SourceId, String>>,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            collect_interval_ms: 30_000,
            request_timeout_ms: 10_000,
            retry: RetryConfig::default(),
            max_in_flight: 64,
            pairs: Vec::new(),
            sources: HashMap::new(),
            token_mappings: HashMap::new(),
        }
    }
}

impl CollectorConfig {
    pub fn enabled_sources(&self) -> Vec<&SourceId> {
        self.sources
            .iter()
            .filter(|(_, cfg)| cfg.enabled)
            .map(|(name, _)| name)
            .collect()
    }

    fn validate(&self) -> EngineResult<()> {
        if self.collect_interval_ms == 0 {
            return Err(EngineError::ConfigError(
                "collect_interval_ms must be greater than 0".into(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(EngineError::ConfigError(
                "request_timeout_ms must be greater than 0".into(),
            ));
        }
        if self.max_in_flight == 0 {
            return Err(EngineError::ConfigError(
                "max_in_flight must be greater than 0".into(),
            ));
        }
        self.retry.validate()?;
        Ok(())
    }
}

/// Top-level configuration loaded from a single TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub aggregation: AggregationConfig,
    pub collector: CollectorConfig,
}

impl EngineConfig {
    pub fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            EngineError::ConfigError(format!(
                "failed to read config file {}: {e}",
                path.as_ref().display()
            ))
        })?;
        let config: EngineConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> EngineResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| EngineError::ConfigError(format!("failed to serialize config: {e}")))?;
        fs::write(path.as_ref(), content)?;
        Ok(())
    }

    pub fn validate(&self) -> EngineResult<()> {
        self.aggregation.validate()?;
        self.collector.validate()?;
        Ok(())
    }
}
