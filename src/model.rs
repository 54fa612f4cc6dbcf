//! Core data model: pairs, source identifiers, observations, and the
//! values the aggregation engine produces.

use std::collections::BTreeMap;
use std::time::{Instant, SystemTime};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize, Serializer};

/// A symbolic trading-pair identifier such as `"SOL/USDC"`. Equality is
/// exact string match; no normalization is performed.
pub type Pair = String;

/// A short symbolic source name such as `"okx"` or `"mock"`.
pub type SourceId = String;

/// One immutable price/volume record produced by a source.
#[derive(Debug, Clone)]
pub struct Observation {
    pub price: Decimal,
    pub volume: Option<Decimal>,
    /// Monotonic instant used for all age/window arithmetic.
    pub recorded_at: Instant,
    /// Wall-clock stamp carried for provenance/display only.
    pub timestamp: SystemTime,
    pub source: SourceId,
    /// Source trust weight. Adapters may stamp a provisional value, but
    /// [`crate::store::ObservationStore::insert`] always overwrites it
    /// with the configured weight for `source` before storing — the
    /// weight is derived from the source table at insertion time, not
    /// chosen by the adapter.
    pub weight: f64,
    pub metadata: BTreeMap<String, String>,
}

impl Observation {
    pub fn new(price: Decimal, volume: Option<Decimal>, source: impl Into<String>, weight: f64) -> Self {
        Self {
            price,
            volume,
            recorded_at: Instant::now(),
            timestamp: SystemTime::now(),
            source: source.into(),
            weight,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn price_f64(&self) -> f64 {
        self.price.try_into().unwrap_or(f64::NAN)
    }

    pub fn volume_f64(&self) -> Option<f64> {
        self.volume.and_then(|v| v.try_into().ok())
    }
}

/// Which aggregation algorithm produced a result, or was asked to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    Vwap,
    Twap,
    Weighted,
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Algorithm::Vwap => write!(f, "vwap"),
            Algorithm::Twap => write!(f, "twap"),
            Algorithm::Weighted => write!(f, "weighted"),
        }
    }
}

/// Per-algorithm metadata attached to an [`AggregationResult`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct AlgorithmDetail {
    pub total_volume: Option<f64>,
    pub mean_volume: Option<f64>,
    pub time_span_secs: Option<f64>,
    pub price_stddev: Option<f64>,
}

/// The output of one aggregation calculator run (VWAP, TWAP, or weighted
/// mean). Computed on demand, never cached by the engine itself.
#[derive(Debug, Clone, Serialize)]
pub struct AggregationResult {
    pub pair: Pair,
    pub algorithm: Algorithm,
    pub price: f64,
    pub sources: Vec<SourceId>,
    pub inputs_used: usize,
    pub outliers_removed: usize,
    pub confidence: f64,
    pub min_price: f64,
    pub max_price: f64,
    pub detail: AlgorithmDetail,
}

/// Serializes as a Unix epoch in seconds, matching the timestamp
/// convention every oracle client payload in the reference pack uses.
fn serialize_unix_timestamp<S>(ts: &SystemTime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_i64(DateTime::<Utc>::from(*ts).timestamp())
}

/// The payload returned by the best-price selector / `currentPrice`.
#[derive(Debug, Clone, Serialize)]
pub struct AggregatedPrice {
    pub pair: Pair,
    pub price: f64,
    pub algorithm: Algorithm,
    pub confidence: f64,
    pub inputs_used: usize,
    pub outliers: usize,
    pub sources: Vec<SourceId>,
    #[serde(serialize_with = "serialize_unix_timestamp")]
    pub timestamp: SystemTime,
}

impl From<AggregationResult> for AggregatedPrice {
    fn from(r: AggregationResult) -> Self {
        AggregatedPrice {
            pair: r.pair,
            price: r.price,
            algorithm: r.algorithm,
            confidence: r.confidence,
            inputs_used: r.inputs_used,
            outliers: r.outliers_removed,
            sources: r.sources,
            timestamp: SystemTime::now(),
        }
    }
}
