//! In-memory observation store. One `RwLock<PairSeries>` per pair, reached
//! through an outer `RwLock<HashMap<..>>` that is only ever held long
//! enough to find-or-create the per-pair entry — callers never hold the
//! outer lock while touching a series, and never hold a series lock across
//! an `.await`.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::AggregationConfig;
use crate::metrics::EngineMetrics;
use crate::model::{Observation, Pair};

#[derive(Debug, Clone, Default, Serialize)]
pub struct PairStats {
    pub count: usize,
    pub oldest_age_ms: Option<u64>,
    pub newest_age_ms: Option<u64>,
    pub sources: Vec<String>,
}

/// Store-wide counts, as spec'd for `ObservationStore::stats()`: how many
/// pairs are known, and how many observations (and volume-bearing
/// observations) are currently retained across all of them.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub pairs: usize,
    pub total_observations: usize,
    pub total_volume_observations: usize,
}

#[derive(Default)]
struct PairSeries {
    observations: VecDeque<Observation>,
}

/// Holds the most recent observations per pair, evicting by age and by
/// capacity on every insert.
pub struct ObservationStore {
    pairs: RwLock<HashMap<Pair, Arc<RwLock<PairSeries>>>>,
    config: AggregationConfig,
    metrics: Arc<EngineMetrics>,
}

impl ObservationStore {
    pub fn new(config: &AggregationConfig) -> Self {
        Self {
            pairs: RwLock::new(HashMap::new()),
            config: config.clone(),
            metrics: Arc::new(EngineMetrics::default()),
        }
    }

    /// Engine-wide counters this store feeds as observations arrive.
    /// The query facade shares this handle so calculator invocations are
    /// counted against the same totals.
    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }

    fn series_for(&self, pair: &str) -> Arc<RwLock<PairSeries>> {
        if let Some(series) = self.pairs.read().unwrap().get(pair) {
            return Arc::clone(series);
        }
        let mut pairs = self.pairs.write().unwrap();
        Arc::clone(
            pairs
                .entry(pair.to_string())
                .or_insert_with(|| Arc::new(RwLock::new(PairSeries::default()))),
        )
    }

    /// Records one observation, deriving its `weight` from the source
    /// weight table (the caller-supplied weight is discarded), then
    /// evicts anything older than `maxAge` or beyond `maxHistorySize`,
    /// oldest first.
    pub fn insert(&self, pair: &str, mut observation: Observation) {
        observation.weight = self.config.source_weight(&observation.source);
        let series = self.series_for(pair);
        let mut series = series.write().unwrap();
        series.observations.push_back(observation);
        self.evict(&mut series);
        self.metrics.record_point();
    }

    fn evict(&self, series: &mut PairSeries) {
        let max_age = std::time::Duration::from_millis(self.config.max_age_ms);
        let now = Instant::now();
        while let Some(front) = series.observations.front() {
            if now.duration_since(front.recorded_at) > max_age {
                series.observations.pop_front();
            } else {
                break;
            }
        }
        while series.observations.len() > self.config.max_history_size {
            series.observations.pop_front();
        }
    }

    /// Live (non-evicted) observations for a pair, oldest first. When
    /// `since_window` is given, only observations within that window of
    /// now are returned, in addition to whatever `maxAge` eviction has
    /// already dropped.
    pub fn snapshot(&self, pair: &str, since_window: Option<Duration>) -> Vec<Observation> {
        let Some(series) = self.pairs.read().unwrap().get(pair).cloned() else {
            return Vec::new();
        };
        let mut series = series.write().unwrap();
        self.evict(&mut series);
        let now = Instant::now();
        series
            .observations
            .iter()
            .filter(|o| match since_window {
                Some(window) => now.saturating_duration_since(o.recorded_at) <= window,
                None => true,
            })
            .cloned()
            .collect()
    }

    /// The parallel "volume sequence": live observations carrying a
    /// volume at or above `minVolume` — the input VWAP requires.
    pub fn volume_snapshot(&self, pair: &str, since_window: Option<Duration>) -> Vec<Observation> {
        self.snapshot(pair, since_window)
            .into_iter()
            .filter(|o| o.volume_f64().is_some_and(|v| v >= self.config.min_volume))
            .collect()
    }

    pub fn clear(&self, pair: &str) {
        if let Some(series) = self.pairs.read().unwrap().get(pair) {
            series.write().unwrap().observations.clear();
        }
    }

    pub fn clear_all(&self) {
        self.pairs.write().unwrap().clear();
    }

    pub fn known_pairs(&self) -> Vec<Pair> {
        self.pairs.read().unwrap().keys().cloned().collect()
    }

    pub fn pair_stats(&self, pair: &str) -> PairStats {
        let observations = self.snapshot(pair, None);
        if observations.is_empty() {
            return PairStats::default();
        }
        let now = Instant::now();
        let oldest = observations.iter().map(|o| o.recorded_at).min().unwrap();
        let newest = observations.iter().map(|o| o.recorded_at).max().unwrap();
        let mut sources: Vec<String> = observations
            .iter()
            .map(|o| o.source.clone())
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();
        sources.sort();
        PairStats {
            count: observations.len(),
            oldest_age_ms: Some(now.duration_since(oldest).as_millis() as u64),
            newest_age_ms: Some(now.duration_since(newest).as_millis() as u64),
            sources,
        }
    }

    /// Count of known pairs, total retained observations, and total
    /// volume-bearing observations across all of them — the store-wide
    /// `stats()` the spec calls for, as distinct from [`Self::pair_stats`].
    pub fn global_stats(&self) -> StoreStats {
        let pairs = self.known_pairs();
        let mut total_observations = 0;
        let mut total_volume_observations = 0;
        for pair in &pairs {
            total_observations += self.snapshot(pair, None).len();
            total_volume_observations += self.volume_snapshot(pair, None).len();
        }
        StoreStats {
            pairs: pairs.len(),
            total_observations,
            total_volume_observations,
        }
    }
}
