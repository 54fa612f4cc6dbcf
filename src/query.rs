//! The facade callers (the CLI, the scheduler, and tests) use to record
//! observations and ask for prices. Owns no state of its own beyond a
//! shared handle to the store and the aggregation config.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::aggregation;
use crate::config::AggregationConfig;
use crate::error::EngineResult;
use crate::metrics::EngineMetricsSnapshot;
use crate::model::{AggregatedPrice, AggregationResult, Algorithm, Observation, Pair};
use crate::store::{ObservationStore, PairStats, StoreStats};

pub struct QueryFacade {
    store: Arc<ObservationStore>,
    config: AggregationConfig,
}

/// Everything `stats()` reports: the config in effect, store-wide
/// observation counts, and the cumulative calculator/point counters —
/// component 7's "configuration & metrics" surface.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub config: AggregationConfig,
    pub store: StoreStats,
    pub metrics: EngineMetricsSnapshot,
}

impl QueryFacade {
    pub fn new(store: Arc<ObservationStore>, config: AggregationConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &Arc<ObservationStore> {
        &self.store
    }

    pub fn record(&self, pair: &Pair, observation: Observation) {
        self.store.insert(pair, observation);
    }

    fn note_calculation(&self, result: EngineResult<AggregationResult>) -> EngineResult<AggregationResult> {
        match &result {
            Ok(r) => self.store.metrics().record_calculation(r.outliers_removed, false),
            Err(_) => self.store.metrics().record_calculation(0, true),
        }
        result
    }

    /// Volume-weighted average price. `window` overrides the configured
    /// `vwapWindow` for this call only; `None` falls back to it.
    pub fn vwap(&self, pair: &Pair, window: Option<Duration>) -> EngineResult<AggregationResult> {
        let observations = self.store.volume_snapshot(pair, window);
        self.note_calculation(aggregation::vwap(pair, &observations, &self.config, window))
    }

    /// Time-weighted average price. `window` overrides the configured
    /// `twapWindow` for this call only; `None` falls back to it.
    pub fn twap(&self, pair: &Pair, window: Option<Duration>) -> EngineResult<AggregationResult> {
        let observations = self.store.snapshot(pair, window);
        self.note_calculation(aggregation::twap(pair, &observations, &self.config, window))
    }

    pub fn weighted(&self, pair: &Pair) -> EngineResult<AggregationResult> {
        self.note_calculation(aggregation::weighted(pair, &self.store.snapshot(pair, None), &self.config))
    }

    /// Runs every calculator and returns the highest-ranked success,
    /// unless `forced_algorithm` pins the answer to one specific
    /// calculator's own outcome. Always uses each calculator's configured
    /// default window — there is no per-call override here, matching the
    /// no-argument `currentPrice(pair)` signature.
    pub fn current_price(&self, pair: &Pair, forced_algorithm: Option<Algorithm>) -> EngineResult<AggregatedPrice> {
        let all_observations = self.store.snapshot(pair, None);
        let volume_observations = self.store.volume_snapshot(pair, None);

        let attempts = vec![
            (
                Algorithm::Vwap,
                self.note_calculation(aggregation::vwap(pair, &volume_observations, &self.config, None)),
            ),
            (
                Algorithm::Twap,
                self.note_calculation(aggregation::twap(pair, &all_observations, &self.config, None)),
            ),
            (
                Algorithm::Weighted,
                self.note_calculation(aggregation::weighted(pair, &all_observations, &self.config)),
            ),
        ];

        aggregation::select_best(attempts, forced_algorithm)
    }

    /// Per-pair diagnostic snapshot (count, age bounds, contributing
    /// sources) — not the spec's `stats()`, which is engine-wide; see
    /// [`Self::stats`].
    pub fn pair_stats(&self, pair: &Pair) -> PairStats {
        self.store.pair_stats(pair)
    }

    /// The query facade's `stats()`: configuration snapshot plus
    /// store-wide and calculator-wide counters, independent of any pair.
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            config: self.config.clone(),
            store: self.store.global_stats(),
            metrics: self.store.metrics().snapshot(),
        }
    }

    pub fn known_pairs(&self) -> Vec<Pair> {
        self.store.known_pairs()
    }

    pub fn clear(&self, pair: &Pair) {
        self.store.clear(pair);
    }

    pub fn clear_all(&self) {
        self.store.clear_all();
    }
}
