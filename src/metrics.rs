//! Engine-wide counters, independent of any single pair: observations
//! recorded, outliers removed by the aggregation engine, and calculator
//! invocations. Cheap atomics in the style of
//! [`crate::scheduler::SchedulerMetrics`], read back through
//! [`crate::query::QueryFacade::stats`].

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters owned by the [`crate::store::ObservationStore`] and updated
/// by the store (`points_processed`) and the query facade
/// (`calculations_*`, `outliers_detected`) as they drive the aggregation
/// engine. Never reset except by a fresh process — there is no
/// cross-restart persistence, per spec.
#[derive(Default)]
pub struct EngineMetrics {
    points_processed: AtomicU64,
    outliers_detected: AtomicU64,
    calculations_performed: AtomicU64,
    calculations_failed: AtomicU64,
}

/// Point-in-time read of [`EngineMetrics`], serializable for the CLI
/// health check and any caller that wants to export it.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EngineMetricsSnapshot {
    pub points_processed: u64,
    pub outliers_detected: u64,
    pub calculations_performed: u64,
    pub calculations_failed: u64,
}

impl EngineMetrics {
    pub fn record_point(&self) {
        self.points_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// Called once per calculator invocation (VWAP, TWAP, or weighted
    /// mean), whether it succeeded or failed.
    pub fn record_calculation(&self, outliers_removed: usize, failed: bool) {
        self.calculations_performed.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.calculations_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.outliers_detected.fetch_add(outliers_removed as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> EngineMetricsSnapshot {
        EngineMetricsSnapshot {
            points_processed: self.points_processed.load(Ordering::Relaxed),
            outliers_detected: self.outliers_detected.load(Ordering::Relaxed),
            calculations_performed: self.calculations_performed.load(Ordering::Relaxed),
            calculations_failed: self.calculations_failed.load(Ordering::Relaxed),
        }
    }
}
