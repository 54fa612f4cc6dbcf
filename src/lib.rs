//! Multi-source price aggregation engine and collector scheduler.
//!
//! Observations flow `sources -> collector scheduler -> observation
//! store -> aggregation engine -> query facade`. The store and the
//! calculators are plain synchronous Rust with no `tokio` dependency of
//! their own; only the scheduler and the source adapters are async,
//! since fetching is the only I/O this crate performs.

pub mod aggregation;
pub mod config;
pub mod error;
pub mod metrics;
pub mod model;
pub mod query;
pub mod scheduler;
pub mod sources;
pub mod stats;
pub mod store;

pub use config::EngineConfig;
pub use error::{EngineError, EngineResult, SourceError, SourceResult};
pub use metrics::{EngineMetrics, EngineMetricsSnapshot};
pub use model::{AggregatedPrice, AggregationResult, Algorithm, Observation, Pair, SourceId};
pub use query::{EngineStats, QueryFacade};
pub use scheduler::{CollectorScheduler, SchedulerState};
pub use sources::{HttpSource, PriceSource, SyntheticSource};
pub use store::{ObservationStore, PairStats, StoreStats};
