//! Price source adapters. Every adapter implements [`PriceSource`]; the
//! scheduler holds a `dyn PriceSource` per configured source and never
//! assumes anything about how a source gets its number.

pub mod http;
pub mod synthetic;

use async_trait::async_trait;

use crate::error::SourceError;
use crate::model::{Observation, Pair};

pub use http::HttpSource;
pub use synthetic::SyntheticSource;

/// A single price/volume feed. Implementations must not hold any engine
/// lock while fetching — the scheduler calls `fetch` before it ever
/// touches the observation store.
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Fetches one observation for `pair`. The scheduler races this
    /// future against a cancellation signal and against its own
    /// per-attempt timeout — on either firing first, the in-flight
    /// `fetch` future is simply dropped, so implementations don't need
    /// their own cancellation plumbing as long as they don't spawn work
    /// that outlives this future (e.g. a bare `tokio::spawn`).
    async fn fetch(&self, pair: &Pair) -> Result<Observation, SourceError>;

    /// Identifier recorded on every observation this source produces, and
    /// used to look up its configured trust weight.
    fn name(&self) -> &str;
}
