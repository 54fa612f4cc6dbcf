//! The collector scheduler: fans out one fetch per `(pair, source)` every
//! tick, bounded by a semaphore, with per-request timeout and exponential
//! backoff retry. Never holds a store lock across a fetch — sources are
//! called first, the result is written into the store only after it
//! returns.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{CollectorConfig, RetryConfig};
use crate::error::SourceError;
use crate::model::{Pair, SourceId};
use crate::query::QueryFacade;
use crate::sources::PriceSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Stopped,
    Running,
    Stopping,
}

/// Collector-wide counters. Cheap atomics, read by `health_check`.
#[derive(Default)]
pub struct SchedulerMetrics {
    pub ticks_completed: AtomicU64,
    pub fetch_success: AtomicU64,
    pub fetch_failure: AtomicU64,
    pub fetch_timeout: AtomicU64,
}

impl SchedulerMetrics {
    pub fn snapshot(&self) -> (u64, u64, u64, u64) {
        (
            self.ticks_completed.load(Ordering::Relaxed),
            self.fetch_success.load(Ordering::Relaxed),
            self.fetch_failure.load(Ordering::Relaxed),
            self.fetch_timeout.load(Ordering::Relaxed),
        )
    }
}

pub struct CollectorScheduler {
    config: CollectorConfig,
    sources: HashMap<SourceId, Arc<dyn PriceSource>>,
    facade: Arc<QueryFacade>,
    state: RwLock<SchedulerState>,
    handle: Mutex<Option<JoinHandle<()>>>,
    stop_notify: Arc<Notify>,
    /// Cancels whichever tick is currently in flight, if any. Set for the
    /// duration of each background tick so `stop()` can interrupt a
    /// backoff sleep or an in-flight fetch rather than waiting it out.
    run_cancel: Mutex<Option<CancellationToken>>,
    pub metrics: Arc<SchedulerMetrics>,
}

impl CollectorScheduler {
    pub fn new(
        config: CollectorConfig,
        sources: HashMap<SourceId, Arc<dyn PriceSource>>,
        facade: Arc<QueryFacade>,
    ) -> Self {
        Self {
            config,
            sources,
            facade,
            state: RwLock::new(SchedulerState::Stopped),
            handle: Mutex::new(None),
            stop_notify: Arc::new(Notify::new()),
            run_cancel: Mutex::new(None),
            metrics: Arc::new(SchedulerMetrics::default()),
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.read().unwrap()
    }

    /// Starts the tick loop on a background task. No-op if already
    /// running. Requires `self` behind an `Arc` since the background task
    /// needs to outlive the caller.
    pub fn start(self: &Arc<Self>) {
        {
            let mut state = self.state.write().unwrap();
            if *state != SchedulerState::Stopped {
                return;
            }
            *state = SchedulerState::Running;
        }

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(this.config.collect_interval_ms));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if this.state() != SchedulerState::Running {
                            break;
                        }
                        let cancel = CancellationToken::new();
                        *this.run_cancel.lock().unwrap() = Some(cancel.clone());
                        this.run_once_cancellable(&cancel).await;
                        *this.run_cancel.lock().unwrap() = None;
                        this.metrics.ticks_completed.fetch_add(1, Ordering::Relaxed);
                    }
                    _ = this.stop_notify.notified() => {
                        break;
                    }
                }
            }

            *this.state.write().unwrap() = SchedulerState::Stopped;
        });

        *self.handle.lock().unwrap() = Some(handle);
    }

    /// Requests the loop stop after its current tick and waits for it to
    /// finish. Cancels whatever tick is in flight — a backoff sleep or a
    /// fetch — rather than waiting for it to complete on its own. No-op
    /// if already stopped.
    pub async fn stop(&self) {
        {
            let mut state = self.state.write().unwrap();
            if *state != SchedulerState::Running {
                return;
            }
            *state = SchedulerState::Stopping;
        }
        self.stop_notify.notify_waiters();
        if let Some(cancel) = self.run_cancel.lock().unwrap().clone() {
            cancel.cancel();
        }

        let handle = self.handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Fans out one fetch per configured `(pair, source)` pair, bounded
    /// by `max_in_flight`, and waits for every fetch in this tick before
    /// returning — ticks never overlap. Exposed publicly for single-shot
    /// CLI use and for tests that need a deterministic tick boundary; runs
    /// with a cancellation token of its own that nothing outside this call
    /// can trigger, so it always runs to completion.
    pub async fn run_once(&self) {
        self.run_once_cancellable(&CancellationToken::new()).await;
    }

    async fn run_once_cancellable(&self, cancel: &CancellationToken) {
        let semaphore = Arc::new(Semaphore::new(self.config.max_in_flight.max(1)));
        let timeout = Duration::from_millis(self.config.request_timeout_ms);
        let mut join_set = tokio::task::JoinSet::new();

        for pair in &self.config.pairs {
            for (source_id, source_cfg) in &self.config.sources {
                if !source_cfg.enabled {
                    continue;
                }
                let Some(source) = self.sources.get(source_id) else {
                    continue;
                };

                let pair = pair.clone();
                let source = Arc::clone(source);
                let semaphore = Arc::clone(&semaphore);
                let facade = Arc::clone(&self.facade);
                let metrics = Arc::clone(&self.metrics);
                let retry = self.config.retry.clone();
                let cancel = cancel.clone();

                join_set.spawn(async move {
                    let _permit = semaphore.acquire_owned().await;
                    match fetch_with_retry(source.as_ref(), &pair, timeout, &retry, &metrics, &cancel).await {
                        Ok(observation) => {
                            facade.record(&pair, observation);
                            metrics.fetch_success.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(SourceError::Cancelled) => {}
                        Err(err) => {
                            metrics.fetch_failure.fetch_add(1, Ordering::Relaxed);
                            log::warn!("collector: {pair} via {} failed: {err}", source.name());
                        }
                    }
                });
            }
        }

        while join_set.join_next().await.is_some() {}
    }
}

/// Retries a single `(pair, source)` fetch up to `retry.retry_attempts`
/// times with `2^attempt`-second backoff, timing out each attempt
/// independently. Both the fetch and the backoff sleep race against
/// `cancel`, so a caller can interrupt a retry loop mid-backoff instead
/// of waiting out the full schedule.
async fn fetch_with_retry(
    source: &dyn PriceSource,
    pair: &Pair,
    timeout: Duration,
    retry: &RetryConfig,
    metrics: &SchedulerMetrics,
    cancel: &CancellationToken,
) -> Result<crate::model::Observation, SourceError> {
    let mut last_err = SourceError::NetworkError("no attempts made".into());

    for attempt in 0..=retry.retry_attempts {
        let attempt_result = tokio::select! {
            res = tokio::time::timeout(timeout, source.fetch(pair)) => res,
            _ = cancel.cancelled() => return Err(SourceError::Cancelled),
        };
        match attempt_result {
            Ok(Ok(observation)) => return Ok(observation),
            Ok(Err(err)) => last_err = err,
            Err(_) => {
                metrics.fetch_timeout.fetch_add(1, Ordering::Relaxed);
                last_err = SourceError::NetworkError(format!("timed out after {}ms", timeout.as_millis()));
            }
        }

        if attempt < retry.retry_attempts {
            tokio::select! {
                _ = tokio::time::sleep(retry.delay_for_attempt(attempt)) => {}
                _ = cancel.cancelled() => return Err(SourceError::Cancelled),
            }
        }
    }

    Err(last_err)
}
