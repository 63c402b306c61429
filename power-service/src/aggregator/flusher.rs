use std::collections::BTreeMap;
use std::time::{Duration as StdDuration, Instant};

use futures::StreamExt;
use power_client::domain::MinuteReading;
use time::{Duration, OffsetDateTime};
use tokio::sync::Mutex;

use super::{align_down, reduce, EmptyWindowPolicy};
use crate::engine::PowerEngine;
use crate::error::EngineError;
use crate::store::ReadingStore;

/// Bounded exponential backoff for reading writes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: StdDuration,
    pub max_backoff: StdDuration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> StdDuration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FlushReport {
    /// Households whose buffers were swapped out.
    pub households: usize,
    pub persisted: usize,
    /// Readings that exhausted their retries and now wait in the pending set.
    pub parked: usize,
    /// Previously parked readings written during this flush.
    pub recovered: usize,
}

/// Closes windows, reduces them and persists the readings.
///
/// Readings that cannot be written within the retry budget are kept in a
/// pending set and retried at the start of every later flush.
pub struct Flusher<S> {
    store: S,
    window: Duration,
    policy: EmptyWindowPolicy,
    retry: RetryPolicy,
    concurrency: usize,
    pending: Mutex<BTreeMap<(String, OffsetDateTime), MinuteReading>>,
}

impl<S: ReadingStore> Flusher<S> {
    pub fn new(
        store: S,
        window: Duration,
        policy: EmptyWindowPolicy,
        retry: RetryPolicy,
        concurrency: usize,
    ) -> Self {
        Self {
            store,
            window,
            policy,
            retry,
            concurrency: concurrency.max(1),
            pending: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Close `[window_start, window_end)` for every household and persist it.
    pub async fn flush(
        &self,
        engine: &PowerEngine,
        window_start: OffsetDateTime,
        window_end: OffsetDateTime,
    ) -> FlushReport {
        let started = Instant::now();
        let recovered = self.retry_pending().await;

        let closed = engine.close_windows(window_start, window_end).await;
        let readings: Vec<MinuteReading> = closed
            .iter()
            .flat_map(|c| reduce(c, self.window, self.policy))
            .collect();

        let (persisted, parked) = self.persist_all(readings).await;

        metrics::histogram!("flush_duration_seconds").record(started.elapsed().as_secs_f64());
        let report = FlushReport {
            households: closed.len(),
            persisted,
            parked,
            recovered,
        };
        tracing::debug!(
            window_start = %window_start,
            households = report.households,
            persisted = report.persisted,
            parked = report.parked,
            recovered = report.recovered,
            "window flushed"
        );
        report
    }

    /// Flush everything buffered up to `now`, closing the current window early.
    pub async fn drain(&self, engine: &PowerEngine, now: OffsetDateTime) -> FlushReport {
        let mut start = align_down(now, self.window);
        if start == now {
            start = now - self.window;
        }
        self.flush(engine, start, now).await
    }

    /// Persist readings, in parallel across households and in window order
    /// within one household. Returns `(persisted, parked)`.
    pub async fn persist_all(&self, readings: Vec<MinuteReading>) -> (usize, usize) {
        let mut by_household: BTreeMap<String, Vec<MinuteReading>> = BTreeMap::new();
        for r in readings {
            by_household.entry(r.household_id.clone()).or_default().push(r);
        }

        futures::stream::iter(by_household.into_values())
            .map(|mut batch| async move {
                batch.sort_by_key(|r| r.window_start);
                let mut persisted = 0;
                let mut parked = 0;
                for reading in batch {
                    match self.persist_with_retry(&reading).await {
                        Ok(()) => persisted += 1,
                        Err(e) => {
                            self.park(reading, &e).await;
                            parked += 1;
                        }
                    }
                }
                (persisted, parked)
            })
            .buffer_unordered(self.concurrency)
            .fold((0, 0), |(p, k), (dp, dk)| async move { (p + dp, k + dk) })
            .await
    }

    async fn persist_with_retry(&self, reading: &MinuteReading) -> Result<(), EngineError> {
        let mut attempt: u32 = 0;
        loop {
            match self.store.upsert_reading(reading).await {
                Ok(()) => {
                    metrics::counter!("minute_readings_persisted_total").increment(1);
                    return Ok(());
                }
                Err(e) if attempt < self.retry.max_retries => {
                    attempt += 1;
                    let sleep_for = self.retry.backoff(attempt);
                    tracing::warn!(
                        error = %e,
                        attempt,
                        household_id = %reading.household_id,
                        window_start = %reading.window_start,
                        "minute reading write failed, retrying with backoff"
                    );
                    metrics::counter!("minute_reading_retries_total").increment(1);
                    tokio::time::sleep(sleep_for).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn park(&self, reading: MinuteReading, error: &EngineError) {
        tracing::error!(
            error = %error,
            household_id = %reading.household_id,
            window_start = %reading.window_start,
            energy_kwh = reading.energy_kwh,
            "minute reading write failed after retries, parked for later retry"
        );
        metrics::counter!("minute_readings_parked_total").increment(1);

        let mut pending = self.pending.lock().await;
        pending.insert(reading.key(), reading);
        metrics::gauge!("readings_pending_retry").set(pending.len() as f64);
    }

    /// One write attempt per parked reading. Returns how many succeeded.
    pub async fn retry_pending(&self) -> usize {
        let parked: Vec<MinuteReading> = {
            let mut pending = self.pending.lock().await;
            std::mem::take(&mut *pending).into_values().collect()
        };
        if parked.is_empty() {
            return 0;
        }

        let mut recovered = 0;
        let mut still_failing = Vec::new();
        for reading in parked {
            match self.store.upsert_reading(&reading).await {
                Ok(()) => {
                    metrics::counter!("minute_readings_persisted_total").increment(1);
                    recovered += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        household_id = %reading.household_id,
                        window_start = %reading.window_start,
                        "parked minute reading still failing"
                    );
                    still_failing.push(reading);
                }
            }
        }

        let mut pending = self.pending.lock().await;
        for reading in still_failing {
            // A reading parked meanwhile for the same window is newer; keep it.
            pending.entry(reading.key()).or_insert(reading);
        }
        metrics::gauge!("readings_pending_retry").set(pending.len() as f64);
        if recovered > 0 {
            tracing::info!(recovered, remaining = pending.len(), "parked minute readings recovered");
        }
        recovered
    }

    pub async fn pending(&self) -> Vec<MinuteReading> {
        self.pending.lock().await.values().cloned().collect()
    }
}
