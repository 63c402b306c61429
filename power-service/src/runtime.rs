//! Periodic drivers and shutdown sequencing.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use power_client::domain::{Period, RankEntry};
use time::{Duration, OffsetDateTime, UtcOffset};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::aggregator::{align_down, FlushReport, Flusher};
use crate::engine::{EngineWorkers, PowerEngine};
use crate::error::EngineError;
use crate::ranker::{Leaderboard, ScorePeriod};
use crate::store::{ForecastSource, ReadingStore, ScoreSink};

/// First window boundary strictly after `now`.
pub fn next_boundary(now: OffsetDateTime, window: Duration) -> OffsetDateTime {
    align_down(now, window) + window
}

/// Tick every household once per `interval` until cancelled.
pub async fn run_tick_driver(engine: PowerEngine, interval: StdDuration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let report = engine.tick_all(OffsetDateTime::now_utc()).await;
                if report.faults > 0 {
                    tracing::warn!(
                        households = report.households,
                        faults = report.faults,
                        "simulation tick had faults"
                    );
                }
            }
        }
    }
    tracing::info!("tick driver stopped");
}

/// Flush each window as soon as the wall clock crosses its end.
pub async fn run_flush_driver<S: ReadingStore>(
    engine: PowerEngine,
    flusher: Arc<Flusher<S>>,
    cancel: CancellationToken,
) {
    let window = flusher.window();
    loop {
        let now = OffsetDateTime::now_utc();
        let boundary = next_boundary(now, window);
        let wait = StdDuration::try_from(boundary - now).unwrap_or_default();

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {
                let report = flusher.flush(&engine, boundary - window, boundary).await;
                if report.parked > 0 {
                    tracing::error!(
                        window_start = %(boundary - window),
                        parked = report.parked,
                        "window flush left readings pending"
                    );
                }
            }
        }
    }
    tracing::info!("flush driver stopped");
}

/// Score and rank every registered household for one closed period.
pub async fn score_closed_period<R, F, S>(
    engine: &PowerEngine,
    board: &Leaderboard<R, F, S>,
    period: Period,
) -> Result<Vec<RankEntry>, EngineError>
where
    R: ReadingStore,
    F: ForecastSource,
    S: ScoreSink,
{
    let households = engine.households().await?;
    let entries = board.score_and_rank(period, &households).await?;
    metrics::counter!("leaderboards_recorded_total").increment(1);
    Ok(entries)
}

/// Recompute the leaderboard each time a scoring period closes, `settle`
/// after its end so the final window has been flushed.
pub async fn run_score_driver<R, F, S>(
    engine: PowerEngine,
    board: Arc<Leaderboard<R, F, S>>,
    cadence: ScorePeriod,
    offset: UtcOffset,
    settle: StdDuration,
    cancel: CancellationToken,
) where
    R: ReadingStore,
    F: ForecastSource,
    S: ScoreSink,
{
    loop {
        let now = OffsetDateTime::now_utc();
        let period = match cadence.containing(now, offset) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!(error = %e, "cannot compute scoring period");
                break;
            }
        };
        let wait = StdDuration::try_from(period.end - now).unwrap_or_default() + settle;

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {
                if let Err(e) = score_closed_period(&engine, &board, period).await {
                    tracing::warn!(
                        period_start = %period.start,
                        period_end = %period.end,
                        error = %e,
                        "leaderboard recompute failed"
                    );
                }
            }
        }
    }
    tracing::info!("score driver stopped");
}

/// Wait for the named driver tasks, logging any that panicked or were
/// aborted. Returns how many failed.
pub async fn join_drivers(drivers: Vec<(&'static str, JoinHandle<()>)>) -> usize {
    let mut failed = 0;
    for (name, driver) in drivers {
        if let Err(e) = driver.await {
            tracing::error!(driver = name, error = %e, "driver join error");
            failed += 1;
        }
    }
    failed
}

/// Flush everything buffered up to now, then stop the engine shards.
///
/// Call after the drivers have stopped so no new samples arrive.
pub async fn drain<S: ReadingStore>(
    engine: &PowerEngine,
    flusher: &Flusher<S>,
    workers: EngineWorkers,
) -> FlushReport {
    let report = flusher.drain(engine, OffsetDateTime::now_utc()).await;
    let pending = flusher.pending().await;
    if pending.is_empty() {
        tracing::info!(persisted = report.persisted, "buffers drained");
    } else {
        for r in &pending {
            tracing::error!(
                household_id = %r.household_id,
                window_start = %r.window_start,
                energy_kwh = r.energy_kwh,
                "reading not persisted before shutdown"
            );
        }
    }
    workers.shutdown().await;
    report
}
