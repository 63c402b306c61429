//! Sharded household actors behind a cloneable handle.
//!
//! Households are pinned to a shard by hashing their id. Each shard is a
//! tokio task that owns its households outright and processes commands in
//! arrival order, so ticks and toggles for one household never interleave
//! while different shards run in parallel.

mod shard;

use std::sync::Arc;

use futures::future::join_all;
use time::{Duration, OffsetDateTime};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::aggregator::ClosedBuffer;
use crate::catalog::ApplianceCatalog;
use crate::error::EngineError;
use crate::household::{ApplianceState, HouseholdConfig, OutagePolicy, PowerStatePush, ToggleOutcome};
use crate::simulator::BackgroundSimulator;

use shard::{Command, Shard, ShardTick};

/// Immutable inputs shared by every shard.
pub struct EngineContext {
    pub catalog: ApplianceCatalog,
    pub simulator: BackgroundSimulator,
    pub outage_policy: OutagePolicy,
    pub max_buffer_age: Duration,
    pub seed: Option<u64>,
    notifier: broadcast::Sender<PowerStatePush>,
}

impl EngineContext {
    pub fn new(
        catalog: ApplianceCatalog,
        simulator: BackgroundSimulator,
        outage_policy: OutagePolicy,
        max_buffer_age: Duration,
        seed: Option<u64>,
        push_capacity: usize,
    ) -> Self {
        let (notifier, _) = broadcast::channel(push_capacity.max(1));
        Self {
            catalog,
            simulator,
            outage_policy,
            max_buffer_age,
            seed,
            notifier,
        }
    }

    fn publish(&self, push: PowerStatePush) {
        // No subscribers is fine; pushes are best-effort.
        let _ = self.notifier.send(push);
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub households: usize,
    pub faults: usize,
}

fn shard_index(key: &str, workers: usize) -> usize {
    use std::hash::{Hash, Hasher};

    let mut h = std::collections::hash_map::DefaultHasher::new();
    key.hash(&mut h);
    (h.finish() as usize) % workers.max(1)
}

/// Cloneable handle to the engine shards.
#[derive(Clone)]
pub struct PowerEngine {
    shards: Arc<Vec<mpsc::Sender<Command>>>,
    notifier: broadcast::Sender<PowerStatePush>,
}

/// Join handles of the shard tasks.
pub struct EngineWorkers {
    cancel: CancellationToken,
    joins: Vec<JoinHandle<()>>,
}

impl EngineWorkers {
    /// Stop every shard after it has processed what is already queued.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for j in self.joins {
            if let Err(e) = j.await {
                tracing::error!(error = %e, "engine shard join error");
            }
        }
    }
}

impl PowerEngine {
    pub fn spawn(ctx: EngineContext, workers: usize, capacity: usize) -> (PowerEngine, EngineWorkers) {
        let workers = workers.max(1);
        let notifier = ctx.notifier.clone();
        let ctx = Arc::new(ctx);
        let cancel = CancellationToken::new();

        let mut txs = Vec::with_capacity(workers);
        let mut joins = Vec::with_capacity(workers);
        for index in 0..workers {
            let (tx, rx) = mpsc::channel::<Command>(capacity.max(1));
            txs.push(tx);
            let shard = Shard::new(index, ctx.clone());
            joins.push(tokio::spawn(shard.run(rx, cancel.clone())));
        }
        tracing::info!(workers, "power engine started");

        (
            PowerEngine {
                shards: Arc::new(txs),
                notifier,
            },
            EngineWorkers { cancel, joins },
        )
    }

    async fn request<T>(
        &self,
        index: usize,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.shards[index]
            .send(make(tx))
            .await
            .map_err(|_| EngineError::Unavailable(format!("engine shard {index} stopped")))?;
        rx.await
            .map_err(|_| EngineError::Unavailable(format!("engine shard {index} dropped the request")))
    }

    fn shard_for(&self, household_id: &str) -> usize {
        shard_index(household_id, self.shards.len())
    }

    /// Register a household with every installed appliance off.
    pub async fn register(&self, household: HouseholdConfig) -> Result<(), EngineError> {
        self.register_at(household, OffsetDateTime::now_utc()).await
    }

    pub async fn register_at(&self, household: HouseholdConfig, at: OffsetDateTime) -> Result<(), EngineError> {
        let idx = self.shard_for(&household.id);
        self.request(idx, |reply| Command::Register { household, at, reply })
            .await?
    }

    pub async fn toggle(
        &self,
        household_id: &str,
        appliance_id: &str,
        is_on: bool,
    ) -> Result<ToggleOutcome, EngineError> {
        self.toggle_at(household_id, appliance_id, is_on, OffsetDateTime::now_utc())
            .await
    }

    pub async fn toggle_at(
        &self,
        household_id: &str,
        appliance_id: &str,
        is_on: bool,
        at: OffsetDateTime,
    ) -> Result<ToggleOutcome, EngineError> {
        if appliance_id.trim().is_empty() {
            metrics::counter!("toggles_rejected_total").increment(1);
            return Err(EngineError::Validation("appliance id must not be blank".to_string()));
        }
        let idx = self.shard_for(household_id);
        self.request(idx, |reply| Command::Toggle {
            household_id: household_id.to_string(),
            appliance_id: appliance_id.to_string(),
            is_on,
            at,
            reply,
        })
        .await?
    }

    pub async fn list_active(&self, household_id: &str) -> Result<Vec<ApplianceState>, EngineError> {
        let idx = self.shard_for(household_id);
        self.request(idx, |reply| Command::ListActive {
            household_id: household_id.to_string(),
            reply,
        })
        .await?
    }

    /// Current merged state of a household and its switched-on appliances.
    pub async fn snapshot(&self, household_id: &str) -> Result<PowerStatePush, EngineError> {
        let idx = self.shard_for(household_id);
        self.request(idx, |reply| Command::Snapshot {
            household_id: household_id.to_string(),
            reply,
        })
        .await?
    }

    /// Run one simulation tick for every household, shards in parallel.
    pub async fn tick_all(&self, at: OffsetDateTime) -> TickReport {
        let results = join_all(
            (0..self.shards.len()).map(|idx| self.request(idx, |reply| Command::Tick { at, reply })),
        )
        .await;

        let mut report = TickReport::default();
        for (idx, r) in results.into_iter().enumerate() {
            match r {
                Ok(ShardTick { ticked, faults }) => {
                    report.households += ticked;
                    report.faults += faults;
                }
                Err(e) => tracing::error!(shard = idx, error = %e, "tick not delivered to shard"),
            }
        }
        report
    }

    /// Swap out every household's buffer up to `window_end`.
    pub async fn close_windows(
        &self,
        window_start: OffsetDateTime,
        window_end: OffsetDateTime,
    ) -> Vec<ClosedBuffer> {
        let results = join_all((0..self.shards.len()).map(|idx| {
            self.request(idx, |reply| Command::CloseWindows {
                window_start,
                window_end,
                reply,
            })
        }))
        .await;

        let mut closed = Vec::new();
        for (idx, r) in results.into_iter().enumerate() {
            match r {
                Ok(buffers) => closed.extend(buffers),
                Err(e) => tracing::error!(shard = idx, error = %e, "window close not delivered to shard"),
            }
        }
        closed
    }

    /// Registered household ids, sorted.
    pub async fn households(&self) -> Result<Vec<String>, EngineError> {
        let results = join_all(
            (0..self.shards.len()).map(|idx| self.request(idx, |reply| Command::Households { reply })),
        )
        .await;

        let mut ids = Vec::new();
        for r in results {
            ids.extend(r?);
        }
        ids.sort();
        Ok(ids)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PowerStatePush> {
        self.notifier.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::default_appliances;
    use crate::simulator::SimulatorConfig;
    use approx::assert_relative_eq;
    use time::macros::datetime;
    use time::UtcOffset;

    fn engine(workers: usize) -> (PowerEngine, EngineWorkers) {
        let ctx = EngineContext::new(
            ApplianceCatalog::new(default_appliances()).unwrap(),
            BackgroundSimulator::new(SimulatorConfig::default(), UtcOffset::UTC),
            OutagePolicy::BackgroundOnly,
            Duration::minutes(2),
            Some(42),
            64,
        );
        PowerEngine::spawn(ctx, workers, 16)
    }

    const T0: OffsetDateTime = datetime!(2024-06-01 12:00:00 UTC);

    #[test]
    fn shard_index_is_stable_and_in_range() {
        for workers in 1..8 {
            let a = shard_index("household-17", workers);
            assert_eq!(a, shard_index("household-17", workers));
            assert!(a < workers);
        }
    }

    #[tokio::test]
    async fn register_rejects_duplicates_and_unknown_profiles() {
        let (engine, workers) = engine(2);
        engine.register_at(HouseholdConfig::new("h1", "normal"), T0).await.unwrap();

        let dup = engine.register_at(HouseholdConfig::new("h1", "high"), T0).await.unwrap_err();
        assert_eq!(dup, EngineError::DuplicateHousehold("h1".to_string()));

        let bad = engine.register_at(HouseholdConfig::new("h2", "mansion"), T0).await.unwrap_err();
        assert!(matches!(bad, EngineError::Validation(_)));
        assert_eq!(engine.households().await.unwrap(), vec!["h1".to_string()]);

        workers.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_household_is_not_found() {
        let (engine, workers) = engine(2);
        let err = engine.toggle_at("ghost", "kettle", true, T0).await.unwrap_err();
        assert_eq!(err, EngineError::HouseholdNotFound("ghost".to_string()));
        assert!(engine.snapshot("ghost").await.is_err());
        workers.shutdown().await;
    }

    #[tokio::test]
    async fn toggle_sequence_matches_worked_example() {
        let (engine, workers) = engine(4);
        engine.register_at(HouseholdConfig::new("h1", "normal"), T0).await.unwrap();
        engine.tick_all(T0).await;
        let background = engine.snapshot("h1").await.unwrap().background_kw;

        let out = engine.toggle_at("h1", "kettle", true, T0 + Duration::seconds(1)).await.unwrap();
        assert_relative_eq!(out.interactive_kw, 2.0);
        let out = engine.toggle_at("h1", "tv", true, T0 + Duration::seconds(2)).await.unwrap();
        assert_relative_eq!(out.interactive_kw, 2.12);
        let out = engine.toggle_at("h1", "kettle", false, T0 + Duration::seconds(3)).await.unwrap();
        assert_relative_eq!(out.interactive_kw, 0.12);
        assert_relative_eq!(out.total_kw, background + 0.12, epsilon = 1e-12);

        let active = engine.list_active("h1").await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].appliance_id, "tv");

        workers.shutdown().await;
    }

    #[tokio::test]
    async fn households_do_not_affect_each_other() {
        let (engine, workers) = engine(3);
        for id in ["a", "b", "c", "d"] {
            engine.register_at(HouseholdConfig::new(id, "normal"), T0).await.unwrap();
        }

        let toggles = ["a", "b", "c", "d"].map(|id| {
            let engine = engine.clone();
            tokio::spawn(async move {
                for i in 0..20 {
                    engine
                        .toggle_at(id, "kettle", i % 2 == 0, T0 + Duration::milliseconds(i))
                        .await
                        .unwrap();
                }
            })
        });
        let report = engine.tick_all(T0 + Duration::seconds(1)).await;
        assert_eq!(report.households, 4);
        for t in toggles {
            t.await.unwrap();
        }

        // 20 toggles ending on "off" for every household.
        for id in ["a", "b", "c", "d"] {
            let snap = engine.snapshot(id).await.unwrap();
            assert_eq!(snap.interactive_kw, 0.0);
            assert_relative_eq!(snap.total_kw, snap.background_kw, epsilon = 1e-12);
        }

        engine.toggle_at("a", "oven", true, T0 + Duration::seconds(2)).await.unwrap();
        assert_relative_eq!(engine.snapshot("a").await.unwrap().interactive_kw, 2.4);
        assert_eq!(engine.snapshot("b").await.unwrap().interactive_kw, 0.0);

        workers.shutdown().await;
    }

    #[tokio::test]
    async fn pushes_are_published_on_toggle() {
        let (engine, workers) = engine(1);
        let mut rx = engine.subscribe();
        engine.register_at(HouseholdConfig::new("h1", "normal"), T0).await.unwrap();
        engine.toggle_at("h1", "lights", true, T0).await.unwrap();

        let push = rx.recv().await.unwrap();
        assert_eq!(push.household_id, "h1");
        assert_eq!(push.active_appliance_ids, vec!["lights".to_string()]);
        assert_relative_eq!(push.interactive_kw, 0.06);

        workers.shutdown().await;
    }

    #[tokio::test]
    async fn close_windows_swaps_buffers() {
        let (engine, workers) = engine(2);
        engine.register_at(HouseholdConfig::new("h1", "normal"), T0).await.unwrap();
        engine.register_at(HouseholdConfig::new("h2", "low"), T0).await.unwrap();
        engine.tick_all(T0).await;
        engine.tick_all(T0 + Duration::seconds(30)).await;
        engine.tick_all(T0 + Duration::seconds(60)).await;

        let closed = engine.close_windows(T0, T0 + Duration::minutes(1)).await;
        assert_eq!(closed.len(), 2);
        assert!(closed.iter().all(|c| c.samples.len() == 2));

        let again = engine.close_windows(T0, T0 + Duration::minutes(1)).await;
        assert!(again.iter().all(|c| c.samples.is_empty()));

        workers.shutdown().await;
    }

    #[tokio::test]
    async fn requests_after_shutdown_are_unavailable() {
        let (engine, workers) = engine(2);
        workers.shutdown().await;
        let err = engine.register_at(HouseholdConfig::new("h1", "normal"), T0).await.unwrap_err();
        assert!(matches!(err, EngineError::Unavailable(_)));
    }
}
