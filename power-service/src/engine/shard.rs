use std::collections::BTreeMap;
use std::sync::Arc;

use time::OffsetDateTime;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::EngineContext;
use crate::aggregator::ClosedBuffer;
use crate::error::EngineError;
use crate::household::{
    household_rng, ApplianceState, HouseholdCell, HouseholdConfig, PowerStatePush, ToggleOutcome,
};

type Reply<T> = oneshot::Sender<T>;

pub(crate) enum Command {
    Register {
        household: HouseholdConfig,
        at: OffsetDateTime,
        reply: Reply<Result<(), EngineError>>,
    },
    Toggle {
        household_id: String,
        appliance_id: String,
        is_on: bool,
        at: OffsetDateTime,
        reply: Reply<Result<ToggleOutcome, EngineError>>,
    },
    ListActive {
        household_id: String,
        reply: Reply<Result<Vec<ApplianceState>, EngineError>>,
    },
    Snapshot {
        household_id: String,
        reply: Reply<Result<PowerStatePush, EngineError>>,
    },
    Tick {
        at: OffsetDateTime,
        reply: Reply<ShardTick>,
    },
    CloseWindows {
        window_start: OffsetDateTime,
        window_end: OffsetDateTime,
        reply: Reply<Vec<ClosedBuffer>>,
    },
    Households {
        reply: Reply<Vec<String>>,
    },
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ShardTick {
    pub ticked: usize,
    pub faults: usize,
}

/// Single writer for the households hashed onto it.
pub(crate) struct Shard {
    index: usize,
    ctx: Arc<EngineContext>,
    households: BTreeMap<String, HouseholdCell>,
}

impl Shard {
    pub(crate) fn new(index: usize, ctx: Arc<EngineContext>) -> Self {
        Self {
            index,
            ctx,
            households: BTreeMap::new(),
        }
    }

    pub(crate) async fn run(mut self, mut rx: mpsc::Receiver<Command>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                cmd = rx.recv() => match cmd {
                    Some(cmd) => self.handle(cmd),
                    None => break,
                },
                _ = cancel.cancelled() => {
                    // Finish what was already queued, refuse anything new.
                    rx.close();
                    while let Some(cmd) = rx.recv().await {
                        self.handle(cmd);
                    }
                    break;
                }
            }
        }
        tracing::debug!(shard = self.index, households = self.households.len(), "engine shard stopped");
    }

    fn handle(&mut self, cmd: Command) {
        // A dropped reply receiver means the caller gave up; nothing to do.
        match cmd {
            Command::Register { household, at, reply } => {
                let _ = reply.send(self.register(household, at));
            }
            Command::Toggle {
                household_id,
                appliance_id,
                is_on,
                at,
                reply,
            } => {
                let _ = reply.send(self.toggle(&household_id, &appliance_id, is_on, at));
            }
            Command::ListActive { household_id, reply } => {
                let _ = reply.send(self.cell(&household_id).map(HouseholdCell::list_active));
            }
            Command::Snapshot { household_id, reply } => {
                let _ = reply.send(self.cell(&household_id).map(HouseholdCell::push));
            }
            Command::Tick { at, reply } => {
                let _ = reply.send(self.tick(at));
            }
            Command::CloseWindows {
                window_start,
                window_end,
                reply,
            } => {
                let closed = self
                    .households
                    .values_mut()
                    .map(|cell| cell.close_window(window_start, window_end))
                    .collect();
                let _ = reply.send(closed);
            }
            Command::Households { reply } => {
                let _ = reply.send(self.households.keys().cloned().collect());
            }
        }
    }

    fn cell(&self, household_id: &str) -> Result<&HouseholdCell, EngineError> {
        self.households
            .get(household_id)
            .ok_or_else(|| EngineError::HouseholdNotFound(household_id.to_string()))
    }

    fn register(&mut self, household: HouseholdConfig, at: OffsetDateTime) -> Result<(), EngineError> {
        if self.households.contains_key(&household.id) {
            return Err(EngineError::DuplicateHousehold(household.id));
        }
        let sim_config = self.ctx.simulator.config();
        if sim_config.profile(&household.profile).is_none() {
            return Err(EngineError::Validation(format!(
                "household '{}' uses unknown profile '{}'",
                household.id, household.profile
            )));
        }

        let cell = HouseholdCell::new(
            &household,
            &self.ctx.catalog,
            sim_config.nominal_voltage,
            self.ctx.outage_policy,
            self.ctx.max_buffer_age,
            household_rng(self.ctx.seed, &household.id),
            at,
        )?;
        tracing::info!(household_id = %household.id, profile = %household.profile, shard = self.index, "household registered");
        metrics::gauge!("households_registered").increment(1.0);
        self.households.insert(household.id, cell);
        Ok(())
    }

    fn toggle(
        &mut self,
        household_id: &str,
        appliance_id: &str,
        is_on: bool,
        at: OffsetDateTime,
    ) -> Result<ToggleOutcome, EngineError> {
        let ctx = &self.ctx;
        let cell = self
            .households
            .get_mut(household_id)
            .ok_or_else(|| EngineError::HouseholdNotFound(household_id.to_string()))?;

        match cell.toggle(&ctx.catalog, appliance_id, is_on, at) {
            Ok(outcome) => {
                metrics::counter!("toggles_total").increment(1);
                ctx.publish(cell.push());
                Ok(outcome)
            }
            Err(e) => {
                metrics::counter!("toggles_rejected_total").increment(1);
                Err(e)
            }
        }
    }

    fn tick(&mut self, at: OffsetDateTime) -> ShardTick {
        let ctx = &self.ctx;
        let mut report = ShardTick::default();
        for cell in self.households.values_mut() {
            report.ticked += 1;
            if cell.tick(&ctx.simulator, &ctx.catalog, at).is_err() {
                report.faults += 1;
            }
            ctx.publish(cell.push());
        }
        report
    }
}
