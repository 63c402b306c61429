//! Per-household state owned by exactly one engine shard.

pub mod interactive;
pub mod state;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Deserialize;
use time::{Duration, OffsetDateTime};

use crate::aggregator::{ClosedBuffer, SampleBuffer};
use crate::catalog::ApplianceCatalog;
use crate::error::EngineError;
use crate::simulator::{BackgroundSimulator, SimState};

pub use interactive::{ApplianceState, InteractiveState};
pub use state::{PowerSample, PowerState, PowerStatePush, ToggleEvent, ToggleOutcome};

/// What an outage anomaly takes down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutagePolicy {
    /// Only the simulated background load drops out; switched-on appliances
    /// keep drawing.
    #[default]
    BackgroundOnly,
    /// The whole household is dark: interactive load counts as zero while the
    /// outage lasts. Appliance on/off state is kept and applies again after.
    WholeHousehold,
}

/// Registration request for one household.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HouseholdConfig {
    pub id: String,
    #[serde(default = "default_profile")]
    pub profile: String,
    /// Installed subset of the catalog; the whole catalog when absent.
    #[serde(default)]
    pub appliances: Option<Vec<String>>,
}

fn default_profile() -> String {
    "normal".to_string()
}

impl HouseholdConfig {
    pub fn new(id: &str, profile: &str) -> Self {
        Self {
            id: id.to_string(),
            profile: profile.to_string(),
            appliances: None,
        }
    }
}

/// Random source for one household. With a configured seed every household
/// gets its own reproducible stream, keyed by a blake3 hash of seed and id;
/// without one it draws from OS entropy.
pub fn household_rng(seed: Option<u64>, household_id: &str) -> ChaCha8Rng {
    match seed {
        Some(seed) => {
            let key = blake3::hash(format!("{seed}:{household_id}").as_bytes());
            ChaCha8Rng::from_seed(*key.as_bytes())
        }
        None => ChaCha8Rng::from_entropy(),
    }
}

/// Everything the engine knows about one household.
#[derive(Debug)]
pub struct HouseholdCell {
    id: String,
    profile: String,
    interactive: InteractiveState,
    state: PowerState,
    sim: SimState,
    buffer: SampleBuffer,
    rng: ChaCha8Rng,
    outage_policy: OutagePolicy,
    outage_active: bool,
}

impl HouseholdCell {
    pub fn new(
        household: &HouseholdConfig,
        catalog: &ApplianceCatalog,
        nominal_voltage: f64,
        outage_policy: OutagePolicy,
        max_buffer_age: Duration,
        rng: ChaCha8Rng,
        at: OffsetDateTime,
    ) -> Result<Self, EngineError> {
        if household.id.trim().is_empty() {
            return Err(EngineError::Validation("household id must not be blank".to_string()));
        }
        let interactive = InteractiveState::initialize(&household.id, catalog, household.appliances.as_deref())?;

        Ok(Self {
            id: household.id.clone(),
            profile: household.profile.clone(),
            interactive,
            state: PowerState::new(&household.id, nominal_voltage, at),
            sim: SimState::default(),
            buffer: SampleBuffer::new(&household.id, max_buffer_age),
            rng,
            outage_policy,
            outage_active: false,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> &PowerState {
        &self.state
    }

    /// Apply a user toggle, then record a sample of the new merged state.
    pub fn toggle(
        &mut self,
        catalog: &ApplianceCatalog,
        appliance_id: &str,
        is_on: bool,
        at: OffsetDateTime,
    ) -> Result<ToggleOutcome, EngineError> {
        self.interactive.toggle(catalog, appliance_id, is_on, at)?;
        self.state.set_interactive(self.effective_interactive_kw(catalog), at);
        self.record(at);

        Ok(ToggleOutcome {
            interactive_kw: self.state.interactive_kw,
            total_kw: self.state.total_kw,
        })
    }

    /// Advance the background simulator by one tick.
    ///
    /// A simulation fault keeps the previous background value in force and is
    /// returned after the fallback sample has been recorded.
    pub fn tick(
        &mut self,
        simulator: &BackgroundSimulator,
        catalog: &ApplianceCatalog,
        at: OffsetDateTime,
    ) -> Result<(), EngineError> {
        metrics::counter!("simulation_ticks_total").increment(1);

        match simulator.tick(&self.id, &self.sim, at, &self.profile, &mut self.rng) {
            Ok(outcome) => {
                let reading = outcome.reading;
                if reading.anomaly_started {
                    if let Some(kind) = reading.anomaly {
                        tracing::info!(household_id = %self.id, anomaly = kind.as_str(), "anomaly started");
                        metrics::counter!("anomalies_started_total", "kind" => kind.as_str()).increment(1);
                    }
                }
                self.sim = outcome.state;
                self.outage_active = reading.is_outage();
                self.state.set_background(reading.background_kw, reading.voltage, at);
                self.state.set_electrics(reading.reactive_kvar, reading.current_a);
                self.state.set_interactive(self.effective_interactive_kw(catalog), at);
                self.record(at);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(
                    household_id = %self.id,
                    error = %e,
                    fallback_kw = self.state.background_kw,
                    "simulation tick failed, keeping last background value"
                );
                metrics::counter!("simulation_faults_total").increment(1);
                let (background_kw, voltage) = (self.state.background_kw, self.state.voltage);
                self.state.set_background(background_kw, voltage, at);
                self.record(at);
                Err(e)
            }
        }
    }

    pub fn list_active(&self) -> Vec<ApplianceState> {
        self.interactive.list_active()
    }

    pub fn push(&self) -> PowerStatePush {
        PowerStatePush {
            household_id: self.id.clone(),
            background_kw: self.state.background_kw,
            interactive_kw: self.state.interactive_kw,
            total_kw: self.state.total_kw,
            voltage: self.state.voltage,
            reactive_kvar: self.state.reactive_kvar,
            current_a: self.state.current_a,
            updated_at: self.state.updated_at,
            active_appliance_ids: self.interactive.active_ids(),
        }
    }

    pub fn close_window(&mut self, window_start: OffsetDateTime, window_end: OffsetDateTime) -> ClosedBuffer {
        self.buffer.close(window_start, window_end)
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn effective_interactive_kw(&self, catalog: &ApplianceCatalog) -> f64 {
        if self.outage_active && self.outage_policy == OutagePolicy::WholeHousehold {
            0.0
        } else {
            self.interactive.interactive_kw(catalog)
        }
    }

    fn record(&mut self, at: OffsetDateTime) {
        let outcome = self.buffer.push(self.state.sample(at));
        if outcome.late {
            tracing::debug!(household_id = %self.id, at = %at, "sample arrived after its window closed");
            metrics::counter!("samples_late_total").increment(1);
        }
        if outcome.dropped > 0 {
            tracing::warn!(household_id = %self.id, dropped = outcome.dropped, "samples older than the buffer cap discarded");
            metrics::counter!("samples_dropped_total").increment(outcome.dropped as u64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::default_appliances;
    use crate::simulator::anomaly::{AnomalyKind, AnomalyState};
    use crate::simulator::SimulatorConfig;
    use approx::assert_relative_eq;
    use time::macros::datetime;
    use time::UtcOffset;

    fn catalog() -> ApplianceCatalog {
        ApplianceCatalog::new(default_appliances()).unwrap()
    }

    fn simulator() -> BackgroundSimulator {
        BackgroundSimulator::new(SimulatorConfig::default(), UtcOffset::UTC)
    }

    fn cell(profile: &str, policy: OutagePolicy) -> HouseholdCell {
        HouseholdCell::new(
            &HouseholdConfig::new("h1", profile),
            &catalog(),
            230.0,
            policy,
            Duration::minutes(2),
            household_rng(Some(7), "h1"),
            datetime!(2024-06-01 12:00:00 UTC),
        )
        .unwrap()
    }

    fn assert_total_invariant(c: &HouseholdCell) {
        let s = c.state();
        assert_relative_eq!(s.total_kw, s.background_kw + s.interactive_kw, epsilon = 1e-12);
    }

    #[test]
    fn seeded_rngs_are_per_household_and_reproducible() {
        use rand::Rng;
        let a1: u64 = household_rng(Some(1), "a").gen();
        let a2: u64 = household_rng(Some(1), "a").gen();
        let b: u64 = household_rng(Some(1), "b").gen();
        assert_eq!(a1, a2);
        assert_ne!(a1, b);
    }

    #[test]
    fn blank_household_id_is_rejected() {
        let err = HouseholdCell::new(
            &HouseholdConfig::new("  ", "normal"),
            &catalog(),
            230.0,
            OutagePolicy::default(),
            Duration::minutes(2),
            household_rng(Some(7), "x"),
            datetime!(2024-06-01 12:00:00 UTC),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn toggles_and_ticks_keep_total_equal_to_sum() {
        let cat = catalog();
        let sim = simulator();
        let mut c = cell("normal", OutagePolicy::BackgroundOnly);
        let t = datetime!(2024-06-01 12:00:00 UTC);

        c.tick(&sim, &cat, t).unwrap();
        assert_total_invariant(&c);

        let out = c.toggle(&cat, "kettle", true, t + Duration::seconds(1)).unwrap();
        assert_relative_eq!(out.interactive_kw, 2.0);
        assert_relative_eq!(out.total_kw, c.state().background_kw + 2.0, epsilon = 1e-12);
        assert_total_invariant(&c);

        c.tick(&sim, &cat, t + Duration::seconds(5)).unwrap();
        assert_relative_eq!(c.state().interactive_kw, 2.0);
        assert_total_invariant(&c);
        assert_eq!(c.buffered(), 3);
        assert_eq!(c.push().active_appliance_ids, vec!["kettle".to_string()]);
    }

    #[test]
    fn push_carries_background_electrics_from_the_last_tick() {
        let cat = catalog();
        let sim = simulator();
        let mut c = cell("normal", OutagePolicy::BackgroundOnly);
        c.tick(&sim, &cat, datetime!(2024-06-01 12:00:00 UTC)).unwrap();

        let push = c.push();
        let s = c.state();
        assert_relative_eq!(push.reactive_kvar, s.background_kw * 0.95f64.acos().tan(), epsilon = 1e-9);
        assert_relative_eq!(push.voltage, s.voltage);
        assert_relative_eq!(push.current_a, s.background_kw * 1000.0 / (s.voltage * 0.95), epsilon = 1e-9);
    }

    #[test]
    fn unknown_appliance_leaves_state_untouched() {
        let cat = catalog();
        let mut c = cell("normal", OutagePolicy::BackgroundOnly);
        let before = c.state().clone();

        let err = c
            .toggle(&cat, "jacuzzi", true, datetime!(2024-06-01 12:00:01 UTC))
            .unwrap_err();
        assert!(matches!(err, EngineError::ApplianceNotFound { .. }));
        assert_eq!(c.state(), &before);
        assert_eq!(c.buffered(), 0);
    }

    #[test]
    fn outage_zeroes_background_only_by_default() {
        let cat = catalog();
        let sim = simulator();
        let mut c = cell("normal", OutagePolicy::BackgroundOnly);
        let t = datetime!(2024-06-01 12:00:00 UTC);
        c.toggle(&cat, "tv", true, t).unwrap();
        c.sim.anomaly = AnomalyState::Active {
            kind: AnomalyKind::Outage,
            remaining: 3,
        };

        c.tick(&sim, &cat, t + Duration::seconds(5)).unwrap();
        assert_eq!(c.state().background_kw, 0.0);
        assert_relative_eq!(c.state().interactive_kw, 0.12);
        assert_relative_eq!(c.state().total_kw, 0.12);
    }

    #[test]
    fn whole_household_outage_discounts_interactive_until_it_clears() {
        let cat = catalog();
        let sim = simulator();
        let mut c = cell("normal", OutagePolicy::WholeHousehold);
        let t = datetime!(2024-06-01 12:00:00 UTC);
        c.toggle(&cat, "tv", true, t).unwrap();
        c.sim.anomaly = AnomalyState::Active {
            kind: AnomalyKind::Outage,
            remaining: 1,
        };

        c.tick(&sim, &cat, t + Duration::seconds(5)).unwrap();
        assert_eq!(c.state().total_kw, 0.0);
        assert_total_invariant(&c);

        // Toggling during the outage changes appliance state but not the load.
        let out = c.toggle(&cat, "kettle", true, t + Duration::seconds(6)).unwrap();
        assert_eq!(out.total_kw, 0.0);

        // The anomaly had one tick left; make sure no new one starts.
        c.sim.anomaly = AnomalyState::Idle;
        let mut quiet = SimulatorConfig::default();
        quiet.anomaly.probability = 0.0;
        let quiet = BackgroundSimulator::new(quiet, UtcOffset::UTC);
        c.tick(&quiet, &cat, t + Duration::seconds(10)).unwrap();
        assert_relative_eq!(c.state().interactive_kw, 2.12);
        assert_total_invariant(&c);
    }

    #[test]
    fn simulation_fault_falls_back_to_last_background() {
        let cat = catalog();
        let sim = simulator();
        let mut c = cell("normal", OutagePolicy::BackgroundOnly);
        let t = datetime!(2024-06-01 12:00:00 UTC);
        c.tick(&sim, &cat, t).unwrap();
        let last = c.state().background_kw;

        c.profile = "missing".to_string();
        let err = c.tick(&sim, &cat, t + Duration::seconds(5)).unwrap_err();
        assert!(matches!(err, EngineError::SimulationFault { .. }));
        assert_eq!(c.state().background_kw, last);
        assert_eq!(c.state().updated_at, t + Duration::seconds(5));
        assert_eq!(c.buffered(), 2);
    }
}
