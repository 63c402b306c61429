//! Stochastic background load for a household.
//!
//! The simulator itself is immutable; everything that evolves between ticks
//! lives in [`SimState`], which the caller owns and threads through
//! [`BackgroundSimulator::tick`].

pub mod anomaly;
pub mod curves;
pub mod profile;

use std::collections::BTreeMap;

use rand::Rng;
use serde::Deserialize;
use time::{Duration, OffsetDateTime, UtcOffset};

use crate::error::EngineError;

pub use anomaly::{AnomalyConfig, AnomalyEffect, AnomalyKind, AnomalyState};
pub use curves::{Season, SeasonalMultipliers, TimeOfDayCurves};
pub use profile::{LoadProfile, OccasionalKind, OccasionalLoad};

/// Domain boosts applied to occasional appliance start probabilities.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct OccasionalBoosts {
    /// Water heaters during morning (06-09) and evening (18-22) hours.
    pub water_heater_peak: f64,
    /// Cooling loads in summer.
    pub cooling_in_season: f64,
    /// Heating loads in winter.
    pub heating_in_season: f64,
    /// Cooling outside summer and heating outside winter.
    pub off_season: f64,
}

impl Default for OccasionalBoosts {
    fn default() -> Self {
        Self {
            water_heater_peak: 3.0,
            cooling_in_season: 4.0,
            heating_in_season: 4.0,
            off_season: 0.1,
        }
    }
}

impl OccasionalBoosts {
    fn factor(&self, kind: OccasionalKind, hour: u8, season: Season) -> f64 {
        match kind {
            OccasionalKind::General => 1.0,
            OccasionalKind::WaterHeater => {
                if matches!(hour, 6..=9 | 18..=22) {
                    self.water_heater_peak
                } else {
                    1.0
                }
            }
            OccasionalKind::Cooling => {
                if season == Season::Summer {
                    self.cooling_in_season
                } else {
                    self.off_season
                }
            }
            OccasionalKind::Heating => {
                if season == Season::Winter {
                    self.heating_in_season
                } else {
                    self.off_season
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Symmetric multiplicative noise, e.g. 0.05 for +/-5%.
    pub noise_fraction: f64,
    /// Background never drops below this fraction of the profile baseline
    /// (before anomaly effects).
    pub min_fraction_of_baseline: f64,
    pub nominal_voltage: f64,
    pub voltage_variation: f64,
    pub power_factor: f64,
    pub time_of_day: TimeOfDayCurves,
    pub seasons: SeasonalMultipliers,
    pub boosts: OccasionalBoosts,
    pub anomaly: AnomalyConfig,
    pub profiles: Vec<LoadProfile>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            noise_fraction: 0.05,
            min_fraction_of_baseline: 0.3,
            nominal_voltage: 230.0,
            voltage_variation: 0.02,
            power_factor: 0.95,
            time_of_day: TimeOfDayCurves::default(),
            seasons: SeasonalMultipliers::default(),
            boosts: OccasionalBoosts::default(),
            anomaly: AnomalyConfig::default(),
            profiles: profile::builtin_profiles(),
        }
    }
}

impl SimulatorConfig {
    pub fn profile(&self, name: &str) -> Option<&LoadProfile> {
        self.profiles.iter().find(|p| p.name == name)
    }
}

/// Per-household simulator state carried from one tick to the next.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimState {
    /// Running occasional appliances, keyed by id, with their end time.
    pub occasional: BTreeMap<String, OffsetDateTime>,
    pub anomaly: AnomalyState,
}

/// One background reading for a household.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackgroundReading {
    pub background_kw: f64,
    pub voltage: f64,
    pub power_factor: f64,
    pub reactive_kvar: f64,
    pub current_a: f64,
    /// Anomaly applied to this reading, if any.
    pub anomaly: Option<AnomalyKind>,
    pub anomaly_started: bool,
}

impl BackgroundReading {
    pub fn is_outage(&self) -> bool {
        self.anomaly == Some(AnomalyKind::Outage)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TickOutcome {
    pub state: SimState,
    pub reading: BackgroundReading,
}

#[derive(Debug, Clone)]
pub struct BackgroundSimulator {
    config: SimulatorConfig,
    offset: UtcOffset,
}

impl BackgroundSimulator {
    pub fn new(config: SimulatorConfig, offset: UtcOffset) -> Self {
        Self { config, offset }
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    /// Compute the background load for `household_id` at `at`.
    ///
    /// `state` is not modified; the successor state is returned alongside the
    /// reading so a failed tick leaves the household's state as it was.
    pub fn tick<R: Rng + ?Sized>(
        &self,
        household_id: &str,
        state: &SimState,
        at: OffsetDateTime,
        profile_name: &str,
        rng: &mut R,
    ) -> Result<TickOutcome, EngineError> {
        let cfg = &self.config;
        let profile = cfg
            .profile(profile_name)
            .ok_or_else(|| EngineError::SimulationFault {
                household_id: household_id.to_string(),
                reason: format!("unknown profile '{profile_name}'"),
            })?;

        let local = at.to_offset(self.offset);
        let hour = local.hour();
        let minute_of_day = hour as u32 * 60 + local.minute() as u32;
        let season = Season::from_month(local.month());
        let tod = cfg.time_of_day.multiplier(hour, local.weekday());
        let seasonal = cfg.seasons.multiplier(season);

        let mut watts = profile.always_on_watts();

        watts += profile
            .cyclical
            .iter()
            .filter(|c| c.is_running(minute_of_day))
            .map(|c| c.watts)
            .sum::<f64>();

        for load in &profile.probabilistic {
            if draw(rng, load.probability * tod) {
                watts += load.watts;
            }
        }

        let mut occasional = state.occasional.clone();
        occasional.retain(|_, ends_at| *ends_at > at);
        if let Some(started) = self.start_occasional(profile, &occasional, hour, season, rng) {
            occasional.insert(
                started.id.clone(),
                at + Duration::minutes(started.duration_minutes as i64),
            );
        }
        watts += occasional
            .keys()
            .filter_map(|id| profile.occasional_load(id))
            .map(|o| o.watts)
            .sum::<f64>();

        let combined_kw = (profile.baseline_kw + watts / 1000.0) * seasonal * tod;
        let noisy_kw = combined_kw * (1.0 + symmetric(rng, cfg.noise_fraction));
        let mut background_kw = noisy_kw.max(profile.baseline_kw * cfg.min_fraction_of_baseline);
        let mut voltage = cfg.nominal_voltage * (1.0 + symmetric(rng, cfg.voltage_variation));

        let step = state.anomaly.advance(&cfg.anomaly, rng);
        let anomaly = step.applied.map(|(kind, effect)| {
            background_kw *= effect.power_multiplier;
            voltage *= effect.voltage_multiplier;
            kind
        });

        if !background_kw.is_finite() || !voltage.is_finite() || background_kw < 0.0 {
            return Err(EngineError::SimulationFault {
                household_id: household_id.to_string(),
                reason: format!("non-physical reading: {background_kw} kW at {voltage} V"),
            });
        }

        let power_factor = cfg.power_factor.clamp(0.01, 1.0);
        let reactive_kvar = background_kw * power_factor.acos().tan();
        let current_a = if voltage > 0.0 {
            background_kw * 1000.0 / (voltage * power_factor)
        } else {
            0.0
        };

        Ok(TickOutcome {
            state: SimState {
                occasional,
                anomaly: step.next,
            },
            reading: BackgroundReading {
                background_kw,
                voltage,
                power_factor,
                reactive_kvar,
                current_a,
                anomaly,
                anomaly_started: step.started,
            },
        })
    }

    /// Start at most one idle occasional appliance, first come first served.
    fn start_occasional<'p, R: Rng + ?Sized>(
        &self,
        profile: &'p LoadProfile,
        running: &BTreeMap<String, OffsetDateTime>,
        hour: u8,
        season: Season,
        rng: &mut R,
    ) -> Option<&'p OccasionalLoad> {
        profile
            .occasional
            .iter()
            .filter(|o| !running.contains_key(&o.id))
            .find(|o| {
                let boost = self.config.boosts.factor(o.kind, hour, season);
                draw(rng, o.probability * boost)
            })
    }
}

fn draw<R: Rng + ?Sized>(rng: &mut R, probability: f64) -> bool {
    let p = if probability.is_finite() {
        probability.clamp(0.0, 1.0)
    } else {
        0.0
    };
    p > 0.0 && rng.gen_bool(p)
}

fn symmetric<R: Rng + ?Sized>(rng: &mut R, fraction: f64) -> f64 {
    if fraction > 0.0 && fraction.is_finite() {
        rng.gen_range(-fraction..=fraction)
    } else {
        0.0
    }
}
