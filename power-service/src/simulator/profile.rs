use serde::Deserialize;

/// Load that draws power on every tick (fridge, router, standby).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FixedLoad {
    pub name: String,
    pub watts: f64,
}

/// Load that runs for the first `duty_cycle` fraction of every `cycle_minutes`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CyclicalLoad {
    pub name: String,
    pub watts: f64,
    pub cycle_minutes: u32,
    pub duty_cycle: f64,
}

impl CyclicalLoad {
    pub fn is_running(&self, minute_of_day: u32) -> bool {
        if self.cycle_minutes == 0 {
            return false;
        }
        let phase = (minute_of_day % self.cycle_minutes) as f64 / self.cycle_minutes as f64;
        phase < self.duty_cycle
    }
}

/// Load drawn independently on each tick with a time-of-day scaled probability.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProbabilisticLoad {
    pub name: String,
    pub watts: f64,
    pub probability: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OccasionalKind {
    General,
    WaterHeater,
    Cooling,
    Heating,
}

/// High-power appliance that, once started, runs for a fixed duration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OccasionalLoad {
    pub id: String,
    pub watts: f64,
    pub duration_minutes: u32,
    pub probability: f64,
    #[serde(default = "default_occasional_kind")]
    pub kind: OccasionalKind,
}

fn default_occasional_kind() -> OccasionalKind {
    OccasionalKind::General
}

/// Named consumption pattern a household is simulated with.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LoadProfile {
    pub name: String,
    pub baseline_kw: f64,
    #[serde(default)]
    pub always_on: Vec<FixedLoad>,
    #[serde(default)]
    pub cyclical: Vec<CyclicalLoad>,
    #[serde(default)]
    pub probabilistic: Vec<ProbabilisticLoad>,
    #[serde(default)]
    pub occasional: Vec<OccasionalLoad>,
}

impl LoadProfile {
    pub fn occasional_load(&self, id: &str) -> Option<&OccasionalLoad> {
        self.occasional.iter().find(|o| o.id == id)
    }

    pub fn always_on_watts(&self) -> f64 {
        self.always_on.iter().map(|l| l.watts).sum()
    }
}

fn fixed(name: &str, watts: f64) -> FixedLoad {
    FixedLoad {
        name: name.to_string(),
        watts,
    }
}

fn cyclical(name: &str, watts: f64, cycle_minutes: u32, duty_cycle: f64) -> CyclicalLoad {
    CyclicalLoad {
        name: name.to_string(),
        watts,
        cycle_minutes,
        duty_cycle,
    }
}

fn probabilistic(name: &str, watts: f64, probability: f64) -> ProbabilisticLoad {
    ProbabilisticLoad {
        name: name.to_string(),
        watts,
        probability,
    }
}

fn occasional(
    id: &str,
    watts: f64,
    duration_minutes: u32,
    probability: f64,
    kind: OccasionalKind,
) -> OccasionalLoad {
    OccasionalLoad {
        id: id.to_string(),
        watts,
        duration_minutes,
        probability,
        kind,
    }
}

fn standard_occasionals(scale: f64) -> Vec<OccasionalLoad> {
    vec![
        occasional("water_heater", 3000.0, 30, 0.004 * scale, OccasionalKind::WaterHeater),
        occasional("central_ac", 3500.0, 45, 0.003 * scale, OccasionalKind::Cooling),
        occasional("heat_pump", 2500.0, 60, 0.003 * scale, OccasionalKind::Heating),
        occasional("dishwasher", 1800.0, 90, 0.002 * scale, OccasionalKind::General),
    ]
}

/// Built-in normal/high/low/vacation profiles.
pub fn builtin_profiles() -> Vec<LoadProfile> {
    vec![
        LoadProfile {
            name: "normal".to_string(),
            baseline_kw: 0.35,
            always_on: vec![fixed("router", 10.0), fixed("standby", 40.0)],
            cyclical: vec![
                cyclical("fridge", 150.0, 30, 0.4),
                cyclical("freezer", 120.0, 45, 0.3),
            ],
            probabilistic: vec![
                probabilistic("lighting", 200.0, 0.3),
                probabilistic("computer", 150.0, 0.2),
            ],
            occasional: standard_occasionals(1.0),
        },
        LoadProfile {
            name: "high".to_string(),
            baseline_kw: 0.6,
            always_on: vec![
                fixed("router", 10.0),
                fixed("standby", 80.0),
                fixed("aquarium", 100.0),
            ],
            cyclical: vec![
                cyclical("fridge", 180.0, 30, 0.45),
                cyclical("freezer", 150.0, 45, 0.35),
                cyclical("pool_pump", 900.0, 120, 0.5),
            ],
            probabilistic: vec![
                probabilistic("lighting", 350.0, 0.4),
                probabilistic("computer", 300.0, 0.35),
            ],
            occasional: standard_occasionals(1.5),
        },
        LoadProfile {
            name: "low".to_string(),
            baseline_kw: 0.2,
            always_on: vec![fixed("router", 8.0)],
            cyclical: vec![cyclical("fridge", 100.0, 30, 0.35)],
            probabilistic: vec![probabilistic("lighting", 80.0, 0.25)],
            occasional: standard_occasionals(0.5),
        },
        LoadProfile {
            name: "vacation".to_string(),
            baseline_kw: 0.1,
            always_on: vec![fixed("router", 8.0)],
            cyclical: vec![cyclical("fridge", 100.0, 30, 0.3)],
            probabilistic: vec![],
            occasional: vec![],
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cyclical_duty_uses_minute_phase() {
        let fridge = cyclical("fridge", 150.0, 30, 0.4);
        // 0.4 * 30 = first 12 minutes of each cycle.
        assert!(fridge.is_running(0));
        assert!(fridge.is_running(11));
        assert!(!fridge.is_running(12));
        assert!(!fridge.is_running(29));
        assert!(fridge.is_running(30));
    }

    #[test]
    fn zero_length_cycle_never_runs() {
        let broken = cyclical("broken", 100.0, 0, 1.0);
        assert!(!broken.is_running(0));
    }

    #[test]
    fn builtin_profiles_are_named_and_unique() {
        let profiles = builtin_profiles();
        let names: Vec<_> = profiles.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["normal", "high", "low", "vacation"]);
        assert!(profiles[0].occasional_load("water_heater").is_some());
        assert_eq!(profiles[0].always_on_watts(), 50.0);
    }
}
