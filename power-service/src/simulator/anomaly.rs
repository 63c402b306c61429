use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    Surge,
    Brownout,
    VoltageSpike,
    Outage,
    VoltageDip,
}

impl AnomalyKind {
    pub const ALL: [AnomalyKind; 5] = [
        AnomalyKind::Surge,
        AnomalyKind::Brownout,
        AnomalyKind::VoltageSpike,
        AnomalyKind::Outage,
        AnomalyKind::VoltageDip,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Surge => "surge",
            Self::Brownout => "brownout",
            Self::VoltageSpike => "voltage_spike",
            Self::Outage => "outage",
            Self::VoltageDip => "voltage_dip",
        }
    }
}

/// How one anomaly kind scales the reading, and for how many ticks.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct AnomalyEffect {
    pub duration_ticks: u32,
    pub power_multiplier: f64,
    pub voltage_multiplier: f64,
}

impl AnomalyEffect {
    const fn new(duration_ticks: u32, power_multiplier: f64, voltage_multiplier: f64) -> Self {
        Self {
            duration_ticks,
            power_multiplier,
            voltage_multiplier,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    /// Chance per idle tick that a new anomaly starts.
    pub probability: f64,
    pub surge: AnomalyEffect,
    pub brownout: AnomalyEffect,
    pub voltage_spike: AnomalyEffect,
    pub outage: AnomalyEffect,
    pub voltage_dip: AnomalyEffect,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            probability: 0.001,
            surge: AnomalyEffect::new(5, 1.5, 1.05),
            brownout: AnomalyEffect::new(10, 0.7, 0.85),
            voltage_spike: AnomalyEffect::new(2, 1.0, 1.15),
            outage: AnomalyEffect::new(6, 0.0, 0.0),
            voltage_dip: AnomalyEffect::new(4, 0.95, 0.9),
        }
    }
}

impl AnomalyConfig {
    pub fn effect(&self, kind: AnomalyKind) -> AnomalyEffect {
        match kind {
            AnomalyKind::Surge => self.surge,
            AnomalyKind::Brownout => self.brownout,
            AnomalyKind::VoltageSpike => self.voltage_spike,
            AnomalyKind::Outage => self.outage,
            AnomalyKind::VoltageDip => self.voltage_dip,
        }
    }
}

/// Per-household anomaly state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnomalyState {
    #[default]
    Idle,
    Active { kind: AnomalyKind, remaining: u32 },
}

/// Result of advancing the anomaly state by one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnomalyStep {
    pub next: AnomalyState,
    /// Effect to apply to this tick's reading, if an anomaly is in force.
    pub applied: Option<(AnomalyKind, AnomalyEffect)>,
    pub started: bool,
}

impl AnomalyState {
    /// idle -> active on a probability draw; active counts down and returns to
    /// idle once its last tick has been applied.
    pub fn advance<R: Rng + ?Sized>(self, config: &AnomalyConfig, rng: &mut R) -> AnomalyStep {
        match self {
            AnomalyState::Idle => {
                let p = config.probability.clamp(0.0, 1.0);
                if p > 0.0 && rng.gen_bool(p) {
                    let kind = AnomalyKind::ALL[rng.gen_range(0..AnomalyKind::ALL.len())];
                    let duration = config.effect(kind).duration_ticks.max(1);
                    let mut step = Self::apply(kind, duration, config);
                    step.started = true;
                    step
                } else {
                    AnomalyStep {
                        next: AnomalyState::Idle,
                        applied: None,
                        started: false,
                    }
                }
            }
            AnomalyState::Active { kind, remaining } => Self::apply(kind, remaining, config),
        }
    }

    fn apply(kind: AnomalyKind, remaining: u32, config: &AnomalyConfig) -> AnomalyStep {
        let left = remaining.saturating_sub(1);
        let next = if left == 0 {
            AnomalyState::Idle
        } else {
            AnomalyState::Active {
                kind,
                remaining: left,
            }
        };
        AnomalyStep {
            next,
            applied: Some((kind, config.effect(kind))),
            started: false,
        }
    }

    pub fn is_outage(&self) -> bool {
        matches!(
            self,
            AnomalyState::Active {
                kind: AnomalyKind::Outage,
                ..
            }
        )
    }
}
