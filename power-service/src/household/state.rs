use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Current merged power of a household.
///
/// `total_kw` is only ever written by [`PowerState::recompute`], so it always
/// equals `background_kw + interactive_kw`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PowerState {
    pub household_id: String,
    pub background_kw: f64,
    pub interactive_kw: f64,
    pub total_kw: f64,
    pub voltage: f64,
    /// Reactive power and line current estimated for the background load.
    pub reactive_kvar: f64,
    pub current_a: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl PowerState {
    pub fn new(household_id: &str, voltage: f64, at: OffsetDateTime) -> Self {
        Self {
            household_id: household_id.to_string(),
            background_kw: 0.0,
            interactive_kw: 0.0,
            total_kw: 0.0,
            voltage,
            reactive_kvar: 0.0,
            current_a: 0.0,
            updated_at: at,
        }
    }

    pub fn set_background(&mut self, background_kw: f64, voltage: f64, at: OffsetDateTime) {
        self.background_kw = background_kw;
        self.voltage = voltage;
        self.recompute(at);
    }

    pub fn set_electrics(&mut self, reactive_kvar: f64, current_a: f64) {
        self.reactive_kvar = reactive_kvar;
        self.current_a = current_a;
    }

    pub fn set_interactive(&mut self, interactive_kw: f64, at: OffsetDateTime) {
        self.interactive_kw = interactive_kw;
        self.recompute(at);
    }

    fn recompute(&mut self, at: OffsetDateTime) {
        self.total_kw = self.background_kw + self.interactive_kw;
        // Late events never move the clock backwards.
        if at > self.updated_at {
            self.updated_at = at;
        }
    }

    pub fn sample(&self, at: OffsetDateTime) -> PowerSample {
        PowerSample {
            household_id: self.household_id.clone(),
            timestamp: at,
            background_kw: self.background_kw,
            interactive_kw: self.interactive_kw,
            total_kw: self.total_kw,
            voltage: self.voltage,
        }
    }
}

/// Instantaneous reading appended to the household's open buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct PowerSample {
    pub household_id: String,
    pub timestamp: OffsetDateTime,
    pub background_kw: f64,
    pub interactive_kw: f64,
    pub total_kw: f64,
    pub voltage: f64,
}

/// Outbound power-state notification for the push transport.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PowerStatePush {
    pub household_id: String,
    pub background_kw: f64,
    pub interactive_kw: f64,
    pub total_kw: f64,
    pub voltage: f64,
    pub reactive_kvar: f64,
    pub current_a: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    pub active_appliance_ids: Vec<String>,
}

/// Inbound request to switch an appliance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToggleEvent {
    pub household_id: String,
    pub appliance_id: String,
    pub is_on: bool,
}

/// Reply to an accepted toggle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ToggleOutcome {
    pub interactive_kw: f64,
    pub total_kw: f64,
}
