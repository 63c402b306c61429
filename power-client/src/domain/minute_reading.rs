use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// One closed aggregation window for a household.
///
/// Rows are keyed by `(household_id, window_start)`; writing the same key twice
/// replaces the row instead of adding a second one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct MinuteReading {
    pub household_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub window_start: OffsetDateTime,
    pub avg_kw: f64,
    pub energy_kwh: f64,
    pub voltage: f64,
}

impl MinuteReading {
    pub fn key(&self) -> (String, OffsetDateTime) {
        (self.household_id.clone(), self.window_start)
    }
}
