use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Expected consumption for a household over `[period_start, period_end)`,
/// as published by the external forecaster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct ForecastPoint {
    pub household_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub period_start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub period_end: OffsetDateTime,
    pub forecast_kwh: f64,
    pub confidence_lo: f64,
    pub confidence_hi: f64,
}
