use serde::{Deserialize, Serialize};

use super::Period;

/// Forecast-vs-actual comparison for one household and period.
///
/// `score` is positive when the household used less than forecast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EfficiencyScore {
    pub household_id: String,
    pub period: Period,
    pub actual_kwh: f64,
    pub forecast_kwh: f64,
    pub score: f64,
}

/// A household's position on the leaderboard for a period. Ranks start at 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankEntry {
    pub household_id: String,
    pub period: Period,
    pub actual_kwh: f64,
    pub forecast_kwh: f64,
    pub score: f64,
    pub rank: u32,
}

impl RankEntry {
    pub fn from_score(score: EfficiencyScore, rank: u32) -> Self {
        Self {
            household_id: score.household_id,
            period: score.period,
            actual_kwh: score.actual_kwh,
            forecast_kwh: score.forecast_kwh,
            score: score.score,
            rank,
        }
    }
}
