use serde::Deserialize;
use time::{Month, Weekday};

pub const HOURS_PER_DAY: usize = 24;

/// Hour-of-day load multipliers, one table for weekdays and one for weekends.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TimeOfDayCurves {
    pub weekday: Vec<f64>,
    pub weekend: Vec<f64>,
}

impl Default for TimeOfDayCurves {
    fn default() -> Self {
        Self {
            weekday: vec![
                0.50, 0.45, 0.40, 0.40, 0.45, 0.60, // 00-05
                1.20, 1.60, 1.40, 1.00, 0.90, 0.90, // 06-11
                1.00, 0.90, 0.85, 0.90, 1.10, 1.50, // 12-17
                1.80, 1.90, 1.70, 1.40, 1.00, 0.70, // 18-23
            ],
            weekend: vec![
                0.60, 0.50, 0.45, 0.40, 0.40, 0.45, // 00-05
                0.60, 0.90, 1.20, 1.30, 1.30, 1.30, // 06-11
                1.40, 1.30, 1.20, 1.20, 1.30, 1.50, // 12-17
                1.70, 1.80, 1.60, 1.40, 1.10, 0.80, // 18-23
            ],
        }
    }
}

impl TimeOfDayCurves {
    /// Multiplier for a local hour. Tables shorter than 24 entries fall back to 1.0.
    pub fn multiplier(&self, hour: u8, weekday: Weekday) -> f64 {
        let table = if is_weekend(weekday) {
            &self.weekend
        } else {
            &self.weekday
        };
        table.get(hour as usize).copied().unwrap_or(1.0)
    }
}

pub fn is_weekend(weekday: Weekday) -> bool {
    matches!(weekday, Weekday::Saturday | Weekday::Sunday)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Season {
    Winter,
    Spring,
    Summer,
    Autumn,
}

impl Season {
    /// Meteorological seasons, northern hemisphere.
    pub fn from_month(month: Month) -> Self {
        use Month::*;
        match month {
            December | January | February => Season::Winter,
            March | April | May => Season::Spring,
            June | July | August => Season::Summer,
            September | October | November => Season::Autumn,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SeasonalMultipliers {
    pub winter: f64,
    pub spring: f64,
    pub summer: f64,
    pub autumn: f64,
}

impl Default for SeasonalMultipliers {
    fn default() -> Self {
        Self {
            winter: 1.25,
            spring: 1.0,
            summer: 1.15,
            autumn: 1.05,
        }
    }
}

impl SeasonalMultipliers {
    pub fn multiplier(&self, season: Season) -> f64 {
        match season {
            Season::Winter => self.winter,
            Season::Spring => self.spring,
            Season::Summer => self.summer,
            Season::Autumn => self.autumn,
        }
    }

    pub fn for_month(&self, month: Month) -> f64 {
        self.multiplier(Season::from_month(month))
    }
}
