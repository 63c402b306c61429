mod efficiency_score;
mod forecast_point;
mod minute_reading;
mod period;

pub use efficiency_score::{EfficiencyScore, RankEntry};
pub use forecast_point::ForecastPoint;
pub use minute_reading::MinuteReading;
pub use period::{Period, PeriodError};
