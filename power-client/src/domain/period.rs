use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime, Time, UtcOffset};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum PeriodError {
    #[error("period end {end} is not after start {start}")]
    Empty {
        start: OffsetDateTime,
        end: OffsetDateTime,
    },
    #[error("timestamp out of range: {0}")]
    OutOfRange(String),
}

/// Half-open interval `[start, end)` used for scoring and ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Period {
    #[serde(with = "time::serde::rfc3339")]
    pub start: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub end: OffsetDateTime,
}

impl Period {
    pub fn new(start: OffsetDateTime, end: OffsetDateTime) -> Result<Self, PeriodError> {
        if end <= start {
            return Err(PeriodError::Empty { start, end });
        }
        Ok(Self { start, end })
    }

    /// The UTC clock hour containing `ts`.
    pub fn hour_containing(ts: OffsetDateTime) -> Result<Self, PeriodError> {
        let secs = ts.unix_timestamp();
        let start = OffsetDateTime::from_unix_timestamp(secs - secs.rem_euclid(3600))
            .map_err(|e| PeriodError::OutOfRange(e.to_string()))?;
        Self::new(start, start + Duration::HOUR)
    }

    /// The local calendar day containing `ts`, for a household at `offset`.
    pub fn day_containing(ts: OffsetDateTime, offset: UtcOffset) -> Result<Self, PeriodError> {
        let start = ts
            .to_offset(offset)
            .replace_time(Time::MIDNIGHT)
            .to_offset(UtcOffset::UTC);
        Self::new(start, start + Duration::DAY)
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn contains(&self, ts: OffsetDateTime) -> bool {
        ts >= self.start && ts < self.end
    }

    /// Number of aggregation windows of length `window` that fit in the period.
    pub fn expected_windows(&self, window: Duration) -> u64 {
        if window <= Duration::ZERO {
            return 0;
        }
        let total = self.duration().whole_seconds();
        let step = window.whole_seconds().max(1);
        (total / step).max(0) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{datetime, offset};

    #[test]
    fn rejects_empty_period() {
        let t = datetime!(2024-06-01 10:00:00 UTC);
        assert!(matches!(Period::new(t, t), Err(PeriodError::Empty { .. })));
    }

    #[test]
    fn hour_containing_truncates_to_the_hour() {
        let p = Period::hour_containing(datetime!(2024-06-01 10:42:17 UTC)).unwrap();
        assert_eq!(p.start, datetime!(2024-06-01 10:00:00 UTC));
        assert_eq!(p.end, datetime!(2024-06-01 11:00:00 UTC));
        assert_eq!(p.expected_windows(Duration::minutes(1)), 60);
    }

    #[test]
    fn day_containing_respects_local_offset() {
        // 23:30 UTC is already the next day at +02:00.
        let p = Period::day_containing(datetime!(2024-06-01 23:30:00 UTC), offset!(+2)).unwrap();
        assert_eq!(p.start, datetime!(2024-06-01 22:00:00 UTC));
        assert_eq!(p.end, datetime!(2024-06-02 22:00:00 UTC));
        assert!(p.contains(datetime!(2024-06-01 23:30:00 UTC)));
        assert!(!p.contains(p.end));
    }

    #[test]
    fn serializes_bounds_as_rfc3339() {
        let p = Period::hour_containing(datetime!(2024-06-01 10:42:17 UTC)).unwrap();
        let json = serde_json::to_string(&p).unwrap();
        assert!(json.contains("2024-06-01T10:00:00Z"));
    }
}
