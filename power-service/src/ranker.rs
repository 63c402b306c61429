use std::cmp::Ordering;

use power_client::domain::{EfficiencyScore, Period, PeriodError, RankEntry};
use serde::Deserialize;
use time::{OffsetDateTime, UtcOffset};

use crate::comparator::ForecastComparator;
use crate::error::EngineError;
use crate::store::{ForecastSource, ReadingStore, ScoreSink};

/// Length of the periods the running service scores as they close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScorePeriod {
    #[default]
    Hour,
    /// Local calendar day.
    Day,
}

impl ScorePeriod {
    pub fn containing(self, ts: OffsetDateTime, offset: UtcOffset) -> Result<Period, PeriodError> {
        match self {
            ScorePeriod::Hour => Period::hour_containing(ts),
            ScorePeriod::Day => Period::day_containing(ts, offset),
        }
    }

    pub fn seconds(self) -> u64 {
        match self {
            ScorePeriod::Hour => 3_600,
            ScorePeriod::Day => 86_400,
        }
    }
}

/// Leaderboard order: higher score first, then lower consumption, then id.
fn leaderboard_order(a: &EfficiencyScore, b: &EfficiencyScore) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.actual_kwh.total_cmp(&b.actual_kwh))
        .then_with(|| a.household_id.cmp(&b.household_id))
}

/// Rank the scores belonging to `period`. Ranks are 1-based and strict: no
/// two entries share a rank. Scores for other periods are ignored.
pub fn rank(period: Period, scores: &[EfficiencyScore]) -> Vec<RankEntry> {
    let mut in_period: Vec<&EfficiencyScore> = scores.iter().filter(|s| s.period == period).collect();
    in_period.sort_by(|a, b| leaderboard_order(a, b));

    in_period
        .into_iter()
        .enumerate()
        .map(|(i, s)| RankEntry::from_score(s.clone(), i as u32 + 1))
        .collect()
}

/// Scores every household for a period, ranks them and records the result.
pub struct Leaderboard<R, F, S> {
    comparator: ForecastComparator<R, F>,
    sink: S,
}

impl<R, F, S> Leaderboard<R, F, S>
where
    R: ReadingStore,
    F: ForecastSource,
    S: ScoreSink,
{
    pub fn new(comparator: ForecastComparator<R, F>, sink: S) -> Self {
        Self { comparator, sink }
    }

    /// Households without enough data are left off the board; storage errors
    /// abort the run so a partial board is never recorded.
    pub async fn score_and_rank(
        &self,
        period: Period,
        households: &[String],
    ) -> Result<Vec<RankEntry>, EngineError> {
        let mut scores = Vec::with_capacity(households.len());
        for household_id in households {
            match self.comparator.compare(household_id, period).await {
                Ok(score) => scores.push(score),
                Err(e @ EngineError::InsufficientData { .. }) => {
                    tracing::info!(household_id = %household_id, error = %e, "household left off the leaderboard");
                }
                Err(e) => return Err(e),
            }
        }

        let entries = rank(period, &scores);
        self.sink.record_ranks(period, &entries).await?;
        tracing::info!(
            period_start = %period.start,
            period_end = %period.end,
            ranked = entries.len(),
            skipped = households.len() - entries.len(),
            "leaderboard recomputed"
        );
        Ok(entries)
    }
}
