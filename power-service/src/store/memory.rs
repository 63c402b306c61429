use std::collections::BTreeMap;
use std::sync::RwLock;

use power_client::domain::{ForecastPoint, MinuteReading, Period, RankEntry};
use time::OffsetDateTime;

use super::{ForecastSource, ReadingStore, ScoreSink};
use crate::error::EngineError;

type ReadingKey = (String, OffsetDateTime);

/// In-process store used when no database is configured, and by tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    readings: RwLock<BTreeMap<ReadingKey, MinuteReading>>,
    forecasts: RwLock<BTreeMap<ReadingKey, ForecastPoint>>,
    ranks: RwLock<BTreeMap<(Period, String), RankEntry>>,
}

fn poisoned() -> EngineError {
    EngineError::TransientStorage("memory store lock poisoned".to_string())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_forecast(&self, point: ForecastPoint) -> Result<(), EngineError> {
        let mut forecasts = self.forecasts.write().map_err(|_| poisoned())?;
        forecasts.insert((point.household_id.clone(), point.period_start), point);
        Ok(())
    }

    pub fn readings(&self) -> Vec<MinuteReading> {
        self.readings
            .read()
            .map(|r| r.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn rank_entries(&self, period: Period) -> Vec<RankEntry> {
        let mut entries: Vec<RankEntry> = self
            .ranks
            .read()
            .map(|r| {
                r.iter()
                    .filter(|((p, _), _)| *p == period)
                    .map(|(_, e)| e.clone())
                    .collect()
            })
            .unwrap_or_default();
        entries.sort_by_key(|e| e.rank);
        entries
    }
}

#[async_trait::async_trait]
impl ReadingStore for MemoryStore {
    async fn upsert_reading(&self, reading: &MinuteReading) -> Result<(), EngineError> {
        let mut readings = self.readings.write().map_err(|_| poisoned())?;
        readings.insert(reading.key(), reading.clone());
        Ok(())
    }

    async fn readings_between(
        &self,
        household_id: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<MinuteReading>, EngineError> {
        let readings = self.readings.read().map_err(|_| poisoned())?;
        Ok(readings
            .range((household_id.to_string(), start)..(household_id.to_string(), end))
            .map(|(_, r)| r.clone())
            .collect())
    }
}

#[async_trait::async_trait]
impl ForecastSource for MemoryStore {
    async fn forecasts_between(
        &self,
        household_id: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<ForecastPoint>, EngineError> {
        let forecasts = self.forecasts.read().map_err(|_| poisoned())?;
        Ok(forecasts
            .range((household_id.to_string(), start)..(household_id.to_string(), end))
            .map(|(_, p)| p)
            .filter(|p| p.period_end <= end)
            .cloned()
            .collect())
    }
}

#[async_trait::async_trait]
impl ScoreSink for MemoryStore {
    async fn record_ranks(&self, period: Period, entries: &[RankEntry]) -> Result<(), EngineError> {
        let mut ranks = self.ranks.write().map_err(|_| poisoned())?;
        ranks.retain(|(p, _), _| *p != period);
        for e in entries {
            ranks.insert((e.period, e.household_id.clone()), e.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;
    use time::Duration;

    fn reading(household: &str, start: OffsetDateTime, kwh: f64) -> MinuteReading {
        MinuteReading {
            household_id: household.to_string(),
            window_start: start,
            avg_kw: kwh * 60.0,
            energy_kwh: kwh,
            voltage: 230.0,
        }
    }

    #[tokio::test]
    async fn upsert_replaces_instead_of_duplicating() {
        let store = MemoryStore::new();
        let t = datetime!(2024-06-01 12:00:00 UTC);
        store.upsert_reading(&reading("h1", t, 0.02)).await.unwrap();
        store.upsert_reading(&reading("h1", t, 0.02)).await.unwrap();
        store.upsert_reading(&reading("h1", t, 0.03)).await.unwrap();

        let rows = store.readings();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].energy_kwh, 0.03);
    }

    #[tokio::test]
    async fn range_query_is_half_open_and_per_household() {
        let store = MemoryStore::new();
        let t = datetime!(2024-06-01 12:00:00 UTC);
        for i in 0..5 {
            store
                .upsert_reading(&reading("h1", t + Duration::minutes(i), 0.01))
                .await
                .unwrap();
        }
        store.upsert_reading(&reading("h2", t, 0.01)).await.unwrap();

        let rows = store
            .readings_between("h1", t + Duration::minutes(1), t + Duration::minutes(4))
            .await
            .unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.household_id == "h1"));
    }

    #[tokio::test]
    async fn forecasts_straddling_the_end_are_excluded() {
        let store = MemoryStore::new();
        let t = datetime!(2024-06-01 12:00:00 UTC);
        for (start, len) in [(0, 60), (60, 60), (120, 90)] {
            store
                .insert_forecast(ForecastPoint {
                    household_id: "h1".to_string(),
                    period_start: t + Duration::minutes(start),
                    period_end: t + Duration::minutes(start + len),
                    forecast_kwh: 1.0,
                    confidence_lo: 0.8,
                    confidence_hi: 1.2,
                })
                .unwrap();
        }

        let points = store
            .forecasts_between("h1", t, t + Duration::minutes(180))
            .await
            .unwrap();
        assert_eq!(points.len(), 2);
    }

    #[tokio::test]
    async fn recording_a_board_replaces_the_previous_one() {
        let t = datetime!(2024-06-01 00:00:00 UTC);
        let period = Period::new(t, t + Duration::HOUR).unwrap();
        let entry = |id: &str, rank: u32| RankEntry {
            household_id: id.to_string(),
            period,
            actual_kwh: 1.0,
            forecast_kwh: 2.0,
            score: 50.0,
            rank,
        };
        let store = MemoryStore::new();
        store.record_ranks(period, &[entry("a", 1), entry("b", 2)]).await.unwrap();
        store.record_ranks(period, &[entry("b", 1)]).await.unwrap();

        let board = store.rank_entries(period);
        assert_eq!(board.len(), 1);
        assert_eq!(board[0].household_id, "b");
    }
}
