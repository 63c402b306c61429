//! Durable storage boundaries: minute readings, forecasts and leaderboard rows.

pub mod memory;
pub mod postgres;

use std::sync::Arc;

use power_client::domain::{ForecastPoint, MinuteReading, Period, RankEntry};
use time::OffsetDateTime;

use crate::error::EngineError;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait::async_trait]
pub trait ReadingStore: Send + Sync {
    /// Insert or replace the reading keyed by `(household_id, window_start)`.
    async fn upsert_reading(&self, reading: &MinuteReading) -> Result<(), EngineError>;

    /// Readings with `window_start` in `[start, end)`, oldest first.
    async fn readings_between(
        &self,
        household_id: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<MinuteReading>, EngineError>;
}

#[async_trait::async_trait]
pub trait ForecastSource: Send + Sync {
    /// Forecast points lying entirely inside `[start, end)`.
    async fn forecasts_between(
        &self,
        household_id: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<ForecastPoint>, EngineError>;
}

#[async_trait::async_trait]
pub trait ScoreSink: Send + Sync {
    /// Replace the recorded leaderboard of `period` with `entries`.
    async fn record_ranks(&self, period: Period, entries: &[RankEntry]) -> Result<(), EngineError>;
}

/// One backing store shared behind each storage boundary.
#[derive(Clone)]
pub struct Stores {
    pub readings: Arc<dyn ReadingStore>,
    pub forecasts: Arc<dyn ForecastSource>,
    pub scores: Arc<dyn ScoreSink>,
}

impl Stores {
    pub fn shared<T>(store: T) -> Self
    where
        T: ReadingStore + ForecastSource + ScoreSink + 'static,
    {
        let store = Arc::new(store);
        Self {
            readings: store.clone(),
            forecasts: store.clone(),
            scores: store,
        }
    }
}

#[async_trait::async_trait]
impl<T: ReadingStore + ?Sized> ReadingStore for Arc<T> {
    async fn upsert_reading(&self, reading: &MinuteReading) -> Result<(), EngineError> {
        (**self).upsert_reading(reading).await
    }

    async fn readings_between(
        &self,
        household_id: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<MinuteReading>, EngineError> {
        (**self).readings_between(household_id, start, end).await
    }
}

#[async_trait::async_trait]
impl<T: ForecastSource + ?Sized> ForecastSource for Arc<T> {
    async fn forecasts_between(
        &self,
        household_id: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<ForecastPoint>, EngineError> {
        (**self).forecasts_between(household_id, start, end).await
    }
}

#[async_trait::async_trait]
impl<T: ScoreSink + ?Sized> ScoreSink for Arc<T> {
    async fn record_ranks(&self, period: Period, entries: &[RankEntry]) -> Result<(), EngineError> {
        (**self).record_ranks(period, entries).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[tokio::test]
    async fn shared_handles_see_the_same_backing_store() {
        let stores = Stores::shared(MemoryStore::new());
        let start = datetime!(2024-06-01 12:00:00 UTC);
        stores
            .readings
            .upsert_reading(&MinuteReading {
                household_id: "h1".to_string(),
                window_start: start,
                avg_kw: 1.2,
                energy_kwh: 0.02,
                voltage: 230.0,
            })
            .await
            .unwrap();

        let handle = stores.clone();
        let rows = handle
            .readings
            .readings_between("h1", start, start + time::Duration::HOUR)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);

        let period = Period::new(start, start + time::Duration::HOUR).unwrap();
        stores.scores.record_ranks(period, &[]).await.unwrap();
        assert!(stores.forecasts.forecasts_between("h1", start, period.end).await.unwrap().is_empty());
    }
}
