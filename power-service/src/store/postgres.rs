use power_client::db::{forecast_queries, minute_reading_queries, score_queries};
use power_client::domain::{ForecastPoint, MinuteReading, Period, RankEntry};
use sqlx::postgres::{PgPool, PgPoolOptions};
use time::OffsetDateTime;

use super::{ForecastSource, ReadingStore, ScoreSink};
use crate::error::EngineError;

fn storage_error(e: anyhow::Error) -> EngineError {
    EngineError::TransientStorage(format!("{e:#}"))
}

/// Postgres-wire store for readings, forecasts and leaderboard rows.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(uri: &str, max_connections: u32) -> Result<Self, EngineError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(uri)
            .await?;
        Ok(Self::new(pool))
    }

    pub async fn households_with_readings(
        &self,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<String>, EngineError> {
        minute_reading_queries::households_with_readings(&self.pool, start, end)
            .await
            .map_err(storage_error)
    }
}

#[async_trait::async_trait]
impl ReadingStore for PgStore {
    async fn upsert_reading(&self, reading: &MinuteReading) -> Result<(), EngineError> {
        minute_reading_queries::upsert_minute_reading(&self.pool, reading)
            .await
            .map_err(storage_error)
    }

    async fn readings_between(
        &self,
        household_id: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<MinuteReading>, EngineError> {
        minute_reading_queries::minute_readings_between(&self.pool, household_id, start, end)
            .await
            .map_err(storage_error)
    }
}

#[async_trait::async_trait]
impl ForecastSource for PgStore {
    async fn forecasts_between(
        &self,
        household_id: &str,
        start: OffsetDateTime,
        end: OffsetDateTime,
    ) -> Result<Vec<ForecastPoint>, EngineError> {
        forecast_queries::forecast_points_between(&self.pool, household_id, start, end)
            .await
            .map_err(storage_error)
    }
}

#[async_trait::async_trait]
impl ScoreSink for PgStore {
    async fn record_ranks(&self, period: Period, entries: &[RankEntry]) -> Result<(), EngineError> {
        let rows = score_queries::replace_period_ranks(&self.pool, period, entries)
            .await
            .map_err(storage_error)?;
        tracing::debug!(rows, "leaderboard rows written");
        Ok(())
    }
}
