use anyhow::Result;
use sqlx::PgPool;
use time::OffsetDateTime;

use crate::domain::MinuteReading;

/// Insert or replace the reading for `(household_id, window_start)`.
///
/// A retried flush of the same window overwrites the earlier row, so energy is
/// never counted twice.
pub async fn upsert_minute_reading(pool: &PgPool, reading: &MinuteReading) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO minute_readings (household_id, window_start, avg_kw, energy_kwh, voltage)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (household_id, window_start) DO UPDATE
        SET avg_kw     = EXCLUDED.avg_kw,
            energy_kwh = EXCLUDED.energy_kwh,
            voltage    = EXCLUDED.voltage
        "#,
    )
    .bind(&reading.household_id)
    .bind(reading.window_start)
    .bind(reading.avg_kw)
    .bind(reading.energy_kwh)
    .bind(reading.voltage)
    .execute(pool)
    .await?;

    Ok(())
}

/// Fetch a household's readings with `window_start` in `[start, end)`, oldest first.
pub async fn minute_readings_between(
    pool: &PgPool,
    household_id: &str,
    start: OffsetDateTime,
    end: OffsetDateTime,
) -> Result<Vec<MinuteReading>> {
    let rows = sqlx::query_as::<_, MinuteReading>(
        r#"
        SELECT
            household_id,
            window_start,
            avg_kw,
            energy_kwh,
            voltage
        FROM minute_readings
        WHERE household_id = $1
          AND window_start >= $2
          AND window_start <  $3
        ORDER BY window_start
        "#,
    )
    .bind(household_id)
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Households that have at least one reading in `[start, end)`.
pub async fn households_with_readings(
    pool: &PgPool,
    start: OffsetDateTime,
    end: OffsetDateTime,
) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        r#"
        SELECT DISTINCT household_id
        FROM minute_readings
        WHERE window_start >= $1
          AND window_start <  $2
        ORDER BY household_id
        "#,
    )
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}
