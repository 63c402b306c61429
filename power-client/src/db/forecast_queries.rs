use anyhow::Result;
use sqlx::PgPool;
use time::OffsetDateTime;

use crate::domain::ForecastPoint;

/// Forecast points that lie entirely inside `[start, end)`.
///
/// Points straddling a bound are left out; the forecaster publishes on hour
/// boundaries so aligned periods always cover whole points.
pub async fn forecast_points_between(
    pool: &PgPool,
    household_id: &str,
    start: OffsetDateTime,
    end: OffsetDateTime,
) -> Result<Vec<ForecastPoint>> {
    let rows = sqlx::query_as::<_, ForecastPoint>(
        r#"
        SELECT
            household_id,
            period_start,
            period_end,
            forecast_kwh,
            confidence_lo,
            confidence_hi
        FROM forecast_points
        WHERE household_id = $1
          AND period_start >= $2
          AND period_end   <= $3
        ORDER BY period_start
        "#,
    )
    .bind(household_id)
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
