use anyhow::Result;
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::domain::{Period, RankEntry};

/// Replace the stored leaderboard of `period` with `entries`.
///
/// Runs in one transaction, so readers never see a half-written board and a
/// household dropped from the recomputed board loses its old row.
pub async fn replace_period_ranks(pool: &PgPool, period: Period, entries: &[RankEntry]) -> Result<u64> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM efficiency_scores WHERE period_start = $1 AND period_end = $2")
        .bind(period.start)
        .bind(period.end)
        .execute(&mut *tx)
        .await?;

    let mut written = 0;
    if !entries.is_empty() {
        let mut builder = QueryBuilder::<Postgres>::new(
            "INSERT INTO efficiency_scores (household_id, period_start, period_end, actual_kwh, forecast_kwh, score, rank) ",
        );

        builder.push_values(entries, |mut b, e| {
            b.push_bind(&e.household_id)
                .push_bind(e.period.start)
                .push_bind(e.period.end)
                .push_bind(e.actual_kwh)
                .push_bind(e.forecast_kwh)
                .push_bind(e.score)
                .push_bind(e.rank as i32);
        });

        written = builder.build().execute(&mut *tx).await?.rows_affected();
    }

    tx.commit().await?;
    Ok(written)
}
