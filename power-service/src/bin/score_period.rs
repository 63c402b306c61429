use anyhow::{bail, Context, Result};
use power_client::domain::Period;
use power_service::{
    comparator::ForecastComparator, config::AppConfig, observability, ranker::Leaderboard, store::PgStore,
};
use std::env;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

fn parse_ts(arg: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(arg, &Rfc3339).with_context(|| format!("'{arg}' is not an RFC 3339 timestamp"))
}

/// Recompute efficiency scores and leaderboard ranks for `[start, end)` from
/// the persisted readings and forecasts, and write them back.
#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        bail!("usage: score-period <start_rfc3339> <end_rfc3339>");
    }
    let period = Period::new(parse_ts(&args[1])?, parse_ts(&args[2])?)?;

    let cfg = AppConfig::load()?;
    let Some(uri) = &cfg.storage.uri else {
        bail!("storage.uri must be configured to score a period");
    };
    let store = PgStore::connect(uri, cfg.storage.max_connections).await?;

    let households = store.households_with_readings(period.start, period.end).await?;
    tracing::info!(
        period_start = %period.start,
        period_end = %period.end,
        households = households.len(),
        "scoring period"
    );

    let comparator = ForecastComparator::new(
        store.clone(),
        store.clone(),
        cfg.engine.window(),
        cfg.comparator.min_coverage,
    );
    let board = Leaderboard::new(comparator, store);
    let entries = board.score_and_rank(period, &households).await?;

    for entry in &entries {
        println!("{}", serde_json::to_string(entry)?);
    }

    Ok(())
}
