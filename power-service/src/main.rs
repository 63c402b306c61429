use std::sync::Arc;

use anyhow::Result;
use power_service::{
    aggregator::Flusher,
    comparator::ForecastComparator,
    config::AppConfig,
    metrics_server, observability,
    ranker::Leaderboard,
    runtime,
    sinks::EngineToggleSink,
    sources::NdjsonToggleSource,
    store::{MemoryStore, PgStore, Stores},
    transform::ToggleValidation,
    EngineContext, Pipeline, PowerEngine,
};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let cfg = AppConfig::load()?;

    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr)?;
    }

    let engine_cfg = &cfg.engine;
    let ctx = EngineContext::new(
        cfg.build_catalog()?,
        cfg.build_simulator()?,
        engine_cfg.outage_policy,
        engine_cfg.max_buffer_age(),
        engine_cfg.seed,
        engine_cfg.channel_capacity,
    );
    let (engine, workers) = PowerEngine::spawn(ctx, engine_cfg.workers, engine_cfg.channel_capacity);

    for household in &cfg.households {
        engine.register(household.clone()).await?;
    }

    let stores = match &cfg.storage.uri {
        Some(uri) => Stores::shared(PgStore::connect(uri, cfg.storage.max_connections).await?),
        None => {
            tracing::warn!("no storage.uri configured, readings and scores are kept in memory only");
            Stores::shared(MemoryStore::new())
        }
    };
    let flusher = Arc::new(Flusher::new(
        stores.readings.clone(),
        engine_cfg.window(),
        engine_cfg.empty_window_policy,
        cfg.storage.retry_policy(),
        cfg.storage.flush_concurrency,
    ));

    let cancel = CancellationToken::new();
    let tick_driver = tokio::spawn(runtime::run_tick_driver(
        engine.clone(),
        engine_cfg.tick_interval(),
        cancel.clone(),
    ));
    let flush_driver = tokio::spawn(runtime::run_flush_driver(
        engine.clone(),
        flusher.clone(),
        cancel.clone(),
    ));

    let comparator = ForecastComparator::new(
        stores.readings.clone(),
        stores.forecasts.clone(),
        engine_cfg.window(),
        cfg.comparator.min_coverage,
    );
    let score_driver = tokio::spawn(runtime::run_score_driver(
        engine.clone(),
        Arc::new(Leaderboard::new(comparator, stores.scores.clone())),
        cfg.comparator.score_period,
        engine_cfg.utc_offset()?,
        cfg.comparator.score_settle(),
        cancel.clone(),
    ));

    let toggle_feed = cfg.toggle_feed.as_ref().map(|feed| {
        let pipeline = Pipeline::new(
            NdjsonToggleSource::new(&feed.path),
            EngineToggleSink::new(engine.clone()),
        )
        .with_transform(ToggleValidation);
        tokio::spawn(async move {
            if let Err(e) = pipeline.run().await {
                tracing::error!(error = %e, "toggle feed stopped");
            }
        })
    });

    tracing::info!(
        households = cfg.households.len(),
        tick_interval_ms = engine_cfg.tick_interval_ms,
        window_secs = engine_cfg.window_secs,
        score_period = ?cfg.comparator.score_period,
        "power service running"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");

    cancel.cancel();
    if let Some(feed) = toggle_feed {
        feed.abort();
    }
    runtime::join_drivers(vec![
        ("tick", tick_driver),
        ("flush", flush_driver),
        ("score", score_driver),
    ])
    .await;

    let report = runtime::drain(&engine, &flusher, workers).await;
    tracing::info!(
        persisted = report.persisted,
        parked = report.parked,
        "power service stopped"
    );

    Ok(())
}
