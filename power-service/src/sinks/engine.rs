use futures::StreamExt;
use time::OffsetDateTime;

use crate::engine::PowerEngine;
use crate::error::EngineError;
use crate::household::ToggleEvent;
use crate::pipeline::{Envelope, PipelineError, Sink};

/// Applies toggle events to the engine in stream order.
///
/// Rejected toggles are logged and skipped. The sink only fails when the
/// engine itself has stopped.
pub struct EngineToggleSink {
    engine: PowerEngine,
}

impl EngineToggleSink {
    pub fn new(engine: PowerEngine) -> Self {
        Self { engine }
    }
}

#[async_trait::async_trait]
impl Sink<ToggleEvent> for EngineToggleSink {
    async fn run<S>(&self, mut input: S) -> Result<(), PipelineError>
    where
        S: futures::Stream<Item = Result<Envelope<ToggleEvent>, PipelineError>> + Send + Unpin + 'static,
    {
        let mut applied = 0u64;
        let mut rejected = 0u64;

        while let Some(item) = input.next().await {
            let env = match item {
                Ok(env) => env,
                Err(e) => {
                    tracing::warn!(error = %e, "dropping toggle event from feed");
                    rejected += 1;
                    continue;
                }
            };

            let at = OffsetDateTime::from(env.received_at);
            let t = env.payload;
            match self.engine.toggle_at(&t.household_id, &t.appliance_id, t.is_on, at).await {
                Ok(outcome) => {
                    applied += 1;
                    tracing::debug!(
                        household_id = %t.household_id,
                        appliance_id = %t.appliance_id,
                        is_on = t.is_on,
                        total_kw = outcome.total_kw,
                        "toggle applied"
                    );
                }
                Err(e @ EngineError::Unavailable(_)) => {
                    return Err(PipelineError::Sink(format!("engine stopped: {e}")));
                }
                Err(e) => {
                    rejected += 1;
                    tracing::warn!(
                        household_id = %t.household_id,
                        appliance_id = %t.appliance_id,
                        error = %e,
                        "toggle rejected"
                    );
                }
            }
        }

        tracing::info!(applied, rejected, "toggle feed finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{default_appliances, ApplianceCatalog};
    use crate::engine::EngineContext;
    use crate::household::{HouseholdConfig, OutagePolicy};
    use crate::pipeline::Pipeline;
    use crate::simulator::{BackgroundSimulator, SimulatorConfig};
    use crate::sources::ChannelSource;
    use crate::transform::ToggleValidation;
    use approx::assert_relative_eq;
    use time::{Duration, UtcOffset};

    #[tokio::test]
    async fn feed_applies_valid_toggles_and_skips_rejections() {
        let ctx = EngineContext::new(
            ApplianceCatalog::new(default_appliances()).unwrap(),
            BackgroundSimulator::new(SimulatorConfig::default(), UtcOffset::UTC),
            OutagePolicy::BackgroundOnly,
            Duration::minutes(2),
            Some(3),
            16,
        );
        let (engine, workers) = PowerEngine::spawn(ctx, 2, 16);
        engine.register(HouseholdConfig::new("h1", "normal")).await.unwrap();

        let (tx, source) = ChannelSource::new(8);
        for (household, appliance, on) in [
            ("h1", "kettle", true),
            ("h1", "hot_tub", true),
            ("nobody", "kettle", true),
            ("h1", "", true),
            ("h1", "tv", true),
        ] {
            tx.send(ToggleEvent {
                household_id: household.to_string(),
                appliance_id: appliance.to_string(),
                is_on: on,
            })
            .await
            .unwrap();
        }
        drop(tx);

        Pipeline::new(source, EngineToggleSink::new(engine.clone()))
            .with_transform(ToggleValidation)
            .run()
            .await
            .unwrap();

        let snap = engine.snapshot("h1").await.unwrap();
        assert_relative_eq!(snap.interactive_kw, 2.12);
        assert_eq!(snap.active_appliance_ids, vec!["kettle".to_string(), "tv".to_string()]);

        workers.shutdown().await;
    }
}
