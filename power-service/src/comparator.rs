use power_client::domain::{EfficiencyScore, Period};
use time::Duration;

use crate::error::EngineError;
use crate::store::{ForecastSource, ReadingStore};

/// Percentage by which `actual_kwh` undershoots `forecast_kwh`.
/// `None` when the forecast is zero or not a finite positive number.
pub fn efficiency_score(forecast_kwh: f64, actual_kwh: f64) -> Option<f64> {
    if !forecast_kwh.is_finite() || forecast_kwh <= 0.0 || !actual_kwh.is_finite() {
        return None;
    }
    Some((forecast_kwh - actual_kwh) / forecast_kwh * 100.0)
}

/// Scores a household's measured energy against its forecast for a period.
pub struct ForecastComparator<R, F> {
    readings: R,
    forecasts: F,
    window: Duration,
    min_coverage: f64,
}

impl<R: ReadingStore, F: ForecastSource> ForecastComparator<R, F> {
    pub fn new(readings: R, forecasts: F, window: Duration, min_coverage: f64) -> Self {
        Self {
            readings,
            forecasts,
            window,
            min_coverage: min_coverage.clamp(0.0, 1.0),
        }
    }

    /// Score one closed period. Reads only persisted data, so recomputing it
    /// yields the same score while the inputs are unchanged.
    pub async fn compare(&self, household_id: &str, period: Period) -> Result<EfficiencyScore, EngineError> {
        let insufficient = |reason: String| {
            metrics::counter!("scores_insufficient_data_total").increment(1);
            EngineError::InsufficientData {
                household_id: household_id.to_string(),
                reason,
            }
        };

        let points = self
            .forecasts
            .forecasts_between(household_id, period.start, period.end)
            .await?;
        if points.is_empty() {
            return Err(insufficient("no forecast for the period".to_string()));
        }
        let forecast_span: Duration = points.iter().map(|p| p.period_end - p.period_start).sum();
        if forecast_span < period.duration() {
            return Err(insufficient(format!(
                "forecast covers {}s of a {}s period",
                forecast_span.whole_seconds(),
                period.duration().whole_seconds()
            )));
        }
        let forecast_kwh: f64 = points.iter().map(|p| p.forecast_kwh).sum();

        let readings = self
            .readings
            .readings_between(household_id, period.start, period.end)
            .await?;
        let expected = period.expected_windows(self.window);
        let coverage = if expected == 0 {
            0.0
        } else {
            readings.len() as f64 / expected as f64
        };
        if coverage < self.min_coverage {
            return Err(insufficient(format!(
                "{} of {} readings present ({:.1}% < {:.1}% required)",
                readings.len(),
                expected,
                coverage * 100.0,
                self.min_coverage * 100.0
            )));
        }
        let actual_kwh: f64 = readings.iter().map(|r| r.energy_kwh).sum();

        let score = efficiency_score(forecast_kwh, actual_kwh)
            .ok_or_else(|| insufficient(format!("forecast of {forecast_kwh} kWh cannot be scored")))?;

        metrics::counter!("scores_computed_total").increment(1);
        Ok(EfficiencyScore {
            household_id: household_id.to_string(),
            period,
            actual_kwh,
            forecast_kwh,
            score,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use approx::assert_relative_eq;
    use power_client::domain::{ForecastPoint, MinuteReading};
    use std::sync::Arc;
    use time::macros::datetime;
    use time::OffsetDateTime;

    const START: OffsetDateTime = datetime!(2024-06-01 12:00:00 UTC);

    fn period() -> Period {
        Period::new(START, START + Duration::HOUR).unwrap()
    }

    async fn seed(store: &MemoryStore, minutes: i64, kwh_per_minute: f64, forecast_kwh: f64) {
        for m in 0..minutes {
            store
                .upsert_reading(&MinuteReading {
                    household_id: "h1".to_string(),
                    window_start: START + Duration::minutes(m),
                    avg_kw: kwh_per_minute * 60.0,
                    energy_kwh: kwh_per_minute,
                    voltage: 230.0,
                })
                .await
                .unwrap();
        }
        store
            .insert_forecast(ForecastPoint {
                household_id: "h1".to_string(),
                period_start: START,
                period_end: START + Duration::HOUR,
                forecast_kwh,
                confidence_lo: forecast_kwh * 0.9,
                confidence_hi: forecast_kwh * 1.1,
            })
            .unwrap();
    }

    fn comparator(store: Arc<MemoryStore>) -> ForecastComparator<Arc<MemoryStore>, Arc<MemoryStore>> {
        ForecastComparator::new(store.clone(), store, Duration::minutes(1), 0.9)
    }

    #[test]
    fn score_formula() {
        assert_relative_eq!(efficiency_score(100.0, 80.0).unwrap(), 20.0);
        assert_relative_eq!(efficiency_score(100.0, 120.0).unwrap(), -20.0);
        assert_eq!(efficiency_score(0.0, 10.0), None);
        assert_eq!(efficiency_score(f64::NAN, 10.0), None);
    }

    #[tokio::test]
    async fn under_consumption_scores_positive_and_is_repeatable() {
        let store = Arc::new(MemoryStore::new());
        // 60 minutes at 4/3 kWh each = 80 kWh against a 100 kWh forecast.
        seed(&store, 60, 80.0 / 60.0, 100.0).await;
        let c = comparator(store);

        let first = c.compare("h1", period()).await.unwrap();
        assert_relative_eq!(first.actual_kwh, 80.0, epsilon = 1e-9);
        assert_relative_eq!(first.score, 20.0, epsilon = 1e-9);

        let second = c.compare("h1", period()).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn zero_forecast_is_insufficient_data() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, 60, 0.01, 0.0).await;
        let err = comparator(store).compare("h1", period()).await.unwrap_err();
        assert!(matches!(err, EngineError::InsufficientData { .. }));
        assert!(err.is_retriable());
    }

    #[tokio::test]
    async fn missing_forecast_is_insufficient_data() {
        let store = Arc::new(MemoryStore::new());
        let err = comparator(store).compare("h1", period()).await.unwrap_err();
        assert!(matches!(err, EngineError::InsufficientData { .. }));
    }

    #[tokio::test]
    async fn partial_coverage_is_insufficient_data() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, 50, 0.01, 1.0).await;
        let err = comparator(store.clone()).compare("h1", period()).await.unwrap_err();
        assert!(matches!(err, EngineError::InsufficientData { .. }));

        let lenient = ForecastComparator::new(store.clone(), store, Duration::minutes(1), 0.8);
        assert!(lenient.compare("h1", period()).await.is_ok());
    }

    #[tokio::test]
    async fn forecast_covering_half_the_period_is_insufficient_data() {
        let store = Arc::new(MemoryStore::new());
        for m in 0..120 {
            store
                .upsert_reading(&MinuteReading {
                    household_id: "h1".to_string(),
                    window_start: START + Duration::minutes(m),
                    avg_kw: 0.6,
                    energy_kwh: 0.01,
                    voltage: 230.0,
                })
                .await
                .unwrap();
        }
        store
            .insert_forecast(ForecastPoint {
                household_id: "h1".to_string(),
                period_start: START,
                period_end: START + Duration::HOUR,
                forecast_kwh: 1.0,
                confidence_lo: 0.9,
                confidence_hi: 1.1,
            })
            .unwrap();

        let two_hours = Period::new(START, START + Duration::hours(2)).unwrap();
        let err = comparator(store).compare("h1", two_hours).await.unwrap_err();
        assert!(matches!(err, EngineError::InsufficientData { .. }));
    }
}
