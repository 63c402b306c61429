use crate::household::ToggleEvent;
use crate::pipeline::{Envelope, PipelineError, Transform};

/// Pure shape check of a toggle event before it reaches the engine.
///
/// Rules:
/// - household and appliance ids must be non-blank.
/// - ids must not carry surrounding whitespace.
///
/// Whether the household and appliance exist is decided by the engine.
pub fn validate_toggle(env: Envelope<ToggleEvent>) -> Result<Envelope<ToggleEvent>, PipelineError> {
    let t = &env.payload;

    for (field, value) in [("household_id", &t.household_id), ("appliance_id", &t.appliance_id)] {
        if value.trim().is_empty() {
            return Err(PipelineError::Transform(format!("{field} must not be blank")));
        }
        if value.trim() != value.as_str() {
            return Err(PipelineError::Transform(format!(
                "{field} '{value}' has surrounding whitespace"
            )));
        }
    }

    Ok(env)
}

#[derive(Clone, Default)]
pub struct ToggleValidation;

#[async_trait::async_trait]
impl Transform<ToggleEvent, ToggleEvent> for ToggleValidation {
    async fn apply(&self, input: Envelope<ToggleEvent>) -> Result<Envelope<ToggleEvent>, PipelineError> {
        match validate_toggle(input) {
            Ok(env) => Ok(env),
            Err(e) => {
                metrics::counter!("validation_toggle_rejected_total").increment(1);
                Err(e)
            }
        }
    }
}
