/// Failures surfaced by the power engine to its callers.
///
/// Validation-class rejections (`Validation`, `ApplianceNotFound`,
/// `HouseholdNotFound`, `DuplicateHousehold`) leave state untouched.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("unknown household '{0}'")]
    HouseholdNotFound(String),
    #[error("household '{0}' is already registered")]
    DuplicateHousehold(String),
    #[error("appliance '{appliance_id}' is not installed in household '{household_id}'")]
    ApplianceNotFound {
        household_id: String,
        appliance_id: String,
    },
    #[error("storage error: {0}")]
    TransientStorage(String),
    #[error("simulation fault for household '{household_id}': {reason}")]
    SimulationFault {
        household_id: String,
        reason: String,
    },
    #[error("insufficient data for household '{household_id}': {reason}")]
    InsufficientData {
        household_id: String,
        reason: String,
    },
    #[error("engine unavailable: {0}")]
    Unavailable(String),
}

impl EngineError {
    /// Whether the caller may retry the same request later.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::TransientStorage(_) | Self::InsufficientData { .. } | Self::Unavailable(_)
        )
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(e: sqlx::Error) -> Self {
        Self::TransientStorage(e.to_string())
    }
}
