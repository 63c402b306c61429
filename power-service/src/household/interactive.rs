use std::collections::BTreeMap;

use serde::Serialize;
use time::OffsetDateTime;

use crate::catalog::ApplianceCatalog;
use crate::error::EngineError;

/// Live on/off state of one appliance in one household.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplianceState {
    pub household_id: String,
    pub appliance_id: String,
    pub is_on: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_toggled_at: Option<OffsetDateTime>,
}

/// The user-controlled appliances of a household.
#[derive(Debug, Clone)]
pub struct InteractiveState {
    household_id: String,
    appliances: BTreeMap<String, ApplianceState>,
}

impl InteractiveState {
    /// One appliance state per installed appliance, all off. `installed`
    /// defaults to the whole catalog.
    pub fn initialize(
        household_id: &str,
        catalog: &ApplianceCatalog,
        installed: Option<&[String]>,
    ) -> Result<Self, EngineError> {
        let ids: Vec<&str> = match installed {
            Some(ids) => ids.iter().map(String::as_str).collect(),
            None => catalog.ids().collect(),
        };

        let mut appliances = BTreeMap::new();
        for id in ids {
            if !catalog.contains(id) {
                return Err(EngineError::Validation(format!(
                    "household '{household_id}' lists appliance '{id}' which is not in the catalog"
                )));
            }
            appliances.insert(
                id.to_string(),
                ApplianceState {
                    household_id: household_id.to_string(),
                    appliance_id: id.to_string(),
                    is_on: false,
                    last_toggled_at: None,
                },
            );
        }

        Ok(Self {
            household_id: household_id.to_string(),
            appliances,
        })
    }

    /// Set an appliance on or off and return the recomputed interactive load.
    ///
    /// Repeating a toggle to the state the appliance is already in is a no-op.
    pub fn toggle(
        &mut self,
        catalog: &ApplianceCatalog,
        appliance_id: &str,
        is_on: bool,
        at: OffsetDateTime,
    ) -> Result<f64, EngineError> {
        let state = self
            .appliances
            .get_mut(appliance_id)
            .ok_or_else(|| EngineError::ApplianceNotFound {
                household_id: self.household_id.clone(),
                appliance_id: appliance_id.to_string(),
            })?;

        if state.is_on != is_on {
            state.is_on = is_on;
            state.last_toggled_at = Some(at);
        }

        Ok(self.interactive_kw(catalog))
    }

    /// Sum of rated draw of every appliance that is on, in kW.
    pub fn interactive_kw(&self, catalog: &ApplianceCatalog) -> f64 {
        self.appliances
            .values()
            .filter(|a| a.is_on)
            .filter_map(|a| catalog.get(&a.appliance_id))
            .map(|def| def.rated_kw())
            .sum()
    }

    pub fn list_active(&self) -> Vec<ApplianceState> {
        self.appliances.values().filter(|a| a.is_on).cloned().collect()
    }

    pub fn active_ids(&self) -> Vec<String> {
        self.appliances
            .values()
            .filter(|a| a.is_on)
            .map(|a| a.appliance_id.clone())
            .collect()
    }

    pub fn installed(&self) -> impl Iterator<Item = &ApplianceState> {
        self.appliances.values()
    }
}
