use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplianceCategory {
    Kitchen,
    Laundry,
    Climate,
    Entertainment,
    Lighting,
    Other,
}

/// A user-controllable appliance and its rated draw.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ApplianceDefinition {
    pub id: String,
    pub name: String,
    pub rated_watts: f64,
    pub category: ApplianceCategory,
}

impl ApplianceDefinition {
    fn new(id: &str, name: &str, rated_watts: f64, category: ApplianceCategory) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            rated_watts,
            category,
        }
    }

    pub fn rated_kw(&self) -> f64 {
        self.rated_watts / 1000.0
    }
}

/// Appliances offered when the config file does not list its own.
pub fn default_appliances() -> Vec<ApplianceDefinition> {
    use ApplianceCategory::*;

    vec![
        ApplianceDefinition::new("kettle", "Electric kettle", 2000.0, Kitchen),
        ApplianceDefinition::new("microwave", "Microwave oven", 1100.0, Kitchen),
        ApplianceDefinition::new("oven", "Electric oven", 2400.0, Kitchen),
        ApplianceDefinition::new("washing_machine", "Washing machine", 2000.0, Laundry),
        ApplianceDefinition::new("dryer", "Tumble dryer", 3000.0, Laundry),
        ApplianceDefinition::new("air_conditioner", "Air conditioner", 1500.0, Climate),
        ApplianceDefinition::new("space_heater", "Space heater", 1800.0, Climate),
        ApplianceDefinition::new("tv", "Television", 120.0, Entertainment),
        ApplianceDefinition::new("console", "Game console", 180.0, Entertainment),
        ApplianceDefinition::new("lights", "Living room lights", 60.0, Lighting),
    ]
}

/// Read-only appliance lookup shared by every household.
#[derive(Debug, Clone)]
pub struct ApplianceCatalog {
    by_id: BTreeMap<String, ApplianceDefinition>,
}

impl ApplianceCatalog {
    pub fn new(definitions: Vec<ApplianceDefinition>) -> Result<Self, EngineError> {
        let mut by_id = BTreeMap::new();
        for def in definitions {
            if def.id.trim().is_empty() {
                return Err(EngineError::Validation("appliance id must not be blank".to_string()));
            }
            if !def.rated_watts.is_finite() || def.rated_watts < 0.0 {
                return Err(EngineError::Validation(format!(
                    "appliance '{}' has invalid rated_watts {}",
                    def.id, def.rated_watts
                )));
            }
            if let Some(prev) = by_id.insert(def.id.clone(), def) {
                return Err(EngineError::Validation(format!(
                    "duplicate appliance id '{}'",
                    prev.id
                )));
            }
        }
        Ok(Self { by_id })
    }

    pub fn get(&self, appliance_id: &str) -> Option<&ApplianceDefinition> {
        self.by_id.get(appliance_id)
    }

    pub fn contains(&self, appliance_id: &str) -> bool {
        self.by_id.contains_key(appliance_id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.by_id.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
