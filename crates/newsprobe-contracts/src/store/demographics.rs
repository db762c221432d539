use std::path::Path;

use anyhow::Context;
use indexmap::IndexMap;
use serde_json::Value;

use super::{value_as_text, StoreError};

/// Attribute name -> chosen value, e.g. `age -> "30-44"`.
pub type Demographics = IndexMap<String, String>;

/// Allowed values for every demographic attribute.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DemographicRegistry {
    allowed: IndexMap<String, Vec<String>>,
}

impl DemographicRegistry {
    pub fn new(allowed: IndexMap<String, Vec<String>>) -> Self {
        Self { allowed }
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed reading {}", path.display()))?;
        let parsed: IndexMap<String, Vec<Value>> = serde_json::from_str(&raw)
            .with_context(|| format!("invalid demographics registry {}", path.display()))?;
        let mut allowed = IndexMap::with_capacity(parsed.len());
        for (attribute, values) in parsed {
            let values = values
                .iter()
                .map(|value| {
                    value_as_text(value).with_context(|| {
                        format!("unsupported value {value} for demographic '{attribute}'")
                    })
                })
                .collect::<anyhow::Result<Vec<String>>>()?;
            allowed.insert(attribute, values);
        }
        Ok(Self { allowed })
    }

    pub fn attributes(&self) -> impl Iterator<Item = &str> {
        self.allowed.keys().map(String::as_str)
    }

    pub fn validate(&self, demographics: &Demographics) -> Result<(), StoreError> {
        for (key, value) in demographics {
            let Some(permitted) = self.allowed.get(key) else {
                return Err(StoreError::InvalidDemographic(format!(
                    "unknown attribute '{key}'"
                )));
            };
            if !permitted.iter().any(|candidate| candidate == value) {
                return Err(StoreError::InvalidDemographic(format!(
                    "value '{value}' not permitted for '{key}' (allowed: {})",
                    permitted.join(", ")
                )));
            }
        }
        Ok(())
    }
}
