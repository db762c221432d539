use std::path::Path;

use anyhow::Context;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::{DemographicRegistry, Demographics, StoreError};

/// Block inside a fragment replaced by the filled `content_dems` template.
pub const DEMOGRAPHICS_PLACEHOLDER: &str = "{dems}";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogFragment {
    pub id: String,
    pub content: String,
    #[serde(default, rename = "content_img")]
    pub content_with_image: Option<String>,
    #[serde(default, rename = "content_dems")]
    pub content_template: Option<String>,
}

impl DialogFragment {
    /// Text of the fragment for one prompt. `demographics` pairs the chosen
    /// attributes with the registry that must permit them.
    pub fn resolve(
        &self,
        with_img: bool,
        demographics: Option<(&Demographics, &DemographicRegistry)>,
    ) -> Result<String, StoreError> {
        let base = match (&self.content_with_image, with_img) {
            (Some(variant), true) => variant.as_str(),
            _ => self.content.as_str(),
        };

        let Some((values, registry)) = demographics else {
            return Ok(base.replace(DEMOGRAPHICS_PLACEHOLDER, ""));
        };
        registry.validate(values)?;
        if !base.contains(DEMOGRAPHICS_PLACEHOLDER) {
            return Ok(base.to_string());
        }
        let filled = match &self.content_template {
            Some(template) => fill_template(template, values)?,
            None => String::new(),
        };
        Ok(base.replace(DEMOGRAPHICS_PLACEHOLDER, &filled))
    }
}

/// Substitutes every `{name}` in `template` with the matching demographic.
fn fill_template(template: &str, values: &Demographics) -> Result<String, StoreError> {
    let mut filled = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        filled.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            filled.push_str(&rest[open..]);
            return Ok(filled);
        };
        let key = &after[..close];
        let value = values
            .get(key)
            .ok_or_else(|| StoreError::MissingDemographic(key.to_string()))?;
        filled.push_str(value);
        rest = &after[close + 1..];
    }
    filled.push_str(rest);
    Ok(filled)
}

#[derive(Debug, Clone, Default)]
pub struct DialogStore {
    fragments: IndexMap<String, DialogFragment>,
}

impl DialogStore {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed reading {}", path.display()))?;
        let fragments: Vec<DialogFragment> = serde_json::from_str(&raw)
            .with_context(|| format!("invalid dialog collection {}", path.display()))?;
        Ok(Self::from_fragments(fragments)?)
    }

    pub fn from_fragments(fragments: Vec<DialogFragment>) -> Result<Self, StoreError> {
        let mut map = IndexMap::with_capacity(fragments.len());
        for fragment in fragments {
            if map.contains_key(&fragment.id) {
                return Err(StoreError::DuplicateId {
                    kind: "dialog",
                    id: fragment.id,
                });
            }
            map.insert(fragment.id.clone(), fragment);
        }
        Ok(Self { fragments: map })
    }

    pub fn get(&self, id: &str) -> Result<&DialogFragment, StoreError> {
        self.fragments
            .get(id)
            .ok_or_else(|| StoreError::DialogNotFound(id.to_string()))
    }

    pub fn ids(&self) -> Vec<String> {
        self.fragments.keys().cloned().collect()
    }

    /// Resolves `ids` in order and joins them with single spaces.
    pub fn join(
        &self,
        ids: &[String],
        with_img: bool,
        demographics: Option<(&Demographics, &DemographicRegistry)>,
    ) -> Result<String, StoreError> {
        let parts = ids
            .iter()
            .map(|id| self.get(id)?.resolve(with_img, demographics))
            .collect::<Result<Vec<String>, StoreError>>()?;
        Ok(parts.join(" "))
    }
}
