mod demographics;
mod dialogs;
mod news;

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use thiserror::Error;

pub use demographics::{DemographicRegistry, Demographics};
pub use dialogs::{DialogFragment, DialogStore, DEMOGRAPHICS_PLACEHOLDER};
pub use news::{NewsItem, NewsStore};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("non existing news with id '{0}'")]
    NewsNotFound(String),
    #[error("non existing dialog '{0}'")]
    DialogNotFound(String),
    #[error("duplicate {kind} id '{id}'")]
    DuplicateId { kind: &'static str, id: String },
    #[error("invalid demographic: {0}")]
    InvalidDemographic(String),
    #[error("no demographic value supplied for placeholder '{{{0}}}'")]
    MissingDemographic(String),
}

/// Ids and enumerated values show up both as JSON strings and bare numbers.
pub(crate) fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

pub(crate) fn text_from_scalar<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Value::deserialize(deserializer)?;
    value_as_text(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("expected a string or number, got {raw}")))
}
