use std::path::Path;

use anyhow::{bail, Context};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::classify::ClassificationArrays;
use crate::config::Experiment;

/// Leading bytes of a raw-results file; the digit is the layout version.
pub const RESULTS_MAGIC: &[u8; 8] = b"NPRBRES1";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionResults {
    pub with_image: Option<ClassificationArrays>,
    pub without_image: Option<ClassificationArrays>,
}

impl ConditionResults {
    pub fn get(&self, with_img: bool) -> Option<&ClassificationArrays> {
        if with_img {
            self.with_image.as_ref()
        } else {
            self.without_image.as_ref()
        }
    }
}

/// Per-news classification arrays for a whole run, keyed by news id in
/// processing order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub model: String,
    pub experiment: Experiment,
    pub per_news: IndexMap<String, ConditionResults>,
}

impl ExecutionResult {
    pub fn new(model: impl Into<String>, experiment: Experiment) -> Self {
        Self {
            model: model.into(),
            experiment,
            per_news: IndexMap::new(),
        }
    }

    pub fn record(&mut self, news_id: &str, with_img: bool, arrays: ClassificationArrays) {
        let entry = self.per_news.entry(news_id.to_string()).or_default();
        if with_img {
            entry.with_image = Some(arrays);
        } else {
            entry.without_image = Some(arrays);
        }
    }

    pub fn write(&self, path: &Path) -> anyhow::Result<()> {
        let mut bytes = RESULTS_MAGIC.to_vec();
        bytes.extend(bincode::serialize(self).context("failed encoding raw results")?);
        std::fs::write(path, bytes)
            .with_context(|| format!("failed writing {}", path.display()))?;
        Ok(())
    }

    pub fn read(path: &Path) -> anyhow::Result<Self> {
        let bytes =
            std::fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
        let Some(payload) = bytes.strip_prefix(RESULTS_MAGIC.as_slice()) else {
            bail!("{} is not a newsprobe raw-results file", path.display());
        };
        bincode::deserialize(payload)
            .with_context(|| format!("corrupt raw results in {}", path.display()))
    }
}
