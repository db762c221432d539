use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};

use crate::models::{LocalFamily, ModelRef};
use crate::store::Demographics;

const DETAIL_LEVELS: [&str; 3] = ["high", "low", "auto"];

/// Which image conditions a run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Experiment {
    NewsImage,
    NewsNoimage,
    Both,
}

impl Experiment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Experiment::NewsImage => "news_image",
            Experiment::NewsNoimage => "news_noimage",
            Experiment::Both => "both",
        }
    }

    /// Image flags to run, image condition first.
    pub fn conditions(&self) -> &'static [bool] {
        match self {
            Experiment::NewsImage => &[true],
            Experiment::NewsNoimage => &[false],
            Experiment::Both => &[true, false],
        }
    }
}

impl std::str::FromStr for Experiment {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim() {
            "news_image" => Ok(Experiment::NewsImage),
            "news_noimage" => Ok(Experiment::NewsNoimage),
            "both" => Ok(Experiment::Both),
            other => {
                bail!("unknown experiment '{other}' (expected news_image, news_noimage or both)")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    pub data_dir: PathBuf,
    pub images_dir: PathBuf,
    pub results_dir: PathBuf,
    pub news_file: String,
    pub dialogs_file: String,
    pub demographics_file: String,
    pub openai_key_file: PathBuf,
    pub hub_key_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            images_dir: PathBuf::from("imgs"),
            results_dir: PathBuf::from("res"),
            news_file: "news.json".to_string(),
            dialogs_file: "dialogs.json".to_string(),
            demographics_file: "demographics.json".to_string(),
            openai_key_file: PathBuf::from("data/.key.txt"),
            hub_key_file: PathBuf::from("data/.hf.txt"),
        }
    }
}

impl PathsConfig {
    pub fn news_path(&self) -> PathBuf {
        self.data_dir.join(&self.news_file)
    }

    pub fn dialogs_path(&self) -> PathBuf {
        self.data_dir.join(&self.dialogs_file)
    }

    pub fn demographics_path(&self) -> PathBuf {
        self.data_dir.join(&self.demographics_file)
    }

    pub fn image_path(&self, name: &str) -> PathBuf {
        self.images_dir.join(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LocalConfig {
    pub api_base: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
    /// Per-family ceiling overrides, keyed by family name (`llava-next`, ...).
    pub max_returns_per_call: IndexMap<String, usize>,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            api_base: "http://127.0.0.1:8080".to_string(),
            request_timeout_secs: None,
            max_returns_per_call: IndexMap::new(),
        }
    }
}

impl LocalConfig {
    pub fn ceiling(&self, family: LocalFamily) -> usize {
        self.max_returns_per_call
            .get(family.name())
            .copied()
            .unwrap_or_else(|| family.default_max_returns_per_call())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HostedConfig {
    pub api_base: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
}

impl Default for HostedConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            request_timeout_secs: None,
        }
    }
}

/// Everything one run needs. Built once, then shared by reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExperimentConfig {
    pub model: ModelRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experiment: Option<Experiment>,
    /// Shorthand for older configs: first id is the pre dialog, last the post.
    #[serde(deserialize_with = "one_or_many", skip_serializing_if = "Vec::is_empty")]
    pub dialogs: Vec<String>,
    #[serde(deserialize_with = "one_or_many")]
    pub dialogs_pre: Vec<String>,
    #[serde(deserialize_with = "one_or_many")]
    pub dialogs_post: Vec<String>,
    #[serde(deserialize_with = "ids_as_text")]
    pub news_ids: Vec<String>,
    pub max_tokens: u32,
    pub n_returns: usize,
    pub top_p: f64,
    pub temperature: f64,
    pub repetition_penalty: f64,
    pub info_source: bool,
    pub info_more: bool,
    pub detail: String,
    pub debug: bool,
    pub strict: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub demographics: Option<Demographics>,
    pub paths: PathsConfig,
    pub local: LocalConfig,
    pub hosted: HostedConfig,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            model: ModelRef::default(),
            experiment: None,
            dialogs: Vec::new(),
            dialogs_pre: Vec::new(),
            dialogs_post: Vec::new(),
            news_ids: Vec::new(),
            max_tokens: 20,
            n_returns: 1,
            top_p: 1.0,
            temperature: 0.3,
            repetition_penalty: 1.1,
            info_source: false,
            info_more: false,
            detail: "high".to_string(),
            debug: false,
            strict: false,
            demographics: None,
            paths: PathsConfig::default(),
            local: LocalConfig::default(),
            hosted: HostedConfig::default(),
        }
    }
}

/// Command-line values that take precedence over the config file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CliOverrides {
    pub debug: bool,
    pub strict: bool,
    pub model: Option<ModelRef>,
    pub max_tokens: Option<u32>,
    pub n_returns: Option<usize>,
    pub experiment: Option<Experiment>,
}

impl ExperimentConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed reading config {}", path.display()))?;
        Self::from_toml(&raw).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn from_toml(raw: &str) -> anyhow::Result<Self> {
        let mut config: ExperimentConfig = toml::from_str(raw)?;
        config.expand_dialogs();
        config.validate()?;
        Ok(config)
    }

    fn expand_dialogs(&mut self) {
        if self.dialogs.is_empty() || !self.dialogs_pre.is_empty() || !self.dialogs_post.is_empty()
        {
            return;
        }
        let dialogs = std::mem::take(&mut self.dialogs);
        self.dialogs_pre = dialogs[..1].to_vec();
        if dialogs.len() > 1 {
            self.dialogs_post = dialogs[dialogs.len() - 1..].to_vec();
        }
    }

    pub fn apply_overrides(&mut self, overrides: &CliOverrides) -> anyhow::Result<()> {
        if let Some(model) = &overrides.model {
            self.model = model.clone();
        }
        if let Some(max_tokens) = overrides.max_tokens {
            self.max_tokens = max_tokens;
        }
        if let Some(n_returns) = overrides.n_returns {
            self.n_returns = n_returns;
        }
        if let Some(experiment) = overrides.experiment {
            self.experiment = Some(experiment);
        }
        self.strict |= overrides.strict;
        if overrides.debug {
            self.debug = true;
            self.n_returns = 1;
        }
        self.validate()
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.n_returns == 0 {
            bail!("n_returns must be at least 1");
        }
        if self.max_tokens == 0 {
            bail!("max_tokens must be at least 1");
        }
        if self.top_p.is_nan() || self.top_p <= 0.0 || self.top_p > 1.0 {
            bail!("top_p must be in (0, 1], got {}", self.top_p);
        }
        if self.temperature.is_nan() || self.temperature < 0.0 {
            bail!("temperature must be non-negative, got {}", self.temperature);
        }
        if !DETAIL_LEVELS.contains(&self.detail.as_str()) {
            bail!(
                "detail must be one of {}, got '{}'",
                DETAIL_LEVELS.join(", "),
                self.detail
            );
        }
        for (family, ceiling) in &self.local.max_returns_per_call {
            if !LocalFamily::ALL.iter().any(|known| known.name() == family) {
                bail!("max_returns_per_call: unknown local family '{family}'");
            }
            if *ceiling == 0 {
                bail!("max_returns_per_call for '{family}' must be at least 1");
            }
        }
        Ok(())
    }

    /// TOML rendering used in the run transcript.
    pub fn describe(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(id) if id.is_empty() => Vec::new(),
        OneOrMany::One(id) => vec![id],
        OneOrMany::Many(ids) => ids,
    })
}

fn ids_as_text<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Number(i64),
        Text(String),
    }

    Ok(Vec::<Id>::deserialize(deserializer)?
        .into_iter()
        .map(|id| match id {
            Id::Number(number) => number.to_string(),
            Id::Text(text) => text,
        })
        .collect())
}
