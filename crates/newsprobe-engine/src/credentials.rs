use std::cell::OnceCell;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use newsprobe_contracts::config::PathsConfig;
use tracing::debug;

use crate::non_empty_env;

/// Access tokens, each read on first use and then kept.
#[derive(Debug, Default)]
pub struct Credentials {
    openai_key_file: PathBuf,
    hub_key_file: PathBuf,
    openai: OnceCell<String>,
    hub: OnceCell<Option<String>>,
}

impl Credentials {
    pub fn new(openai_key_file: impl Into<PathBuf>, hub_key_file: impl Into<PathBuf>) -> Self {
        Self {
            openai_key_file: openai_key_file.into(),
            hub_key_file: hub_key_file.into(),
            ..Self::default()
        }
    }

    pub fn from_paths(paths: &PathsConfig) -> Self {
        Self::new(&paths.openai_key_file, &paths.hub_key_file)
    }

    /// Hosted API key from the key file, else `OPENAI_API_KEY`.
    pub fn openai_key(&self) -> Result<&str> {
        if let Some(key) = self.openai.get() {
            return Ok(key);
        }
        let key = read_token(&self.openai_key_file)?
            .or_else(|| non_empty_env("OPENAI_API_KEY"))
            .with_context(|| {
                format!(
                    "no hosted API key: {} is missing and OPENAI_API_KEY is unset",
                    self.openai_key_file.display()
                )
            })?;
        Ok(self.openai.get_or_init(|| key))
    }

    /// Model hub token from the token file, else `HF_TOKEN`. Optional.
    pub fn hub_token(&self) -> Result<Option<&str>> {
        if let Some(token) = self.hub.get() {
            return Ok(token.as_deref());
        }
        let token = read_token(&self.hub_key_file)?.or_else(|| non_empty_env("HF_TOKEN"));
        if token.is_none() {
            debug!("no model hub token, local server called without authorization");
        }
        Ok(self.hub.get_or_init(|| token).as_deref())
    }
}

fn read_token(path: &Path) -> Result<Option<String>> {
    if !path.is_file() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed reading {}", path.display()))?;
    let token = raw.trim();
    Ok((!token.is_empty()).then(|| token.to_string()))
}
