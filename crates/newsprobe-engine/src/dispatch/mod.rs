use std::rc::Rc;

use anyhow::{bail, Result};
use image::DynamicImage;
use newsprobe_contracts::config::ExperimentConfig;
use newsprobe_contracts::models::{Backend, ModelSpec};
use newsprobe_contracts::prompt::ComposedPrompt;
use tracing::{debug, warn};

use crate::credentials::Credentials;

pub mod hosted;
pub mod local;

pub use hosted::{HostedBackend, HostedTransport, HttpTransport};
pub use local::{GenerateRequest, HttpLocalGenerator, LocalBackend, LocalGenerator};

/// Reply returned for every prompt when no backend is called.
pub const DRY_RUN_REPLY: &str = "test_only";

/// Sampling settings of one backend call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingParams {
    pub n: usize,
    pub max_tokens: u32,
    pub top_p: f64,
    pub temperature: f64,
    pub repetition_penalty: f64,
}

impl SamplingParams {
    pub fn from_config(config: &ExperimentConfig) -> Self {
        Self {
            n: config.n_returns,
            max_tokens: config.max_tokens,
            top_p: config.top_p,
            temperature: config.temperature,
            repetition_penalty: config.repetition_penalty,
        }
    }

    pub fn with_n(&self, n: usize) -> Self {
        Self { n, ..*self }
    }
}

pub trait CompletionBackend {
    fn name(&self) -> &str;

    /// Largest `n` a single call may request; `None` means unbounded.
    fn max_returns_per_call(&self) -> Option<usize> {
        None
    }

    fn complete(
        &self,
        prompt: &ComposedPrompt,
        image: Option<&DynamicImage>,
        params: &SamplingParams,
    ) -> Result<Vec<String>>;
}

/// Sample counts of the calls needed for `n` samples: full ceilings, then
/// the remainder if any.
pub fn chunk_plan(n: usize, ceiling: Option<usize>) -> Vec<usize> {
    match ceiling {
        Some(ceiling) if ceiling > 0 && n > ceiling => {
            let mut plan = vec![ceiling; n / ceiling];
            if n % ceiling > 0 {
                plan.push(n % ceiling);
            }
            plan
        }
        _ => vec![n],
    }
}

enum Target {
    DryRun,
    Backend(Box<dyn CompletionBackend>),
    Unsupported(String),
}

pub struct Dispatcher {
    target: Target,
}

impl Dispatcher {
    pub fn new(backend: Box<dyn CompletionBackend>) -> Self {
        Self {
            target: Target::Backend(backend),
        }
    }

    pub fn dry_run() -> Self {
        Self {
            target: Target::DryRun,
        }
    }

    pub fn unsupported(name: impl Into<String>) -> Self {
        Self {
            target: Target::Unsupported(name.into()),
        }
    }

    /// Wires the backend named by `spec`. Nothing is contacted or read until
    /// the first dispatch.
    pub fn for_model(
        spec: &ModelSpec,
        config: &ExperimentConfig,
        credentials: Rc<Credentials>,
    ) -> Result<Self> {
        if config.debug {
            return Ok(Self::dry_run());
        }
        Ok(match &spec.backend {
            Backend::Hosted => {
                let transport = HttpTransport::new(&config.hosted, credentials)?;
                Self::new(Box::new(HostedBackend::new(
                    &spec.name,
                    spec.endpoint,
                    Box::new(transport),
                )))
            }
            Backend::Local(family) => {
                let generator = HttpLocalGenerator::new(&config.local, credentials)?;
                Self::new(Box::new(LocalBackend::new(
                    *family,
                    &spec.name,
                    config.local.ceiling(*family),
                    Box::new(generator),
                )))
            }
            Backend::Unsupported(name) => Self::unsupported(name.clone()),
        })
    }

    pub fn is_dry_run(&self) -> bool {
        matches!(self.target, Target::DryRun)
    }

    /// Completions for `prompt`, `params.n` of them. `Ok(None)` when the
    /// backend is not supported.
    pub fn dispatch(
        &self,
        prompt: &ComposedPrompt,
        image: Option<&DynamicImage>,
        params: &SamplingParams,
    ) -> Result<Option<Vec<String>>> {
        let backend = match &self.target {
            Target::DryRun => return Ok(Some(vec![DRY_RUN_REPLY.to_string()])),
            Target::Unsupported(name) => {
                warn!(backend = %name, "backend not supported, no completions");
                return Ok(None);
            }
            Target::Backend(backend) => backend,
        };

        let plan = chunk_plan(params.n, backend.max_returns_per_call());
        if plan.len() > 1 {
            debug!(backend = backend.name(), n = params.n, calls = plan.len(), "splitting request");
        }
        let mut completions = Vec::with_capacity(params.n);
        for count in plan {
            let batch = backend.complete(prompt, image, &params.with_n(count))?;
            if batch.len() != count {
                bail!(
                    "backend {} returned {} completions, {count} requested",
                    backend.name(),
                    batch.len()
                );
            }
            completions.extend(batch);
        }
        Ok(Some(completions))
    }
}
