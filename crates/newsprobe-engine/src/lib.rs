use std::env;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::Value;

pub mod compose;
pub mod conversation;
pub mod credentials;
pub mod dispatch;
pub mod runner;

pub use compose::{Composer, FormattedPrompt, PromptOptions};
pub use conversation::{Conversation, ConversationOutput};
pub use credentials::Credentials;
pub use dispatch::{chunk_plan, CompletionBackend, Dispatcher, SamplingParams};
pub use runner::{ExperimentRunner, RunOutcome};

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn http_client(timeout_secs: Option<u64>) -> Result<HttpClient> {
    let mut builder = HttpClient::builder();
    if let Some(seconds) = timeout_secs {
        builder = builder.timeout(Duration::from_secs(seconds));
    } else {
        builder = builder.timeout(None::<Duration>);
    }
    builder.build().context("failed building HTTP client")
}

fn response_json_or_error(service: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{service} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{service} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{service} returned invalid JSON payload"))?;
    Ok(parsed)
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}
