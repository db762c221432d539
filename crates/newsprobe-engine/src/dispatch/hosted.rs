use std::rc::Rc;

use anyhow::{bail, Context, Result};
use image::DynamicImage;
use newsprobe_contracts::config::HostedConfig;
use newsprobe_contracts::models::Endpoint;
use newsprobe_contracts::prompt::ComposedPrompt;
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};
use tracing::debug;

use super::{CompletionBackend, SamplingParams};
use crate::credentials::Credentials;
use crate::{http_client, non_empty_env, response_json_or_error};

/// POSTs a JSON payload to a route of the hosted API and returns the reply.
pub trait HostedTransport {
    fn post(&self, route: &str, payload: &Value) -> Result<Value>;
}

pub struct HttpTransport {
    api_base: String,
    http: HttpClient,
    credentials: Rc<Credentials>,
}

impl HttpTransport {
    pub fn new(config: &HostedConfig, credentials: Rc<Credentials>) -> Result<Self> {
        Ok(Self {
            api_base: non_empty_env("OPENAI_API_BASE")
                .unwrap_or_else(|| config.api_base.clone())
                .trim_end_matches('/')
                .to_string(),
            http: http_client(config.request_timeout_secs)?,
            credentials,
        })
    }
}

impl HostedTransport for HttpTransport {
    fn post(&self, route: &str, payload: &Value) -> Result<Value> {
        let endpoint = format!("{}/{route}", self.api_base);
        let api_key = self.credentials.openai_key()?;
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(api_key)
            .json(payload)
            .send()
            .with_context(|| format!("hosted request failed ({endpoint})"))?;
        response_json_or_error("hosted API", response)
    }
}

pub struct HostedBackend {
    model: String,
    endpoint: Endpoint,
    user: String,
    transport: Box<dyn HostedTransport>,
}

impl HostedBackend {
    pub fn new(model: &str, endpoint: Endpoint, transport: Box<dyn HostedTransport>) -> Self {
        Self {
            model: model.to_string(),
            endpoint,
            user: user_tag(),
            transport,
        }
    }
}

impl CompletionBackend for HostedBackend {
    fn name(&self) -> &str {
        "hosted"
    }

    fn complete(
        &self,
        prompt: &ComposedPrompt,
        _image: Option<&DynamicImage>,
        params: &SamplingParams,
    ) -> Result<Vec<String>> {
        let (route, mut payload) = match (self.endpoint, prompt) {
            (Endpoint::Completion, ComposedPrompt::Text(text)) => {
                ("completions", json!({ "model": self.model, "prompt": text }))
            }
            (Endpoint::Chat, ComposedPrompt::Chat(messages)) => (
                "chat/completions",
                json!({ "model": self.model, "messages": messages }),
            ),
            (Endpoint::Completion, _) => {
                bail!("completion model {} needs a plain text prompt", self.model)
            }
            (Endpoint::Chat, _) => bail!("chat model {} needs a message list prompt", self.model),
        };
        if let Some(object) = payload.as_object_mut() {
            object.insert("max_tokens".to_string(), json!(params.max_tokens));
            object.insert("n".to_string(), json!(params.n));
            object.insert("top_p".to_string(), json!(params.top_p));
            object.insert("temperature".to_string(), json!(params.temperature));
            object.insert("user".to_string(), json!(self.user));
        }

        debug!(route, model = %self.model, n = params.n, "hosted completion");
        let response = self.transport.post(route, &payload)?;
        extract_choices(self.endpoint, &response)
    }
}

fn extract_choices(endpoint: Endpoint, response: &Value) -> Result<Vec<String>> {
    let Some(choices) = response.get("choices").and_then(Value::as_array) else {
        bail!("hosted API reply has no choices");
    };
    choices
        .iter()
        .enumerate()
        .map(|(index, choice)| {
            let text = match endpoint {
                Endpoint::Completion => choice.get("text"),
                Endpoint::Chat => choice
                    .get("message")
                    .and_then(|message| message.get("content")),
            };
            text.and_then(Value::as_str)
                .map(str::to_string)
                .with_context(|| format!("hosted API choice {index} has no text: {choice}"))
        })
        .collect()
}

/// `login@host` of the process owner, sent along with each request.
pub fn user_tag() -> String {
    let login = non_empty_env("USER")
        .or_else(|| non_empty_env("USERNAME"))
        .unwrap_or_else(|| "unknown".to_string());
    format!("{login}@{}", host_name())
}

pub fn host_name() -> String {
    non_empty_env("HOSTNAME")
        .or_else(|| non_empty_env("COMPUTERNAME"))
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|raw| raw.trim().to_string())
                .filter(|name| !name.is_empty())
        })
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use anyhow::Result;
    use newsprobe_contracts::models::Endpoint;
    use newsprobe_contracts::prompt::{ComposedPrompt, ContentPart, Message};
    use serde_json::{json, Value};

    use super::{HostedBackend, HostedTransport};
    use crate::dispatch::{CompletionBackend, SamplingParams};

    struct FakeTransport {
        reply: Value,
        seen: Rc<RefCell<Vec<(String, Value)>>>,
    }

    impl HostedTransport for FakeTransport {
        fn post(&self, route: &str, payload: &Value) -> Result<Value> {
            self.seen
                .borrow_mut()
                .push((route.to_string(), payload.clone()));
            Ok(self.reply.clone())
        }
    }

    fn params() -> SamplingParams {
        SamplingParams {
            n: 2,
            max_tokens: 40,
            top_p: 1.0,
            temperature: 0.3,
            repetition_penalty: 1.1,
        }
    }

    #[test]
    fn chat_request_carries_messages_and_sampling() -> Result<()> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let backend = HostedBackend::new(
            "gpt-4o",
            Endpoint::Chat,
            Box::new(FakeTransport {
                reply: json!({"choices": [
                    {"message": {"role": "assistant", "content": "<yes>"}},
                    {"message": {"role": "assistant", "content": "<no>"}}
                ]}),
                seen: Rc::clone(&seen),
            }),
        );
        let prompt = ComposedPrompt::Chat(vec![Message::user(vec![ContentPart::Text {
            text: "Would you share it?".to_string(),
        }])]);

        let completions = backend.complete(&prompt, None, &params())?;
        assert_eq!(completions, vec!["<yes>", "<no>"]);

        let seen = seen.borrow();
        let (route, payload) = &seen[0];
        assert_eq!(route, "chat/completions");
        assert_eq!(payload["model"], json!("gpt-4o"));
        assert_eq!(payload["messages"][0]["content"][0]["text"], json!("Would you share it?"));
        assert_eq!(payload["n"], json!(2));
        assert_eq!(payload["max_tokens"], json!(40));
        assert!(payload["user"].as_str().is_some_and(|user| user.contains('@')));
        Ok(())
    }

    #[test]
    fn completion_request_uses_prompt_and_text_choices() -> Result<()> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let backend = HostedBackend::new(
            "gpt-3.5-turbo-instruct",
            Endpoint::Completion,
            Box::new(FakeTransport {
                reply: json!({"choices": [{"text": " Yes"}, {"text": " No"}]}),
                seen: Rc::clone(&seen),
            }),
        );
        let completions =
            backend.complete(&ComposedPrompt::Text("Share?".to_string()), None, &params())?;
        assert_eq!(completions, vec![" Yes", " No"]);
        assert_eq!(seen.borrow()[0].0, "completions");
        assert_eq!(seen.borrow()[0].1["prompt"], json!("Share?"));
        Ok(())
    }

    #[test]
    fn choice_without_text_is_an_error() {
        let backend = HostedBackend::new(
            "gpt-4o",
            Endpoint::Chat,
            Box::new(FakeTransport {
                reply: json!({"choices": [
                    {"message": {"role": "assistant", "content": "<yes>"}},
                    {"message": {"role": "assistant", "content": null, "refusal": "cannot"}}
                ]}),
                seen: Rc::new(RefCell::new(Vec::new())),
            }),
        );
        let prompt = ComposedPrompt::Chat(vec![Message::user(vec![ContentPart::Text {
            text: "Would you share it?".to_string(),
        }])]);

        let err = backend.complete(&prompt, None, &params()).unwrap_err();
        assert!(err.to_string().contains("choice 1 has no text"), "{err}");
    }

    #[test]
    fn prompt_shape_must_match_endpoint() {
        let backend = HostedBackend::new(
            "gpt-4",
            Endpoint::Chat,
            Box::new(FakeTransport {
                reply: json!({}),
                seen: Rc::new(RefCell::new(Vec::new())),
            }),
        );
        let err = backend
            .complete(&ComposedPrompt::Text("Share?".to_string()), None, &params())
            .unwrap_err();
        assert!(err.to_string().contains("needs a message list prompt"));
    }
}
