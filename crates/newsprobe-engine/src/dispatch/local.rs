use std::io::Cursor;
use std::rc::Rc;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageFormat};
use newsprobe_contracts::config::LocalConfig;
use newsprobe_contracts::models::LocalFamily;
use newsprobe_contracts::prompt::{ComposedPrompt, ContentPart, Message, MessageContent, Role};
use reqwest::blocking::Client as HttpClient;
use serde_json::{json, Value};
use tracing::debug;

use super::{CompletionBackend, SamplingParams};
use crate::compose::load_image;
use crate::credentials::Credentials;
use crate::{http_client, response_json_or_error};

/// Side length of the square images the detached-image families accept.
pub const VISION_RESOLUTION: u32 = 672;

const LLAVA_CLOSE: &str = "[/INST]";
const IMAGE_MARKER: &str = "<image>";
const QWEN_SYSTEM: &str = "You are a helpful assistant.";
const QWEN_VISION: &str = "<|vision_start|><|image_pad|><|vision_end|>";
const QWEN_ASSISTANT: &str = "assistant\n";

/// One sampling request to the inference server.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    /// Base64 PNG images, in prompt order.
    pub images: Vec<String>,
    pub num_return_sequences: usize,
    pub max_new_tokens: u32,
    pub top_p: f64,
    pub temperature: f64,
    pub repetition_penalty: f64,
}

/// Runs a generate call and returns the decoded sequences.
pub trait LocalGenerator {
    fn generate(&self, request: &GenerateRequest) -> Result<Vec<String>>;
}

pub struct HttpLocalGenerator {
    endpoint: String,
    http: HttpClient,
    credentials: Rc<Credentials>,
}

impl HttpLocalGenerator {
    pub fn new(config: &LocalConfig, credentials: Rc<Credentials>) -> Result<Self> {
        Ok(Self {
            endpoint: format!("{}/generate", config.api_base.trim_end_matches('/')),
            http: http_client(config.request_timeout_secs)?,
            credentials,
        })
    }
}

impl LocalGenerator for HttpLocalGenerator {
    fn generate(&self, request: &GenerateRequest) -> Result<Vec<String>> {
        let payload = json!({
            "model": request.model,
            "prompt": request.prompt,
            "images": request.images,
            "num_return_sequences": request.num_return_sequences,
            "max_new_tokens": request.max_new_tokens,
            "do_sample": true,
            "top_p": request.top_p,
            "temperature": request.temperature,
            "repetition_penalty": request.repetition_penalty,
        });
        let mut builder = self.http.post(&self.endpoint).json(&payload);
        if let Some(token) = self.credentials.hub_token()? {
            builder = builder.bearer_auth(token);
        }
        let response = builder
            .send()
            .with_context(|| format!("local inference request failed ({})", self.endpoint))?;
        let parsed = response_json_or_error("local inference server", response)?;
        let Some(outputs) = parsed.get("outputs").and_then(Value::as_array) else {
            bail!("local inference server reply has no outputs");
        };
        decode_outputs(outputs)
    }
}

fn decode_outputs(outputs: &[Value]) -> Result<Vec<String>> {
    outputs
        .iter()
        .enumerate()
        .map(|(index, output)| {
            output
                .as_str()
                .map(str::to_string)
                .with_context(|| format!("local output {index} is not a string: {output}"))
        })
        .collect()
}

pub struct LocalBackend {
    family: LocalFamily,
    model: String,
    ceiling: usize,
    generator: Box<dyn LocalGenerator>,
}

impl LocalBackend {
    pub fn new(
        family: LocalFamily,
        model: &str,
        ceiling: usize,
        generator: Box<dyn LocalGenerator>,
    ) -> Self {
        Self {
            family,
            model: model.to_string(),
            ceiling,
            generator,
        }
    }

    /// Prompt string and images in the form the family expects.
    fn prepare(
        &self,
        prompt: &ComposedPrompt,
        image: Option<&DynamicImage>,
    ) -> Result<(String, Vec<DynamicImage>)> {
        match self.family {
            LocalFamily::LlavaNext => {
                // always needs an image; black placeholder otherwise
                let image = match image {
                    Some(image) => resize(image),
                    None => DynamicImage::ImageLuma8(GrayImage::new(
                        VISION_RESOLUTION,
                        VISION_RESOLUTION,
                    )),
                };
                Ok((llava_template(&as_messages(prompt)), vec![image]))
            }
            LocalFamily::Chameleon => {
                let ComposedPrompt::Text(text) = prompt else {
                    bail!("{} needs a plain text prompt", self.model);
                };
                match image {
                    Some(image) => Ok((format!("{text}{IMAGE_MARKER}"), vec![resize(image)])),
                    None => Ok((text.clone(), Vec::new())),
                }
            }
            LocalFamily::Qwen2Vl => {
                let images = prompt
                    .image_files()
                    .into_iter()
                    .map(load_image)
                    .collect::<Result<Vec<DynamicImage>>>()?;
                Ok((qwen_template(&as_messages(prompt)), images))
            }
        }
    }

    fn strip(&self, prompt: &str, decoded: &str) -> String {
        match self.family {
            LocalFamily::LlavaNext => after_last(decoded, LLAVA_CLOSE),
            LocalFamily::Qwen2Vl => after_last(decoded, QWEN_ASSISTANT),
            LocalFamily::Chameleon => {
                let bare = prompt.strip_suffix(IMAGE_MARKER).unwrap_or(prompt);
                decoded
                    .strip_prefix(prompt)
                    .or_else(|| decoded.strip_prefix(bare))
                    .unwrap_or(decoded)
                    .trim()
                    .to_string()
            }
        }
    }
}

impl CompletionBackend for LocalBackend {
    fn name(&self) -> &str {
        self.family.name()
    }

    fn max_returns_per_call(&self) -> Option<usize> {
        Some(self.ceiling)
    }

    fn complete(
        &self,
        prompt: &ComposedPrompt,
        image: Option<&DynamicImage>,
        params: &SamplingParams,
    ) -> Result<Vec<String>> {
        let (text, images) = self.prepare(prompt, image)?;
        let request = GenerateRequest {
            model: self.model.clone(),
            prompt: text,
            images: images
                .iter()
                .map(encode_png)
                .collect::<Result<Vec<String>>>()?,
            num_return_sequences: params.n,
            max_new_tokens: params.max_tokens,
            top_p: params.top_p,
            temperature: params.temperature,
            repetition_penalty: params.repetition_penalty,
        };
        debug!(
            family = self.family.name(),
            n = params.n,
            images = request.images.len(),
            "local generate"
        );
        let decoded = self.generator.generate(&request)?;
        Ok(decoded
            .iter()
            .map(|sequence| self.strip(&request.prompt, sequence))
            .collect())
    }
}

fn as_messages(prompt: &ComposedPrompt) -> Vec<Message> {
    match prompt {
        ComposedPrompt::Chat(messages) => messages.clone(),
        ComposedPrompt::Text(text) => vec![Message::user(vec![ContentPart::Text {
            text: text.clone(),
        }])],
    }
}

fn llava_template(messages: &[Message]) -> String {
    let mut out = String::new();
    for message in messages {
        let text = message.text().unwrap_or_default();
        match message.role {
            Role::Assistant => {
                out.push(' ');
                out.push_str(text);
            }
            Role::System | Role::User => {
                out.push_str(&format!("[INST] {IMAGE_MARKER}\n{text} {LLAVA_CLOSE}"));
            }
        }
    }
    out
}

fn qwen_template(messages: &[Message]) -> String {
    let mut out = String::new();
    if !matches!(messages.first(), Some(message) if message.role == Role::System) {
        out.push_str(&format!("<|im_start|>system\n{QWEN_SYSTEM}<|im_end|>\n"));
    }
    for message in messages {
        out.push_str(&format!("<|im_start|>{}\n", message.role.as_str()));
        match &message.content {
            MessageContent::Text(text) => out.push_str(text),
            MessageContent::Parts(parts) => {
                for part in parts {
                    match part {
                        ContentPart::Text { text } => out.push_str(text),
                        ContentPart::Image
                        | ContentPart::ImageFile { .. }
                        | ContentPart::ImageUrl { .. } => out.push_str(QWEN_VISION),
                    }
                }
            }
        }
        out.push_str("<|im_end|>\n");
    }
    out.push_str("<|im_start|>assistant\n");
    out
}

fn after_last(decoded: &str, marker: &str) -> String {
    decoded
        .rsplit_once(marker)
        .map(|(_, tail)| tail)
        .unwrap_or(decoded)
        .trim()
        .to_string()
}

fn resize(image: &DynamicImage) -> DynamicImage {
    image.resize_exact(VISION_RESOLUTION, VISION_RESOLUTION, FilterType::CatmullRom)
}

fn encode_png(image: &DynamicImage) -> Result<String> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .context("failed encoding image as PNG")?;
    Ok(BASE64.encode(bytes))
}
