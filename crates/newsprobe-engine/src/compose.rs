use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::DynamicImage;
use newsprobe_contracts::config::PathsConfig;
use newsprobe_contracts::models::{Backend, Endpoint};
use newsprobe_contracts::prompt::{ComposedPrompt, ContentPart, ImageUrl, Message};
use newsprobe_contracts::store::{
    DemographicRegistry, Demographics, DialogStore, NewsItem, NewsStore,
};
use tracing::warn;

use crate::mime_for_path;

/// Knobs of one composition: which fragments surround the news and what
/// goes into its body.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptOptions<'a> {
    pub pre: &'a [String],
    pub post: &'a [String],
    pub with_img: bool,
    pub info_source: bool,
    pub info_more: bool,
    pub demographics: Option<&'a Demographics>,
}

/// A backend-shaped prompt plus the image that goes with it.
#[derive(Debug, Clone, PartialEq)]
pub struct FormattedPrompt {
    pub prompt: ComposedPrompt,
    /// Empty when the prompt carries no image.
    pub image_name: String,
    /// Set for backends that take the image next to the prompt.
    pub detached_image: Option<PathBuf>,
}

pub struct Composer<'a> {
    news: &'a NewsStore,
    dialogs: &'a DialogStore,
    demographics: &'a DemographicRegistry,
    paths: &'a PathsConfig,
    detail: &'a str,
}

impl<'a> Composer<'a> {
    pub fn new(
        news: &'a NewsStore,
        dialogs: &'a DialogStore,
        demographics: &'a DemographicRegistry,
        paths: &'a PathsConfig,
        detail: &'a str,
    ) -> Self {
        Self {
            news,
            dialogs,
            demographics,
            paths,
            detail,
        }
    }

    /// Every news id, in collection order.
    pub fn news_ids(&self) -> Vec<String> {
        self.news.ids()
    }

    /// Full prompt text and the image name (`None` without image).
    pub fn compose_text(
        &self,
        news_id: &str,
        options: &PromptOptions<'_>,
    ) -> Result<(String, Option<String>)> {
        let item = self.news.get(news_id)?;
        let dems = options.demographics.map(|dems| (dems, self.demographics));
        let pre = self.dialogs.join(options.pre, options.with_img, dems)?;
        let post = self.dialogs.join(options.post, options.with_img, dems)?;

        let mut text = String::new();
        if !pre.is_empty() {
            text.push_str(&pre);
            text.push('\n');
        }
        text.push_str(&news_body(item, options.info_source, options.info_more));
        text.push_str(&post);

        let image = if options.with_img {
            let image = item.image().map(str::to_string);
            if image.is_none() {
                warn!(news_id, "news has no image, composing text only");
            }
            image
        } else {
            None
        };
        Ok((text, image))
    }

    pub fn format_prompt(
        &self,
        news_id: &str,
        backend: &Backend,
        endpoint: Endpoint,
        options: &PromptOptions<'_>,
    ) -> Result<FormattedPrompt> {
        let (text, image) = self.compose_text(news_id, options)?;
        let image_path = image.as_deref().map(|name| self.paths.image_path(name));
        let text_part = ContentPart::Text { text: text.clone() };

        let formatted = match (backend, endpoint) {
            (Backend::Unsupported(name), _) => {
                bail!("unsupported backend '{name}'")
            }
            (Backend::Hosted, Endpoint::Completion) | (Backend::Local(_), Endpoint::Completion) => {
                let takes_image = matches!(
                    backend,
                    Backend::Local(family) if family.takes_detached_image()
                );
                if image.is_some() && !takes_image {
                    warn!(news_id, "completion endpoint cannot take an image, sending text only");
                }
                let keep = takes_image && image.is_some();
                FormattedPrompt {
                    prompt: ComposedPrompt::Text(text),
                    image_name: if keep { image.unwrap_or_default() } else { String::new() },
                    detached_image: if keep { image_path } else { None },
                }
            }
            (Backend::Hosted, Endpoint::Chat) => {
                let mut parts = vec![text_part];
                if let Some(path) = &image_path {
                    parts.push(ContentPart::ImageUrl {
                        image_url: ImageUrl {
                            url: image_data_url(path)?,
                            detail: self.detail.to_string(),
                        },
                    });
                }
                FormattedPrompt {
                    prompt: ComposedPrompt::Chat(vec![Message::user(parts)]),
                    image_name: image.unwrap_or_default(),
                    detached_image: None,
                }
            }
            (Backend::Local(family), Endpoint::Chat) if family.takes_detached_image() => {
                let mut parts = vec![text_part];
                if image.is_some() {
                    parts.push(ContentPart::Image);
                }
                FormattedPrompt {
                    prompt: ComposedPrompt::Chat(vec![Message::user(parts)]),
                    image_name: image.unwrap_or_default(),
                    detached_image: image_path,
                }
            }
            (Backend::Local(_), Endpoint::Chat) => {
                let mut parts = Vec::new();
                if let Some(path) = &image_path {
                    parts.push(ContentPart::ImageFile { path: path.clone() });
                }
                parts.push(text_part);
                FormattedPrompt {
                    prompt: ComposedPrompt::Chat(vec![Message::user(parts)]),
                    image_name: image.unwrap_or_default(),
                    detached_image: None,
                }
            }
        };
        Ok(formatted)
    }
}

/// `The news comes from ...` and extra info, then the content.
fn news_body(item: &NewsItem, info_source: bool, info_more: bool) -> String {
    let mut body = String::new();
    if info_source && !item.source.is_empty() {
        body.push_str(&format!("The news comes from {}.", item.source));
    }
    if info_more && !item.extra_info.is_empty() {
        body.push(' ');
        body.push_str(&item.extra_info);
    }
    if !body.is_empty() {
        body.push('\n');
    }
    body.push_str(&item.body);
    body.push('\n');
    body
}

pub fn image_data_url(path: &Path) -> Result<String> {
    let bytes =
        std::fs::read(path).with_context(|| format!("failed reading image {}", path.display()))?;
    let mime = mime_for_path(path).unwrap_or("image/jpeg");
    Ok(format!("data:{mime};base64,{}", BASE64.encode(bytes)))
}

pub fn load_image(path: &Path) -> Result<DynamicImage> {
    image::open(path).with_context(|| format!("failed decoding image {}", path.display()))
}
