use std::path::{Path, PathBuf};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageUrl {
    pub url: String,
    pub detail: String,
}

/// One typed entry of a message content list. Serializes to the hosted
/// chat wire shape (`{"type": "text", "text": ...}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
    /// Opaque slot; the pixels travel next to the prompt.
    Image,
    ImageFile { path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    pub fn user(parts: Vec<ContentPart>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Parts(parts),
        }
    }

    /// First text entry of the content, or the plain content itself.
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Text(text) => Some(text.as_str()),
            MessageContent::Parts(parts) => parts.iter().find_map(|part| match part {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            }),
        }
    }
}

/// A prompt ready for a backend: a bare string for completion endpoints or a
/// role-tagged message list for chat endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ComposedPrompt {
    Text(String),
    Chat(Vec<Message>),
}

impl ComposedPrompt {
    /// Drops image parts so the prompt can be logged. Content lists collapse
    /// to their text; a message with no text at all is dropped.
    pub fn prune(&self) -> ComposedPrompt {
        match self {
            ComposedPrompt::Text(text) => ComposedPrompt::Text(text.clone()),
            ComposedPrompt::Chat(messages) => ComposedPrompt::Chat(
                messages
                    .iter()
                    .filter_map(|message| match &message.content {
                        MessageContent::Text(_) => Some(message.clone()),
                        MessageContent::Parts(_) => message.text().map(|text| Message {
                            role: message.role,
                            content: MessageContent::Text(text.to_string()),
                        }),
                    })
                    .collect(),
            ),
        }
    }

    pub fn texts(&self) -> Vec<&str> {
        match self {
            ComposedPrompt::Text(text) => vec![text.as_str()],
            ComposedPrompt::Chat(messages) => messages.iter().filter_map(Message::text).collect(),
        }
    }

    pub fn image_files(&self) -> Vec<&Path> {
        let ComposedPrompt::Chat(messages) = self else {
            return Vec::new();
        };
        messages
            .iter()
            .filter_map(|message| match &message.content {
                MessageContent::Parts(parts) => Some(parts),
                MessageContent::Text(_) => None,
            })
            .flatten()
            .filter_map(|part| match part {
                ContentPart::ImageFile { path } => Some(path.as_path()),
                _ => None,
            })
            .collect()
    }

    pub fn has_image_parts(&self) -> bool {
        let ComposedPrompt::Chat(messages) = self else {
            return false;
        };
        messages.iter().any(|message| {
            matches!(&message.content, MessageContent::Parts(parts)
                if parts.iter().any(|part| !matches!(part, ContentPart::Text { .. })))
        })
    }
}
