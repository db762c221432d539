use std::fmt;

use anyhow::bail;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endpoint {
    Chat,
    Completion,
}

impl Endpoint {
    pub fn as_str(&self) -> &'static str {
        match self {
            Endpoint::Chat => "chat",
            Endpoint::Completion => "cmpl",
        }
    }
}

/// Locally served vision-language model families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocalFamily {
    /// LLaVA-NeXT: chat template, always needs an image.
    LlavaNext,
    /// Chameleon: raw completion, echoes the prompt back.
    Chameleon,
    /// Qwen2-VL: chat template, images travel inside the messages.
    Qwen2Vl,
}

impl LocalFamily {
    pub const ALL: [LocalFamily; 3] = [
        LocalFamily::LlavaNext,
        LocalFamily::Chameleon,
        LocalFamily::Qwen2Vl,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            LocalFamily::LlavaNext => "llava-next",
            LocalFamily::Chameleon => "chameleon",
            LocalFamily::Qwen2Vl => "qwen2-vl",
        }
    }

    /// Largest sample count one generate call may ask for (GPU memory).
    pub fn default_max_returns_per_call(&self) -> usize {
        match self {
            LocalFamily::LlavaNext => 50,
            LocalFamily::Chameleon => 30,
            LocalFamily::Qwen2Vl => 30,
        }
    }

    /// Families that receive the decoded image next to the prompt rather
    /// than referenced from inside the messages.
    pub fn takes_detached_image(&self) -> bool {
        matches!(self, LocalFamily::LlavaNext | LocalFamily::Chameleon)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Backend {
    Hosted,
    Local(LocalFamily),
    Unsupported(String),
}

impl Backend {
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "hosted" | "openai" => Backend::Hosted,
            "local-llava-next" => Backend::Local(LocalFamily::LlavaNext),
            "local-chameleon" => Backend::Local(LocalFamily::Chameleon),
            "local-qwen2-vl" => Backend::Local(LocalFamily::Qwen2Vl),
            _ => Backend::Unsupported(name.to_string()),
        }
    }

    pub fn name(&self) -> String {
        match self {
            Backend::Hosted => "hosted".to_string(),
            Backend::Local(family) => format!("local-{}", family.name()),
            Backend::Unsupported(name) => name.clone(),
        }
    }
}

impl Serialize for Backend {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.name())
    }
}

impl<'de> Deserialize<'de> for Backend {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Backend::parse(&raw))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub name: String,
    pub short_name: String,
    pub endpoint: Endpoint,
    pub backend: Backend,
}

/// How a configuration points at a model: registry position or full name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModelRef {
    Index(usize),
    Name(String),
}

impl Default for ModelRef {
    fn default() -> Self {
        ModelRef::Index(0)
    }
}

impl fmt::Display for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelRef::Index(index) => write!(f, "#{index}"),
            ModelRef::Name(name) => f.write_str(name),
        }
    }
}

impl std::str::FromStr for ModelRef {
    type Err = std::convert::Infallible;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Ok(match raw.trim().parse::<usize>() {
            Ok(index) => ModelRef::Index(index),
            Err(_) => ModelRef::Name(raw.trim().to_string()),
        })
    }
}

#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(name)
    }

    pub fn get_index(&self, index: usize) -> Option<&ModelSpec> {
        self.models.get_index(index).map(|(_, spec)| spec)
    }

    pub fn list(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.values()
    }

    pub fn resolve(&self, reference: &ModelRef) -> anyhow::Result<ModelSpec> {
        let found = match reference {
            ModelRef::Index(index) => self.get_index(*index),
            ModelRef::Name(name) => self.get(name),
        };
        match found {
            Some(spec) => Ok(spec.clone()),
            None => bail!(
                "model {reference} not available ({} models known, see `newsprobe models`)",
                self.models.len()
            ),
        }
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert = |name: &str, short_name: &str, endpoint: Endpoint, backend: &str| {
        map.insert(
            name.to_string(),
            ModelSpec {
                name: name.to_string(),
                short_name: short_name.to_string(),
                endpoint,
                backend: Backend::parse(backend),
            },
        );
    };

    insert("gpt-3.5-turbo-instruct", "gpt35i", Endpoint::Completion, "hosted");
    insert("gpt-3.5-turbo", "gpt35", Endpoint::Chat, "hosted");
    insert("gpt-4", "gpt4", Endpoint::Chat, "hosted");
    insert("gpt-4-vision-preview", "gpt4v", Endpoint::Chat, "hosted");
    insert("gpt-4o-2024-05-13", "gpt4o0513", Endpoint::Chat, "hosted");
    insert("gpt-4o", "gpt4o", Endpoint::Chat, "hosted");
    insert("gpt-4o-mini", "gpt4om", Endpoint::Chat, "hosted");
    insert(
        "llava-hf/llava-v1.6-mistral-7b-hf",
        "ll167b",
        Endpoint::Chat,
        "local-llava-next",
    );
    insert(
        "facebook/chameleon-7b",
        "cham7b",
        Endpoint::Completion,
        "local-chameleon",
    );
    insert(
        "Qwen/Qwen2-VL-2B-Instruct",
        "qwen2b",
        Endpoint::Chat,
        "local-qwen2-vl",
    );
    insert(
        "Qwen/Qwen2-VL-7B-Instruct",
        "qwen7b",
        Endpoint::Chat,
        "local-qwen2-vl",
    );

    map
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::{Backend, Endpoint, LocalFamily, ModelRef, ModelRegistry, ModelSpec};

    #[test]
    fn default_registry_resolves_by_index_and_name() -> anyhow::Result<()> {
        let registry = ModelRegistry::default();
        let first = registry.resolve(&ModelRef::default())?;
        assert_eq!(first.name, "gpt-3.5-turbo-instruct");
        assert_eq!(first.endpoint, Endpoint::Completion);

        let llava = registry.resolve(&ModelRef::Index(7))?;
        assert_eq!(llava.backend, Backend::Local(LocalFamily::LlavaNext));

        let qwen = registry.resolve(&ModelRef::Name("Qwen/Qwen2-VL-7B-Instruct".to_string()))?;
        assert_eq!(qwen.short_name, "qwen7b");
        assert_eq!(qwen.backend, Backend::Local(LocalFamily::Qwen2Vl));
        Ok(())
    }

    #[test]
    fn unknown_reference_is_an_error() {
        let registry = ModelRegistry::default();
        let err = registry.resolve(&ModelRef::Index(99)).unwrap_err();
        assert!(err.to_string().contains("model #99 not available"));
        assert!(registry
            .resolve(&ModelRef::Name("gpt-9".to_string()))
            .is_err());
    }

    #[test]
    fn backend_names_round_trip_and_unknown_names_are_kept() {
        for family in LocalFamily::ALL {
            let backend = Backend::Local(family);
            assert_eq!(Backend::parse(&backend.name()), backend);
        }
        assert_eq!(Backend::parse("OpenAI"), Backend::Hosted);
        assert_eq!(
            Backend::parse("local-gemma"),
            Backend::Unsupported("local-gemma".to_string())
        );
    }

    #[test]
    fn model_ref_parses_indices_and_names() {
        assert_eq!("3".parse::<ModelRef>(), Ok(ModelRef::Index(3)));
        assert_eq!(
            " gpt-4o ".parse::<ModelRef>(),
            Ok(ModelRef::Name("gpt-4o".to_string()))
        );
    }

    #[test]
    fn custom_registry_preserves_insertion_order() {
        let mut models = IndexMap::new();
        for name in ["z-model", "a-model"] {
            models.insert(
                name.to_string(),
                ModelSpec {
                    name: name.to_string(),
                    short_name: name.to_string(),
                    endpoint: Endpoint::Chat,
                    backend: Backend::Hosted,
                },
            );
        }
        let registry = ModelRegistry::new(Some(models));
        let names = registry
            .list()
            .map(|spec| spec.name.clone())
            .collect::<Vec<String>>();
        assert_eq!(names, vec!["z-model", "a-model"]);
        assert_eq!(registry.get_index(1).map(|spec| spec.name.as_str()), Some("a-model"));
    }
}
