use indexmap::IndexMap;

/// Capability tags used by the gateway when it picks a model:
/// `reasoning`, `text`, `vision`, `json`, `search`, `image`, `edit`,
/// `video`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub provider: String,
    pub capabilities: Vec<String>,
}

impl ModelSpec {
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|item| item == capability)
    }
}

/// Which model answers which capability is a gateway-internal concern;
/// consumers never see model names. Insertion order is preference order.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
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

    pub fn list(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.values()
    }

    /// First registered model carrying the capability.
    pub fn first_for(&self, capability: &str) -> Option<&ModelSpec> {
        self.models.values().find(|model| model.supports(capability))
    }

    pub fn ensure(&self, name: &str, capability: &str) -> Option<ModelSpec> {
        let model = self.get(name)?;
        if model.supports(capability) {
            return Some(model.clone());
        }
        None
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert = |name: &str, provider: &str, capabilities: &[&str]| {
        map.insert(
            name.to_string(),
            ModelSpec {
                name: name.to_string(),
                provider: provider.to_string(),
                capabilities: capabilities
                    .iter()
                    .map(|item| (*item).to_string())
                    .collect(),
            },
        );
    };

    insert(
        "gemini-3-pro-preview",
        "gemini",
        &["reasoning", "vision", "json"],
    );
    insert(
        "gemini-2.5-flash",
        "gemini",
        &["text", "vision", "json", "search"],
    );
    insert("gemini-2.5-flash-image", "gemini", &["image", "edit"]);
    insert("veo-3.1-fast-generate-preview", "gemini", &["video"]);

    map
}
