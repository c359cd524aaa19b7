use indexmap::IndexMap;

pub const VISION: &str = "vision";
pub const DEFAULT_VISION_MODEL: &str = "gpt-4o-2024-11-20";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub provider: String,
    pub capabilities: Vec<String>,
    pub context_window: Option<u64>,
    /// Largest number of images accepted in one request.
    pub max_images: Option<u32>,
}

impl ModelSpec {
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|item| item == capability)
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

    pub fn list(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.values()
    }

    pub fn by_capability(&self, capability: &str) -> Vec<ModelSpec> {
        self.models
            .values()
            .filter(|model| model.supports(capability))
            .cloned()
            .collect()
    }

    pub fn ensure(&self, name: &str, capability: &str) -> Option<ModelSpec> {
        let model = self.get(name)?;
        if model.supports(capability) {
            return Some(model.clone());
        }
        None
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert = |name: &str,
                      capabilities: &[&str],
                      context_window: Option<u64>,
                      max_images: Option<u32>| {
        map.insert(
            name.to_string(),
            ModelSpec {
                name: name.to_string(),
                provider: "openai".to_string(),
                capabilities: capabilities
                    .iter()
                    .map(|item| (*item).to_string())
                    .collect(),
                context_window,
                max_images,
            },
        );
    };

    insert(DEFAULT_VISION_MODEL, &["text", VISION], Some(128000), Some(16));
    insert("gpt-4o-mini", &["text", VISION], Some(128000), Some(16));
    insert("gpt-4.1", &["text", VISION], Some(1047576), Some(16));
    insert("gpt-4.1-mini", &["text", VISION], Some(1047576), Some(16));
    insert("o4-mini", &["text", VISION], Some(200000), Some(16));
    insert("gpt-3.5-turbo", &["text"], Some(16385), None);

    map
}
