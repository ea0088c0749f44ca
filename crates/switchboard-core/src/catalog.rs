//! User-facing model ids mapped onto concrete provider models

use serde::{Deserialize, Serialize};

/// Model id meaning "let the router pick"
pub const AUTO_MODEL_ID: &str = "auto";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCatalogEntry {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    pub provider: String,
    pub backend_model: String,
}

impl ModelCatalogEntry {
    pub fn new(id: &str, display_name: &str, provider: &str, backend_model: &str) -> Self {
        Self {
            id: id.to_string(),
            display_name: display_name.to_string(),
            provider: provider.to_string(),
            backend_model: backend_model.to_string(),
        }
    }
}

/// Static lookup table, read-only once built
#[derive(Debug, Clone, Default)]
pub struct ModelCatalog {
    entries: Vec<ModelCatalogEntry>,
}

impl ModelCatalog {
    pub fn new(entries: Vec<ModelCatalogEntry>) -> Self {
        Self::default().with_entries(entries)
    }

    /// Add entries, replacing any existing entry with the same id
    pub fn with_entries(mut self, entries: Vec<ModelCatalogEntry>) -> Self {
        for entry in entries {
            if entry.id == AUTO_MODEL_ID {
                continue;
            }
            match self.entries.iter_mut().find(|e| e.id == entry.id) {
                Some(existing) => *existing = entry,
                None => self.entries.push(entry),
            }
        }
        self
    }

    /// Exact-match lookup. Unknown ids and "auto" resolve to nothing.
    pub fn resolve(&self, model_id: &str) -> Option<&ModelCatalogEntry> {
        if model_id == AUTO_MODEL_ID {
            return None;
        }
        self.entries.iter().find(|e| e.id == model_id)
    }

    pub fn entries(&self) -> &[ModelCatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Built-in models: (id, display name, provider, backend model)
const DEFAULT_MODELS: &[(&str, &str, &str, &str)] = &[
    ("gemini-2.0-flash", "Gemini 2.0 Flash", "gemini", "gemini-2.0-flash"),
    ("gemini-1.5-pro", "Gemini 1.5 Pro", "gemini", "gemini-1.5-pro"),
    ("llama-3.3-70b", "Llama 3.3 70B", "groq", "llama-3.3-70b-versatile"),
    ("llama-3.1-8b", "Llama 3.1 8B", "groq", "llama-3.1-8b-instant"),
    ("deepseek-r1", "DeepSeek R1", "openrouter", "deepseek/deepseek-r1:free"),
    ("gpt-4o-mini", "GPT-4o mini", "openai", "gpt-4o-mini"),
    ("gpt-4o", "GPT-4o", "openai", "gpt-4o"),
    ("mistral-7b", "Mistral 7B Instruct", "huggingface", "mistralai/Mistral-7B-Instruct-v0.3"),
];

/// Catalog matching the providers built by `ProviderRegistry::from_env`
pub fn default_catalog() -> ModelCatalog {
    ModelCatalog::new(
        DEFAULT_MODELS
            .iter()
            .map(|&(id, name, provider, model)| ModelCatalogEntry::new(id, name, provider, model))
            .collect(),
    )
}
