//! Provider descriptors and the startup-time registry built from configuration

use std::collections::HashSet;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Wire-format family, which decides the adapter used for a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderFamily {
    /// OpenAI-style chat completions (OpenAI, Groq, OpenRouter, ...)
    #[serde(alias = "openai_compat")]
    OpenAi,
    /// Gemini generative-content API
    Google,
    /// Hugging Face text-generation inference
    HuggingFace,
}

impl ProviderFamily {
    pub fn default_endpoint(self) -> &'static str {
        match self {
            Self::OpenAi => "https://api.openai.com",
            Self::Google => "https://generativelanguage.googleapis.com",
            Self::HuggingFace => "https://api-inference.huggingface.co",
        }
    }
}

impl std::fmt::Display for ProviderFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenAi => write!(f, "openai"),
            Self::Google => write!(f, "google"),
            Self::HuggingFace => write!(f, "huggingface"),
        }
    }
}

pub const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Immutable description of one configured backend
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderDescriptor {
    name: String,
    family: ProviderFamily,
    credential: String,
    endpoint_base: String,
    default_model: String,
    priority: u32,
    max_tokens: u32,
    enabled: bool,
}

impl std::fmt::Debug for ProviderDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderDescriptor")
            .field("name", &self.name)
            .field("family", &self.family)
            .field("credential", &mask_secret(&self.credential))
            .field("endpoint_base", &self.endpoint_base)
            .field("default_model", &self.default_model)
            .field("priority", &self.priority)
            .field("max_tokens", &self.max_tokens)
            .field("enabled", &self.enabled)
            .finish()
    }
}

impl ProviderDescriptor {
    /// Build a descriptor. The provider is enabled only when a non-blank
    /// credential is present.
    pub fn new(
        name: impl Into<String>,
        family: ProviderFamily,
        credential: impl Into<String>,
        endpoint_base: impl Into<String>,
        default_model: impl Into<String>,
        priority: u32,
    ) -> Self {
        let credential = credential.into().trim().to_string();
        let endpoint_base = endpoint_base.into().trim_end_matches('/').to_string();
        Self {
            name: name.into(),
            family,
            enabled: !credential.is_empty(),
            credential,
            endpoint_base,
            default_model: default_model.into(),
            priority,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn family(&self) -> ProviderFamily {
        self.family
    }

    pub fn credential(&self) -> &str {
        &self.credential
    }

    pub fn endpoint_base(&self) -> &str {
        &self.endpoint_base
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

/// Built-in providers read from the environment when no config file is used.
/// (name, family, credential var, default model, priority)
const ENV_PROVIDERS: &[(&str, ProviderFamily, &str, &str, u32)] = &[
    ("gemini", ProviderFamily::Google, "GEMINI_API_KEY", "gemini-2.0-flash", 1),
    ("groq", ProviderFamily::OpenAi, "GROQ_API_KEY", "llama-3.3-70b-versatile", 2),
    (
        "openrouter",
        ProviderFamily::OpenAi,
        "OPENROUTER_API_KEY",
        "meta-llama/llama-3.3-70b-instruct:free",
        3,
    ),
    ("openai", ProviderFamily::OpenAi, "OPENAI_API_KEY", "gpt-4o-mini", 4),
    (
        "huggingface",
        ProviderFamily::HuggingFace,
        "HUGGINGFACE_API_KEY",
        "mistralai/Mistral-7B-Instruct-v0.3",
        5,
    ),
];

fn env_endpoint(name: &str, family: ProviderFamily) -> &'static str {
    match name {
        "groq" => "https://api.groq.com/openai",
        "openrouter" => "https://openrouter.ai/api",
        _ => family.default_endpoint(),
    }
}

/// The full set of configured providers, fixed for the process lifetime
#[derive(Debug, Clone)]
pub struct ProviderRegistry {
    providers: Vec<ProviderDescriptor>,
}

impl ProviderRegistry {
    /// Validate and wrap a list of descriptors
    pub fn new(providers: Vec<ProviderDescriptor>) -> Result<Self> {
        let mut seen = HashSet::new();
        for p in &providers {
            if p.name.is_empty() {
                return Err(anyhow!("Provider name must not be empty"));
            }
            if !seen.insert(p.name.clone()) {
                return Err(anyhow!("Duplicate provider name '{}'", p.name));
            }
            url::Url::parse(&p.endpoint_base).with_context(|| {
                format!("Invalid endpoint '{}' for provider {}", p.endpoint_base, p.name)
            })?;
        }

        let enabled = providers.iter().filter(|p| p.enabled).count();
        info!(
            "Provider registry: {} configured, {} enabled",
            providers.len(),
            enabled
        );
        for p in providers.iter().filter(|p| !p.enabled) {
            debug!("Provider {} disabled: no credential", p.name);
        }

        Ok(Self { providers })
    }

    /// Build the default providers from process environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build the default providers from an arbitrary variable lookup.
    ///
    /// `{NAME}_API_KEY` supplies the credential and the optional
    /// `{NAME}_MODEL` overrides the default model.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let providers = ENV_PROVIDERS
            .iter()
            .map(|&(name, family, key_var, model, priority)| {
                let credential = lookup(key_var).unwrap_or_default();
                let model_var = key_var.replace("_API_KEY", "_MODEL");
                let model = lookup(&model_var)
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| model.to_string());
                ProviderDescriptor::new(
                    name,
                    family,
                    credential,
                    env_endpoint(name, family),
                    model,
                    priority,
                )
            })
            .collect();
        Self::new(providers)
    }

    /// Every configured provider, enabled or not, in declaration order
    pub fn all(&self) -> &[ProviderDescriptor] {
        &self.providers
    }

    /// Enabled providers sorted by ascending priority (stable for ties)
    pub fn enabled(&self) -> Vec<ProviderDescriptor> {
        let mut enabled: Vec<ProviderDescriptor> =
            self.providers.iter().filter(|p| p.enabled).cloned().collect();
        enabled.sort_by_key(|p| p.priority);
        enabled
    }

    pub fn get(&self, name: &str) -> Option<&ProviderDescriptor> {
        self.providers.iter().find(|p| p.name == name)
    }
}

/// Mask a secret string for safe display in Debug output / logs.
/// Shows first 3 and last 4 chars for keys longer than 7 chars, otherwise "***".
pub fn mask_secret(s: &str) -> String {
    if s.is_empty() {
        return "(empty)".to_string();
    }
    let chars: Vec<char> = s.chars().collect();
    if chars.len() > 7 {
        let prefix: String = chars[..3].iter().collect();
        let suffix: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", prefix, suffix)
    } else {
        "***".to_string()
    }
}
