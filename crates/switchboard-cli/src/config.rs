use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use switchboard_core::providers::DEFAULT_REQUEST_TIMEOUT;
use switchboard_core::{
    DEFAULT_ATTEMPT_TIMEOUT, DEFAULT_COOLDOWN, ModelCatalog, ModelCatalogEntry, ProviderDescriptor,
    ProviderFamily, ProviderRegistry, default_catalog, mask_secret,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SwitchboardConfig {
    #[serde(default)]
    pub router: RouterSettings,
    /// Explicit providers. When empty, providers come from the environment.
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    /// Extra catalog entries, layered over the built-in catalog
    #[serde(default)]
    pub models: Vec<ModelCatalogEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterSettings {
    /// How long a provider sits out after a transient failure
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// Upper bound on one provider attempt
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
    /// HTTP client timeout
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_cooldown_secs() -> u64 {
    DEFAULT_COOLDOWN.as_secs()
}
fn default_attempt_timeout_secs() -> u64 {
    DEFAULT_ATTEMPT_TIMEOUT.as_secs()
}
fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT.as_secs()
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            cooldown_secs: default_cooldown_secs(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl RouterSettings {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub family: ProviderFamily,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub base_url: Option<String>,
    pub model: String,
    #[serde(default)]
    pub priority: u32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("name", &self.name)
            .field("family", &self.family)
            .field("api_key", &mask_secret(&self.api_key))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("priority", &self.priority)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

fn default_max_tokens() -> u32 {
    switchboard_core::registry::DEFAULT_MAX_TOKENS
}

impl ProviderConfig {
    fn to_descriptor(&self) -> ProviderDescriptor {
        let base_url = self
            .base_url
            .clone()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| self.family.default_endpoint().to_string());
        ProviderDescriptor::new(
            self.name.clone(),
            self.family,
            self.api_key.clone(),
            base_url,
            self.model.clone(),
            self.priority,
        )
        .with_max_tokens(self.max_tokens)
    }
}

pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".switchboard")
}

pub fn default_config_path() -> PathBuf {
    config_dir().join("config.toml")
}

impl SwitchboardConfig {
    /// Load the config file. An explicit path must exist; without one, a
    /// missing default file means "use the environment".
    pub fn load(custom_path: &Option<PathBuf>) -> Result<Self> {
        match custom_path {
            Some(path) => Self::load_from(path),
            None => {
                let path = default_config_path();
                if path.exists() {
                    Self::load_from(&path)
                } else {
                    info!(
                        "No config at {}, reading providers from the environment",
                        path.display()
                    );
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        // Refuse config files readable by group or other
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Ok(metadata) = std::fs::metadata(path) {
                let mode = metadata.permissions().mode();
                if mode & 0o077 != 0 {
                    return Err(anyhow::anyhow!(
                        "Config file {:?} has overly permissive permissions ({:o}). \
                         It may contain secrets. Fix with: chmod 600 {:?}",
                        path,
                        mode & 0o777,
                        path
                    ));
                }
            }
        }

        let content = std::fs::read_to_string(path).with_context(|| {
            format!(
                "Failed to read config at {}. Run `switchboard init` first.",
                path.display()
            )
        })?;

        Self::parse(&content)
            .with_context(|| format!("Failed to parse config at {}", path.display()))
    }

    /// Parse config text and expand `${VAR}` references in credentials and URLs
    pub fn parse(content: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(content)?;

        for provider in &mut config.providers {
            if !provider.api_key.is_empty() && !provider.api_key.contains("${") {
                warn!(
                    "API key for provider '{}' is hardcoded in config file. For security, use environment variables: api_key = \"${{{}_API_KEY}}\"",
                    provider.name,
                    provider.name.to_uppercase()
                );
            }
            provider.api_key = expand_env_vars(&provider.api_key);
            provider.base_url = provider.base_url.as_deref().map(expand_env_vars);
        }

        Ok(config)
    }

    /// Providers from the file, or the built-in set from the environment
    pub fn registry(&self) -> Result<ProviderRegistry> {
        if self.providers.is_empty() {
            return ProviderRegistry::from_env();
        }
        ProviderRegistry::new(self.providers.iter().map(ProviderConfig::to_descriptor).collect())
    }

    pub fn catalog(&self) -> ModelCatalog {
        default_catalog().with_entries(self.models.clone())
    }
}

/// Allowlist of environment variable names that may be expanded in config files.
/// This prevents an attacker who can modify the config from reading arbitrary env vars.
const ALLOWED_ENV_VARS: &[&str] = &[
    "GEMINI_API_KEY",
    "GROQ_API_KEY",
    "OPENROUTER_API_KEY",
    "OPENAI_API_KEY",
    "HUGGINGFACE_API_KEY",
    "CUSTOM_LLM_API_KEY",
    "CUSTOM_LLM_BASE_URL",
    "HOME",
    "USER",
];

fn expand_env_vars(s: &str) -> String {
    expand_with(s, |name| std::env::var(name).ok())
}

fn expand_with<F>(s: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut result = s.to_string();
    let mut pos = 0;
    while pos < result.len() {
        let Some(start) = result[pos..].find("${") else {
            break;
        };
        let abs_start = pos + start;
        let Some(end) = result[abs_start..].find('}') else {
            break;
        };
        let var_name = result[abs_start + 2..abs_start + end].to_string();

        // Only expand variables in the allowlist
        if !ALLOWED_ENV_VARS.contains(&var_name.as_str()) {
            warn!(
                "Skipping expansion of unrecognized env var '{}' in config (not in allowlist)",
                var_name
            );
            // Leave the ${VAR} unexpanded so it's obvious
            pos = abs_start + end + 1;
            continue;
        }

        let value = lookup(&var_name).unwrap_or_default();
        result = format!(
            "{}{}{}",
            &result[..abs_start],
            value,
            &result[abs_start + end + 1..]
        );
        pos = abs_start + value.len();
    }
    result
}
