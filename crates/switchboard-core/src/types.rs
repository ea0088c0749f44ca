//! Provider-agnostic request and response types

use serde::{Deserialize, Serialize};

/// Provider-agnostic chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
    System,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ChatRole::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(ChatRole::System, content)
    }
}

impl std::fmt::Display for ChatRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::System => write!(f, "system"),
        }
    }
}

/// Token usage reported by a provider for a single call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    /// Build usage from prompt/completion counts, deriving the total when the
    /// provider didn't send one
    pub fn new(prompt_tokens: u32, completion_tokens: u32, total_tokens: Option<u32>) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: total_tokens.unwrap_or(prompt_tokens + completion_tokens),
        }
    }
}

/// Retry guidance extracted from a rate-limited provider response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitInfo {
    /// Seconds to wait before retrying, when the provider told us
    pub retry_after_seconds: Option<f64>,
    /// Message safe to show to an end user
    pub message: String,
}

impl RateLimitInfo {
    pub fn new(retry_after_seconds: Option<f64>) -> Self {
        let message = match retry_after_seconds {
            Some(secs) => format!(
                "Rate limit reached. Please try again in {} seconds.",
                format_seconds(secs)
            ),
            None => "Rate limit reached. Please wait a moment and try again.".to_string(),
        };
        Self {
            retry_after_seconds,
            message,
        }
    }
}

fn format_seconds(secs: f64) -> String {
    if secs.fract() == 0.0 {
        format!("{}", secs as u64)
    } else {
        format!("{:.1}", secs)
    }
}

/// Response handed back to callers regardless of which provider answered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalResponse {
    pub text: String,
    pub provider_name: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitInfo>,
}

impl CanonicalResponse {
    pub fn new(text: impl Into<String>, provider_name: &str, model: &str) -> Self {
        Self {
            text: text.into(),
            provider_name: provider_name.to_string(),
            model: model.to_string(),
            usage: None,
            rate_limit: None,
        }
    }

    pub fn with_usage(mut self, usage: Option<TokenUsage>) -> Self {
        self.usage = usage;
        self
    }

    /// Render a rate-limit notice in the same shape as a normal answer
    pub fn rate_limited(provider_name: &str, rate_limit: RateLimitInfo) -> Self {
        Self {
            text: rate_limit.message.clone(),
            provider_name: provider_name.to_string(),
            model: String::new(),
            usage: None,
            rate_limit: Some(rate_limit),
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        self.rate_limit.is_some()
    }
}
