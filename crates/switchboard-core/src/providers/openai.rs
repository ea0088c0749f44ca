//! OpenAI-style chat completions (OpenAI, Groq, OpenRouter, and compatible endpoints)

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{ProviderError, ProviderErrorKind};
use crate::registry::{ProviderDescriptor, ProviderFamily};
use crate::types::{CanonicalResponse, ChatMessage, TokenUsage};

use super::classify;
use super::{ProviderAdapter, RawReply, send, text_or_placeholder};

/// Adapter for any endpoint speaking the OpenAI chat completions format
#[derive(Debug, Clone)]
pub struct OpenAiAdapter {
    client: Client,
}

impl OpenAiAdapter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn endpoint(provider: &ProviderDescriptor) -> String {
        format!("{}/v1/chat/completions", provider.endpoint_base())
    }

    /// Convert provider-agnostic messages to OpenAI wire format
    fn build_request(messages: &[ChatMessage], model: &str, max_tokens: u32) -> OpenAiRequest {
        OpenAiRequest {
            model: model.to_string(),
            max_tokens,
            messages: messages
                .iter()
                .map(|m| OpenAiMessage {
                    role: m.role.to_string(),
                    content: m.content.clone(),
                })
                .collect(),
        }
    }

    /// Convert a 2xx body to the canonical response
    fn parse_success(provider: &str, model: &str, body: &str) -> CanonicalResponse {
        let parsed: Option<OpenAiApiResponse> = serde_json::from_str(body)
            .inspect_err(|e| debug!("{} success body did not parse: {}", provider, e))
            .ok();

        let (text, usage) = match parsed {
            Some(resp) => {
                let text = resp
                    .choices
                    .into_iter()
                    .next()
                    .and_then(|c| c.message.content);
                let usage = resp.usage.map(|u| {
                    TokenUsage::new(u.prompt_tokens, u.completion_tokens, u.total_tokens)
                });
                (text, usage)
            }
            None => (None, None),
        };

        CanonicalResponse::new(text_or_placeholder(provider, text), provider, model)
            .with_usage(usage)
    }

    /// Classify a non-2xx reply
    fn classify_error(provider: &str, reply: &RawReply) -> ProviderError {
        let detail = serde_json::from_str::<OpenAiErrorEnvelope>(&reply.body)
            .ok()
            .map(|e| e.error);

        let message = detail
            .as_ref()
            .map(|d| d.message.clone())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| reply.body.clone());

        let code = detail
            .as_ref()
            .and_then(|d| d.code.as_ref().and_then(Value::as_str).or(d.r#type.as_deref()))
            .unwrap_or_default();

        let kind = match code {
            "rate_limit_exceeded" | "insufficient_quota" | "tokens" | "requests" => {
                ProviderErrorKind::RateLimited
            }
            "invalid_api_key" | "authentication_error" => ProviderErrorKind::AuthFailure,
            _ => classify::kind_from_status(reply.status, &message),
        };

        classify::build_error(provider, kind, &reply.headers, None, &message)
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn family(&self) -> ProviderFamily {
        ProviderFamily::OpenAi
    }

    async fn call(
        &self,
        provider: &ProviderDescriptor,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<CanonicalResponse, ProviderError> {
        let body = Self::build_request(messages, model, provider.max_tokens());

        debug!(
            "{} request: model={}, messages={}",
            provider.name(),
            model,
            body.messages.len()
        );

        let request = self
            .client
            .post(Self::endpoint(provider))
            .bearer_auth(provider.credential())
            .json(&body);

        let reply = send(provider.name(), request).await?;
        if !reply.status.is_success() {
            return Err(Self::classify_error(provider.name(), &reply));
        }

        Ok(Self::parse_success(provider.name(), model, &reply.body))
    }
}

// ── OpenAI wire types ──

#[derive(Debug, Clone, Serialize)]
struct OpenAiRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<OpenAiMessage>,
}

#[derive(Debug, Clone, Serialize)]
struct OpenAiMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiApiResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiChoice {
    message: OpenAiChoiceMessage,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiErrorEnvelope {
    error: OpenAiErrorDetail,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiErrorDetail {
    #[serde(default)]
    message: String,
    r#type: Option<String>,
    code: Option<Value>,
}
