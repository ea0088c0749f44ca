//! Google Gemini provider

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{ProviderError, ProviderErrorKind};
use crate::registry::{ProviderDescriptor, ProviderFamily};
use crate::types::{CanonicalResponse, ChatMessage, ChatRole, TokenUsage};

use super::classify;
use super::{ProviderAdapter, RawReply, send, text_or_placeholder};

const RETRY_INFO_TYPE: &str = "type.googleapis.com/google.rpc.RetryInfo";

/// Google Gemini provider
#[derive(Debug, Clone)]
pub struct GoogleAdapter {
    client: Client,
}

impl GoogleAdapter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn endpoint(provider: &ProviderDescriptor, model: &str) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            provider.endpoint_base(),
            model
        )
    }

    /// Convert provider-agnostic messages to Gemini wire format.
    ///
    /// System messages are lifted into `systemInstruction`; assistant turns
    /// use the `model` role.
    fn build_request(messages: &[ChatMessage], max_tokens: u32) -> GeminiRequest {
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == ChatRole::System)
            .map(|m| m.content.as_str())
            .collect();

        let contents = messages
            .iter()
            .filter(|m| m.role != ChatRole::System)
            .map(|m| GeminiContent {
                role: match m.role {
                    ChatRole::Assistant => "model".to_string(),
                    _ => "user".to_string(),
                },
                parts: vec![GeminiPart {
                    text: Some(m.content.clone()),
                }],
            })
            .collect();

        GeminiRequest {
            contents,
            system_instruction: (!system.is_empty()).then(|| GeminiSystemInstruction {
                parts: vec![GeminiPart {
                    text: Some(system.join("\n\n")),
                }],
            }),
            generation_config: GeminiGenerationConfig {
                max_output_tokens: max_tokens,
            },
        }
    }

    /// Convert Gemini response to provider-agnostic format
    fn parse_success(provider: &str, model: &str, body: &str) -> CanonicalResponse {
        let parsed: Option<GeminiApiResponse> = serde_json::from_str(body)
            .inspect_err(|e| debug!("{} success body did not parse: {}", provider, e))
            .ok();

        let (text, usage) = match parsed {
            Some(resp) => {
                let text = resp
                    .candidates
                    .into_iter()
                    .next()
                    .and_then(|c| c.content)
                    .map(|content| {
                        content
                            .parts
                            .into_iter()
                            .filter_map(|p| p.text)
                            .collect::<Vec<_>>()
                            .join("")
                    });
                let usage = resp.usage_metadata.map(|u| {
                    TokenUsage::new(
                        u.prompt_token_count.unwrap_or(0),
                        u.candidates_token_count.unwrap_or(0),
                        u.total_token_count,
                    )
                });
                (text, usage)
            }
            None => (None, None),
        };

        CanonicalResponse::new(text_or_placeholder(provider, text), provider, model)
            .with_usage(usage)
    }

    /// Classify a non-2xx reply using Gemini's `error.status` and `RetryInfo`
    fn classify_error(provider: &str, reply: &RawReply) -> ProviderError {
        let detail = serde_json::from_str::<GeminiErrorEnvelope>(&reply.body)
            .ok()
            .map(|e| e.error);

        let message = detail
            .as_ref()
            .map(|d| d.message.clone())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| reply.body.clone());

        let status = detail
            .as_ref()
            .and_then(|d| d.status.as_deref())
            .unwrap_or_default();

        let kind = match status {
            "RESOURCE_EXHAUSTED" => ProviderErrorKind::RateLimited,
            "UNAVAILABLE" => ProviderErrorKind::Overloaded,
            "UNAUTHENTICATED" | "PERMISSION_DENIED" => ProviderErrorKind::AuthFailure,
            "DEADLINE_EXCEEDED" => ProviderErrorKind::Timeout,
            // Gemini rejects bad keys with 400 INVALID_ARGUMENT
            _ if message.to_lowercase().contains("api key not valid") => {
                ProviderErrorKind::AuthFailure
            }
            _ => classify::kind_from_status(reply.status, &message),
        };

        let retry_delay = detail.as_ref().and_then(|d| {
            d.details
                .iter()
                .filter(|v| v.get("@type").and_then(Value::as_str) == Some(RETRY_INFO_TYPE))
                .find_map(|v| v.get("retryDelay").and_then(Value::as_str))
                .and_then(classify::parse_duration_field)
        });

        classify::build_error(provider, kind, &reply.headers, retry_delay, &message)
    }
}

#[async_trait]
impl ProviderAdapter for GoogleAdapter {
    fn family(&self) -> ProviderFamily {
        ProviderFamily::Google
    }

    async fn call(
        &self,
        provider: &ProviderDescriptor,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<CanonicalResponse, ProviderError> {
        let body = Self::build_request(messages, provider.max_tokens());

        debug!(
            "{} request: model={}, contents={}",
            provider.name(),
            model,
            body.contents.len()
        );

        let request = self
            .client
            .post(Self::endpoint(provider, model))
            .header("x-goog-api-key", provider.credential())
            .json(&body);

        let reply = send(provider.name(), request).await?;
        if !reply.status.is_success() {
            return Err(Self::classify_error(provider.name(), &reply));
        }

        Ok(Self::parse_success(provider.name(), model, &reply.body))
    }
}

// ── Gemini wire types ──

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiSystemInstruction>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    role: String,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct GeminiSystemInstruction {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    max_output_tokens: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiApiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    usage_metadata: Option<GeminiUsageMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsageMetadata {
    prompt_token_count: Option<u32>,
    candidates_token_count: Option<u32>,
    total_token_count: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiErrorEnvelope {
    error: GeminiErrorDetail,
}

#[derive(Debug, Clone, Deserialize)]
struct GeminiErrorDetail {
    #[serde(default)]
    message: String,
    status: Option<String>,
    #[serde(default)]
    details: Vec<Value>,
}
