//! Hugging Face text-generation inference provider
//!
//! This backend takes a single prompt string rather than a message list, so
//! the conversation is flattened into role-prefixed turns.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{ProviderError, ProviderErrorKind};
use crate::registry::{ProviderDescriptor, ProviderFamily};
use crate::types::{CanonicalResponse, ChatMessage, ChatRole};

use super::classify;
use super::{ProviderAdapter, RawReply, send, text_or_placeholder};

#[derive(Debug, Clone)]
pub struct HuggingFaceAdapter {
    client: Client,
}

impl HuggingFaceAdapter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn endpoint(provider: &ProviderDescriptor, model: &str) -> String {
        format!("{}/models/{}", provider.endpoint_base(), model)
    }

    fn build_prompt(messages: &[ChatMessage]) -> String {
        let mut prompt = String::new();
        for m in messages {
            let label = match m.role {
                ChatRole::System => "System",
                ChatRole::User => "User",
                ChatRole::Assistant => "Assistant",
            };
            prompt.push_str(label);
            prompt.push_str(": ");
            prompt.push_str(m.content.trim());
            prompt.push_str("\n\n");
        }
        prompt.push_str("Assistant:");
        prompt
    }

    fn build_request(messages: &[ChatMessage], max_tokens: u32) -> HfRequest {
        HfRequest {
            inputs: Self::build_prompt(messages),
            parameters: HfParameters {
                max_new_tokens: max_tokens,
                return_full_text: false,
            },
        }
    }

    fn parse_success(provider: &str, model: &str, body: &str) -> CanonicalResponse {
        let text = match serde_json::from_str::<HfResponse>(body) {
            Ok(HfResponse::Many(items)) => items.into_iter().next().map(|g| g.generated_text),
            Ok(HfResponse::One(item)) => Some(item.generated_text),
            Err(e) => {
                debug!("{} success body did not parse: {}", provider, e);
                None
            }
        };
        CanonicalResponse::new(text_or_placeholder(provider, text), provider, model)
    }

    /// Classify a non-2xx reply. A model that is still loading reports 503
    /// with an `estimated_time`, which is a capacity problem.
    fn classify_error(provider: &str, reply: &RawReply) -> ProviderError {
        let detail = serde_json::from_str::<HfError>(&reply.body).ok();

        let message = detail
            .as_ref()
            .map(|d| match &d.error {
                Value::Null => String::new(),
                Value::String(s) => s.clone(),
                Value::Array(items) => items
                    .iter()
                    .filter_map(Value::as_str)
                    .collect::<Vec<_>>()
                    .join("; "),
                other => other.to_string(),
            })
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| reply.body.clone());

        let loading = message.to_lowercase().contains("currently loading")
            || detail.as_ref().is_some_and(|d| d.estimated_time.is_some());

        let kind = if loading {
            ProviderErrorKind::Overloaded
        } else {
            classify::kind_from_status(reply.status, &message)
        };

        classify::build_error(provider, kind, &reply.headers, None, &message)
    }
}

#[async_trait]
impl ProviderAdapter for HuggingFaceAdapter {
    fn family(&self) -> ProviderFamily {
        ProviderFamily::HuggingFace
    }

    async fn call(
        &self,
        provider: &ProviderDescriptor,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<CanonicalResponse, ProviderError> {
        let body = Self::build_request(messages, provider.max_tokens());

        debug!(
            "{} request: model={}, prompt_chars={}",
            provider.name(),
            model,
            body.inputs.len()
        );

        let request = self
            .client
            .post(Self::endpoint(provider, model))
            .bearer_auth(provider.credential())
            .json(&body);

        let reply = send(provider.name(), request).await?;
        if !reply.status.is_success() {
            return Err(Self::classify_error(provider.name(), &reply));
        }

        Ok(Self::parse_success(provider.name(), model, &reply.body))
    }
}

// ── Hugging Face wire types ──

#[derive(Debug, Clone, Serialize)]
struct HfRequest {
    inputs: String,
    parameters: HfParameters,
}

#[derive(Debug, Clone, Serialize)]
struct HfParameters {
    max_new_tokens: u32,
    return_full_text: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum HfResponse {
    Many(Vec<HfGeneration>),
    One(HfGeneration),
}

#[derive(Debug, Clone, Deserialize)]
struct HfGeneration {
    generated_text: String,
}

#[derive(Debug, Clone, Deserialize)]
struct HfError {
    #[serde(default)]
    error: Value,
    estimated_time: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::PLACEHOLDER_TEXT;
    use reqwest::StatusCode;
    use reqwest::header::HeaderMap;

    fn reply(status: u16, body: &str) -> RawReply {
        RawReply {
            status: StatusCode::from_u16(status).unwrap(),
            headers: HeaderMap::new(),
            body: body.to_string(),
        }
    }

    #[test]
    fn test_build_prompt() {
        let prompt = HuggingFaceAdapter::build_prompt(&[
            ChatMessage::system("Be kind."),
            ChatMessage::user(" hello "),
        ]);
        assert_eq!(prompt, "System: Be kind.\n\nUser: hello\n\nAssistant:");
    }

    #[test]
    fn test_build_request_parameters() {
        let json = serde_json::to_value(HuggingFaceAdapter::build_request(
            &[ChatMessage::user("hi")],
            200,
        ))
        .unwrap();
        assert_eq!(json["parameters"]["max_new_tokens"], 200);
        assert_eq!(json["parameters"]["return_full_text"], false);
    }

    #[test]
    fn test_parse_success_array() {
        let resp = HuggingFaceAdapter::parse_success(
            "huggingface",
            "mistral",
            r#"[{"generated_text": " Sure thing."}]"#,
        );
        assert_eq!(resp.text, "Sure thing.");
        assert!(resp.usage.is_none());
    }

    #[test]
    fn test_parse_success_object_and_garbage() {
        let resp =
            HuggingFaceAdapter::parse_success("hf", "m", r#"{"generated_text": "ok"}"#);
        assert_eq!(resp.text, "ok");
        let resp = HuggingFaceAdapter::parse_success("hf", "m", "[]");
        assert_eq!(resp.text, PLACEHOLDER_TEXT);
        let resp = HuggingFaceAdapter::parse_success("hf", "m", r#"{"foo": 1}"#);
        assert_eq!(resp.text, PLACEHOLDER_TEXT);
    }

    #[test]
    fn test_classify_model_loading() {
        let err = HuggingFaceAdapter::classify_error(
            "huggingface",
            &reply(
                503,
                r#"{"error": "Model mistralai/Mistral-7B is currently loading", "estimated_time": 20.0}"#,
            ),
        );
        assert_eq!(err.kind, ProviderErrorKind::Overloaded);
        assert!(err.rate_limit.is_none());
    }

    #[test]
    fn test_classify_rate_limit_text() {
        let err = HuggingFaceAdapter::classify_error(
            "huggingface",
            &reply(429, r#"{"error": "Rate limit reached, retry after 12.5 seconds"}"#),
        );
        assert_eq!(err.kind, ProviderErrorKind::RateLimited);
        assert_eq!(err.rate_limit.unwrap().retry_after_seconds, Some(12.5));
    }

    #[test]
    fn test_classify_auth() {
        let err = HuggingFaceAdapter::classify_error(
            "huggingface",
            &reply(401, r#"{"error": "Invalid credentials in Authorization header"}"#),
        );
        assert_eq!(err.kind, ProviderErrorKind::AuthFailure);
    }
}
