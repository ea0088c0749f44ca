//! Provider adapters
//!
//! One adapter per wire-format family. Each adapter performs exactly one HTTP
//! call, translates the canonical request into the backend's format, and maps
//! the reply (or failure) back onto [`CanonicalResponse`] / [`ProviderError`].
//! Retry and failover policy lives in the router, never here.

pub mod classify;
pub mod google;
pub mod huggingface;
pub mod openai;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Client, RequestBuilder, StatusCode};
use tracing::debug;

use crate::error::ProviderError;
use crate::registry::{ProviderDescriptor, ProviderFamily};
use crate::types::{CanonicalResponse, ChatMessage};

pub use google::GoogleAdapter;
pub use huggingface::HuggingFaceAdapter;
pub use openai::OpenAiAdapter;

/// Text returned when a provider answers 2xx with a body we can't read
pub const PLACEHOLDER_TEXT: &str =
    "I'm sorry, I couldn't put together a response just now. Please try again.";

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Trait that every backend family implements
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Wire-format family this adapter speaks
    fn family(&self) -> ProviderFamily;

    /// Send one chat request to `provider` using backend model `model`
    async fn call(
        &self,
        provider: &ProviderDescriptor,
        model: &str,
        messages: &[ChatMessage],
    ) -> Result<CanonicalResponse, ProviderError>;
}

/// Shared HTTP client with an upper bound on every call
pub fn build_http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to build HTTP client")
}

/// Construct the adapter for a family
pub fn adapter_for(family: ProviderFamily, client: Client) -> Arc<dyn ProviderAdapter> {
    match family {
        ProviderFamily::OpenAi => Arc::new(OpenAiAdapter::new(client)),
        ProviderFamily::Google => Arc::new(GoogleAdapter::new(client)),
        ProviderFamily::HuggingFace => Arc::new(HuggingFaceAdapter::new(client)),
    }
}

/// Raw reply from a backend before family-specific interpretation
pub(crate) struct RawReply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

/// Send a prepared request and collect status, headers and body text
pub(crate) async fn send(
    provider: &str,
    request: RequestBuilder,
) -> Result<RawReply, ProviderError> {
    let response = request
        .send()
        .await
        .map_err(|e| ProviderError::from_transport(provider, &e))?;

    let status = response.status();
    let headers = response.headers().clone();
    let body = response
        .text()
        .await
        .map_err(|e| ProviderError::from_transport(provider, &e))?;

    debug!(
        "{} replied with status {} ({} bytes)",
        provider,
        status,
        body.len()
    );

    Ok(RawReply {
        status,
        headers,
        body,
    })
}

/// Use the extracted text, or the placeholder when there was nothing usable
pub(crate) fn text_or_placeholder(provider: &str, text: Option<String>) -> String {
    match text.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()) {
        Some(text) => text,
        None => {
            tracing::warn!(
                "{} returned a success body without usable text, using placeholder",
                provider
            );
            PLACEHOLDER_TEXT.to_string()
        }
    }
}
