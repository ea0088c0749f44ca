//! Canonical error taxonomy shared by every provider adapter and the router

use thiserror::Error;

use crate::types::RateLimitInfo;

/// Provider-independent failure classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderErrorKind {
    /// Credential rejected
    AuthFailure,
    /// 4xx other than auth or rate limit
    MalformedRequest,
    /// Backend out of capacity (503, "overloaded", "UNAVAILABLE")
    Overloaded,
    /// Quota or request rate exhausted
    RateLimited,
    /// No response in time, or the connection failed
    Timeout,
    /// Anything else
    UnknownFailure,
}

impl ProviderErrorKind {
    /// Whether this failure is expected to clear up on its own
    pub fn is_transient(self) -> bool {
        !matches!(self, Self::AuthFailure | Self::MalformedRequest)
    }
}

impl std::fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AuthFailure => write!(f, "auth_failure"),
            Self::MalformedRequest => write!(f, "malformed_request"),
            Self::Overloaded => write!(f, "overloaded"),
            Self::RateLimited => write!(f, "rate_limited"),
            Self::Timeout => write!(f, "timeout"),
            Self::UnknownFailure => write!(f, "unknown_failure"),
        }
    }
}

/// Error returned by a single adapter call
#[derive(Debug, Clone, Error)]
#[error("{provider} failed ({kind}): {message}")]
pub struct ProviderError {
    pub provider: String,
    pub kind: ProviderErrorKind,
    /// Raw provider text. For logs only, never shown to end users.
    pub message: String,
    pub rate_limit: Option<RateLimitInfo>,
}

impl ProviderError {
    pub fn new(provider: &str, kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        let rate_limit = match kind {
            ProviderErrorKind::RateLimited => Some(RateLimitInfo::new(None)),
            _ => None,
        };
        Self {
            provider: provider.to_string(),
            kind,
            message: message.into(),
            rate_limit,
        }
    }

    pub fn rate_limited(provider: &str, info: RateLimitInfo, message: impl Into<String>) -> Self {
        Self {
            provider: provider.to_string(),
            kind: ProviderErrorKind::RateLimited,
            message: message.into(),
            rate_limit: Some(info),
        }
    }

    pub fn timeout(provider: &str, message: impl Into<String>) -> Self {
        Self::new(provider, ProviderErrorKind::Timeout, message)
    }

    /// Map a transport error from reqwest onto the canonical kinds
    pub fn from_transport(provider: &str, err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() || err.is_connect() {
            ProviderErrorKind::Timeout
        } else {
            ProviderErrorKind::UnknownFailure
        };
        Self::new(provider, kind, err.to_string())
    }

    pub fn carries_rate_limit(&self) -> bool {
        self.rate_limit.is_some()
    }
}

/// Terminal outcome of a routed request
#[derive(Debug, Clone, Error)]
pub enum RouterError {
    #[error("{provider} is rate limited: {}", rate_limit.message)]
    RateLimited {
        provider: String,
        rate_limit: RateLimitInfo,
    },

    #[error("All providers are currently unavailable")]
    AllProvidersUnavailable,

    #[error("All providers failed after {attempts} attempt(s)")]
    AllProvidersFailed { attempts: usize },

    #[error("Request was cancelled")]
    Cancelled,
}

impl RouterError {
    /// Retry delay hint, if the router gave up because of a rate limit
    pub fn retry_after_seconds(&self) -> Option<f64> {
        match self {
            Self::RateLimited { rate_limit, .. } => rate_limit.retry_after_seconds,
            _ => None,
        }
    }

    /// Text that can be shown to an end user
    pub fn user_message(&self) -> String {
        match self {
            Self::RateLimited { rate_limit, .. } => rate_limit.message.clone(),
            Self::AllProvidersUnavailable => {
                "The assistant is temporarily unavailable. Please try again in a moment."
                    .to_string()
            }
            Self::AllProvidersFailed { .. } => {
                "The assistant couldn't respond right now. Please try again.".to_string()
            }
            Self::Cancelled => "Request cancelled.".to_string(),
        }
    }
}
