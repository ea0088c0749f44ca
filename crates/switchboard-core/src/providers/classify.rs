//! Shared helpers for turning failed HTTP replies into canonical errors
//!
//! Adapters call these after applying their own provider-specific checks.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};

use crate::error::{ProviderError, ProviderErrorKind};
use crate::types::RateLimitInfo;

/// "12.5 seconds", "7.66s", "450ms", and compound forms such as "1m2.5s" or
/// "1h3m10s". A bare minute or hour count without seconds does not match.
static DURATION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?i)(?:(\d+)\s*h(?:ours?)?\s*)?",
        r"(?:(\d+)\s*m(?:in(?:ute)?s?)?\s*)?",
        r"(\d+(?:\.\d+)?)\s*(ms|seconds?|secs?|s)\b",
    ))
    .expect("valid duration pattern")
});

/// Map an HTTP status (and, failing that, the body text) onto a kind
pub fn kind_from_status(status: StatusCode, body: &str) -> ProviderErrorKind {
    match status.as_u16() {
        401 | 403 => ProviderErrorKind::AuthFailure,
        429 => ProviderErrorKind::RateLimited,
        408 | 504 => ProviderErrorKind::Timeout,
        503 | 529 => ProviderErrorKind::Overloaded,
        400..=499 => kind_from_text(body).unwrap_or(ProviderErrorKind::MalformedRequest),
        _ => kind_from_text(body).unwrap_or(ProviderErrorKind::UnknownFailure),
    }
}

/// Substring heuristics for providers that report capacity problems in text
pub fn kind_from_text(text: &str) -> Option<ProviderErrorKind> {
    let lower = text.to_lowercase();
    if ["rate limit", "rate_limit", "too many requests", "quota"]
        .iter()
        .any(|p| lower.contains(p))
    {
        return Some(ProviderErrorKind::RateLimited);
    }
    if ["overloaded", "temporarily unavailable", "service unavailable"]
        .iter()
        .any(|p| lower.contains(p))
    {
        return Some(ProviderErrorKind::Overloaded);
    }
    None
}

/// Parse a `Retry-After` header, either delta-seconds or an HTTP date
pub fn retry_after_header(headers: &HeaderMap, now: DateTime<Utc>) -> Option<f64> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = value.parse::<f64>() {
        return (secs.is_finite() && secs >= 0.0).then_some(secs);
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?;
    let millis = (at.with_timezone(&Utc) - now).num_milliseconds().max(0);
    Some(millis as f64 / 1000.0)
}

/// Find a decimal "N seconds" duration in free text
pub fn seconds_from_text(text: &str) -> Option<f64> {
    let caps = DURATION_PATTERN.captures(text)?;
    let whole = |i: usize| {
        caps.get(i)
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .unwrap_or(0.0)
    };
    let value: f64 = caps.get(3)?.as_str().parse().ok()?;
    let seconds = match caps.get(4) {
        Some(unit) if unit.as_str().eq_ignore_ascii_case("ms") => value / 1000.0,
        _ => value,
    };
    Some(whole(1) * 3600.0 + whole(2) * 60.0 + seconds)
}

/// Parse a protobuf-style duration string such as `"12s"` or `"1.5s"`
pub fn parse_duration_field(value: &str) -> Option<f64> {
    value
        .trim()
        .strip_suffix('s')
        .and_then(|n| n.parse::<f64>().ok())
        .filter(|n| n.is_finite() && *n >= 0.0)
}

/// Build the error for a non-2xx reply.
///
/// For rate limits the retry delay is taken from, in order: the
/// `Retry-After` header, the provider's structured hint, the message text.
pub fn build_error(
    provider: &str,
    kind: ProviderErrorKind,
    headers: &HeaderMap,
    structured_retry: Option<f64>,
    message: &str,
) -> ProviderError {
    if kind != ProviderErrorKind::RateLimited {
        return ProviderError::new(provider, kind, message);
    }
    let retry_after = retry_after_header(headers, Utc::now())
        .or(structured_retry)
        .or_else(|| seconds_from_text(message));
    ProviderError::rate_limited(provider, RateLimitInfo::new(retry_after), message)
}
