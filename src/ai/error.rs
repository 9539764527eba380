//! Typed error taxonomy for AI provider calls.
//!
//! Every provider failure is classified into a kind that the job layer can
//! interpret: only `RateLimit` and `ServerError` are worth retrying, and a
//! rate-limited call may carry a provider-supplied retry-after hint. The
//! gateway never retries on its own.

use std::time::Duration;

use thiserror::Error;

/// Classification of an AI call failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiErrorKind {
    /// Provider not usable: missing key, disabled feature.
    Configuration,
    /// 429 with a quota that will refill; retry after backoff.
    RateLimit,
    /// Billing-level quota exhaustion; retrying cannot help.
    InsufficientQuota,
    /// Prompt too large for the model's context window.
    ContextTooLong,
    /// Malformed request; retrying the same call cannot help.
    InvalidRequest,
    /// Upstream 5xx; transient by assumption.
    ServerError,
    /// Invalid or revoked credentials.
    Unauthorized,
    /// Denied by the budget governor before any network call.
    BudgetExceeded,
    /// Anything that did not classify.
    Unknown,
}

impl AiErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::RateLimit => "rate_limit",
            Self::InsufficientQuota => "insufficient_quota",
            Self::ContextTooLong => "context_too_long",
            Self::InvalidRequest => "invalid_request",
            Self::ServerError => "server_error",
            Self::Unauthorized => "unauthorized",
            Self::BudgetExceeded => "budget_exceeded",
            Self::Unknown => "unknown",
        }
    }
}

/// A classified AI provider error.
#[derive(Debug, Clone, Error)]
#[error("{} error: {message}", kind.as_str())]
pub struct AiError {
    pub kind: AiErrorKind,
    pub message: String,
    /// Provider-supplied hint for rate-limited calls.
    pub retry_after: Option<Duration>,
}

impl AiError {
    pub fn new(kind: AiErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(AiErrorKind::Configuration, message)
    }

    pub fn budget_exceeded(message: impl Into<String>) -> Self {
        Self::new(AiErrorKind::BudgetExceeded, message)
    }

    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }

    /// Whether the job layer should schedule another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, AiErrorKind::RateLimit | AiErrorKind::ServerError)
    }
}

/// Map an HTTP response from a provider into an error kind.
///
/// The body is inspected for the provider's machine-readable markers where
/// the status alone is ambiguous (quota vs rate limit, context vs plain
/// bad request).
pub fn classify_http_status(status: u16, body: &str) -> AiErrorKind {
    match status {
        401 | 403 => AiErrorKind::Unauthorized,
        429 => {
            if body.contains("insufficient_quota") {
                AiErrorKind::InsufficientQuota
            } else {
                AiErrorKind::RateLimit
            }
        }
        400 => {
            if body.contains("context_length_exceeded") || body.contains("maximum context length") {
                AiErrorKind::ContextTooLong
            } else {
                AiErrorKind::InvalidRequest
            }
        }
        500..=599 => AiErrorKind::ServerError,
        _ => AiErrorKind::Unknown,
    }
}

/// Parse a `Retry-After` header value (whole seconds form).
pub(crate) fn parse_retry_after(value: Option<&str>) -> Option<Duration> {
    value
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_rate_limit_and_server_error_are_retryable() {
        assert!(AiError::new(AiErrorKind::RateLimit, "slow down").is_retryable());
        assert!(AiError::new(AiErrorKind::ServerError, "boom").is_retryable());
        for kind in [
            AiErrorKind::Configuration,
            AiErrorKind::InsufficientQuota,
            AiErrorKind::ContextTooLong,
            AiErrorKind::InvalidRequest,
            AiErrorKind::Unauthorized,
            AiErrorKind::BudgetExceeded,
            AiErrorKind::Unknown,
        ] {
            assert!(!AiError::new(kind, "nope").is_retryable(), "{kind:?}");
        }
    }

    #[test]
    fn classifies_status_codes() {
        assert_eq!(classify_http_status(401, ""), AiErrorKind::Unauthorized);
        assert_eq!(classify_http_status(429, ""), AiErrorKind::RateLimit);
        assert_eq!(
            classify_http_status(429, r#"{"error":{"code":"insufficient_quota"}}"#),
            AiErrorKind::InsufficientQuota
        );
        assert_eq!(
            classify_http_status(400, "maximum context length exceeded"),
            AiErrorKind::ContextTooLong
        );
        assert_eq!(classify_http_status(400, "bad"), AiErrorKind::InvalidRequest);
        assert_eq!(classify_http_status(503, ""), AiErrorKind::ServerError);
        assert_eq!(classify_http_status(302, ""), AiErrorKind::Unknown);
    }

    #[test]
    fn parses_retry_after_seconds() {
        assert_eq!(parse_retry_after(Some("30")), Some(Duration::from_secs(30)));
        assert_eq!(parse_retry_after(Some("not-a-number")), None);
        assert_eq!(parse_retry_after(None), None);
    }
}
