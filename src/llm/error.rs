use reqwest::StatusCode;
use thiserror::Error;

/// Classified failure of an upstream completion call.
///
/// Only [`UpstreamError::Transient`] is retried. The display strings are used
/// in logs; callers never see them verbatim.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamError {
    #[error("upstream quota exceeded")]
    QuotaExceeded,
    #[error("transient upstream failure: {0}")]
    Transient(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("request rejected by upstream: {0}")]
    Rejected(String),
    #[error("malformed upstream response: {0}")]
    Malformed(String),
}

impl UpstreamError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, UpstreamError::Transient(_))
    }

    pub fn class(&self) -> &'static str {
        match self {
            UpstreamError::QuotaExceeded => "quota_exceeded",
            UpstreamError::Transient(_) => "transient",
            UpstreamError::InvalidRequest(_) => "invalid_request",
            UpstreamError::Rejected(_) => "rejected",
            UpstreamError::Malformed(_) => "malformed",
        }
    }
}

fn mentions_quota(body: &str) -> bool {
    let lower = body.to_lowercase();
    lower.contains("insufficient_quota") || lower.contains("quota") || lower.contains("billing")
}

/// Map a non-success HTTP status and its body to an error class.
pub fn classify_status(status: StatusCode, body: &str) -> UpstreamError {
    let summary = format!("HTTP {}", status.as_u16());
    match status {
        StatusCode::TOO_MANY_REQUESTS if mentions_quota(body) => UpstreamError::QuotaExceeded,
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => {
            UpstreamError::Transient(summary)
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => UpstreamError::Rejected(summary),
        s if s.is_server_error() => UpstreamError::Transient(summary),
        _ => UpstreamError::InvalidRequest(summary),
    }
}

/// Classify a transport-level reqwest failure.
pub fn classify_transport(err: &reqwest::Error) -> UpstreamError {
    if let Some(status) = err.status() {
        return classify_status(status, "");
    }
    if err.is_decode() {
        return UpstreamError::Malformed(err.to_string());
    }
    if err.is_builder() {
        return UpstreamError::InvalidRequest(err.to_string());
    }
    UpstreamError::Transient(err.to_string())
}

/// Classify an error that only exposes a message, as SDK-style providers do.
pub fn classify_message(message: &str) -> UpstreamError {
    let lower = message.to_lowercase();
    if lower.contains("insufficient_quota") || lower.contains("resource_exhausted") {
        UpstreamError::QuotaExceeded
    } else if lower.contains("401") || lower.contains("403") || lower.contains("auth") {
        UpstreamError::Rejected("authentication failed".to_string())
    } else if lower.contains("400") || lower.contains("invalid") {
        UpstreamError::InvalidRequest("provider rejected the request".to_string())
    } else {
        UpstreamError::Transient("provider call failed".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_body_on_429_is_quota_exceeded() {
        let body = r#"{"error":{"code":"insufficient_quota","message":"You exceeded your current quota"}}"#;
        assert_eq!(classify_status(StatusCode::TOO_MANY_REQUESTS, body), UpstreamError::QuotaExceeded);
    }

    #[test]
    fn plain_429_and_5xx_are_retryable() {
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "slow down").is_retryable());
        assert!(classify_status(StatusCode::BAD_GATEWAY, "").is_retryable());
        assert!(classify_status(StatusCode::SERVICE_UNAVAILABLE, "").is_retryable());
    }

    #[test]
    fn client_errors_are_not_retried() {
        assert_eq!(
            classify_status(StatusCode::UNAUTHORIZED, "").class(),
            "rejected"
        );
        assert_eq!(
            classify_status(StatusCode::BAD_REQUEST, "").class(),
            "invalid_request"
        );
        assert!(!classify_status(StatusCode::UNPROCESSABLE_ENTITY, "").is_retryable());
    }

    #[test]
    fn sdk_messages_are_classified() {
        assert_eq!(classify_message("Error: insufficient_quota"), UpstreamError::QuotaExceeded);
        assert!(classify_message("connection reset by peer").is_retryable());
        assert!(!classify_message("HTTP 401 Unauthorized").is_retryable());
    }
}
