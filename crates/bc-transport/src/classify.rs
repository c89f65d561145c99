//! Failure classification
//!
//! A single attempt fails with an [`AttemptFailure`]. Once the retry budget
//! is spent, [`classify`] turns the last failure into the error the caller
//! sees: 429 becomes `RateLimit`, client timeouts become `Timeout`, and
//! everything else is `Transport` with whatever the server sent back.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::RETRY_AFTER;
use serde_json::Value;

use crate::error::Error;

/// Why one attempt did not produce a 2xx response.
#[derive(Debug)]
pub enum AttemptFailure {
    Status {
        status: StatusCode,
        retry_after: Option<String>,
        body: String,
    },
    Timeout,
    Connection(String),
}

impl AttemptFailure {
    /// Capture status, `Retry-After` and body from a non-success response.
    pub async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.unwrap_or_default();
        AttemptFailure::Status {
            status,
            retry_after,
            body,
        }
    }

    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            AttemptFailure::Timeout
        } else {
            AttemptFailure::Connection(err.to_string())
        }
    }

    /// Short label for logs.
    pub fn label(&self) -> String {
        match self {
            AttemptFailure::Status { status, .. } => status.as_u16().to_string(),
            AttemptFailure::Timeout => "timeout".into(),
            AttemptFailure::Connection(_) => "connection".into(),
        }
    }
}

/// Parse an error body: JSON when possible, raw text otherwise, nothing if empty.
pub fn parse_error_body(body: &str) -> Option<Value> {
    if body.trim().is_empty() {
        return None;
    }
    Some(serde_json::from_str(body).unwrap_or_else(|_| Value::String(body.to_string())))
}

/// OData error message (`{"error": {"message": ...}}`), if the body has one.
fn odata_message(data: &Value) -> Option<&str> {
    data.get("error")?.get("message")?.as_str()
}

/// Final error for a request whose retries are exhausted.
pub fn classify(failure: AttemptFailure, timeout: Duration) -> Error {
    match failure {
        AttemptFailure::Status {
            status,
            retry_after,
            ..
        } if status == StatusCode::TOO_MANY_REQUESTS => Error::RateLimit {
            message: "Rate limit exceeded".into(),
            retry_after,
        },
        AttemptFailure::Status { status, body, .. } => {
            let data = parse_error_body(&body);
            let message = match data.as_ref().and_then(odata_message) {
                Some(detail) => format!("upstream returned {status}: {detail}"),
                None => format!("upstream returned {status}"),
            };
            Error::Transport {
                message,
                status: Some(status.as_u16()),
                data,
            }
        }
        AttemptFailure::Timeout => Error::Timeout {
            message: "Request timed out".into(),
            limit: timeout,
        },
        AttemptFailure::Connection(message) => Error::Transport {
            message,
            status: None,
            data: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn status(code: u16, retry_after: Option<&str>, body: &str) -> AttemptFailure {
        AttemptFailure::Status {
            status: StatusCode::from_u16(code).unwrap(),
            retry_after: retry_after.map(str::to_string),
            body: body.into(),
        }
    }

    #[test]
    fn too_many_requests_is_rate_limit() {
        let err = classify(status(429, Some("120"), ""), Duration::from_secs(30));
        match err {
            Error::RateLimit { retry_after, .. } => assert_eq!(retry_after.as_deref(), Some("120")),
            other => panic!("expected RateLimit, got {other:?}"),
        }
    }

    #[test]
    fn rate_limit_without_header() {
        let err = classify(status(429, None, "slow down"), Duration::from_secs(30));
        assert!(matches!(err, Error::RateLimit { retry_after: None, .. }));
    }

    #[test]
    fn odata_error_message_is_surfaced() {
        let body = r#"{"error":{"code":"BadRequest_NotFound","message":"The resource was not found."}}"#;
        let err = classify(status(404, None, body), Duration::from_secs(30));
        match err {
            Error::Transport {
                message,
                status,
                data,
            } => {
                assert_eq!(status, Some(404));
                assert!(message.ends_with("The resource was not found."));
                assert_eq!(data.unwrap()["error"]["code"], json!("BadRequest_NotFound"));
            }
            other => panic!("expected Transport, got {other:?}"),
        }
    }

    #[test]
    fn plain_text_body_kept_as_string() {
        let err = classify(status(502, None, "Bad Gateway"), Duration::from_secs(30));
        match err {
            Error::Transport { data, .. } => assert_eq!(data, Some(json!("Bad Gateway"))),
            other => panic!("expected Transport, got {other:?}"),
        }
    }

    #[test]
    fn timeout_carries_limit() {
        let err = classify(AttemptFailure::Timeout, Duration::from_secs(5));
        assert!(matches!(err, Error::Timeout { limit, .. } if limit == Duration::from_secs(5)));
    }

    #[test]
    fn connection_failure_has_no_status() {
        let err = classify(
            AttemptFailure::Connection("connection refused".into()),
            Duration::from_secs(5),
        );
        assert!(matches!(err, Error::Transport { status: None, data: None, .. }));
    }

    #[test]
    fn empty_body_has_no_data() {
        assert_eq!(parse_error_body("  "), None);
    }
}
