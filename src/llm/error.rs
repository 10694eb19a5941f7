//! Failures of the chat endpoint and of tool execution.

/// Why a model call or a tool call did not produce a result.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// Endpoint or model missing, or the HTTP client could not be built.
    #[error("model not configured: {0}")]
    Unconfigured(String),

    /// 401 or 403 from the chat endpoint.
    #[error("credentials rejected (HTTP {status}): {message}")]
    Unauthorized { status: u16, message: String },

    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Any other non-2xx response.
    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// The request never got a response.
    #[error("request failed: {0}")]
    Transport(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    /// The event stream broke off or carried an error payload.
    #[error("stream failed: {0}")]
    Stream(String),

    /// A tool rejected its arguments or failed to run.
    #[error("tool failed: {0}")]
    Tool(String),
}

impl LlmError {
    /// Classify a non-2xx chat completions response.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = error_message(body);
        match status {
            401 | 403 => Self::Unauthorized { status, message },
            429 => Self::RateLimited(message),
            _ => Self::Status { status, message },
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

/// `error.message` from an OpenAI error envelope, else the trimmed body.
pub(crate) fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.pointer("/error/message")?.as_str().map(String::from))
        .unwrap_or_else(|| body.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_statuses_are_unauthorized() {
        let err = LlmError::from_status(401, r#"{"error":{"message":"bad key","type":"auth"}}"#);
        assert!(matches!(
            err,
            LlmError::Unauthorized { status: 401, ref message } if message == "bad key"
        ));
        assert!(matches!(
            LlmError::from_status(403, "forbidden"),
            LlmError::Unauthorized { status: 403, .. }
        ));
    }

    #[test]
    fn other_statuses_keep_the_plain_body() {
        let limited = LlmError::from_status(429, "slow down\n");
        assert_eq!(limited.to_string(), "rate limited: slow down");

        let upstream = LlmError::from_status(502, "bad gateway");
        assert_eq!(upstream.to_string(), "HTTP 502: bad gateway");
    }
}
