use serde_json::Value;
use thiserror::Error;

/// Failure of a single gateway request.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("invalid request url: {0}")]
    InvalidUrl(String),

    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

impl GatewayError {
    pub fn status(&self) -> Option<u16> {
        match self {
            GatewayError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Human readable message handed to `on_error`.
    ///
    /// Prefers the server-provided message when the body is a JSON object
    /// carrying `message` or `error`; anything else falls back to the error's
    /// own display text.
    pub fn message(&self) -> String {
        self.server_message().unwrap_or_else(|| self.to_string())
    }

    pub fn server_message(&self) -> Option<String> {
        let GatewayError::Status { body, .. } = self else {
            return None;
        };
        let parsed = serde_json::from_str::<Value>(body).ok()?;
        ["message", "error"]
            .iter()
            .filter_map(|key| parsed.get(*key))
            .filter_map(|value| value.as_str())
            .map(|text| text.trim().to_string())
            .find(|text| !text.is_empty())
    }

    /// Transient failures are the ones the next poll tick is expected to fix.
    pub fn is_transient(&self) -> bool {
        match self {
            GatewayError::Timeout | GatewayError::Network(_) => true,
            GatewayError::Status { status, .. } => *status >= 500,
            GatewayError::InvalidUrl(_) => false,
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout
        } else {
            GatewayError::Network(err.to_string())
        }
    }
}

/// A fetched payload that does not have the shape a panel expects.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("expected {expected} in response, got {found}")]
    UnexpectedShape {
        expected: &'static str,
        found: &'static str,
    },

    #[error("response is missing field `{0}`")]
    MissingField(&'static str),

    #[error("malformed {kind} record: {reason}")]
    MalformedRecord { kind: &'static str, reason: String },
}

pub fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
