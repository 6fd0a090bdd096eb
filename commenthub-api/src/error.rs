use anyhow::{anyhow, Context};
use http::StatusCode;

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("Unknown error: {0}")]
    Unknown(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Invalid captcha")]
    InvalidCaptcha,

    #[error("Invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Null byte in string is not allowed {0:?}")]
    NullByteInString(String),
}

impl Error {
    /// Whether re-issuing the same request later may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transport(_))
    }

    /// Classifies a non-success backend response
    pub fn from_response(status: StatusCode, body: &[u8]) -> Error {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::Unauthorized,
            StatusCode::BAD_REQUEST => Error::parse_validation(body).unwrap_or_else(|err| {
                Error::Unknown(format!("unparseable validation failure: {err:#}"))
            }),
            StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
            | StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS => Error::Transport(format!("backend answered {status}")),
            _ => Error::Unknown(format!(
                "backend answered {status}: {}",
                String::from_utf8_lossy(body)
            )),
        }
    }

    /// Parses a validation failure body, in which each offending field maps to either a
    /// message or a list of messages
    pub fn parse_validation(body: &[u8]) -> anyhow::Result<Error> {
        let data: serde_json::Value =
            serde_json::from_slice(body).context("parsing error contents")?;
        let mut fields = data
            .as_object()
            .ok_or_else(|| anyhow!("validation failure is not an object"))?;
        if let Some(serde_json::Value::String(msg)) = fields.get("error") {
            return Ok(Error::Unknown(msg.clone()));
        }
        // account endpoints nest the per-field messages
        if let Some(serde_json::Value::Object(nested)) = fields.get("errors") {
            fields = nested;
        }
        if fields.contains_key("captcha_key") || fields.contains_key("captcha_text") {
            return Ok(Error::InvalidCaptcha);
        }
        let (field, detail) = fields
            .iter()
            .next()
            .ok_or_else(|| anyhow!("validation failure lists no field"))?;
        let message = match detail {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Array(msgs) => msgs
                .iter()
                .filter_map(|m| m.as_str())
                .collect::<Vec<_>>()
                .join(" "),
            other => other.to_string(),
        };
        Ok(Error::Validation {
            field: field.clone(),
            message,
        })
    }
}
