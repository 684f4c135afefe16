//! Best-effort parsing of non-2xx response bodies.

use std::fmt;

use serde_json::Value;

/// Body of a failed HTTP exchange.
///
/// Backends and providers disagree on error shapes, so parsing never fails: a body that
/// is not recognizable JSON is kept verbatim in `raw`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorBody {
    /// Machine-readable code, e.g. `device_mismatch`.
    pub error_code: Option<String>,
    /// Human-readable message.
    pub message: Option<String>,
    /// The body exactly as received.
    pub raw: String,
}

impl ErrorBody {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Extract whatever structure `text` has; never fails.
    pub fn parse(text: &str) -> Self {
        let raw = text.to_string();
        let Ok(json) = serde_json::from_str::<Value>(text) else {
            return Self {
                raw,
                ..Default::default()
            };
        };

        let (error_code, message) = match json.get("error") {
            Some(Value::Object(err)) => (
                string_field(err.get("code")).or_else(|| string_field(err.get("type"))),
                string_field(err.get("message")),
            ),
            Some(Value::String(code)) => (
                Some(code.clone()),
                string_field(json.get("message")).or_else(|| string_field(json.get("reason"))),
            ),
            _ => (
                string_field(json.get("errorCode")).or_else(|| string_field(json.get("code"))),
                string_field(json.get("message")).or_else(|| string_field(json.get("reason"))),
            ),
        };

        Self {
            error_code,
            message,
            raw,
        }
    }

    /// Lossy UTF-8 variant of [`ErrorBody::parse`].
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self::parse(&String::from_utf8_lossy(bytes))
    }

    pub fn is_empty(&self) -> bool {
        self.raw.trim().is_empty()
    }
}

fn string_field(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl fmt::Display for ErrorBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.message, &self.error_code) {
            (Some(message), _) => write!(f, "{}", message),
            (None, Some(code)) => write!(f, "{}", code),
            (None, None) if self.is_empty() => write!(f, "<empty body>"),
            (None, None) => write!(f, "{}", self.raw),
        }
    }
}
