//! Error types for the GLPI API client.
//!
//! # Design
//! `NotFound` gets a dedicated variant because the gateway answers it with
//! 404 instead of 500. A response counts as not-found when GLPI answers with
//! HTTP 404 or when its machine-readable error code names a missing item or
//! itemtype. The human message is never pattern-matched.

use thiserror::Error;

/// GLPI error codes that mean "the thing you asked for does not exist".
pub const NOT_FOUND_CODES: &[&str] = &[
    "ERROR_ITEM_NOT_FOUND",
    "ERROR_RESOURCE_NOT_FOUND_NOR_COMMONDBTM",
    "ERROR_RESOURCE_MISSING",
];

/// Errors returned by `GlpiClient` build and parse methods.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The requested item, itemtype or sub-itemtype does not exist.
    #[error("{message}")]
    NotFound {
        code: Option<String>,
        message: String,
    },

    /// GLPI answered with a non-2xx status that is not a not-found.
    #[error("HTTP {status}: {message}")]
    HttpError {
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// The response body could not be deserialized into the expected type.
    #[error("deserialization failed: {0}")]
    DeserializationError(String),

    /// The request payload could not be serialized to JSON.
    #[error("serialization failed: {0}")]
    SerializationError(String),

    /// An authenticated call was attempted before `initSession`.
    #[error("no open session")]
    NoSession,

    /// A locally built parameter is unusable (for example a zero page size).
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl ApiError {
    /// Upstream HTTP status, when the error came from a GLPI response.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::NotFound { .. } => Some(404),
            ApiError::HttpError { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Classify a non-2xx GLPI response.
    ///
    /// GLPI reports errors as `["ERROR_CODE", "message"]`; anything else is
    /// carried through as raw text.
    pub fn from_response(status: u16, body: &str) -> Self {
        let (code, message) = decode_error_body(body);
        let code_is_not_found = code
            .as_deref()
            .is_some_and(|c| NOT_FOUND_CODES.contains(&c));
        if status == 404 || code_is_not_found {
            return ApiError::NotFound { code, message };
        }
        ApiError::HttpError {
            status,
            code,
            message,
        }
    }
}

fn decode_error_body(body: &str) -> (Option<String>, String) {
    if let Ok(serde_json::Value::Array(parts)) = serde_json::from_str::<serde_json::Value>(body) {
        let code = parts.first().and_then(|v| v.as_str()).map(str::to_string);
        let message = match parts.get(1) {
            Some(serde_json::Value::String(message)) => Some(message.clone()),
            Some(serde_json::Value::Array(items)) => Some(item_messages(items)),
            _ => code.clone(),
        };
        if let Some(message) = message {
            return (code, message);
        }
    }
    (None, body.trim().to_string())
}

/// Failed batch writes carry one `{"id": false, "message": ...}` per item.
/// Their messages are joined; without any, the list itself is the message.
fn item_messages(items: &[serde_json::Value]) -> String {
    let messages: Vec<&str> = items
        .iter()
        .filter_map(|item| item.get("message").and_then(|m| m.as_str()))
        .filter(|m| !m.is_empty())
        .collect();
    if messages.is_empty() {
        serde_json::Value::Array(items.to_vec()).to_string()
    } else {
        messages.join("; ")
    }
}
