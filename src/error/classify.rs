//! Maps raw transport results into typed [`AuthError`]s.

use reqwest::StatusCode;
use serde_json::Value;

use super::AuthError;

/// Classify a completed response.
///
/// Returns `None` when the response carries no error. A JSON body with an
/// `error` field wins over the status code, so `200` with an OAuth error body
/// is still an error.
pub fn classify(status: StatusCode, body: &str) -> Option<AuthError> {
    if let Some(err) = server_error(status, body) {
        return Some(err);
    }
    if status.is_client_error() || status.is_server_error() {
        let message = status
            .canonical_reason()
            .map(str::to_string)
            .unwrap_or_else(|| status.as_str().to_string());
        return Some(AuthError::http(status.as_u16(), message));
    }
    None
}

/// Classify a transport result, passing transport errors through unchanged.
pub fn from_server(
    result: Result<(StatusCode, String), reqwest::Error>,
) -> Result<(StatusCode, String), AuthError> {
    let (status, body) = result?;
    match classify(status, &body) {
        Some(err) => Err(err),
        None => Ok((status, body)),
    }
}

fn server_error(status: StatusCode, body: &str) -> Option<AuthError> {
    let value: Value = serde_json::from_str(body).ok()?;
    let error = value.get("error")?;
    let (code, message) = match error {
        // OAuth style: {"error": "invalid_grant", "error_description": "..."}
        Value::String(code) => (
            Some(code.clone()),
            text_field(&value, "message").or_else(|| text_field(&value, "error_description")),
        ),
        // Resource API style: {"error": {"code": "...", "message": "..."}}
        Value::Object(_) => (
            text_field(error, "code"),
            text_field(error, "message").or_else(|| text_field(&value, "message")),
        ),
        Value::Null | Value::Bool(false) => return None,
        other => (Some(other.to_string()), None),
    };
    Some(AuthError::Http {
        status: status.as_u16(),
        code,
        message: message.unwrap_or_default(),
    })
}

fn text_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}
