// Errors raised while interpreting inbound JSON payloads.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("expected a JSON object for a document, found {0}")]
    NotAnObject(&'static str),

    #[error("document is missing a `doctype` string")]
    MissingDoctype,

    #[error("unexpected payload shape: {0}")]
    UnexpectedShape(&'static str),

    #[error("invalid doctype schema `{doctype}`: {message}")]
    InvalidSchema { doctype: String, message: String },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub(crate) fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
