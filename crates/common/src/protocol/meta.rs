// Metadata fetch: `{doctype, with_parent, cached_timestamp}` → `"use_cache"` | `{docs}`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::payload::{json_kind, PayloadError};

/// Reply sent when the caller's cached copy is still current.
pub const USE_CACHE_SENTINEL: &str = "use_cache";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetaRequest {
    pub doctype: String,
    /// Also return the doctypes of child tables.
    pub with_parent: bool,
    /// `modified` stamp of the locally persisted copy, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cached_timestamp: Option<String>,
}

impl MetaRequest {
    pub fn new(doctype: impl Into<String>, cached_timestamp: Option<String>) -> Self {
        Self { doctype: doctype.into(), with_parent: true, cached_timestamp }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MetaResponse {
    /// Server stamp matches `cached_timestamp`; reuse the persisted copy.
    UseCache,
    /// Full payload: the requested `DocType` record followed by child doctypes.
    Docs(Vec<Value>),
}

impl MetaResponse {
    /// Accepts the bare sentinel, `{"message": "use_cache"}`, or `{"docs": [...]}`.
    pub fn from_value(value: Value) -> Result<Self, PayloadError> {
        match value {
            Value::String(text) if text == USE_CACHE_SENTINEL => Ok(Self::UseCache),
            Value::Object(mut object) => {
                if object.get("message").and_then(Value::as_str) == Some(USE_CACHE_SENTINEL) {
                    return Ok(Self::UseCache);
                }
                match object.remove("docs") {
                    Some(Value::Array(docs)) => Ok(Self::Docs(docs)),
                    Some(other) => Err(PayloadError::NotAnObject(json_kind(&other))),
                    None => Err(PayloadError::UnexpectedShape("metadata response without docs")),
                }
            }
            other => Err(PayloadError::UnexpectedShape(json_kind(&other))),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::UseCache => Value::String(USE_CACHE_SENTINEL.into()),
            Self::Docs(docs) => json!({ "docs": docs }),
        }
    }
}
