// Sync payloads: a bare document, an array of documents, or `{docs, docinfo}`.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::payload::{json_kind, PayloadError};
use crate::types::{DocKey, Document};

/// Auxiliary per-document data kept apart from field values. Merged
/// wholesale per sync, never diffed.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Docinfo {
    pub doctype: String,
    pub name: String,
    #[serde(default)]
    pub comments: Vec<Value>,
    #[serde(default)]
    pub attachments: Vec<Value>,
    #[serde(default)]
    pub assignments: Vec<Value>,
    #[serde(default)]
    pub shared: Vec<Value>,
    /// Identity directory for users referenced by the entries above.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub user_info: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Docinfo {
    pub fn new(doctype: impl Into<String>, name: impl Into<String>) -> Self {
        Self { doctype: doctype.into(), name: name.into(), ..Self::default() }
    }

    pub fn key(&self) -> DocKey {
        DocKey::new(self.doctype.clone(), self.name.clone())
    }
}

/// Inbound sync payload normalized to an ordered document list.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SyncPayload {
    pub docs: Vec<Document>,
    pub docinfo: Option<Docinfo>,
}

impl SyncPayload {
    pub fn from_docs(docs: Vec<Document>) -> Self {
        Self { docs, docinfo: None }
    }

    /// Normalize any accepted shape:
    /// - `{docs, docinfo}` (either key present) → its parts
    /// - a single object → one document
    /// - an array → documents in order
    /// - null → empty
    pub fn from_value(value: Value) -> Result<Self, PayloadError> {
        match value {
            Value::Null => Ok(Self::default()),
            Value::Array(items) => Ok(Self::from_docs(parse_docs(items)?)),
            Value::Object(mut object) if is_envelope(&object) => {
                let docs = match object.remove("docs") {
                    None | Some(Value::Null) => Vec::new(),
                    Some(Value::Array(items)) => parse_docs(items)?,
                    Some(single @ Value::Object(_)) => vec![Document::from_value(single)?],
                    Some(other) => return Err(PayloadError::NotAnObject(json_kind(&other))),
                };
                let docinfo = match object.remove("docinfo") {
                    None | Some(Value::Null) => None,
                    Some(docinfo) => Some(serde_json::from_value(docinfo)?),
                };
                Ok(Self { docs, docinfo })
            }
            single @ Value::Object(_) => Ok(Self::from_docs(vec![Document::from_value(single)?])),
            other => Err(PayloadError::UnexpectedShape(json_kind(&other))),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty() && self.docinfo.is_none()
    }
}

impl<'de> Deserialize<'de> for SyncPayload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(value).map_err(serde::de::Error::custom)
    }
}

fn is_envelope(object: &Map<String, Value>) -> bool {
    !object.contains_key("doctype") && (object.contains_key("docs") || object.contains_key("docinfo"))
}

fn parse_docs(items: Vec<Value>) -> Result<Vec<Document>, PayloadError> {
    items.into_iter().map(Document::from_value).collect()
}
