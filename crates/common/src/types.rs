// Core record types shared across the mirror: documents, registry keys, docstatus.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::de::scalar_to_string;
use crate::payload::{json_kind, PayloadError};

// Reserved document keys.
pub const KEY_DOCTYPE: &str = "doctype";
pub const KEY_NAME: &str = "name";
pub const KEY_IS_LOCAL: &str = "__islocal";
pub const KEY_UNSAVED: &str = "__unsaved";
pub const KEY_UNEDITED: &str = "__unedited";
pub const KEY_RUN_LINK_TRIGGERS: &str = "__run_link_triggers";
pub const KEY_DOCSTATUS: &str = "docstatus";
pub const KEY_OWNER: &str = "owner";
pub const KEY_PARENT: &str = "parent";
pub const KEY_PARENTTYPE: &str = "parenttype";
pub const KEY_PARENTFIELD: &str = "parentfield";
pub const KEY_IDX: &str = "idx";
pub const KEY_LOCALNAME: &str = "localname";

/// Registry key: a document is unique per `(doctype, name)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocKey {
    pub doctype: String,
    pub name: String,
}

impl DocKey {
    pub fn new(doctype: impl Into<String>, name: impl Into<String>) -> Self {
        Self { doctype: doctype.into(), name: name.into() }
    }
}

impl fmt::Display for DocKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.doctype, self.name)
    }
}

/// Workflow state carried in `docstatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocStatus {
    Draft,
    Submitted,
    Cancelled,
}

impl DocStatus {
    pub fn as_i64(self) -> i64 {
        match self {
            Self::Draft => 0,
            Self::Submitted => 1,
            Self::Cancelled => 2,
        }
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(Self::Draft),
            1 => Some(Self::Submitted),
            2 => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// A flat record: `doctype`, `name`, and a fieldname → value map.
///
/// Child-table rows are not stored inline once a document is registered.
/// `children` holds the ordered row names per table field and the rows
/// themselves live in the registry under their own keys. Inbound documents
/// carry their rows as JSON arrays inside `fields` until the registry
/// splits them out.
///
/// An empty `name` marks a nameless transient document.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Document {
    pub doctype: String,
    pub name: String,
    pub fields: Map<String, Value>,
    pub children: BTreeMap<String, Vec<String>>,
    pub last_sync_on: Option<DateTime<Utc>>,
}

impl Document {
    pub fn new(doctype: impl Into<String>, name: impl Into<String>) -> Self {
        Self { doctype: doctype.into(), name: name.into(), ..Self::default() }
    }

    /// Parse a document from a JSON object. `doctype` is required; `name` may
    /// be missing (transient drafts) or numeric (autoincrement names).
    pub fn from_value(value: Value) -> Result<Self, PayloadError> {
        let Value::Object(mut fields) = value else {
            return Err(PayloadError::NotAnObject(json_kind(&value)));
        };

        let doctype = match fields.remove(KEY_DOCTYPE) {
            Some(Value::String(doctype)) if !doctype.is_empty() => doctype,
            _ => return Err(PayloadError::MissingDoctype),
        };
        let name = fields.remove(KEY_NAME).as_ref().and_then(scalar_to_string).unwrap_or_default();

        Ok(Self { doctype, name, fields, ..Self::default() })
    }

    /// Flat JSON form: reserved keys plus fields. Child rows are not included;
    /// the registry re-hydrates them.
    pub fn to_value(&self) -> Value {
        let mut out = Map::with_capacity(self.fields.len() + 2);
        out.insert(KEY_DOCTYPE.into(), Value::String(self.doctype.clone()));
        if !self.name.is_empty() {
            out.insert(KEY_NAME.into(), Value::String(self.name.clone()));
        }
        for (key, value) in &self.fields {
            out.insert(key.clone(), value.clone());
        }
        Value::Object(out)
    }

    pub fn key(&self) -> DocKey {
        DocKey::new(self.doctype.clone(), self.name.clone())
    }

    pub fn has_name(&self) -> bool {
        !self.name.is_empty()
    }

    pub fn get(&self, fieldname: &str) -> Option<&Value> {
        match fieldname {
            KEY_DOCTYPE | KEY_NAME => None,
            _ => self.fields.get(fieldname),
        }
    }

    pub fn get_str(&self, fieldname: &str) -> Option<&str> {
        match fieldname {
            KEY_DOCTYPE => Some(self.doctype.as_str()),
            KEY_NAME => Some(self.name.as_str()),
            _ => self.fields.get(fieldname).and_then(Value::as_str),
        }
    }

    /// Sets a field and returns the previous value.
    pub fn set(&mut self, fieldname: impl Into<String>, value: Value) -> Option<Value> {
        self.fields.insert(fieldname.into(), value)
    }

    pub fn remove(&mut self, fieldname: &str) -> Option<Value> {
        self.fields.remove(fieldname)
    }

    pub fn is_local(&self) -> bool {
        self.fields.get(KEY_IS_LOCAL).is_some_and(is_truthy)
    }

    pub fn docstatus(&self) -> DocStatus {
        self.fields
            .get(KEY_DOCSTATUS)
            .and_then(Value::as_i64)
            .and_then(DocStatus::from_i64)
            .unwrap_or(DocStatus::Draft)
    }

    pub fn parent(&self) -> Option<&str> {
        self.get_str(KEY_PARENT).filter(|parent| !parent.is_empty())
    }

    pub fn parenttype(&self) -> Option<&str> {
        self.get_str(KEY_PARENTTYPE).filter(|parenttype| !parenttype.is_empty())
    }

    pub fn parentfield(&self) -> Option<&str> {
        self.get_str(KEY_PARENTFIELD).filter(|parentfield| !parentfield.is_empty())
    }

    /// Row position within the parent table. Fractional while an insertion
    /// is being renumbered.
    pub fn idx(&self) -> Option<f64> {
        self.fields.get(KEY_IDX).and_then(Value::as_f64)
    }

    pub fn localname(&self) -> Option<&str> {
        self.get_str(KEY_LOCALNAME).filter(|localname| !localname.is_empty())
    }

    /// Key of the owning parent document when this is a child row.
    pub fn parent_key(&self) -> Option<DocKey> {
        Some(DocKey::new(self.parenttype()?, self.parent()?))
    }

    pub fn table_rows(&self, fieldname: &str) -> &[String] {
        self.children.get(fieldname).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Document {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(value).map_err(serde::de::Error::custom)
    }
}

/// Loose truthiness used for flags and "is this value set" checks:
/// null, `false`, `0`, `""`, and empty arrays are unset.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(_) => true,
    }
}
