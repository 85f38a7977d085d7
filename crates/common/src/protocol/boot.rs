// Session boot data and user permission entries.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::de;

/// One allowed record for a link-target doctype.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserPermission {
    /// Allowed record name.
    pub doc: String,
    #[serde(default, deserialize_with = "de::flag")]
    pub is_default: bool,
    /// Restricts the entry to documents of this doctype.
    #[serde(default, deserialize_with = "de::opt_string", skip_serializing_if = "Option::is_none")]
    pub applicable_for: Option<String>,
}

impl UserPermission {
    pub fn new(doc: impl Into<String>) -> Self {
        Self { doc: doc.into(), is_default: false, applicable_for: None }
    }

    pub fn as_default(mut self) -> Self {
        self.is_default = true;
        self
    }

    pub fn applicable_for(mut self, doctype: impl Into<String>) -> Self {
        self.applicable_for = Some(doctype.into());
        self
    }
}

/// Link-target doctype → ordered permission entries.
pub type UserPermissions = BTreeMap<String, Vec<UserPermission>>;

/// Outcome of filtering a doctype's permission entries for one target document.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AllowedRecords {
    pub allowed: Vec<String>,
    pub default_doc: Option<String>,
}

impl AllowedRecords {
    /// Keep entries that apply to `for_doctype`. The default record is the
    /// only allowed record when there is exactly one, else the first entry
    /// flagged `is_default`.
    pub fn filter(entries: &[UserPermission], for_doctype: &str) -> Self {
        let applicable: Vec<&UserPermission> = entries
            .iter()
            .filter(|entry| {
                entry.applicable_for.as_deref().map_or(true, |applies_to| applies_to == for_doctype)
            })
            .collect();

        let allowed: Vec<String> = applicable.iter().map(|entry| entry.doc.clone()).collect();
        let default_doc = if allowed.len() == 1 {
            allowed.first().cloned()
        } else {
            applicable.iter().find(|entry| entry.is_default).map(|entry| entry.doc.clone())
        };

        Self { allowed, default_doc }
    }

    pub fn is_restricted(&self) -> bool {
        !self.allowed.is_empty()
    }

    pub fn permits(&self, value: &str) -> bool {
        self.allowed.iter().any(|allowed| allowed == value)
    }
}

/// Session bootstrap delivered once per login.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct BootInfo {
    pub user: String,
    #[serde(default, deserialize_with = "de::opt_string", skip_serializing_if = "Option::is_none")]
    pub user_fullname: Option<String>,
    /// User defaults: key (fieldname or doctype) → one or more values.
    #[serde(default, deserialize_with = "deserialize_defaults")]
    pub defaults: BTreeMap<String, Vec<String>>,
    /// Link-target doctype → last value the user picked.
    #[serde(default)]
    pub last_selected_values: BTreeMap<String, String>,
    /// Global schema stamp; a change invalidates every persisted doctype.
    #[serde(default, deserialize_with = "de::opt_string", skip_serializing_if = "Option::is_none")]
    pub metadata_version: Option<String>,
    /// Boot-loaded records, registered under `:`-prefixed doctypes.
    #[serde(default)]
    pub docs: Vec<Value>,
    #[serde(default)]
    pub user_info: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_permissions: Option<UserPermissions>,
}

fn deserialize_defaults<'de, D>(deserializer: D) -> Result<BTreeMap<String, Vec<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Values(#[serde(deserialize_with = "de::string_or_list")] Vec<String>);

    let raw = BTreeMap::<String, Values>::deserialize(deserializer)?;
    Ok(raw.into_iter().map(|(key, Values(values))| (key, values)).collect())
}
