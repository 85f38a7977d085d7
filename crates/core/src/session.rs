// Session context: user identity, user defaults, last-selected values,
// user permissions, and the one-shot create intent.

use std::collections::BTreeMap;

use docmirror_common::protocol::boot::{AllowedRecords, BootInfo, UserPermissions};
use serde_json::{Map, Value};

use crate::config::SessionConfig;

#[derive(Debug, Clone, Default)]
pub struct Session {
    pub user: String,
    pub user_fullname: Option<String>,
    defaults: BTreeMap<String, Vec<String>>,
    last_selected_values: BTreeMap<String, String>,
    user_permissions: Option<UserPermissions>,
    create_intent: Option<Map<String, Value>>,
}

impl Session {
    pub fn new(user: impl Into<String>) -> Self {
        Self { user: user.into(), ..Self::default() }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            user: config.user.clone(),
            user_fullname: config.user_fullname.clone(),
            ..Self::default()
        }
    }

    /// Install identity and defaults from boot data. Permissions are taken
    /// only when boot carries them.
    pub fn apply_boot(&mut self, boot: &BootInfo) {
        self.user = boot.user.clone();
        self.user_fullname = boot.user_fullname.clone();
        self.defaults = boot.defaults.clone();
        self.last_selected_values = boot.last_selected_values.clone();
        if let Some(permissions) = &boot.user_permissions {
            self.user_permissions = Some(permissions.clone());
        }
    }

    pub fn fullname(&self) -> &str {
        self.user_fullname.as_deref().unwrap_or(&self.user)
    }

    // ── Defaults ───────────────────────────────────────────────────

    pub fn set_default(&mut self, key: impl Into<String>, values: Vec<String>) {
        self.defaults.insert(key.into(), values);
    }

    /// First user default stored under `key` (a fieldname or a doctype).
    pub fn user_default(&self, key: &str) -> Option<&str> {
        self.defaults.get(key)?.first().map(String::as_str)
    }

    pub fn user_defaults(&self, key: &str) -> &[String] {
        self.defaults.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn set_last_selected(&mut self, doctype: impl Into<String>, value: impl Into<String>) {
        self.last_selected_values.insert(doctype.into(), value.into());
    }

    pub fn last_selected(&self, doctype: &str) -> Option<&str> {
        self.last_selected_values.get(doctype).map(String::as_str)
    }

    // ── User permissions ───────────────────────────────────────────

    pub fn has_user_permissions(&self) -> bool {
        self.user_permissions.is_some()
    }

    pub fn set_user_permissions(&mut self, permissions: UserPermissions) {
        self.user_permissions = Some(permissions);
    }

    /// Allowed records of `link_doctype` for a document of `for_doctype`.
    pub fn allowed_records(&self, link_doctype: &str, for_doctype: &str) -> AllowedRecords {
        self.user_permissions
            .as_ref()
            .and_then(|permissions| permissions.get(link_doctype))
            .map(|entries| AllowedRecords::filter(entries, for_doctype))
            .unwrap_or_default()
    }

    // ── Create intent ──────────────────────────────────────────────

    pub fn set_create_intent(&mut self, values: Map<String, Value>) {
        self.create_intent = Some(values);
    }

    pub fn has_create_intent(&self) -> bool {
        self.create_intent.is_some()
    }

    /// Consume the pending intent, if any.
    pub fn take_create_intent(&mut self) -> Option<Map<String, Value>> {
        self.create_intent.take()
    }
}
