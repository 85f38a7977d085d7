// New document factory: transient drafts with defaults applied.

use chrono::NaiveDateTime;
use docmirror_common::naming::new_local_name;
use docmirror_common::types::{
    KEY_DOCSTATUS, KEY_IS_LOCAL, KEY_OWNER, KEY_RUN_LINK_TRIGGERS, KEY_UNSAVED,
};
use docmirror_common::{DocKey, DocStatus, Document};
use serde_json::Value;
use tracing::debug;

use crate::defaults::{resolve_default, DefaultContext};
use crate::error::{MirrorError, Result};
use crate::meta::MetaCache;
use crate::session::Session;
use crate::store::docinfo::DocinfoStore;
use crate::store::locals::Locals;

/// Where a new child row goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParentSlot {
    pub parent: DocKey,
    pub parentfield: String,
    /// 1-based target position; `None` appends.
    pub at: Option<usize>,
}

impl ParentSlot {
    pub fn append(parent: DocKey, parentfield: impl Into<String>) -> Self {
        Self { parent, parentfield: parentfield.into(), at: None }
    }

    pub fn at(mut self, position: usize) -> Self {
        self.at = Some(position);
        self
    }
}

/// Mutable state a draft touches, borrowed from the mirror for one call.
pub struct Factory<'a> {
    pub meta: &'a mut MetaCache,
    pub locals: &'a mut Locals,
    pub docinfo: &'a mut DocinfoStore,
    pub session: &'a mut Session,
    pub now: NaiveDateTime,
}

impl Factory<'_> {
    /// Create and register a draft of `doctype`. Child rows are linked into
    /// `slot`; top-level drafts get a docinfo slot, link-trigger flag, and
    /// any pending create intent. With `with_mandatory_children` one empty
    /// row is created for every required table field.
    pub fn new_doc(
        &mut self,
        doctype: &str,
        slot: Option<ParentSlot>,
        with_mandatory_children: bool,
    ) -> Result<DocKey> {
        let mut doc = Document::new(doctype, new_local_name(doctype));
        doc.set(KEY_DOCSTATUS, Value::from(DocStatus::Draft.as_i64()));
        doc.set(KEY_IS_LOCAL, Value::from(1));
        doc.set(KEY_UNSAVED, Value::from(1));
        doc.set(KEY_OWNER, Value::String(self.session.user.clone()));

        self.apply_defaults(&mut doc, slot.as_ref().map(|slot| &slot.parent))?;

        let key = match &slot {
            Some(slot) => {
                self.locals.insert_child(&slot.parent, &slot.parentfield, doc, slot.at, self.meta)?
            }
            None => {
                let key = self.locals.add(doc, self.meta).key;
                self.docinfo.ensure(&key);
                key
            }
        };
        debug!(doctype, name = %key.name, child = slot.is_some(), "created draft");

        if with_mandatory_children {
            self.create_mandatory_children(&key)?;
        }

        if slot.is_none() {
            self.apply_create_intent(&key);
            if let Some(doc) = self.locals.get_mut(&key) {
                doc.set(KEY_RUN_LINK_TRIGGERS, Value::from(1));
            }
        }
        Ok(key)
    }

    /// Append (or insert at `at`) a new row in `parent.parentfield`.
    pub fn add_child(&mut self, parent: &DocKey, parentfield: &str, at: Option<usize>) -> Result<DocKey> {
        let child_doctype = self
            .meta
            .field(&parent.doctype, parentfield)
            .filter(|field| field.fieldtype.is_table())
            .and_then(|field| field.link_target())
            .map(str::to_string)
            .ok_or_else(|| MirrorError::NotATableField {
                doctype: parent.doctype.clone(),
                fieldname: parentfield.to_string(),
            })?;
        let slot = ParentSlot { parent: parent.clone(), parentfield: parentfield.to_string(), at };
        self.new_doc(&child_doctype, Some(slot), false)
    }

    fn apply_defaults(&mut self, doc: &mut Document, parent: Option<&DocKey>) -> Result<()> {
        let schema = self.meta.require(&doc.doctype)?;
        let parent_doc = match parent {
            Some(parent) => Some(self.locals.require(parent)?),
            None => None,
        };
        let ctx = DefaultContext {
            session: &*self.session,
            locals: &*self.locals,
            title_field: schema.title_field.as_deref(),
            now: self.now,
        };

        let mut resolved = Vec::new();
        for field in &schema.fields {
            if field.fieldtype.is_structural() || field.no_default {
                continue;
            }
            if field.fieldtype.is_table() {
                doc.children.entry(field.fieldname.clone()).or_default();
                resolved.push((field.fieldname.clone(), Some(Value::Array(Vec::new()))));
                continue;
            }
            if doc.get(&field.fieldname).is_some_and(|value| !value.is_null()) {
                continue;
            }

            let value = resolve_default(field, doc, parent_doc, &ctx);
            if let Some(value) = value.as_ref().filter(|value| !is_blank(value)) {
                doc.set(field.fieldname.clone(), value.clone());
            }
            resolved.push((field.fieldname.clone(), value));
        }

        let doctype = doc.doctype.clone();
        for (fieldname, value) in resolved {
            self.meta.note_resolved_default(&doctype, &fieldname, value);
        }
        Ok(())
    }

    fn create_mandatory_children(&mut self, key: &DocKey) -> Result<()> {
        let schema = self.meta.require(&key.doctype)?;
        if schema.istable {
            return Ok(());
        }
        let required: Vec<String> = schema
            .table_fields()
            .filter(|field| field.reqd)
            .map(|field| field.fieldname.clone())
            .collect();

        for fieldname in required {
            self.add_child(key, &fieldname, None)?;
        }
        Ok(())
    }

    /// Copy simple, copyable fields from a pending create intent, then
    /// consume it.
    fn apply_create_intent(&mut self, key: &DocKey) {
        let Some(intent) = self.session.take_create_intent() else {
            return;
        };
        let Some(schema) = self.meta.get(&key.doctype) else {
            return;
        };
        let Some(doc) = self.locals.get_mut(key) else {
            return;
        };

        for (fieldname, value) in intent {
            let copyable = schema
                .field(&fieldname)
                .is_some_and(|field| field.fieldtype.accepts_create_intent() && !field.no_copy);
            if copyable {
                doc.set(fieldname, value);
            } else {
                debug!(doctype = %key.doctype, fieldname, "create intent field not copied");
            }
        }
    }
}

fn is_blank(value: &Value) -> bool {
    matches!(value, Value::Null) || value.as_str().is_some_and(str::is_empty)
}
